//! Spawns an [`Agent`] onto its own mailbox-driven actor task and returns a
//! cheaply cloneable handle for sending it messages (spec §4.6, §5: "message
//! handling is strictly serial" within an actor).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{info, warn};

use super::{Agent, AgentContext, AgentError};
use crate::event_bus::{Event, EventEmitter};
use crate::message::{AgentMessage, AgentStatusReport, TaskResult, TaskSpec};
use crate::types::{AgentId, AgentStatus, SessionId, TaskId};

/// A live task the pool/registry/supervisor can introspect.
#[derive(Clone, Debug)]
pub struct ActiveTask {
    pub task_id: TaskId,
    pub task_type: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

struct HandleState {
    status: AgentStatus,
    active_tasks: FxHashMap<TaskId, ActiveTask>,
}

/// A cloneable reference to a running agent actor. Cloning a handle does not
/// clone the actor; it shares the same mailbox and state.
#[derive(Clone)]
pub struct AgentHandle {
    pub agent_id: AgentId,
    pub session_id: Option<SessionId>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    mailbox: flume::Sender<AgentMessage>,
    next_task_id: Arc<AtomicU64>,
    state: Arc<RwLock<HandleState>>,
    terminated: tokio::sync::watch::Receiver<bool>,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle").field("agent_id", &self.agent_id).finish()
    }
}

impl AgentHandle {
    /// Spawn `agent` as an actor with its own mailbox and return a handle to
    /// it. The actor task runs until a `Shutdown` message is received, its
    /// mailbox is dropped, or a fatal error occurs.
    pub fn spawn(
        agent: Arc<dyn Agent>,
        agent_id: AgentId,
        session_id: Option<SessionId>,
        event_emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        let (tx, rx) = flume::unbounded();
        let state = Arc::new(RwLock::new(HandleState {
            status: AgentStatus::Initialising,
            active_tasks: FxHashMap::default(),
        }));
        let (terminated_tx, terminated_rx) = tokio::sync::watch::channel(false);

        let handle = Self {
            agent_id: agent_id.clone(),
            session_id: session_id.clone(),
            started_at: chrono::Utc::now(),
            mailbox: tx,
            next_task_id: Arc::new(AtomicU64::new(1)),
            state: Arc::clone(&state),
            terminated: terminated_rx,
        };

        tokio::spawn(async move {
            run_actor(agent, agent_id, session_id, event_emitter, rx, state).await;
            let _ = terminated_tx.send(true);
        });
        handle
    }

    /// Resolve once the actor's message loop has exited, whether via
    /// `Shutdown`, a dropped mailbox, or a fatal task error. Used by
    /// [`super::supervisor::AgentSupervisor`] to decide whether to respawn.
    pub async fn wait_for_termination(&self) {
        let mut rx = self.terminated.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    /// Submit a task and await its result. Assigns the next monotonic task
    /// id for this agent.
    pub async fn execute_task(&self, spec: TaskSpec) -> Result<TaskResult, AgentError> {
        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let (reply_to, reply_rx) = oneshot::channel();
        self.mailbox
            .send_async(AgentMessage::ExecuteTask { task_id, spec, reply_to })
            .await
            .map_err(|_| AgentError::ExecutionFailed { message: "agent mailbox closed".into() })?;
        reply_rx.await.map_err(|_| AgentError::ExecutionFailed { message: "agent dropped reply channel".into() })?
    }

    pub async fn get_status(&self) -> Result<AgentStatusReport, AgentError> {
        let (reply_to, reply_rx) = oneshot::channel();
        self.mailbox
            .send_async(AgentMessage::GetStatus { reply_to })
            .await
            .map_err(|_| AgentError::ExecutionFailed { message: "agent mailbox closed".into() })?;
        reply_rx.await.map_err(|_| AgentError::ExecutionFailed { message: "agent dropped reply channel".into() })
    }

    pub async fn send_message(&self, target_agent: AgentId, payload: serde_json::Value) -> bool {
        self.mailbox.send_async(AgentMessage::SendMessage { target_agent, payload }).await.is_ok()
    }

    pub async fn receive_message(&self, from: AgentId, payload: serde_json::Value) -> bool {
        self.mailbox.send_async(AgentMessage::ReceiveMessage { from, payload }).await.is_ok()
    }

    pub async fn coordination(&self, payload: serde_json::Value) -> bool {
        self.mailbox.send_async(AgentMessage::Coordination { payload }).await.is_ok()
    }

    pub async fn shutdown(&self, reason: impl Into<String>) {
        let _ = self.mailbox.send_async(AgentMessage::Shutdown { reason: reason.into() }).await;
    }

    #[must_use]
    pub fn status(&self) -> AgentStatus {
        self.state.read().status
    }

    #[must_use]
    pub fn active_task_count(&self) -> usize {
        self.state.read().active_tasks.len()
    }

    #[must_use]
    pub fn active_tasks(&self) -> Vec<ActiveTask> {
        self.state.read().active_tasks.values().cloned().collect()
    }
}

async fn run_actor(
    agent: Arc<dyn Agent>,
    agent_id: AgentId,
    session_id: Option<SessionId>,
    event_emitter: Arc<dyn EventEmitter>,
    mailbox: flume::Receiver<AgentMessage>,
    state: Arc<RwLock<HandleState>>,
) {
    state.write().status = AgentStatus::Ready;
    let _ = event_emitter.emit(Event::agent_started(agent_id.clone()));
    info!(%agent_id, "agent actor started");

    while let Ok(message) = mailbox.recv_async().await {
        match message {
            AgentMessage::ExecuteTask { task_id, spec, reply_to } => {
                if !agent.can_handle(&spec) {
                    let _ = reply_to.send(Err(AgentError::CannotHandleTask { task_type: spec.task_type.clone() }));
                    continue;
                }

                state.write().active_tasks.insert(
                    task_id,
                    ActiveTask { task_id, task_type: spec.task_type.clone(), started_at: chrono::Utc::now() },
                );
                state.write().status = AgentStatus::Busy;
                let _ = event_emitter.emit(Event::task_started(agent_id.clone(), task_id));

                let ctx = AgentContext::new(agent_id.clone(), session_id.clone(), task_id, Arc::clone(&event_emitter));
                let result = agent.execute_task(spec, ctx).await;

                match &result {
                    Ok(_) => {
                        let _ = event_emitter.emit(Event::task_completed(agent_id.clone(), task_id));
                    }
                    Err(AgentError::Cancelled) => {
                        let _ = event_emitter.emit(Event::task_cancelled(agent_id.clone(), task_id));
                    }
                    Err(err) => {
                        let _ = event_emitter.emit(Event::task_failed(agent_id.clone(), task_id, err.to_string()));
                    }
                }

                let fatal = result.as_ref().err().is_some_and(|e| agent.is_fatal(e));
                {
                    let mut guard = state.write();
                    guard.active_tasks.remove(&task_id);
                    guard.status = if guard.active_tasks.is_empty() { AgentStatus::Ready } else { AgentStatus::Busy };
                }
                let _ = reply_to.send(result);

                if fatal {
                    warn!(%agent_id, task_id, "fatal task error, terminating agent");
                    break;
                }
            }
            AgentMessage::GetStatus { reply_to } => {
                let guard = state.read();
                let report = AgentStatusReport {
                    agent_id: agent_id.clone(),
                    status: guard.status,
                    active_tasks: guard.active_tasks.len(),
                    queue_len: mailbox.len(),
                };
                drop(guard);
                let _ = reply_to.send(report);
            }
            AgentMessage::SendMessage { .. } | AgentMessage::ReceiveMessage { .. } | AgentMessage::Coordination { .. } => {
                // Routing/coordination payloads are opaque to the base runtime;
                // domain-specific agents interpret them in their own
                // `execute_task`-adjacent logic. Nothing to do at this layer.
            }
            AgentMessage::Shutdown { reason } => {
                info!(%agent_id, %reason, "agent actor shutting down");
                break;
            }
        }
    }

    state.write().status = AgentStatus::Terminated;
    let _ = event_emitter.emit(Event::agent_stopped(agent_id.clone(), "stopped"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentInfo;
    use crate::event_bus::EventBus;
    use async_trait::async_trait;
    use rustc_hash::FxHashSet;
    use serde_json::json;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn capabilities(&self) -> FxHashSet<String> {
            ["echo".to_string()].into_iter().collect()
        }

        async fn execute_task(&self, spec: TaskSpec, ctx: AgentContext) -> Result<TaskResult, AgentError> {
            Ok(TaskResult::new(ctx.task_id, spec.args))
        }

        fn info(&self) -> AgentInfo {
            AgentInfo { agent_type: "echo".into(), version: "1.0".into(), description: String::new() }
        }
    }

    #[tokio::test]
    async fn execute_task_round_trips_result_and_clears_active_tasks() {
        let bus = EventBus::default();
        let handle = AgentHandle::spawn(Arc::new(EchoAgent), AgentId::new("a-1"), None, bus.get_emitter());
        let result = handle.execute_task(TaskSpec::new("echo", json!({"x": 1}))).await.unwrap();
        assert_eq!(result.value, json!({"x": 1}));
        assert_eq!(handle.active_task_count(), 0);
        assert_eq!(handle.status(), AgentStatus::Ready);
    }

    #[tokio::test]
    async fn unknown_task_type_is_rejected_without_crashing_actor() {
        let bus = EventBus::default();
        let handle = AgentHandle::spawn(Arc::new(EchoAgent), AgentId::new("a-2"), None, bus.get_emitter());
        let err = handle.execute_task(TaskSpec::new("unknown", json!({}))).await.unwrap_err();
        assert!(matches!(err, AgentError::CannotHandleTask { .. }));
        // Actor is still alive afterwards.
        let status = handle.get_status().await.unwrap();
        assert_eq!(status.active_tasks, 0);
    }
}
