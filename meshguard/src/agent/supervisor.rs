//! Restart-policy enforcement for agent actors (spec §4.6, closing
//! paragraph): temporary agents are left dead after a failure, permanent
//! agents are respawned from the same factory until the owning session ends
//! or the supervisor is told to stop watching them.
//!
//! The teacher has no direct analogue to a supervisor; this follows its
//! concurrency discipline instead — state behind `parking_lot`, never held
//! across an `.await`, and a single background task per watched agent rather
//! than a shared poll loop.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{info, warn};

use super::{Agent, AgentHandle};
use crate::event_bus::EventEmitter;
use crate::types::{AgentId, RestartPolicy, SessionId};

type AgentFactory = Arc<dyn Fn() -> Arc<dyn Agent> + Send + Sync>;

struct Supervised {
    factory: AgentFactory,
    policy: RestartPolicy,
    session_id: Option<SessionId>,
    handle: AgentHandle,
    restart_count: u32,
}

/// Watches a set of agent actors and respawns `Permanent` ones from their
/// original factory when the actor's mailbox loop exits abnormally.
///
/// Cloning shares the same watch table; typically one supervisor is owned by
/// the [`crate::runtime::Orchestrator`] per agent pool.
#[derive(Clone)]
pub struct AgentSupervisor {
    event_emitter: Arc<dyn EventEmitter>,
    agents: Arc<Mutex<FxHashMap<AgentId, Supervised>>>,
}

impl AgentSupervisor {
    #[must_use]
    pub fn new(event_emitter: Arc<dyn EventEmitter>) -> Self {
        Self { event_emitter, agents: Arc::new(Mutex::new(FxHashMap::default())) }
    }

    /// Spawn `factory()` under supervision and start watching it for
    /// termination. `factory` must be cheap and must produce functionally
    /// equivalent agents on every call, since it is invoked again on every
    /// restart.
    pub fn spawn(
        &self,
        agent_id: AgentId,
        session_id: Option<SessionId>,
        policy: RestartPolicy,
        factory: impl Fn() -> Arc<dyn Agent> + Send + Sync + 'static,
    ) -> AgentHandle {
        let factory: AgentFactory = Arc::new(factory);
        let handle = AgentHandle::spawn(factory(), agent_id.clone(), session_id.clone(), Arc::clone(&self.event_emitter));

        self.agents.lock().insert(
            agent_id.clone(),
            Supervised { factory, policy, session_id, handle: handle.clone(), restart_count: 0 },
        );
        self.watch(agent_id);
        handle
    }

    /// Current handle for a supervised agent, reflecting the latest restart
    /// if one has occurred.
    #[must_use]
    pub fn handle(&self, agent_id: &AgentId) -> Option<AgentHandle> {
        self.agents.lock().get(agent_id).map(|s| s.handle.clone())
    }

    #[must_use]
    pub fn restart_count(&self, agent_id: &AgentId) -> u32 {
        self.agents.lock().get(agent_id).map_or(0, |s| s.restart_count)
    }

    /// Stop supervising an agent: no further restarts happen after its
    /// current actor terminates. Used when a session ends, per spec §4.6's
    /// "permanent until the session ends".
    pub fn forget(&self, agent_id: &AgentId) {
        self.agents.lock().remove(agent_id);
    }

    fn watch(&self, agent_id: AgentId) {
        let agents = Arc::clone(&self.agents);
        let event_emitter = Arc::clone(&self.event_emitter);

        tokio::spawn(async move {
            loop {
                let handle = match agents.lock().get(&agent_id).map(|s| s.handle.clone()) {
                    Some(h) => h,
                    None => return,
                };
                handle.wait_for_termination().await;

                let (factory, policy, session_id) = {
                    let guard = agents.lock();
                    match guard.get(&agent_id) {
                        Some(s) => (Arc::clone(&s.factory), s.policy, s.session_id.clone()),
                        None => return,
                    }
                };

                if matches!(policy, RestartPolicy::Temporary) {
                    info!(%agent_id, "temporary agent terminated, not restarting");
                    agents.lock().remove(&agent_id);
                    return;
                }

                warn!(%agent_id, "permanent agent terminated, restarting");
                let new_handle =
                    AgentHandle::spawn(factory(), agent_id.clone(), session_id, Arc::clone(&event_emitter));

                let mut guard = agents.lock();
                match guard.get_mut(&agent_id) {
                    Some(s) => {
                        s.handle = new_handle;
                        s.restart_count += 1;
                    }
                    None => return,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentContext, AgentContextError, AgentError, AgentInfo};
    use crate::event_bus::EventBus;
    use crate::message::{TaskResult, TaskSpec};
    use async_trait::async_trait;
    use rustc_hash::FxHashSet;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakyAgent {
        fail_once: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Agent for FlakyAgent {
        fn capabilities(&self) -> FxHashSet<String> {
            ["work".to_string()].into_iter().collect()
        }

        async fn execute_task(&self, spec: TaskSpec, ctx: AgentContext) -> Result<TaskResult, AgentError> {
            if self.fail_once.swap(false, Ordering::SeqCst) {
                return Err(AgentError::ExecutionFailed { message: "boom".into() });
            }
            Ok(TaskResult::new(ctx.task_id, spec.args))
        }

        fn info(&self) -> AgentInfo {
            AgentInfo { agent_type: "flaky".into(), version: "1.0".into(), description: String::new() }
        }

        fn is_fatal(&self, _error: &AgentError) -> bool {
            true
        }

        fn restart_policy(&self) -> RestartPolicy {
            RestartPolicy::Permanent
        }
    }

    #[tokio::test]
    async fn permanent_agent_is_respawned_after_fatal_failure() {
        let bus = EventBus::default();
        let supervisor = AgentSupervisor::new(bus.get_emitter());
        let fail_once = Arc::new(AtomicBool::new(true));

        let agent_id = AgentId::new("flaky-1");
        let factory_flag = Arc::clone(&fail_once);
        let handle = supervisor.spawn(agent_id.clone(), None, RestartPolicy::Permanent, move || {
            Arc::new(FlakyAgent { fail_once: Arc::clone(&factory_flag) }) as Arc<dyn Agent>
        });

        let err = handle.execute_task(TaskSpec::new("work", json!({}))).await;
        assert!(err.is_err());

        for _ in 0..50 {
            if supervisor.restart_count(&agent_id) > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(supervisor.restart_count(&agent_id), 1);

        let fresh = supervisor.handle(&agent_id).unwrap();
        let result = fresh.execute_task(TaskSpec::new("work", json!({"ok": true}))).await.unwrap();
        assert_eq!(result.value, json!({"ok": true}));
    }

    #[allow(dead_code)]
    fn assert_context_error_is_send(_e: AgentContextError) {}
}
