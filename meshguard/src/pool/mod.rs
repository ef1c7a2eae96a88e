//! Bounded-concurrency agent pool (spec §4.8): at most `max_concurrent`
//! workers run at once, excess submissions queue FIFO, and a finished
//! worker's slot is handed to the next queued request.
//!
//! Grounded on the teacher's `schedulers` usage pattern (a typed outcome
//! returned per unit of work, dispatched onto a bounded worker set) and the
//! `agent::handle` actor wrapper for the worker itself.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::info;

use crate::agent::{Agent, AgentError, AgentHandle};
use crate::event_bus::EventEmitter;
use crate::message::{TaskResult, TaskSpec};
use crate::types::{AgentId, SessionId, TaskId};

/// Errors returned to a pool caller (spec §7, Pool kinds).
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker terminated before completing the task")]
    WorkerTerminated,
    #[error("worker crashed: {0}")]
    WorkerCrashed(String),
    #[error("failed to start worker: {0}")]
    FailedToStartWorker(String),
    #[error("queue wait exceeded the configured timeout")]
    QueueTimeout,
    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// One active worker row, for introspection and forced termination (spec
/// §4.8 observability table).
#[derive(Clone, Debug)]
pub struct WorkerRow {
    pub agent_id: AgentId,
    pub session_id: Option<SessionId>,
    pub task_type: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl WorkerRow {
    fn new(handle: &AgentHandle, session_id: &Option<SessionId>, spec: &TaskSpec) -> Self {
        Self {
            agent_id: handle.agent_id.clone(),
            session_id: session_id.clone(),
            task_type: spec.task_type.clone(),
            started_at: chrono::Utc::now(),
        }
    }
}

/// Default per-request bounded wait in the FIFO queue (spec §4.8: "excess
/// requests enter a FIFO queue with per-request bounded wait").
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(30);

struct QueuedRequest {
    id: u64,
    handle: AgentHandle,
    session_id: Option<SessionId>,
    spec: TaskSpec,
    reply_to: oneshot::Sender<Result<TaskResult, PoolError>>,
}

struct PoolState {
    max_concurrent: usize,
    active: FxHashMap<AgentId, WorkerRow>,
    queue: VecDeque<QueuedRequest>,
    completed: u64,
    failed: u64,
    next_queue_id: u64,
    queue_timeout: Duration,
}

/// A bounded pool of agent workers, admitting at most `max_concurrent`
/// concurrently and FIFO-queueing the rest.
#[derive(Clone)]
pub struct AgentPool {
    state: Arc<Mutex<PoolState>>,
    event_emitter: Arc<dyn EventEmitter>,
}

impl AgentPool {
    #[must_use]
    pub fn new(max_concurrent: usize, event_emitter: Arc<dyn EventEmitter>) -> Self {
        Self::with_queue_timeout(max_concurrent, event_emitter, DEFAULT_QUEUE_TIMEOUT)
    }

    #[must_use]
    pub fn with_queue_timeout(max_concurrent: usize, event_emitter: Arc<dyn EventEmitter>, queue_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                max_concurrent,
                active: FxHashMap::default(),
                queue: VecDeque::new(),
                completed: 0,
                failed: 0,
                next_queue_id: 0,
                queue_timeout,
            })),
            event_emitter,
        }
    }

    /// Raise (or lower) the concurrency ceiling and immediately drain the
    /// queue up to the new limit (spec §4.8 `update_config`).
    pub fn update_config(&self, max_concurrent: usize) {
        let mut guard = self.state.lock();
        guard.max_concurrent = max_concurrent;
        self.drain_locked(&mut guard);
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    #[must_use]
    pub fn active_workers(&self) -> Vec<WorkerRow> {
        self.state.lock().active.values().cloned().collect()
    }

    #[must_use]
    pub fn counters(&self) -> (u64, u64) {
        let guard = self.state.lock();
        (guard.completed, guard.failed)
    }

    /// Overwrite the live completed/failed counters from a recovered
    /// snapshot (spec §4.15, `agents` component). Active and queued work
    /// is not restorable — only the aggregate counters survive a crash.
    pub fn restore_counters(&self, completed: u64, failed: u64) {
        let mut guard = self.state.lock();
        guard.completed = completed;
        guard.failed = failed;
    }

    /// Submit a task to run on `handle`. Admits immediately if under the
    /// concurrency ceiling, otherwise queues FIFO until a slot frees or
    /// `queue_timeout` elapses, whichever comes first (spec §4.8 Scenario
    /// S3 and its bounded-wait invariant).
    pub async fn submit(
        &self,
        handle: AgentHandle,
        session_id: Option<SessionId>,
        spec: TaskSpec,
    ) -> Result<TaskResult, PoolError> {
        let (reply_to, reply_rx) = oneshot::channel();
        let queue_timeout;
        let admitted;
        let mut queue_id = 0u64;
        {
            let mut guard = self.state.lock();
            queue_timeout = guard.queue_timeout;
            if guard.active.len() < guard.max_concurrent {
                guard.active.insert(handle.agent_id.clone(), WorkerRow::new(&handle, &session_id, &spec));
                admitted = true;
            } else {
                let queue_len = guard.queue.len() + 1;
                info!(agent_id = %handle.agent_id, queue_len, "task queued, pool at capacity");
                queue_id = guard.next_queue_id;
                guard.next_queue_id += 1;
                guard.queue.push_back(QueuedRequest {
                    id: queue_id,
                    handle: handle.clone(),
                    session_id,
                    spec: spec.clone(),
                    reply_to,
                });
                admitted = false;
            }
        }

        if admitted {
            self.run_and_settle(handle, spec, reply_to).await;
            return reply_rx.await.unwrap_or(Err(PoolError::WorkerTerminated));
        }

        match tokio::time::timeout(queue_timeout, reply_rx).await {
            Ok(result) => result.unwrap_or(Err(PoolError::WorkerTerminated)),
            Err(_) => {
                self.state.lock().queue.retain(|r| r.id != queue_id);
                Err(PoolError::QueueTimeout)
            }
        }
    }

    /// Run one admitted request to completion, then release its slot and
    /// start the next queued request (if any). A request whose agent
    /// terminated while it sat in the queue never reaches
    /// `execute_task`; it fails with `FailedToStartWorker` instead.
    async fn run_and_settle(&self, handle: AgentHandle, spec: TaskSpec, reply_to: oneshot::Sender<Result<TaskResult, PoolError>>) {
        let agent_id = handle.agent_id.clone();
        let result = if handle.status().is_terminal() {
            Err(PoolError::FailedToStartWorker(format!("agent {agent_id} terminated before its queued task could start")))
        } else {
            handle.execute_task(spec).await.map_err(PoolError::from)
        };

        let next = {
            let mut guard = self.state.lock();
            guard.active.remove(&agent_id);
            match &result {
                Ok(_) => guard.completed += 1,
                Err(_) => guard.failed += 1,
            }
            self.try_dequeue_locked(&mut guard)
        };

        let _ = reply_to.send(clone_pool_result(&result));

        if let Some((next_handle, next_spec, next_reply)) = next {
            Box::pin(self.run_and_settle(next_handle, next_spec, next_reply)).await;
        }
    }

    /// Pop the next queued request (if the ceiling allows it) and reserve
    /// its slot, returning it for the caller to actually run. Must be
    /// called with `self.state` locked.
    fn try_dequeue_locked(&self, guard: &mut PoolState) -> Option<(AgentHandle, TaskSpec, oneshot::Sender<Result<TaskResult, PoolError>>)> {
        if guard.active.len() >= guard.max_concurrent {
            return None;
        }
        let req = guard.queue.pop_front()?;
        guard.active.insert(req.handle.agent_id.clone(), WorkerRow::new(&req.handle, &req.session_id, &req.spec));
        Some((req.handle, req.spec, req.reply_to))
    }

    fn drain_locked(&self, guard: &mut PoolState) {
        while let Some((handle, spec, reply_to)) = self.try_dequeue_locked(guard) {
            let pool = self.clone();
            tokio::spawn(async move { pool.run_and_settle(handle, spec, reply_to).await });
        }
    }

    /// Forcibly remove a worker row, as if the underlying agent crashed.
    /// The pool's caller is responsible for actually terminating the actor.
    pub fn mark_worker_crashed(&self, agent_id: &AgentId) {
        let mut guard = self.state.lock();
        if guard.active.remove(agent_id).is_some() {
            guard.failed += 1;
            self.drain_locked(&mut guard);
        }
    }
}

fn clone_pool_result(result: &Result<TaskResult, PoolError>) -> Result<TaskResult, PoolError> {
    match result {
        Ok(r) => Ok(r.clone()),
        Err(e) => Err(match e {
            PoolError::WorkerTerminated => PoolError::WorkerTerminated,
            PoolError::WorkerCrashed(m) => PoolError::WorkerCrashed(m.clone()),
            PoolError::FailedToStartWorker(m) => PoolError::FailedToStartWorker(m.clone()),
            PoolError::QueueTimeout => PoolError::QueueTimeout,
            PoolError::Agent(_) => PoolError::WorkerCrashed("agent error".to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentContext, AgentInfo};
    use crate::event_bus::EventBus;
    use async_trait::async_trait;
    use rustc_hash::FxHashSet;
    use serde_json::json;
    use tokio::sync::Notify;

    struct SlowAgent {
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Agent for SlowAgent {
        fn capabilities(&self) -> FxHashSet<String> {
            ["analyse".to_string()].into_iter().collect()
        }

        async fn execute_task(&self, spec: TaskSpec, ctx: AgentContext) -> Result<TaskResult, AgentError> {
            self.release.notified().await;
            Ok(TaskResult::new(ctx.task_id, spec.args))
        }

        fn info(&self) -> AgentInfo {
            AgentInfo { agent_type: "slow".into(), version: "1.0".into(), description: String::new() }
        }
    }

    #[tokio::test]
    async fn pool_admits_up_to_max_concurrent_and_queues_the_rest() {
        let bus = EventBus::default();
        let pool = AgentPool::new(2, bus.get_emitter());
        let release = Arc::new(Notify::new());

        let make_handle = |id: &str| {
            AgentHandle::spawn(
                Arc::new(SlowAgent { release: Arc::clone(&release) }),
                AgentId::new(id),
                None,
                bus.get_emitter(),
            )
        };

        let h1 = make_handle("t1");
        let h2 = make_handle("t2");

        let pool1 = pool.clone();
        let fut1 = tokio::spawn(async move { pool1.submit(h1, None, TaskSpec::new("analyse", json!({}))).await });
        let pool2 = pool.clone();
        let fut2 = tokio::spawn(async move { pool2.submit(h2, None, TaskSpec::new("analyse", json!({}))).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(pool.active_count(), 2);

        release.notify_waiters();
        let (r1, r2) = tokio::join!(fut1, fut2);
        assert!(r1.unwrap().is_ok());
        assert!(r2.unwrap().is_ok());
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.counters(), (2, 0));
    }

    #[tokio::test]
    async fn queued_request_times_out_when_the_wait_exceeds_the_bound() {
        let bus = EventBus::default();
        let pool = AgentPool::with_queue_timeout(1, bus.get_emitter(), std::time::Duration::from_millis(20));
        let release = Arc::new(Notify::new());

        let h1 = AgentHandle::spawn(Arc::new(SlowAgent { release: Arc::clone(&release) }), AgentId::new("t1"), None, bus.get_emitter());
        let h2 = AgentHandle::spawn(Arc::new(SlowAgent { release: Arc::clone(&release) }), AgentId::new("t2"), None, bus.get_emitter());

        let pool1 = pool.clone();
        let fut1 = tokio::spawn(async move { pool1.submit(h1, None, TaskSpec::new("analyse", json!({}))).await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let err = pool.submit(h2, None, TaskSpec::new("analyse", json!({}))).await.unwrap_err();
        assert!(matches!(err, PoolError::QueueTimeout));
        assert_eq!(pool.queue_len(), 0);

        release.notify_waiters();
        let _ = fut1.await;
    }

    #[tokio::test]
    async fn dequeued_request_fails_with_failed_to_start_worker_if_its_agent_already_terminated() {
        let bus = EventBus::default();
        let pool = AgentPool::new(1, bus.get_emitter());
        let release = Arc::new(Notify::new());

        let h1 = AgentHandle::spawn(Arc::new(SlowAgent { release: Arc::clone(&release) }), AgentId::new("t1"), None, bus.get_emitter());
        let h2 = AgentHandle::spawn(Arc::new(SlowAgent { release: Arc::clone(&release) }), AgentId::new("t2"), None, bus.get_emitter());

        let pool1 = pool.clone();
        let fut1 = tokio::spawn(async move { pool1.submit(h1, None, TaskSpec::new("analyse", json!({}))).await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        h2.shutdown("terminating before it gets its turn").await;
        h2.wait_for_termination().await;

        let pool2 = pool.clone();
        let fut2 = tokio::spawn(async move { pool2.submit(h2, None, TaskSpec::new("analyse", json!({}))).await });

        release.notify_waiters();
        let (r1, r2) = tokio::join!(fut1, fut2);
        assert!(r1.unwrap().is_ok());
        assert!(matches!(r2.unwrap(), Err(PoolError::FailedToStartWorker(_))));
    }

    #[test]
    fn restore_counters_overwrites_completed_and_failed() {
        let bus = EventBus::default();
        let pool = AgentPool::new(4, bus.get_emitter());
        pool.restore_counters(10, 3);
        assert_eq!(pool.counters(), (10, 3));
    }
}
