//! The base agent contract (spec §4.6): the trait every worker type
//! implements, the actor wrapper that runs it on its own mailbox, and the
//! context handed to each task execution.
//!
//! Grounded on the teacher's `Node` trait (now removed along with the rest
//! of the graph-execution machinery): a pure, async, fallible contract plus
//! a context object carrying the event emitter so implementers never reach
//! for ambient global state.

pub mod handle;
pub mod supervisor;

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::event_bus::{EventEmitter, EmitterError, Event};
use crate::message::{TaskResult, TaskSpec};
use crate::types::{AgentId, AgentStatus, SessionId, TaskId};

pub use handle::AgentHandle;
pub use supervisor::AgentSupervisor;

/// Per-invocation context handed to [`Agent::execute_task`].
///
/// Mirrors the teacher's `NodeContext`: carries identity, an event emitter,
/// and nothing else — agents reach every ambient concern (capabilities,
/// logging) through this object or their own constructor-injected state, not
/// through globals.
#[derive(Clone)]
pub struct AgentContext {
    pub agent_id: AgentId,
    pub session_id: Option<SessionId>,
    pub task_id: TaskId,
    event_emitter: Arc<dyn EventEmitter>,
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("agent_id", &self.agent_id)
            .field("session_id", &self.session_id)
            .field("task_id", &self.task_id)
            .finish()
    }
}

impl AgentContext {
    #[must_use]
    pub fn new(
        agent_id: AgentId,
        session_id: Option<SessionId>,
        task_id: TaskId,
        event_emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self { agent_id, session_id, task_id, event_emitter }
    }

    pub fn emit(&self, event: Event) -> Result<(), AgentContextError> {
        self.event_emitter.emit(event).map_err(AgentContextError::EventBus)
    }

    pub fn emit_progress(&self, message: impl Into<String>) -> Result<(), AgentContextError> {
        self.emit(Event::task_progress(self.agent_id.clone(), self.task_id, message))
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum AgentContextError {
    #[error("event bus unavailable: {0}")]
    #[diagnostic(code(meshguard::agent::event_bus_unavailable))]
    EventBus(#[from] EmitterError),
}

/// Errors an agent's `execute_task` may return (spec §7, Agent/workflow
/// kinds). A task error stops only the affected task; it never crashes the
/// agent unless the implementer explicitly classifies it as fatal via
/// [`Agent::is_fatal`].
#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error("agent cannot handle task type `{task_type}`")]
    #[diagnostic(code(meshguard::agent::cannot_handle_task))]
    CannotHandleTask { task_type: String },

    #[error("unsupported task type `{0}`")]
    #[diagnostic(code(meshguard::agent::unsupported_task_type))]
    UnsupportedTaskType(String),

    #[error("task execution failed: {message}")]
    #[diagnostic(code(meshguard::agent::task_failed))]
    ExecutionFailed { message: String },

    #[error("task was cancelled")]
    #[diagnostic(code(meshguard::agent::task_cancelled))]
    Cancelled,

    #[error("capability denied: {0}")]
    #[diagnostic(code(meshguard::agent::permission_denied))]
    PermissionDenied(String),

    #[error(transparent)]
    #[diagnostic(code(meshguard::agent::context))]
    Context(#[from] AgentContextError),

    #[error("serialization error: {0}")]
    #[diagnostic(code(meshguard::agent::serde))]
    Serde(#[from] serde_json::Error),
}

/// Static metadata about an agent implementation, returned by `info()`.
#[derive(Clone, Debug, serde::Serialize)]
pub struct AgentInfo {
    pub agent_type: String,
    pub version: String,
    pub description: String,
}

/// The contract every worker type (tool executor, exporter, analyser,
/// researcher, reviewer, …) implements. Domain-specific logic for each agent
/// type is out of scope for this crate (spec §1); only the contract and the
/// runtime that schedules it live here.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Static set of task-type tags this agent declares it can run.
    fn capabilities(&self) -> FxHashSet<String>;

    /// Whether this agent can run the given task. Default: task type is a
    /// member of [`Agent::capabilities`].
    fn can_handle(&self, spec: &TaskSpec) -> bool {
        self.capabilities().contains(&spec.task_type)
    }

    /// Execute one unit of work. Wrapped by the runtime so a returned error
    /// becomes a `TaskFailed` event rather than unwinding the actor, unless
    /// [`Agent::is_fatal`] says otherwise.
    async fn execute_task(&self, spec: TaskSpec, ctx: AgentContext) -> Result<TaskResult, AgentError>;

    /// Static metadata describing this agent implementation.
    fn info(&self) -> AgentInfo;

    /// Whether an error of this execution should crash the agent instead of
    /// being reported as a normal task failure. Default: never fatal.
    fn is_fatal(&self, _error: &AgentError) -> bool {
        false
    }

    /// Restart policy applied by the supervisor when this agent's process
    /// terminates abnormally (spec §4.6).
    fn restart_policy(&self) -> crate::types::RestartPolicy {
        crate::types::RestartPolicy::Temporary
    }
}

/// Runtime snapshot of an agent actor (spec §3, Agent).
#[derive(Clone, Debug)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub agent_type: String,
    pub status: AgentStatus,
    pub session_id: Option<SessionId>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub active_task_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
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
            AgentInfo { agent_type: "echo".into(), version: "1.0".into(), description: "echoes args back".into() }
        }
    }

    #[test]
    fn can_handle_defaults_to_capability_membership() {
        let agent = EchoAgent;
        assert!(agent.can_handle(&TaskSpec::new("echo", json!({}))));
        assert!(!agent.can_handle(&TaskSpec::new("other", json!({}))));
    }
}
