//! Task specifications, results, and the inbound message contract every
//! agent actor's mailbox accepts (spec §4.6, §3 Task Specification).

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::agent::AgentError;
use crate::types::{AgentId, TaskId};

/// A request to perform work, handed to an agent via `execute_task`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Task type tag; must be handled by at least one reachable agent.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Opaque task arguments, interpreted only by the executing agent.
    pub args: Value,
    /// Capability tags required of any agent that may run this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_capabilities: Option<FxHashSet<String>>,
    /// Prior workflow step ids this task depends on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<usize>>,
}

impl TaskSpec {
    #[must_use]
    pub fn new(task_type: impl Into<String>, args: Value) -> Self {
        Self {
            task_type: task_type.into(),
            args,
            required_capabilities: None,
            dependencies: None,
        }
    }

    #[must_use]
    pub fn with_required_capabilities(mut self, caps: FxHashSet<String>) -> Self {
        self.required_capabilities = Some(caps);
        self
    }

    #[must_use]
    pub fn with_dependencies(mut self, deps: Vec<usize>) -> Self {
        self.dependencies = Some(deps);
        self
    }
}

/// The outcome of `execute_task`, returned to the caller and stored at the
/// workflow step index that produced it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub value: Value,
}

impl TaskResult {
    #[must_use]
    pub fn new(task_id: TaskId, value: Value) -> Self {
        Self { task_id, value }
    }
}

/// Status snapshot returned by `get_status`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentStatusReport {
    pub agent_id: AgentId,
    pub status: crate::types::AgentStatus,
    pub active_tasks: usize,
    pub queue_len: usize,
}

/// Inbound messages accepted by an agent actor's mailbox (spec §4.6).
///
/// Every variant that expects a reply carries a `oneshot::Sender`; the
/// actor answers exactly once and then drops the sender.
pub enum AgentMessage {
    ExecuteTask {
        task_id: TaskId,
        spec: TaskSpec,
        reply_to: oneshot::Sender<Result<TaskResult, AgentError>>,
    },
    GetStatus {
        reply_to: oneshot::Sender<AgentStatusReport>,
    },
    SendMessage {
        target_agent: AgentId,
        payload: Value,
    },
    ReceiveMessage {
        from: AgentId,
        payload: Value,
    },
    Coordination {
        payload: Value,
    },
    Shutdown {
        reason: String,
    },
}

impl std::fmt::Debug for AgentMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentMessage::ExecuteTask { task_id, spec, .. } => {
                f.debug_struct("ExecuteTask").field("task_id", task_id).field("task_type", &spec.task_type).finish()
            }
            AgentMessage::GetStatus { .. } => f.write_str("GetStatus"),
            AgentMessage::SendMessage { target_agent, .. } => {
                f.debug_struct("SendMessage").field("target_agent", target_agent).finish()
            }
            AgentMessage::ReceiveMessage { from, .. } => {
                f.debug_struct("ReceiveMessage").field("from", from).finish()
            }
            AgentMessage::Coordination { .. } => f.write_str("Coordination"),
            AgentMessage::Shutdown { reason } => f.debug_struct("Shutdown").field("reason", reason).finish(),
        }
    }
}
