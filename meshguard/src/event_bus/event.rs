use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AgentId, NodeId, SessionId, WorkflowId};

/// Lifecycle and coordination events published on the bus (spec §4.6, §5,
/// §9). Every variant carries the pub/sub topic it belongs to so sinks and
/// subscribers can filter without parsing strings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Event {
    Agent(AgentEvent),
    Session(SessionEvent),
    Cluster(ClusterEvent),
    Security(SecurityEvent),
}

impl Event {
    #[must_use]
    pub fn agent_started(agent_id: impl Into<AgentId>) -> Self {
        Event::Agent(AgentEvent::new(agent_id.into(), AgentEventKind::Started))
    }

    #[must_use]
    pub fn task_started(agent_id: impl Into<AgentId>, task_id: u64) -> Self {
        Event::Agent(AgentEvent::new(agent_id.into(), AgentEventKind::TaskStarted { task_id }))
    }

    #[must_use]
    pub fn task_progress(agent_id: impl Into<AgentId>, task_id: u64, message: impl Into<String>) -> Self {
        Event::Agent(AgentEvent::new(
            agent_id.into(),
            AgentEventKind::TaskProgress { task_id, message: message.into() },
        ))
    }

    #[must_use]
    pub fn task_completed(agent_id: impl Into<AgentId>, task_id: u64) -> Self {
        Event::Agent(AgentEvent::new(agent_id.into(), AgentEventKind::TaskCompleted { task_id }))
    }

    #[must_use]
    pub fn task_failed(agent_id: impl Into<AgentId>, task_id: u64, error: impl Into<String>) -> Self {
        Event::Agent(AgentEvent::new(
            agent_id.into(),
            AgentEventKind::TaskFailed { task_id, error: error.into() },
        ))
    }

    #[must_use]
    pub fn task_cancelled(agent_id: impl Into<AgentId>, task_id: u64) -> Self {
        Event::Agent(AgentEvent::new(agent_id.into(), AgentEventKind::TaskCancelled { task_id }))
    }

    #[must_use]
    pub fn agent_stopped(agent_id: impl Into<AgentId>, reason: impl Into<String>) -> Self {
        Event::Agent(AgentEvent::new(agent_id.into(), AgentEventKind::Stopped { reason: reason.into() }))
    }

    /// The pub/sub topic this event is logically published on (spec §5).
    #[must_use]
    pub fn topic(&self) -> String {
        match self {
            Event::Agent(e) => format!("agent:{}", e.agent_id),
            Event::Session(e) => format!("session:{}", e.session_id),
            Event::Cluster(_) => "system:maintenance".to_string(),
            Event::Security(e) => e.topic.clone(),
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Event::Agent(e) => e.kind.message(),
            Event::Session(e) => e.kind.message(),
            Event::Cluster(e) => e.kind.message(),
            Event::Security(e) => e.message.clone(),
        }
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::json!({
            "topic": self.topic(),
            "message": self.message(),
            "timestamp": Utc::now().to_rfc3339(),
            "payload": self,
        })
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_json_value())
    }

    /// Retained for sinks that group rendered lines by a label (mirrors the
    /// teacher's `scope_label`).
    #[must_use]
    pub fn scope_label(&self) -> Option<String> {
        Some(self.topic())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.topic(), self.message())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentEvent {
    pub agent_id: AgentId,
    pub kind: AgentEventKind,
    pub timestamp: DateTime<Utc>,
}

impl AgentEvent {
    #[must_use]
    pub fn new(agent_id: AgentId, kind: AgentEventKind) -> Self {
        Self { agent_id, kind, timestamp: Utc::now() }
    }
}

/// Typed lifecycle transitions every agent publishes (spec §4.6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEventKind {
    Started,
    TaskStarted { task_id: u64 },
    TaskProgress { task_id: u64, message: String },
    TaskCompleted { task_id: u64 },
    TaskFailed { task_id: u64, error: String },
    TaskCancelled { task_id: u64 },
    Stopped { reason: String },
}

impl AgentEventKind {
    fn message(&self) -> String {
        match self {
            AgentEventKind::Started => "agent started".to_string(),
            AgentEventKind::TaskStarted { task_id } => format!("task {task_id} started"),
            AgentEventKind::TaskProgress { task_id, message } => format!("task {task_id}: {message}"),
            AgentEventKind::TaskCompleted { task_id } => format!("task {task_id} completed"),
            AgentEventKind::TaskFailed { task_id, error } => format!("task {task_id} failed: {error}"),
            AgentEventKind::TaskCancelled { task_id } => format!("task {task_id} cancelled"),
            AgentEventKind::Stopped { reason } => format!("agent stopped: {reason}"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub kind: SessionEventKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEventKind {
    Created,
    MessageAdded,
    SubagentSpawned { agent_id: AgentId },
    SubagentTerminated { agent_id: AgentId, cause: String },
    Closed,
}

impl SessionEventKind {
    fn message(&self) -> String {
        match self {
            SessionEventKind::Created => "session created".to_string(),
            SessionEventKind::MessageAdded => "message added".to_string(),
            SessionEventKind::SubagentSpawned { agent_id } => format!("subagent {agent_id} spawned"),
            SessionEventKind::SubagentTerminated { agent_id, cause } => {
                format!("subagent {agent_id} terminated: {cause}")
            }
            SessionEventKind::Closed => "session closed".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterEvent {
    pub node_id: NodeId,
    pub kind: ClusterEventKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClusterEventKind {
    Joined,
    Left,
    HeartbeatMissed,
    RebalanceMoved { agent_id: AgentId, target_node: NodeId },
}

impl ClusterEventKind {
    fn message(&self) -> String {
        match self {
            ClusterEventKind::Joined => "node joined".to_string(),
            ClusterEventKind::Left => "node left".to_string(),
            ClusterEventKind::HeartbeatMissed => "heartbeat missed".to_string(),
            ClusterEventKind::RebalanceMoved { agent_id, target_node } => {
                format!("moved {agent_id} to {target_node}")
            }
        }
    }
}

/// Security-domain events re-published on the orchestration bus (alerts,
/// revocations) so agent-side subscribers don't need a direct dependency on
/// `meshguard-security`'s internal types.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub topic: String,
    pub message: String,
    pub details: Value,
}

impl SecurityEvent {
    #[must_use]
    pub fn alert(message: impl Into<String>, details: Value) -> Self {
        Self { topic: "security:alerts".to_string(), message: message.into(), details }
    }

    #[must_use]
    pub fn revocation(jti: impl Into<String>) -> Self {
        Self {
            topic: "security:revocations".to_string(),
            message: "capability revoked".to_string(),
            details: serde_json::json!({ "jti": jti.into() }),
        }
    }
}

#[allow(dead_code)]
fn workflow_scope(workflow_id: &WorkflowId) -> String {
    format!("workflow:{workflow_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_event_topic_is_per_agent() {
        let event = Event::task_completed(AgentId::new("a-1"), 5);
        assert_eq!(event.topic(), "agent:a-1");
        assert!(event.message().contains('5'));
    }

    #[test]
    fn json_round_trip_preserves_topic() {
        let event = Event::agent_started(AgentId::new("a-2"));
        let json = event.to_json_value();
        assert_eq!(json["topic"], "agent:a-2");
    }
}
