//! Shared domain identifiers and small enums used across the orchestration
//! core: agent/session/workflow/node identity, lifecycle status, restart
//! policy, and the discovery/placement strategy tags selected at startup.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for an agent actor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

/// Unique identifier for a session (a logical conversation).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

/// Unique identifier for a workflow run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

/// Unique identifier for a cluster node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

/// Monotonic per-agent task identifier.
pub type TaskId = u64;

macro_rules! string_id {
    ($ty:ident) => {
        impl $ty {
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $ty {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $ty {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(AgentId);
string_id!(SessionId);
string_id!(WorkflowId);
string_id!(NodeId);

/// Lifecycle status of an agent actor (spec §3, Agent).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Initialising,
    Ready,
    Busy,
    Terminated,
}

impl AgentStatus {
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            AgentStatus::Initialising => "initialising",
            AgentStatus::Ready => "ready",
            AgentStatus::Busy => "busy",
            AgentStatus::Terminated => "terminated",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentStatus::Terminated)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl From<&str> for AgentStatus {
    fn from(s: &str) -> Self {
        match s {
            "ready" => AgentStatus::Ready,
            "busy" => AgentStatus::Busy,
            "terminated" => AgentStatus::Terminated,
            _ => AgentStatus::Initialising,
        }
    }
}

/// Restart policy applied by the agent supervisor (spec §4.6).
///
/// One-shot agents (tool executors, exporters, analysers) are `Temporary`;
/// long-lived agents (coder, tester, reviewer, researcher) are `Permanent`
/// until the owning session ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    Temporary,
    Permanent,
}

/// Status of a workflow run (spec §3, Workflow).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Node health as tracked by the Cluster Manager (spec §4.10).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeHealth {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Task priority; affects `find_best_agent_for_task` scoring (spec §4.9).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Cluster membership discovery strategy, selected at init (spec §4.10).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStrategy {
    Static,
    Multicast,
    Kubernetes,
}

impl fmt::Display for DiscoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiscoveryStrategy::Static => "static",
            DiscoveryStrategy::Multicast => "multicast",
            DiscoveryStrategy::Kubernetes => "kubernetes",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DiscoveryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(DiscoveryStrategy::Static),
            "multicast" => Ok(DiscoveryStrategy::Multicast),
            "kubernetes" => Ok(DiscoveryStrategy::Kubernetes),
            other => Err(format!("unknown cluster discovery strategy: {other}")),
        }
    }
}

/// Load balancer placement strategy (spec §4.11).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    LeastLoaded,
    CapabilityAware,
    RoundRobin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_status_round_trips_through_encode() {
        for status in [AgentStatus::Initialising, AgentStatus::Ready, AgentStatus::Busy, AgentStatus::Terminated] {
            let encoded = status.encode();
            assert_eq!(AgentStatus::from(encoded), status);
        }
    }

    #[test]
    fn discovery_strategy_parses_known_values() {
        assert_eq!("static".parse::<DiscoveryStrategy>().unwrap(), DiscoveryStrategy::Static);
        assert!("gossip".parse::<DiscoveryStrategy>().is_err());
    }

    #[test]
    fn ids_display_as_their_inner_string() {
        let id = AgentId::new("agent-7");
        assert_eq!(id.to_string(), "agent-7");
        assert_eq!(id.as_str(), "agent-7");
    }
}
