//! Cluster Manager (spec §4.10): tracks cluster membership and per-node
//! health via heartbeats, with three selectable discovery strategies (only
//! `static` is a full implementation; `multicast`/`kubernetes` are stubs per
//! spec §4.10). [`supervisor::DistributedSupervisor`] performs the actual
//! cross-node agent moves a [`load_balancer::LoadBalancer`] rebalance plans
//! (spec §4.9).

pub mod load_balancer;
pub mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::event_bus::{ClusterEvent, ClusterEventKind, EventEmitter};
use crate::types::{DiscoveryStrategy, NodeHealth, NodeId};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(15);

/// Payload broadcast on every heartbeat tick (spec §4.10).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Heartbeat {
    pub node_id: NodeId,
    pub status: NodeHealth,
    pub agent_count: usize,
    pub memory_kb: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

struct NodeState {
    status: NodeHealth,
    last_heartbeat: chrono::DateTime<chrono::Utc>,
    agent_count: usize,
}

/// Membership and health tracking, independent of placement logic (which
/// lives in [`load_balancer`]).
#[derive(Clone)]
pub struct ClusterManager {
    local_node_id: NodeId,
    strategy: DiscoveryStrategy,
    node_timeout: Duration,
    nodes: Arc<RwLock<FxHashMap<NodeId, NodeState>>>,
    event_emitter: Arc<dyn EventEmitter>,
}

impl ClusterManager {
    #[must_use]
    pub fn new(local_node_id: NodeId, strategy: DiscoveryStrategy, event_emitter: Arc<dyn EventEmitter>) -> Self {
        let nodes = Arc::new(RwLock::new(FxHashMap::default()));
        nodes.write().insert(
            local_node_id.clone(),
            NodeState { status: NodeHealth::Healthy, last_heartbeat: chrono::Utc::now(), agent_count: 0 },
        );
        Self { local_node_id, strategy, node_timeout: DEFAULT_NODE_TIMEOUT, nodes, event_emitter }
    }

    #[must_use]
    pub fn strategy(&self) -> DiscoveryStrategy {
        self.strategy
    }

    /// Seed the member list for the `static` discovery strategy (spec
    /// §4.10: "configured list"). `multicast`/`kubernetes` discovery is out
    /// of scope for the default build and is a documented no-op here.
    pub fn join_static_members(&self, members: impl IntoIterator<Item = NodeId>) {
        if self.strategy != DiscoveryStrategy::Static {
            return;
        }
        let mut guard = self.nodes.write();
        for node_id in members {
            guard.entry(node_id.clone()).or_insert_with(|| NodeState {
                status: NodeHealth::Unknown,
                last_heartbeat: chrono::Utc::now(),
                agent_count: 0,
            });
            let _ = self.event_emitter.emit(crate::event_bus::Event::Cluster(ClusterEvent {
                node_id,
                kind: ClusterEventKind::Joined,
            }));
        }
    }

    pub fn record_heartbeat(&self, heartbeat: Heartbeat) {
        let mut guard = self.nodes.write();
        guard.insert(
            heartbeat.node_id,
            NodeState {
                status: heartbeat.status,
                last_heartbeat: heartbeat.timestamp,
                agent_count: heartbeat.agent_count,
            },
        );
    }

    #[must_use]
    pub fn local_heartbeat(&self, agent_count: usize, memory_kb: u64) -> Heartbeat {
        Heartbeat {
            node_id: self.local_node_id.clone(),
            status: NodeHealth::Healthy,
            agent_count,
            memory_kb,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Mark any node whose last heartbeat is older than `node_timeout` as
    /// unhealthy. Intended to run on the same tick cadence as the
    /// heartbeat sender.
    pub fn sweep_stale_nodes(&self) {
        let now = chrono::Utc::now();
        let mut guard = self.nodes.write();
        for (node_id, state) in guard.iter_mut() {
            if state.status == NodeHealth::Unhealthy {
                continue;
            }
            let elapsed = now.signed_duration_since(state.last_heartbeat);
            if elapsed.to_std().unwrap_or_default() > self.node_timeout {
                state.status = NodeHealth::Unhealthy;
                let _ = self.event_emitter.emit(crate::event_bus::Event::Cluster(ClusterEvent {
                    node_id: node_id.clone(),
                    kind: ClusterEventKind::HeartbeatMissed,
                }));
            }
        }
    }

    #[must_use]
    pub fn node_status(&self, node_id: &NodeId) -> Option<NodeHealth> {
        self.nodes.read().get(node_id).map(|s| s.status)
    }

    #[must_use]
    pub fn cluster_nodes(&self) -> Vec<NodeId> {
        self.nodes.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn healthy_node_count(&self) -> usize {
        self.nodes.read().values().filter(|s| s.status == NodeHealth::Healthy).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;

    #[test]
    fn static_join_registers_members_as_unknown_until_first_heartbeat() {
        let bus = EventBus::default();
        let manager = ClusterManager::new(NodeId::new("n-0"), DiscoveryStrategy::Static, bus.get_emitter());
        manager.join_static_members([NodeId::new("n-1"), NodeId::new("n-2")]);
        assert_eq!(manager.node_status(&NodeId::new("n-1")), Some(NodeHealth::Unknown));
        assert_eq!(manager.cluster_nodes().len(), 3);
    }

    #[test]
    fn stale_node_is_marked_unhealthy_after_timeout() {
        let bus = EventBus::default();
        let manager = ClusterManager::new(NodeId::new("n-0"), DiscoveryStrategy::Static, bus.get_emitter());
        manager.record_heartbeat(Heartbeat {
            node_id: NodeId::new("n-1"),
            status: NodeHealth::Healthy,
            agent_count: 3,
            memory_kb: 1024,
            timestamp: chrono::Utc::now() - chrono::Duration::seconds(20),
        });
        manager.sweep_stale_nodes();
        assert_eq!(manager.node_status(&NodeId::new("n-1")), Some(NodeHealth::Unhealthy));
    }
}
