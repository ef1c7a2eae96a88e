//! Distributed Supervisor (spec §4.9, closing paragraph): starts, stops, and
//! enumerates agents across every cluster node, and executes the moves a
//! rebalance calls for.
//!
//! There is no real network transport in this crate (nodes are simulated
//! in-process the same way [`super::ClusterManager`] simulates heartbeats
//! across `NodeId`s), so "start it on the target node" means respawning the
//! agent locally under a fresh [`AgentHandle`] and re-registering it in the
//! [`DistributedRegistry`] under the target `NodeId`. The snapshot →
//! terminate → restart → confirm sequence the spec describes is still
//! performed in full; only the transport is simulated. Agent reconstruction
//! itself is delegated to a caller-supplied factory, since building a
//! concrete `Agent` is domain-specific and out of this crate's scope (spec
//! §1), the same way [`crate::agent::AgentSupervisor::spawn`] already
//! requires one.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;

use super::load_balancer::LoadBalancer;
use crate::agent::{Agent, AgentHandle, AgentSupervisor};
use crate::registry::DistributedRegistry;
use crate::types::{AgentId, AgentStatus, NodeId, RestartPolicy, SessionId};

/// A factory that rebuilds an agent on its target node from the state
/// captured before migration.
pub type RestartFactory = Arc<dyn Fn(&MigrationSnapshot) -> Arc<dyn Agent> + Send + Sync>;

/// Captured agent state handed to the target node's restart factory (spec
/// §4.9: "request a migration snapshot from the agent").
#[derive(Clone, Debug)]
pub struct MigrationSnapshot {
    pub agent_id: AgentId,
    pub agent_type: String,
    pub session_id: Option<SessionId>,
    pub status: AgentStatus,
    pub active_task_count: usize,
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("agent `{0}` is not supervised locally")]
    UnknownAgent(AgentId),
    #[error("agent `{0}` has no registry entry to migrate")]
    NotRegistered(AgentId),
}

/// One planned move: relocate `agent_id` from `from` to `to` (spec §4.9).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedMove {
    pub agent_id: AgentId,
    pub from: NodeId,
    pub to: NodeId,
}

/// Starts, stops, and enumerates agents across every cluster node, and
/// performs the moves a rebalance calls for.
#[derive(Clone)]
pub struct DistributedSupervisor {
    registry: DistributedRegistry,
    supervisor: AgentSupervisor,
    load_balancer: LoadBalancer,
}

impl DistributedSupervisor {
    #[must_use]
    pub fn new(registry: DistributedRegistry, supervisor: AgentSupervisor, load_balancer: LoadBalancer) -> Self {
        Self { registry, supervisor, load_balancer }
    }

    /// Agents currently registered on `node_id` (spec §4.9: "enumerates
    /// agents across all nodes").
    #[must_use]
    pub fn agents_on(&self, node_id: &NodeId) -> Vec<AgentId> {
        self.registry.list_on_node(node_id)
    }

    /// Compute `target_per_node = total / members` and return the moves
    /// needed to bring every node to within one agent of that target (spec
    /// §4.9).
    #[must_use]
    pub fn plan_rebalance(&self, cluster_nodes: &[NodeId]) -> Vec<PlannedMove> {
        if cluster_nodes.len() < 2 {
            return Vec::new();
        }

        let per_node: FxHashMap<NodeId, Vec<AgentId>> =
            cluster_nodes.iter().map(|n| (n.clone(), self.registry.list_on_node(n))).collect();
        let total: usize = per_node.values().map(Vec::len).sum();
        let target = total / cluster_nodes.len();

        let mut donor_queue: Vec<(AgentId, NodeId)> = Vec::new();
        for (node, agents) in &per_node {
            let excess = agents.len().saturating_sub(target);
            for agent_id in agents.iter().rev().take(excess) {
                donor_queue.push((agent_id.clone(), node.clone()));
            }
        }
        donor_queue.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));

        let mut receiver_capacity: FxHashMap<NodeId, usize> = per_node
            .iter()
            .filter(|(_, a)| a.len() < target)
            .map(|(n, a)| (n.clone(), target - a.len()))
            .collect();
        let mut receivers: Vec<NodeId> = receiver_capacity.keys().cloned().collect();
        receivers.sort();

        let mut moves = Vec::new();
        for (agent_id, from) in donor_queue {
            let Some(to) = receivers.iter().find(|n| receiver_capacity.get(*n).copied().unwrap_or(0) > 0).cloned() else {
                break;
            };
            moves.push(PlannedMove { agent_id, from, to: to.clone() });
            if let Some(cap) = receiver_capacity.get_mut(&to) {
                *cap -= 1;
                if *cap == 0 {
                    receivers.retain(|n| n != &to);
                }
            }
        }
        moves
    }

    /// Perform one planned move: request a migration snapshot from the
    /// agent, terminate it locally, start it on the target node with the
    /// snapshot, and confirm by returning the new handle (spec §4.9's
    /// closing paragraph).
    pub async fn migrate(&self, mv: &PlannedMove, restart: RestartFactory) -> Result<AgentHandle, MigrationError> {
        let handle = self.supervisor.handle(&mv.agent_id).ok_or_else(|| MigrationError::UnknownAgent(mv.agent_id.clone()))?;
        let (_, metadata) =
            self.registry.lookup(&mv.agent_id).ok_or_else(|| MigrationError::NotRegistered(mv.agent_id.clone()))?;

        let snapshot = MigrationSnapshot {
            agent_id: mv.agent_id.clone(),
            agent_type: metadata.agent_type.clone(),
            session_id: handle.session_id.clone(),
            status: handle.status(),
            active_task_count: handle.active_task_count(),
        };

        handle.shutdown("migrating to target node").await;
        handle.wait_for_termination().await;
        self.supervisor.forget(&mv.agent_id);
        self.registry.unregister(&mv.agent_id);

        let new_handle = self.supervisor.spawn(snapshot.agent_id.clone(), snapshot.session_id.clone(), RestartPolicy::Temporary, {
            let snapshot = snapshot.clone();
            move || restart(&snapshot)
        });

        self.registry.register(mv.agent_id.clone(), mv.to.clone(), metadata, 1);
        Ok(new_handle)
    }

    /// Plan and perform every move the current cluster state calls for,
    /// recording a success/failure counter per move on the load balancer
    /// (spec §4.11: "successes/failures are counted"). Returns
    /// `(succeeded, failed)`.
    pub async fn rebalance_cluster(&self, cluster_nodes: &[NodeId], restart: RestartFactory) -> (usize, usize) {
        let moves = self.plan_rebalance(cluster_nodes);
        let mut succeeded = 0;
        let mut failed = 0;
        for mv in &moves {
            match self.migrate(mv, Arc::clone(&restart)).await {
                Ok(_) => {
                    succeeded += 1;
                    self.load_balancer.record_move_result(true);
                }
                Err(err) => {
                    failed += 1;
                    self.load_balancer.record_move_result(false);
                    tracing::warn!(agent_id = %mv.agent_id, error = %err, "rebalance move failed");
                }
            }
        }
        (succeeded, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentContext, AgentError, AgentInfo};
    use crate::event_bus::EventBus;
    use crate::message::{TaskResult, TaskSpec};
    use crate::registry::AgentMetadata;
    use crate::types::PlacementStrategy;
    use async_trait::async_trait;
    use rustc_hash::FxHashSet;

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

    fn meta() -> AgentMetadata {
        AgentMetadata {
            agent_type: "echo".to_string(),
            capabilities: ["echo".to_string()].into_iter().collect(),
            current_load: 0,
            pending_messages: 0,
            specialisation: None,
        }
    }

    #[test]
    fn plan_rebalance_moves_excess_agents_to_the_underloaded_node() {
        let registry = DistributedRegistry::new();
        let bus = EventBus::default();
        let supervisor = AgentSupervisor::new(bus.get_emitter());
        let load_balancer = LoadBalancer::new(PlacementStrategy::LeastLoaded);

        for i in 0..4 {
            registry.register(AgentId::new(format!("a-{i}")), NodeId::new("n-1"), meta(), 1);
        }
        let ds = DistributedSupervisor::new(registry, supervisor, load_balancer);
        let nodes = [NodeId::new("n-1"), NodeId::new("n-2")];
        let moves = ds.plan_rebalance(&nodes);

        assert_eq!(moves.len(), 2);
        assert!(moves.iter().all(|m| m.from == NodeId::new("n-1") && m.to == NodeId::new("n-2")));
    }

    #[tokio::test]
    async fn migrate_moves_the_agent_and_updates_per_node_counts() {
        let registry = DistributedRegistry::new();
        let bus = EventBus::default();
        let supervisor = AgentSupervisor::new(bus.get_emitter());
        let load_balancer = LoadBalancer::new(PlacementStrategy::LeastLoaded);

        let agent_id = AgentId::new("a-1");
        supervisor.spawn(agent_id.clone(), None, RestartPolicy::Temporary, || Arc::new(EchoAgent) as Arc<dyn Agent>);
        registry.register(agent_id.clone(), NodeId::new("n-1"), meta(), 1);

        let ds = DistributedSupervisor::new(registry.clone(), supervisor, load_balancer.clone());
        let mv = PlannedMove { agent_id: agent_id.clone(), from: NodeId::new("n-1"), to: NodeId::new("n-2") };
        let restart: RestartFactory = Arc::new(|_snapshot| Arc::new(EchoAgent) as Arc<dyn Agent>);

        let before_source = registry.list_on_node(&NodeId::new("n-1")).len();
        let before_target = registry.list_on_node(&NodeId::new("n-2")).len();

        ds.migrate(&mv, restart).await.unwrap();

        assert_eq!(registry.list_on_node(&NodeId::new("n-1")).len(), before_source - 1);
        assert_eq!(registry.list_on_node(&NodeId::new("n-2")).len(), before_target + 1);
        assert_eq!(load_balancer.move_stats(), (0, 0)); // migrate() alone does not record; rebalance_cluster does
    }

    #[tokio::test]
    async fn rebalance_cluster_records_success_counters() {
        let registry = DistributedRegistry::new();
        let bus = EventBus::default();
        let supervisor = AgentSupervisor::new(bus.get_emitter());
        let load_balancer = LoadBalancer::new(PlacementStrategy::LeastLoaded);

        for i in 0..2 {
            let agent_id = AgentId::new(format!("a-{i}"));
            supervisor.spawn(agent_id.clone(), None, RestartPolicy::Temporary, || Arc::new(EchoAgent) as Arc<dyn Agent>);
            registry.register(agent_id, NodeId::new("n-1"), meta(), 1);
        }

        let ds = DistributedSupervisor::new(registry, supervisor, load_balancer.clone());
        let nodes = [NodeId::new("n-1"), NodeId::new("n-2")];
        let restart: RestartFactory = Arc::new(|_snapshot| Arc::new(EchoAgent) as Arc<dyn Agent>);

        let (succeeded, failed) = ds.rebalance_cluster(&nodes, restart).await;
        assert_eq!((succeeded, failed), (1, 0));
        assert_eq!(load_balancer.move_stats(), (1, 0));
    }
}
