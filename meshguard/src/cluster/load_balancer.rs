//! Load Balancer (spec §4.11): placement strategy selection over per-node
//! load snapshots collected by the [`super::ClusterManager`], plus the
//! rebalance trigger.

use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::types::{NodeId, PlacementStrategy};

pub const DEFAULT_REBALANCE_THRESHOLD: f64 = 0.8;

/// A per-node load snapshot (spec §3, Node Load Snapshot).
#[derive(Clone, Copy, Debug, Default)]
pub struct NodeLoad {
    pub cpu: f64,
    pub mem: f64,
    pub agent_count: u32,
}

impl NodeLoad {
    #[must_use]
    pub fn total_load(&self) -> f64 {
        0.4 * self.cpu + 0.4 * self.mem + 0.2 * (self.agent_count as f64 / 10.0)
    }
}

struct State {
    snapshots: FxHashMap<NodeId, NodeLoad>,
    node_capabilities: FxHashMap<NodeId, FxHashSet<String>>,
    recent_placements: Vec<NodeId>,
    moves_succeeded: u64,
    moves_failed: u64,
}

/// Decides which node a new agent should be placed on. Does not itself
/// perform the move — that is delegated to [`super::supervisor::DistributedSupervisor`]
/// (spec §4.9/§4.11), which reports each move's outcome back here via
/// [`LoadBalancer::record_move_result`].
#[derive(Clone)]
pub struct LoadBalancer {
    strategy: PlacementStrategy,
    rebalance_threshold: f64,
    state: Arc<RwLock<State>>,
}

impl LoadBalancer {
    #[must_use]
    pub fn new(strategy: PlacementStrategy) -> Self {
        Self {
            strategy,
            rebalance_threshold: DEFAULT_REBALANCE_THRESHOLD,
            state: Arc::new(RwLock::new(State {
                snapshots: FxHashMap::default(),
                node_capabilities: FxHashMap::default(),
                recent_placements: Vec::new(),
                moves_succeeded: 0,
                moves_failed: 0,
            })),
        }
    }

    /// Record the outcome of one rebalance move (spec §4.11: "the actual
    /// move is delegated to the distributed supervisor; successes/failures
    /// are counted").
    pub fn record_move_result(&self, success: bool) {
        let mut guard = self.state.write();
        if success {
            guard.moves_succeeded += 1;
        } else {
            guard.moves_failed += 1;
        }
    }

    /// `(moves_succeeded, moves_failed)` counted so far.
    #[must_use]
    pub fn move_stats(&self) -> (u64, u64) {
        let guard = self.state.read();
        (guard.moves_succeeded, guard.moves_failed)
    }

    pub fn record_snapshot(&self, node_id: NodeId, load: NodeLoad) {
        self.state.write().snapshots.insert(node_id, load);
    }

    pub fn record_node_capabilities(&self, node_id: NodeId, capabilities: FxHashSet<String>) {
        self.state.write().node_capabilities.insert(node_id, capabilities);
    }

    /// Choose a node to place a new agent on, per the configured strategy.
    pub fn choose_node(&self, required_capabilities: &FxHashSet<String>) -> Option<NodeId> {
        let mut guard = self.state.write();
        let chosen = match self.strategy {
            PlacementStrategy::LeastLoaded => least_loaded(&guard.snapshots),
            PlacementStrategy::CapabilityAware => {
                capability_aware(&guard.snapshots, &guard.node_capabilities, required_capabilities)
            }
            PlacementStrategy::RoundRobin => round_robin(&guard.snapshots, &guard.recent_placements),
        };

        if let Some(node_id) = &chosen {
            guard.recent_placements.push(node_id.clone());
            let cluster_size = guard.snapshots.len().max(1);
            if guard.recent_placements.len() > cluster_size {
                guard.recent_placements.remove(0);
            }
        }
        chosen
    }

    /// Whether the current spread of per-node load exceeds
    /// `rebalance_threshold` and a rebalance should be triggered (spec
    /// §4.11).
    #[must_use]
    pub fn needs_rebalance(&self) -> bool {
        let guard = self.state.read();
        let loads: Vec<f64> = guard.snapshots.values().map(NodeLoad::total_load).collect();
        let (Some(max), Some(min)) =
            (loads.iter().cloned().fold(None, max_fold), loads.iter().cloned().fold(None, min_fold))
        else {
            return false;
        };
        max - min > self.rebalance_threshold
    }

    pub fn set_rebalance_threshold(&mut self, threshold: f64) {
        self.rebalance_threshold = threshold;
    }
}

fn max_fold(acc: Option<f64>, x: f64) -> Option<f64> {
    Some(acc.map_or(x, |a| a.max(x)))
}

fn min_fold(acc: Option<f64>, x: f64) -> Option<f64> {
    Some(acc.map_or(x, |a| a.min(x)))
}

fn least_loaded(snapshots: &FxHashMap<NodeId, NodeLoad>) -> Option<NodeId> {
    snapshots
        .iter()
        .min_by(|(_, a), (_, b)| a.total_load().partial_cmp(&b.total_load()).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(id, _)| id.clone())
}

fn capability_aware(
    snapshots: &FxHashMap<NodeId, NodeLoad>,
    node_capabilities: &FxHashMap<NodeId, FxHashSet<String>>,
    required: &FxHashSet<String>,
) -> Option<NodeId> {
    let candidates: FxHashMap<NodeId, NodeLoad> = snapshots
        .iter()
        .filter(|(node_id, _)| node_capabilities.get(*node_id).is_some_and(|caps| required.is_subset(caps)))
        .map(|(id, load)| (id.clone(), *load))
        .collect();

    if candidates.is_empty() {
        least_loaded(snapshots)
    } else {
        least_loaded(&candidates)
    }
}

/// Pick the first node (by id) not among the most recent `cluster_size`
/// placements; if every node was used within that window, pick uniformly at
/// random among all of them (spec §4.11).
fn round_robin(snapshots: &FxHashMap<NodeId, NodeLoad>, recent: &[NodeId]) -> Option<NodeId> {
    let cluster_size = snapshots.len();
    let window: FxHashSet<&NodeId> = recent.iter().rev().take(cluster_size).collect();
    let mut candidates: Vec<&NodeId> = snapshots.keys().collect();
    candidates.sort();

    if let Some(id) = candidates.iter().find(|id| !window.contains(**id)) {
        return Some((*id).clone());
    }
    if candidates.is_empty() {
        return None;
    }
    let idx = rand::rng().random_range(0..candidates.len());
    Some(candidates[idx].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_loaded_picks_the_minimum_total_load() {
        let lb = LoadBalancer::new(PlacementStrategy::LeastLoaded);
        lb.record_snapshot(NodeId::new("n-1"), NodeLoad { cpu: 0.9, mem: 0.9, agent_count: 10 });
        lb.record_snapshot(NodeId::new("n-2"), NodeLoad { cpu: 0.1, mem: 0.1, agent_count: 1 });
        assert_eq!(lb.choose_node(&FxHashSet::default()), Some(NodeId::new("n-2")));
    }

    #[test]
    fn capability_aware_falls_back_to_least_loaded_when_no_host_matches() {
        let lb = LoadBalancer::new(PlacementStrategy::CapabilityAware);
        lb.record_snapshot(NodeId::new("n-1"), NodeLoad { cpu: 0.1, mem: 0.1, agent_count: 1 });
        lb.record_snapshot(NodeId::new("n-2"), NodeLoad { cpu: 0.9, mem: 0.9, agent_count: 10 });
        let required: FxHashSet<String> = ["gpu".to_string()].into_iter().collect();
        // Neither node advertises "gpu" capability hosting, so falls back.
        assert_eq!(lb.choose_node(&required), Some(NodeId::new("n-1")));
    }

    #[test]
    fn rebalance_triggers_past_threshold() {
        let lb = LoadBalancer::new(PlacementStrategy::LeastLoaded);
        lb.record_snapshot(NodeId::new("n-1"), NodeLoad { cpu: 1.0, mem: 1.0, agent_count: 0 });
        lb.record_snapshot(NodeId::new("n-2"), NodeLoad { cpu: 0.0, mem: 0.0, agent_count: 0 });
        assert!(lb.needs_rebalance());
    }

    #[test]
    fn round_robin_skips_the_node_used_in_the_window() {
        let lb = LoadBalancer::new(PlacementStrategy::RoundRobin);
        lb.record_snapshot(NodeId::new("n-1"), NodeLoad::default());
        lb.record_snapshot(NodeId::new("n-2"), NodeLoad::default());
        let first = lb.choose_node(&FxHashSet::default()).unwrap();
        let second = lb.choose_node(&FxHashSet::default()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn round_robin_falls_back_to_a_valid_node_once_the_window_covers_everyone() {
        let lb = LoadBalancer::new(PlacementStrategy::RoundRobin);
        lb.record_snapshot(NodeId::new("n-1"), NodeLoad::default());
        lb.record_snapshot(NodeId::new("n-2"), NodeLoad::default());
        for _ in 0..10 {
            let chosen = lb.choose_node(&FxHashSet::default()).unwrap();
            assert!(chosen == NodeId::new("n-1") || chosen == NodeId::new("n-2"));
        }
    }

    #[test]
    fn move_stats_tracks_recorded_outcomes() {
        let lb = LoadBalancer::new(PlacementStrategy::LeastLoaded);
        lb.record_move_result(true);
        lb.record_move_result(true);
        lb.record_move_result(false);
        assert_eq!(lb.move_stats(), (2, 1));
    }
}
