//! Distributed Registry (spec §4.9): an eventually-consistent, CRDT-style
//! last-writer-wins map of `agent_id → {node-local-ref, metadata}`, plus the
//! `find_best_agent_for_task` scoring function used by the Workflow
//! Coordinator and Load Balancer.
//!
//! Grounded on the teacher's preference for lock-protected hot-path maps
//! (`parking_lot` + `rustc-hash`) over actor-mediated state for read-heavy
//! structures; the LWW merge itself has no teacher analogue and is
//! spec-native.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AgentId, NodeId, Priority};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no suitable agent for the requested capabilities")]
    NoSuitableAgent,
}

/// Registry-visible metadata about an agent, kept current by periodic
/// gossip/heartbeat updates from the owning node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub agent_type: String,
    pub capabilities: FxHashSet<String>,
    pub current_load: u32,
    pub pending_messages: u32,
    pub specialisation: Option<String>,
}

#[derive(Clone, Debug)]
struct Entry {
    node_id: NodeId,
    metadata: AgentMetadata,
    /// Logical clock used to resolve concurrent writes last-writer-wins.
    version: u64,
}

/// Extra context about the task being placed, beyond required capabilities
/// (spec §4.9 `task_meta`).
#[derive(Clone, Debug, Default)]
pub struct TaskMeta {
    pub preferred_capabilities: FxHashSet<String>,
    pub specialisation: Option<String>,
    pub priority: Priority,
}

/// A scored candidate returned by `find_best_agent_for_task`, kept around so
/// callers can log the runner-up margin.
#[derive(Clone, Debug)]
pub struct ScoredAgent {
    pub agent_id: AgentId,
    pub score: f64,
}

#[derive(Clone)]
pub struct DistributedRegistry {
    entries: Arc<RwLock<FxHashMap<AgentId, Entry>>>,
}

impl Default for DistributedRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DistributedRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Arc::new(RwLock::new(FxHashMap::default())) }
    }

    /// Insert or update an agent's entry. Last-writer-wins by `version`; a
    /// stale update (lower version than what's stored) is dropped, the
    /// eventually-consistent behaviour spec §4.9/§5 call for.
    pub fn register(&self, agent_id: AgentId, node_id: NodeId, metadata: AgentMetadata, version: u64) {
        let mut guard = self.entries.write();
        match guard.get(&agent_id) {
            Some(existing) if existing.version > version => {}
            _ => {
                guard.insert(agent_id, Entry { node_id, metadata, version });
            }
        }
    }

    pub fn unregister(&self, agent_id: &AgentId) {
        self.entries.write().remove(agent_id);
    }

    #[must_use]
    pub fn lookup(&self, agent_id: &AgentId) -> Option<(NodeId, AgentMetadata)> {
        self.entries.read().get(agent_id).map(|e| (e.node_id.clone(), e.metadata.clone()))
    }

    #[must_use]
    pub fn select_by_type(&self, agent_type: &str) -> Vec<AgentId> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| e.metadata.agent_type == agent_type)
            .map(|(id, _)| id.clone())
            .collect()
    }

    #[must_use]
    pub fn list_on_node(&self, node_id: &NodeId) -> Vec<AgentId> {
        self.entries.read().iter().filter(|(_, e)| &e.node_id == node_id).map(|(id, _)| id.clone()).collect()
    }

    #[must_use]
    pub fn find_with_capability(&self, capability: &str) -> Vec<AgentId> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| e.metadata.capabilities.contains(capability))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Score every candidate that has all of `required_caps` and return the
    /// highest-scoring one (spec §4.9's exact formula).
    pub fn find_best_agent_for_task(
        &self,
        required_caps: &FxHashSet<String>,
        task_meta: &TaskMeta,
    ) -> Result<ScoredAgent, RegistryError> {
        let guard = self.entries.read();
        let mut best: Option<ScoredAgent> = None;

        for (agent_id, entry) in guard.iter() {
            if !required_caps.is_subset(&entry.metadata.capabilities) {
                continue;
            }
            let score = score_candidate(&entry.metadata, required_caps, task_meta);
            if best.as_ref().is_none_or(|b| score > b.score) {
                best = Some(ScoredAgent { agent_id: agent_id.clone(), score });
            }
        }

        best.ok_or(RegistryError::NoSuitableAgent)
    }
}

fn score_candidate(metadata: &AgentMetadata, required_caps: &FxHashSet<String>, task_meta: &TaskMeta) -> f64 {
    let required_overlap = required_caps.intersection(&metadata.capabilities).count();
    let preferred_overlap = task_meta.preferred_capabilities.intersection(&metadata.capabilities).count();
    let specialisation_bonus =
        if task_meta.specialisation.is_some() && task_meta.specialisation == metadata.specialisation { 15.0 } else { 0.0 };

    let capability_score = 20.0 * required_overlap as f64 + 10.0 * preferred_overlap as f64 + specialisation_bonus;

    let capped_pending = metadata.pending_messages.min(50);
    let load_score = (metadata.current_load as f64 + 10.0 * capped_pending as f64).min(100.0);

    match task_meta.priority {
        Priority::High => 2.0 * capability_score + (100.0 - load_score),
        Priority::Low => 100.0 - load_score,
        Priority::Normal => capability_score + (100.0 - load_score),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(caps: &[&str], load: u32, pending: u32, specialisation: Option<&str>) -> AgentMetadata {
        AgentMetadata {
            agent_type: "worker".to_string(),
            capabilities: caps.iter().map(|s| s.to_string()).collect(),
            current_load: load,
            pending_messages: pending,
            specialisation: specialisation.map(|s| s.to_string()),
        }
    }

    #[test]
    fn stale_writes_are_dropped_under_last_writer_wins() {
        let registry = DistributedRegistry::new();
        let id = AgentId::new("a-1");
        registry.register(id.clone(), NodeId::new("n-1"), meta(&["code"], 10, 0, None), 5);
        registry.register(id.clone(), NodeId::new("n-2"), meta(&["code"], 90, 0, None), 2);
        let (node, metadata) = registry.lookup(&id).unwrap();
        assert_eq!(node, NodeId::new("n-1"));
        assert_eq!(metadata.current_load, 10);
    }

    #[test]
    fn best_agent_prefers_higher_capability_and_lower_load() {
        let registry = DistributedRegistry::new();
        registry.register(AgentId::new("low-load"), NodeId::new("n-1"), meta(&["code", "test"], 5, 0, None), 1);
        registry.register(AgentId::new("high-load"), NodeId::new("n-1"), meta(&["code", "test"], 90, 0, None), 1);
        registry.register(AgentId::new("missing-cap"), NodeId::new("n-1"), meta(&["code"], 0, 0, None), 1);

        let required: FxHashSet<String> = ["code", "test"].iter().map(|s| s.to_string()).collect();
        let best = registry.find_best_agent_for_task(&required, &TaskMeta::default()).unwrap();
        assert_eq!(best.agent_id, AgentId::new("low-load"));
    }

    #[test]
    fn no_suitable_agent_when_required_capability_missing() {
        let registry = DistributedRegistry::new();
        registry.register(AgentId::new("a-1"), NodeId::new("n-1"), meta(&["code"], 0, 0, None), 1);
        let required: FxHashSet<String> = ["deploy"].iter().map(|s| s.to_string()).collect();
        assert!(registry.find_best_agent_for_task(&required, &TaskMeta::default()).is_err());
    }

    #[test]
    fn low_priority_ignores_capability_score() {
        let mut task_meta = TaskMeta::default();
        task_meta.priority = Priority::Low;
        let registry = DistributedRegistry::new();
        registry.register(AgentId::new("more-caps"), NodeId::new("n-1"), meta(&["code", "test", "deploy"], 50, 0, None), 1);
        registry.register(AgentId::new("less-load"), NodeId::new("n-1"), meta(&["code"], 10, 0, None), 1);

        let required: FxHashSet<String> = ["code"].iter().map(|s| s.to_string()).collect();
        let best = registry.find_best_agent_for_task(&required, &task_meta).unwrap();
        assert_eq!(best.agent_id, AgentId::new("less-load"));
    }
}
