//! The revocation cache (spec §4.5): a bounded, shared in-memory record of
//! revoked token IDs, read far more often than written.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

struct RevocationState {
    revoked: FxHashSet<String>,
    revoked_at: FxHashMap<String, DateTime<Utc>>,
    /// Insertion order, for bounded FIFO eviction once `capacity` is hit.
    order: VecDeque<String>,
}

/// Tracks revoked token IDs (`jti`s) up to a fixed capacity, evicting the
/// oldest entry once full. Reads take a shared lock and never block on each
/// other.
pub struct RevocationCache {
    capacity: usize,
    state: RwLock<RevocationState>,
}

impl RevocationCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: RwLock::new(RevocationState {
                revoked: FxHashSet::default(),
                revoked_at: FxHashMap::default(),
                order: VecDeque::new(),
            }),
        }
    }

    #[must_use]
    pub fn is_revoked(&self, jti: &str) -> bool {
        self.state.read().revoked.contains(jti)
    }

    pub fn revoke(&self, jti: &str) {
        let mut state = self.state.write();
        if state.revoked.insert(jti.to_string()) {
            state.revoked_at.insert(jti.to_string(), Utc::now());
            state.order.push_back(jti.to_string());
        }
        if state.order.len() > self.capacity {
            if let Some(evicted) = state.order.pop_front() {
                state.revoked.remove(&evicted);
                state.revoked_at.remove(&evicted);
                warn!(jti = %evicted, "revocation cache at capacity, evicted oldest entry");
            }
        }
    }

    pub fn revoke_batch(&self, jtis: &[String]) {
        for jti in jtis {
            self.revoke(jti);
        }
    }

    /// Drop entries revoked more than `max_age` ago — once a token's own
    /// expiry has long since passed, remembering its revocation adds
    /// nothing.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let mut state = self.state.write();
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
        let stale: Vec<String> = state
            .revoked_at
            .iter()
            .filter(|(_, t)| **t < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            state.revoked.remove(id);
            state.revoked_at.remove(id);
            state.order.retain(|o| o != id);
        }
        stale.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().revoked.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revoke_and_check() {
        let cache = RevocationCache::new(10);
        assert!(!cache.is_revoked("a"));
        cache.revoke("a");
        assert!(cache.is_revoked("a"));
    }

    #[test]
    fn evicts_oldest_once_over_capacity() {
        let cache = RevocationCache::new(2);
        cache.revoke("a");
        cache.revoke("b");
        cache.revoke("c");
        assert!(!cache.is_revoked("a"));
        assert!(cache.is_revoked("b"));
        assert!(cache.is_revoked("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn batch_revoke() {
        let cache = RevocationCache::new(10);
        cache.revoke_batch(&["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(cache.len(), 3);
    }
}
