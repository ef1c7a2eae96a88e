//! The security kernel (spec §4.2): a single-writer authority serialising
//! every capability lifecycle operation.
//!
//! Single-writer is realised with a `parking_lot::Mutex` guarding the
//! in-memory indices; the lock is never held across an `.await`, so audit
//! emission and policy checks that need to talk to other components
//! happen outside the critical section. This mirrors the teacher's
//! pattern of keeping actor-owned state behind a narrow synchronous
//! surface (`EventHub`'s internal state) even when the outer API is async.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::audit::{AuditLogger, AuditEventType};
use crate::capability::{Capability, Constraints, DelegationError, ResourceType};
use crate::error::{DenialReason, SecurityError};

/// Policy whitelists enforced by `request_capability`.
#[derive(Debug, Clone, Default)]
pub struct KernelPolicies {
    /// If non-empty, every constructed capability's `operations` must be a
    /// subset of this set.
    pub allowed_operations: Option<FxHashSet<String>>,
    /// If non-empty, every path constraint must be prefixed by one of
    /// these.
    pub allowed_path_prefixes: Option<Vec<String>>,
    /// If non-empty, `allowed_tools` must be a subset of this set.
    pub allowed_tool_names: Option<FxHashSet<String>>,
    /// Maximum `request_capability` calls per principal per
    /// `rate_limit_window`.
    pub rate_limit_per_window: Option<u32>,
    pub rate_limit_window: Duration,
}

impl KernelPolicies {
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            rate_limit_window: Duration::from_secs(60),
            ..Default::default()
        }
    }

    fn check_constraints(&self, constraints: &Constraints) -> Result<(), SecurityError> {
        if let (Some(allowed), Some(requested)) =
            (&self.allowed_operations, &constraints.operations)
        {
            if !requested.is_subset(allowed) {
                return Err(SecurityError::PolicyRejected(
                    "requested operations exceed policy whitelist".to_string(),
                ));
            }
        }
        if let (Some(allowed_prefixes), Some(paths)) =
            (&self.allowed_path_prefixes, &constraints.paths)
        {
            let ok = paths
                .iter()
                .all(|p| allowed_prefixes.iter().any(|a| p.starts_with(a.as_str())));
            if !ok {
                return Err(SecurityError::PolicyRejected(
                    "requested path falls outside policy whitelist".to_string(),
                ));
            }
        }
        if let (Some(allowed_tools), Some(tools)) =
            (&self.allowed_tool_names, &constraints.allowed_tools)
        {
            if !tools.is_subset(allowed_tools) {
                return Err(SecurityError::PolicyRejected(
                    "requested tools exceed policy whitelist".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct KernelStats {
    pub capabilities_created: u64,
    pub capabilities_delegated: u64,
    pub capabilities_revoked: u64,
    pub permission_checks: u64,
    pub permission_denials: u64,
}

struct KernelState {
    capabilities: FxHashMap<String, Capability>,
    by_principal: FxHashMap<String, FxHashSet<String>>,
    delegation_tree: FxHashMap<String, FxHashSet<String>>,
    rate_counters: FxHashMap<String, (chrono::DateTime<Utc>, u32)>,
    stats: KernelStats,
}

impl KernelState {
    fn new() -> Self {
        Self {
            capabilities: FxHashMap::default(),
            by_principal: FxHashMap::default(),
            delegation_tree: FxHashMap::default(),
            rate_counters: FxHashMap::default(),
            stats: KernelStats::default(),
        }
    }

    fn insert(&mut self, cap: Capability) {
        self.by_principal
            .entry(cap.principal_id.clone())
            .or_default()
            .insert(cap.id.clone());
        if let Some(parent_id) = &cap.parent_id {
            self.delegation_tree
                .entry(parent_id.clone())
                .or_default()
                .insert(cap.id.clone());
        }
        self.capabilities.insert(cap.id.clone(), cap);
    }
}

/// The security kernel: `meshguard-security`'s single authoritative store
/// of capabilities.
pub struct SecurityKernel {
    state: Mutex<KernelState>,
    secret: String,
    policies: KernelPolicies,
    audit: Arc<AuditLogger>,
}

impl SecurityKernel {
    #[must_use]
    pub fn new(secret: String, policies: KernelPolicies, audit: Arc<AuditLogger>) -> Self {
        Self {
            state: Mutex::new(KernelState::new()),
            secret,
            policies,
            audit,
        }
    }

    /// Construct and store a new root capability after policy checks.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::PolicyRejected`] if the requested
    /// constraints exceed a configured whitelist, or a rate-limit denial.
    #[instrument(skip(self, constraints))]
    pub async fn request_capability(
        &self,
        resource_type: ResourceType,
        constraints: Constraints,
        principal_id: &str,
    ) -> Result<Capability, SecurityError> {
        self.policies.check_constraints(&constraints)?;
        self.check_rate_limit(principal_id)?;

        let cap = Capability::create(resource_type, constraints, principal_id, &self.secret);
        {
            let mut state = self.state.lock();
            state.insert(cap.clone());
            state.stats.capabilities_created += 1;
        }

        self.audit
            .log(AuditEventType::CapabilityCreated, principal_id, serde_json::json!({
                "capability_id": cap.id,
                "resource_type": cap.resource_type.as_str(),
            }))
            .await;

        info!(capability_id = %cap.id, principal = %principal_id, "capability created");
        Ok(cap)
    }

    fn check_rate_limit(&self, principal_id: &str) -> Result<(), SecurityError> {
        let Some(limit) = self.policies.rate_limit_per_window else {
            return Ok(());
        };
        let mut state = self.state.lock();
        let now = Utc::now();
        let window = chrono::Duration::from_std(self.policies.rate_limit_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let entry = state
            .rate_counters
            .entry(principal_id.to_string())
            .or_insert((now, 0));
        if now - entry.0 > window {
            *entry = (now, 0);
        }
        entry.1 += 1;
        if entry.1 > limit {
            return Err(SecurityError::PolicyRejected(format!(
                "rate limit exceeded for principal {principal_id}"
            )));
        }
        Ok(())
    }

    /// Validate `presented` against the kernel's own stored copy: the
    /// signature must bit-match (spec §4.2: "detects forgery or stale
    /// copy"), then the usual structural/expiry/revocation checks and a
    /// `permits` check run.
    ///
    /// # Errors
    ///
    /// Returns a [`DenialReason`] describing the first failure.
    pub fn validate_capability(
        &self,
        presented: &Capability,
        operation: &str,
        resource: &str,
    ) -> Result<(), DenialReason> {
        let state = self.state.lock();
        let stored = state
            .capabilities
            .get(&presented.id)
            .ok_or(DenialReason::CapabilityInvalid)?;

        if stored.signature != presented.signature {
            return Err(DenialReason::PermissionDenied);
        }

        stored.validate(&self.secret).map_err(|_| {
            if stored.revoked {
                DenialReason::CapabilityInvalid
            } else {
                DenialReason::CapabilityExpired
            }
        })?;

        stored.permits(operation, resource)
    }

    /// Delegate `parent_id` to `target_principal`, intersecting
    /// `added_constraints` per spec §4.1.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::CapabilityNotFound`] if the parent is
    /// unknown, or [`SecurityError::DelegationNotAllowed`] if the parent is
    /// revoked, expired, or has exhausted `max_delegations`.
    #[instrument(skip(self, added_constraints))]
    pub async fn delegate_capability(
        &self,
        parent_id: &str,
        target_principal: &str,
        added_constraints: Constraints,
    ) -> Result<Capability, SecurityError> {
        let parent = {
            let state = self.state.lock();
            state
                .capabilities
                .get(parent_id)
                .cloned()
                .ok_or_else(|| SecurityError::CapabilityNotFound(parent_id.to_string()))?
        };

        let child = parent
            .delegate(target_principal, added_constraints, &self.secret)
            .map_err(|e| match e {
                DelegationError::ParentRevoked => {
                    SecurityError::DelegationNotAllowed("parent revoked".to_string())
                }
                DelegationError::ParentExpired => {
                    SecurityError::DelegationNotAllowed("parent expired".to_string())
                }
                DelegationError::MaxDelegationsExceeded => {
                    SecurityError::DelegationNotAllowed("max_delegations exceeded".to_string())
                }
            })?;

        {
            let mut state = self.state.lock();
            state.insert(child.clone());
            state.stats.capabilities_delegated += 1;
        }

        self.audit
            .log(AuditEventType::CapabilityDelegated, target_principal, serde_json::json!({
                "capability_id": child.id,
                "parent_id": parent_id,
            }))
            .await;

        Ok(child)
    }

    /// Revoke `capability_id` and every transitive descendant (DFS over
    /// the delegation tree). Returns the number of capabilities flipped to
    /// revoked, including the root (spec §8, property 3 / scenario S2).
    #[instrument(skip(self))]
    pub async fn revoke_capability(&self, capability_id: &str) -> Result<u32, SecurityError> {
        let mut cascaded = Vec::new();
        {
            let mut state = self.state.lock();
            if !state.capabilities.contains_key(capability_id) {
                return Err(SecurityError::CapabilityNotFound(capability_id.to_string()));
            }
            let mut stack = vec![capability_id.to_string()];
            while let Some(id) = stack.pop() {
                if let Some(children) = state.delegation_tree.get(&id) {
                    stack.extend(children.iter().cloned());
                }
                if let Some(cap) = state.capabilities.get_mut(&id) {
                    if !cap.revoked {
                        cap.revoke();
                        cascaded.push(id);
                    }
                }
            }
            state.stats.capabilities_revoked += cascaded.len() as u64;
        }

        self.audit
            .log(AuditEventType::CapabilityRevoked, "system", serde_json::json!({
                "capability_id": capability_id,
                "cascade_count": cascaded.len(),
            }))
            .await;

        Ok(cascaded.len() as u32)
    }

    /// Return `Ok(())` on the first capability owned by `principal_id`
    /// that permits `operation` on `resource` for `resource_type`; else
    /// [`DenialReason::PermissionDenied`].
    pub fn check_permission(
        &self,
        principal_id: &str,
        resource_type: ResourceType,
        operation: &str,
        resource: &str,
    ) -> Result<(), DenialReason> {
        let mut state = self.state.lock();
        state.stats.permission_checks += 1;
        let cap_ids = state
            .by_principal
            .get(principal_id)
            .cloned()
            .unwrap_or_default();

        let allowed = cap_ids.iter().any(|id| {
            state
                .capabilities
                .get(id)
                .is_some_and(|cap| {
                    cap.resource_type == resource_type
                        && cap.validate(&self.secret).is_ok()
                        && cap.permits(operation, resource).is_ok()
                })
        });

        if allowed {
            Ok(())
        } else {
            state.stats.permission_denials += 1;
            Err(DenialReason::PermissionDenied)
        }
    }

    /// Remove expired capabilities and prune the delegation tree. Intended
    /// to be driven by a periodic task (spec default: every 5 minutes).
    pub fn sweep_expired(&self) -> u32 {
        let mut state = self.state.lock();
        let now = Utc::now();
        let expired: Vec<String> = state
            .capabilities
            .iter()
            .filter(|(_, c)| c.expires_at.is_some_and(|e| e <= now))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            state.capabilities.remove(id);
            state.delegation_tree.remove(id);
            for children in state.delegation_tree.values_mut() {
                children.remove(id);
            }
            for ids in state.by_principal.values_mut() {
                ids.remove(id);
            }
        }

        if !expired.is_empty() {
            warn!(count = expired.len(), "swept expired capabilities");
        }
        expired.len() as u32
    }

    #[must_use]
    pub fn stats(&self) -> KernelStats {
        self.state.lock().stats.clone()
    }

    /// Overwrite the live counters from a recovered snapshot (spec §4.15
    /// `cold_recovery`/`partial_recovery`, `security` component). Does not
    /// restore the capability store itself — tokens/capabilities issued
    /// before the crash are gone; only the aggregate counters survive.
    pub fn restore_stats(&self, stats: KernelStats) {
        self.state.lock().stats = stats;
    }

    #[must_use]
    pub fn get(&self, capability_id: &str) -> Option<Capability> {
        self.state.lock().capabilities.get(capability_id).cloned()
    }
}

/// Spawn the periodic expiry sweep as a background Tokio task.
pub fn spawn_sweep(kernel: Arc<SecurityKernel>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            kernel.sweep_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLoggerConfig;

    async fn test_kernel() -> SecurityKernel {
        let audit = Arc::new(AuditLogger::new(AuditLoggerConfig::for_tests(), "secret".into()));
        SecurityKernel::new("secret".into(), KernelPolicies::permissive(), audit)
    }

    #[tokio::test]
    async fn scenario_s2_revocation_cascade() {
        let kernel = test_kernel().await;
        let root = kernel
            .request_capability(ResourceType::Filesystem, Constraints::new(), "A")
            .await
            .unwrap();
        let d1 = kernel
            .delegate_capability(&root.id, "B", Constraints::new())
            .await
            .unwrap();
        let d2 = kernel
            .delegate_capability(&d1.id, "C", Constraints::new())
            .await
            .unwrap();

        let cascaded = kernel.revoke_capability(&root.id).await.unwrap();
        assert_eq!(cascaded, 3);

        assert!(kernel.get(&root.id).unwrap().revoked);
        assert!(kernel.get(&d1.id).unwrap().revoked);
        assert!(kernel.get(&d2.id).unwrap().revoked);

        let result = kernel.validate_capability(&kernel.get(&d2.id).unwrap(), "read", "/tmp");
        assert_eq!(result.unwrap_err(), DenialReason::CapabilityInvalid);
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let kernel = test_kernel().await;
        let root = kernel
            .request_capability(ResourceType::Filesystem, Constraints::new(), "A")
            .await
            .unwrap();
        let first = kernel.revoke_capability(&root.id).await.unwrap();
        let second = kernel.revoke_capability(&root.id).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn restore_stats_overwrites_the_live_counters() {
        let kernel = test_kernel().await;
        kernel
            .request_capability(ResourceType::Filesystem, Constraints::new(), "A")
            .await
            .unwrap();
        assert_eq!(kernel.stats().capabilities_created, 1);

        kernel.restore_stats(KernelStats { capabilities_created: 42, ..Default::default() });
        assert_eq!(kernel.stats().capabilities_created, 42);
    }

    #[tokio::test]
    async fn check_permission_denies_without_matching_capability() {
        let kernel = test_kernel().await;
        let result = kernel.check_permission("ghost", ResourceType::Filesystem, "read", "/tmp");
        assert_eq!(result.unwrap_err(), DenialReason::PermissionDenied);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_capabilities() {
        let kernel = test_kernel().await;
        let mut constraints = Constraints::new();
        constraints.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        let expired = kernel
            .request_capability(ResourceType::Filesystem, constraints, "A")
            .await
            .unwrap();
        let fresh = kernel
            .request_capability(ResourceType::Filesystem, Constraints::new(), "A")
            .await
            .unwrap();

        let removed = kernel.sweep_expired();
        assert_eq!(removed, 1);
        assert!(kernel.get(&expired.id).is_none());
        assert!(kernel.get(&fresh.id).is_some());
    }
}
