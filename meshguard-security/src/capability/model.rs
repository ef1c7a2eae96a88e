//! The [`Capability`] type and the pure operations of spec §4.1:
//! `create`, `validate`, `permits`, `delegate`, `revoke`.
//!
//! This module has no knowledge of storage (the delegation tree and
//! principal index live in [`crate::kernel`]); it only knows how to build,
//! sign, and check a single capability value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DenialReason;

use super::constraints::Constraints;
use super::signing;

/// The class of resource a capability governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Filesystem,
    McpTool,
    Network,
    Other,
}

impl ResourceType {
    #[must_use]
    pub fn as_str(&self) -> String {
        match self {
            Self::Filesystem => "filesystem".to_string(),
            Self::McpTool => "mcp_tool".to_string(),
            Self::Network => "network".to_string(),
            Self::Other => "other".to_string(),
        }
    }
}

/// An unforgeable, signed permission token (spec §3, "Capability").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// 128-bit hex identifier.
    pub id: String,
    pub resource_type: ResourceType,
    pub constraints: Constraints,
    pub principal_id: String,
    pub parent_id: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub delegation_depth: u32,
    pub revoked: bool,
    /// HMAC-SHA256 over the deterministic serialization of every other
    /// field, hex-encoded.
    pub signature: String,
}

impl Capability {
    /// Create and sign a fresh root capability (spec §4.1 `create`).
    ///
    /// This is a pure constructor: policy checks (path/operation/tool
    /// whitelists, rate limits) are the security kernel's responsibility
    /// before calling this.
    #[must_use]
    pub fn create(
        resource_type: ResourceType,
        constraints: Constraints,
        principal_id: impl Into<String>,
        secret: &str,
    ) -> Self {
        let expires_at = constraints.expires_at;
        let mut cap = Self {
            id: Uuid::new_v4().simple().to_string(),
            resource_type,
            constraints,
            principal_id: principal_id.into(),
            parent_id: None,
            issued_at: Utc::now(),
            expires_at,
            delegation_depth: 0,
            revoked: false,
            signature: String::new(),
        };
        cap.signature = signing::sign(&cap, secret);
        cap
    }

    /// Structural and cryptographic validation: re-verify the signature,
    /// reject if expired, reject if revoked.
    ///
    /// # Errors
    ///
    /// Returns the first applicable [`DenialReason`].
    pub fn validate(&self, secret: &str) -> Result<(), DenialReason> {
        if self.revoked {
            return Err(DenialReason::CapabilityInvalid);
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at <= Utc::now() {
                return Err(DenialReason::CapabilityExpired);
            }
        }
        if !signing::verify(self, secret) {
            return Err(DenialReason::PermissionDenied);
        }
        Ok(())
    }

    /// Check whether this (already-validated) capability permits
    /// `operation` on `resource`.
    ///
    /// # Errors
    ///
    /// Returns a specific [`DenialReason`] describing why the check
    /// failed.
    pub fn permits(&self, operation: &str, resource: &str) -> Result<(), DenialReason> {
        if let Some(ops) = &self.constraints.operations {
            if !ops.is_empty() && !ops.contains(operation) {
                return Err(DenialReason::OperationNotPermitted {
                    operation: operation.to_string(),
                });
            }
        }

        if let Some(paths) = &self.constraints.paths {
            if !paths.is_empty() && !paths.iter().any(|p| resource.starts_with(p.as_str())) {
                return Err(DenialReason::PathNotAllowed {
                    path: resource.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Check whether `tool` is present in `allowed_tools` (empty/absent
    /// means unrestricted).
    ///
    /// # Errors
    ///
    /// Returns [`DenialReason::ToolNotAllowed`] if the tool is excluded.
    pub fn permits_tool(&self, tool: &str) -> Result<(), DenialReason> {
        if let Some(tools) = &self.constraints.allowed_tools {
            if !tools.is_empty() && !tools.contains(tool) {
                return Err(DenialReason::ToolNotAllowed {
                    tool: tool.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Produce a delegated child capability whose constraints are the
    /// intersection of `self` and `added_constraints` (spec §4.1
    /// `delegate`).
    ///
    /// # Errors
    ///
    /// Returns [`DenialReason`]-shaped errors via the caller's validation
    /// step; this function itself only returns `Err` when `max_delegations`
    /// is already exhausted.
    pub fn delegate(
        &self,
        target_principal: impl Into<String>,
        added_constraints: Constraints,
        secret: &str,
    ) -> Result<Self, DelegationError> {
        if self.revoked {
            return Err(DelegationError::ParentRevoked);
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at <= Utc::now() {
                return Err(DelegationError::ParentExpired);
            }
        }
        if let Some(max) = self.constraints.max_delegations {
            if !max.allows_another() {
                return Err(DelegationError::MaxDelegationsExceeded);
            }
        }

        let constraints = self.constraints.intersect(&added_constraints);
        let expires_at = constraints.expires_at;

        let mut child = Capability {
            id: Uuid::new_v4().simple().to_string(),
            resource_type: self.resource_type,
            constraints,
            principal_id: target_principal.into(),
            parent_id: Some(self.id.clone()),
            issued_at: Utc::now(),
            expires_at,
            delegation_depth: self.delegation_depth + 1,
            revoked: false,
            signature: String::new(),
        };
        child.signature = signing::sign(&child, secret);
        Ok(child)
    }

    /// Flip the revoked flag. Cascading to descendants is the security
    /// kernel's job (it owns the delegation tree).
    pub fn revoke(&mut self) {
        self.revoked = true;
    }
}

/// Why [`Capability::delegate`] refused to produce a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DelegationError {
    #[error("delegation not allowed: parent capability is revoked")]
    ParentRevoked,
    #[error("delegation not allowed: parent capability has expired")]
    ParentExpired,
    #[error("delegation not allowed: max_delegations exceeded")]
    MaxDelegationsExceeded,
}
