//! The token issuer (spec §4.3): mints compact bearer tokens from a
//! validated capability, and drives their revocation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::instrument;

use crate::audit::{AuditEventType, AuditLogger};
use crate::capability::Capability;
use crate::error::TokenError;

use super::revocation::RevocationCache;
use super::{decode, encode, Claims, Delegation, KeyManager, ISSUER};

/// Default ceiling on delegation chain length when a `TokenIssuer` isn't
/// constructed with an explicit one (spec §4.3 `max_depth`).
pub const DEFAULT_MAX_DELEGATION_DEPTH: u32 = 8;

/// Mints and revokes bearer tokens backed by capabilities.
pub struct TokenIssuer {
    key_manager: Arc<KeyManager>,
    revocation: Arc<RevocationCache>,
    audit: Arc<AuditLogger>,
    default_ttl: Duration,
    max_delegation_depth: u32,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(
        key_manager: Arc<KeyManager>,
        revocation: Arc<RevocationCache>,
        audit: Arc<AuditLogger>,
        default_ttl: Duration,
    ) -> Self {
        Self::with_max_delegation_depth(key_manager, revocation, audit, default_ttl, DEFAULT_MAX_DELEGATION_DEPTH)
    }

    #[must_use]
    pub fn with_max_delegation_depth(
        key_manager: Arc<KeyManager>,
        revocation: Arc<RevocationCache>,
        audit: Arc<AuditLogger>,
        default_ttl: Duration,
        max_delegation_depth: u32,
    ) -> Self {
        Self {
            key_manager,
            revocation,
            audit,
            default_ttl,
            max_delegation_depth,
        }
    }

    /// Issue a root token carrying `capability`'s grant.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] if the capability is revoked, expired, or
    /// claim serialization fails.
    #[instrument(skip(self, capability))]
    pub async fn issue(&self, capability: &Capability, ttl: Option<Duration>) -> Result<String, TokenError> {
        self.issue_internal(capability, None, ttl).await
    }

    /// Issue a token delegated from an already-issued parent token, carrying
    /// a `delegation` claim so validators can trace the chain and enforce
    /// its depth.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidTokenFormat`] if `parent_token` does not
    /// parse, [`TokenError::DelegationDepthExceeded`] if minting this token
    /// would reach `max_depth`, or the same errors as [`Self::issue`].
    #[instrument(skip(self, capability, parent_token))]
    pub async fn issue_delegated(
        &self,
        parent_token: &str,
        capability: &Capability,
        ttl: Option<Duration>,
    ) -> Result<String, TokenError> {
        let parent = decode(parent_token)?;
        let parent_depth = parent.claims.delegation.as_ref().map_or(0, |d| d.depth);
        let depth = parent_depth + 1;
        if depth >= self.max_delegation_depth {
            return Err(TokenError::DelegationDepthExceeded {
                depth,
                max: self.max_delegation_depth,
            });
        }

        let delegation = Delegation {
            parent_id: parent.claims.jti,
            depth,
            max_depth: self.max_delegation_depth,
        };
        self.issue_internal(capability, Some(delegation), ttl).await
    }

    async fn issue_internal(
        &self,
        capability: &Capability,
        delegation: Option<Delegation>,
        ttl: Option<Duration>,
    ) -> Result<String, TokenError> {
        if capability.revoked {
            return Err(TokenError::Denied(crate::error::DenialReason::CapabilityInvalid));
        }
        let now = Utc::now();
        if let Some(expires_at) = capability.expires_at {
            if expires_at <= now {
                return Err(TokenError::Denied(crate::error::DenialReason::CapabilityExpired));
            }
        }

        let ttl = ttl.unwrap_or(self.default_ttl);
        let exp = capability
            .expires_at
            .map(|e| e.min(now + chrono::Duration::from_std(ttl).unwrap_or_default()))
            .unwrap_or_else(|| now + chrono::Duration::from_std(ttl).unwrap_or_default());

        let claims = Claims {
            jti: uuid::Uuid::new_v4().simple().to_string(),
            sub: capability.principal_id.clone(),
            iss: ISSUER.to_string(),
            aud: capability.resource_type.as_str(),
            capability_id: capability.id.clone(),
            operations: capability
                .constraints
                .operations
                .clone()
                .map(|ops| ops.into_iter().collect())
                .unwrap_or_default(),
            resource: capability.constraints.paths.clone().and_then(|p| p.into_iter().next()).unwrap_or_default(),
            constraints: capability.constraints.clone(),
            iat: now,
            exp,
            delegation,
        };

        let token = encode(&claims, &self.key_manager)?;

        self.audit
            .log(
                AuditEventType::TokenIssued,
                &capability.principal_id,
                serde_json::json!({ "jti": claims.jti, "capability_id": capability.id }),
            )
            .await;

        Ok(token)
    }

    /// Revoke a previously issued token by adding its `jti` to the
    /// revocation cache.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidTokenFormat`] if `token` does not parse.
    #[instrument(skip(self, token))]
    pub async fn revoke(&self, token: &str) -> Result<(), TokenError> {
        let decoded = decode(token)?;
        self.revocation.revoke(&decoded.claims.jti);
        self.audit
            .log(
                AuditEventType::TokenRevoked,
                &decoded.claims.sub,
                serde_json::json!({ "jti": decoded.claims.jti }),
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLoggerConfig;
    use crate::capability::{Constraints, ResourceType};

    async fn issuer() -> (TokenIssuer, Arc<KeyManager>, Arc<RevocationCache>) {
        let km = Arc::new(KeyManager::new(Duration::from_secs(3600), Duration::from_secs(60)).unwrap());
        let revocation = Arc::new(RevocationCache::new(1000));
        let audit = Arc::new(AuditLogger::new(AuditLoggerConfig::for_tests(), "s".into()));
        let issuer = TokenIssuer::new(km.clone(), revocation.clone(), audit, Duration::from_secs(300));
        (issuer, km, revocation)
    }

    #[tokio::test]
    async fn issues_a_well_formed_token() {
        let (issuer, ..) = issuer().await;
        let cap = Capability::create(ResourceType::Filesystem, Constraints::new(), "A", "secret");
        let token = issuer.issue(&cap, None).await.unwrap();
        assert_eq!(token.split('.').count(), 3);
    }

    #[tokio::test]
    async fn revoked_capability_cannot_be_issued_a_token() {
        let (issuer, ..) = issuer().await;
        let mut cap = Capability::create(ResourceType::Filesystem, Constraints::new(), "A", "secret");
        cap.revoke();
        assert!(issuer.issue(&cap, None).await.is_err());
    }

    #[tokio::test]
    async fn revoke_marks_jti_in_cache() {
        let (issuer, _km, revocation) = issuer().await;
        let cap = Capability::create(ResourceType::Filesystem, Constraints::new(), "A", "secret");
        let token = issuer.issue(&cap, None).await.unwrap();
        issuer.revoke(&token).await.unwrap();
        assert_eq!(revocation.len(), 1);
    }

    #[tokio::test]
    async fn delegated_token_records_parent_and_depth() {
        let (issuer, ..) = issuer().await;
        let root_cap = Capability::create(ResourceType::Filesystem, Constraints::new(), "A", "secret");
        let root_token = issuer.issue(&root_cap, None).await.unwrap();

        let child_cap = Capability::create(ResourceType::Filesystem, Constraints::new(), "B", "secret");
        let child_token = issuer.issue_delegated(&root_token, &child_cap, None).await.unwrap();

        let decoded = decode(&child_token).unwrap();
        let delegation = decoded.claims.delegation.expect("delegated token carries a delegation claim");
        assert_eq!(delegation.depth, 1);
        assert_eq!(delegation.parent_id, decode(&root_token).unwrap().claims.jti);
    }

    #[tokio::test]
    async fn delegation_chain_is_rejected_once_max_depth_is_reached() {
        let km = Arc::new(KeyManager::new(Duration::from_secs(3600), Duration::from_secs(60)).unwrap());
        let revocation = Arc::new(RevocationCache::new(1000));
        let audit = Arc::new(AuditLogger::new(AuditLoggerConfig::for_tests(), "s".into()));
        let issuer = TokenIssuer::with_max_delegation_depth(km, revocation, audit, Duration::from_secs(300), 1);

        let root_cap = Capability::create(ResourceType::Filesystem, Constraints::new(), "A", "secret");
        let root_token = issuer.issue(&root_cap, None).await.unwrap();

        let child_cap = Capability::create(ResourceType::Filesystem, Constraints::new(), "B", "secret");
        let result = issuer.issue_delegated(&root_token, &child_cap, None).await;
        assert!(matches!(result, Err(TokenError::DelegationDepthExceeded { depth: 1, max: 1 })));
    }
}
