//! The token validator (spec §4.3): signature verification, expiry/skew
//! checks, revocation lookup, and a short-lived verdict cache so hot-path
//! callers don't re-verify the same token every request.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::instrument;

use crate::error::{DenialReason, TokenError};

use super::revocation::RevocationCache;
use super::{decode, Claims, KeyManager};

struct CachedVerdict {
    claims: Claims,
    cached_at: Instant,
}

/// Verifies tokens minted by [`super::TokenIssuer`].
pub struct TokenValidator {
    key_manager: Arc<KeyManager>,
    revocation: Arc<RevocationCache>,
    clock_skew: Duration,
    cache_ttl: Duration,
    verdict_cache: Mutex<FxHashMap<String, CachedVerdict>>,
}

impl TokenValidator {
    #[must_use]
    pub fn new(
        key_manager: Arc<KeyManager>,
        revocation: Arc<RevocationCache>,
        clock_skew: Duration,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            key_manager,
            revocation,
            clock_skew,
            cache_ttl,
            verdict_cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// Verify `token`'s signature, lifetime, and revocation status,
    /// returning its claims.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidTokenFormat`] if the token does not
    /// parse, [`TokenError::InvalidSignature`] if the signature does not
    /// verify against any known key, [`TokenError::TokenExpired`] /
    /// [`TokenError::TokenUsedBeforeIssued`] on lifetime violations, and
    /// [`TokenError::TokenRevoked`] if the `jti` is in the revocation cache.
    #[instrument(skip(self, token))]
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        if let Some(claims) = self.cached(token) {
            return Ok(claims);
        }

        let decoded = decode(token)?;
        if !self
            .key_manager
            .verify(&decoded.header.kid, decoded.signing_input.as_bytes(), &decoded.signature)
        {
            return Err(TokenError::InvalidSignature);
        }

        let now = Utc::now();
        let skew = chrono::Duration::from_std(self.clock_skew).unwrap_or_default();
        if decoded.claims.iat > now + skew {
            return Err(TokenError::TokenUsedBeforeIssued);
        }
        if decoded.claims.exp + skew < now {
            return Err(TokenError::TokenExpired);
        }
        if self.revocation.is_revoked(&decoded.claims.jti) {
            return Err(TokenError::TokenRevoked);
        }

        self.verdict_cache.lock().insert(
            token.to_string(),
            CachedVerdict {
                claims: decoded.claims.clone(),
                cached_at: Instant::now(),
            },
        );

        Ok(decoded.claims)
    }

    fn cached(&self, token: &str) -> Option<Claims> {
        let mut cache = self.verdict_cache.lock();
        let entry = cache.get(token)?;
        if entry.cached_at.elapsed() > self.cache_ttl {
            cache.remove(token);
            return None;
        }
        // A cached verdict is only trustworthy while the token is still
        // live in the revocation cache's absence; re-check revocation on
        // every call even for cache hits, since revocation can happen after
        // the verdict was cached.
        if self.revocation.is_revoked(&entry.claims.jti) {
            cache.remove(token);
            return None;
        }
        Some(entry.claims.clone())
    }

    /// Check that `claims` grants `operation` on `resource` (`"*"` in the
    /// operation list acts as a wildcard; the resource grant is matched
    /// segment-wise, `*`/`**`), and that `resource` satisfies every
    /// constraint carried in `claims.constraints`.
    ///
    /// # Errors
    ///
    /// Returns [`DenialReason`] describing the first mismatch.
    pub fn check_operation(&self, claims: &Claims, operation: &str, resource: &str) -> Result<(), DenialReason> {
        let op_ok = claims.operations.is_empty()
            || claims.operations.iter().any(|o| o == "*" || o == operation);
        if !op_ok {
            return Err(DenialReason::OperationNotPermitted {
                operation: operation.to_string(),
            });
        }
        let resource_ok = claims.resource.is_empty() || resource_matches(&claims.resource, resource);
        if !resource_ok {
            return Err(DenialReason::ResourceNotPermitted {
                resource: resource.to_string(),
            });
        }
        check_constraints(&claims.constraints, resource)
    }
}

/// Segment-wise resource matching: `*` matches exactly one path segment,
/// `**` matches zero or more segments. A pattern without wildcards is a
/// directory prefix: it grants itself and everything below it, matching the
/// plain path grant capabilities issue most often.
fn resource_matches(pattern: &str, resource: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return resource == pattern || resource.starts_with(&format!("{pattern}/"));
    }
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let resource_segments: Vec<&str> = resource.split('/').collect();
    segments_match(&pattern_segments, &resource_segments)
}

fn segments_match(pattern: &[&str], resource: &[&str]) -> bool {
    match pattern.first() {
        None => resource.is_empty(),
        Some(&"**") => {
            if pattern.len() == 1 {
                return true;
            }
            (0..=resource.len()).any(|i| segments_match(&pattern[1..], &resource[i..]))
        }
        Some(&"*") => !resource.is_empty() && segments_match(&pattern[1..], &resource[1..]),
        Some(seg) => resource.first() == Some(seg) && segments_match(&pattern[1..], &resource[1..]),
    }
}

/// Evaluate the constraints a token's underlying capability carried at issue
/// time against the resource being accessed right now.
fn check_constraints(constraints: &crate::capability::Constraints, resource: &str) -> Result<(), DenialReason> {
    if let Some(extensions) = &constraints.allowed_extensions {
        if !extensions.is_empty() {
            let extension = resource.rsplit('.').next().unwrap_or("");
            if !extensions.contains(extension) {
                return Err(DenialReason::InvalidConstraint {
                    constraint: "allowed_extensions".to_string(),
                    detail: format!("resource extension `{extension}` is not in the allowed set"),
                });
            }
        }
    }

    if let Some(window) = &constraints.time_window {
        if !time_window_allows(window, Utc::now()) {
            return Err(DenialReason::InvalidConstraint {
                constraint: "time_window".to_string(),
                detail: format!("current time falls outside window `{window}`"),
            });
        }
    }

    Ok(())
}

/// `window` is `"HH:MM-HH:MM"` in UTC; a window where start > end wraps past
/// midnight. An unparseable window fails open rather than denying every
/// request behind it.
fn time_window_allows(window: &str, now: chrono::DateTime<Utc>) -> bool {
    let Some((start, end)) = window.split_once('-') else {
        return true;
    };
    let (Ok(start), Ok(end)) = (
        chrono::NaiveTime::parse_from_str(start, "%H:%M"),
        chrono::NaiveTime::parse_from_str(end, "%H:%M"),
    ) else {
        return true;
    };

    let current = now.time();
    if start <= end {
        current >= start && current <= end
    } else {
        current >= start || current <= end
    }
}

#[cfg(test)]
mod tests {
    use super::super::issuer::TokenIssuer;
    use super::*;
    use crate::audit::{AuditLogger, AuditLoggerConfig};
    use crate::capability::{Capability, Constraints, ResourceType};

    async fn harness() -> (TokenIssuer, TokenValidator, Arc<RevocationCache>) {
        let km = Arc::new(KeyManager::new(Duration::from_secs(3600), Duration::from_secs(60)).unwrap());
        let revocation = Arc::new(RevocationCache::new(1000));
        let audit = Arc::new(AuditLogger::new(AuditLoggerConfig::for_tests(), "s".into()));
        let issuer = TokenIssuer::new(km.clone(), revocation.clone(), audit, Duration::from_secs(300));
        let validator = TokenValidator::new(km, revocation.clone(), Duration::from_secs(30), Duration::from_secs(30));
        (issuer, validator, revocation)
    }

    #[tokio::test]
    async fn validates_a_freshly_issued_token() {
        let (issuer, validator, _) = harness().await;
        let mut constraints = Constraints::new();
        constraints.operations = Some(["read".to_string()].into_iter().collect());
        constraints.paths = Some(vec!["/tmp".to_string()]);
        let cap = Capability::create(ResourceType::Filesystem, constraints, "A", "secret");
        let token = issuer.issue(&cap, None).await.unwrap();

        let claims = validator.validate(&token).unwrap();
        assert_eq!(claims.sub, "A");
        assert!(validator.check_operation(&claims, "read", "/tmp/file").is_ok());
        assert!(validator.check_operation(&claims, "write", "/tmp/file").is_err());
    }

    #[tokio::test]
    async fn revoked_token_fails_validation() {
        let (issuer, validator, _) = harness().await;
        let cap = Capability::create(ResourceType::Filesystem, Constraints::new(), "A", "secret");
        let token = issuer.issue(&cap, None).await.unwrap();
        assert!(validator.validate(&token).is_ok());

        issuer.revoke(&token).await.unwrap();
        assert!(matches!(validator.validate(&token), Err(TokenError::TokenRevoked)));
    }

    #[tokio::test]
    async fn tampered_token_fails_signature_check() {
        let (issuer, validator, _) = harness().await;
        let cap = Capability::create(ResourceType::Filesystem, Constraints::new(), "A", "secret");
        let token = issuer.issue(&cap, None).await.unwrap();
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(validator.validate(&tampered).is_err());
    }

    #[test]
    fn single_star_matches_exactly_one_segment() {
        assert!(resource_matches("/repos/*/issues", "/repos/meshguard/issues"));
        assert!(!resource_matches("/repos/*/issues", "/repos/a/b/issues"));
    }

    #[test]
    fn double_star_matches_across_segments() {
        assert!(resource_matches("/repos/**", "/repos/a/b/c"));
        assert!(resource_matches("/repos/**", "/repos"));
        assert!(resource_matches("/a/**/z", "/a/b/c/z"));
        assert!(!resource_matches("/a/**/z", "/a/b/c"));
    }

    #[test]
    fn literal_segments_must_match_exactly() {
        assert!(!resource_matches("/repos/meshguard", "/repos/other"));
        assert!(resource_matches("/repos/meshguard", "/repos/meshguard"));
    }

    #[tokio::test]
    async fn allowed_extensions_constraint_rejects_other_extensions() {
        let (issuer, validator, _) = harness().await;
        let mut constraints = Constraints::new();
        constraints.paths = Some(vec!["/tmp".to_string()]);
        constraints.allowed_extensions = Some(["txt".to_string()].into_iter().collect());
        let cap = Capability::create(ResourceType::Filesystem, constraints, "A", "secret");
        let token = issuer.issue(&cap, None).await.unwrap();
        let claims = validator.validate(&token).unwrap();

        assert!(validator.check_operation(&claims, "read", "/tmp/a.txt").is_ok());
        assert!(matches!(
            validator.check_operation(&claims, "read", "/tmp/a.exe"),
            Err(DenialReason::InvalidConstraint { .. })
        ));
    }

    #[tokio::test]
    async fn time_window_constraint_denies_outside_the_window() {
        let (issuer, validator, _) = harness().await;
        let mut constraints = Constraints::new();
        constraints.paths = Some(vec!["/tmp".to_string()]);
        // A window that can never contain the current instant, regardless of
        // when this test runs.
        constraints.time_window = Some("00:00-00:00".to_string());
        let cap = Capability::create(ResourceType::Filesystem, constraints, "A", "secret");
        let token = issuer.issue(&cap, None).await.unwrap();
        let claims = validator.validate(&token).unwrap();

        assert!(matches!(
            validator.check_operation(&claims, "read", "/tmp/a.txt"),
            Err(DenialReason::InvalidConstraint { .. })
        ));
    }
}
