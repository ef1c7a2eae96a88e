//! Typed error kinds for the capability and token subsystems.
//!
//! Mirrors the teacher's split between fatal structural errors
//! (`SecurityError`) and the narrower, caller-facing reasons returned by
//! `permits`/token validation (`DenialReason`). Every variant here is named
//! directly from spec §7.

use miette::Diagnostic;
use thiserror::Error;

/// Reasons a capability or token check can be denied. Distinct from
/// [`SecurityError`] because callers branch on denial reasons far more
/// often than on structural failures.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum DenialReason {
    /// The operation is not present in the capability's `operations` set.
    #[error("operation not permitted: {operation}")]
    OperationNotPermitted { operation: String },

    /// The resource does not match the capability's `resource`/`paths`
    /// constraints.
    #[error("resource not permitted: {resource}")]
    ResourceNotPermitted { resource: String },

    /// The tool is not present in `allowed_tools`.
    #[error("tool not allowed: {tool}")]
    ToolNotAllowed { tool: String },

    /// The resource path fell outside every allowed path prefix.
    #[error("path not allowed: {path}")]
    PathNotAllowed { path: String },

    /// A named constraint failed validation (e.g. `max_file_size`,
    /// `allowed_extensions`, `rate_limit`, `time_window`).
    #[error("invalid {constraint} constraint: {detail}")]
    InvalidConstraint { constraint: String, detail: String },

    /// No capability belonging to the principal matched the request.
    #[error("permission denied")]
    PermissionDenied,

    /// The capability (or every capability of the principal) has expired.
    #[error("capability expired")]
    CapabilityExpired,

    /// The capability has been revoked, directly or by cascade.
    #[error("capability invalid: revoked")]
    CapabilityInvalid,
}

/// Structural and lifecycle errors from the capability model and security
/// kernel.
#[derive(Debug, Error, Diagnostic)]
pub enum SecurityError {
    #[error("invalid capability structure: {0}")]
    #[diagnostic(code(meshguard_security::invalid_capability_structure))]
    InvalidCapabilityStructure(String),

    #[error("missing signature")]
    #[diagnostic(code(meshguard_security::missing_signature))]
    MissingSignature,

    #[error("invalid signature")]
    #[diagnostic(code(meshguard_security::invalid_signature))]
    InvalidSignature,

    #[error("capability expired")]
    #[diagnostic(code(meshguard_security::capability_expired))]
    CapabilityExpired,

    #[error("capability not found: {0}")]
    #[diagnostic(code(meshguard_security::capability_not_found))]
    CapabilityNotFound(String),

    #[error("capability signature mismatch")]
    #[diagnostic(code(meshguard_security::capability_signature_mismatch))]
    CapabilitySignatureMismatch,

    #[error("delegation not allowed: {0}")]
    #[diagnostic(code(meshguard_security::delegation_not_allowed))]
    DelegationNotAllowed(String),

    #[error("delegation depth exceeded: depth {depth} >= max {max}")]
    #[diagnostic(code(meshguard_security::delegation_depth_exceeded))]
    DelegationDepthExceeded { depth: u32, max: u32 },

    #[error(transparent)]
    #[diagnostic(code(meshguard_security::denied))]
    Denied(#[from] DenialReason),

    #[error("policy rejected request: {0}")]
    #[diagnostic(code(meshguard_security::policy_rejected))]
    PolicyRejected(String),

    #[error(transparent)]
    #[diagnostic(code(meshguard_security::config))]
    Config(#[from] crate::config::ConfigError),
}

/// Token issuance and validation errors.
#[derive(Debug, Error, Diagnostic)]
pub enum TokenError {
    #[error("invalid token format")]
    #[diagnostic(code(meshguard_security::invalid_token_format))]
    InvalidTokenFormat,

    #[error("token expired")]
    #[diagnostic(code(meshguard_security::token_expired))]
    TokenExpired,

    #[error("token used before issued")]
    #[diagnostic(code(meshguard_security::token_used_before_issued))]
    TokenUsedBeforeIssued,

    #[error("token revoked")]
    #[diagnostic(code(meshguard_security::token_revoked))]
    TokenRevoked,

    #[error("missing required claims: {0}")]
    #[diagnostic(code(meshguard_security::missing_required_claims))]
    MissingRequiredClaims(String),

    #[error("no verification keys available")]
    #[diagnostic(code(meshguard_security::no_verification_keys))]
    NoVerificationKeys,

    #[error("invalid signature")]
    #[diagnostic(code(meshguard_security::invalid_signature))]
    InvalidSignature,

    #[error(transparent)]
    #[diagnostic(code(meshguard_security::denied))]
    Denied(#[from] DenialReason),

    #[error("delegation depth exceeded: depth {depth} >= max {max}")]
    #[diagnostic(code(meshguard_security::delegation_depth_exceeded))]
    DelegationDepthExceeded { depth: u32, max: u32 },
}

/// Recovery / snapshot errors, shared with `meshguard`'s recovery module.
#[derive(Debug, Error, Diagnostic)]
pub enum RecoveryError {
    #[error("no backups found")]
    NoBackupsFound,

    #[error("backup not found: {0}")]
    BackupNotFound(String),

    #[error("backup too old: captured at {captured_at}, max age {max_age_days} days")]
    BackupTooOld {
        captured_at: chrono::DateTime<chrono::Utc>,
        max_age_days: i64,
    },

    #[error("missing required fields: {0}")]
    MissingFields(String),

    #[error("missing metadata: {0}")]
    MissingMetadata(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
