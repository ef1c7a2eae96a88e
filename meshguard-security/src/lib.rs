//! # meshguard-security
//!
//! The capability-security kernel backing the `meshguard` agent
//! orchestration core.
//!
//! Agents never hold ambient authority: every filesystem, tool, or network
//! access is gated by a signed [`capability::Capability`], issued and
//! tracked by a single-writer [`kernel::SecurityKernel`]. Capabilities can
//! be delegated to sub-agents — the child's constraints are always the
//! intersection of the parent's, so authority only ever narrows down a
//! delegation chain — and revoking a capability cascades to every
//! descendant it delegated.
//!
//! For transport across process or network boundaries, capabilities are
//! exchanged as compact signed [`token::Claims`] via [`token::TokenIssuer`]
//! and [`token::TokenValidator`]; [`token::KeyManager`] rotates the signing
//! keypair on a schedule with an overlap window so in-flight tokens don't
//! go stale mid-rotation.
//!
//! Every lifecycle event is recorded by [`audit::AuditLogger`] with a
//! per-node monotonic sequence number and an HMAC checksum, and
//! [`violation::ViolationMonitor`] watches the stream of denials for
//! threshold breaches and known attack patterns (path traversal, brute
//! force, DoS).
//!
//! ## Modules
//!
//! - [`config`] – policy configuration, builder pattern, YAML/TOML/env loading
//! - [`capability`] – the capability model: create, validate, permit checks, delegation
//! - [`kernel`] – the single-writer authority storing and validating capabilities
//! - [`token`] – signed bearer tokens: key manager, issuer, validator, revocation cache
//! - [`audit`] – buffered, checksummed audit trail with pluggable destinations
//! - [`violation`] – sliding-window thresholds and attack-pattern detectors
//! - [`error`] – typed error kinds shared across the crate

#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod audit;
pub mod capability;
pub mod config;
pub mod error;
pub mod kernel;
pub mod token;
pub mod violation;

/// Re-exports for convenient access to the crate's core types.
pub mod prelude {
    pub use crate::audit::{AuditDestination, AuditEntry, AuditEventType, AuditLogger, AuditLoggerConfig};
    pub use crate::capability::{Capability, Constraints, MaxDelegations, ResourceType};
    pub use crate::config::{PolicyBuilder, RunMode, SecurityPolicy};
    pub use crate::error::{DenialReason, RecoveryError, SecurityError, TokenError};
    pub use crate::kernel::{KernelPolicies, KernelStats, SecurityKernel};
    pub use crate::token::{Claims, KeyManager, RevocationCache, TokenIssuer, TokenValidator};
    pub use crate::violation::{Severity, ViolationAlert, ViolationMonitor, ViolationRecord, ViolationType};
}
