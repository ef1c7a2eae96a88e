//! # meshguard
//!
//! Agent orchestration core for a chat/automation platform: a supervised
//! agent runtime, a bounded worker pool, a distributed agent registry and
//! cluster placement layer, and a workflow coordinator for multi-step
//! delegation between agents.
//!
//! ## Core Concepts
//!
//! - [`agent`] — the base `Agent` contract, the actor wrapper that runs it
//!   (`AgentHandle`), and the supervisor enforcing restart policy
//! - [`pool`] — bounds how many worker agents run concurrently, queueing
//!   the rest
//! - [`session`] — tracks which subagents belong to which session
//! - [`registry`] — an eventually-consistent map of agent metadata used to
//!   pick the best agent for a task
//! - [`cluster`] — node membership, health, and placement strategy
//! - [`workflow`] — drives a dependent sequence of task steps to completion
//! - [`metrics`] — health-score blending and JSON snapshot recovery
//! - [`event_bus`] — pub/sub event distribution to pluggable sinks
//! - [`config`] — CLI flags and the resolved runtime configuration
//! - [`runtime`] — the top-level orchestrator wiring every component
//!   together
//! - [`api`] — the HTTP/JSON surface's typed handlers and DTOs
//!
//! Capability checks at agent dispatch and workflow step boundaries are
//! backed by the companion `meshguard-security` crate: agents never hold
//! ambient authority, only what a signed capability grants them.
//!
//! ## Quick Start
//!
//! ```no_run
//! use meshguard::config::RuntimeConfig;
//! use meshguard::runtime::{Orchestrator, Secrets};
//!
//! # async fn example() {
//! let config = RuntimeConfig::default();
//! let secrets = Secrets {
//!     signing_secret: "dev-signing-secret".to_string(),
//!     audit_checksum_secret: "dev-audit-secret".to_string(),
//! };
//! let mut orchestrator = Orchestrator::new(config, secrets);
//! orchestrator.spawn_background_tasks(|| 0);
//! # }
//! ```

pub mod agent;
pub mod api;
pub mod channels;
pub mod cluster;
pub mod config;
pub mod event_bus;
pub mod message;
pub mod metrics;
pub mod pool;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod telemetry;
pub mod types;
pub mod workflow;
