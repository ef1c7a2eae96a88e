//! Configuration for the security kernel, key manager, audit logger, and
//! violation monitor.
//!
//! Policies are resolved in the following order (later wins):
//!
//! 1. Compiled defaults (secure by default)
//! 2. Global config file (`meshguard-security.toml` or `.yaml`)
//! 3. Environment variables (`MESHGUARD_SECURITY_*`, plus the two dedicated
//!    secret variables below)
//!
//! ## Example
//!
//! ```rust,ignore
//! use meshguard_security::config::PolicyBuilder;
//!
//! let policy = PolicyBuilder::new()
//!     .with_file("config/security.toml")?
//!     .with_env()
//!     .build()?;
//!
//! assert!(policy.enabled);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::Validate;

/// The HMAC secret used to sign capabilities. Read from
/// `SECURITY_SIGNING_SECRET`; falls back to a compiled default outside
/// production mode.
pub const SIGNING_SECRET_ENV: &str = "SECURITY_SIGNING_SECRET";

/// The HMAC secret used to checksum audit entries. Read from
/// `AUDIT_CHECKSUM_SECRET`; falls back to a compiled default outside
/// production mode.
pub const AUDIT_CHECKSUM_SECRET_ENV: &str = "AUDIT_CHECKSUM_SECRET";

const DEV_SIGNING_SECRET_DEFAULT: &str = "meshguard-dev-signing-secret-do-not-use-in-production";
const DEV_AUDIT_SECRET_DEFAULT: &str = "meshguard-dev-audit-secret-do-not-use-in-production";

/// Errors that can occur during policy configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file at {path}: {source}")]
    FileRead {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse configuration.
    #[error("failed to parse {format} config: {source}")]
    ParseError {
        /// Format that failed to parse (YAML, TOML, JSON).
        format: String,
        /// Underlying parse error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Unsupported or unrecognised configuration file extension.
    #[error("unsupported config file format: {message}")]
    UnsupportedFormat {
        /// Description of the problem.
        message: String,
    },

    /// Configuration validation failed.
    #[error("policy validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// Environment variable parsing error.
    #[error("failed to parse environment variable {key}: {message}")]
    EnvParse {
        /// Environment variable key.
        key: String,
        /// Error message.
        message: String,
    },

    /// A required secret was missing in production mode.
    #[error("missing required secret {key} while running in production mode")]
    MissingSecret {
        /// Environment variable key that was missing.
        key: String,
    },
}

/// Deployment mode. Controls whether missing signing secrets are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Local development / tests: compiled-default secrets are acceptable.
    #[default]
    Development,
    /// Production: missing secrets are a hard configuration error.
    Production,
}

/// Sweep and timing knobs for the security kernel and its satellites.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SecurityPolicy {
    /// Policy version for compatibility tracking.
    #[validate(length(min = 1))]
    pub version: String,

    /// Global enable/disable flag.
    pub enabled: bool,

    /// Deployment mode; gates whether dev secret fallbacks are permitted.
    pub run_mode: RunMode,

    /// Interval between expired-capability sweeps (spec default: 5 minutes).
    #[serde(with = "duration_secs")]
    pub capability_sweep_interval: Duration,

    /// Clock-skew tolerance for token validation (spec default: 300s).
    #[serde(with = "duration_secs")]
    pub clock_skew_tolerance: Duration,

    /// Validator verdict cache TTL (spec default: ~30s).
    #[serde(with = "duration_secs")]
    pub validator_cache_ttl: Duration,

    /// Key rotation interval (spec default: 30 days).
    #[serde(with = "duration_secs")]
    pub key_rotation_interval: Duration,

    /// Overlap period during which a retired public key remains valid
    /// (spec default: 24h).
    #[serde(with = "duration_secs")]
    pub key_overlap_period: Duration,

    /// Audit buffer capacity before a forced flush (spec default: 100).
    pub audit_max_buffer_size: usize,

    /// Audit flush interval (spec default: 30s).
    #[serde(with = "duration_secs")]
    pub audit_flush_interval: Duration,

    /// Violation sliding-window width (spec default: 5 minutes).
    #[serde(with = "duration_secs")]
    pub violation_window: Duration,

    /// Violation alert cooldown (spec default: 15 minutes).
    #[serde(with = "duration_secs")]
    pub violation_cooldown: Duration,

    /// Directory audit log files are rolled into, one JSON-lines file per
    /// UTC day.
    pub audit_dir: PathBuf,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            enabled: true,
            run_mode: RunMode::Development,
            capability_sweep_interval: Duration::from_secs(5 * 60),
            clock_skew_tolerance: Duration::from_secs(300),
            validator_cache_ttl: Duration::from_secs(30),
            key_rotation_interval: Duration::from_secs(30 * 24 * 60 * 60),
            key_overlap_period: Duration::from_secs(24 * 60 * 60),
            audit_max_buffer_size: 100,
            audit_flush_interval: Duration::from_secs(30),
            violation_window: Duration::from_secs(5 * 60),
            violation_cooldown: Duration::from_secs(15 * 60),
            audit_dir: PathBuf::from("./audit"),
        }
    }
}

impl SecurityPolicy {
    /// Resolve the capability-signing secret per `run_mode`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] in production mode when
    /// [`SIGNING_SECRET_ENV`] is unset.
    pub fn signing_secret(&self) -> Result<String, ConfigError> {
        resolve_secret(self.run_mode, SIGNING_SECRET_ENV, DEV_SIGNING_SECRET_DEFAULT)
    }

    /// Resolve the audit-checksum secret per `run_mode`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] in production mode when
    /// [`AUDIT_CHECKSUM_SECRET_ENV`] is unset.
    pub fn audit_checksum_secret(&self) -> Result<String, ConfigError> {
        resolve_secret(
            self.run_mode,
            AUDIT_CHECKSUM_SECRET_ENV,
            DEV_AUDIT_SECRET_DEFAULT,
        )
    }
}

fn resolve_secret(mode: RunMode, key: &str, dev_default: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ if mode == RunMode::Production => Err(ConfigError::MissingSecret {
            key: key.to_string(),
        }),
        _ => Ok(dev_default.to_string()),
    }
}

/// Builder for constructing security policies from multiple sources.
#[derive(Debug, Default)]
pub struct PolicyBuilder {
    base: SecurityPolicy,
    use_env: bool,
}

impl PolicyBuilder {
    /// Create a new policy builder with secure defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: SecurityPolicy::default(),
            use_env: false,
        }
    }

    /// Load policy from a configuration file (YAML, TOML, or JSON).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let policy: SecurityPolicy = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => {
                serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                    format: "YAML".to_string(),
                    source: Box::new(e),
                })?
            }
            Some("toml") => toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                format: "TOML".to_string(),
                source: Box::new(e),
            })?,
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
                    format: "JSON".to_string(),
                    source: Box::new(e),
                })?
            }
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    message: "file extension must be .yaml, .yml, .toml, or .json".to_string(),
                });
            }
        };

        self.base = policy;
        Ok(self)
    }

    /// Enable loading overrides from environment variables, prefixed
    /// `MESHGUARD_SECURITY_`, e.g. `MESHGUARD_SECURITY_ENABLED=false`.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        self.use_env = true;
        self
    }

    /// Mark the policy as running in production, requiring real secrets.
    #[must_use]
    pub fn production(mut self) -> Self {
        self.base.run_mode = RunMode::Production;
        self
    }

    /// Build the final security policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if validation fails or environment variables
    /// are invalid.
    pub fn build(mut self) -> Result<SecurityPolicy, ConfigError> {
        if self.use_env {
            dotenvy::dotenv().ok();

            if let Ok(enabled) = std::env::var("MESHGUARD_SECURITY_ENABLED") {
                self.base.enabled = enabled.parse().map_err(|_| ConfigError::EnvParse {
                    key: "MESHGUARD_SECURITY_ENABLED".to_string(),
                    message: "must be 'true' or 'false'".to_string(),
                })?;
            }

            if let Ok(mode) = std::env::var("MESHGUARD_SECURITY_RUN_MODE") {
                self.base.run_mode = match mode.to_lowercase().as_str() {
                    "production" => RunMode::Production,
                    "development" => RunMode::Development,
                    _ => {
                        return Err(ConfigError::EnvParse {
                            key: "MESHGUARD_SECURITY_RUN_MODE".to_string(),
                            message: "must be 'production' or 'development'".to_string(),
                        });
                    }
                };
            }
        }

        self.base.validate()?;
        Ok(self.base)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_sane() {
        let policy = SecurityPolicy::default();
        assert!(policy.enabled);
        assert_eq!(policy.run_mode, RunMode::Development);
        assert_eq!(policy.audit_max_buffer_size, 100);
    }

    #[test]
    fn dev_mode_falls_back_to_compiled_secret() {
        let policy = SecurityPolicy::default();
        assert!(policy.signing_secret().is_ok());
    }

    #[test]
    fn production_mode_requires_secret() {
        // SAFETY: test runs single-threaded within this process's test harness
        // and only touches an env var scoped to this assertion.
        unsafe {
            std::env::remove_var(SIGNING_SECRET_ENV);
        }
        let mut policy = SecurityPolicy::default();
        policy.run_mode = RunMode::Production;
        assert!(matches!(
            policy.signing_secret(),
            Err(ConfigError::MissingSecret { .. })
        ));
    }

    #[test]
    fn policy_builder_round_trip() {
        let policy = PolicyBuilder::new().build().unwrap();
        assert!(policy.enabled);
    }
}
