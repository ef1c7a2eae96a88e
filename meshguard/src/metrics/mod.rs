//! Metrics Collector and Recovery (spec §4.15): a 24h-retention time series
//! sampled every 30s, a blended health score, and JSON snapshot backup/
//! restore.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use meshguard_security::kernel::KernelStats;

pub const DEFAULT_SAMPLE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
pub const RETENTION: chrono::Duration = chrono::Duration::hours(24);
pub const DEFAULT_BACKUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);
pub const DEFAULT_BACKUP_RETENTION: usize = 24;
const MAX_SNAPSHOT_AGE: chrono::Duration = chrono::Duration::days(7);

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("no backups found in the configured directory")]
    NoBackupsFound,
    #[error("backup `{0}` not found")]
    BackupNotFound(String),
    #[error("backup is older than the 7-day staleness limit")]
    BackupTooOld,
    #[error("snapshot is missing required field `{0}`")]
    MissingFields(&'static str),
    #[error("snapshot is missing component metadata")]
    MissingMetadata,
    #[error("snapshot timestamp could not be parsed")]
    InvalidTimestamp,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// One sample in the metrics time series.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSample {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub capability_count: u64,
    pub permission_checks: u64,
    pub permission_denials: u64,
    pub validation_latency_ms: f64,
    pub audit_errors: u64,
    pub active_violation_alerts: usize,
}

/// Per-component scores (0-100, higher is healthier) plus the blended
/// overall score backing `GET /health` (spec §6, §4.15; SPEC_FULL §11
/// supplemental structured health report).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HealthReport {
    pub kernel_score: f64,
    pub violation_score: f64,
    pub capability_score: f64,
    pub validation_latency_score: f64,
    pub audit_score: f64,
    pub overall: f64,
}

impl HealthReport {
    fn blend(kernel: f64, violation: f64, capability: f64, latency: f64, audit: f64) -> Self {
        let overall = 0.30 * kernel + 0.25 * violation + 0.20 * capability + 0.15 * latency + 0.10 * audit;
        Self { kernel_score: kernel, violation_score: violation, capability_score: capability, validation_latency_score: latency, audit_score: audit, overall }
    }
}

/// Samples kernel/violation/audit state into an in-memory time series and
/// blends the latest sample into a [`HealthReport`].
#[derive(Clone)]
pub struct MetricsCollector {
    samples: Arc<RwLock<VecDeque<MetricsSample>>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self { samples: Arc::new(RwLock::new(VecDeque::new())) }
    }

    /// Take one sample from the current kernel/violation/audit state and
    /// retain it, evicting anything older than 24h. `active_violation_alerts`
    /// is the count of alerts the owning runtime has seen from
    /// `ViolationMonitor::record` within its own alerting window; the
    /// collector itself does not query the monitor directly.
    pub fn sample(
        &self,
        kernel_stats: &KernelStats,
        active_violation_alerts: usize,
        validation_latency_ms: f64,
        audit_errors: u64,
    ) -> MetricsSample {
        let sample = MetricsSample {
            timestamp: chrono::Utc::now(),
            capability_count: kernel_stats.capabilities_created.saturating_sub(kernel_stats.capabilities_revoked),
            permission_checks: kernel_stats.permission_checks,
            permission_denials: kernel_stats.permission_denials,
            validation_latency_ms,
            audit_errors,
            active_violation_alerts,
        };

        let mut guard = self.samples.write();
        guard.push_back(sample.clone());
        let cutoff = chrono::Utc::now() - RETENTION;
        while guard.front().is_some_and(|s| s.timestamp < cutoff) {
            guard.pop_front();
        }
        sample
    }

    #[must_use]
    pub fn series(&self) -> Vec<MetricsSample> {
        self.samples.read().iter().cloned().collect()
    }

    #[must_use]
    pub fn health_report(&self) -> HealthReport {
        let Some(latest) = self.samples.read().back().cloned() else {
            return HealthReport::blend(100.0, 100.0, 100.0, 100.0, 100.0);
        };

        let kernel_score = if latest.permission_checks == 0 {
            100.0
        } else {
            let denial_rate = latest.permission_denials as f64 / latest.permission_checks as f64;
            (100.0 * (1.0 - denial_rate)).clamp(0.0, 100.0)
        };

        let violation_score = (100.0 - 20.0 * latest.active_violation_alerts as f64).clamp(0.0, 100.0);
        let capability_score = (latest.capability_count as f64).min(1000.0) / 10.0;
        let validation_latency_score = (100.0 - latest.validation_latency_ms).clamp(0.0, 100.0);
        let audit_score = if latest.audit_errors == 0 { 100.0 } else { (100.0 - 10.0 * latest.audit_errors as f64).clamp(0.0, 100.0) };

        HealthReport::blend(kernel_score, violation_score, capability_score, validation_latency_score, audit_score)
    }
}

/// The four component states a recovery snapshot carries (spec §4.15).
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct RecoverySnapshot {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub security: Option<serde_json::Value>,
    pub agents: Option<serde_json::Value>,
    pub sessions: Option<serde_json::Value>,
    pub config: Option<serde_json::Value>,
}

/// The four recoverable components, in the priority order `cold_recovery`
/// restores them (spec §4.15).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    Security,
    Config,
    Agents,
    Sessions,
}

const COLD_RECOVERY_ORDER: [Component; 4] = [Component::Security, Component::Config, Component::Agents, Component::Sessions];

/// Applies one recovered component's JSON payload back into live runtime
/// state. `RecoveryManager` lives in `metrics` and has no access to
/// `SecurityKernel`/`AgentPool`/`SessionManager`/`RuntimeConfig` — those
/// live in other modules and crates — so restoration itself is delegated
/// to a caller-supplied implementation, the same caller-supplied-behavior
/// pattern [`crate::cluster::supervisor::RestartFactory`] uses for agent
/// reconstruction.
pub trait RecoveryTarget {
    fn restore_security(&self, value: &serde_json::Value);
    fn restore_config(&self, value: &serde_json::Value);
    fn restore_agents(&self, value: &serde_json::Value);
    fn restore_sessions(&self, value: &serde_json::Value);
}

/// Produces and restores JSON snapshots under a backup directory, retaining
/// at most `retain` of the newest (spec §4.15, §6).
pub struct RecoveryManager {
    backup_dir: std::path::PathBuf,
    retain: usize,
}

impl RecoveryManager {
    #[must_use]
    pub fn new(backup_dir: impl Into<std::path::PathBuf>, retain: usize) -> Self {
        Self { backup_dir: backup_dir.into(), retain }
    }

    pub async fn backup(&self, snapshot: &RecoverySnapshot) -> Result<std::path::PathBuf, RecoveryError> {
        tokio::fs::create_dir_all(&self.backup_dir).await?;
        let filename = format!("backup_{}.json", snapshot.timestamp.to_rfc3339());
        let path = self.backup_dir.join(filename);
        let json = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&path, json).await?;
        self.prune_old_backups().await?;
        Ok(path)
    }

    async fn prune_old_backups(&self) -> Result<(), RecoveryError> {
        let mut entries = self.list_backups().await?;
        entries.sort_by(|a, b| b.cmp(a));
        for stale in entries.into_iter().skip(self.retain) {
            let _ = tokio::fs::remove_file(self.backup_dir.join(stale)).await;
        }
        Ok(())
    }

    async fn list_backups(&self) -> Result<Vec<String>, RecoveryError> {
        let mut names = Vec::new();
        let mut read_dir = match tokio::fs::read_dir(&self.backup_dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = read_dir.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with("backup_") && name.ends_with(".json") {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    fn validate(snapshot: &RecoverySnapshot) -> Result<(), RecoveryError> {
        let age = chrono::Utc::now().signed_duration_since(snapshot.timestamp);
        if age > MAX_SNAPSHOT_AGE {
            return Err(RecoveryError::BackupTooOld);
        }
        if snapshot.security.is_none() && snapshot.agents.is_none() && snapshot.sessions.is_none() && snapshot.config.is_none() {
            return Err(RecoveryError::MissingMetadata);
        }
        Ok(())
    }

    async fn load(&self, backup_id: &str) -> Result<RecoverySnapshot, RecoveryError> {
        let path = self.backup_dir.join(backup_id);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RecoveryError::BackupNotFound(backup_id.to_string())
            } else {
                RecoveryError::Io(e)
            }
        })?;
        let snapshot: RecoverySnapshot = serde_json::from_slice(&bytes)?;
        Self::validate(&snapshot)?;
        Ok(snapshot)
    }

    /// Restore all four components into `target`, in priority order
    /// {security, config, agents, sessions} (spec §4.15).
    pub async fn cold_recovery(&self, backup_id: &str, target: &dyn RecoveryTarget) -> Result<RecoverySnapshot, RecoveryError> {
        let snapshot = self.load(backup_id).await?;
        self.apply(&snapshot, &COLD_RECOVERY_ORDER, target);
        Ok(snapshot)
    }

    /// Restore only the named components into `target`.
    pub async fn partial_recovery(&self, backup_id: &str, components: &[Component], target: &dyn RecoveryTarget) -> Result<RecoverySnapshot, RecoveryError> {
        let snapshot = self.load(backup_id).await?;
        if components.is_empty() {
            return Err(RecoveryError::MissingFields("components"));
        }
        self.apply(&snapshot, components, target);
        Ok(snapshot)
    }

    fn apply(&self, snapshot: &RecoverySnapshot, components: &[Component], target: &dyn RecoveryTarget) {
        for component in components {
            match component {
                Component::Security => {
                    if let Some(value) = &snapshot.security {
                        target.restore_security(value);
                    }
                }
                Component::Config => {
                    if let Some(value) = &snapshot.config {
                        target.restore_config(value);
                    }
                }
                Component::Agents => {
                    if let Some(value) = &snapshot.agents {
                        target.restore_agents(value);
                    }
                }
                Component::Sessions => {
                    if let Some(value) = &snapshot.sessions {
                        target.restore_sessions(value);
                    }
                }
            }
        }
    }

    /// Most recent backup id, for `cold_recovery` without an explicit
    /// argument.
    pub async fn latest_backup_id(&self) -> Result<String, RecoveryError> {
        let mut entries = self.list_backups().await?;
        entries.sort();
        entries.pop().ok_or(RecoveryError::NoBackupsFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingTarget {
        restored: StdMutex<Vec<(&'static str, serde_json::Value)>>,
    }

    impl RecoveryTarget for RecordingTarget {
        fn restore_security(&self, value: &serde_json::Value) {
            self.restored.lock().push(("security", value.clone()));
        }
        fn restore_config(&self, value: &serde_json::Value) {
            self.restored.lock().push(("config", value.clone()));
        }
        fn restore_agents(&self, value: &serde_json::Value) {
            self.restored.lock().push(("agents", value.clone()));
        }
        fn restore_sessions(&self, value: &serde_json::Value) {
            self.restored.lock().push(("sessions", value.clone()));
        }
    }

    #[test]
    fn health_report_defaults_to_perfect_score_with_no_samples() {
        let collector = MetricsCollector::new();
        assert_eq!(collector.health_report().overall, 100.0);
    }

    #[tokio::test]
    async fn recovery_rejects_a_snapshot_older_than_seven_days() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RecoveryManager::new(dir.path(), 24);
        let stale = RecoverySnapshot {
            timestamp: chrono::Utc::now() - chrono::Duration::days(10),
            security: Some(serde_json::json!({})),
            ..Default::default()
        };
        let path = manager.backup(&stale).await.unwrap();
        let backup_id = path.file_name().unwrap().to_str().unwrap();
        let target = RecordingTarget::default();
        let err = manager.cold_recovery(backup_id, &target).await.unwrap_err();
        assert!(matches!(err, RecoveryError::BackupTooOld));
    }

    #[tokio::test]
    async fn cold_recovery_applies_every_present_component_in_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RecoveryManager::new(dir.path(), 24);
        let snapshot = RecoverySnapshot {
            timestamp: chrono::Utc::now(),
            security: Some(serde_json::json!({"capabilities_created": 4})),
            config: Some(serde_json::json!({"max_concurrent": 16})),
            agents: Some(serde_json::json!({"completed": 9, "failed": 1})),
            sessions: Some(serde_json::json!([])),
        };
        let path = manager.backup(&snapshot).await.unwrap();
        let backup_id = path.file_name().unwrap().to_str().unwrap();

        let target = RecordingTarget::default();
        manager.cold_recovery(backup_id, &target).await.unwrap();

        let restored = target.restored.lock();
        let order: Vec<&str> = restored.iter().map(|(name, _)| *name).collect();
        assert_eq!(order, vec!["security", "config", "agents", "sessions"]);
    }

    #[tokio::test]
    async fn partial_recovery_only_applies_the_named_components() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RecoveryManager::new(dir.path(), 24);
        let snapshot = RecoverySnapshot {
            timestamp: chrono::Utc::now(),
            security: Some(serde_json::json!({"capabilities_created": 4})),
            agents: Some(serde_json::json!({"completed": 9, "failed": 1})),
            ..Default::default()
        };
        let path = manager.backup(&snapshot).await.unwrap();
        let backup_id = path.file_name().unwrap().to_str().unwrap();

        let target = RecordingTarget::default();
        manager.partial_recovery(backup_id, &[Component::Agents], &target).await.unwrap();

        let restored = target.restored.lock();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].0, "agents");
    }

    #[tokio::test]
    async fn backup_prunes_beyond_retention_count() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RecoveryManager::new(dir.path(), 2);
        for i in 0..4 {
            let snapshot = RecoverySnapshot {
                timestamp: chrono::Utc::now() + chrono::Duration::seconds(i),
                security: Some(serde_json::json!({"n": i})),
                ..Default::default()
            };
            manager.backup(&snapshot).await.unwrap();
        }
        assert_eq!(manager.list_backups().await.unwrap().len(), 2);
    }
}
