//! The violation monitor (spec §4.14): sliding-window thresholds,
//! severity-classified alerts with cooldown, and a handful of pattern
//! detectors that run independently of the threshold logic.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The kind of violation being recorded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    InvalidCapability,
    PermissionDenied,
    RateLimitExceeded,
    TokenRevoked,
    SuspiciousPattern(SuspiciousPatternKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspiciousPatternKind {
    PathTraversalAttempt,
    PotentialBruteForce,
    PotentialDosAttack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A single violation event, as recorded by its detecting component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub id: String,
    pub violation_type: ViolationType,
    pub timestamp: DateTime<Utc>,
    pub principal_id: String,
    pub resource: String,
    pub operation: String,
    pub details: serde_json::Value,
}

impl ViolationRecord {
    #[must_use]
    pub fn new(
        violation_type: ViolationType,
        principal_id: impl Into<String>,
        resource: impl Into<String>,
        operation: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            violation_type,
            timestamp: Utc::now(),
            principal_id: principal_id.into(),
            resource: resource.into(),
            operation: operation.into(),
            details,
        }
    }
}

/// Emitted to subscribers once a type's sliding-window count reaches its
/// threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationAlert {
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub count: usize,
    pub threshold: u32,
    pub window: Duration,
    pub raised_at: DateTime<Utc>,
}

/// Per-type threshold and window configuration.
#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    pub threshold: u32,
    pub window: Duration,
    pub severity: Severity,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            threshold: 10,
            window: Duration::from_secs(5 * 60),
            severity: Severity::High,
        }
    }
}

struct TypeState {
    occurrences: VecDeque<DateTime<Utc>>,
    last_alert: Option<DateTime<Utc>>,
}

impl TypeState {
    fn new() -> Self {
        Self {
            occurrences: VecDeque::new(),
            last_alert: None,
        }
    }
}

struct MonitorState {
    by_type: FxHashMap<ViolationType, TypeState>,
    /// `principal -> invalid_capability timestamps`, used by the
    /// brute-force pattern detector (independent of the main threshold
    /// window).
    invalid_capability_by_principal: FxHashMap<String, VecDeque<DateTime<Utc>>>,
}

/// Tracks violations, raises threshold alerts with cooldown, and runs
/// pattern detectors.
pub struct ViolationMonitor {
    thresholds: FxHashMap<ViolationType, ThresholdConfig>,
    default_threshold: ThresholdConfig,
    cooldown: Duration,
    state: Mutex<MonitorState>,
}

impl ViolationMonitor {
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        Self {
            thresholds: FxHashMap::default(),
            default_threshold: ThresholdConfig::default(),
            cooldown,
            state: Mutex::new(MonitorState {
                by_type: FxHashMap::default(),
                invalid_capability_by_principal: FxHashMap::default(),
            }),
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, violation_type: ViolationType, config: ThresholdConfig) -> Self {
        self.thresholds.insert(violation_type, config);
        self
    }

    fn threshold_for(&self, violation_type: &ViolationType) -> &ThresholdConfig {
        self.thresholds.get(violation_type).unwrap_or(&self.default_threshold)
    }

    /// Record a violation, returning any alert raised as a result (main
    /// threshold logic) plus any pattern-detector alerts.
    pub fn record(&self, violation: &ViolationRecord) -> Vec<ViolationAlert> {
        let mut alerts = Vec::new();
        let now = violation.timestamp;

        {
            let config = self.threshold_for(&violation.violation_type).clone();
            let mut state = self.state.lock();
            let type_state = state
                .by_type
                .entry(violation.violation_type.clone())
                .or_insert_with(TypeState::new);

            type_state.occurrences.push_back(now);
            let cutoff = now - chrono::Duration::from_std(config.window).unwrap_or_default();
            while type_state
                .occurrences
                .front()
                .is_some_and(|t| *t < cutoff)
            {
                type_state.occurrences.pop_front();
            }

            let count = type_state.occurrences.len();
            let in_cooldown = type_state
                .last_alert
                .is_some_and(|last| now - last < chrono::Duration::from_std(self.cooldown).unwrap_or_default());

            if count as u32 >= config.threshold && !in_cooldown {
                type_state.last_alert = Some(now);
                let alert = ViolationAlert {
                    violation_type: violation.violation_type.clone(),
                    severity: config.severity,
                    count,
                    threshold: config.threshold,
                    window: config.window,
                    raised_at: now,
                };
                warn!(
                    violation_type = ?alert.violation_type,
                    severity = ?alert.severity,
                    count = alert.count,
                    "violation threshold alert"
                );
                alerts.push(alert);
            }
        }

        alerts.extend(self.run_pattern_detectors(violation));
        alerts
    }

    fn run_pattern_detectors(&self, violation: &ViolationRecord) -> Vec<ViolationAlert> {
        let mut alerts = Vec::new();

        if is_path_traversal(&violation.resource) {
            alerts.push(self.synthetic_alert(
                SuspiciousPatternKind::PathTraversalAttempt,
                1,
                1,
                Severity::Critical,
                violation.timestamp,
            ));
        }

        if violation.violation_type == ViolationType::InvalidCapability {
            let mut state = self.state.lock();
            let entries = state
                .invalid_capability_by_principal
                .entry(violation.principal_id.clone())
                .or_default();
            entries.push_back(violation.timestamp);
            let cutoff = violation.timestamp - chrono::Duration::minutes(5);
            while entries.front().is_some_and(|t| *t < cutoff) {
                entries.pop_front();
            }
            if entries.len() > 20 {
                alerts.push(self.synthetic_alert(
                    SuspiciousPatternKind::PotentialBruteForce,
                    entries.len(),
                    20,
                    Severity::High,
                    violation.timestamp,
                ));
            }
        }

        if violation.violation_type == ViolationType::RateLimitExceeded {
            if let Some(rate) = violation.details.get("requests_per_sec").and_then(|v| v.as_f64()) {
                if rate > 1000.0 {
                    alerts.push(self.synthetic_alert(
                        SuspiciousPatternKind::PotentialDosAttack,
                        rate as usize,
                        1000,
                        Severity::Critical,
                        violation.timestamp,
                    ));
                }
            }
        }

        alerts
    }

    fn synthetic_alert(
        &self,
        kind: SuspiciousPatternKind,
        count: usize,
        threshold: u32,
        severity: Severity,
        now: DateTime<Utc>,
    ) -> ViolationAlert {
        ViolationAlert {
            violation_type: ViolationType::SuspiciousPattern(kind),
            severity,
            count,
            threshold,
            window: Duration::from_secs(5 * 60),
            raised_at: now,
        }
    }
}

fn is_path_traversal(resource: &str) -> bool {
    resource.contains("../") || resource.contains("..\\") || resource.to_lowercase().contains("%2e%2e")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_s6_threshold_alert_then_cooldown_then_new_alert() {
        let monitor = ViolationMonitor::new(Duration::from_secs(15 * 60)).with_threshold(
            ViolationType::InvalidCapability,
            ThresholdConfig {
                threshold: 10,
                window: Duration::from_secs(5 * 60),
                severity: Severity::High,
            },
        );

        let base = Utc::now();
        let mut alerts_fired = 0;
        for i in 0..10 {
            let v = ViolationRecord {
                id: format!("v{i}"),
                violation_type: ViolationType::InvalidCapability,
                timestamp: base + chrono::Duration::seconds(i),
                principal_id: "X".to_string(),
                resource: "/tmp".to_string(),
                operation: "read".to_string(),
                details: serde_json::json!({}),
            };
            let alerts = monitor.record(&v);
            alerts_fired += alerts
                .iter()
                .filter(|a| a.violation_type == ViolationType::InvalidCapability)
                .count();
        }
        assert_eq!(alerts_fired, 1);

        // Second burst within cooldown produces no new alert.
        for i in 10..20 {
            let v = ViolationRecord {
                id: format!("v{i}"),
                violation_type: ViolationType::InvalidCapability,
                timestamp: base + chrono::Duration::seconds(i),
                principal_id: "X".to_string(),
                resource: "/tmp".to_string(),
                operation: "read".to_string(),
                details: serde_json::json!({}),
            };
            let alerts = monitor.record(&v);
            assert!(alerts
                .iter()
                .all(|a| a.violation_type != ViolationType::InvalidCapability));
        }

        // Third burst after cooldown produces a new alert.
        let after_cooldown = base + chrono::Duration::minutes(16);
        let mut third_burst_alert = false;
        for i in 0..10 {
            let v = ViolationRecord {
                id: format!("v3-{i}"),
                violation_type: ViolationType::InvalidCapability,
                timestamp: after_cooldown + chrono::Duration::seconds(i),
                principal_id: "X".to_string(),
                resource: "/tmp".to_string(),
                operation: "read".to_string(),
                details: serde_json::json!({}),
            };
            let alerts = monitor.record(&v);
            if alerts
                .iter()
                .any(|a| a.violation_type == ViolationType::InvalidCapability)
            {
                third_burst_alert = true;
            }
        }
        assert!(third_burst_alert);
    }

    #[test]
    fn detects_path_traversal_pattern() {
        let monitor = ViolationMonitor::new(Duration::from_secs(900));
        let v = ViolationRecord::new(
            ViolationType::PermissionDenied,
            "A",
            "/var/data/../../etc/passwd",
            "read",
            serde_json::json!({}),
        );
        let alerts = monitor.record(&v);
        assert!(alerts.iter().any(|a| matches!(
            a.violation_type,
            ViolationType::SuspiciousPattern(SuspiciousPatternKind::PathTraversalAttempt)
        )));
    }

    #[test]
    fn detects_brute_force_pattern_after_twenty_failures() {
        let monitor = ViolationMonitor::new(Duration::from_secs(900));
        let base = Utc::now();
        let mut detected = false;
        for i in 0..21 {
            let mut v = ViolationRecord::new(
                ViolationType::InvalidCapability,
                "X",
                "/tmp",
                "read",
                serde_json::json!({}),
            );
            v.timestamp = base + chrono::Duration::seconds(i);
            let alerts = monitor.record(&v);
            if alerts.iter().any(|a| matches!(
                a.violation_type,
                ViolationType::SuspiciousPattern(SuspiciousPatternKind::PotentialBruteForce)
            )) {
                detected = true;
            }
        }
        assert!(detected);
    }
}
