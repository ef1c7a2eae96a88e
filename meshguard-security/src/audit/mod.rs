//! The audit logger (spec §4.13): a buffered, checksummed, append-only
//! event trail with pluggable destinations.
//!
//! Entries are buffered in memory up to `max_buffer_size` and flushed on
//! buffer-full or on a periodic tick; `log_sync` bypasses the buffer
//! entirely for callers that need a durability guarantee before
//! proceeding (mirrors the teacher's distinction between buffered event
//! emission and synchronous checkpoint writes).

mod destinations;

pub use destinations::{AuditDestination, FileDestination, StructuredLogDestination, SyslogDestination};

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use ring::hmac;
use serde::{Deserialize, Serialize};
use tracing::error;

/// The class of event recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    CapabilityCreated,
    CapabilityDelegated,
    CapabilityRevoked,
    PermissionChecked,
    PermissionDenied,
    TokenIssued,
    TokenRevoked,
    TokenValidationFailed,
    ViolationDetected,
    AlertRaised,
}

/// An immutable audit record (spec §3, "Audit Entry").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub sequence_number: u64,
    pub event_type: AuditEventType,
    pub principal_id: String,
    pub details: serde_json::Value,
    pub node: String,
    /// HMAC-SHA256 over the canonical form of every other field, hex.
    pub checksum: String,
}

fn canonical_form(entry: &AuditEntry) -> String {
    format!(
        "{}|{}|{:?}|{}|{}|{}",
        entry.timestamp.to_rfc3339(),
        entry.sequence_number,
        entry.event_type,
        entry.principal_id,
        entry.node,
        entry.details
    )
}

fn checksum(entry: &AuditEntry, secret: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let tag = hmac::sign(&key, canonical_form(entry).as_bytes());
    tag.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

/// Configuration for the audit logger.
#[derive(Debug, Clone)]
pub struct AuditLoggerConfig {
    pub max_buffer_size: usize,
    pub flush_interval: Duration,
    pub node_id: String,
    pub audit_dir: PathBuf,
}

impl AuditLoggerConfig {
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            max_buffer_size: 100,
            flush_interval: Duration::from_secs(30),
            node_id: "test-node".to_string(),
            audit_dir: std::env::temp_dir().join("meshguard-audit-tests"),
        }
    }
}

struct LoggerState {
    buffer: Vec<AuditEntry>,
    flush_errors: u64,
}

/// Buffered audit logger with sequence-numbered, checksummed entries.
pub struct AuditLogger {
    config: AuditLoggerConfig,
    secret: String,
    sequence: AtomicU64,
    state: Mutex<LoggerState>,
    destinations: Vec<Box<dyn AuditDestination>>,
}

impl AuditLogger {
    #[must_use]
    pub fn new(config: AuditLoggerConfig, secret: String) -> Self {
        let destinations: Vec<Box<dyn AuditDestination>> = vec![
            Box::new(StructuredLogDestination),
            Box::new(FileDestination::new(config.audit_dir.clone())),
        ];
        Self {
            config,
            secret,
            sequence: AtomicU64::new(0),
            state: Mutex::new(LoggerState {
                buffer: Vec::new(),
                flush_errors: 0,
            }),
            destinations,
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn build_entry(
        &self,
        event_type: AuditEventType,
        principal_id: &str,
        details: serde_json::Value,
    ) -> AuditEntry {
        let mut entry = AuditEntry {
            timestamp: Utc::now(),
            sequence_number: self.next_sequence(),
            event_type,
            principal_id: principal_id.to_string(),
            details,
            node: self.config.node_id.clone(),
            checksum: String::new(),
        };
        entry.checksum = checksum(&entry, &self.secret);
        entry
    }

    /// Buffer an audit entry; flushes immediately if the buffer is full.
    pub async fn log(
        &self,
        event_type: AuditEventType,
        principal_id: &str,
        details: serde_json::Value,
    ) {
        let entry = self.build_entry(event_type, principal_id, details);
        let should_flush = {
            let mut state = self.state.lock();
            state.buffer.push(entry);
            state.buffer.len() >= self.config.max_buffer_size
        };
        if should_flush {
            self.flush().await;
        }
    }

    /// Write an audit entry immediately, bypassing the buffer.
    pub async fn log_sync(
        &self,
        event_type: AuditEventType,
        principal_id: &str,
        details: serde_json::Value,
    ) {
        let entry = self.build_entry(event_type, principal_id, details);
        self.write(std::slice::from_ref(&entry)).await;
    }

    /// Flush every buffered entry to every configured destination.
    pub async fn flush(&self) {
        let drained: Vec<AuditEntry> = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.buffer)
        };
        if drained.is_empty() {
            return;
        }
        self.write(&drained).await;
    }

    async fn write(&self, entries: &[AuditEntry]) {
        for dest in &self.destinations {
            if let Err(err) = dest.write(entries).await {
                error!(error = %err, "audit destination write failed");
                self.state.lock().flush_errors += 1;
            }
        }
    }

    /// Recompute checksums for every buffered (not-yet-flushed) entry and
    /// return the count whose stored checksum no longer matches.
    #[must_use]
    pub fn verify_integrity(&self) -> TamperReport {
        let state = self.state.lock();
        let mut tampered_ids = Vec::new();
        for entry in &state.buffer {
            let recomputed = checksum(entry, &self.secret);
            if recomputed != entry.checksum {
                tampered_ids.push(entry.sequence_number);
            }
        }
        TamperReport {
            checked: state.buffer.len(),
            tampered: tampered_ids,
        }
    }

    #[must_use]
    pub fn flush_error_count(&self) -> u64 {
        self.state.lock().flush_errors
    }
}

/// Result of [`AuditLogger::verify_integrity`].
#[derive(Debug, Clone)]
pub struct TamperReport {
    pub checked: usize,
    pub tampered: Vec<u64>,
}

impl TamperReport {
    #[must_use]
    pub fn tampered_count(&self) -> usize {
        self.tampered.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger() -> AuditLogger {
        AuditLogger::new(AuditLoggerConfig::for_tests(), "secret".into())
    }

    #[tokio::test]
    async fn sequence_numbers_are_contiguous_and_ascending() {
        let logger = logger();
        for _ in 0..5 {
            logger
                .log(AuditEventType::PermissionChecked, "A", serde_json::json!({}))
                .await;
        }
        let seqs: Vec<u64> = logger.state.lock().buffer.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn verify_integrity_detects_tampering() {
        let logger = logger();
        logger
            .log(AuditEventType::PermissionChecked, "A", serde_json::json!({}))
            .await;
        {
            let mut state = logger.state.lock();
            state.buffer[0].principal_id = "B".to_string();
        }
        let report = logger.verify_integrity();
        assert_eq!(report.tampered_count(), 1);
    }

    #[tokio::test]
    async fn buffer_flushes_automatically_at_capacity() {
        let mut config = AuditLoggerConfig::for_tests();
        config.max_buffer_size = 2;
        let logger = AuditLogger::new(config, "secret".into());
        logger
            .log(AuditEventType::PermissionChecked, "A", serde_json::json!({}))
            .await;
        assert_eq!(logger.state.lock().buffer.len(), 1);
        logger
            .log(AuditEventType::PermissionChecked, "A", serde_json::json!({}))
            .await;
        assert_eq!(logger.state.lock().buffer.len(), 0);
    }
}
