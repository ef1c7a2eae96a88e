//! Pluggable audit sinks: structured tracing output, a rotating
//! one-file-per-UTC-day JSON-lines file, and a syslog stub.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::info;

use super::AuditEntry;

#[derive(Debug, Error)]
pub enum DestinationError {
    #[error("io error writing audit entry: {0}")]
    Io(#[from] std::io::Error),
}

/// A destination audit entries can be durably written to.
#[async_trait]
pub trait AuditDestination: Send + Sync {
    async fn write(&self, entries: &[AuditEntry]) -> Result<(), DestinationError>;
}

/// Emits each entry as a structured `tracing` event.
pub struct StructuredLogDestination;

#[async_trait]
impl AuditDestination for StructuredLogDestination {
    async fn write(&self, entries: &[AuditEntry]) -> Result<(), DestinationError> {
        for entry in entries {
            info!(
                sequence = entry.sequence_number,
                event_type = ?entry.event_type,
                principal = %entry.principal_id,
                node = %entry.node,
                "audit"
            );
        }
        Ok(())
    }
}

/// Writes entries as JSON-lines into `<audit_dir>/<UTC date>.jsonl`, one
/// rolling file per UTC day.
pub struct FileDestination {
    dir: PathBuf,
}

impl FileDestination {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn file_path_for(&self, entry: &AuditEntry) -> PathBuf {
        self.dir.join(format!("{}.jsonl", entry.timestamp.format("%Y-%m-%d")))
    }
}

#[async_trait]
impl AuditDestination for FileDestination {
    async fn write(&self, entries: &[AuditEntry]) -> Result<(), DestinationError> {
        if entries.is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.dir).await?;

        // Entries in one call can straddle a UTC-day boundary; group by
        // target file rather than assuming a single day.
        let mut by_path: std::collections::BTreeMap<PathBuf, Vec<&AuditEntry>> =
            std::collections::BTreeMap::new();
        for entry in entries {
            by_path.entry(self.file_path_for(entry)).or_default().push(entry);
        }

        for (path, entries) in by_path {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            for entry in entries {
                let mut line = serde_json::to_string(entry).unwrap_or_default();
                line.push('\n');
                file.write_all(line.as_bytes()).await?;
            }
        }
        Ok(())
    }
}

/// Placeholder syslog destination. A full implementation would open a
/// Unix domain socket to `/dev/log`; left as a documented stub since
/// syslog transport is platform-specific and out of this core's scope.
pub struct SyslogDestination;

#[async_trait]
impl AuditDestination for SyslogDestination {
    async fn write(&self, _entries: &[AuditEntry]) -> Result<(), DestinationError> {
        Ok(())
    }
}
