//! Runtime configuration (spec §6): the CLI surface the orchestrator binary
//! is started with, plus the derived [`RuntimeConfig`] the
//! [`crate::runtime::Orchestrator`] is built from.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::types::{DiscoveryStrategy, NodeId};

/// CLI flags for the orchestrator binary (spec §6).
#[derive(Parser, Clone, Debug)]
#[command(name = "meshguard", about = "Agent orchestration and capability-security core")]
pub struct CliArgs {
    /// Maximum number of worker agents the pool runs concurrently.
    #[arg(long, default_value_t = 8)]
    pub max_concurrent: usize,

    /// Cluster membership discovery strategy.
    #[arg(long, value_enum, default_value_t = CliDiscoveryStrategy::Static)]
    pub cluster_strategy: CliDiscoveryStrategy,

    /// Comma-separated static member node ids, used when
    /// `--cluster-strategy static`.
    #[arg(long, value_delimiter = ',')]
    pub cluster_members: Vec<String>,

    /// Key rotation interval, e.g. `30d`, `720h`.
    #[arg(long, default_value = "30d", value_parser = parse_duration_suffix)]
    pub rotation_interval: Duration,

    /// Directory recovery snapshots are written to.
    #[arg(long, default_value = "./backups")]
    pub backup_dir: PathBuf,

    /// Directory the rolling audit log is written to.
    #[arg(long, default_value = "./audit")]
    pub audit_dir: PathBuf,

    /// HTTP bind address for the API surface.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub bind_addr: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum CliDiscoveryStrategy {
    Static,
    Multicast,
    Kubernetes,
}

impl From<CliDiscoveryStrategy> for DiscoveryStrategy {
    fn from(value: CliDiscoveryStrategy) -> Self {
        match value {
            CliDiscoveryStrategy::Static => DiscoveryStrategy::Static,
            CliDiscoveryStrategy::Multicast => DiscoveryStrategy::Multicast,
            CliDiscoveryStrategy::Kubernetes => DiscoveryStrategy::Kubernetes,
        }
    }
}

/// Parses a duration given as a number followed by a unit suffix
/// (`s`, `m`, `h`, `d`), e.g. `30d`, `720h`.
fn parse_duration_suffix(raw: &str) -> Result<Duration, String> {
    let (digits, unit) = raw.split_at(raw.len() - 1);
    let value: u64 = digits.parse().map_err(|_| format!("invalid duration `{raw}`"))?;
    let seconds = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 60 * 60,
        "d" => value * 24 * 60 * 60,
        other => return Err(format!("unknown duration unit `{other}`, expected one of s/m/h/d")),
    };
    Ok(Duration::from_secs(seconds))
}

/// The fully-resolved configuration the orchestrator is built from. Unlike
/// `CliArgs`, every field here has already been defaulted and validated.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub local_node_id: NodeId,
    pub max_concurrent: usize,
    pub cluster_strategy: DiscoveryStrategy,
    pub cluster_members: Vec<NodeId>,
    pub rotation_interval: Duration,
    pub key_overlap_period: Duration,
    pub backup_dir: PathBuf,
    pub backup_interval: Duration,
    pub backup_retention: usize,
    pub audit_dir: PathBuf,
    pub bind_addr: String,
    pub node_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl RuntimeConfig {
    #[must_use]
    pub fn from_cli(args: CliArgs, local_node_id: NodeId) -> Self {
        Self {
            local_node_id,
            max_concurrent: args.max_concurrent,
            cluster_strategy: args.cluster_strategy.into(),
            cluster_members: args.cluster_members.into_iter().map(NodeId::new).collect(),
            rotation_interval: args.rotation_interval,
            key_overlap_period: Duration::from_secs(24 * 60 * 60),
            backup_dir: args.backup_dir,
            backup_interval: Duration::from_secs(5 * 60),
            backup_retention: crate::metrics::DEFAULT_BACKUP_RETENTION,
            audit_dir: args.audit_dir,
            bind_addr: args.bind_addr,
            node_timeout: crate::cluster::DEFAULT_NODE_TIMEOUT,
            heartbeat_interval: crate::cluster::DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_cli(
            CliArgs {
                max_concurrent: 8,
                cluster_strategy: CliDiscoveryStrategy::Static,
                cluster_members: Vec::new(),
                rotation_interval: Duration::from_secs(30 * 24 * 60 * 60),
                backup_dir: PathBuf::from("./backups"),
                audit_dir: PathBuf::from("./audit"),
                bind_addr: "0.0.0.0:8080".to_string(),
            },
            NodeId::new("local"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_with_defaults() {
        let args = CliArgs::parse_from(["meshguard"]);
        assert_eq!(args.max_concurrent, 8);
        assert_eq!(args.cluster_strategy, CliDiscoveryStrategy::Static);
    }

    #[test]
    fn duration_suffix_parses_days_and_hours() {
        assert_eq!(parse_duration_suffix("30d").unwrap(), Duration::from_secs(30 * 24 * 60 * 60));
        assert_eq!(parse_duration_suffix("24h").unwrap(), Duration::from_secs(24 * 60 * 60));
        assert!(parse_duration_suffix("30x").is_err());
    }

    #[test]
    fn cli_parses_cluster_members_and_strategy() {
        let args = CliArgs::parse_from([
            "meshguard",
            "--cluster-strategy",
            "multicast",
            "--cluster-members",
            "n-1,n-2,n-3",
        ]);
        assert_eq!(args.cluster_strategy, CliDiscoveryStrategy::Multicast);
        assert_eq!(args.cluster_members, vec!["n-1", "n-2", "n-3"]);
    }
}
