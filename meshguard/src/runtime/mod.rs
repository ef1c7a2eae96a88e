//! The top-level orchestrator (spec §4, §6): wires the agent runtime,
//! cluster/placement layer, workflow coordinator, metrics/recovery, and the
//! security kernel together, and owns the periodic background tasks
//! (heartbeat sender, stale-node sweep, backup snapshot, key rotation).

use std::sync::Arc;

use meshguard_security::audit::{AuditLogger, AuditLoggerConfig};
use meshguard_security::kernel::{KernelPolicies, SecurityKernel};
use meshguard_security::token::{KeyManager, RevocationCache, TokenIssuer, TokenValidator};
use meshguard_security::violation::ViolationMonitor;

use crate::cluster::load_balancer::LoadBalancer;
use crate::cluster::supervisor::DistributedSupervisor;
use crate::cluster::ClusterManager;
use crate::config::RuntimeConfig;
use crate::event_bus::EventBus;
use crate::metrics::{MetricsCollector, RecoveryManager, RecoveryTarget};
use crate::pool::AgentPool;
use crate::registry::DistributedRegistry;
use crate::session::SessionManager;
use crate::types::{NodeId, PlacementStrategy};
use crate::agent::AgentSupervisor;
use crate::workflow::WorkflowCoordinator;

/// Everything the orchestrator needs that isn't derivable from
/// [`RuntimeConfig`] alone (secrets in particular should never be logged or
/// defaulted silently in production).
pub struct Secrets {
    pub signing_secret: String,
    pub audit_checksum_secret: String,
}

/// Owns every long-lived component and the background tasks that keep them
/// current. One `Orchestrator` per running node.
pub struct Orchestrator {
    pub event_bus: Arc<EventBus>,
    pub supervisor: AgentSupervisor,
    pub sessions: SessionManager,
    pub pool: AgentPool,
    pub registry: DistributedRegistry,
    pub cluster: ClusterManager,
    pub load_balancer: LoadBalancer,
    pub distributed_supervisor: DistributedSupervisor,
    pub workflows: WorkflowCoordinator,
    pub metrics: MetricsCollector,
    pub recovery: RecoveryManager,
    pub security: Arc<SecurityKernel>,
    pub key_manager: Arc<KeyManager>,
    pub audit: Arc<AuditLogger>,
    pub violations: Arc<ViolationMonitor>,
    pub token_issuer: TokenIssuer,
    pub token_validator: TokenValidator,
    config: RuntimeConfig,
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Orchestrator {
    /// Build every component from `config`. Does not start background
    /// tasks — call [`Orchestrator::spawn_background_tasks`] once the
    /// orchestrator is held by an `Arc` if those tasks need to reach back
    /// into it (the current set does not, but future additions may).
    ///
    /// # Panics
    ///
    /// Panics if RSA key generation fails (RNG exhaustion only).
    #[must_use]
    pub fn new(config: RuntimeConfig, secrets: Secrets) -> Self {
        let event_bus = Arc::new(EventBus::default());
        event_bus.listen_for_events();
        let emitter = event_bus.get_emitter();

        let audit = Arc::new(AuditLogger::new(
            AuditLoggerConfig {
                max_buffer_size: 256,
                flush_interval: std::time::Duration::from_secs(30),
                node_id: config.local_node_id.to_string(),
                audit_dir: config.audit_dir.clone(),
            },
            secrets.audit_checksum_secret,
        ));
        let security = Arc::new(SecurityKernel::new(
            secrets.signing_secret,
            KernelPolicies::permissive(),
            Arc::clone(&audit),
        ));
        let key_manager = Arc::new(
            KeyManager::new(config.rotation_interval, config.key_overlap_period)
                .expect("RSA key generation should not fail under a healthy RNG"),
        );
        let violations = Arc::new(ViolationMonitor::new(std::time::Duration::from_secs(5 * 60)));
        let revocation = Arc::new(RevocationCache::new(10_000));
        let token_issuer =
            TokenIssuer::new(Arc::clone(&key_manager), Arc::clone(&revocation), Arc::clone(&audit), std::time::Duration::from_secs(60 * 60));
        let token_validator =
            TokenValidator::new(Arc::clone(&key_manager), Arc::clone(&revocation), std::time::Duration::from_secs(30), std::time::Duration::from_secs(5));

        let supervisor = AgentSupervisor::new(Arc::clone(&emitter));
        let sessions = SessionManager::new(supervisor.clone());
        let pool = AgentPool::new(config.max_concurrent, Arc::clone(&emitter));
        let registry = DistributedRegistry::new();
        let cluster = ClusterManager::new(config.local_node_id.clone(), config.cluster_strategy, Arc::clone(&emitter));
        cluster.join_static_members(config.cluster_members.iter().cloned());
        let load_balancer = LoadBalancer::new(PlacementStrategy::LeastLoaded);
        let distributed_supervisor =
            DistributedSupervisor::new(registry.clone(), supervisor.clone(), load_balancer.clone());
        let workflows = WorkflowCoordinator::new(Arc::clone(&emitter));
        let metrics = MetricsCollector::new();
        let recovery = RecoveryManager::new(config.backup_dir.clone(), config.backup_retention);

        Self {
            event_bus,
            supervisor,
            sessions,
            pool,
            registry,
            cluster,
            load_balancer,
            distributed_supervisor,
            workflows,
            metrics,
            recovery,
            security,
            key_manager,
            audit,
            violations,
            token_issuer,
            token_validator,
            config,
            background_tasks: Vec::new(),
        }
    }

    /// Start the periodic heartbeat sender, stale-node sweep, key-rotation
    /// sweep, and backup snapshot loops (spec §4.10, §4.4, §4.15). Each runs
    /// on its own `tokio::spawn`ed interval loop, mirroring the teacher's
    /// `spawn_sweep`/`spawn_rotation` pattern from `meshguard-security`.
    pub fn spawn_background_tasks(&mut self, local_agent_count: impl Fn() -> usize + Send + 'static) {
        let cluster = self.cluster.clone();
        let heartbeat_interval = self.config.heartbeat_interval;
        self.background_tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            loop {
                ticker.tick().await;
                let heartbeat = cluster.local_heartbeat(local_agent_count(), 0);
                cluster.record_heartbeat(heartbeat);
                cluster.sweep_stale_nodes();
            }
        }));

        self.background_tasks.push(meshguard_security::token::keys::spawn_rotation(Arc::clone(&self.key_manager)));
        self.background_tasks.push(meshguard_security::kernel::spawn_sweep(
            Arc::clone(&self.security),
            std::time::Duration::from_secs(60),
        ));

        let security = Arc::clone(&self.security);
        let pool = self.pool.clone();
        let sessions = self.sessions.clone();
        let max_concurrent = self.config.max_concurrent;
        let recovery_dir = self.config.backup_dir.clone();
        let backup_interval = self.config.backup_interval;
        let backup_retention = self.config.backup_retention;
        self.background_tasks.push(tokio::spawn(async move {
            let manager = RecoveryManager::new(recovery_dir, backup_retention);
            let mut ticker = tokio::time::interval(backup_interval);
            loop {
                ticker.tick().await;
                let stats = security.stats();
                let (completed, failed) = pool.counters();
                let session_records: Vec<serde_json::Value> = sessions
                    .list_sessions()
                    .into_iter()
                    .filter_map(|session_id| {
                        sessions.session_metadata(&session_id).map(|(user_id, settings, created_at)| {
                            serde_json::json!({
                                "session_id": session_id.as_str(),
                                "user_id": user_id,
                                "settings": settings,
                                "created_at": created_at,
                            })
                        })
                    })
                    .collect();
                let snapshot = crate::metrics::RecoverySnapshot {
                    timestamp: chrono::Utc::now(),
                    security: Some(serde_json::to_value(&stats).unwrap_or_default()),
                    agents: Some(serde_json::json!({ "completed": completed, "failed": failed })),
                    sessions: Some(serde_json::Value::Array(session_records)),
                    config: Some(serde_json::json!({ "max_concurrent": max_concurrent })),
                };
                if let Err(err) = manager.backup(&snapshot).await {
                    tracing::warn!(error = %err, "recovery snapshot failed");
                }
            }
        }));
    }

    /// Rebalance the cluster if [`LoadBalancer::needs_rebalance`] says the
    /// current load spread warrants it (spec §4.9/§4.11). `restart` rebuilds
    /// a moved agent from its migration snapshot; callers own agent
    /// construction since it is domain-specific (spec §1). Returns `None` if
    /// no rebalance was needed.
    pub async fn maybe_rebalance(
        &self,
        restart: crate::cluster::supervisor::RestartFactory,
    ) -> Option<(usize, usize)> {
        if !self.load_balancer.needs_rebalance() {
            return None;
        }
        let nodes = self.cluster.cluster_nodes();
        Some(self.distributed_supervisor.rebalance_cluster(&nodes, restart).await)
    }

    /// Restore every component of backup `backup_id` into this
    /// orchestrator's live state, in priority order {security, config,
    /// agents, sessions} (spec §4.15 `cold_recovery`).
    ///
    /// # Errors
    ///
    /// Returns [`crate::metrics::RecoveryError`] if the backup is missing,
    /// unparseable, or past the staleness limit.
    pub async fn cold_recovery(&self, backup_id: &str) -> Result<crate::metrics::RecoverySnapshot, crate::metrics::RecoveryError> {
        let target = OrchestratorRecoveryTarget { security: &self.security, pool: &self.pool, sessions: &self.sessions };
        self.recovery.cold_recovery(backup_id, &target).await
    }

    /// Restore only `components` of backup `backup_id` (spec §4.15
    /// `partial_recovery`).
    ///
    /// # Errors
    ///
    /// Same as [`Orchestrator::cold_recovery`], plus an error if
    /// `components` is empty.
    pub async fn partial_recovery(
        &self,
        backup_id: &str,
        components: &[crate::metrics::Component],
    ) -> Result<crate::metrics::RecoverySnapshot, crate::metrics::RecoveryError> {
        let target = OrchestratorRecoveryTarget { security: &self.security, pool: &self.pool, sessions: &self.sessions };
        self.recovery.partial_recovery(backup_id, components, &target).await
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn local_node_id(&self) -> &NodeId {
        &self.config.local_node_id
    }

    /// Record a task-resolution failure as a violation and surface any
    /// threshold alerts to the metrics collector (spec §4.14/§4.15).
    pub fn record_violation(&self, violation: &meshguard_security::violation::ViolationRecord) -> Vec<meshguard_security::violation::ViolationAlert> {
        self.violations.record(violation)
    }

    pub fn shutdown(&mut self) {
        for task in self.background_tasks.drain(..) {
            task.abort();
        }
    }
}

/// Applies a recovered component's payload into the owning orchestrator's
/// live state (spec §4.15). `RecoveryManager` itself only loads and
/// validates snapshots; it has no handle to any of these components.
struct OrchestratorRecoveryTarget<'a> {
    security: &'a SecurityKernel,
    pool: &'a AgentPool,
    sessions: &'a SessionManager,
}

impl RecoveryTarget for OrchestratorRecoveryTarget<'_> {
    fn restore_security(&self, value: &serde_json::Value) {
        match serde_json::from_value::<meshguard_security::kernel::KernelStats>(value.clone()) {
            Ok(stats) => self.security.restore_stats(stats),
            Err(err) => tracing::warn!(error = %err, "could not parse security recovery payload"),
        }
    }

    fn restore_config(&self, value: &serde_json::Value) {
        if let Some(max_concurrent) = value.get("max_concurrent").and_then(serde_json::Value::as_u64) {
            self.pool.update_config(max_concurrent as usize);
        }
    }

    fn restore_agents(&self, value: &serde_json::Value) {
        let completed = value.get("completed").and_then(serde_json::Value::as_u64).unwrap_or(0);
        let failed = value.get("failed").and_then(serde_json::Value::as_u64).unwrap_or(0);
        self.pool.restore_counters(completed, failed);
    }

    fn restore_sessions(&self, value: &serde_json::Value) {
        let Some(records) = value.as_array() else { return };
        for record in records {
            let (Some(session_id), Some(user_id)) =
                (record.get("session_id").and_then(serde_json::Value::as_str), record.get("user_id").and_then(serde_json::Value::as_str))
            else {
                continue;
            };
            let settings = record.get("settings").cloned().unwrap_or(serde_json::Value::Null);
            let created_at = record
                .get("created_at")
                .and_then(|v| serde_json::from_value::<chrono::DateTime<chrono::Utc>>(v.clone()).ok())
                .unwrap_or_else(chrono::Utc::now);
            self.sessions.restore_session(crate::types::SessionId::new(session_id), user_id, settings, created_at);
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
