//! Thin binary wiring the library's [`meshguard::runtime::Orchestrator`] to
//! an HTTP listener (spec §6). All handler logic lives in
//! [`meshguard::api`]; this file only owns startup, secrets, and the
//! listener.

use std::sync::Arc;

use clap::Parser;
use meshguard::config::{CliArgs, RuntimeConfig};
use meshguard::runtime::{Orchestrator, Secrets};
use meshguard::types::NodeId;

fn env_or(key: &str, dev_default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        tracing::warn!(key, "using compiled-in development default; set this in production");
        dev_default.to_string()
    })
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args = CliArgs::parse();
    let local_node_id = NodeId::new(env_or("MESHGUARD_NODE_ID", "local"));
    let bind_addr = args.bind_addr.clone();
    let config = RuntimeConfig::from_cli(args, local_node_id);

    let secrets = Secrets {
        signing_secret: env_or("SECURITY_SIGNING_SECRET", "dev-signing-secret-do-not-use-in-production"),
        audit_checksum_secret: env_or("AUDIT_CHECKSUM_SECRET", "dev-audit-secret-do-not-use-in-production"),
    };

    let mut orchestrator = Orchestrator::new(config, secrets);
    let pool_ref = orchestrator.pool.clone();
    orchestrator.spawn_background_tasks(move || pool_ref.active_count());

    let state: Arc<Orchestrator> = Arc::new(orchestrator);
    let app = meshguard::api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind API listener");
    tracing::info!(%bind_addr, "meshguard-api listening");
    axum::serve(listener, app).await.expect("API server crashed");
}
