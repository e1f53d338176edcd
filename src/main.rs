//! `swarm-core-node`: the bundled administrative entry point for one swarm.
//!
//! Loads configuration, initializes structured logging, builds a [`Core`]
//! and starts its background loops, then serves the session transport until
//! a shutdown signal arrives. Exit codes per §6: `0` normal shutdown, `1`
//! initialization failure, `2` transport bind failure.

use std::path::Path;
use std::process::ExitCode;

use swarm_core::domain::models::Config;
use swarm_core::domain::ports::agent_voter::SimulatedVoter;
use swarm_core::infrastructure::config::ConfigLoader;
use swarm_core::infrastructure::logging::LoggerImpl;
use swarm_core::infrastructure::persistence::CoreSnapshot;
use swarm_core::services::health_monitor::AlwaysRecoverExecutor;
use swarm_core::transport::SessionServer;
use swarm_core::Core;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match ConfigLoader::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e:#}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = ConfigLoader::validate(&config) {
        eprintln!("invalid configuration: {e}");
        return ExitCode::from(1);
    }

    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("failed to initialize logging: {e:#}");
            return ExitCode::from(1);
        }
    };

    let swarm_id = std::env::var("SWARM_CORE_SWARM_ID").unwrap_or_else(|_| "default".to_string());
    let node_id = std::env::var("SWARM_CORE_NODE_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

    tracing::info!(swarm_id = %swarm_id, node_id = %node_id, "starting swarm-core-node");

    run(swarm_id, node_id, config).await
}

async fn run(swarm_id: String, node_id: String, config: Config) -> ExitCode {
    let core = build_core(swarm_id, node_id, &config);
    core.start();

    let server = SessionServer::new(core.clone());
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install ctrl-c handler, shutting down immediately");
        }
        tracing::info!("shutdown signal received");
    };

    let result = server.serve_with_shutdown(shutdown).await;

    if let Some(path) = config.persistence.snapshot_path.as_deref() {
        match core.save_snapshot(Path::new(path)).await {
            Ok(()) => tracing::info!(path, "persisted-state snapshot written on shutdown"),
            Err(e) => tracing::warn!(path, error = %e, "failed to write shutdown snapshot, continuing"),
        }
    }

    match result {
        Ok(()) => {
            tracing::info!("swarm-core-node shut down normally");
            ExitCode::from(0)
        }
        Err(e) => {
            tracing::error!(error = %e, "transport bind failure");
            ExitCode::from(2)
        }
    }
}

/// Builds the `Core`, restoring from the configured snapshot path if
/// `persistence.restore_on_start` is set and the file is readable. A
/// missing or corrupt snapshot is logged and falls back to an empty start
/// per §6's best-effort persistence stance.
fn build_core(swarm_id: String, node_id: String, config: &Config) -> std::sync::Arc<Core> {
    if config.persistence.restore_on_start {
        if let Some(path) = config.persistence.snapshot_path.as_deref() {
            match CoreSnapshot::load(Path::new(path)) {
                Ok(snapshot) => {
                    tracing::info!(path, "restored persisted-state snapshot");
                    return Core::from_snapshot(
                        node_id,
                        config.clone(),
                        std::sync::Arc::new(SimulatedVoter),
                        std::sync::Arc::new(AlwaysRecoverExecutor),
                        snapshot,
                    );
                }
                Err(e) => {
                    tracing::warn!(path, error = %e, "no usable snapshot to restore, starting empty");
                }
            }
        }
    }
    Core::new(swarm_id, node_id, config.clone())
}
