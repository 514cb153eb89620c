//! QuadWars match server
//!
//! Entry point for the standalone binary. It handles:
//! - Restoring the persisted match phase
//! - Wiring the match components around an in-memory host
//! - A JSON-lines bridge on stdin/stdout for host events and admin commands

use std::sync::Arc;

use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quadwars_server::app::AppState;
use quadwars_server::bridge::{run_bridge, BridgeContext};
use quadwars_server::config::Config;
use quadwars_server::host::memory::MemoryHost;
use quadwars_server::host::Host;
use quadwars_server::store::FilePhaseStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    info!("Starting QuadWars match server");
    info!(path = %config.phase_state_path.display(), "Phase state file");

    let store = Arc::new(FilePhaseStore::new(config.phase_state_path.clone()));
    let host = Arc::new(MemoryHost::live());
    let effects = host.effects();
    let state = AppState::new(config, Host::from_shared(host.clone()), store);

    // Spawn the event coordinator
    let (events_tx, events_rx) = mpsc::channel(256);
    let coordinator = tokio::spawn(state.coordinator.clone().run(events_rx));

    let ctx = BridgeContext {
        state,
        host,
        events: events_tx,
    };
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    tokio::select! {
        result = run_bridge(ctx, effects, stdin, stdout) => {
            result?;
        }
        _ = shutdown_signal() => {}
    }

    coordinator.abort();
    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
///
/// Logs go to stderr; stdout carries the bridge protocol.
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
