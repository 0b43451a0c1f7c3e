use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::signal;

use chatwatch::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Starting chatwatch v{}", chatwatch::VERSION);

    // =================================================================
    // CONFIGURATION
    // =================================================================

    let config_path = MonitorConfig::path_from_env();
    let mut config = MonitorConfig::load_or_create(&config_path)
        .await
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    config.apply_env_overrides()?;

    // =================================================================
    // SCREENING ENGINE
    // =================================================================

    let monitor = Arc::new(ChatMonitor::from_config(&config)?);

    if let Some(snapshot_path) = &config.registry.snapshot_path {
        match MonitorSnapshot::load(snapshot_path).await {
            Ok(Some(snapshot)) => {
                info!("Restoring state from {}", snapshot_path.display());
                monitor.restore(snapshot)?;
            }
            Ok(None) => info!("No snapshot at {}, starting clean", snapshot_path.display()),
            Err(e) => warn!("Ignoring unreadable snapshot {}: {}", snapshot_path.display(), e),
        }
    }

    // =================================================================
    // TRANSPORTS
    // =================================================================

    let server = WebServer::new(Arc::clone(&monitor), &config);
    if let Err(e) = server
        .start_server(&config.server.bind_address, config.server.port, shutdown_signal())
        .await
    {
        error!("Web server failed: {}", e);
        return Err(e);
    }

    // =================================================================
    // SHUTDOWN
    // =================================================================

    let stats = monitor.stats();
    info!(
        "Screened {} messages, flagged {}, {} users blocked",
        stats.messages_screened, stats.messages_flagged, stats.blocked_users
    );

    if let Some(snapshot_path) = &config.registry.snapshot_path {
        monitor
            .snapshot()
            .save(snapshot_path)
            .await
            .with_context(|| format!("Failed to save snapshot to {}", snapshot_path.display()))?;
    }

    info!("chatwatch stopped");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal, initiating graceful shutdown..."),
            Err(err) => {
                error!("Failed to listen for Ctrl+C signal: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM signal, initiating graceful shutdown...");
            }
            Err(err) => {
                error!("Failed to register SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
