mod config;
mod engine;
mod metrics;
mod net;

use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{error, info, Level};

use crate::config::ServerConfig;
use crate::engine::LogEngine;
use crate::metrics::Metrics;
use crate::net::server::{SessionServer, ShutdownHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Padlink Session Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ServerConfig::load_or_default();
    if let Err(e) = config.validate() {
        anyhow::bail!("Invalid configuration: {}", e);
    }
    info!(
        "Configuration loaded: {}:{}, players {}..={}",
        config.bind_address, config.port, config.min_players, config.max_players
    );

    // Initialize metrics
    let metrics = Arc::new(Metrics::new());

    // Start metrics server on port 9090 (configurable via METRICS_PORT)
    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9090);

    let metrics_clone = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Bind the session server
    let server = SessionServer::bind(&config, LogEngine, metrics.clone())?;
    info!("Server ready on {}", server.local_addr());

    // Shutdown on Ctrl+C or any input on stdin, whichever comes first
    spawn_shutdown_listener(server.shutdown_handle());

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
    }

    info!("Server stopped");
    Ok(())
}

/// Wire the control signal: Ctrl+C or a byte on stdin requests shutdown.
fn spawn_shutdown_listener(handle: ShutdownHandle) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };
        let stdin = async {
            let mut buf = [0u8; 1];
            let _ = tokio::io::stdin().read(&mut buf).await;
        };

        tokio::select! {
            _ = ctrl_c => info!("Shutdown signal received"),
            _ = stdin => info!("Shutdown requested from stdin"),
        }

        handle.shutdown().await;
    });
}
