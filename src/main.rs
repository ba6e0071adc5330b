//! # Tenant Gateway - Main Entry Point
//!
//! Loads the configuration, installs logging, starts the gateway and runs it until
//! SIGINT or SIGTERM, then drains the listener and waits for background tasks.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tenant_gateway::observability::init_logging;
use tenant_gateway::{Gateway, GatewayConfig, GatewayResult};

#[tokio::main]
async fn main() -> GatewayResult<()> {
    let config_path = std::env::var("GATEWAY_CONFIG_PATH")
        .unwrap_or_else(|_| "config/gateway.yaml".to_string());

    let config = match GatewayConfig::load_or_default(&config_path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    init_logging(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), config = %config_path, "Starting tenant gateway");

    let shutdown = CancellationToken::new();
    let gateway = Gateway::from_config(config).await?;
    let running = match gateway.start(shutdown.clone()).await {
        Ok(running) => running,
        Err(e) => {
            error!(error = %e, "Failed to start gateway");
            std::process::exit(1);
        }
    };

    shutdown_signal().await;
    info!("Shutdown signal received, draining");
    shutdown.cancel();
    running.wait().await;

    info!("Tenant gateway shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
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
