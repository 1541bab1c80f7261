//! Tonebridge Server - standalone headless server for Tonebridge.
//!
//! Streams catalog tracks over HTTP with optional on-the-fly FLAC
//! transcoding. Designed for deployments where the bridge runs as a
//! background daemon next to the renderer that consumes it.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tonebridge_core::constants::APP_NAME;
use tonebridge_core::{bootstrap_services, start_server, Credentials, MockBackend, MusicBackend};

use crate::config::ServerConfig;

/// Tonebridge Server - headless catalog-to-HTTP audio streaming bridge.
#[derive(Parser, Debug)]
#[command(name = "tonebridge-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "TONEBRIDGE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Path to the credentials JSON file (overrides config file).
    #[arg(long, value_name = "FILE")]
    credentials: Option<PathBuf>,

    /// Backend implementation to use. `mock` synthesizes a demo catalog;
    /// a vendor SDK adapter is wired in at deployment.
    #[arg(short, long, default_value = "mock")]
    backend: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("{} Server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(credentials) = args.credentials {
        config.credentials = Some(credentials);
    }

    let backend: Arc<dyn MusicBackend> = match args.backend.as_str() {
        "mock" => Arc::new(MockBackend::with_demo_catalog()),
        other => bail!(
            "Unknown backend '{}'. Only 'mock' is built in; a vendor SDK \
             adapter must be wired in at deployment.",
            other
        ),
    };

    let credentials = match &config.credentials {
        Some(path) => Credentials::load(path)
            .with_context(|| format!("Failed to load credentials: {}", path.display()))?,
        None if args.backend == "mock" => {
            log::info!("No credentials configured - using mock defaults");
            Credentials::plain("mock", "mock", "mock", std::env::temp_dir())
        }
        None => bail!(
            "No credentials configured. Set `credentials` in the config file, \
             pass --credentials, or set TONEBRIDGE_CREDENTIALS."
        ),
    };

    let core_config = config.to_core_config();
    log::info!(
        "Configuration: port={}, delivery_timeout={}s",
        core_config.port,
        core_config.capture.delivery_timeout_secs
    );

    // Bootstrap services (includes the bounded backend login)
    let services = bootstrap_services(backend, &credentials, core_config)
        .await
        .context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    let app_state = services.app_state();
    let port = config.port;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });

    log::info!("HTTP server started on port {}", port);

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
