use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use speedtest_exporter::catalog::HttpRegistry;
use speedtest_exporter::collector::Collector;
use speedtest_exporter::config::{Config, load_config};
use speedtest_exporter::exporter::Exporter;
use speedtest_exporter::logging::init_logging;
use speedtest_exporter::provider::HttpProvider;
use speedtest_exporter::Args;

/// Overall timeout applied to every probe request
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load config file '{}': {:#}", path.display(), e);
                return Err(e);
            }
        },
        None => Config::default(),
    };

    let client = reqwest::Client::builder()
        .user_agent(concat!("speedtest-exporter/", env!("CARGO_PKG_VERSION")))
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;

    let registry = Arc::new(HttpRegistry::new(client.clone()));
    let provider = Arc::new(HttpProvider::new(client));

    let pinned = args.effective_pinned_server(&config);
    let cache_ttl = args.effective_cache_ttl(&config);
    match pinned {
        Some(id) => info!("Using pinned speedtest server {}", id),
        None => info!("Auto-selecting the closest speedtest server"),
    }

    let collector = match Collector::new(registry, provider, pinned, cache_ttl).await {
        Ok(collector) => Arc::new(collector),
        Err(e) => {
            error!("Failed to select a speedtest server: {}", e);
            return Err(e.into());
        }
    };

    let telemetry_path = args.effective_telemetry_path(&config).to_string();
    let exporter = Arc::new(
        Exporter::new(collector, telemetry_path.clone())
            .context("failed to register metrics")?,
    );

    let listen_address = args.effective_listen_address(&config);
    let listener = TcpListener::bind(listen_address)
        .await
        .with_context(|| format!("failed to bind {}", listen_address))?;
    info!(
        "Speedtest exporter listening on {} (metrics at {})",
        listen_address, telemetry_path
    );

    axum::serve(listener, exporter.router())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
