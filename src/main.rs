//! wake-proxy
//!
//! Reverse proxy in front of an on-demand GPU pod.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌───────────────────────────────────────────────────┐
//!                  │                    WAKE PROXY                     │
//!   Client ───────▶│  http/server ──▶ resilience/cold_start ──▶ forward│────▶ Pod gateway
//!                  │       │                 │                          │
//!                  │       │ upgrade         │ 502/530: start once      │
//!                  │       ▼                 ▼                          │
//!   Client ◀══════▶│  http/websocket   lifecycle/backend ──▶ control ───│────▶ Control API
//!                  │       │                 ▲                          │
//!                  │       ▼                 │ idle > limit: stop       │
//!                  │  lifecycle/activity ◀── lifecycle/monitor          │
//!                  └───────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use wake_proxy::config::{self, ObservabilityConfig};
use wake_proxy::lifecycle::signals::wait_for_signal;
use wake_proxy::observability::{logging, metrics};
use wake_proxy::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "wake-proxy")]
#[command(about = "Reverse proxy that wakes an on-demand GPU pod and stops it when idle", long_about = None)]
struct Cli {
    /// TOML configuration file; environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match config::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init_logging(&ObservabilityConfig::default());
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!("wake-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        target = %config.target.normalized_base_url(),
        pod_id = %config.control.pod_id,
        inactivity_limit_secs = config.inactivity.limit_secs,
        start_time_limit_secs = config.cold_start.start_time_limit_secs,
        retry_interval_ms = config.cold_start.retry_interval_ms,
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config)?;
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tokio::select! {
        _ = wait_for_signal() => {
            shutdown.trigger();
            server_task.await??;
        }
        result = &mut server_task => result??,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
