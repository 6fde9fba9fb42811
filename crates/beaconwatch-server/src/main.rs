//! # beaconwatch-server
//!
//! HTTP host for the beaconwatch region coordinator.
//!
//! This binary provides:
//! - REST API for region monitoring, ranging and scanner settings
//! - Callback ingest for an out-of-process scanning engine
//! - Live events over SSE and a deferred record queue
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package beaconwatch-server
//!
//! # Production
//! BEACONWATCH_ENV=production ./beaconwatch-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;

use anyhow::Context;
use beaconwatch_core::Config;
use beaconwatch_server::state::{AppState, SharedState};
use beaconwatch_server::{api, logging};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting beaconwatch-server");

    let config = Config::load().context("Failed to load configuration")?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let state = AppState::new(config)?;
    let app = api::create_router(state.clone());

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    state.coordinator.shutdown().await;
    info!("beaconwatch-server stopped");

    Ok(())
}

async fn shutdown_signal(state: SharedState) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    // Event streams never end on their own.
    state.shutdown.notify_waiters();
}
