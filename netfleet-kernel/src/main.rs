/**
 * NETFLEET KERNEL - root node
 *
 * Holds the authoritative command and device tables. Clients pull the
 * commands meant for them and push results and device sightings back over
 * the HTTP API; the root itself only runs the snapshot commands
 * (devices save/load/files list).
 */

mod config;
mod health;
mod http;

use crate::config::load_config;
use crate::health::HealthTracker;
use crate::http::AppState;
use anyhow::{Context, Result};
use netfleet_core::{ClientRegistry, CommandDispatcher, CommandQueue, DeviceStore, RootSync, SnapshotHandler};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;
    if let Err(e) = tokio::fs::create_dir_all(&cfg.data_dir).await {
        warn!(dir = %cfg.data_dir.display(), "failed to create data dir: {}", e);
    }

    let devices = DeviceStore::new();
    let dispatcher = CommandDispatcher::new()
        .with_handler(Arc::new(SnapshotHandler::new(devices.clone(), cfg.data_dir.clone())));
    let sync = RootSync::new(CommandQueue::new(cfg.name.clone()), devices, ClientRegistry::new(), dispatcher);

    let api_key = std::env::var("NETFLEET_API_KEY").unwrap_or_default();
    if api_key.is_empty() {
        warn!("NETFLEET_API_KEY not set, every API call will be rejected");
    }

    let app_state = AppState {
        sync,
        health_tracker: HealthTracker::new(),
        api_key: Arc::new(api_key),
    };
    let app = http::build_router(app_state);

    let listener = TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind))?;
    info!(name = %cfg.name, "root listening on http://{}", cfg.bind);
    axum::serve(listener, app).await.context("http server stopped")?;
    Ok(())
}
