//! netfleet agent - client node
//!
//! Sits next to a subnet of switches and:
//! - registers with the root and refreshes that registration periodically
//! - pulls the commands meant for it, runs them, pushes the whole table back
//! - forwards every device change to the root
//! - keeps the liveness counters of known devices up to date

mod config;
mod probe;
mod protocol;
mod transport;

use anyhow::{Context, Result};
use config::AgentConfig;
use if_addrs::{get_if_addrs, IfAddr};
use netfleet_core::{
    AdminHandler, CommandDispatcher, CommandQueue, DeviceActionHandler, DeviceStore, LivenessProbe, ReplicationSync,
    RuntimeSettings, ScanHandler,
};
use probe::ArpTableProbe;
use protocol::ExternalProtocol;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use transport::HttpTransport;

fn local_addresses() -> Vec<String> {
    match get_if_addrs() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter(|interface| !interface.is_loopback())
            .filter_map(|interface| match interface.addr {
                IfAddr::V4(v4) => Some(v4.ip.to_string()),
                IfAddr::V6(_) => None,
            })
            .collect(),
        Err(e) => {
            warn!("failed to enumerate interfaces: {}", e);
            Vec::new()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AgentConfig::load().await.context("Failed to load agent configuration")?;
    info!(name = %config.name, root = %config.root_url, "starting netfleet agent");

    let settings = RuntimeSettings::new(config.command_interval_secs, config.liveness_interval_secs);
    let (changes_tx, changes_rx) = mpsc::unbounded_channel();
    let devices = DeviceStore::new().with_change_feed(changes_tx);
    let queue = CommandQueue::new(config.name.clone());

    let protocol = Arc::new(
        ExternalProtocol::new(&config.protocol.command, Duration::from_secs(config.protocol.timeout_secs))
            .context("Invalid protocol command template")?,
    );
    let dispatcher = CommandDispatcher::new()
        .with_handler(Arc::new(DeviceActionHandler::new(devices.clone(), protocol.clone())))
        .with_handler(Arc::new(ScanHandler::new(config.name.clone(), devices.clone(), protocol)))
        .with_handler(Arc::new(AdminHandler::new(queue.clone(), settings.clone())));

    let transport = Arc::new(
        HttpTransport::new(&config.root_url, &config.api_key, config.http_timeout())
            .context("Failed to build HTTP client")?,
    );
    let sync = ReplicationSync::new(queue, devices.clone(), dispatcher, transport);

    // registration refresh
    let registrar = sync.clone();
    let register_every = config.register_interval();
    tokio::spawn(async move {
        let mut timer = interval(register_every);
        loop {
            timer.tick().await;
            if let Err(e) = registrar.register(local_addresses()).await {
                warn!("registration failed: {}", e);
            }
        }
    });

    sync.clone().spawn_device_publisher(changes_rx);
    sync.spawn_command_loop(settings.clone());
    LivenessProbe::new(devices, Arc::new(ArpTableProbe::new()), config.probe_deadline()).spawn(settings);

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("shutting down");
    Ok(())
}
