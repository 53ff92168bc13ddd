//! Periodic reachability check of known devices.
//!
//! A cycle probes every eligible interface in parallel and only then does the
//! miss accounting: every device not stamped with the cycle's timestamp has
//! missed it. Crossing [`OFFLINE_THRESHOLD`] misses raises the offline alert
//! once; answering again after that raises the online alert once.

use crate::alert::Alert;
use crate::device::{canonical_mac, DeviceStore};
use crate::error::Result;
use crate::settings::RuntimeSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Consecutive misses after which a device is offline. Not configurable.
pub const OFFLINE_THRESHOLD: u32 = 2;

/// A device seen answering on the local network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub mac: String,
    pub ip: String,
}

#[async_trait]
pub trait LivenessTransport: Send + Sync {
    /// Interfaces worth probing this cycle.
    async fn interfaces(&self) -> Result<Vec<String>>;

    /// Sends the probe request out of `interface`.
    async fn broadcast(&self, interface: &str) -> Result<()>;

    /// Collects the answers seen on `interface`, waiting at most `deadline`.
    async fn probe(&self, interface: &str, deadline: Duration) -> Result<Vec<Observation>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivenessReport {
    pub interfaces: usize,
    pub responded: usize,
    pub missed: usize,
    pub offline: Vec<String>,
}

#[derive(Clone)]
pub struct LivenessProbe {
    devices: DeviceStore,
    transport: Arc<dyn LivenessTransport>,
    deadline: Duration,
}

impl LivenessProbe {
    pub fn new(devices: DeviceStore, transport: Arc<dyn LivenessTransport>, deadline: Duration) -> Self {
        Self { devices, transport, deadline }
    }

    pub async fn run_cycle(&self) -> Result<LivenessReport> {
        // without interfaces every device would look missed, so no accounting
        let interfaces = self.transport.interfaces().await?;
        if interfaces.is_empty() {
            debug!("no eligible interface, liveness accounting skipped");
            return Ok(LivenessReport::default());
        }
        let stamp = Utc::now();
        let mut report = LivenessReport { interfaces: interfaces.len(), ..Default::default() };

        let mut probes = JoinSet::new();
        for interface in interfaces {
            let transport = self.transport.clone();
            let devices = self.devices.clone();
            let deadline = self.deadline;
            probes.spawn(async move {
                if let Err(e) = transport.broadcast(&interface).await {
                    warn!(%interface, "probe broadcast failed: {}", e);
                }
                match transport.probe(&interface, deadline).await {
                    Ok(observations) => observations
                        .iter()
                        .filter(|observation| mark_seen(&devices, observation, stamp))
                        .count(),
                    Err(e) => {
                        warn!(%interface, "probe failed: {}", e);
                        0
                    }
                }
            });
        }

        // barrier: accounting waits for every interface, failed ones included
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(count) => report.responded += count,
                Err(e) => warn!("probe task aborted: {}", e),
            }
        }

        let notifier = self.devices.notifier();
        let missed: Vec<String> = self
            .devices
            .snapshot()
            .into_values()
            .filter(|device| device.last_seen != Some(stamp))
            .map(|device| device.mac)
            .collect();
        for mac in missed {
            let Ok(updated) = self.devices.update(&mac, |device| device.arp_missed = device.arp_missed.saturating_add(1))
            else {
                continue;
            };
            report.missed += 1;
            if updated.arp_missed == OFFLINE_THRESHOLD {
                info!(%mac, "device offline");
                notifier.notify(Alert::DeviceOffline { mac: mac.clone() });
                report.offline.push(mac);
            }
        }

        debug!(
            interfaces = report.interfaces,
            responded = report.responded,
            missed = report.missed,
            "liveness cycle done"
        );
        Ok(report)
    }

    /// Runs cycles forever, re-reading the interval after each one so
    /// `arp interval N` takes effect on the next sleep.
    pub fn spawn(self, settings: RuntimeSettings) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(e) = self.run_cycle().await {
                    warn!("liveness cycle skipped: {}", e);
                }
                tokio::time::sleep(settings.liveness_interval()).await;
            }
        })
    }
}

/// Resets the miss counter of a known device and follows its IP. Returns
/// false for devices the store does not know.
fn mark_seen(devices: &DeviceStore, observation: &Observation, stamp: DateTime<Utc>) -> bool {
    let Some(mac) = canonical_mac(&observation.mac) else {
        return false;
    };
    let mut alerts = Vec::new();
    let updated = devices.update(&mac, |device| {
        if device.arp_missed >= OFFLINE_THRESHOLD {
            alerts.push(Alert::DeviceOnline { mac: mac.clone() });
        }
        if !observation.ip.is_empty() && device.ip_address != observation.ip {
            device.ip_address = observation.ip.clone();
            alerts.push(Alert::IpChange { mac: mac.clone(), ip: observation.ip.clone() });
        }
        device.arp_missed = 0;
        device.last_seen = Some(stamp);
    });
    if updated.is_err() {
        return false;
    }

    let notifier = devices.notifier();
    for alert in alerts {
        notifier.notify(alert);
    }
    true
}
