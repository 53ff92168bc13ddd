//! Operator-facing alerts raised by the device inventory and the liveness probe.
//!
//! The alert sink itself (syslog, MQTT, ...) lives outside the core; the
//! default [`LogNotifier`] just writes them to the tracing log.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Alert {
    NewDevice { mac: String },
    DeviceOffline { mac: String },
    DeviceOnline { mac: String },
    IpChange { mac: String, ip: String },
}

impl Alert {
    pub fn mac(&self) -> &str {
        match self {
            Alert::NewDevice { mac }
            | Alert::DeviceOffline { mac }
            | Alert::DeviceOnline { mac }
            | Alert::IpChange { mac, .. } => mac,
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::NewDevice { mac } => write!(f, "new device:{}", mac),
            Alert::DeviceOffline { mac } => write!(f, "{} offline", mac),
            Alert::DeviceOnline { mac } => write!(f, "{} online", mac),
            Alert::IpChange { mac, ip } => write!(f, "{} new IP:{}", mac, ip),
        }
    }
}

/// Receives alerts. Implementations must not block for long: they are called
/// from inside the store and probe code paths.
pub trait Notifier: Send + Sync {
    fn notify(&self, alert: Alert);
}

#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, alert: Alert) {
        warn!(mac = alert.mac(), "alert: {}", alert);
    }
}
