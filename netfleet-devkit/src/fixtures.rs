/*!
Shared fixtures: device builders and an alert recorder.
*/

use netfleet_core::{Alert, DeviceRecord, Notifier, ScanProtocol};
use parking_lot::Mutex;
use std::sync::Arc;

/// A record that passes the completeness gate.
pub fn complete_device(mac: &str, protocol: ScanProtocol, ip: &str) -> DeviceRecord {
    DeviceRecord {
        mac: mac.into(),
        model_name: "EH7508".into(),
        scan_protocol: protocol,
        ip_address: ip.into(),
        netmask: "255.255.255.0".into(),
        gateway: "192.168.1.254".into(),
        hostname: "switch".into(),
        kernel_version: "5.2".into(),
        application_version: "V1.03".into(),
        ..Default::default()
    }
}

/// Only mac, source and IP, as an SNMP sighting often is.
pub fn partial_device(mac: &str, protocol: ScanProtocol, ip: &str) -> DeviceRecord {
    DeviceRecord {
        mac: mac.into(),
        scan_protocol: protocol,
        ip_address: ip.into(),
        ..Default::default()
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    /// Returns and forgets what was recorded so far.
    pub fn drain(&self) -> Vec<Alert> {
        std::mem::take(&mut *self.alerts.lock())
    }

    pub fn count(&self, wanted: &Alert) -> usize {
        self.alerts.lock().iter().filter(|alert| *alert == wanted).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}
