//! Device inventory: one record per mac, merged from discovery sweeps, SNMP
//! sweeps and liveness probes.
//!
//! Merge rule on [`DeviceStore::insert`]:
//! - unknown mac: always accepted, raises a `NewDevice` alert;
//! - known mac: an SNMP sighting never replaces data from a higher-priority
//!   source, and only *complete* records replace what is stored (hostname is
//!   not required, some switches report none).
//!
//! Accepted records replace the stored one wholesale and get `last_seen`
//! stamped. The `locked` flag is node-local and survives replacement.

use crate::alert::{Alert, LogNotifier, Notifier};
use crate::error::{FleetError, Result};
use chrono::{DateTime, Utc};
use mac_address::MacAddress;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Which discovery source produced a record. Higher priority wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanProtocol {
    #[default]
    Gwd,
    Snmp,
}

impl ScanProtocol {
    fn priority(self) -> u8 {
        match self {
            ScanProtocol::Gwd => 1,
            ScanProtocol::Snmp => 0,
        }
    }

    fn lowest() -> Self {
        ScanProtocol::Snmp
    }
}

/// A missing, empty or unknown source reads as the lowest-priority one, so a
/// single odd record cannot fail a whole device table.
fn lenient_protocol<'de, D>(deserializer: D) -> std::result::Result<ScanProtocol, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(match raw.as_deref() {
        Some("gwd") => ScanProtocol::Gwd,
        Some("snmp") => ScanProtocol::Snmp,
        other => {
            debug!(source = ?other, "unknown scan protocol, treated as snmp");
            ScanProtocol::lowest()
        }
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub mac: String,
    #[serde(rename = "modelname", default)]
    pub model_name: String,
    #[serde(rename = "scanproto", default = "ScanProtocol::lowest", deserialize_with = "lenient_protocol")]
    pub scan_protocol: ScanProtocol,
    #[serde(rename = "ipaddress", default)]
    pub ip_address: String,
    #[serde(default)]
    pub netmask: String,
    #[serde(default)]
    pub gateway: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(rename = "kernel", default)]
    pub kernel_version: String,
    #[serde(rename = "ap", default)]
    pub application_version: String,
    #[serde(rename = "scannedby", default)]
    pub scanned_by: String,
    #[serde(rename = "arpmissed", default)]
    pub arp_missed: u32,
    #[serde(rename = "readcommunity", default)]
    pub read_community: String,
    #[serde(rename = "writecommunity", default)]
    pub write_community: String,
    #[serde(rename = "lastseen", default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub locked: bool,
}

impl DeviceRecord {
    /// Every field a switch reports on a full discovery answer, minus hostname.
    pub fn is_complete(&self) -> bool {
        [
            &self.model_name,
            &self.application_version,
            &self.kernel_version,
            &self.ip_address,
            &self.netmask,
            &self.gateway,
        ]
        .iter()
        .all(|field| !field.is_empty())
    }
}

/// Normalizes `00:60:e9:2d:91:3e` and `00-60-e9-2d-91-3e` to
/// `00-60-E9-2D-91-3E`. Returns `None` if the input is not a mac.
pub fn canonical_mac(raw: &str) -> Option<String> {
    MacAddress::from_str(raw.trim()).ok().map(|mac| format_mac(&mac))
}

/// Renders `mac` in the `XX-XX-XX-XX-XX-XX` key form.
pub fn format_mac(mac: &MacAddress) -> String {
    mac.bytes()
        .iter()
        .map(|octet| format!("{:02X}", octet))
        .collect::<Vec<_>>()
        .join("-")
}

pub type DevicesMap = BTreeMap<String, DeviceRecord>;

#[derive(Clone)]
pub struct DeviceStore {
    devices: Arc<Mutex<DevicesMap>>,
    notifier: Arc<dyn Notifier>,
    changes: Option<mpsc::UnboundedSender<DeviceRecord>>,
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStore {
    pub fn new() -> Self {
        Self {
            devices: Arc::new(Mutex::new(BTreeMap::new())),
            notifier: Arc::new(LogNotifier),
            changes: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Every accepted insert and every liveness update is also sent here.
    pub fn with_change_feed(mut self, sender: mpsc::UnboundedSender<DeviceRecord>) -> Self {
        self.changes = Some(sender);
        self
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    /// Applies the merge rule. Returns whether the record was stored.
    pub fn insert(&self, mut record: DeviceRecord) -> bool {
        let Some(mac) = canonical_mac(&record.mac) else {
            debug!(mac = %record.mac, "ignoring device with malformed mac");
            return false;
        };
        record.mac = mac.clone();

        let is_new = {
            let mut devices = self.devices.lock();
            match devices.get(&mac) {
                Some(existing) => {
                    if record.scan_protocol.priority() < existing.scan_protocol.priority() {
                        debug!(%mac, "not overriding {:?} data with {:?} data", existing.scan_protocol, record.scan_protocol);
                        return false;
                    }
                    if !record.is_complete() {
                        debug!(%mac, "not overriding with incomplete record");
                        return false;
                    }
                    record.locked = existing.locked;
                    record.last_seen = Some(Utc::now());
                    devices.insert(mac.clone(), record.clone());
                    false
                }
                None => {
                    record.last_seen = Some(Utc::now());
                    devices.insert(mac.clone(), record.clone());
                    true
                }
            }
        };

        if is_new {
            info!(%mac, model = %record.model_name, "new device");
            self.notifier.notify(Alert::NewDevice { mac: mac.clone() });
        }
        self.publish(record);
        true
    }

    /// Looks a device up by IPv4 address or by mac (`:` or `-`, any case).
    pub fn find(&self, key: &str) -> Result<DeviceRecord> {
        let devices = self.devices.lock();
        let by_ip = || devices.values().find(|d| d.ip_address == key).cloned();
        let found = if key.parse::<Ipv4Addr>().is_ok() {
            by_ip()
        } else {
            canonical_mac(key).and_then(|mac| devices.get(&mac).cloned()).or_else(by_ip)
        };
        found.ok_or_else(|| {
            debug!(key, "device not found");
            FleetError::device_not_found(key)
        })
    }

    pub fn contains(&self, mac: &str) -> bool {
        canonical_mac(mac)
            .map(|mac| self.devices.lock().contains_key(&mac))
            .unwrap_or(false)
    }

    /// Mutates a stored record in place, bypassing the merge rule. Used for
    /// the store's own bookkeeping (liveness counters, IP drift), never for
    /// data arriving from another source.
    pub fn update<F>(&self, mac: &str, f: F) -> Result<DeviceRecord>
    where
        F: FnOnce(&mut DeviceRecord),
    {
        let updated = {
            let mut devices = self.devices.lock();
            let key = canonical_mac(mac).ok_or_else(|| FleetError::device_not_found(mac))?;
            let record = devices.get_mut(&key).ok_or_else(|| FleetError::device_not_found(mac))?;
            f(record);
            record.clone()
        };
        self.publish(updated.clone());
        Ok(updated)
    }

    pub fn lock(&self, mac: &str) -> Result<()> {
        self.with_device(mac, |d| d.locked = true)
    }

    pub fn unlock(&self, mac: &str) -> Result<()> {
        self.with_device(mac, |d| d.locked = false)
    }

    pub fn is_locked(&self, mac: &str) -> Result<bool> {
        self.find(mac).map(|d| d.locked)
    }

    /// Advisory: takes the lock if nobody holds it. Handlers running
    /// destructive operations are expected to call this and honour `false`.
    pub fn try_acquire(&self, mac: &str) -> Result<bool> {
        let mut devices = self.devices.lock();
        let key = canonical_mac(mac).ok_or_else(|| FleetError::device_not_found(mac))?;
        let record = devices.get_mut(&key).ok_or_else(|| FleetError::device_not_found(mac))?;
        if record.locked {
            return Ok(false);
        }
        record.locked = true;
        Ok(true)
    }

    pub fn release(&self, mac: &str) -> Result<()> {
        self.unlock(mac)
    }

    pub fn snapshot(&self) -> DevicesMap {
        self.devices.lock().clone()
    }

    pub fn macs(&self) -> Vec<String> {
        self.devices.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    /// Writes the whole table to `devices-<timestamp>.json` under `dir`.
    pub async fn save_snapshot(&self, dir: &Path) -> Result<PathBuf> {
        let file_name = format!("devices-{}.json", Utc::now().format("%Y%m%dT%H%M%S"));
        let path = dir.join(file_name);
        let content = serde_json::to_string_pretty(&self.snapshot())?;
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, content).await?;
        info!(path = %path.display(), devices = self.len(), "saved device snapshot");
        Ok(path)
    }

    /// Loads a snapshot; `None` picks the newest one in `dir`. Loaded records
    /// replace what is stored, keyed by mac. Returns the number loaded.
    pub async fn load_snapshot(&self, dir: &Path, file: Option<&str>) -> Result<usize> {
        let path = match file {
            Some(name) => dir.join(name),
            None => {
                let newest = list_snapshots(dir)
                    .await?
                    .pop()
                    .ok_or_else(|| FleetError::NotFound { kind: "snapshot", key: dir.display().to_string() })?;
                dir.join(newest)
            }
        };
        let content = tokio::fs::read_to_string(&path).await?;
        let loaded: DevicesMap = serde_json::from_str(&content)?;
        let count = loaded.len();
        {
            let mut devices = self.devices.lock();
            for (_, mut record) in loaded {
                let Some(mac) = canonical_mac(&record.mac) else { continue };
                record.mac = mac.clone();
                record.locked = devices.get(&mac).map(|d| d.locked).unwrap_or(false);
                devices.insert(mac, record);
            }
        }
        info!(path = %path.display(), count, "loaded device snapshot");
        Ok(count)
    }

    fn with_device<F>(&self, mac: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut DeviceRecord),
    {
        let mut devices = self.devices.lock();
        let key = canonical_mac(mac).ok_or_else(|| FleetError::device_not_found(mac))?;
        let record = devices.get_mut(&key).ok_or_else(|| FleetError::device_not_found(mac))?;
        f(record);
        Ok(())
    }

    fn publish(&self, record: DeviceRecord) {
        if let Some(changes) = &self.changes {
            // receiver gone means nobody forwards to root, nothing to do
            let _ = changes.send(record);
        }
    }
}

/// Snapshot file names in `dir`, oldest first.
pub async fn list_snapshots(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("devices-") && name.ends_with(".json") {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::Alert;

    #[derive(Default)]
    struct Collect(parking_lot::Mutex<Vec<Alert>>);

    impl Notifier for Collect {
        fn notify(&self, alert: Alert) {
            self.0.lock().push(alert);
        }
    }

    fn complete(mac: &str, proto: ScanProtocol, ip: &str) -> DeviceRecord {
        DeviceRecord {
            mac: mac.into(),
            model_name: "EH7508".into(),
            scan_protocol: proto,
            ip_address: ip.into(),
            netmask: "255.255.255.0".into(),
            gateway: "192.168.1.254".into(),
            hostname: "sw-1".into(),
            kernel_version: "5.2".into(),
            application_version: "V1.03".into(),
            scanned_by: "c1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn canonical_mac_forms() {
        assert_eq!(canonical_mac("00:60:e9:2d:91:3e").as_deref(), Some("00-60-E9-2D-91-3E"));
        assert_eq!(canonical_mac("00-60-e9-2d-91-3e").as_deref(), Some("00-60-E9-2D-91-3E"));
        assert_eq!(canonical_mac("00-60-E9-2D-91"), None);
        assert_eq!(canonical_mac("192.168.1.5"), None);
        assert_eq!(canonical_mac("192.168.100.200"), None);
        assert_eq!(canonical_mac("0060.e92d.913e"), None);
    }

    #[test]
    fn new_device_is_accepted_and_alerted() {
        let alerts = Arc::new(Collect::default());
        let store = DeviceStore::new().with_notifier(alerts.clone());
        let partial = DeviceRecord { mac: "00-60-e9-00-00-01".into(), ..Default::default() };

        assert!(store.insert(partial));
        let stored = store.find("00-60-E9-00-00-01").unwrap();
        assert!(stored.last_seen.is_some());
        assert_eq!(*alerts.0.lock(), vec![Alert::NewDevice { mac: "00-60-E9-00-00-01".into() }]);
    }

    #[test]
    fn snmp_never_downgrades_gwd() {
        let store = DeviceStore::new();
        assert!(store.insert(complete("00-60-E9-00-00-01", ScanProtocol::Gwd, "192.168.1.5")));
        assert!(!store.insert(complete("00-60-E9-00-00-01", ScanProtocol::Snmp, "192.168.1.6")));
        assert_eq!(store.find("00-60-E9-00-00-01").unwrap().ip_address, "192.168.1.5");
    }

    #[test]
    fn snmp_replaces_snmp_when_complete() {
        let store = DeviceStore::new();
        store.insert(complete("00-60-E9-00-00-02", ScanProtocol::Snmp, "10.0.0.1"));
        assert!(store.insert(complete("00-60-E9-00-00-02", ScanProtocol::Snmp, "10.0.0.2")));
        assert_eq!(store.find("00-60-E9-00-00-02").unwrap().ip_address, "10.0.0.2");
    }

    #[test]
    fn incomplete_update_is_rejected() {
        let store = DeviceStore::new();
        store.insert(complete("00-60-E9-00-00-01", ScanProtocol::Gwd, "192.168.1.5"));
        let before = store.find("00-60-E9-00-00-01").unwrap();

        for strip in 0..6 {
            let mut record = complete("00-60-E9-00-00-01", ScanProtocol::Gwd, "192.168.1.7");
            match strip {
                0 => record.model_name.clear(),
                1 => record.application_version.clear(),
                2 => record.kernel_version.clear(),
                3 => record.ip_address.clear(),
                4 => record.netmask.clear(),
                _ => record.gateway.clear(),
            }
            assert!(!store.insert(record));
        }
        assert_eq!(store.find("00-60-E9-00-00-01").unwrap(), before);
    }

    #[test]
    fn empty_hostname_is_still_complete() {
        let store = DeviceStore::new();
        store.insert(complete("00-60-E9-00-00-01", ScanProtocol::Gwd, "192.168.1.5"));
        let mut record = complete("00-60-E9-00-00-01", ScanProtocol::Gwd, "192.168.1.8");
        record.hostname.clear();
        assert!(store.insert(record));
        assert_eq!(store.find("192.168.1.8").unwrap().mac, "00-60-E9-00-00-01");
    }

    #[test]
    fn find_by_ip_with_twelve_digits() {
        let store = DeviceStore::new();
        store.insert(complete("00-60-E9-00-00-01", ScanProtocol::Gwd, "192.168.100.200"));
        assert_eq!(store.find("192.168.100.200").unwrap().mac, "00-60-E9-00-00-01");
        assert_eq!(store.find("00:60:e9:00:00:01").unwrap().ip_address, "192.168.100.200");
        assert!(store.find("192.168.110.123").is_err());
    }

    #[test]
    fn odd_scan_protocol_does_not_fail_the_table() {
        let json = r#"{
            "00-60-E9-00-00-01": {"mac": "00-60-E9-00-00-01", "scanproto": "", "ipaddress": "10.0.0.1"},
            "00-60-E9-00-00-02": {"mac": "00-60-E9-00-00-02", "scanproto": "lldp"},
            "00-60-E9-00-00-03": {"mac": "00-60-E9-00-00-03", "scanproto": "gwd"},
            "00-60-E9-00-00-04": {"mac": "00-60-E9-00-00-04"}
        }"#;
        let table: DevicesMap = serde_json::from_str(json).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table["00-60-E9-00-00-01"].scan_protocol, ScanProtocol::Snmp);
        assert_eq!(table["00-60-E9-00-00-02"].scan_protocol, ScanProtocol::Snmp);
        assert_eq!(table["00-60-E9-00-00-03"].scan_protocol, ScanProtocol::Gwd);
        assert_eq!(table["00-60-E9-00-00-04"].scan_protocol, ScanProtocol::Snmp);
        assert_eq!(table["00-60-E9-00-00-01"].ip_address, "10.0.0.1");
    }

    #[test]
    fn lock_survives_replacement() {
        let store = DeviceStore::new();
        store.insert(complete("00-60-E9-00-00-01", ScanProtocol::Gwd, "192.168.1.5"));
        assert!(store.try_acquire("00-60-E9-00-00-01").unwrap());
        assert!(!store.try_acquire("00:60:e9:00:00:01").unwrap());

        store.insert(complete("00-60-E9-00-00-01", ScanProtocol::Gwd, "192.168.1.9"));
        assert!(store.is_locked("00-60-E9-00-00-01").unwrap());

        store.release("00-60-E9-00-00-01").unwrap();
        assert!(!store.is_locked("00-60-E9-00-00-01").unwrap());
    }

    #[test]
    fn unknown_device_is_not_found() {
        let store = DeviceStore::new();
        assert!(matches!(store.is_locked("00-00-00-00-00-01"), Err(FleetError::NotFound { .. })));
        assert!(store.lock("00-00-00-00-00-01").is_err());
        assert!(store.find("10.1.1.1").is_err());
    }

    #[test]
    fn change_feed_sees_inserts_and_updates() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let store = DeviceStore::new().with_change_feed(tx);
        store.insert(complete("00-60-E9-00-00-01", ScanProtocol::Gwd, "192.168.1.5"));
        store.update("00-60-E9-00-00-01", |d| d.arp_missed = 1).unwrap();

        assert_eq!(rx.try_recv().unwrap().arp_missed, 0);
        assert_eq!(rx.try_recv().unwrap().arp_missed, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn snapshot_save_and_load_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceStore::new();
        store.insert(complete("00-60-E9-00-00-01", ScanProtocol::Gwd, "192.168.1.5"));
        let path = store.save_snapshot(dir.path()).await.unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("devices-"));

        let files = list_snapshots(dir.path()).await.unwrap();
        assert_eq!(files.len(), 1);

        let fresh = DeviceStore::new();
        assert_eq!(fresh.load_snapshot(dir.path(), None).await.unwrap(), 1);
        assert_eq!(fresh.find("00-60-E9-00-00-01").unwrap().ip_address, "192.168.1.5");
    }

    #[tokio::test]
    async fn load_without_snapshots_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = DeviceStore::new().load_snapshot(dir.path(), None).await.unwrap_err();
        assert!(matches!(err, FleetError::NotFound { kind: "snapshot", .. }));
    }
}
