//! Built-in command handlers.
//!
//! Device actions go through a [`DeviceProtocol`] collaborator; the handlers
//! only resolve the target, honour the advisory lock and translate the
//! outcome into a status. A device that is not (yet) known yields
//! `pending: device not found` so the queue retries it.

use crate::command::{CommandKey, CommandRecord, CommandStatus};
use crate::device::{canonical_mac, list_snapshots, DeviceRecord, DeviceStore, ScanProtocol};
use crate::dispatch::CommandHandler;
use crate::error::{FleetError, Result};
use crate::queue::CommandQueue;
use crate::settings::RuntimeSettings;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Models the switch CLI is available on.
const CLI_MODEL_PREFIXES: &[&str] = &["EH7", "EHG7"];

/// One action against one device, as handed to the protocol collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRequest {
    pub action: &'static str,
    pub mac: String,
    pub ip: String,
    pub user: String,
    pub pass: String,
    pub args: String,
}

/// Discovery, SNMP and Telnet mechanics live behind this trait.
#[async_trait]
pub trait DeviceProtocol: Send + Sync {
    /// Runs the action and returns its output. Failures are `Execution`
    /// errors and end up as terminal `error:` statuses.
    async fn execute(&self, request: DeviceRequest) -> Result<String>;

    /// Sweeps the local network and returns what answered.
    async fn scan(&self, protocol: ScanProtocol) -> Result<Vec<DeviceRecord>>;
}

/// Commands the root runs itself at insertion time instead of queueing
/// them for clients.
pub fn is_root_command(text: &str) -> bool {
    let words: Vec<&str> = text.split_whitespace().collect();
    matches!(
        words.as_slice(),
        ["devices", "save"] | ["devices", "load"] | ["devices", "load", _] | ["devices", "files", "list"]
    )
}

fn finish(mut record: CommandRecord, status: CommandStatus) -> CommandRecord {
    record.status = status;
    record
}

fn invalid(record: CommandRecord) -> CommandRecord {
    finish(record, CommandStatus::error("invalid command"))
}

/// `beep`, `reboot`, `reset` and `switch`.
pub struct DeviceActionHandler {
    devices: DeviceStore,
    protocol: Arc<dyn DeviceProtocol>,
}

impl DeviceActionHandler {
    pub fn new(devices: DeviceStore, protocol: Arc<dyn DeviceProtocol>) -> Self {
        Self { devices, protocol }
    }

    /// Resolves the target and records it in `dev_id`, even when unknown so
    /// a later cancellation can say so.
    fn resolve(&self, record: &mut CommandRecord, mac: &str) -> Option<DeviceRecord> {
        record.dev_id = Some(canonical_mac(mac).unwrap_or_else(|| mac.to_string()));
        self.devices.find(mac).ok()
    }

    async fn run(&self, mut record: CommandRecord, request: DeviceRequest) -> CommandRecord {
        match self.protocol.execute(request).await {
            Ok(output) => {
                record.result = output.trim().to_string();
                finish(record, CommandStatus::Ok)
            }
            Err(e) => {
                let reason = e.to_string();
                finish(record, CommandStatus::Error(reason))
            }
        }
    }

    async fn simple(&self, mut record: CommandRecord, action: &'static str, words: &[String]) -> CommandRecord {
        let Some(device) = self.resolve(&mut record, &words[1]) else {
            return finish(record, CommandStatus::pending("device not found"));
        };
        if device.locked {
            return finish(record, CommandStatus::pending("device locked"));
        }
        let request = DeviceRequest {
            action,
            mac: device.mac,
            ip: words[2].clone(),
            user: words.get(3).cloned().unwrap_or_default(),
            pass: words.get(4).cloned().unwrap_or_default(),
            args: String::new(),
        };
        self.run(record, request).await
    }

    /// Reset wipes the configuration, so it holds the lock while it runs.
    async fn reset(&self, mut record: CommandRecord, words: &[String]) -> CommandRecord {
        let Some(device) = self.resolve(&mut record, &words[1]) else {
            return finish(record, CommandStatus::pending("device not found"));
        };
        match self.devices.try_acquire(&device.mac) {
            Ok(true) => {}
            Ok(false) => return finish(record, CommandStatus::pending("device locked")),
            Err(_) => return finish(record, CommandStatus::pending("device not found")),
        }

        let request = DeviceRequest {
            action: "reset",
            mac: device.mac.clone(),
            ip: words[2].clone(),
            user: words[3].clone(),
            pass: words[4].clone(),
            args: String::new(),
        };
        let record = self.run(record, request).await;
        if let Err(e) = self.devices.release(&device.mac) {
            warn!(mac = %device.mac, "failed to release device lock: {}", e);
        }
        record
    }

    async fn switch(&self, mut record: CommandRecord, words: &[String]) -> CommandRecord {
        let Some(device) = self.resolve(&mut record, &words[1]) else {
            return finish(record, CommandStatus::pending("device not found"));
        };
        if device.model_name.is_empty() {
            return finish(record, CommandStatus::error("invalid device model"));
        }
        if !CLI_MODEL_PREFIXES.iter().any(|p| device.model_name.starts_with(p)) {
            return finish(record, CommandStatus::error("switch cli not available"));
        }
        if device.locked {
            return finish(record, CommandStatus::pending("device locked"));
        }
        let request = DeviceRequest {
            action: "switch",
            ip: device.ip_address.clone(),
            mac: device.mac,
            user: words[2].clone(),
            pass: words[3].clone(),
            args: words[4..].join(" "),
        };
        self.run(record, request).await
    }
}

#[async_trait]
impl CommandHandler for DeviceActionHandler {
    fn verbs(&self) -> &'static [&'static str] {
        &["beep", "reboot", "reset", "switch"]
    }

    async fn handle(&self, record: CommandRecord) -> CommandRecord {
        let words: Vec<String> = record.words().into_iter().map(String::from).collect();
        let verb = words.first().map(String::as_str).unwrap_or_default();
        match (verb, words.len()) {
            ("beep", 3) => self.simple(record, "beep", &words).await,
            ("reboot", 5) => self.simple(record, "reboot", &words).await,
            ("reset", 5) => self.reset(record, &words).await,
            ("switch", n) if n >= 5 => self.switch(record, &words).await,
            _ => invalid(record),
        }
    }
}

/// `scan gwd` and `scan snmp`.
pub struct ScanHandler {
    name: String,
    devices: DeviceStore,
    protocol: Arc<dyn DeviceProtocol>,
}

impl ScanHandler {
    /// `name` is stamped as `scannedby` on records that carry none.
    pub fn new(name: impl Into<String>, devices: DeviceStore, protocol: Arc<dyn DeviceProtocol>) -> Self {
        Self { name: name.into(), devices, protocol }
    }
}

#[async_trait]
impl CommandHandler for ScanHandler {
    fn verbs(&self) -> &'static [&'static str] {
        &["scan"]
    }

    async fn handle(&self, mut record: CommandRecord) -> CommandRecord {
        let protocol = match record.words().as_slice() {
            ["scan", "gwd"] => Some(ScanProtocol::Gwd),
            ["scan", "snmp"] => Some(ScanProtocol::Snmp),
            _ => None,
        };
        let Some(protocol) = protocol else {
            return invalid(record);
        };
        let found = match self.protocol.scan(protocol).await {
            Ok(found) => found,
            Err(e) => {
                let reason = e.to_string();
                return finish(record, CommandStatus::Error(reason));
            }
        };

        let reported = found.len();
        let accepted = found
            .into_iter()
            .map(|mut device| {
                device.scan_protocol = protocol;
                if device.scanned_by.is_empty() {
                    device.scanned_by = self.name.clone();
                }
                device
            })
            .filter(|device| self.devices.insert(device.clone()))
            .count();
        debug!(?protocol, reported, accepted, "scan finished");
        record.result = format!("{} devices reported, {} accepted", reported, accepted);
        finish(record, CommandStatus::Ok)
    }
}

/// `command delete <key>`, `command interval N` and `arp interval N`.
pub struct AdminHandler {
    queue: CommandQueue,
    settings: RuntimeSettings,
}

impl AdminHandler {
    pub fn new(queue: CommandQueue, settings: RuntimeSettings) -> Self {
        Self { queue, settings }
    }
}

fn interval_outcome(mut record: CommandRecord, outcome: Result<()>, secs: u64) -> CommandRecord {
    match outcome {
        Ok(()) => {
            record.result = format!("interval set to {} seconds", secs);
            finish(record, CommandStatus::Ok)
        }
        Err(FleetError::Rejected(reason)) => finish(record, CommandStatus::Error(reason)),
        Err(e) => {
            let reason = e.to_string();
            finish(record, CommandStatus::Error(reason))
        }
    }
}

#[async_trait]
impl CommandHandler for AdminHandler {
    fn verbs(&self) -> &'static [&'static str] {
        &["command", "arp"]
    }

    async fn handle(&self, mut record: CommandRecord) -> CommandRecord {
        let words: Vec<String> = record.words().into_iter().map(String::from).collect();
        let secs = words.get(2).and_then(|w| w.parse::<u64>().ok());

        let verb = words.first().map(String::as_str).unwrap_or_default();
        match (verb, words.get(1).map(String::as_str)) {
            ("command", Some("delete")) if words.len() > 2 => {
                let key = CommandKey::parse(&words[2..].join(" "));
                match self.queue.delete(&key) {
                    Ok(_) => {
                        record.result = format!("deleted {}", key);
                        finish(record, CommandStatus::Ok)
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        finish(record, CommandStatus::Error(reason))
                    }
                }
            }
            ("command", Some("interval")) if words.len() == 3 => match secs {
                Some(secs) => {
                    let outcome = self.settings.set_command_interval(secs);
                    interval_outcome(record, outcome, secs)
                }
                None => invalid(record),
            },
            ("arp", Some("interval")) if words.len() == 3 => match secs {
                Some(secs) => {
                    let outcome = self.settings.set_liveness_interval(secs);
                    interval_outcome(record, outcome, secs)
                }
                None => invalid(record),
            },
            _ => invalid(record),
        }
    }
}

/// `devices save`, `devices load [file]`, `devices files list`. Root only.
pub struct SnapshotHandler {
    devices: DeviceStore,
    data_dir: PathBuf,
}

impl SnapshotHandler {
    pub fn new(devices: DeviceStore, data_dir: impl Into<PathBuf>) -> Self {
        Self { devices, data_dir: data_dir.into() }
    }

    async fn run(&self, words: &[&str]) -> Result<String> {
        match words {
            ["devices", "save"] => {
                let path = self.devices.save_snapshot(&self.data_dir).await?;
                Ok(path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default())
            }
            ["devices", "load"] => {
                let count = self.devices.load_snapshot(&self.data_dir, None).await?;
                Ok(format!("loaded {} devices", count))
            }
            ["devices", "load", file] => {
                let count = self.devices.load_snapshot(&self.data_dir, Some(*file)).await?;
                Ok(format!("loaded {} devices", count))
            }
            ["devices", "files", "list"] => Ok(list_snapshots(&self.data_dir).await?.join("\n")),
            _ => Err(FleetError::InvalidCommand(words.join(" "))),
        }
    }
}

#[async_trait]
impl CommandHandler for SnapshotHandler {
    fn verbs(&self) -> &'static [&'static str] {
        &["devices"]
    }

    async fn handle(&self, mut record: CommandRecord) -> CommandRecord {
        let command = record.command.clone();
        let words: Vec<&str> = command.split_whitespace().collect();
        match self.run(&words).await {
            Ok(result) => {
                record.result = result;
                finish(record, CommandStatus::Ok)
            }
            Err(FleetError::InvalidCommand(_)) => invalid(record),
            Err(e) => {
                let reason = e.to_string();
                finish(record, CommandStatus::Error(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<DeviceRequest>>,
        fail: bool,
        sweep: Vec<DeviceRecord>,
    }

    #[async_trait]
    impl DeviceProtocol for Recorder {
        async fn execute(&self, request: DeviceRequest) -> Result<String> {
            self.requests.lock().push(request);
            if self.fail {
                return Err(FleetError::Execution("telnet timeout".into()));
            }
            Ok("done\n".into())
        }

        async fn scan(&self, _protocol: ScanProtocol) -> Result<Vec<DeviceRecord>> {
            Ok(self.sweep.clone())
        }
    }

    fn switch(mac: &str, model: &str) -> DeviceRecord {
        DeviceRecord {
            mac: mac.into(),
            model_name: model.into(),
            ip_address: "192.168.1.5".into(),
            ..Default::default()
        }
    }

    fn action_handler(devices: &DeviceStore, protocol: Arc<Recorder>) -> DeviceActionHandler {
        DeviceActionHandler::new(devices.clone(), protocol)
    }

    #[tokio::test]
    async fn unknown_target_is_pending_with_dev_id() {
        let handler = action_handler(&DeviceStore::new(), Arc::new(Recorder::default()));
        let done = handler.handle(CommandRecord::new("beep 00:60:e9:00:00:01 1.2.3.4")).await;
        assert_eq!(done.status, CommandStatus::pending("device not found"));
        assert_eq!(done.dev_id.as_deref(), Some("00-60-E9-00-00-01"));
    }

    #[tokio::test]
    async fn beep_known_device() {
        let devices = DeviceStore::new();
        devices.insert(switch("00-60-E9-00-00-01", "EH7508"));
        let protocol = Arc::new(Recorder::default());
        let handler = action_handler(&devices, protocol.clone());

        let done = handler.handle(CommandRecord::new("beep 00-60-E9-00-00-01 192.168.1.5")).await;
        assert_eq!(done.status, CommandStatus::Ok);
        assert_eq!(done.result, "done");
        assert_eq!(protocol.requests.lock()[0].action, "beep");
    }

    #[tokio::test]
    async fn reset_refuses_locked_device_and_releases_its_own_lock() {
        let devices = DeviceStore::new();
        devices.insert(switch("00-60-E9-00-00-01", "EH7508"));
        let handler = action_handler(&devices, Arc::new(Recorder::default()));
        let command = "reset 00-60-E9-00-00-01 192.168.1.5 admin default";

        devices.lock("00-60-E9-00-00-01").unwrap();
        let done = handler.handle(CommandRecord::new(command)).await;
        assert_eq!(done.status, CommandStatus::pending("device locked"));

        devices.unlock("00-60-E9-00-00-01").unwrap();
        let done = handler.handle(CommandRecord::new(command)).await;
        assert_eq!(done.status, CommandStatus::Ok);
        assert!(!devices.is_locked("00-60-E9-00-00-01").unwrap());
    }

    #[tokio::test]
    async fn execution_failure_is_terminal_error() {
        let devices = DeviceStore::new();
        devices.insert(switch("00-60-E9-00-00-01", "EH7508"));
        let protocol = Arc::new(Recorder { fail: true, ..Default::default() });
        let handler = action_handler(&devices, protocol);

        let done = handler
            .handle(CommandRecord::new("reboot 00-60-E9-00-00-01 192.168.1.5 admin default"))
            .await;
        assert_eq!(done.status, CommandStatus::error("telnet timeout"));
    }

    #[tokio::test]
    async fn switch_cli_checks_model() {
        let devices = DeviceStore::new();
        devices.insert(switch("00-60-E9-00-00-01", "EH7508"));
        devices.insert(switch("00-60-E9-00-00-02", "EDS-405"));
        devices.insert(switch("00-60-E9-00-00-03", ""));
        let protocol = Arc::new(Recorder::default());
        let handler = action_handler(&devices, protocol.clone());

        let done = handler.handle(CommandRecord::new("switch 00-60-E9-00-00-01 admin default show ip")).await;
        assert_eq!(done.status, CommandStatus::Ok);
        let request = protocol.requests.lock()[0].clone();
        assert_eq!(request.args, "show ip");
        assert_eq!(request.ip, "192.168.1.5");

        let done = handler.handle(CommandRecord::new("switch 00-60-E9-00-00-02 admin default show ip")).await;
        assert_eq!(done.status, CommandStatus::error("switch cli not available"));

        let done = handler.handle(CommandRecord::new("switch 00-60-E9-00-00-03 admin default show ip")).await;
        assert_eq!(done.status, CommandStatus::error("invalid device model"));
    }

    #[tokio::test]
    async fn malformed_arguments_are_invalid() {
        let handler = action_handler(&DeviceStore::new(), Arc::new(Recorder::default()));
        let done = handler.handle(CommandRecord::new("beep 00-60-E9-00-00-01")).await;
        assert_eq!(done.status, CommandStatus::error("invalid command"));
    }

    #[tokio::test]
    async fn scan_inserts_through_merge_rule() {
        let devices = DeviceStore::new();
        let protocol = Arc::new(Recorder {
            sweep: vec![switch("00-60-E9-00-00-01", "EH7508"), DeviceRecord { mac: "bogus".into(), ..Default::default() }],
            ..Default::default()
        });
        let handler = ScanHandler::new("c1", devices.clone(), protocol);

        let done = handler.handle(CommandRecord::new("scan snmp")).await;
        assert_eq!(done.status, CommandStatus::Ok);
        assert_eq!(done.result, "2 devices reported, 1 accepted");
        let stored = devices.find("00-60-E9-00-00-01").unwrap();
        assert_eq!(stored.scan_protocol, ScanProtocol::Snmp);
        assert_eq!(stored.scanned_by, "c1");

        let done = handler.handle(CommandRecord::new("scan arp")).await;
        assert_eq!(done.status, CommandStatus::error("invalid command"));
    }

    #[tokio::test]
    async fn interval_commands_enforce_bounds() {
        let settings = RuntimeSettings::default();
        let handler = AdminHandler::new(CommandQueue::new("c1"), settings.clone());

        let done = handler.handle(CommandRecord::new("arp interval 0")).await;
        assert_eq!(done.status.to_string(), "error: interval range 1-3600 seconds");

        let done = handler.handle(CommandRecord::new("command interval 30")).await;
        assert_eq!(done.status, CommandStatus::Ok);
        assert_eq!(settings.command_interval(), Duration::from_secs(30));

        let done = handler.handle(CommandRecord::new("command interval soon")).await;
        assert_eq!(done.status, CommandStatus::error("invalid command"));
    }

    #[tokio::test]
    async fn command_delete_removes_key() {
        let queue = CommandQueue::new("c1");
        queue.insert(CommandRecord::from_cli("all scan gwd"), &["c1".to_string()]);
        let handler = AdminHandler::new(queue.clone(), RuntimeSettings::default());

        let done = handler.handle(CommandRecord::new("command delete @c1 scan gwd")).await;
        assert_eq!(done.status, CommandStatus::Ok);
        assert!(queue.is_empty());

        let done = handler.handle(CommandRecord::new("command delete @c1 scan gwd")).await;
        assert!(done.status.is_terminal());
        assert_ne!(done.status, CommandStatus::Ok);
    }

    #[tokio::test]
    async fn snapshot_commands() {
        let dir = tempfile::tempdir().unwrap();
        let devices = DeviceStore::new();
        devices.insert(switch("00-60-E9-00-00-01", "EH7508"));
        let handler = SnapshotHandler::new(devices, dir.path());

        let saved = handler.handle(CommandRecord::new("devices save")).await;
        assert_eq!(saved.status, CommandStatus::Ok);

        let listed = handler.handle(CommandRecord::new("devices files list")).await;
        assert_eq!(listed.result, saved.result);

        let loaded = handler.handle(CommandRecord::new(format!("devices load {}", saved.result))).await;
        assert_eq!(loaded.result, "loaded 1 devices");

        let missing = handler.handle(CommandRecord::new("devices load devices-nope.json")).await;
        assert!(matches!(missing.status, CommandStatus::Error(_)));
    }

    #[test]
    fn root_commands() {
        assert!(is_root_command("devices save"));
        assert!(is_root_command("devices load devices-20240301T100000.json"));
        assert!(is_root_command("devices files list"));
        assert!(!is_root_command("scan gwd"));
        assert!(!is_root_command("devices erase all"));
    }
}
