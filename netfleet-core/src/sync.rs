//! Root/client replication.
//!
//! Clients pull the commands meant for them, run them, then push their whole
//! command table back. Devices flow one way, client to root, as the client's
//! store changes. Both halves merge key by key through the queue and store
//! rules, so replaying a snapshot is harmless.

use crate::clients::{ClientInfo, ClientRegistry};
use crate::command::{CommandKey, CommandRecord, CommandStatus};
use crate::device::{DeviceRecord, DeviceStore};
use crate::dispatch::CommandDispatcher;
use crate::error::Result;
use crate::handlers::is_root_command;
use crate::queue::CommandQueue;
use crate::settings::RuntimeSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How a client reaches the root. Every failure is a `Transport` error and
/// the caller simply tries again next cycle.
#[async_trait]
pub trait RootTransport: Send + Sync {
    async fn pull(&self, client: &str) -> Result<Vec<CommandRecord>>;
    async fn push(&self, records: Vec<CommandRecord>) -> Result<()>;
    async fn push_devices(&self, devices: Vec<DeviceRecord>) -> Result<()>;
    async fn register(&self, info: ClientInfo) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pulled: usize,
    pub accepted: usize,
    pub executed: usize,
    pub pushed: usize,
}

/// Client half.
#[derive(Clone)]
pub struct ReplicationSync {
    queue: CommandQueue,
    devices: DeviceStore,
    dispatcher: CommandDispatcher,
    transport: Arc<dyn RootTransport>,
    started: DateTime<Utc>,
}

impl ReplicationSync {
    pub fn new(
        queue: CommandQueue,
        devices: DeviceStore,
        dispatcher: CommandDispatcher,
        transport: Arc<dyn RootTransport>,
    ) -> Self {
        Self { queue, devices, dispatcher, transport, started: Utc::now() }
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn devices(&self) -> &DeviceStore {
        &self.devices
    }

    /// Pull, execute, push. A failed pull leaves the local table untouched.
    pub async fn run_cycle(&self) -> Result<SyncReport> {
        let pulled = self.transport.pull(self.queue.name()).await?;
        let mut report = SyncReport { pulled: pulled.len(), ..Default::default() };
        report.accepted = self.queue.merge_pulled(pulled);
        report.executed = self.queue.run_pending(&self.dispatcher, &self.devices).await;

        let table: Vec<CommandRecord> = self.queue.snapshot().into_values().collect();
        report.pushed = table.len();
        self.transport.push(table).await?;

        debug!(
            pulled = report.pulled,
            accepted = report.accepted,
            executed = report.executed,
            pushed = report.pushed,
            "command cycle done"
        );
        Ok(report)
    }

    pub async fn register(&self, ip_addresses: Vec<String>) -> Result<()> {
        let info = ClientInfo {
            name: self.queue.name().to_string(),
            num_devices: self.devices.len(),
            num_cmds: self.queue.len(),
            start: self.started.timestamp(),
            now: Utc::now().timestamp(),
            ip_addresses,
        };
        self.transport.register(info).await
    }

    pub async fn publish_devices(&self, devices: Vec<DeviceRecord>) -> Result<()> {
        if devices.is_empty() {
            return Ok(());
        }
        let count = devices.len();
        self.transport.push_devices(devices).await?;
        debug!(count, "pushed device changes");
        Ok(())
    }

    /// Command-check loop; the interval is re-read after every cycle.
    pub fn spawn_command_loop(self, settings: RuntimeSettings) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(e) = self.run_cycle().await {
                    warn!("command cycle failed: {}", e);
                }
                tokio::time::sleep(settings.command_interval()).await;
            }
        })
    }

    /// Drains the store's change feed and forwards each burst as one batch,
    /// the newest record per mac winning.
    pub fn spawn_device_publisher(self, mut changes: mpsc::UnboundedReceiver<DeviceRecord>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(first) = changes.recv().await {
                let mut batch = BTreeMap::new();
                batch.insert(first.mac.clone(), first);
                while let Ok(next) = changes.try_recv() {
                    batch.insert(next.mac.clone(), next);
                }
                if let Err(e) = self.publish_devices(batch.into_values().collect()).await {
                    warn!("device push failed: {}", e);
                }
            }
            debug!("device change feed closed");
        })
    }
}

/// Root half: what the HTTP surface calls into.
#[derive(Clone)]
pub struct RootSync {
    queue: CommandQueue,
    devices: DeviceStore,
    clients: ClientRegistry,
    dispatcher: CommandDispatcher,
}

impl RootSync {
    /// `dispatcher` only needs the handlers for root-only commands.
    pub fn new(queue: CommandQueue, devices: DeviceStore, clients: ClientRegistry, dispatcher: CommandDispatcher) -> Self {
        Self { queue, devices, clients, dispatcher }
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn devices(&self) -> &DeviceStore {
        &self.devices
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn serve_pull(&self, client: &str) -> Vec<CommandRecord> {
        let records = self.queue.pull_for(client);
        debug!(client, count = records.len(), "serving pull");
        records
    }

    /// Operator insert. Root-only commands run right away and are stored with
    /// their outcome, stamped with the root's name so no client pulls them.
    pub async fn submit(&self, mut record: CommandRecord) -> Vec<CommandKey> {
        if record.client.is_none() {
            let parsed = CommandRecord::from_cli(&record.command);
            record.options.all |= parsed.options.all;
            record.command = parsed.command;
        }
        if !is_root_command(&record.command) {
            return self.queue.insert(record, &self.clients.names());
        }

        record.name = self.queue.name().to_string();
        record.options.all = false;
        record.status = CommandStatus::New;
        record.timestamp.get_or_insert_with(Utc::now);
        let keys = self.queue.insert(record.clone(), &[]);
        if keys.is_empty() {
            return keys;
        }
        let outcome = self.dispatcher.dispatch(record).await;
        info!(key = %outcome.key(), status = %outcome.status, "root command executed");
        self.queue.complete(outcome);
        keys
    }

    /// Records with a new status are operator inserts; anything else is a
    /// client reporting back.
    pub async fn accept(&self, records: Vec<CommandRecord>) -> usize {
        let (inserts, pushed): (Vec<_>, Vec<_>) =
            records.into_iter().partition(|record| record.status == CommandStatus::New);
        let mut accepted = 0;
        for record in inserts {
            accepted += self.submit(record).await.len();
        }
        accepted + self.accept_push(pushed)
    }

    pub fn accept_push(&self, records: Vec<CommandRecord>) -> usize {
        let offered = records.len();
        let accepted = self.queue.merge_pushed(records);
        debug!(offered, accepted, "merged pushed commands");
        accepted
    }

    pub fn accept_devices(&self, devices: Vec<DeviceRecord>) -> usize {
        devices.into_iter().filter(|device| self.devices.insert(device.clone())).count()
    }

    pub fn register(&self, info: ClientInfo) -> bool {
        self.clients.register(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FleetError;
    use crate::handlers::SnapshotHandler;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Talks to an in-process root; `down` simulates an unreachable root.
    struct Direct {
        root: RootSync,
        down: AtomicBool,
        pushes: Mutex<usize>,
    }

    impl Direct {
        fn check(&self) -> Result<()> {
            if self.down.load(Ordering::Relaxed) {
                return Err(FleetError::Transport("connection refused".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RootTransport for Direct {
        async fn pull(&self, client: &str) -> Result<Vec<CommandRecord>> {
            self.check()?;
            Ok(self.root.serve_pull(client))
        }

        async fn push(&self, records: Vec<CommandRecord>) -> Result<()> {
            self.check()?;
            *self.pushes.lock() += 1;
            self.root.accept_push(records);
            Ok(())
        }

        async fn push_devices(&self, devices: Vec<DeviceRecord>) -> Result<()> {
            self.check()?;
            self.root.accept_devices(devices);
            Ok(())
        }

        async fn register(&self, info: ClientInfo) -> Result<()> {
            self.check()?;
            self.root.register(info);
            Ok(())
        }
    }

    fn root() -> RootSync {
        RootSync::new(CommandQueue::new("root"), DeviceStore::new(), ClientRegistry::new(), CommandDispatcher::new())
    }

    fn client(root: &RootSync, name: &str) -> (ReplicationSync, Arc<Direct>) {
        let transport = Arc::new(Direct { root: root.clone(), down: AtomicBool::new(false), pushes: Mutex::new(0) });
        let sync = ReplicationSync::new(CommandQueue::new(name), DeviceStore::new(), CommandDispatcher::new(), transport.clone());
        (sync, transport)
    }

    #[tokio::test]
    async fn cycle_pulls_runs_and_pushes_back() {
        let root = root();
        let (c1, _) = client(&root, "c1");
        c1.register(vec!["10.0.0.10".into()]).await.unwrap();
        root.submit(CommandRecord::from_cli("all bogus verb")).await;

        let report = c1.run_cycle().await.unwrap();
        assert_eq!(report, SyncReport { pulled: 1, accepted: 1, executed: 1, pushed: 1 });

        let at_root = root.queue().get(&CommandKey::for_client("c1", "bogus verb")).unwrap();
        assert_eq!(at_root.status, CommandStatus::error("invalid command"));
        assert_eq!(at_root.name, "c1");
        assert!(root.serve_pull("c1").is_empty());
    }

    #[tokio::test]
    async fn unreachable_root_leaves_local_table_unchanged() {
        let root = root();
        let (c1, transport) = client(&root, "c1");
        root.submit(CommandRecord::new("bogus verb")).await;
        transport.down.store(true, Ordering::Relaxed);

        assert!(c1.run_cycle().await.is_err());
        assert!(c1.queue().is_empty());
        assert_eq!(*transport.pushes.lock(), 0);
    }

    #[tokio::test]
    async fn root_commands_run_at_insert_and_are_never_pulled() {
        let dir = tempfile::tempdir().unwrap();
        let devices = DeviceStore::new();
        let dispatcher = CommandDispatcher::new()
            .with_handler(Arc::new(SnapshotHandler::new(devices.clone(), dir.path())));
        let root = RootSync::new(CommandQueue::new("root"), devices, ClientRegistry::new(), dispatcher);

        let keys = root.submit(CommandRecord::new("devices files list")).await;
        let stored = root.queue().get(&keys[0]).unwrap();
        assert_eq!(stored.status, CommandStatus::Ok);
        assert_eq!(stored.name, "root");
        assert!(root.serve_pull("c1").is_empty());
    }

    #[tokio::test]
    async fn accept_splits_inserts_from_pushes() {
        let root = root();
        root.accept_push(vec![CommandRecord { status: CommandStatus::Ok, ..CommandRecord::new("scan gwd") }]);

        let accepted = root
            .accept(vec![
                CommandRecord { status: CommandStatus::pending("late"), ..CommandRecord::new("scan gwd") },
                CommandRecord::new("scan snmp"),
            ])
            .await;
        assert_eq!(accepted, 1);
        assert_eq!(root.queue().get(&CommandKey::new("scan gwd")).unwrap().status, CommandStatus::Ok);
        assert_eq!(root.queue().get(&CommandKey::new("scan snmp")).unwrap().status, CommandStatus::New);
    }

    #[tokio::test]
    async fn device_publisher_batches_by_mac() {
        let root = root();
        let (tx, rx) = mpsc::unbounded_channel();
        let (c1, _) = client(&root, "c1");
        let devices = DeviceStore::new().with_change_feed(tx);

        devices.insert(DeviceRecord { mac: "00-60-E9-00-00-01".into(), ..Default::default() });
        devices.update("00-60-E9-00-00-01", |d| d.hostname = "sw-1".into()).unwrap();
        drop(devices);

        c1.spawn_device_publisher(rx).await.unwrap();
        assert_eq!(root.devices().len(), 1);
    }

    #[tokio::test]
    async fn registration_reports_counts() {
        let root = root();
        let (c1, _) = client(&root, "c1");
        c1.devices().insert(DeviceRecord { mac: "00-60-E9-00-00-01".into(), ..Default::default() });
        c1.register(vec![]).await.unwrap();

        let registration = root.clients().get("c1").unwrap();
        assert_eq!(registration.info.num_devices, 1);
        assert_eq!(root.clients().names(), vec!["c1".to_string()]);
    }
}
