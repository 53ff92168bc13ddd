/*!
Cluster harness: one in-process root and any number of clients wired
together through [`LoopbackTransport`], each client with a mock device
protocol and a scripted liveness probe.
*/

use crate::fixtures::RecordingNotifier;
use crate::probe_stub::ScriptedProbe;
use crate::protocol_stub::MockProtocol;
use crate::transport_stub::LoopbackTransport;
use anyhow::{Context, Result};
use netfleet_core::{
    AdminHandler, ClientRegistry, CommandDispatcher, CommandKey, CommandQueue, CommandRecord, CommandStatus,
    DeviceActionHandler, DeviceRecord, DeviceStore, LivenessProbe, LivenessReport, ReplicationSync, RootSync,
    RuntimeSettings, ScanHandler, SnapshotHandler, SyncReport,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

pub struct ClientNode {
    pub name: String,
    pub sync: ReplicationSync,
    pub devices: DeviceStore,
    pub queue: CommandQueue,
    pub settings: RuntimeSettings,
    pub protocol: MockProtocol,
    pub probe: ScriptedProbe,
    pub liveness: LivenessProbe,
    pub transport: LoopbackTransport,
    pub notifier: RecordingNotifier,
    changes: mpsc::UnboundedReceiver<DeviceRecord>,
}

impl ClientNode {
    fn new(name: &str, root: &RootSync) -> Self {
        let notifier = RecordingNotifier::new();
        let (changes_tx, changes) = mpsc::unbounded_channel();
        let devices = DeviceStore::new()
            .with_notifier(Arc::new(notifier.clone()))
            .with_change_feed(changes_tx);
        let queue = CommandQueue::new(name);
        let settings = RuntimeSettings::default();
        let protocol = MockProtocol::new();

        let dispatcher = CommandDispatcher::new()
            .with_handler(Arc::new(DeviceActionHandler::new(devices.clone(), Arc::new(protocol.clone()))))
            .with_handler(Arc::new(ScanHandler::new(name, devices.clone(), Arc::new(protocol.clone()))))
            .with_handler(Arc::new(AdminHandler::new(queue.clone(), settings.clone())));

        let transport = LoopbackTransport::new(root.clone());
        let sync = ReplicationSync::new(queue.clone(), devices.clone(), dispatcher, Arc::new(transport.clone()));
        let probe = ScriptedProbe::new();
        let liveness = LivenessProbe::new(devices.clone(), Arc::new(probe.clone()), Duration::from_millis(1));

        Self {
            name: name.to_string(),
            sync,
            devices,
            queue,
            settings,
            protocol,
            probe,
            liveness,
            transport,
            notifier,
            changes,
        }
    }

    pub async fn cycle(&self) -> Result<SyncReport> {
        Ok(self.sync.run_cycle().await?)
    }

    pub async fn register(&self) -> Result<()> {
        Ok(self.sync.register(vec!["127.0.0.1".into()]).await?)
    }

    /// Pushes whatever the change feed holds, batched by mac the way the
    /// publisher task does. Returns the batch size.
    pub async fn flush_devices(&mut self) -> Result<usize> {
        let mut batch = BTreeMap::new();
        while let Ok(record) = self.changes.try_recv() {
            batch.insert(record.mac.clone(), record);
        }
        let count = batch.len();
        self.sync.publish_devices(batch.into_values().collect()).await?;
        Ok(count)
    }

    pub async fn liveness_cycle(&self) -> Result<LivenessReport> {
        Ok(self.liveness.run_cycle().await?)
    }

    pub fn status(&self, key: &str) -> Option<CommandStatus> {
        self.queue.get(&CommandKey::parse(key)).map(|record| record.status)
    }
}

pub struct ClusterHarness {
    pub root: RootSync,
    pub root_notifier: RecordingNotifier,
    clients: BTreeMap<String, ClientNode>,
}

impl ClusterHarness {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Root able to run the snapshot commands against `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self::build(Some(data_dir.into()))
    }

    fn build(data_dir: Option<PathBuf>) -> Self {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();

        let root_notifier = RecordingNotifier::new();
        let devices = DeviceStore::new().with_notifier(Arc::new(root_notifier.clone()));
        let mut dispatcher = CommandDispatcher::new();
        if let Some(dir) = data_dir {
            dispatcher.register(Arc::new(SnapshotHandler::new(devices.clone(), dir)));
        }
        let root = RootSync::new(CommandQueue::new("root"), devices, ClientRegistry::new(), dispatcher);
        Self { root, root_notifier, clients: BTreeMap::new() }
    }

    /// Adds a client and registers it with the root.
    pub async fn add_client(&mut self, name: &str) -> Result<&mut ClientNode> {
        let node = ClientNode::new(name, &self.root);
        node.register().await?;
        Ok(self.clients.entry(name.to_string()).or_insert(node))
    }

    pub fn client(&self, name: &str) -> Result<&ClientNode> {
        self.clients.get(name).with_context(|| format!("no client {}", name))
    }

    pub fn client_mut(&mut self, name: &str) -> Result<&mut ClientNode> {
        self.clients.get_mut(name).with_context(|| format!("no client {}", name))
    }

    /// Operator insert at the root, `all ` prefix included.
    pub async fn submit(&self, text: &str) -> Vec<CommandKey> {
        self.root.submit(CommandRecord::from_cli(text)).await
    }

    pub fn root_record(&self, key: &str) -> Option<CommandRecord> {
        self.root.queue().get(&CommandKey::parse(key))
    }

    pub fn root_status(&self, key: &str) -> Option<CommandStatus> {
        self.root_record(key).map(|record| record.status)
    }

    /// One command cycle on every client, in name order.
    pub async fn cycle_all(&self) -> Result<()> {
        for node in self.clients.values() {
            node.cycle().await?;
        }
        Ok(())
    }
}

impl Default for ClusterHarness {
    fn default() -> Self {
        Self::new()
    }
}
