/*!
Loopback transport: a client talks to an in-process root without HTTP.

Requests go through the same wire encoding as the real transport, so what the
root sees is exactly what it would decode off the network. The link can be
cut to simulate an unreachable root.
*/

use async_trait::async_trait;
use netfleet_core::wire;
use netfleet_core::{ClientInfo, CommandRecord, DeviceRecord, FleetError, Result, RootSync, RootTransport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Pull,
    Push,
    PushDevices,
    Register,
}

#[derive(Clone)]
pub struct LoopbackTransport {
    root: RootSync,
    down: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl LoopbackTransport {
    pub fn new(root: RootSync) -> Self {
        Self {
            root,
            down: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::Relaxed);
    }

    /// Calls that reached the root, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn reach(&self, call: Call) -> Result<()> {
        if self.down.load(Ordering::Relaxed) {
            return Err(FleetError::Transport("loopback link down".into()));
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl RootTransport for LoopbackTransport {
    async fn pull(&self, client: &str) -> Result<Vec<CommandRecord>> {
        self.reach(Call::Pull)?;
        let table = wire::encode_commands(&self.root.serve_pull(client));
        Ok(wire::decode_commands(table))
    }

    async fn push(&self, records: Vec<CommandRecord>) -> Result<()> {
        self.reach(Call::Push)?;
        let table = wire::encode_commands(&records);
        self.root.accept(wire::decode_commands(table)).await;
        Ok(())
    }

    async fn push_devices(&self, devices: Vec<DeviceRecord>) -> Result<()> {
        self.reach(Call::PushDevices)?;
        let table = wire::encode_devices(&devices);
        self.root.accept_devices(table.into_values().collect());
        Ok(())
    }

    async fn register(&self, info: ClientInfo) -> Result<()> {
        self.reach(Call::Register)?;
        self.root.register(info);
        Ok(())
    }
}
