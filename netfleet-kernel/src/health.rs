use netfleet_core::RootSync;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct KernelHealth {
    pub name: String,
    pub uptime_seconds: u64,
    pub devices_tracked: u32,
    pub commands_total: u32,
    pub commands_open: u32,
    pub clients_registered: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self { start_time: Instant::now() }
    }

    pub fn get_health(&self, sync: &RootSync) -> KernelHealth {
        let queue = sync.queue();
        KernelHealth {
            name: queue.name().to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            devices_tracked: sync.devices().len() as u32,
            commands_total: queue.len() as u32,
            commands_open: queue.runnable_keys().len() as u32,
            clients_registered: sync.clients().len() as u32,
        }
    }
}
