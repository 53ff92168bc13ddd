/*!
Scripted liveness transport.

Tests decide which macs answer on which interface before each cycle; an
interface can also be marked broken to exercise the failure path.
*/

use async_trait::async_trait;
use netfleet_core::{FleetError, LivenessTransport, Observation, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct ScriptedProbe {
    answers: Arc<Mutex<BTreeMap<String, Vec<Observation>>>>,
    broken: Arc<Mutex<BTreeSet<String>>>,
    broadcasts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces what `interface` reports next cycle.
    pub fn answer(&self, interface: &str, seen: &[(&str, &str)]) {
        let seen = seen
            .iter()
            .map(|(mac, ip)| Observation { mac: mac.to_string(), ip: ip.to_string() })
            .collect();
        self.answers.lock().insert(interface.to_string(), seen);
    }

    pub fn silence(&self, interface: &str) {
        self.answer(interface, &[]);
    }

    pub fn break_interface(&self, interface: &str) {
        self.broken.lock().insert(interface.to_string());
    }

    pub fn broadcasts(&self) -> Vec<String> {
        self.broadcasts.lock().clone()
    }
}

#[async_trait]
impl LivenessTransport for ScriptedProbe {
    async fn interfaces(&self) -> Result<Vec<String>> {
        let mut names: BTreeSet<String> = self.answers.lock().keys().cloned().collect();
        names.extend(self.broken.lock().iter().cloned());
        Ok(names.into_iter().collect())
    }

    async fn broadcast(&self, interface: &str) -> Result<()> {
        self.broadcasts.lock().push(interface.to_string());
        Ok(())
    }

    async fn probe(&self, interface: &str, _deadline: Duration) -> Result<Vec<Observation>> {
        if self.broken.lock().contains(interface) {
            return Err(FleetError::Transport(format!("{} is down", interface)));
        }
        Ok(self.answers.lock().get(interface).cloned().unwrap_or_default())
    }
}
