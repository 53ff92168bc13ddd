/*!
Mock device protocol. Records every request, answers with a canned output,
and can be told to fail specific actions or return a scan sweep.
*/

use async_trait::async_trait;
use netfleet_core::{DeviceProtocol, DeviceRecord, DeviceRequest, FleetError, Result, ScanProtocol};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MockProtocol {
    requests: Arc<Mutex<Vec<DeviceRequest>>>,
    failing: Arc<Mutex<HashSet<&'static str>>>,
    sweeps: Arc<Mutex<BTreeMap<&'static str, Vec<DeviceRecord>>>>,
}

fn sweep_key(protocol: ScanProtocol) -> &'static str {
    match protocol {
        ScanProtocol::Gwd => "gwd",
        ScanProtocol::Snmp => "snmp",
    }
}

impl MockProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, action: &'static str) {
        self.failing.lock().insert(action);
    }

    pub fn sweep(&self, protocol: ScanProtocol, devices: Vec<DeviceRecord>) {
        self.sweeps.lock().insert(sweep_key(protocol), devices);
    }

    pub fn requests(&self) -> Vec<DeviceRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self, action: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.action == action).count()
    }
}

#[async_trait]
impl DeviceProtocol for MockProtocol {
    async fn execute(&self, request: DeviceRequest) -> Result<String> {
        let action = request.action;
        let mac = request.mac.clone();
        self.requests.lock().push(request);
        if self.failing.lock().contains(action) {
            return Err(FleetError::Execution(format!("{} failed on {}", action, mac)));
        }
        Ok(format!("{} {} ok", action, mac))
    }

    async fn scan(&self, protocol: ScanProtocol) -> Result<Vec<DeviceRecord>> {
        let key = sweep_key(protocol);
        self.requests.lock().push(DeviceRequest { action: "scan", args: key.to_string(), ..Default::default() });
        if self.failing.lock().contains("scan") {
            return Err(FleetError::Execution("scan failed".into()));
        }
        Ok(self.sweeps.lock().get(key).cloned().unwrap_or_default())
    }
}
