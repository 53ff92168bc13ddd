//! Registry of client nodes known to the root.
//!
//! Other records reference clients by name only, so a client that stopped
//! registering simply lingers here with an old `last_registered`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Metadata a client sends with every registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub num_devices: usize,
    #[serde(default)]
    pub num_cmds: usize,
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub now: i64,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRegistration {
    pub info: ClientInfo,
    pub first_registered: DateTime<Utc>,
    pub last_registered: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<Mutex<BTreeMap<String, ClientRegistration>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records (or refreshes) a client. Returns true on first registration.
    pub fn register(&self, info: ClientInfo) -> bool {
        let now = Utc::now();
        let mut clients = self.clients.lock();
        match clients.get_mut(&info.name) {
            Some(existing) => {
                debug!(client = %info.name, "client re-registered");
                existing.info = info;
                existing.last_registered = now;
                false
            }
            None => {
                info!(client = %info.name, "client registered");
                clients.insert(
                    info.name.clone(),
                    ClientRegistration { info, first_registered: now, last_registered: now },
                );
                true
            }
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.clients.lock().keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<ClientRegistration> {
        self.clients.lock().get(name).cloned()
    }

    pub fn list(&self) -> Vec<ClientRegistration> {
        self.clients.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_refresh() {
        let registry = ClientRegistry::new();
        assert!(registry.register(ClientInfo { name: "c1".into(), ..Default::default() }));
        assert!(!registry.register(ClientInfo { name: "c1".into(), num_devices: 3, ..Default::default() }));
        assert!(registry.register(ClientInfo { name: "c2".into(), ..Default::default() }));

        assert_eq!(registry.names(), vec!["c1".to_string(), "c2".to_string()]);
        assert_eq!(registry.get("c1").unwrap().info.num_devices, 3);
        assert!(registry.get("c3").is_none());
    }

    #[test]
    fn info_uses_camel_case_on_the_wire() {
        let json = serde_json::to_value(ClientInfo {
            name: "c1".into(),
            ip_addresses: vec!["10.0.0.2".into()],
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["ipAddresses"][0], "10.0.0.2");
        assert_eq!(json["numDevices"], 0);
    }
}
