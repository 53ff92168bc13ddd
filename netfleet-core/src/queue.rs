//! Per-node command table with the retry/cancellation policy and the merge
//! rules used by replication.
//!
//! Terminal records (`ok`, `error: ...`) are sticky: no merge, local or
//! remote, changes them once reached. Only an explicit operator insert or
//! delete replaces them.

use crate::command::{CommandKey, CommandRecord, CommandStatus, MAX_ATTEMPTS};
use crate::device::DeviceStore;
use crate::dispatch::CommandDispatcher;
use crate::error::{FleetError, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub type CommandsMap = BTreeMap<CommandKey, CommandRecord>;

#[derive(Clone)]
pub struct CommandQueue {
    name: String,
    commands: Arc<Mutex<CommandsMap>>,
    // serializes execution cycles so retry counts are never raced
    run_guard: Arc<tokio::sync::Mutex<()>>,
}

impl CommandQueue {
    /// `name` is this node's name, stamped on records it executes or accepts.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: Arc::new(Mutex::new(BTreeMap::new())),
            run_guard: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Operator insert. With `options.all` the record is copied once per
    /// client in `clients`, keyed `@<client> <text>`. An existing key is only
    /// protected when `options.no_overwrite` is set. Returns the keys written.
    pub fn insert(&self, record: CommandRecord, clients: &[String]) -> Vec<CommandKey> {
        let mut record = record;
        record.status = CommandStatus::New;
        record.retries = 0;
        if record.timestamp.is_none() {
            record.timestamp = Some(Utc::now());
        }

        let copies: Vec<CommandRecord> = if record.options.all {
            if clients.is_empty() {
                warn!(command = %record.command, "no registered clients to fan out to");
            }
            clients
                .iter()
                .map(|client| CommandRecord { client: Some(client.clone()), ..record.clone() })
                .collect()
        } else {
            vec![record]
        };

        let mut written = Vec::new();
        let mut commands = self.commands.lock();
        for copy in copies {
            let key = copy.key();
            if copy.options.no_overwrite && commands.contains_key(&key) {
                debug!(%key, "insert rejected, key exists and no-overwrite is set");
                continue;
            }
            info!(%key, "command queued");
            commands.insert(key.clone(), copy);
            written.push(key);
        }
        written
    }

    pub fn get(&self, key: &CommandKey) -> Option<CommandRecord> {
        self.commands.lock().get(key).cloned()
    }

    pub fn delete(&self, key: &CommandKey) -> Result<CommandRecord> {
        self.commands
            .lock()
            .remove(key)
            .ok_or_else(|| FleetError::command_not_found(key.to_string()))
    }

    pub fn snapshot(&self) -> CommandsMap {
        self.commands.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.commands.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.lock().is_empty()
    }

    pub fn runnable_keys(&self) -> Vec<CommandKey> {
        self.commands
            .lock()
            .iter()
            .filter(|(_, record)| record.status.is_runnable())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Root side of a pull: runnable records that `client` may run. Records
    /// addressed to other clients and records this node consumed itself are
    /// withheld.
    pub fn pull_for(&self, client: &str) -> Vec<CommandRecord> {
        self.commands
            .lock()
            .iter()
            .filter(|(key, record)| {
                record.status.is_runnable() && key.is_addressed_to(client) && record.name != self.name
            })
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Client side of a pull. Local no-overwrite records and local terminal
    /// records are kept; everything else is taken and stamped with this
    /// node's name. Returns how many records were accepted.
    pub fn merge_pulled(&self, records: Vec<CommandRecord>) -> usize {
        let mut accepted = 0;
        let mut commands = self.commands.lock();
        for mut record in records {
            let key = record.key();
            if let Some(local) = commands.get(&key) {
                if local.options.no_overwrite || local.status.is_terminal() {
                    debug!(%key, "keeping local copy of pulled command");
                    continue;
                }
                record.retries = record.retries.max(local.retries);
                record.options = local.options;
            }
            record.name = self.name.clone();
            commands.insert(key, record);
            accepted += 1;
        }
        accepted
    }

    /// Root side of a push. A pushed record replaces the local copy unless
    /// the local copy is terminal. Missing timestamps are backfilled.
    pub fn merge_pushed(&self, records: Vec<CommandRecord>) -> usize {
        let mut accepted = 0;
        let mut commands = self.commands.lock();
        for mut record in records {
            let key = record.key();
            if let Some(local) = commands.get(&key) {
                if local.status.is_terminal() {
                    debug!(%key, status = %local.status, "terminal status is sticky, push ignored");
                    continue;
                }
                record.options = local.options;
            }
            if record.timestamp.is_none() {
                record.timestamp = Some(Utc::now());
            }
            commands.insert(key, record);
            accepted += 1;
        }
        accepted
    }

    /// Stores the outcome of a local execution. Skipped if the record was
    /// deleted or turned terminal while the handler ran.
    pub fn complete(&self, record: CommandRecord) -> bool {
        let key = record.key();
        let mut commands = self.commands.lock();
        match commands.get(&key) {
            Some(current) if current.status.is_terminal() => {
                debug!(%key, "record turned terminal during execution, result dropped");
                false
            }
            Some(_) => {
                commands.insert(key, record);
                true
            }
            None => {
                debug!(%key, "record deleted during execution, result dropped");
                false
            }
        }
    }

    /// One execution pass: every runnable record is attempted exactly once,
    /// strictly one after the other. Returns the number of attempts made.
    pub async fn run_pending(&self, dispatcher: &CommandDispatcher, devices: &DeviceStore) -> usize {
        let _guard = self.run_guard.lock().await;
        let mut attempts = 0;

        for key in self.runnable_keys() {
            let Some(mut record) = self.get(&key) else { continue };
            if !record.status.is_runnable() {
                continue;
            }
            if matches!(record.status, CommandStatus::Pending(_)) {
                record.retries += 1;
            }
            record.name = self.name.clone();

            let outcome = dispatcher.dispatch(record).await;
            let outcome = apply_retry_policy(outcome, devices);
            attempts += 1;
            self.complete(outcome);
        }
        attempts
    }
}

/// Cancels a record that is still pending after its last allowed attempt.
fn apply_retry_policy(mut record: CommandRecord, devices: &DeviceStore) -> CommandRecord {
    if !matches!(record.status, CommandStatus::Pending(_)) || record.retries + 1 < MAX_ATTEMPTS {
        return record;
    }
    let note = record
        .dev_id
        .as_deref()
        .filter(|dev| !devices.contains(dev))
        .map(|dev| format!("device {} not found", dev));
    warn!(command = %record.command, retries = record.retries, "cancelling command, too many retries");
    record.status = CommandStatus::Cancelled(note);
    record
}
