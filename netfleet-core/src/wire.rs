//! JSON shapes exchanged between root and clients.
//!
//! A command table is an object keyed by the wire form of the key
//! (`"@c1 scan gwd"`), each value carrying the legacy string status. A device
//! table is an object keyed by mac. Conversion to and from the typed records
//! happens here and nowhere else.

use crate::command::{CommandKey, CommandRecord, CommandStatus, InsertOptions};
use crate::device::DeviceRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandInfo {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client: String,
    #[serde(rename = "devid", default, skip_serializing_if = "String::is_empty")]
    pub dev_id: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub all: bool,
    #[serde(rename = "nooverwrite", default, skip_serializing_if = "std::ops::Not::not")]
    pub no_overwrite: bool,
    #[serde(rename = "nosyslog", default, skip_serializing_if = "std::ops::Not::not")]
    pub no_syslog: bool,
}

pub type CommandTable = BTreeMap<String, CommandInfo>;
pub type DeviceTable = BTreeMap<String, DeviceRecord>;

impl From<&CommandRecord> for CommandInfo {
    fn from(record: &CommandRecord) -> Self {
        Self {
            timestamp: record.timestamp.map(|t| t.to_rfc3339()).unwrap_or_default(),
            command: record.command.clone(),
            result: record.result.clone(),
            status: record.status.to_string(),
            name: record.name.clone(),
            retries: record.retries,
            client: record.client.clone().unwrap_or_default(),
            dev_id: record.dev_id.clone().unwrap_or_default(),
            all: record.options.all,
            no_overwrite: record.options.no_overwrite,
            no_syslog: record.options.no_syslog,
        }
    }
}

impl CommandInfo {
    /// Builds the typed record. The wire key wins over the body for the
    /// addressing; an empty `command` falls back to the key text.
    pub fn into_record(self, wire_key: &str) -> CommandRecord {
        let key = CommandKey::parse(wire_key);
        let client = key.client.or_else(|| (!self.client.is_empty()).then_some(self.client));
        let command = if key.text.is_empty() { self.command } else { key.text };
        CommandRecord {
            command,
            timestamp: DateTime::parse_from_rfc3339(&self.timestamp)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            status: CommandStatus::parse(&self.status),
            result: self.result,
            retries: self.retries,
            name: self.name,
            client,
            dev_id: (!self.dev_id.is_empty()).then_some(self.dev_id),
            options: InsertOptions {
                all: self.all,
                no_overwrite: self.no_overwrite,
                no_syslog: self.no_syslog,
            },
        }
    }
}

pub fn encode_commands<'a>(records: impl IntoIterator<Item = &'a CommandRecord>) -> CommandTable {
    records
        .into_iter()
        .map(|record| (record.key().to_string(), CommandInfo::from(record)))
        .collect()
}

pub fn decode_commands(table: CommandTable) -> Vec<CommandRecord> {
    table
        .into_iter()
        .map(|(key, info)| info.into_record(&key))
        .collect()
}

pub fn encode_devices<'a>(records: impl IntoIterator<Item = &'a DeviceRecord>) -> DeviceTable {
    records
        .into_iter()
        .map(|record| (record.mac.clone(), record.clone()))
        .collect()
}
