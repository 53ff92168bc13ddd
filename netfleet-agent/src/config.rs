//! Client configuration, read from `agent.toml`.
//!
//! Lookup order: `NETFLEET_AGENT_CONFIG`, then `<config dir>/netfleet-agent/agent.toml`.
//! A missing file means defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub root_url: String,
    pub api_key: String,
    pub command_interval_secs: u64,
    pub register_interval_secs: u64,
    pub liveness_interval_secs: u64,
    pub http_timeout_secs: u64,
    pub probe_deadline_ms: u64,
    pub protocol: ProtocolConfig,
}

/// External helper that speaks the switch protocols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// e.g. `fleetctl {action} --mac {mac} --ip {ip} -u {user} -p {pass} {args}`
    pub command: String,
    pub timeout_secs: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self { command: String::new(), timeout_secs: 30 }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "client".to_string(),
            root_url: "http://127.0.0.1:27182".to_string(),
            api_key: String::new(),
            command_interval_secs: 5,
            register_interval_secs: 60,
            liveness_interval_secs: 60,
            http_timeout_secs: 10,
            probe_deadline_ms: 3000,
            protocol: ProtocolConfig::default(),
        }
    }
}

impl AgentConfig {
    pub async fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn config_file_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("NETFLEET_AGENT_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        path.push("netfleet-agent");
        path.push("agent.toml");
        Ok(path)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn probe_deadline(&self) -> Duration {
        Duration::from_millis(self.probe_deadline_ms)
    }

    pub fn register_interval(&self) -> Duration {
        Duration::from_secs(self.register_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.command_interval_secs, 5);
        assert_eq!(config.liveness_interval_secs, 60);
        assert_eq!(config.probe_deadline(), Duration::from_secs(3));
    }

    #[test]
    fn test_partial_file() {
        let config = AgentConfig::parse(
            r#"
            name = "c1"
            root_url = "http://10.0.0.1:27182"

            [protocol]
            command = "fleetctl {action} {mac} {ip}"
            "#,
        )
        .unwrap();
        assert_eq!(config.name, "c1");
        assert_eq!(config.http_timeout_secs, 10);
        assert_eq!(config.protocol.timeout_secs, 30);
        assert_eq!(config.protocol.command, "fleetctl {action} {mac} {ip}");
    }

    #[test]
    fn test_bad_file() {
        assert!(AgentConfig::parse("name = [").is_err());
    }
}
