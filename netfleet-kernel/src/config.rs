use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct KernelConfig {
    /// Node name stamped on commands the root executes itself.
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Where `devices save` writes its snapshots.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_name() -> String {
    "root".into()
}

fn default_bind() -> String {
    "0.0.0.0:27182".into()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self { name: default_name(), bind: default_bind(), data_dir: default_data_dir() }
    }
}

pub fn parse_config(txt: &str) -> KernelConfig {
    if txt.trim().is_empty() {
        return KernelConfig::default();
    }
    serde_yaml::from_str(txt).unwrap_or_else(|e| {
        warn!("invalid kernel config, using defaults: {}", e);
        KernelConfig::default()
    })
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("NETFLEET_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt)
    } else {
        warn!(%path, "no kernel config, using defaults");
        KernelConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg = parse_config("name: hq\n");
        assert_eq!(cfg.name, "hq");
        assert_eq!(cfg.bind, "0.0.0.0:27182");
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        assert_eq!(parse_config("bind: [not, a, string"), KernelConfig::default());
        assert_eq!(parse_config("   "), KernelConfig::default());
    }
}
