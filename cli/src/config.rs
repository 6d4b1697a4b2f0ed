// Configuration management for the meshchat CLI
//
// Cross-platform config stored in:
// - Linux: ~/.config/meshchat/config.json
// - macOS: ~/Library/Application Support/meshchat/config.json
// - Windows: %APPDATA%\meshchat\config.json

use anyhow::{Context, Result};
use meshchat_core::{NodeAddress, NodeSet};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relays asked for the node set
    pub seed_nodes: Vec<String>,

    /// How long discovery waits for seeds
    pub discovery_timeout_ms: u64,

    /// Relay: how often missing server links are redialed
    pub reconnect_interval_secs: u64,

    /// Relay: queue limit per offline identity
    pub max_queued_per_identity: usize,

    /// Where accounts and relay state live (default: platform data dir)
    pub storage_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed_nodes: crate::bootstrap::default_seed_nodes(),
            discovery_timeout_ms: 5_000,
            reconnect_interval_secs: 10,
            max_queued_per_identity: 10_000,
            storage_path: None,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("meshchat");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Data directory: `storage_path` if set, else the platform data dir
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = match &self.storage_path {
            Some(path) => PathBuf::from(path),
            None => dirs::data_local_dir()
                .context("Failed to determine data directory")?
                .join("meshchat"),
        };

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    /// Identity database for `account`
    pub fn account_dir(&self, account: &str) -> Result<PathBuf> {
        if account.is_empty() || account.contains(&['/', '\\'][..]) || account.starts_with('.') {
            anyhow::bail!("Invalid account name: {:?}", account);
        }
        Ok(self.data_dir()?.join("accounts").join(account))
    }

    /// Default relay state file for a relay on `port`
    pub fn relay_state_file(&self, port: u16) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(format!("relay-{}.json", port)))
    }

    pub fn seed_set(&self) -> NodeSet {
        NodeSet::decode(&self.seed_nodes.join("\n"))
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    /// Add a seed relay. Returns false if it was already there.
    pub fn add_seed_node(&mut self, node: &str) -> Result<bool> {
        let node: NodeAddress = node.parse().context("Invalid seed address")?;
        if self.seed_nodes.iter().any(|n| n == node.as_str()) {
            return Ok(false);
        }
        self.seed_nodes.push(node.to_string());
        Ok(true)
    }

    /// Remove a seed relay. Returns false if it was not configured.
    pub fn remove_seed_node(&mut self, node: &str) -> bool {
        let before = self.seed_nodes.len();
        self.seed_nodes.retain(|n| n != node);
        self.seed_nodes.len() != before
    }

    /// Set a config value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "discovery_timeout_ms" => {
                self.discovery_timeout_ms = value.parse().context("Invalid number")?;
            }
            "reconnect_interval_secs" => {
                self.reconnect_interval_secs = value.parse().context("Invalid number")?;
            }
            "max_queued_per_identity" => {
                self.max_queued_per_identity = value.parse().context("Invalid number")?;
            }
            "storage_path" => {
                self.storage_path = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "discovery_timeout_ms" => Some(self.discovery_timeout_ms.to_string()),
            "reconnect_interval_secs" => Some(self.reconnect_interval_secs.to_string()),
            "max_queued_per_identity" => Some(self.max_queued_per_identity.to_string()),
            "storage_path" => self.storage_path.clone(),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            (
                "discovery_timeout_ms".to_string(),
                format!("{}ms", self.discovery_timeout_ms),
            ),
            (
                "reconnect_interval_secs".to_string(),
                format!("{}s", self.reconnect_interval_secs),
            ),
            (
                "max_queued_per_identity".to_string(),
                self.max_queued_per_identity.to_string(),
            ),
            (
                "storage_path".to_string(),
                self.storage_path
                    .clone()
                    .unwrap_or_else(|| "(auto)".to_string()),
            ),
            ("seed_nodes".to_string(), self.seed_nodes.len().to_string()),
        ]
    }
}
