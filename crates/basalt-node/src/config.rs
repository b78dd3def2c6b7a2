//! Node configuration.

use crate::Args;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name.
    pub node_name: String,
    /// Network (mainnet, testnet).
    pub network: String,
    /// Network configuration.
    #[serde(default)]
    pub network_config: NetworkConfig,
    /// Sync configuration.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// P2P bind address.
    pub bind_address: String,
    /// Maximum connections.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", basalt_net::DEFAULT_PORT),
            max_connections: 32,
        }
    }
}

/// Sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between sync scheduler ticks.
    pub tick_interval_secs: u64,
    /// Seconds a peer may owe its initial headers before being dropped.
    pub stall_timeout_secs: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 1,
            stall_timeout_secs: 60,
        }
    }
}

impl NodeConfig {
    /// Load configuration from file and CLI args.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default_for_network(&args.network)
        };

        config.network = args.network.clone();
        if let Some(ref p2p_bind) = args.p2p_bind {
            config.network_config.bind_address = p2p_bind.clone();
        }

        Ok(config)
    }

    /// Create default config for a network.
    pub fn default_for_network(network: &str) -> Self {
        let bind_address = match network {
            "testnet" => format!("0.0.0.0:{}", basalt_net::DEFAULT_PORT + 10_000),
            _ => format!("0.0.0.0:{}", basalt_net::DEFAULT_PORT),
        };
        Self {
            node_name: "basalt-node".to_string(),
            network: network.to_string(),
            network_config: NetworkConfig {
                bind_address,
                ..Default::default()
            },
            sync: SyncConfig::default(),
        }
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default_for_network("mainnet");
        assert_eq!(config.network, "mainnet");
        assert_eq!(config.sync.tick_interval_secs, 1);
    }

    #[test]
    fn test_testnet_uses_other_port() {
        let config = NodeConfig::default_for_network("testnet");
        assert_ne!(
            config.network_config.bind_address,
            NodeConfig::default_for_network("mainnet")
                .network_config
                .bind_address
        );
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = NodeConfig::default_for_network("mainnet");
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: NodeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.node_name, config.node_name);
        assert_eq!(parsed.sync.stall_timeout_secs, config.sync.stall_timeout_secs);
    }
}
