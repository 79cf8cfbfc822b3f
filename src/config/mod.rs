//! Node configuration.
//!
//! A node is configured from a small JSON file; every field is optional and
//! falls back to the defaults below.
//!
//! # Example
//!
//! ```
//! use radiolink::config::NodeConfig;
//!
//! let config = NodeConfig::from_json_str(r#"{ "channel": 3, "address": 9 }"#).unwrap();
//! assert_eq!(config.channel, 3);
//! assert_eq!(config.stats_port, Some(8080));
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::network::{is_unicast, NetworkConfig, NetworkError, RadioNetwork};
use crate::queue::{QueueRadio, RadioQueue};
use crate::radio::{MacHandle, RadioSettings};
use crate::stats::{NodeStats, DEFAULT_STATS_PORT};

/// Default radio channel.
pub const DEFAULT_CHANNEL: u8 = 128;

/// Protocol a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    /// Reliable point-to-point Radio Link.
    #[default]
    Link,
    /// Multi-hop Radio Network.
    Network,
}

/// Configuration of one radio node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Protocol to run.
    pub mode: NodeMode,
    /// Radio channel; must match between peers.
    pub channel: u8,
    /// Network address (1-254), used by the multi-hop network layer.
    pub address: u8,
    /// Deliver frames failing the CRC check (Radio Queue only).
    pub allow_crc_errors: bool,
    /// Seed of the retry/backoff generator; random if absent.
    pub backoff_seed: Option<u32>,
    /// Port of the HTTP statistics endpoint; disabled if absent.
    pub stats_port: Option<u16>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            mode: NodeMode::Link,
            channel: DEFAULT_CHANNEL,
            address: 1,
            allow_crc_errors: false,
            backoff_seed: None,
            stats_port: Some(DEFAULT_STATS_PORT),
        }
    }
}

impl NodeConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_unicast(self.address) {
            return Err(ConfigError::InvalidConfig("address must be in 1..=254"));
        }
        if self.stats_port == Some(0) {
            return Err(ConfigError::InvalidConfig("stats_port must be non-zero"));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Radio settings for point-to-point use (no address filtering).
    pub fn radio_settings(&self) -> RadioSettings {
        RadioSettings::with_channel(self.channel)
    }

    /// Network layer configuration.
    pub fn network(&self) -> NetworkConfig {
        NetworkConfig {
            address: self.address,
        }
    }

    /// Radio Queue halves with the configured CRC-error policy.
    pub fn radio_queue(
        &self,
        mac: MacHandle,
        backoff_seed: u32,
        stats: Arc<NodeStats>,
    ) -> (RadioQueue, QueueRadio) {
        let (queue, radio) = RadioQueue::with_stats(mac, backoff_seed, stats);
        queue.set_allow_crc_errors(self.allow_crc_errors);
        (queue, radio)
    }

    /// Network node at the configured address over `queue`.
    pub fn radio_network(&self, queue: RadioQueue) -> Result<RadioNetwork, NetworkError> {
        RadioNetwork::new(queue, &self.network())
    }

    /// The configured backoff seed, or a fresh one from the OS.
    pub fn backoff_seed_or_random(&self) -> u32 {
        self.backoff_seed.unwrap_or_else(|| OsRng.next_u32())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// A value is out of range.
    InvalidConfig(&'static str),
    /// The file could not be read.
    Io(std::io::Error),
    /// The file is not valid JSON for [`NodeConfig`].
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            Self::Io(e) => write!(f, "cannot read config: {}", e),
            Self::Parse(e) => write!(f, "cannot parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidConfig(_) => None,
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}
