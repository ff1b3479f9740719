//! Relay configuration
//!
//! Loads server settings from a TOML file. Every key is optional.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default configuration file name
pub const CONFIG_FILE: &str = "relay.toml";

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How relay events are written out
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventFormat {
    /// Console lines through the log output
    #[default]
    Text,
    /// One JSON object per line on stdout
    Json,
}

impl EventFormat {
    /// Whether events take over stdout, pushing logs and console replies to stderr
    pub fn owns_stdout(self) -> bool {
        matches!(self, EventFormat::Json)
    }
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// WebSocket endpoint path
    pub path: String,
    /// Maximum inbound message size in bytes (transport default when unset)
    pub max_message_size: Option<usize>,
    /// Read operator commands from stdin
    pub console: bool,
    /// Event output format
    pub event_format: EventFormat,
    /// Unregister clients whose delivery fails while relaying
    pub evict_on_send_failure: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 9000,
            path: "/ws".to_string(),
            max_message_size: None,
            console: true,
            event_format: EventFormat::Text,
            evict_on_send_failure: false,
        }
    }
}

impl RelayConfig {
    /// Load configuration from a file, falling back to defaults if it doesn't exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}
