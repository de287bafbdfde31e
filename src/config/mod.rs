//! # Configuration
//!
//! TOML configuration for the chat engine and its CLI, organized into
//! logical sections:
//!
//! - [`ConnectionConfig`] - how to reach the radio (transport kind, address)
//! - [`ChatConfig`] - engine tuning (trace timeout)
//! - [`LoggingConfig`] - log level and optional log file
//!
//! Defaults are usable out of the box; `meshchat init` writes them to disk.
//!
//! ```toml
//! [connection]
//! kind = "serial"
//! address = "/dev/ttyUSB0"
//! tcp_port = 4403
//!
//! [chat]
//! trace_timeout_secs = 60
//!
//! [logging]
//! level = "info"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::model::ConnectionKind;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred transport for auto-connect. Absent means the operator
    /// picks interactively.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ConnectionKind>,
    /// Device path, hostname, or BLE address depending on `kind`.
    #[serde(default)]
    pub address: String,
    /// Port used when `kind` is tcp and `address` has none.
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
}

fn default_tcp_port() -> u16 {
    4403
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            kind: None,
            address: String::new(),
            tcp_port: default_tcp_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Bound on how long a path-trace request waits before the timeout
    /// state is shown. A late result still supersedes the timeout.
    #[serde(default = "default_trace_timeout_secs")]
    pub trace_timeout_secs: u64,
}

fn default_trace_timeout_secs() -> u64 {
    60
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            trace_timeout_secs: default_trace_timeout_secs(),
        }
    }
}

impl ChatConfig {
    pub fn trace_timeout(&self) -> Duration {
        Duration::from_secs(self.trace_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file.
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;
        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chat.trace_timeout_secs == 0 {
            return Err(anyhow!("chat.trace_timeout_secs must be at least 1"));
        }
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(anyhow!("unknown logging.level '{}'", other)),
        }
    }
}
