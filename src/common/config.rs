//! Configuration file handling

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Connection timing settings
    #[serde(default)]
    pub connection: ConnectionTimings,

    /// Event log settings
    #[serde(default)]
    pub log: LogConfig,

    /// Scenario runner settings
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Connection timing settings in milliseconds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionTimings {
    /// Deadline for the connection-establishment phase
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Fixed delay between STOMP reconnection attempts
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Hard cap on automatic STOMP reconnection attempts
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Heart-beat we ask the server to send us
    #[serde(default = "default_heartbeat")]
    pub heartbeat_incoming_ms: u64,

    /// Heart-beat we offer to send the server
    #[serde(default = "default_heartbeat")]
    pub heartbeat_outgoing_ms: u64,
}

impl Default for ConnectionTimings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_incoming_ms: default_heartbeat(),
            heartbeat_outgoing_ms: default_heartbeat(),
        }
    }
}

impl ConnectionTimings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

fn default_connect_timeout() -> u64 {
    30_000
}
fn default_reconnect_delay() -> u64 {
    5_000
}
fn default_max_reconnect_attempts() -> u32 {
    3
}
fn default_heartbeat() -> u64 {
    10_000
}

/// Event log configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Maximum number of entries kept before the oldest are evicted
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

fn default_max_entries() -> usize {
    10_000
}

/// Scenario runner configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    /// How often an assertion with a timeout is re-evaluated
    #[serde(default = "default_poll_interval")]
    pub assertion_poll_interval_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            assertion_poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    100
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// The file `load()` reads, whether or not it exists
    pub fn default_path() -> Option<PathBuf> {
        config_path()
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| super::Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.connection.connect_timeout_ms, 30_000);
        assert_eq!(config.connection.reconnect_delay_ms, 5_000);
        assert_eq!(config.connection.max_reconnect_attempts, 3);
        assert_eq!(config.connection.heartbeat_incoming_ms, 10_000);
        assert_eq!(config.connection.heartbeat_outgoing_ms, 10_000);
        assert_eq!(config.log.max_entries, 10_000);
        assert_eq!(config.runner.assertion_poll_interval_ms, 100);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = Config::parse(
            r#"
[connection]
connect_timeout_ms = 500
max_reconnect_attempts = 1
"#,
        )
        .unwrap();
        assert_eq!(config.connection.connect_timeout_ms, 500);
        assert_eq!(config.connection.max_reconnect_attempts, 1);
        assert_eq!(config.connection.reconnect_delay_ms, 5_000);
        assert_eq!(config.log.max_entries, 10_000);
    }

    #[test]
    fn test_invalid_file_is_config_parse_error() {
        let err = Config::parse("[connection\n").unwrap_err();
        assert!(matches!(err, crate::common::Error::ConfigParse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[log]\nmax_entries = 42\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.log.max_entries, 42);
    }
}
