//! Connection management for raw WebSocket and STOMP endpoints

pub mod log;
mod manager;
mod registry;
pub mod stats;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::config::Config;
use crate::stomp::HeartBeat;

pub use log::{EventLog, LogEntry, LogKind};
pub use manager::ConnectionManager;
pub use registry::SubscribedTopic;
pub use stats::ConnectionStats;

/// Which protocol runs over the WebSocket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolKind {
    /// Plain WebSocket text messages
    #[serde(rename = "websocket")]
    Raw,
    /// STOMP frames
    #[serde(rename = "stomp")]
    Framed,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => write!(f, "WebSocket"),
            Self::Framed => write!(f, "STOMP"),
        }
    }
}

impl FromStr for ProtocolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "websocket" | "raw" | "ws" => Ok(Self::Raw),
            "stomp" | "framed" => Ok(Self::Framed),
            other => Err(format!(
                "unknown connection type '{}' (expected 'websocket' or 'stomp')",
                other
            )),
        }
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disconnected" => Ok(Self::Disconnected),
            "connecting" => Ok(Self::Connecting),
            "connected" => Ok(Self::Connected),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown connection status '{}'", other)),
        }
    }
}

/// What to connect to and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub url: String,
    pub protocol: ProtocolKind,
    /// Sent as `Authorization: Bearer <token>` on STOMP frames
    pub auth_token: Option<String>,
    /// Extra STOMP headers for CONNECT and every SEND
    pub headers: BTreeMap<String, String>,
    /// Overrides the configured establishment deadline
    pub connect_timeout: Option<Duration>,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>, protocol: ProtocolKind) -> Self {
        Self {
            url: url.into(),
            protocol,
            auth_token: None,
            headers: BTreeMap::new(),
            connect_timeout: None,
        }
    }

    pub fn raw(url: impl Into<String>) -> Self {
        Self::new(url, ProtocolKind::Raw)
    }

    pub fn stomp(url: impl Into<String>) -> Self {
        Self::new(url, ProtocolKind::Framed)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.auth_token = (!token.trim().is_empty()).then_some(token);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

/// Timing policy applied by a [`ConnectionManager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    /// Heart-beat offered in STOMP CONNECT
    pub heartbeat: HeartBeat,
    pub log_capacity: usize,
}

impl From<&Config> for ConnectionSettings {
    fn from(config: &Config) -> Self {
        let timings = &config.connection;
        Self {
            connect_timeout: timings.connect_timeout(),
            reconnect_delay: timings.reconnect_delay(),
            max_reconnect_attempts: timings.max_reconnect_attempts,
            heartbeat: HeartBeat::new(timings.heartbeat_outgoing_ms, timings.heartbeat_incoming_ms),
            log_capacity: config.log.max_entries,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}
