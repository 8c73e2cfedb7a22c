//! Message transport underneath the connection manager
//!
//! A [`Connector`] opens a bidirectional message link and hands it back as a
//! pair of channels. The connection manager never touches the socket
//! itself, which keeps the lifecycle logic independent of the WebSocket
//! library and lets tests drive the far end of a link directly.

mod websocket;

#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::common::ConnectionError;

pub use websocket::WebSocketConnector;

/// A message travelling over the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WireMessage {
    /// Payload length in bytes
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Something that happened on the remote side of a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// A data message arrived
    Message(WireMessage),
    /// The peer closed the link
    Closed { code: Option<u16>, reason: String },
    /// The link failed at the socket level
    Error(String),
}

/// An open link: send on `outgoing`, receive on `incoming`.
///
/// Dropping every clone of `outgoing` closes the link gracefully after the
/// queued messages have been written.
#[derive(Debug)]
pub struct WireLink {
    pub outgoing: mpsc::UnboundedSender<WireMessage>,
    pub incoming: mpsc::UnboundedReceiver<WireEvent>,
}

/// Opens message links to a URL
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &str) -> Result<WireLink, ConnectionError>;
}

/// Check that a URL is a usable WebSocket endpoint
pub fn validate_url(raw: &str) -> Result<url::Url, ConnectionError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| ConnectionError::Transport(format!("Invalid URL '{}': {}", raw, e)))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(ConnectionError::Transport(format!(
            "Unsupported URL scheme '{}'. Use ws:// or wss://",
            other
        ))),
    }
}

/// Host name to announce in a STOMP CONNECT frame
pub fn host_of(raw: &str) -> Option<String> {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}
