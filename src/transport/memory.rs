//! In-process connector for tests
//!
//! Every accepted link hands its far end to the test through
//! [`MemoryConnector::next_remote`], so a test can play the server.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::common::ConnectionError;

use super::{Connector, WireEvent, WireLink, WireMessage};

/// How the next `open()` behaves
#[derive(Debug, Clone)]
pub enum Behavior {
    Accept,
    Refuse(String),
    /// Never completes, for exercising timeouts
    Hang,
}

/// The server side of an in-memory link
pub struct RemoteEnd {
    pub url: String,
    pub from_client: mpsc::UnboundedReceiver<WireMessage>,
    pub to_client: mpsc::UnboundedSender<WireEvent>,
}

impl RemoteEnd {
    pub fn send_text(&self, text: &str) {
        let _ = self
            .to_client
            .send(WireEvent::Message(WireMessage::Text(text.to_string())));
    }

    pub async fn recv_text(&mut self) -> Option<String> {
        match self.from_client.recv().await? {
            WireMessage::Text(text) => Some(text),
            WireMessage::Binary(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }

    pub fn close(&self, reason: &str) {
        let _ = self.to_client.send(WireEvent::Closed {
            code: Some(1000),
            reason: reason.to_string(),
        });
    }
}

pub struct MemoryConnector {
    script: Mutex<VecDeque<Behavior>>,
    fallback: Behavior,
    opens: AtomicUsize,
    remotes_tx: mpsc::UnboundedSender<RemoteEnd>,
    remotes_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<RemoteEnd>>,
}

impl MemoryConnector {
    /// Accept every connection
    pub fn new() -> Self {
        Self::with_fallback(Behavior::Accept)
    }

    /// Behave as `fallback` once the script is exhausted
    pub fn with_fallback(fallback: Behavior) -> Self {
        let (remotes_tx, remotes_rx) = mpsc::unbounded_channel();
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            opens: AtomicUsize::new(0),
            remotes_tx,
            remotes_rx: tokio::sync::Mutex::new(remotes_rx),
        }
    }

    /// Queue behaviors for the next `open()` calls, in order
    pub fn script(self, behaviors: impl IntoIterator<Item = Behavior>) -> Self {
        self.script.lock().extend(behaviors);
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted link
    pub async fn next_remote(&self) -> RemoteEnd {
        self.remotes_rx
            .lock()
            .await
            .recv()
            .await
            .expect("connector dropped")
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &str) -> Result<WireLink, ConnectionError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match behavior {
            Behavior::Accept => {
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let (in_tx, in_rx) = mpsc::unbounded_channel();
                let _ = self.remotes_tx.send(RemoteEnd {
                    url: url.to_string(),
                    from_client: out_rx,
                    to_client: in_tx,
                });
                Ok(WireLink {
                    outgoing: out_tx,
                    incoming: in_rx,
                })
            }
            Behavior::Refuse(reason) => Err(ConnectionError::Transport(reason)),
            Behavior::Hang => std::future::pending().await,
        }
    }
}
