//! Connection event log
//!
//! Every lifecycle change and every message in either direction becomes a
//! [`LogEntry`]. The log is bounded: once `max_entries` is reached the
//! oldest entries are evicted. Entry ids keep increasing across evictions,
//! so `entries_since` works as a cursor.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Kind of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Sent,
    Message,
    Subscribe,
    Unsubscribe,
    Error,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Info => "info",
            Self::Sent => "sent",
            Self::Message => "message",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LogEntry {
    /// Text an assertion inspects: the raw payload for plain WebSocket
    /// messages, the formatted message otherwise
    pub fn payload_text(&self) -> &str {
        match &self.data {
            Some(Value::String(raw)) => raw,
            _ => &self.message,
        }
    }
}

struct Buffer {
    entries: VecDeque<LogEntry>,
    next_id: u64,
}

/// Shared, bounded, append-only event log
pub struct EventLog {
    buffer: Mutex<Buffer>,
    max_entries: usize,
    tx: broadcast::Sender<LogEntry>,
}

impl EventLog {
    pub fn new(max_entries: usize) -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            buffer: Mutex::new(Buffer {
                entries: VecDeque::new(),
                next_id: 1,
            }),
            max_entries: max_entries.max(1),
            tx,
        }
    }

    /// Append an entry and notify subscribers
    pub fn append(&self, kind: LogKind, message: impl Into<String>, data: Option<Value>) -> LogEntry {
        let message = message.into();
        match kind {
            LogKind::Error => tracing::warn!(kind = %kind, "{}", message),
            _ => tracing::debug!(kind = %kind, "{}", message),
        }

        let entry = {
            let mut buffer = self.buffer.lock();
            let entry = LogEntry {
                id: buffer.next_id,
                timestamp: Utc::now(),
                kind,
                message,
                data,
            };
            buffer.next_id += 1;
            while buffer.entries.len() >= self.max_entries {
                buffer.entries.pop_front();
            }
            buffer.entries.push_back(entry.clone());
            entry
        };

        // No receivers is fine
        let _ = self.tx.send(entry.clone());
        entry
    }

    pub fn info(&self, message: impl Into<String>) -> LogEntry {
        self.append(LogKind::Info, message, None)
    }

    pub fn error(&self, message: impl Into<String>, data: Option<Value>) -> LogEntry {
        self.append(LogKind::Error, message, data)
    }

    /// Receive entries as they are appended
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }

    /// Copy of every retained entry, oldest first
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.buffer.lock().entries.iter().cloned().collect()
    }

    /// Retained entries with an id greater than `id`
    pub fn entries_since(&self, id: u64) -> Vec<LogEntry> {
        self.buffer
            .lock()
            .entries
            .iter()
            .filter(|e| e.id > id)
            .cloned()
            .collect()
    }

    /// Id of the newest entry ever appended, 0 when empty
    pub fn last_id(&self) -> u64 {
        self.buffer.lock().next_id - 1
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.buffer.lock().entries.clear();
    }
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_increase_and_survive_eviction() {
        let log = EventLog::new(2);
        log.info("one");
        log.info("two");
        let third = log.info("three");

        assert_eq!(third.id, 3);
        assert_eq!(log.len(), 2);
        assert_eq!(log.last_id(), 3);
        let messages: Vec<_> = log.snapshot().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["two", "three"]);
    }

    #[test]
    fn test_entries_since() {
        let log = EventLog::new(10);
        log.info("before");
        let cursor = log.last_id();
        log.append(LogKind::Message, "Received message", Some(json!("hi")));

        let since = log.entries_since(cursor);
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].kind, LogKind::Message);
        assert!(log.entries_since(log.last_id()).is_empty());
    }

    #[test]
    fn test_payload_text() {
        let log = EventLog::new(10);
        let raw = log.append(LogKind::Message, "Received message", Some(json!("{\"a\":1}")));
        assert_eq!(raw.payload_text(), "{\"a\":1}");

        let framed = log.append(
            LogKind::Message,
            "MESSAGE /topic/x\nBody:\nhello",
            Some(json!({"destination": "/topic/x", "body": "hello"})),
        );
        assert_eq!(framed.payload_text(), "MESSAGE /topic/x\nBody:\nhello");
    }

    #[tokio::test]
    async fn test_subscribers_see_new_entries() {
        let log = EventLog::new(10);
        let mut rx = log.subscribe();
        log.error("boom", None);
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.kind, LogKind::Error);
        assert_eq!(entry.message, "boom");
    }

    #[test]
    fn test_entry_serializes_type_field() {
        let log = EventLog::new(10);
        let entry = log.info("hello");
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "info");
        assert!(value.get("data").is_none());
    }
}
