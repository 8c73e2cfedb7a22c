//! Connection lifecycle
//!
//! A [`ConnectionManager`] owns at most one connection at a time. Each
//! `connect()` bumps a generation counter and spawns a lifecycle task for
//! that generation; anything a stale task tries to report after a
//! disconnect or reconnect is dropped.
//!
//! STOMP connections reconnect on their own after a failure, waiting
//! `reconnect_delay` between attempts, and give up for good after
//! `max_reconnect_attempts`. Raw WebSocket connections never retry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, timeout_at, Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::common::{ConnectionError, Error, Result};
use crate::stomp::headers::{self, ACCEPT_VERSION};
use crate::stomp::{self, Command, Decoded, Frame, HeartBeat, Negotiated};
use crate::transport::{self, Connector, WireEvent, WireLink, WireMessage};

use super::log::{EventLog, LogKind};
use super::registry::{Registration, SubscribedTopic, SubscriptionRegistry};
use super::stats::ConnectionStats;
use super::{ConnectionConfig, ConnectionSettings, ConnectionStatus, ProtocolKind};

/// Manages one raw WebSocket or STOMP connection
pub struct ConnectionManager {
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    /// Serializes connect and disconnect
    lifecycle: tokio::sync::Mutex<()>,
}

struct Shared {
    state: Mutex<State>,
    status: watch::Sender<ConnectionStatus>,
    log: EventLog,
    stats: Mutex<ConnectionStats>,
}

#[derive(Default)]
struct State {
    generation: u64,
    /// Kept after connecting so SEND can reuse the token and headers
    config: Option<ConnectionConfig>,
    outgoing: Option<mpsc::UnboundedSender<WireMessage>>,
    task: Option<JoinHandle<()>>,
    registry: SubscriptionRegistry,
    reconnect_attempts: u32,
    /// False once the client gave up or was told to stop
    active: bool,
}

impl ConnectionManager {
    pub fn new(settings: ConnectionSettings, connector: Arc<dyn Connector>) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            status,
            log: EventLog::new(settings.log_capacity),
            stats: Mutex::new(ConnectionStats::default()),
        });
        Self {
            settings,
            connector,
            shared,
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Connect, replacing any existing connection.
    ///
    /// Resolves once the first attempt connects, fails or times out. For
    /// STOMP a failed first attempt still leaves reconnection running in
    /// the background.
    pub async fn connect(&self, config: ConnectionConfig) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.teardown();

        if let Err(e) = transport::validate_url(&config.url) {
            self.shared.log.error(e.to_string(), None);
            self.shared.status.send_replace(ConnectionStatus::Error);
            return Err(e.into());
        }

        let timeout = config.connect_timeout.unwrap_or(self.settings.connect_timeout);
        let deadline = Instant::now() + timeout;
        let (ready_tx, ready_rx) = oneshot::channel();

        let link = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            state.active = true;
            state.reconnect_attempts = 0;
            state.config = Some(config.clone());
            self.shared.status.send_replace(ConnectionStatus::Connecting);
            Link {
                shared: self.shared.clone(),
                generation: state.generation,
            }
        };
        *self.shared.stats.lock() = ConnectionStats::default();
        self.shared
            .log
            .info(format!("Connecting to {} ({})", config.url, config.protocol));

        let attempt = Attempt {
            connector: self.connector.clone(),
            config,
            timeout,
            deadline,
            ready: ready_tx,
        };
        let task = match attempt.config.protocol {
            ProtocolKind::Raw => tokio::spawn(run_raw(link.clone(), attempt)),
            ProtocolKind::Framed => {
                tokio::spawn(run_framed(link.clone(), attempt, self.settings.clone()))
            }
        };

        {
            let mut state = self.shared.state.lock();
            if state.generation == link.generation {
                state.task = Some(task);
            } else {
                task.abort();
            }
        }

        match ready_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ConnectionError::Cancelled.into()),
        }
    }

    /// Disconnect and forget subscriptions and stored credentials.
    ///
    /// Safe to call in any state.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        self.teardown();
    }

    /// Abandon a connection attempt that is still in progress.
    ///
    /// Returns false when nothing was connecting.
    pub fn cancel_connection(&self) -> bool {
        let task = {
            let mut state = self.shared.state.lock();
            if *self.shared.status.borrow() != ConnectionStatus::Connecting {
                return false;
            }
            state.generation += 1;
            state.active = false;
            state.outgoing = None;
            state.reconnect_attempts = 0;
            state.config = None;
            state.registry.drain();
            self.shared.status.send_replace(ConnectionStatus::Disconnected);
            state.task.take()
        };
        if let Some(task) = task {
            task.abort();
        }
        self.shared.log.info("Connection attempt cancelled");
        true
    }

    fn teardown(&self) {
        let (task, outgoing, registrations, config, previous) = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            state.active = false;
            state.reconnect_attempts = 0;
            let previous = self.shared.status.send_replace(ConnectionStatus::Disconnected);
            (
                state.task.take(),
                state.outgoing.take(),
                state.registry.drain(),
                state.config.take(),
                previous,
            )
        };

        if let Some(task) = task {
            task.abort();
        }

        let framed = config
            .as_ref()
            .is_some_and(|c| c.protocol == ProtocolKind::Framed);

        for registration in registrations {
            if framed {
                if let (Some(outgoing), Some(handle)) = (&outgoing, &registration.handle) {
                    let frame = Frame::new(Command::Unsubscribe).header("id", handle.as_str());
                    if outgoing.send(WireMessage::Text(frame.encode())).is_err() {
                        tracing::warn!(
                            destination = %registration.topic.destination,
                            "Could not unsubscribe while disconnecting"
                        );
                        continue;
                    }
                }
            }
            self.shared.log.append(
                LogKind::Unsubscribe,
                format!("Unsubscribed from {}", registration.topic.destination),
                Some(topic_data(&registration.topic)),
            );
        }

        if framed {
            if let Some(outgoing) = &outgoing {
                let _ = outgoing.send(WireMessage::Text(Frame::new(Command::Disconnect).encode()));
            }
        }
        // Dropping the last sender closes the socket
        drop(outgoing);

        if config.is_some() || previous != ConnectionStatus::Disconnected {
            self.shared.log.info("Disconnected");
        }
    }

    /// Subscribe to a destination.
    ///
    /// Raw WebSocket has no subscription concept, so there this only
    /// records the destination.
    pub fn subscribe(&self, destination: &str) -> Result<SubscribedTopic> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(Error::missing_destination("subscribe"));
        }

        let topic = {
            let mut state = self.shared.state.lock();
            if self.status() != ConnectionStatus::Connected {
                drop(state);
                self.shared.log.error(
                    format!("Cannot subscribe to {}: not connected", destination),
                    None,
                );
                return Err(Error::not_connected("subscribe"));
            }

            let framed = state
                .config
                .as_ref()
                .is_some_and(|c| c.protocol == ProtocolKind::Framed);
            let handle = if framed {
                let handle = state.registry.next_handle();
                let outgoing = state
                    .outgoing
                    .as_ref()
                    .ok_or_else(|| Error::not_connected("subscribe"))?;
                outgoing
                    .send(WireMessage::Text(subscribe_frame(&handle, destination).encode()))
                    .map_err(|_| link_closed())?;
                Some(handle)
            } else {
                None
            };
            state.registry.insert(destination, handle)
        };

        self.shared.log.append(
            LogKind::Subscribe,
            format!("Subscribed to {}", destination),
            Some(topic_data(&topic)),
        );
        Ok(topic)
    }

    /// Remove a subscription. Unknown ids are logged and otherwise ignored.
    pub fn unsubscribe(&self, id: Uuid) -> Option<SubscribedTopic> {
        let removed = {
            let mut state = self.shared.state.lock();
            let removed = state.registry.remove(id);
            if let (Some(registration), Some(outgoing)) = (&removed, &state.outgoing) {
                if let Some(handle) = &registration.handle {
                    let frame = Frame::new(Command::Unsubscribe).header("id", handle.as_str());
                    if outgoing.send(WireMessage::Text(frame.encode())).is_err() {
                        tracing::warn!(%id, "UNSUBSCRIBE could not be sent");
                    }
                }
            }
            removed
        };

        match removed {
            Some(Registration { topic, .. }) => {
                self.shared.log.append(
                    LogKind::Unsubscribe,
                    format!("Unsubscribed from {}", topic.destination),
                    Some(topic_data(&topic)),
                );
                Some(topic)
            }
            None => {
                self.shared
                    .log
                    .info(format!("No subscription with id {}; nothing to unsubscribe", id));
                None
            }
        }
    }

    /// Send a message.
    ///
    /// STOMP needs a destination; raw WebSocket ignores it along with the
    /// headers.
    pub fn send_message(
        &self,
        payload: &str,
        destination: Option<&str>,
        headers: &BTreeMap<String, String>,
    ) -> Result<()> {
        let state = self.shared.state.lock();
        let connected = self.status() == ConnectionStatus::Connected;
        let (Some(config), Some(outgoing), true) =
            (state.config.as_ref(), state.outgoing.as_ref(), connected)
        else {
            drop(state);
            self.shared.log.error("Cannot send message: not connected", None);
            return Err(Error::not_connected("send message"));
        };

        let (summary, data) = match config.protocol {
            ProtocolKind::Raw => {
                outgoing
                    .send(WireMessage::Text(payload.to_string()))
                    .map_err(|_| link_closed())?;
                (
                    format!("Sent message ({} bytes)", payload.len()),
                    Value::String(payload.to_string()),
                )
            }
            ProtocolKind::Framed => {
                let Some(destination) = destination.map(str::trim).filter(|d| !d.is_empty())
                else {
                    drop(state);
                    self.shared
                        .log
                        .error("Cannot send message: no destination given", None);
                    return Err(Error::missing_destination("send"));
                };
                let mut merged =
                    headers::send_headers(&config.headers, headers, config.auth_token.as_deref());
                merged.retain(|name, _| !name.eq_ignore_ascii_case("destination"));

                let frame = Frame::new(Command::Send)
                    .header("destination", destination)
                    .headers(merged.clone())
                    .body(payload);
                outgoing
                    .send(WireMessage::Text(frame.encode()))
                    .map_err(|_| link_closed())?;
                (
                    format!("SEND {}\nBody:\n{}", destination, payload),
                    json!({
                        "destination": destination,
                        "headers": merged,
                        "body": payload,
                    }),
                )
            }
        };
        drop(state);

        self.shared.stats.lock().record_sent(payload.len());
        self.shared.log.append(LogKind::Sent, summary, Some(data));
        Ok(())
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    /// Follow status changes
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    pub fn subscriptions(&self) -> Vec<SubscribedTopic> {
        self.shared.state.lock().registry.topics()
    }

    /// The configuration of the current connection, if any
    pub fn config(&self) -> Option<ConnectionConfig> {
        self.shared.state.lock().config.clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.state.lock().reconnect_attempts
    }

    pub fn log(&self) -> &EventLog {
        &self.shared.log
    }

    pub fn stats(&self) -> ConnectionStats {
        self.shared.stats.lock().clone()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.shared.state.lock().task.take() {
            task.abort();
        }
    }
}

fn link_closed() -> Error {
    ConnectionError::Transport("connection closed".to_string()).into()
}

fn topic_data(topic: &SubscribedTopic) -> Value {
    json!({ "id": topic.id, "destination": topic.destination })
}

fn subscribe_frame(handle: &str, destination: &str) -> Frame {
    Frame::new(Command::Subscribe)
        .header("id", handle)
        .header("destination", destination)
        .header("ack", "auto")
}

fn describe_close(code: Option<u16>, reason: &str) -> String {
    match (code, reason.is_empty()) {
        (Some(code), false) => format!("code {}: {}", code, reason),
        (Some(code), true) => format!("code {}", code),
        (None, false) => reason.to_string(),
        (None, true) => "no reason given".to_string(),
    }
}

/// Everything a lifecycle task needs for its first attempt
struct Attempt {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    timeout: Duration,
    deadline: Instant,
    ready: oneshot::Sender<std::result::Result<(), ConnectionError>>,
}

impl Attempt {
    fn timeout_error(&self) -> ConnectionError {
        ConnectionError::Timeout {
            ms: self.timeout.as_millis() as u64,
        }
    }
}

/// A lifecycle task's handle on the shared state, bound to its generation
#[derive(Clone)]
struct Link {
    shared: Arc<Shared>,
    generation: u64,
}

impl Link {
    fn is_current(&self) -> bool {
        self.shared.state.lock().generation == self.generation
    }

    fn log(&self, kind: LogKind, message: impl Into<String>, data: Option<Value>) {
        if self.is_current() {
            self.shared.log.append(kind, message, data);
        }
    }

    /// Record a successful connection. Returns false for a stale task.
    fn established(
        &self,
        outgoing: mpsc::UnboundedSender<WireMessage>,
        message: String,
        data: Option<Value>,
    ) -> bool {
        let restored = {
            let mut state = self.shared.state.lock();
            if state.generation != self.generation {
                return false;
            }
            // Subscriptions made before a reconnect are re-issued on the new link
            let mut restored = 0;
            for registration in state.registry.registrations() {
                if let Some(handle) = &registration.handle {
                    let frame = subscribe_frame(handle, &registration.topic.destination);
                    if outgoing.send(WireMessage::Text(frame.encode())).is_ok() {
                        restored += 1;
                    }
                }
            }
            state.outgoing = Some(outgoing);
            state.reconnect_attempts = 0;
            self.shared.status.send_replace(ConnectionStatus::Connected);
            restored
        };

        {
            let mut stats = self.shared.stats.lock();
            stats.connected_at = Some(chrono::Utc::now());
            stats.reconnect_attempts = 0;
        }
        self.shared.log.append(LogKind::Info, message, data);
        if restored > 0 {
            self.shared
                .log
                .info(format!("Restored {} subscription(s)", restored));
        }
        true
    }

    fn fail(&self, error: &ConnectionError) {
        if !self.mark_failed() {
            return;
        }
        self.shared.stats.lock().record_error();
        self.shared.log.error(error.to_string(), None);
    }

    /// Move to `error` without logging; false for a stale link
    fn mark_failed(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.generation != self.generation {
            return false;
        }
        state.outgoing = None;
        self.shared.status.send_replace(ConnectionStatus::Error);
        true
    }

    fn closed(&self, code: Option<u16>, reason: &str) {
        {
            let mut state = self.shared.state.lock();
            if state.generation != self.generation {
                return;
            }
            state.outgoing = None;
            self.shared.status.send_replace(ConnectionStatus::Disconnected);
        }
        self.shared.log.append(
            LogKind::Info,
            format!("Connection closed ({})", describe_close(code, reason)),
            Some(json!({ "code": code, "reason": reason })),
        );
    }

    /// Gate before each automatic reconnection attempt
    fn begin_reconnect(&self, max_attempts: u32) -> bool {
        let attempt = {
            let mut state = self.shared.state.lock();
            if state.generation != self.generation || !state.active {
                return false;
            }
            if state.reconnect_attempts >= max_attempts {
                state.active = false;
                self.shared.status.send_replace(ConnectionStatus::Error);
                None
            } else {
                state.reconnect_attempts += 1;
                self.shared.status.send_replace(ConnectionStatus::Connecting);
                Some(state.reconnect_attempts)
            }
        };

        match attempt {
            Some(n) => {
                self.shared.stats.lock().reconnect_attempts = n;
                self.shared
                    .log
                    .info(format!("Reconnecting (attempt {}/{})", n, max_attempts));
                true
            }
            None => {
                let error = ConnectionError::ReconnectLimit {
                    attempts: max_attempts,
                };
                self.shared
                    .log
                    .error(error.to_string(), Some(json!({ "attempts": max_attempts })));
                false
            }
        }
    }

    fn raw_message(&self, message: WireMessage) {
        let bytes = message.len();
        let text = match message {
            WireMessage::Text(text) => text,
            WireMessage::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        };
        if !self.is_current() {
            return;
        }
        self.shared.stats.lock().record_received(bytes);
        self.shared.log.append(
            LogKind::Message,
            format!("Received message ({} bytes)", bytes),
            Some(Value::String(text)),
        );
    }

    fn stomp_payload(&self, message: WireMessage) {
        let text = match message {
            WireMessage::Text(text) => text,
            WireMessage::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        };
        let items = match stomp::decode(&text) {
            Ok(items) => items,
            Err(e) => {
                self.shared.stats.lock().record_error();
                self.log(LogKind::Error, e.to_string(), Some(json!({ "raw": text })));
                return;
            }
        };

        for item in items {
            let frame = match item {
                Decoded::Heartbeat => {
                    tracing::trace!("Heart-beat from server");
                    continue;
                }
                Decoded::Frame(frame) => frame,
            };
            match frame.command {
                Command::Message => self.stomp_message(&frame),
                Command::Error => self.stomp_error(&frame),
                Command::Receipt => self.log(
                    LogKind::Info,
                    format!("Receipt {}", frame.get("receipt-id").unwrap_or("(no id)")),
                    None,
                ),
                other => tracing::debug!(command = %other, "Ignoring unexpected frame"),
            }
        }
    }

    fn stomp_message(&self, frame: &Frame) {
        if !self.is_current() {
            return;
        }
        let destination = frame.get("destination").unwrap_or("(unknown)");
        let headers: BTreeMap<&str, &str> = frame
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.shared.stats.lock().record_received(frame.body.len());
        self.shared.log.append(
            LogKind::Message,
            format!("MESSAGE {}\nBody:\n{}", destination, frame.body),
            Some(json!({
                "destination": destination,
                "headers": headers,
                "body": frame.body,
            })),
        );
    }

    fn stomp_error(&self, frame: &Frame) {
        let message = frame.get("message").unwrap_or("ERROR frame");
        let hint = headers::error_hint(&format!("{} {}", message, frame.body));
        let all_headers: BTreeMap<&str, &str> = frame
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.shared.stats.lock().record_error();
        self.log(
            LogKind::Error,
            format!("STOMP ERROR: {}", message),
            Some(json!({
                "message": message,
                "headers": all_headers,
                "body": frame.body,
                "hint": hint,
            })),
        );
    }
}

async fn run_raw(link: Link, attempt: Attempt) {
    let opened = timeout_at(attempt.deadline, attempt.connector.open(&attempt.config.url)).await;
    let wire = match opened {
        Ok(Ok(wire)) => wire,
        Ok(Err(e)) => {
            link.fail(&e);
            let _ = attempt.ready.send(Err(e));
            return;
        }
        Err(_) => {
            let e = attempt.timeout_error();
            link.fail(&e);
            let _ = attempt.ready.send(Err(e));
            return;
        }
    };

    let WireLink {
        outgoing,
        mut incoming,
    } = wire;
    if !link.established(outgoing, format!("Connected to {}", attempt.config.url), None) {
        return;
    }
    let _ = attempt.ready.send(Ok(()));

    while let Some(event) = incoming.recv().await {
        match event {
            WireEvent::Message(message) => link.raw_message(message),
            WireEvent::Closed { code, reason } => {
                link.closed(code, &reason);
                return;
            }
            WireEvent::Error(e) => {
                link.fail(&ConnectionError::Transport(e));
                return;
            }
        }
    }
    link.closed(None, "link dropped");
}

/// An established STOMP session
struct Session {
    outgoing: mpsc::UnboundedSender<WireMessage>,
    incoming: mpsc::UnboundedReceiver<WireEvent>,
    heartbeat: Negotiated,
    version: Option<String>,
    server: Option<String>,
}

enum SessionEnd {
    Closed { code: Option<u16>, reason: String },
    Failed(String),
}

async fn run_framed(link: Link, attempt: Attempt, settings: ConnectionSettings) {
    let Attempt {
        connector,
        config,
        timeout,
        mut deadline,
        ready,
    } = attempt;
    let mut ready = Some(ready);
    let timeout_ms = timeout.as_millis() as u64;

    loop {
        let outcome = timeout_at(deadline, handshake(&link, connector.as_ref(), &config, settings.heartbeat))
            .await
            .unwrap_or(Err(ConnectionError::Timeout { ms: timeout_ms }));

        match outcome {
            Ok(session) => {
                let version = session.version.clone().unwrap_or_else(|| "1.0".to_string());
                let data = json!({
                    "version": version,
                    "server": session.server,
                    "heartBeat": {
                        "outgoingMs": session.heartbeat.outgoing.map(|d| d.as_millis() as u64),
                        "incomingMs": session.heartbeat.incoming.map(|d| d.as_millis() as u64),
                    },
                });
                let message = format!("Connected to {} (STOMP {})", config.url, version);
                if !link.established(session.outgoing.clone(), message, Some(data)) {
                    return;
                }
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Ok(()));
                }
                match run_session(&link, session).await {
                    SessionEnd::Closed { code, reason } => link.closed(code, &reason),
                    SessionEnd::Failed(e) => link.fail(&ConnectionError::Transport(e)),
                }
            }
            Err(e) => {
                match &e {
                    // The ERROR frame behind it is already logged with its headers
                    ConnectionError::Handshake { .. } => {
                        link.mark_failed();
                    }
                    _ => link.fail(&e),
                }
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Err(e));
                }
            }
        }

        sleep(settings.reconnect_delay).await;
        if !link.begin_reconnect(settings.max_reconnect_attempts) {
            return;
        }
        deadline = Instant::now() + timeout;
    }
}

async fn handshake(
    link: &Link,
    connector: &dyn Connector,
    config: &ConnectionConfig,
    offer: HeartBeat,
) -> std::result::Result<Session, ConnectionError> {
    let WireLink {
        outgoing,
        mut incoming,
    } = connector.open(&config.url).await?;

    let host = transport::host_of(&config.url).unwrap_or_else(|| "/".to_string());
    let frame = Frame::new(Command::Connect)
        .header("accept-version", ACCEPT_VERSION)
        .header("host", host)
        .header("heart-beat", offer.header_value())
        .headers(headers::connect_headers(
            &config.headers,
            config.auth_token.as_deref(),
        ));
    outgoing
        .send(WireMessage::Text(frame.encode()))
        .map_err(|_| ConnectionError::Transport("connection closed before CONNECT".to_string()))?;

    loop {
        let event = incoming.recv().await.ok_or_else(|| {
            ConnectionError::Transport("connection closed during STOMP handshake".to_string())
        })?;
        let text = match event {
            WireEvent::Message(WireMessage::Text(text)) => text,
            WireEvent::Message(WireMessage::Binary(bytes)) => {
                String::from_utf8_lossy(&bytes).into_owned()
            }
            WireEvent::Closed { code, reason } => {
                return Err(ConnectionError::Transport(format!(
                    "connection closed during STOMP handshake ({})",
                    describe_close(code, &reason)
                )))
            }
            WireEvent::Error(e) => return Err(ConnectionError::Transport(e)),
        };

        let items = stomp::decode(&text).map_err(|e| ConnectionError::Transport(e.to_string()))?;
        for item in items {
            let Decoded::Frame(frame) = item else {
                continue;
            };
            match frame.command {
                Command::Connected => {
                    let server_beat = frame
                        .get("heart-beat")
                        .and_then(HeartBeat::parse)
                        .unwrap_or_default();
                    return Ok(Session {
                        outgoing,
                        incoming,
                        heartbeat: headers::negotiate(offer, server_beat),
                        version: frame.get("version").map(str::to_string),
                        server: frame.get("server").map(str::to_string),
                    });
                }
                Command::Error => {
                    link.stomp_error(&frame);
                    let message = frame
                        .get("message")
                        .map(str::to_string)
                        .unwrap_or_else(|| frame.body.clone());
                    return Err(ConnectionError::Handshake { message });
                }
                other => tracing::debug!(command = %other, "Ignoring frame before CONNECTED"),
            }
        }
    }
}

async fn run_session(link: &Link, session: Session) -> SessionEnd {
    let Session {
        outgoing,
        mut incoming,
        heartbeat,
        ..
    } = session;

    let mut beat = heartbeat.outgoing.map(|period| {
        let mut beat = interval_at(Instant::now() + period, period);
        beat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        beat
    });
    let mut last_seen = Instant::now();

    loop {
        let silent_after = heartbeat.incoming.map(|period| period * 2);
        tokio::select! {
            event = incoming.recv() => {
                last_seen = Instant::now();
                match event {
                    Some(WireEvent::Message(message)) => link.stomp_payload(message),
                    Some(WireEvent::Closed { code, reason }) => {
                        return SessionEnd::Closed { code, reason };
                    }
                    Some(WireEvent::Error(e)) => return SessionEnd::Failed(e),
                    None => {
                        return SessionEnd::Closed {
                            code: None,
                            reason: "link dropped".to_string(),
                        };
                    }
                }
            }
            _ = next_beat(&mut beat) => {
                if outgoing.send(WireMessage::Text("\n".to_string())).is_err() {
                    return SessionEnd::Failed("connection closed".to_string());
                }
            }
            _ = silence(last_seen, silent_after) => {
                let ms = silent_after.map(|d| d.as_millis()).unwrap_or_default();
                return SessionEnd::Failed(format!("No heart-beat from server for {}ms", ms));
            }
        }
    }
}

async fn next_beat(beat: &mut Option<Interval>) {
    match beat {
        Some(beat) => {
            beat.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn silence(last_seen: Instant, limit: Option<Duration>) {
    match limit {
        Some(limit) => sleep_until(last_seen + limit).await,
        None => std::future::pending().await,
    }
}
