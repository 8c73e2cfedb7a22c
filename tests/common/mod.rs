//! Local servers for integration tests
//!
//! Both listen on an ephemeral port on 127.0.0.1 and serve any number of
//! connections until the test process exits.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::accept_async;

use wstester::connection::{EventLog, LogEntry};
use wstester::stomp::{decode, Command, Decoded, Frame};

/// Token the broker rejects at CONNECT
pub const REJECTED_TOKEN: &str = "expired";

/// Echo every text and binary message back; returns the ws:// URL
pub async fn echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(echo(stream));
        }
    });

    format!("ws://{}/echo", addr)
}

async fn echo(stream: TcpStream) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            Message::Text(_) | Message::Binary(_) => {
                if ws.send(msg).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// A minimal STOMP broker: fans SEND out to matching subscriptions
pub struct Broker {
    pub url: String,
    /// Every frame a client sent, in arrival order
    pub received: Arc<Mutex<Vec<Frame>>>,
}

impl Broker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        tokio::spawn({
            let received = received.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve_stomp(stream, received.clone()));
                }
            }
        });

        Self {
            url: format!("ws://{}/stomp", addr),
            received,
        }
    }

    /// Frames of one kind the broker has seen so far
    pub fn frames(&self, command: Command) -> Vec<Frame> {
        self.received
            .lock()
            .iter()
            .filter(|f| f.command == command)
            .cloned()
            .collect()
    }
}

async fn serve_stomp(stream: TcpStream, received: Arc<Mutex<Vec<Frame>>>) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut stream) = ws.split();
    let mut subscriptions: Vec<(String, String)> = Vec::new();
    let mut next_message = 0u64;

    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            Message::Text(text) => text.as_str().to_string(),
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(items) = decode(&text) else {
            continue;
        };

        for item in items {
            let Decoded::Frame(frame) = item else {
                continue;
            };
            received.lock().push(frame.clone());

            let mut replies = Vec::new();
            let mut close = false;
            match frame.command {
                Command::Connect => {
                    let rejected = frame
                        .get("Authorization")
                        .is_some_and(|auth| auth.ends_with(REJECTED_TOKEN));
                    if rejected {
                        replies.push(
                            Frame::new(Command::Error)
                                .header("message", "Authentication failed: token expired")
                                .body("Unauthorized"),
                        );
                        close = true;
                    } else {
                        replies.push(
                            Frame::new(Command::Connected)
                                .header("version", "1.2")
                                .header("heart-beat", "0,0"),
                        );
                    }
                }
                Command::Subscribe => {
                    if let (Some(id), Some(destination)) = (frame.get("id"), frame.get("destination")) {
                        subscriptions.push((id.to_string(), destination.to_string()));
                    }
                }
                Command::Unsubscribe => {
                    if let Some(id) = frame.get("id") {
                        subscriptions.retain(|(sub, _)| sub != id);
                    }
                }
                Command::Send => {
                    let destination = frame.get("destination").unwrap_or_default();
                    for (id, _) in subscriptions.iter().filter(|(_, d)| d == destination) {
                        next_message += 1;
                        let mut message = Frame::new(Command::Message)
                            .header("subscription", id.as_str())
                            .header("message-id", next_message.to_string())
                            .header("destination", destination)
                            .body(frame.body.clone());
                        if let Some(content_type) = frame.get("content-type") {
                            message = message.header("content-type", content_type);
                        }
                        replies.push(message);
                    }
                }
                Command::Disconnect => close = true,
                _ => {}
            }

            for reply in replies {
                if sink.send(Message::text(reply.encode())).await.is_err() {
                    return;
                }
            }
            if close {
                let _ = sink.close().await;
                return;
            }
        }
    }
}

/// Wait until an entry matching `pred` is in the log
pub async fn wait_for_entry(log: &EventLog, pred: impl Fn(&LogEntry) -> bool) -> LogEntry {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(entry) = log.snapshot().into_iter().find(|e| pred(e)) {
            return entry;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "no matching log entry in {:#?}",
            log.snapshot()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
