//! WebSocket connector built on tokio-tungstenite
//!
//! Each opened link gets a pump task that owns the socket, writes whatever
//! arrives on the outgoing channel and forwards reads as [`WireEvent`]s.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::common::ConnectionError;

use super::{validate_url, Connector, WireEvent, WireLink, WireMessage};

/// Opens real WebSocket connections
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &str) -> Result<WireLink, ConnectionError> {
        validate_url(url)?;

        tracing::debug!(%url, "Opening WebSocket");
        let (socket, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;
        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<WireEvent>();
        let (mut sink, mut stream) = socket.split();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => {
                        let Some(message) = outgoing else {
                            // Every sender is gone: close politely
                            let _ = sink.close().await;
                            break;
                        };
                        let frame = match message {
                            WireMessage::Text(text) => Message::text(text),
                            WireMessage::Binary(bytes) => Message::binary(bytes),
                        };
                        if let Err(e) = sink.send(frame).await {
                            let _ = in_tx.send(WireEvent::Error(e.to_string()));
                            break;
                        }
                    }
                    incoming = stream.next() => {
                        let event = match incoming {
                            Some(Ok(Message::Text(text))) => {
                                WireEvent::Message(WireMessage::Text(text.as_str().to_owned()))
                            }
                            Some(Ok(Message::Binary(bytes))) => {
                                WireEvent::Message(WireMessage::Binary(bytes.to_vec()))
                            }
                            Some(Ok(Message::Close(frame))) => {
                                let (code, reason) = match frame {
                                    Some(frame) => {
                                        (Some(u16::from(frame.code)), frame.reason.as_str().to_owned())
                                    }
                                    None => (None, String::new()),
                                };
                                let _ = in_tx.send(WireEvent::Closed { code, reason });
                                break;
                            }
                            // Pings are answered by tungstenite on the next write/flush
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                let _ = in_tx.send(WireEvent::Error(e.to_string()));
                                break;
                            }
                            None => {
                                let _ = in_tx.send(WireEvent::Closed {
                                    code: None,
                                    reason: "stream ended".to_string(),
                                });
                                break;
                            }
                        };
                        if in_tx.send(event).is_err() {
                            // Nobody is listening any more
                            let _ = sink.close().await;
                            break;
                        }
                    }
                }
            }
            tracing::trace!("WebSocket pump finished");
        });

        Ok(WireLink {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
