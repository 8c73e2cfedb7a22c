//! wstester - WebSocket and STOMP connection tester
//!
//! This library manages a single WebSocket connection, either raw or
//! speaking STOMP, records everything that happens on it in an event log,
//! and runs declarative test scenarios against it.

pub mod cli;
pub mod commands;
pub mod common;
pub mod connection;
pub mod session;
pub mod stomp;
pub mod testing;
pub mod transport;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionStatus, ProtocolKind};
pub use session::AppSession;
pub use testing::{TestRunner, TestScenario, TestScenarioResult};
