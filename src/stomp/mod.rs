//! STOMP over WebSocket: frame codec and header rules

pub mod frame;
pub mod headers;

pub use frame::{decode, Command, Decoded, Frame};
pub use headers::{HeartBeat, Negotiated};
