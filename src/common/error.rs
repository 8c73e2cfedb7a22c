//! Error types for wstester
//!
//! Messages are written for a person reading a terminal or a scenario
//! report, with a hint on what to change where one is obvious.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for wstester
#[derive(Error, Debug)]
pub enum Error {
    // === Connection Errors ===
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Cannot {action}: not connected")]
    NotConnected { action: String },

    #[error("A destination is required for STOMP {action}")]
    MissingDestination { action: String },

    #[error("Malformed STOMP frame: {0}")]
    Frame(String),

    // === Scenario Errors ===
    #[error(transparent)]
    Scenario(#[from] ScenarioValidationError),

    #[error("A scenario is already running. Stop it before starting another")]
    RunnerBusy,

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a not-connected error for the named operation
    pub fn not_connected(action: &str) -> Self {
        Self::NotConnected {
            action: action.to_string(),
        }
    }

    /// Create a missing-destination error for the named STOMP operation
    pub fn missing_destination(action: &str) -> Self {
        Self::MissingDestination {
            action: action.to_string(),
        }
    }
}

/// Failures while establishing or keeping a connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("STOMP handshake failed: {message}")]
    Handshake { message: String },

    #[error("Maximum reconnection attempts ({attempts}) reached")]
    ReconnectLimit { attempts: u32 },

    #[error("Connection attempt cancelled")]
    Cancelled,
}

/// A scenario document that cannot be run
///
/// Action indexes are 1-based so they match what a person counts in the file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScenarioValidationError {
    #[error("Invalid scenario document: {0}")]
    InvalidDocument(String),

    #[error("Scenario is missing required field 'name'")]
    MissingName,

    #[error("Scenario is missing required field 'actions'")]
    MissingActions,

    #[error("Scenario must contain at least one action")]
    EmptyActions,

    #[error("Action {index}: unknown action type '{kind}'")]
    UnknownActionType { index: usize, kind: String },

    #[error("Action {index} ({action}): missing required field '{field}'")]
    MissingField {
        index: usize,
        action: String,
        field: String,
    },

    #[error("Action {index}: invalid field '{field}': {reason}")]
    InvalidField {
        index: usize,
        field: String,
        reason: String,
    },
}

impl ScenarioValidationError {
    /// Create a missing field error
    pub fn missing_field(index: usize, action: &str, field: &str) -> Self {
        Self::MissingField {
            index,
            action: action.to_string(),
            field: field.to_string(),
        }
    }

    /// Create an invalid field error
    pub fn invalid_field(index: usize, field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            index,
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// The 1-based action index this error refers to, if any
    pub fn action_index(&self) -> Option<usize> {
        match self {
            Self::UnknownActionType { index, .. }
            | Self::MissingField { index, .. }
            | Self::InvalidField { index, .. } => Some(*index),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_messages_name_the_action() {
        let err = ScenarioValidationError::missing_field(1, "connect", "url");
        assert_eq!(
            err.to_string(),
            "Action 1 (connect): missing required field 'url'"
        );
        assert_eq!(err.action_index(), Some(1));
        assert_eq!(ScenarioValidationError::EmptyActions.action_index(), None);
    }

    #[test]
    fn test_connection_errors_are_transparent() {
        let err: Error = ConnectionError::ReconnectLimit { attempts: 3 }.into();
        assert_eq!(err.to_string(), "Maximum reconnection attempts (3) reached");

        let err = Error::not_connected("send message");
        assert_eq!(err.to_string(), "Cannot send message: not connected");
    }
}
