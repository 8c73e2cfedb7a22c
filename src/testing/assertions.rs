//! Assertion evaluation
//!
//! Assertions look at a snapshot of the connection: its status, the text
//! of every message received since the run started, and the active
//! subscriptions.

use serde_json::{json, Value};

use crate::connection::{ConnectionStatus, SubscribedTopic};

use super::scenario::AssertionType;

/// Marker separating the summary line from the body of a STOMP message
pub const BODY_MARKER: &str = "Body:";

/// How many recent messages a failed `message_contains` reports
const RECENT_MESSAGES: usize = 5;

/// What an assertion can see
#[derive(Debug, Clone, Copy)]
pub struct AssertionInput<'a> {
    pub status: ConnectionStatus,
    /// Received message texts, oldest first
    pub messages: &'a [String],
    pub subscriptions: &'a [SubscribedTopic],
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssertionOutcome {
    pub passed: bool,
    pub message: String,
    pub data: Option<Value>,
}

impl AssertionOutcome {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            data: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            data: None,
        }
    }

    fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Evaluate one assertion against a snapshot
pub fn evaluate(
    assertion: &AssertionType,
    expected: Option<&Value>,
    input: &AssertionInput<'_>,
) -> AssertionOutcome {
    match assertion {
        AssertionType::StatusIs => status_is(expected, input.status),
        AssertionType::MessageReceived => message_received(input.messages),
        AssertionType::MessageCount => message_count(expected, input.messages),
        AssertionType::MessageContains => contains_any(expected, input.messages),
        AssertionType::JsonValid => json_valid(input.messages),
        AssertionType::SubscriptionExists => subscription_exists(expected, input.subscriptions),
        AssertionType::Other(name) => {
            AssertionOutcome::fail(format!("Assertion type '{}' is not implemented", name))
        }
    }
}

/// Expected value as text; strings are used as-is, anything else as JSON
fn expected_text(expected: Option<&Value>) -> Option<String> {
    match expected? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn status_is(expected: Option<&Value>, actual: ConnectionStatus) -> AssertionOutcome {
    let Some(wanted) = expected_text(expected) else {
        return AssertionOutcome::fail("status_is needs an expected status");
    };
    let data = json!({ "expected": wanted, "actual": actual });
    match wanted.parse::<ConnectionStatus>() {
        Ok(status) if status == actual => {
            AssertionOutcome::pass(format!("Status is {}", actual)).with_data(data)
        }
        Ok(_) => AssertionOutcome::fail(format!("Expected status {}, got {}", wanted, actual))
            .with_data(data),
        Err(reason) => AssertionOutcome::fail(reason).with_data(data),
    }
}

fn message_received(messages: &[String]) -> AssertionOutcome {
    if messages.is_empty() {
        AssertionOutcome::fail("No messages received")
    } else {
        AssertionOutcome::pass(format!("{} message(s) received", messages.len()))
    }
}

fn message_count(expected: Option<&Value>, messages: &[String]) -> AssertionOutcome {
    let wanted = match expected {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    let Some(wanted) = wanted else {
        return AssertionOutcome::fail("message_count needs a non-negative integer expected value");
    };

    let actual = messages.len() as u64;
    let data = json!({ "expected": wanted, "actual": actual });
    if actual == wanted {
        AssertionOutcome::pass(format!("Received {} message(s)", actual)).with_data(data)
    } else {
        AssertionOutcome::fail(format!("Expected {} message(s), got {}", wanted, actual))
            .with_data(data)
    }
}

fn contains_any(expected: Option<&Value>, messages: &[String]) -> AssertionOutcome {
    let Some(wanted) = expected_text(expected) else {
        return AssertionOutcome::fail("message_contains needs an expected value");
    };

    if messages.iter().any(|m| message_contains(m, &wanted)) {
        return AssertionOutcome::pass(format!("A message contains '{}'", wanted));
    }

    let recent: Vec<&String> = messages
        .iter()
        .skip(messages.len().saturating_sub(RECENT_MESSAGES))
        .collect();
    AssertionOutcome::fail(format!("No message contains '{}'", wanted)).with_data(json!({
        "expected": wanted,
        "lastMessages": recent,
    }))
}

fn json_valid(messages: &[String]) -> AssertionOutcome {
    let Some(last) = messages.last() else {
        return AssertionOutcome::fail("No messages received");
    };
    let parses = |text: &str| serde_json::from_str::<Value>(text.trim()).is_ok();
    if parses(last) || body_of(last).is_some_and(parses) {
        AssertionOutcome::pass("Last message is valid JSON")
    } else {
        AssertionOutcome::fail("Last message is not valid JSON")
            .with_data(json!({ "lastMessage": last }))
    }
}

fn subscription_exists(
    expected: Option<&Value>,
    subscriptions: &[SubscribedTopic],
) -> AssertionOutcome {
    let Some(destination) = expected_text(expected) else {
        return AssertionOutcome::fail("subscription_exists needs an expected destination");
    };
    if subscriptions.iter().any(|s| s.destination == destination) {
        AssertionOutcome::pass(format!("Subscribed to {}", destination))
    } else {
        let active: Vec<&str> = subscriptions.iter().map(|s| s.destination.as_str()).collect();
        AssertionOutcome::fail(format!("Not subscribed to {}", destination))
            .with_data(json!({ "expected": destination, "actual": active }))
    }
}

/// Whether `message` contains `expected`, looking through the ways a
/// payload can be wrapped.
///
/// Tried in order, stopping at the first match:
/// 1. the text as-is
/// 2. the body after a `Body:` marker, as-is and re-serialized as JSON
/// 3. the whole text parsed as JSON, unwrapping one level of JSON-encoded
///    string, re-serialized compactly
/// 4. the text with `\n`, `\t`, `\"` and `\\` escapes resolved
pub fn message_contains(message: &str, expected: &str) -> bool {
    if message.contains(expected) {
        return true;
    }

    if let Some(body) = body_of(message) {
        if body.contains(expected) || normalized_json(body).is_some_and(|j| j.contains(expected)) {
            return true;
        }
    }

    if normalized_json(message).is_some_and(|j| j.contains(expected)) {
        return true;
    }

    unescape(message).contains(expected)
}

fn body_of(message: &str) -> Option<&str> {
    let start = message.find(BODY_MARKER)? + BODY_MARKER.len();
    Some(message[start..].trim())
}

/// Parse as JSON and serialize compactly. A JSON string holding JSON is
/// unwrapped once; a plain JSON string yields its contents.
fn normalized_json(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    let value = match value {
        Value::String(inner) => match serde_json::from_str::<Value>(&inner) {
            Ok(parsed) => parsed,
            Err(_) => return Some(inner),
        },
        other => other,
    };
    Some(match value {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            _ => {
                out.push('\\');
                continue;
            }
        }
        chars.next();
    }
    out
}
