//! `${NAME}` substitution in action fields

use std::collections::BTreeMap;

use serde_json::Value;

use super::scenario::{ActionKind, TestAction};

/// Replace every `${NAME}` whose name is defined; unknown references are
/// left exactly as written
pub fn substitute(input: &str, variables: &BTreeMap<String, String>) -> String {
    if !input.contains("${") {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match variables.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn substitute_map(
    map: &BTreeMap<String, String>,
    variables: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    map.iter()
        .map(|(k, v)| (substitute(k, variables), substitute(v, variables)))
        .collect()
}

/// Copy of `action` with variables resolved in every string field
pub fn substitute_action(action: &TestAction, variables: &BTreeMap<String, String>) -> TestAction {
    let sub = |s: &str| substitute(s, variables);

    let kind = match &action.kind {
        ActionKind::Connect {
            url,
            connection_type,
            token,
            headers,
        } => ActionKind::Connect {
            url: sub(url),
            connection_type: *connection_type,
            token: token.as_deref().map(sub),
            headers: substitute_map(headers, variables),
        },
        ActionKind::Disconnect => ActionKind::Disconnect,
        ActionKind::Subscribe { destination } => ActionKind::Subscribe {
            destination: sub(destination),
        },
        ActionKind::Unsubscribe { destination } => ActionKind::Unsubscribe {
            destination: sub(destination),
        },
        ActionKind::Send {
            message,
            destination,
            headers,
        } => ActionKind::Send {
            message: sub(message),
            destination: destination.as_deref().map(sub),
            headers: substitute_map(headers, variables),
        },
        ActionKind::Wait { duration } => ActionKind::Wait {
            duration: *duration,
        },
        ActionKind::Assert {
            assertion,
            expected,
            timeout,
        } => ActionKind::Assert {
            assertion: assertion.clone(),
            expected: expected.as_ref().map(|value| match value {
                Value::String(s) => Value::String(sub(s)),
                other => other.clone(),
            }),
            timeout: *timeout,
        },
        ActionKind::Log { message } => ActionKind::Log {
            message: sub(message),
        },
    };

    TestAction {
        kind,
        description: action.description.as_deref().map(sub),
        continue_on_error: action.continue_on_error,
    }
}
