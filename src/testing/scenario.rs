//! Test scenario documents
//!
//! Scenarios are JSON (or YAML) documents with a name, optional runner
//! settings, variables and an ordered list of actions. Parsing validates
//! every action up front so a broken file fails before anything connects;
//! errors name the action by its 1-based position.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::common::{Error, Result, ScenarioValidationError};
use crate::connection::ProtocolKind;

type Validation<T> = std::result::Result<T, ScenarioValidationError>;

/// A validated scenario
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestScenario {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub config: ScenarioConfig,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    pub actions: Vec<TestAction>,
}

/// Runner settings carried by the scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioConfig {
    /// Connection establishment deadline in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Halt at the first failed action
    #[serde(default = "default_stop_on_error")]
    pub stop_on_error: bool,
    /// Extra attempts for a failed action
    #[serde(default)]
    pub retry_on_error: u32,
    /// Lowest level of runner log line kept in the result
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_stop_on_error() -> bool {
    true
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            stop_on_error: default_stop_on_error(),
            retry_on_error: 0,
            log_level: LogLevel::default(),
        }
    }
}

/// Severity of a runner log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// One step of a scenario
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestAction {
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Keep going even when this action fails under `stopOnError`
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    Connect {
        url: String,
        #[serde(rename = "connectionType")]
        connection_type: ProtocolKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    Disconnect,
    Subscribe {
        destination: String,
    },
    Unsubscribe {
        destination: String,
    },
    Send {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        destination: Option<String>,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    Wait {
        /// Milliseconds
        duration: u64,
    },
    Assert {
        #[serde(rename = "assertionType")]
        assertion: AssertionType,
        #[serde(skip_serializing_if = "Option::is_none")]
        expected: Option<Value>,
        /// Keep re-checking for up to this many milliseconds
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    Log {
        message: String,
    },
}

impl ActionKind {
    /// The `type` name used in scenario files
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Disconnect => "disconnect",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Send { .. } => "send",
            Self::Wait { .. } => "wait",
            Self::Assert { .. } => "assert",
            Self::Log { .. } => "log",
        }
    }
}

/// Assertion names. Unknown names parse fine and fail when evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssertionType {
    StatusIs,
    MessageReceived,
    MessageCount,
    MessageContains,
    JsonValid,
    SubscriptionExists,
    Other(String),
}

impl AssertionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::StatusIs => "status_is",
            Self::MessageReceived => "message_received",
            Self::MessageCount => "message_count",
            Self::MessageContains => "message_contains",
            Self::JsonValid => "json_valid",
            Self::SubscriptionExists => "subscription_exists",
            Self::Other(name) => name,
        }
    }
}

impl FromStr for AssertionType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "status_is" => Self::StatusIs,
            "message_received" => Self::MessageReceived,
            "message_count" => Self::MessageCount,
            "message_contains" => Self::MessageContains,
            "json_valid" => Self::JsonValid,
            "subscription_exists" => Self::SubscriptionExists,
            other => Self::Other(other.to_string()),
        })
    }
}

impl fmt::Display for AssertionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AssertionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Load a scenario file; `.yaml`/`.yml` files are read as YAML, anything
/// else as JSON
pub fn load_scenario(path: &Path) -> Result<TestScenario> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    let value: Value = if is_yaml {
        serde_yaml::from_str(&content)
            .map_err(|e| ScenarioValidationError::InvalidDocument(e.to_string()))?
    } else {
        serde_json::from_str(&content)
            .map_err(|e| ScenarioValidationError::InvalidDocument(e.to_string()))?
    };
    Ok(parse_scenario_value(value)?)
}

/// Parse scenario JSON text
pub fn parse_scenario(text: &str) -> Validation<TestScenario> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ScenarioValidationError::InvalidDocument(e.to_string()))?;
    parse_scenario_value(value)
}

/// Validate an already-decoded scenario document
pub fn parse_scenario_value(value: Value) -> Validation<TestScenario> {
    let Value::Object(mut doc) = value else {
        return Err(ScenarioValidationError::InvalidDocument(
            "top level must be an object".to_string(),
        ));
    };

    let name = match doc.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            return Err(ScenarioValidationError::MissingName)
        }
        Some(_) => {
            return Err(ScenarioValidationError::InvalidDocument(
                "'name' must be a string".to_string(),
            ))
        }
    };
    let description = document_string(&doc, "description")?;
    let version = match doc.get("version") {
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => document_string(&doc, "version")?,
    };

    let config = match doc.remove("config") {
        None | Some(Value::Null) => ScenarioConfig::default(),
        Some(config) => serde_json::from_value(config).map_err(|e| {
            ScenarioValidationError::InvalidDocument(format!("invalid 'config': {}", e))
        })?,
    };

    let variables = match doc.get("variables") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Object(vars)) => vars
            .iter()
            .map(|(k, v)| {
                scalar_text(v).map(|v| (k.clone(), v)).ok_or_else(|| {
                    ScenarioValidationError::InvalidDocument(format!(
                        "variable '{}' must be a string, number or boolean",
                        k
                    ))
                })
            })
            .collect::<Validation<_>>()?,
        Some(_) => {
            return Err(ScenarioValidationError::InvalidDocument(
                "'variables' must be an object".to_string(),
            ))
        }
    };

    let actions = match doc.get("actions") {
        None | Some(Value::Null) => return Err(ScenarioValidationError::MissingActions),
        Some(Value::Array(actions)) if actions.is_empty() => {
            return Err(ScenarioValidationError::EmptyActions)
        }
        Some(Value::Array(actions)) => actions
            .iter()
            .enumerate()
            .map(|(i, action)| parse_action(i + 1, action))
            .collect::<Validation<Vec<_>>>()?,
        Some(_) => {
            return Err(ScenarioValidationError::InvalidDocument(
                "'actions' must be an array".to_string(),
            ))
        }
    };

    Ok(TestScenario {
        name,
        description,
        version,
        config,
        variables,
        actions,
    })
}

fn document_string(doc: &Map<String, Value>, field: &str) -> Validation<Option<String>> {
    match doc.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ScenarioValidationError::InvalidDocument(format!(
            "'{}' must be a string",
            field
        ))),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Field access for one action, producing errors that name the action
struct Fields<'a> {
    index: usize,
    kind: &'a str,
    obj: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn optional_string(&self, field: &str) -> Validation<Option<String>> {
        match self.obj.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(ScenarioValidationError::invalid_field(
                self.index,
                field,
                "must be a string",
            )),
        }
    }

    /// A string that must be present and non-blank
    fn required_string(&self, field: &str) -> Validation<String> {
        match self.optional_string(field)? {
            Some(s) if !s.trim().is_empty() => Ok(s),
            _ => Err(ScenarioValidationError::missing_field(
                self.index, self.kind, field,
            )),
        }
    }

    fn optional_millis(&self, field: &str) -> Validation<Option<u64>> {
        match self.obj.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => {
                if let Some(ms) = n.as_u64() {
                    return Ok(Some(ms));
                }
                match n.as_f64() {
                    Some(ms) if ms.is_finite() && ms >= 0.0 => Ok(Some(ms.round() as u64)),
                    _ => Err(ScenarioValidationError::invalid_field(
                        self.index,
                        field,
                        "must be a non-negative number of milliseconds",
                    )),
                }
            }
            Some(_) => Err(ScenarioValidationError::invalid_field(
                self.index,
                field,
                "must be a number of milliseconds",
            )),
        }
    }

    fn headers(&self) -> Validation<BTreeMap<String, String>> {
        match self.obj.get("headers") {
            None | Some(Value::Null) => Ok(BTreeMap::new()),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    scalar_text(v).map(|v| (k.clone(), v)).ok_or_else(|| {
                        ScenarioValidationError::invalid_field(
                            self.index,
                            "headers",
                            format!("header '{}' must be a string", k),
                        )
                    })
                })
                .collect(),
            Some(_) => Err(ScenarioValidationError::invalid_field(
                self.index,
                "headers",
                "must be an object",
            )),
        }
    }

    fn flag(&self, field: &str) -> Validation<bool> {
        match self.obj.get(field) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(ScenarioValidationError::invalid_field(
                self.index,
                field,
                "must be true or false",
            )),
        }
    }
}

fn parse_action(index: usize, value: &Value) -> Validation<TestAction> {
    let Value::Object(obj) = value else {
        return Err(ScenarioValidationError::invalid_field(
            index,
            "action",
            "must be an object",
        ));
    };
    let kind = match obj.get("type") {
        Some(Value::String(kind)) if !kind.trim().is_empty() => kind.as_str(),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            return Err(ScenarioValidationError::missing_field(index, "action", "type"))
        }
        Some(_) => {
            return Err(ScenarioValidationError::invalid_field(
                index,
                "type",
                "must be a string",
            ))
        }
    };
    let fields = Fields { index, kind, obj };

    let action = match kind {
        "connect" => {
            let connection_type = match fields.optional_string("connectionType")? {
                Some(name) => name
                    .parse::<ProtocolKind>()
                    .map_err(|reason| ScenarioValidationError::invalid_field(index, "connectionType", reason))?,
                None => ProtocolKind::Raw,
            };
            ActionKind::Connect {
                url: fields.required_string("url")?,
                connection_type,
                token: fields
                    .optional_string("token")?
                    .filter(|t| !t.trim().is_empty()),
                headers: fields.headers()?,
            }
        }
        "disconnect" => ActionKind::Disconnect,
        "subscribe" => ActionKind::Subscribe {
            destination: fields.required_string("destination")?,
        },
        "unsubscribe" => ActionKind::Unsubscribe {
            destination: fields.required_string("destination")?,
        },
        "send" => {
            let message = match obj.get("message") {
                None | Some(Value::Null) => {
                    return Err(ScenarioValidationError::missing_field(index, kind, "message"))
                }
                Some(Value::String(s)) => s.clone(),
                // Structured payloads are sent as their JSON text
                Some(other) => other.to_string(),
            };
            ActionKind::Send {
                message,
                destination: fields
                    .optional_string("destination")?
                    .filter(|d| !d.trim().is_empty()),
                headers: fields.headers()?,
            }
        }
        "wait" => ActionKind::Wait {
            duration: fields
                .optional_millis("duration")?
                .ok_or_else(|| ScenarioValidationError::missing_field(index, kind, "duration"))?,
        },
        "assert" => ActionKind::Assert {
            assertion: fields
                .required_string("assertionType")?
                .parse()
                .unwrap_or_else(|never| match never {}),
            expected: obj.get("expected").filter(|v| !v.is_null()).cloned(),
            timeout: fields.optional_millis("timeout")?,
        },
        "log" => ActionKind::Log {
            message: fields.required_string("message")?,
        },
        other => {
            return Err(ScenarioValidationError::UnknownActionType {
                index,
                kind: other.to_string(),
            })
        }
    };

    Ok(TestAction {
        kind: action,
        description: fields.optional_string("description")?,
        continue_on_error: fields.flag("continueOnError")?,
    })
}
