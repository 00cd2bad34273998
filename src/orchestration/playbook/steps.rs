use serde_json::{Map, Value};
use std::fmt;

/// A decoded playbook step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybookStep {
    /// Upsert the receiver's `active`/`master` connection
    ConnectReceiver {
        receiver_id: String,
        sender_id: String,
    },
    /// Delete the receiver's `active`/`master` connection
    DisconnectReceiver { receiver_id: String },
}

impl PlaybookStep {
    pub fn action(&self) -> &'static str {
        match self {
            Self::ConnectReceiver { .. } => "connect_receiver",
            Self::DisconnectReceiver { .. } => "disconnect_receiver",
        }
    }

    /// Decode a resolved step object
    pub fn decode(step: &Value) -> Result<Self, StepDecodeError> {
        let object = step.as_object().ok_or(StepDecodeError::NotAnObject)?;
        let action = object
            .get("action")
            .and_then(Value::as_str)
            .ok_or(StepDecodeError::MissingAction)?;

        match action {
            "connect_receiver" => Ok(Self::ConnectReceiver {
                receiver_id: required(object, "receiver_id")?,
                sender_id: required(object, "sender_id")?,
            }),
            "disconnect_receiver" => Ok(Self::DisconnectReceiver {
                receiver_id: required(object, "receiver_id")?,
            }),
            other => Err(StepDecodeError::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepDecodeError {
    NotAnObject,
    MissingAction,
    UnknownAction(String),
    MissingField(&'static str),
}

impl fmt::Display for StepDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "step is not an object"),
            Self::MissingAction => write!(f, "step has no action"),
            Self::UnknownAction(action) => write!(f, "unknown action '{action}'"),
            Self::MissingField(field) => write!(f, "missing required field '{field}'"),
        }
    }
}

impl std::error::Error for StepDecodeError {}

fn required(object: &Map<String, Value>, field: &'static str) -> Result<String, StepDecodeError> {
    match object.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(StepDecodeError::MissingField(field)),
    }
}

/// Replace `{{name}}` placeholders inside every string of `value`.
///
/// String parameters are inserted verbatim, any other JSON value as its JSON
/// text. Placeholders without a matching parameter are left untouched. Only
/// string leaves change, so the structure of the step is preserved.
pub fn resolve_parameters(value: &Value, parameters: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => Value::String(substitute(s, parameters)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_parameters(item, parameters))
                .collect(),
        ),
        Value::Object(object) => Value::Object(
            object
                .iter()
                .map(|(key, item)| (key.clone(), resolve_parameters(item, parameters)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute(template: &str, parameters: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let name = after_open[..end].trim();
        match parameters.get(name) {
            Some(Value::String(s)) => out.push_str(s),
            Some(other) => out.push_str(&other.to_string()),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after_open[end + 2..];
    }
    out.push_str(rest);
    out
}
