//! Request parsing and response envelopes.

use crate::error::ProtocolError;
use crate::value::{Dict, Value};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use thiserror::Error;

/// Status list attached to successful responses.
pub const STATUS_DONE: &[&str] = &["done"];

/// Status list attached to failure responses.
pub const STATUS_DONE_ERROR: &[&str] = &["done", "error"];

/// Operations a client can request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    Describe,
    Invoke,
    Shutdown,
    /// Any operation this pod does not know. Ignored by the server.
    Unknown(String),
}

impl Operation {
    /// Parses an operation name.
    pub fn parse(name: &str) -> Self {
        match name {
            "describe" => Operation::Describe,
            "invoke" => Operation::Invoke,
            "shutdown" => Operation::Shutdown,
            other => Operation::Unknown(other.to_string()),
        }
    }

    /// Reads the `op` key of a message.
    ///
    /// Returns `Ok(None)` when the message has no `op` at all.
    pub fn from_message(msg: &Dict) -> Result<Option<Self>, ProtocolError> {
        match msg.get(&b"op"[..]) {
            None => Ok(None),
            Some(Value::Bytes(raw)) => Ok(Some(Self::parse(&String::from_utf8_lossy(raw)))),
            Some(_) => Err(ProtocolError::NotAString { key: "op" }),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Operation::Describe => "describe",
            Operation::Invoke => "invoke",
            Operation::Shutdown => "shutdown",
            Operation::Unknown(name) => name,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure to be reported to the client as an exception response.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct InvokeError {
    /// Request id, when it was known at the time of failure.
    pub id: Option<String>,
    /// Human-readable message (`ex-message`).
    pub message: String,
    /// Structured details, sent JSON-encoded as `ex-data`.
    pub data: Option<JsonValue>,
}

impl InvokeError {
    pub fn new(id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            id: id.map(str::to_string),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = Some(data);
        self
    }
}

/// A validated `invoke` request.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeRequest {
    /// Correlation id, echoed in the response.
    pub id: String,
    /// Fully-qualified variable name.
    pub var: String,
    /// The argument map decoded from the JSON `args` payload.
    pub args: Map<String, JsonValue>,
}

impl InvokeRequest {
    /// Validates the `id`, `var` and `args` keys of an invoke message.
    pub fn parse(msg: &Dict) -> Result<Self, InvokeError> {
        let (id, var) = match (non_blank(msg, "id"), non_blank(msg, "var")) {
            (Some(id), Some(var)) => (id, var),
            _ => {
                return Err(InvokeError::new(
                    None,
                    "Missing \"id\" and/or \"var\" keys in \"invoke\" operation payload",
                ))
            }
        };

        let Some(Value::Bytes(raw_args)) = msg.get(&b"args"[..]) else {
            return Err(InvokeError::new(
                Some(id.as_str()),
                "Missing required \"args\" argument.",
            ));
        };

        let args = decode_args(raw_args).map_err(|e| {
            InvokeError::new(
                Some(id.as_str()),
                format!("Couldn't deserialize json payload. Expected a map. Error: {}", e),
            )
        })?;

        Ok(Self { id, var, args })
    }
}

/// Reads a key as text, treating missing, non-UTF-8 and whitespace-only
/// values alike.
fn non_blank(msg: &Dict, key: &str) -> Option<String> {
    msg.get(key.as_bytes())
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn decode_args(raw: &[u8]) -> Result<Map<String, JsonValue>, String> {
    let mut list: Vec<Map<String, JsonValue>> =
        serde_json::from_slice(raw).map_err(|e| e.to_string())?;
    if list.is_empty() {
        return Err("argument list is empty".to_string());
    }
    Ok(list.swap_remove(0))
}

/// One namespace in a `describe` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDescription {
    pub name: String,
    pub vars: Vec<String>,
}

/// Body of a `describe` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    pub namespaces: Vec<NamespaceDescription>,
    /// Control operations the pod supports besides describe/invoke.
    pub ops: Vec<String>,
}

impl Description {
    pub fn new(namespaces: Vec<NamespaceDescription>) -> Self {
        Self {
            namespaces,
            ops: vec![Operation::Shutdown.to_string()],
        }
    }

    pub fn to_value(&self) -> Value {
        let namespaces = self
            .namespaces
            .iter()
            .map(|ns| {
                let vars = ns
                    .vars
                    .iter()
                    .map(|var| Value::dict([("name", Value::string(var.as_str()))]))
                    .collect();
                Value::dict([
                    ("name", Value::string(ns.name.as_str())),
                    ("vars", Value::List(vars)),
                ])
            })
            .collect();
        let ops = self
            .ops
            .iter()
            .map(|op| (bytes::Bytes::from(op.clone()), Value::empty_dict()));

        Value::dict([
            ("format", Value::string("json")),
            ("namespaces", Value::List(namespaces)),
            ("ops", Value::dict(ops)),
        ])
    }
}

/// Response envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Successful invoke; `value` is already JSON text (or raw text for
    /// variables that return plain strings).
    Value { id: String, value: String },
    /// Failed request.
    Exception(InvokeError),
    /// Reply to `describe`.
    Describe(Description),
}

impl Response {
    pub fn value(id: impl Into<String>, value: impl Into<String>) -> Self {
        Response::Value {
            id: id.into(),
            value: value.into(),
        }
    }

    pub fn exception(id: Option<&str>, message: impl Into<String>) -> Self {
        Response::Exception(InvokeError::new(id, message))
    }

    /// Returns the correlation id carried by this response, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            Response::Value { id, .. } => Some(id),
            Response::Exception(err) => err.id.as_deref(),
            Response::Describe(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Exception(_))
    }

    /// Builds the wire envelope.
    pub fn to_value(&self) -> Value {
        match self {
            Response::Value { id, value } => Value::dict([
                ("id", Value::string(id.as_str())),
                ("value", Value::string(value.as_str())),
                ("status", Value::string_list(STATUS_DONE.iter().copied())),
            ]),
            Response::Exception(err) => {
                let mut dict = Dict::new();
                dict.insert(
                    "ex-message".into(),
                    Value::string(err.message.as_str()),
                );
                dict.insert(
                    "status".into(),
                    Value::string_list(STATUS_DONE_ERROR.iter().copied()),
                );
                if let Some(ref id) = err.id {
                    dict.insert("id".into(), Value::string(id.as_str()));
                }
                if let Some(ref data) = err.data {
                    dict.insert("ex-data".into(), Value::string(data.to_string()));
                }
                Value::Dict(dict)
            }
            Response::Describe(description) => description.to_value(),
        }
    }
}

impl From<InvokeError> for Response {
    fn from(err: InvokeError) -> Self {
        Response::Exception(err)
    }
}
