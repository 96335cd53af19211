//! Variable registry.
//!
//! Maps fully-qualified names (`<namespace>/<name>`) to handlers. The
//! registry is built once at startup and read-only afterwards.

use crate::error::RegistryError;
use serde_json::{Map, Value as JsonValue};
use sqlpod_protocol::NamespaceDescription;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Arguments passed to a variable: the first element of the JSON `args` list.
pub type Args = Map<String, JsonValue>;

/// What a variable returns on success.
#[derive(Debug, Clone, PartialEq)]
pub enum VarOutput {
    /// A value serialized to JSON text before it is sent.
    Json(JsonValue),
    /// Text sent as-is.
    Text(String),
}

impl VarOutput {
    /// Returns the text carried in the response `value` field.
    pub fn into_wire(self) -> String {
        match self {
            VarOutput::Json(value) => value.to_string(),
            VarOutput::Text(text) => text,
        }
    }
}

/// A variable failure, reported to the client as `ex-message`/`ex-data`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct VarError {
    pub message: String,
    pub data: Option<JsonValue>,
}

impl VarError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = Some(data);
        self
    }
}

/// A callable variable.
///
/// Handlers run on the blocking pool, so they may do CPU-heavy work, but
/// must not keep state between calls.
pub trait VarHandler: Send + Sync + 'static {
    fn invoke(&self, args: &Args) -> Result<VarOutput, VarError>;
}

impl<F> VarHandler for F
where
    F: Fn(&Args) -> Result<VarOutput, VarError> + Send + Sync + 'static,
{
    fn invoke(&self, args: &Args) -> Result<VarOutput, VarError> {
        self(args)
    }
}

type Namespace = BTreeMap<String, Arc<dyn VarHandler>>;

/// Registry of every variable the pod exposes.
#[derive(Default, Clone)]
pub struct VariableRegistry {
    namespaces: BTreeMap<String, Namespace>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under a fully-qualified name.
    pub fn register(
        &mut self,
        name: &str,
        handler: impl VarHandler,
    ) -> Result<(), RegistryError> {
        self.register_arc(name, Arc::new(handler))
    }

    /// Registers a shared handler under a fully-qualified name.
    pub fn register_arc(
        &mut self,
        name: &str,
        handler: Arc<dyn VarHandler>,
    ) -> Result<(), RegistryError> {
        let (namespace, var) =
            split_name(name).ok_or_else(|| RegistryError::InvalidName(name.to_string()))?;

        let vars = self.namespaces.entry(namespace.to_string()).or_default();
        if vars.contains_key(var) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        vars.insert(var.to_string(), handler);
        tracing::debug!("Registered var {}", name);
        Ok(())
    }

    /// Looks up a handler by fully-qualified name.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn VarHandler>> {
        let (namespace, var) = split_name(name)?;
        self.namespaces.get(namespace)?.get(var).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Number of registered variables.
    pub fn len(&self) -> usize {
        self.namespaces.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lists namespaces and their variable names, both sorted.
    pub fn describe(&self) -> Vec<NamespaceDescription> {
        self.namespaces
            .iter()
            .map(|(name, vars)| NamespaceDescription {
                name: name.clone(),
                vars: vars.keys().cloned().collect(),
            })
            .collect()
    }
}

impl fmt::Debug for VariableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.namespaces
                    .iter()
                    .map(|(name, vars)| (name, vars.keys().collect::<Vec<_>>())),
            )
            .finish()
    }
}

/// Splits `ns/name` at the first slash. Both parts must be non-blank and
/// the name must not contain another slash.
fn split_name(name: &str) -> Option<(&str, &str)> {
    let (namespace, var) = name.split_once('/')?;
    if namespace.trim().is_empty() || var.trim().is_empty() || var.contains('/') {
        return None;
    }
    Some((namespace, var))
}
