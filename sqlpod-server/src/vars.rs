//! Built-in variables.

use crate::error::RegistryError;
use crate::registry::{Args, VarError, VarHandler, VarOutput, VariableRegistry};
use serde_json::{Map, Value as JsonValue};
use sqlpod_core::{FormatOptions, Formatter};
use std::sync::Arc;

/// Namespace holding the built-in variables.
pub const NAMESPACE: &str = "pod.xledger.tsql-scriptdom";

/// Fully-qualified name of the SQL reformatting variable.
pub const REFORMAT_SQL: &str = "pod.xledger.tsql-scriptdom/reformat-sql";

/// Reformats the `sql` argument.
///
/// Arguments:
/// - `sql` (string, required, non-blank)
/// - `initial-quoted-identifiers` (bool, optional, default `false`)
///
/// Returns the formatted text. On syntax errors fails with
/// `"Could not parse sql"` and `ex-data` of `{"errors": [...]}`.
pub struct ReformatSql {
    formatter: Arc<dyn Formatter>,
}

impl ReformatSql {
    pub fn new(formatter: Arc<dyn Formatter>) -> Self {
        Self { formatter }
    }
}

impl VarHandler for ReformatSql {
    fn invoke(&self, args: &Args) -> Result<VarOutput, VarError> {
        let sql = args
            .get("sql")
            .and_then(JsonValue::as_str)
            .filter(|sql| !sql.trim().is_empty())
            .ok_or_else(|| VarError::new("Missing required \"sql\" argument."))?;

        let quoted_identifiers = args
            .get("initial-quoted-identifiers")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        let options = FormatOptions::default().with_quoted_identifiers(quoted_identifiers);

        match self.formatter.format(sql, options) {
            Ok(formatted) => Ok(VarOutput::Text(formatted)),
            Err(errors) => {
                tracing::debug!("reformat-sql: {} syntax error(s)", errors.len());
                let errors = serde_json::to_value(&errors)
                    .map_err(|e| VarError::new(format!("Could not encode parse errors: {}", e)))?;
                let mut data = Map::new();
                data.insert("errors".to_string(), errors);
                Err(VarError::new("Could not parse sql").with_data(JsonValue::Object(data)))
            }
        }
    }
}

/// Registers every built-in variable.
pub fn register_builtins(
    registry: &mut VariableRegistry,
    formatter: Arc<dyn Formatter>,
) -> Result<(), RegistryError> {
    registry.register(REFORMAT_SQL, ReformatSql::new(formatter))
}

impl VariableRegistry {
    /// Creates a registry holding the built-in variables.
    pub fn with_builtins(formatter: Arc<dyn Formatter>) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        register_builtins(&mut registry, formatter)?;
        Ok(registry)
    }
}
