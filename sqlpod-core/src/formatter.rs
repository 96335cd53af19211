//! Formatter interface.

use crate::error::SyntaxError;

/// Options accepted by a formatter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatOptions {
    /// Whether double-quoted text starts out as a delimited identifier
    /// (T-SQL `SET QUOTED_IDENTIFIER ON`) instead of a string literal.
    pub initial_quoted_identifiers: bool,
}

impl FormatOptions {
    pub fn with_quoted_identifiers(mut self, enabled: bool) -> Self {
        self.initial_quoted_identifiers = enabled;
        self
    }
}

/// Parses SQL text and renders it back in a canonical layout.
///
/// Implementations must be pure: the same input and options always produce
/// the same output.
pub trait Formatter: Send + Sync {
    /// Formats `sql`, or returns every syntax error found (never empty).
    fn format(&self, sql: &str, options: FormatOptions) -> Result<String, Vec<SyntaxError>>;
}
