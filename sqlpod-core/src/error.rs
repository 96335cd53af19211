//! Core error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A syntax error reported by a formatter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct SyntaxError {
    /// Human-readable description, without the location suffix.
    pub message: String,
    /// 1-based line, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    /// 1-based column, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u64>,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(mut self, line: u64, column: u64) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    /// Builds an error from a parser message of the form
    /// `"<message> at Line: <n>, Column: <m>"`.
    ///
    /// Messages without a recognisable location suffix are kept whole.
    pub fn from_parser_message(text: &str) -> Self {
        const MARKER: &str = " at Line: ";

        if let Some(idx) = text.rfind(MARKER) {
            let location = &text[idx + MARKER.len()..];
            if let Some((line, column)) = location.split_once(", Column: ") {
                if let (Ok(line), Ok(column)) = (line.trim().parse(), column.trim().parse()) {
                    return Self::new(&text[..idx]).at(line, column);
                }
            }
        }
        Self::new(text)
    }
}
