//! # sqlpod-core
//!
//! SQL formatting for sqlpod.
//!
//! This crate provides:
//! - The `Formatter` interface consumed by the server
//! - Structured syntax errors with source locations
//! - A T-SQL formatter built on `sqlparser`

pub mod error;
pub mod formatter;
pub mod tsql;

pub use error::SyntaxError;
pub use formatter::{FormatOptions, Formatter};
pub use tsql::TsqlFormatter;
