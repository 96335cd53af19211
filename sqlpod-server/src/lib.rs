//! # sqlpod-server
//!
//! Pod server for sqlpod.
//!
//! This crate provides:
//! - Bencode message transport over async byte streams (stdin/stdout)
//! - The variable registry and the built-in `reformat-sql` variable
//! - Handlers for `describe` and `invoke`
//! - The sequential dispatch loop with cooperative shutdown
//! - YAML/environment configuration

pub mod config;
pub mod error;
pub mod handler;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;
pub mod vars;

pub use config::{Config, ConfigError, LoggingConfig, TransportConfig};
pub use error::{RegistryError, ServerError};
pub use handler::CommandHandler;
pub use registry::{Args, VarError, VarHandler, VarOutput, VariableRegistry};
pub use server::{Server, ShutdownHandle, END_OF_STREAM};
pub use session::{Session, SessionState};
pub use transport::MessageTransport;
pub use vars::{ReformatSql, NAMESPACE, REFORMAT_SQL};
