//! Server error types.

use thiserror::Error;

/// Server errors.
///
/// None of these are sent to the client; per-request failures become
/// exception responses instead. A `ServerError` ends the dispatch loop.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] sqlpod_protocol::ProtocolError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Errors raised while building the variable registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("invalid variable name {0:?}: expected \"<namespace>/<name>\"")]
    InvalidName(String),

    #[error("variable {0:?} is already registered")]
    Duplicate(String),
}

impl ServerError {
    /// Returns whether this error means the peer went away while writing.
    pub fn is_broken_pipe(&self) -> bool {
        let io = match self {
            ServerError::Io(e) => e,
            ServerError::Protocol(sqlpod_protocol::ProtocolError::Io(e)) => e,
            _ => return false,
        };
        matches!(
            io.kind(),
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlpod_protocol::ProtocolError;
    use std::io;

    #[test]
    fn test_broken_pipe_detection() {
        let err = ServerError::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(err.is_broken_pipe());

        let err = ServerError::from(ProtocolError::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert!(err.is_broken_pipe());

        let err = ServerError::from(ProtocolError::UnexpectedEof { buffered: 0 });
        assert!(!err.is_broken_pipe());
    }

    #[test]
    fn test_startup_failures_convert() {
        fn validate(config: &crate::Config) -> Result<(), ServerError> {
            config.validate()?;
            Ok(())
        }
        let mut config = crate::Config::default();
        config.transport.max_message_bytes = 0;
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
        assert!(err.to_string().starts_with("configuration error: "));
        assert!(!err.is_broken_pipe());

        fn register(name: &str) -> Result<(), ServerError> {
            let formatter = std::sync::Arc::new(sqlpod_core::TsqlFormatter::new());
            let mut registry = crate::VariableRegistry::new();
            registry.register(name, crate::ReformatSql::new(formatter))?;
            Ok(())
        }
        let err = register("nonamespace").unwrap_err();
        assert!(matches!(err, ServerError::Registry(RegistryError::InvalidName(_))));
        assert!(err.to_string().starts_with("registry error: invalid variable name"));
    }

    #[test]
    fn test_registry_error_messages() {
        assert_eq!(
            RegistryError::Duplicate("a/b".into()).to_string(),
            "variable \"a/b\" is already registered"
        );
        assert!(RegistryError::InvalidName("ab".into())
            .to_string()
            .contains("<namespace>/<name>"));
    }
}
