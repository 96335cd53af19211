//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Input ended before a complete top-level value was available.
    ///
    /// This is the only way orderly peer disconnection is observed, so it is
    /// kept separate from every other decoding failure.
    #[error("reached end of stream while parsing ({buffered} bytes buffered)")]
    UnexpectedEof { buffered: usize },

    #[error("unexpected byte {byte:#04x} at offset {offset}")]
    UnexpectedByte { byte: u8, offset: usize },

    #[error("invalid integer at offset {offset}: {reason}")]
    InvalidInteger { offset: usize, reason: &'static str },

    #[error("invalid byte-string length at offset {offset}")]
    InvalidLength { offset: usize },

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("nesting deeper than {max} levels")]
    TooDeep { max: usize },

    #[error("duplicate dictionary key {key:?}")]
    DuplicateKey { key: String },

    #[error("dictionary key at offset {offset} is not a byte-string")]
    NonStringKey { offset: usize },

    #[error("expected a dictionary, got {found}")]
    NotADict { found: &'static str },

    #[error("key {key:?} must be a byte-string")]
    NotAString { key: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether this error means the input stream has closed.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, ProtocolError::UnexpectedEof { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_of_stream_classification() {
        assert!(ProtocolError::UnexpectedEof { buffered: 0 }.is_end_of_stream());
        assert!(!ProtocolError::UnexpectedByte { byte: b'x', offset: 0 }.is_end_of_stream());
        assert!(!ProtocolError::TooDeep { max: 64 }.is_end_of_stream());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(!ProtocolError::Io(io).is_end_of_stream());
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::UnexpectedEof { buffered: 7 };
        assert!(err.to_string().contains("end of stream"));
        assert!(err.to_string().contains('7'));

        let err = ProtocolError::UnexpectedByte {
            byte: b'x',
            offset: 3,
        };
        assert!(err.to_string().contains("0x78"));

        let err = ProtocolError::MessageTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::DuplicateKey {
            key: "op".to_string(),
        };
        assert!(err.to_string().contains("\"op\""));

        let err = ProtocolError::NotADict { found: "list" };
        assert_eq!(err.to_string(), "expected a dictionary, got list");
    }
}
