//! # sqlpod-protocol
//!
//! Wire protocol implementation for sqlpod.
//!
//! This crate provides:
//! - Bencode values and canonical encoding
//! - Incremental decoding with a distinguishable end-of-stream condition
//! - Request parsing and response envelope builders
//! - Protocol error types and limits

pub mod codec;
pub mod error;
pub mod message;
pub mod value;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use message::{
    Description, InvokeError, InvokeRequest, NamespaceDescription, Operation, Response,
};
pub use value::{Dict, Value};

/// Maximum size of a single buffered message (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Maximum nesting depth of lists and dictionaries.
pub const MAX_DEPTH: usize = 64;
