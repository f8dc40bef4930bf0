//! Errors raised while reading container bytes or copying entry payloads.

use thiserror::Error;

/// Error shared by every Nao reader.
#[derive(Debug, Error)]
pub enum Error {
    /// A read ran past the end of a table, header or mapped file.
    #[error("unexpected end of buffer: needed {needed} bytes but only {available} available")]
    UnexpectedEof { needed: usize, available: usize },

    /// A packet or table did not start with its signature.
    #[error("invalid magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic {
        expected: Vec<u8>,
        actual: Vec<u8>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// A string pool entry ran to the end of the pool.
    #[error("string missing null terminator")]
    MissingNullTerminator,

    /// A copy was stopped through its [`CancelToken`](crate::CancelToken).
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
