//! Error types for the CRIWare crate.

use thiserror::Error;

/// Errors that can occur when working with CRIWare containers.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Common library error.
    #[error("{0}")]
    Common(#[from] nao_common::Error),

    /// The file starts with neither a CPK nor a USM signature.
    #[error("unknown CRIWare signature: {0:02x?}")]
    UnknownSignature([u8; 4]),

    /// Structural validation of a header or table failed.
    #[error("corrupt container: {0}")]
    Corrupt(String),

    /// A CRILAYLA stream was malformed or ended early.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// Entry index past the end of the index.
    #[error("entry index {0} out of range")]
    EntryOutOfRange(usize),
}

impl Error {
    /// Whether this error was caused by a cancelled copy.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Common(nao_common::Error::Cancelled))
    }
}

/// Result type for CRIWare operations.
pub type Result<T> = std::result::Result<T, Error>;
