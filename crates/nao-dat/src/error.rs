//! Error types for the DAT crate.

use thiserror::Error;

/// Errors that can occur when working with DAT archives.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Common library error.
    #[error("{0}")]
    Common(#[from] nao_common::Error),

    /// Header or table failed validation.
    #[error("corrupt DAT archive: {0}")]
    Corrupt(String),

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

/// Result type for DAT operations.
pub type Result<T> = std::result::Result<T, Error>;
