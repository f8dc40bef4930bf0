//! Error types for the Nao engine.

use thiserror::Error;

/// Errors surfaced by the engine, independent of container format.
#[derive(Debug, Error)]
pub enum Error {
    /// No reader handles this file.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A header or table failed structural validation.
    #[error("corrupt container: {0}")]
    CorruptContainer(String),

    /// A compressed payload was malformed or decoded to the wrong size.
    #[error("decompression failed: {0}")]
    DecompressionFailure(String),

    /// Reading the container or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The entry has no payload to extract.
    #[error("entry '{0}' has no extractable payload")]
    ZeroSizeEntry(String),

    /// Another extraction is running against the same container.
    #[error("an extraction is already running on this container")]
    Busy,

    /// The job was stopped through its cancel token.
    #[error("extraction cancelled")]
    Cancelled,

    /// Entry index past the end of the index.
    #[error("entry index {0} out of range")]
    EntryOutOfRange(usize),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<nao_common::Error> for Error {
    fn from(error: nao_common::Error) -> Self {
        match error {
            nao_common::Error::Cancelled => Self::Cancelled,
            nao_common::Error::Io(e) => Self::Io(e),
            other => Self::CorruptContainer(other.to_string()),
        }
    }
}

impl From<nao_cri::Error> for Error {
    fn from(error: nao_cri::Error) -> Self {
        use nao_cri::Error as E;
        match error {
            E::Io(e) => Self::Io(e),
            E::Common(e) => e.into(),
            E::UnknownSignature(magic) => {
                Self::UnsupportedFormat(format!("unknown CRIWare signature {magic:02x?}"))
            }
            E::Corrupt(msg) => Self::CorruptContainer(msg),
            E::Decompression(msg) => Self::DecompressionFailure(msg),
            E::EntryOutOfRange(index) => Self::EntryOutOfRange(index),
        }
    }
}

impl From<nao_dat::Error> for Error {
    fn from(error: nao_dat::Error) -> Self {
        use nao_dat::Error as E;
        match error {
            E::Io(e) => Self::Io(e),
            E::Common(e) => e.into(),
            E::Corrupt(msg) => Self::CorruptContainer(msg),
            E::EntryOutOfRange(index) => Self::EntryOutOfRange(index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_errors_map_to_kinds() {
        let cancelled: Error = nao_cri::Error::Common(nao_common::Error::Cancelled).into();
        assert!(matches!(cancelled, Error::Cancelled));

        let eof: Error = nao_dat::Error::Common(nao_common::Error::UnexpectedEof {
            needed: 4,
            available: 0,
        })
        .into();
        assert!(matches!(eof, Error::CorruptContainer(_)));

        let unknown: Error = nao_cri::Error::UnknownSignature(*b"ABCD").into();
        assert!(matches!(unknown, Error::UnsupportedFormat(_)));

        let decode: Error = nao_cri::Error::Decompression("short".into()).into();
        assert!(matches!(decode, Error::DecompressionFailure(_)));
    }
}
