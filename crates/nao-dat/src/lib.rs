//! PlatinumGames `DAT` archive reader.
//!
//! A flat little-endian archive: a fixed header pointing at parallel
//! offset, extension, name and size tables. Entries are stored
//! uncompressed, so embedded and extracted sizes are always equal.

mod archive;
mod error;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use archive::{DatArchive, DatHeader, DAT_MAGIC};
pub use error::{Error, Result};
