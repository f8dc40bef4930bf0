//! Nao - CRIWare and PlatinumGames container extraction.
//!
//! This crate ties the format readers together behind one engine:
//!
//! - [`detect`] - Classify a file by signature, then by extension
//! - [`Container`] - An opened CPK, USM or DAT file with its entry index
//! - [`Session`] - Owns the currently open container
//! - Extraction of single entries or whole containers, in the foreground
//!   or on a worker thread ([`spawn_extract_all`])
//!
//! # Crates
//!
//! - [`nao_common`] - Binary reading, entry types, chunked copying
//! - [`nao_cri`] - CPK packs, USM streams, CRILAYLA decompression
//! - [`nao_dat`] - PlatinumGames DAT archives
//!
//! # Example
//!
//! ```no_run
//! use nao::prelude::*;
//!
//! let container = Container::open("movie.usm")?;
//! for entry in container.entries() {
//!     println!("{} ({} bytes)", entry.name, entry.extracted_size);
//! }
//!
//! let summary = container.extract_all(
//!     "out".as_ref(),
//!     &ExtractOptions::default(),
//!     &SilentProgress,
//!     &CancelToken::new(),
//! )?;
//! println!("wrote {} bytes", summary.bytes_written);
//! # Ok::<(), nao::Error>(())
//! ```

mod container;
pub mod detect;
mod error;
mod extract;
mod job;
pub mod naming;
mod progress;

pub use container::{Container, Reader, Session};
pub use detect::{detect, FileType};
pub use error::{Error, Result};
pub use extract::{BulkSummary, EntryFailure, ErrorPolicy, ExtractOptions};
pub use job::{spawn_extract_all, spawn_extract_entry, spawn_job, JobHandle};
pub use progress::{ChannelProgress, ExtractProgress, JobEvent, SilentProgress};

// Re-export the reader crates
pub use nao_common as common;
pub use nao_cri as cri;
pub use nao_dat as dat;

pub use nao_common::{CancelToken, ContainerIndex, EmbeddedEntry, StreamKind, DEFAULT_CHUNK_SIZE};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        detect, spawn_extract_all, spawn_extract_entry, BulkSummary, CancelToken, Container,
        EmbeddedEntry, Error, ErrorPolicy, ExtractOptions, ExtractProgress, FileType, JobEvent,
        Session, SilentProgress, StreamKind,
    };
}
