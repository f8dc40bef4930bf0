//! CRIWare container reader.
//!
//! Handles the two CRIWare container families:
//!
//! - **CPK** resource packs, with a named `TOC` or an ID-only `ITOC`
//!   directory and optional XOR-obfuscated header tables
//! - **USM** movie files, demuxed into one entry per audio/video stream
//!
//! Pack entries may be stored with CRILAYLA compression, which is undone
//! transparently on extraction. All directory structures are `@UTF`
//! column tables, see [`utf`].
//!
//! # Example
//!
//! ```no_run
//! use nao_cri::CriArchive;
//!
//! let archive = CriArchive::open("movie.usm")?;
//! for entry in archive.entries() {
//!     println!("{}: {} bytes", entry.name, entry.extracted_size);
//! }
//!
//! let first = archive.extract_at(0)?;
//! # Ok::<(), nao_cri::Error>(())
//! ```

mod archive;
mod cpk;
pub mod crilayla;
mod error;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
mod usm;
pub mod utf;

pub use archive::CriArchive;
pub use cpk::{deobfuscate, PacketHeader, CPK_MAGIC};
pub use error::{Error, Result};
pub use usm::{ChunkHeader, CRID_MAGIC};
