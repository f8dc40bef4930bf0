//! Common utilities for Nao.
//!
//! This crate provides the foundational types shared by every container reader:
//!
//! - [`BinaryReader`] - Zero-copy binary reading from byte slices (both endians)
//! - [`EmbeddedEntry`] / [`ContainerIndex`] - The parsed, immutable directory of a container
//! - [`ChunkedCopy`] - Bounded, progress-reporting, cancellable copies to a sink
//! - [`CancelToken`] / [`Progress`] - Cooperative cancellation and progress reporting

mod copy;
mod entry;
mod error;
mod reader;

pub use copy::{CancelToken, ChunkedCopy, NoProgress, Progress, DEFAULT_CHUNK_SIZE};
pub use entry::{ContainerIndex, EmbeddedEntry, StreamKind};
pub use error::{Error, Result};
pub use reader::BinaryReader;

/// Re-export zerocopy traits for convenience
pub use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Re-export memchr for SIMD-accelerated byte searching
pub use memchr;
