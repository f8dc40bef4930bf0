//! Bounded chunk copying with progress reporting and cooperative cancellation.

use std::io::Write;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{Error, Result};

/// Default number of bytes written per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;

/// Receiver of `(current_bytes, total_bytes)` updates.
///
/// Called on whichever thread performs the copy.
pub trait Progress {
    fn update(&self, current: u64, total: u64);
}

impl<F: Fn(u64, u64)> Progress for F {
    #[inline]
    fn update(&self, current: u64, total: u64) {
        self(current, total)
    }
}

/// Discards all updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    #[inline]
    fn update(&self, _current: u64, _total: u64) {}
}

/// Shared flag checked between chunks of a copy.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Return [`Error::Cancelled`] once cancellation was requested.
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A sequential copy to a sink in chunks of at most `chunk_size` bytes.
///
/// Progress is emitted after every chunk; the cancel token is checked
/// before every chunk.
pub struct ChunkedCopy<'a> {
    chunk_size: usize,
    progress: &'a dyn Progress,
    cancel: &'a CancelToken,
}

impl<'a> ChunkedCopy<'a> {
    pub fn new(progress: &'a dyn Progress, cancel: &'a CancelToken) -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress,
            cancel,
        }
    }

    /// Override the chunk size. Zero is treated as one byte.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline]
    pub fn cancel_token(&self) -> &CancelToken {
        self.cancel
    }

    /// Copy a whole buffer.
    pub fn copy<W: Write + ?Sized>(&self, data: &[u8], sink: &mut W) -> Result<u64> {
        self.copy_spans(data, std::slice::from_ref(&(0..data.len())), sink)
    }

    /// Copy several regions of `source` back to back, reporting progress
    /// against their combined length.
    pub fn copy_spans<W: Write + ?Sized>(
        &self,
        source: &[u8],
        spans: &[Range<usize>],
        sink: &mut W,
    ) -> Result<u64> {
        let total: u64 = spans.iter().map(|s| s.len() as u64).sum();
        let mut written = 0u64;

        if total == 0 {
            self.cancel.check()?;
            self.progress.update(0, 0);
            return Ok(0);
        }

        for span in spans {
            let region = source.get(span.clone()).ok_or(Error::UnexpectedEof {
                needed: span.end,
                available: source.len(),
            })?;

            for chunk in region.chunks(self.chunk_size) {
                self.cancel.check()?;
                sink.write_all(chunk)?;
                written += chunk.len() as u64;
                self.progress.update(written, total);
            }
        }

        sink.flush()?;
        Ok(written)
    }
}
