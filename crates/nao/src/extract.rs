//! Single-entry and bulk extraction.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use nao_common::{CancelToken, ChunkedCopy, EmbeddedEntry, Progress, DEFAULT_CHUNK_SIZE};
use tracing::{debug, info, warn};

use crate::container::{Container, JobGuard};
use crate::naming::{container_dir, destinations, output_name};
use crate::progress::ExtractProgress;
use crate::{Error, Result};

/// What a bulk job does when an entry fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Record the failure in the summary and carry on.
    #[default]
    Continue,
    /// Stop at the first failure and return it.
    Abort,
}

/// Settings shared by single and bulk extraction.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Bytes written per chunk
    pub chunk_size: usize,
    pub on_error: ErrorPolicy,
    /// Replace existing output files instead of failing
    pub overwrite: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            on_error: ErrorPolicy::Continue,
            overwrite: false,
        }
    }
}

impl ExtractOptions {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_error_policy(mut self, on_error: ErrorPolicy) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

/// An entry a bulk job could not extract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub index: usize,
    pub path: String,
    pub error: String,
}

/// Outcome of a bulk job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSummary {
    /// Entries written successfully
    pub entries: usize,
    /// Embedded bytes of those entries
    pub bytes_read: u64,
    /// Extracted bytes written
    pub bytes_written: u64,
    pub failures: Vec<EntryFailure>,
}

impl BulkSummary {
    /// Whether every entry was extracted.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Adapts [`ExtractProgress::bytes`] to the copy callback.
struct EntryBytes<'a>(&'a dyn ExtractProgress);

impl Progress for EntryBytes<'_> {
    fn update(&self, current: u64, total: u64) {
        self.0.bytes(current, total);
    }
}

/// Reports per-entry bytes and the running job total.
struct BulkBytes<'a> {
    progress: &'a dyn ExtractProgress,
    done: u64,
    total: u64,
}

impl Progress for BulkBytes<'_> {
    fn update(&self, current: u64, total: u64) {
        self.progress.bytes(current, total);
        self.progress.total(self.done + current, self.total);
    }
}

fn open_output(path: &Path, overwrite: bool) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    options.open(path)
}

impl Container {
    fn check_extractable(&self, index: usize) -> Result<&EmbeddedEntry> {
        let entry = self.entry(index)?;
        if entry.embedded_size == 0 {
            return Err(Error::ZeroSizeEntry(entry.display_path()));
        }
        Ok(entry)
    }

    /// Extract one entry to `sink`.
    ///
    /// Zero-size entries are refused with [`Error::ZeroSizeEntry`] before
    /// anything is read.
    pub fn extract_entry<W: Write + ?Sized>(
        &self,
        index: usize,
        sink: &mut W,
        options: &ExtractOptions,
        progress: &dyn ExtractProgress,
        cancel: &CancelToken,
    ) -> Result<u64> {
        let entry = self.check_extractable(index)?;
        let job = self.begin_job()?;

        progress.entry_start(index, entry);
        let bytes = EntryBytes(progress);
        let copy = ChunkedCopy::new(&bytes, cancel).with_chunk_size(options.chunk_size);
        self.copy_entry(&job, index, sink, &copy)
    }

    /// Extract one entry into `dir` under its output name, returning the
    /// written path.
    pub fn extract_entry_to_dir(
        &self,
        index: usize,
        dir: &Path,
        options: &ExtractOptions,
        progress: &dyn ExtractProgress,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        let entry = self.check_extractable(index)?;
        let job = self.begin_job()?;

        let destination = dir.join(output_name(entry));
        progress.entry_start(index, entry);
        let bytes = EntryBytes(progress);
        let written = self.write_entry(&job, index, &destination, options, &bytes, cancel)?;

        debug!(path = %destination.display(), written, "extracted entry");
        Ok(destination)
    }

    /// Write one entry to `destination`, removing the file again if the
    /// copy fails part way.
    fn write_entry(
        &self,
        job: &JobGuard<'_>,
        index: usize,
        destination: &Path,
        options: &ExtractOptions,
        progress: &dyn Progress,
        cancel: &CancelToken,
    ) -> Result<u64> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = open_output(destination, options.overwrite)?;
        let mut writer = BufWriter::new(file);

        let copy = ChunkedCopy::new(progress, cancel).with_chunk_size(options.chunk_size);
        let result = self
            .copy_entry(job, index, &mut writer, &copy)
            .and_then(|written| {
                writer.flush()?;
                Ok(written)
            });

        if result.is_err() {
            drop(writer);
            if let Err(e) = fs::remove_file(destination) {
                warn!(path = %destination.display(), error = %e, "could not remove partial output");
            }
        }
        result
    }

    /// Extract every entry below `<root>/<container file name>`.
    ///
    /// Pack entries keep their internal directories, stream entries are
    /// written flat. Entries whose output paths collide are renamed with a
    /// numeric suffix so every entry lands in its own file. Per-entry failures follow `options.on_error`;
    /// cancellation always stops the job.
    pub fn extract_all(
        &self,
        root: &Path,
        options: &ExtractOptions,
        progress: &dyn ExtractProgress,
        cancel: &CancelToken,
    ) -> Result<BulkSummary> {
        let job = self.begin_job()?;
        let index = self.index();
        let (total_read, total_written) = index.totals();
        let base = container_dir(root, index);

        info!(
            container = %index.origin_path().display(),
            output = %base.display(),
            entries = index.len(),
            total_read,
            total_written,
            "starting bulk extraction"
        );

        let destinations = destinations(root, index);

        let directories: BTreeSet<&Path> = destinations.iter().filter_map(|p| p.parent()).collect();
        for directory in directories {
            fs::create_dir_all(directory)?;
        }

        progress.total(0, total_written);
        let mut summary = BulkSummary::default();

        for (i, (entry, destination)) in index.entries().iter().zip(&destinations).enumerate() {
            cancel.check()?;
            progress.entry_start(i, entry);

            let bytes = BulkBytes {
                progress,
                done: summary.bytes_written,
                total: total_written,
            };

            match self.write_entry(&job, i, destination, options, &bytes, cancel) {
                Ok(written) => {
                    summary.entries += 1;
                    summary.bytes_read += entry.embedded_size;
                    summary.bytes_written += written;
                }
                Err(Error::Cancelled) => {
                    info!(completed = summary.entries, "bulk extraction cancelled");
                    return Err(Error::Cancelled);
                }
                Err(error) => {
                    warn!(entry = %entry.display_path(), %error, "failed to extract entry");
                    progress.entry_failed(i, entry, &error);
                    if options.on_error == ErrorPolicy::Abort {
                        return Err(error);
                    }
                    summary.failures.push(EntryFailure {
                        index: i,
                        path: entry.display_path(),
                        error: error.to_string(),
                    });
                }
            }
        }

        info!(
            entries = summary.entries,
            failures = summary.failures.len(),
            bytes_read = summary.bytes_read,
            bytes_written = summary.bytes_written,
            "bulk extraction finished"
        );
        progress.completed(&summary);
        Ok(summary)
    }
}
