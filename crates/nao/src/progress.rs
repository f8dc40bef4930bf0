//! Progress sinks for extraction jobs.

use crossbeam_channel::{Receiver, Sender};
use nao_common::EmbeddedEntry;

use crate::extract::BulkSummary;
use crate::Error;

/// Receives extraction progress.
///
/// Every method has a no-op default. Methods are called on the thread
/// running the job.
pub trait ExtractProgress: Send + Sync {
    /// An entry is about to be extracted.
    fn entry_start(&self, _index: usize, _entry: &EmbeddedEntry) {}

    /// Bytes written for the current entry.
    fn bytes(&self, _current: u64, _total: u64) {}

    /// Bytes written across the whole bulk job.
    fn total(&self, _current: u64, _total: u64) {}

    /// An entry failed and the job moved on.
    fn entry_failed(&self, _index: usize, _entry: &EmbeddedEntry, _error: &Error) {}

    /// A bulk job finished.
    fn completed(&self, _summary: &BulkSummary) {}
}

/// Discards all updates.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl ExtractProgress for SilentProgress {}

/// Progress as a message, for pull-based consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    EntryStarted { index: usize, name: String },
    Bytes { current: u64, total: u64 },
    Total { current: u64, total: u64 },
    EntryFailed { index: usize, name: String, error: String },
    Completed(BulkSummary),
}

/// Publishes [`JobEvent`]s on a channel.
///
/// Sends never fail the job: once the receiver is gone, events are dropped.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    sender: Sender<JobEvent>,
}

impl ChannelProgress {
    pub fn new(sender: Sender<JobEvent>) -> Self {
        Self { sender }
    }

    pub fn unbounded() -> (Self, Receiver<JobEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self::new(sender), receiver)
    }

    /// A channel holding at most `capacity` events; the job blocks while
    /// it is full. Zero makes every send a rendezvous.
    pub fn bounded(capacity: usize) -> (Self, Receiver<JobEvent>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        (Self::new(sender), receiver)
    }

    fn send(&self, event: JobEvent) {
        self.sender.send(event).ok();
    }
}

impl ExtractProgress for ChannelProgress {
    fn entry_start(&self, index: usize, entry: &EmbeddedEntry) {
        self.send(JobEvent::EntryStarted {
            index,
            name: entry.display_path(),
        });
    }

    fn bytes(&self, current: u64, total: u64) {
        self.send(JobEvent::Bytes { current, total });
    }

    fn total(&self, current: u64, total: u64) {
        self.send(JobEvent::Total { current, total });
    }

    fn entry_failed(&self, index: usize, entry: &EmbeddedEntry, error: &Error) {
        self.send(JobEvent::EntryFailed {
            index,
            name: entry.display_path(),
            error: error.to_string(),
        });
    }

    fn completed(&self, summary: &BulkSummary) {
        self.send(JobEvent::Completed(summary.clone()));
    }
}
