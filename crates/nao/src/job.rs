//! Background extraction jobs.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use nao_common::CancelToken;
use tracing::debug;

use crate::container::Container;
use crate::extract::{BulkSummary, ExtractOptions};
use crate::progress::{ChannelProgress, JobEvent};
use crate::{Error, Result};

/// A job running on its own thread.
///
/// Dropping the handle detaches the thread; the job runs to completion.
#[derive(Debug)]
pub struct JobHandle<T> {
    events: Receiver<JobEvent>,
    cancel: CancelToken,
    thread: JoinHandle<Result<T>>,
}

impl<T> JobHandle<T> {
    /// Progress events published by the job.
    pub fn events(&self) -> &Receiver<JobEvent> {
        &self.events
    }

    /// Ask the job to stop after its current chunk.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the job and return its result.
    pub fn join(self) -> Result<T> {
        self.thread
            .join()
            .unwrap_or_else(|_| Err(Error::Io(std::io::Error::other("extraction thread panicked"))))
    }
}

/// Run `job` on a new thread, publishing progress through `channel`.
pub fn spawn_job<T, F>(channel: (ChannelProgress, Receiver<JobEvent>), job: F) -> JobHandle<T>
where
    T: Send + 'static,
    F: FnOnce(&ChannelProgress, &CancelToken) -> Result<T> + Send + 'static,
{
    let (progress, events) = channel;
    let cancel = CancelToken::new();
    let token = cancel.clone();

    let thread = std::thread::spawn(move || {
        let result = job(&progress, &token);
        debug!(ok = result.is_ok(), "background job finished");
        result
    });

    JobHandle {
        events,
        cancel,
        thread,
    }
}

/// Extract every entry of `container` below `root` in the background.
pub fn spawn_extract_all(
    container: Arc<Container>,
    root: PathBuf,
    options: ExtractOptions,
) -> JobHandle<BulkSummary> {
    spawn_job(ChannelProgress::unbounded(), move |progress, cancel| {
        container.extract_all(&root, &options, progress, cancel)
    })
}

/// Extract one entry into `dir` in the background.
pub fn spawn_extract_entry(
    container: Arc<Container>,
    index: usize,
    dir: PathBuf,
    options: ExtractOptions,
) -> JobHandle<PathBuf> {
    spawn_job(ChannelProgress::unbounded(), move |progress, cancel| {
        container.extract_entry_to_dir(index, &dir, &options, progress, cancel)
    })
}
