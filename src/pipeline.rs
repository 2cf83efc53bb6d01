//! Pipeline assembly and supervision.
//!
//! [`DuplicateFinder`] wires the five stages together with bounded queues,
//! owns the error channel, and interprets the error handler's verdicts.
//! Queues close only by a stage dropping its last sender after all of its
//! producers have returned, so a late error can never trip a send to a
//! closed channel.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

use crate::aggregate::{self, DuplicateGroups};
use crate::filter;
use crate::hasher;
use crate::stats::ScanStats;
use crate::walker::{EntryFilter, WalkControl, Walker};
use crate::{Cli, ScanError};

/// What to do after an error has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Keep the pipeline running.
    Continue,
    /// Abort: the error becomes the run's result.
    Stop,
}

/// Callback invoked by the supervisor for every reported error.
pub type ErrorHandler = dyn Fn(&ScanError) -> ErrorAction + Send + Sync;

/// Stage-side handle to the error channel.
///
/// `report` tells the caller whether to carry on; once the run is stopping
/// (fail-fast tripped, or the supervisor went away) every answer is `Stop`.
#[derive(Clone)]
pub(crate) struct ErrorSink {
    tx: mpsc::Sender<ScanError>,
    stopping: Arc<AtomicBool>,
    keep_going: bool,
}

impl ErrorSink {
    pub(crate) fn new(
        tx: mpsc::Sender<ScanError>,
        stopping: Arc<AtomicBool>,
        keep_going: bool,
    ) -> Self {
        Self {
            tx,
            stopping,
            keep_going,
        }
    }

    pub(crate) async fn report(&self, error: ScanError) -> ErrorAction {
        if self.tx.send(error).await.is_err() {
            return ErrorAction::Stop;
        }
        if !self.keep_going {
            self.stopping.store(true, Ordering::Relaxed);
            return ErrorAction::Stop;
        }
        if self.stopping.load(Ordering::Relaxed) {
            ErrorAction::Stop
        } else {
            ErrorAction::Continue
        }
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Relaxed)
    }
}

/// The assembled duplicate-finding pipeline.
///
/// Construction is cheap; [`run`](DuplicateFinder::run) spawns the stages
/// and resolves once the aggregator and the supervisor have both finished.
/// Statistics stay readable after the run.
pub struct DuplicateFinder {
    config: Cli,
    stats: Arc<ScanStats>,
    error_handler: Option<Arc<ErrorHandler>>,
    entry_filter: Option<Arc<EntryFilter>>,
}

impl DuplicateFinder {
    pub fn new(config: Cli) -> Self {
        Self {
            config,
            stats: Arc::new(ScanStats::default()),
            error_handler: None,
            entry_filter: None,
        }
    }

    /// Replace the default error handler (stderr + mode-derived verdict).
    /// Returning [`ErrorAction::Stop`] aborts the run with that error.
    pub fn with_error_handler(
        mut self,
        handler: impl Fn(&ScanError) -> ErrorAction + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Install a per-entry walk hook; see [`WalkControl`].
    pub fn with_entry_filter(
        mut self,
        filter: impl Fn(&Path, &std::fs::FileType) -> WalkControl + Send + Sync + 'static,
    ) -> Self {
        self.entry_filter = Some(Arc::new(filter));
        self
    }

    /// The counters updated by the pipeline, also valid after a failed run.
    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Run the pipeline to completion and return the duplicate groups.
    pub async fn run(&self) -> Result<DuplicateGroups, ScanError> {
        if self.config.hasher_limit == Some(0) {
            return Err(ScanError::Argument(
                "--hasher-limit must be at least 1".into(),
            ));
        }
        if self.config.walker_limit == Some(0) {
            return Err(ScanError::Argument(
                "--walker-limit must be at least 1".into(),
            ));
        }

        let capacity = self.config.queue_capacity.max(1);
        let threshold = self.config.effective_threshold();
        let roots = self.config.roots();
        info!(
            "scanning {} root(s), threshold {}, queue capacity {}",
            roots.len(),
            threshold,
            capacity
        );

        let stopping = Arc::new(AtomicBool::new(false));
        let (error_tx, mut error_rx) = mpsc::channel(capacity);
        let sink = ErrorSink::new(error_tx, Arc::clone(&stopping), self.config.keep_going);

        let handler: Arc<ErrorHandler> = match &self.error_handler {
            Some(handler) => Arc::clone(handler),
            None if self.config.keep_going => Arc::new(|error: &ScanError| {
                eprintln!("find-duplicates: {error}");
                ErrorAction::Continue
            }),
            None => Arc::new(|_: &ScanError| ErrorAction::Stop),
        };

        // The supervisor owns the receiving end of the error channel. It
        // stops consuming on the first Stop verdict; stages find out
        // through the stopping flag or their next failed send.
        let supervisor: JoinHandle<Option<ScanError>> = {
            let stats = Arc::clone(&self.stats);
            let stopping = Arc::clone(&stopping);
            tokio::spawn(async move {
                let mut first_error = None;
                while let Some(error) = error_rx.recv().await {
                    stats.record_error();
                    match handler(&error) {
                        ErrorAction::Continue => {}
                        ErrorAction::Stop => {
                            stopping.store(true, Ordering::Relaxed);
                            first_error = Some(error);
                            break;
                        }
                    }
                }
                first_error
            })
        };

        let (walked_tx, walked_rx) = mpsc::channel(capacity);
        let (unique_tx, unique_rx) = mpsc::channel(capacity);
        let (sized_tx, sized_rx) = mpsc::channel(capacity);
        let (hashed_tx, hashed_rx) = mpsc::channel(capacity);

        let walker = Walker::new(
            walked_tx,
            sink.clone(),
            Arc::clone(&self.stats),
            self.config.walker_concurrency(),
            self.entry_filter.clone(),
        );
        let walk = tokio::spawn(walker.walk_roots(roots));
        let dedup = tokio::spawn(filter::drop_duplicate_paths(walked_rx, unique_tx));
        let size_filter = tokio::spawn(filter::filter_by_size(
            unique_rx,
            sized_tx,
            threshold,
            Arc::clone(&self.stats),
        ));

        let mut reorder: Option<JoinHandle<()>> = None;
        let hash_input = if self.config.largest_first {
            let (ordered_tx, ordered_rx) = mpsc::channel(capacity);
            reorder = Some(tokio::spawn(hasher::reorder_largest_first(
                sized_rx, ordered_tx, capacity,
            )));
            ordered_rx
        } else {
            sized_rx
        };

        let pool = tokio::spawn(hasher::run_pool(
            hash_input,
            hashed_tx,
            sink.clone(),
            Arc::clone(&self.stats),
            self.config.hasher_concurrency(),
        ));
        let aggregator = tokio::spawn(aggregate::collect_groups(hashed_rx, threshold));

        // The stages hold the only remaining sink clones; dropping ours
        // lets the error channel close once they are done.
        drop(sink);

        walk.await.map_err(task_failure)?;
        dedup.await.map_err(task_failure)?;
        size_filter.await.map_err(task_failure)?;
        if let Some(reorder) = reorder {
            reorder.await.map_err(task_failure)?;
        }
        pool.await.map_err(task_failure)?;
        let groups = aggregator.await.map_err(task_failure)?;
        let first_error = supervisor.await.map_err(task_failure)?;

        debug!("pipeline drained, {} group(s)", groups.len());
        match first_error {
            Some(error) => Err(error),
            None => Ok(groups),
        }
    }
}

fn task_failure(error: JoinError) -> ScanError {
    ScanError::Internal(format!("pipeline task failed: {error}"))
}
