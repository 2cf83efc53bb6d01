//! Concurrent directory traversal: the first pipeline stage.
//!
//! Every root starts a walk task; every subdirectory forks another one.
//! Directory listings run under a semaphore permit so the fan-out stays
//! bounded no matter how wide the tree is, while the permit is released
//! before child walks are awaited so deep trees cannot deadlock the cap.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tokio::fs;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::trace;

use crate::pipeline::{ErrorAction, ErrorSink};
use crate::stats::ScanStats;
use crate::{FileEntry, ScanError};

/// Decision returned by an [`EntryFilter`] for each directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    /// Process the entry normally.
    Continue,
    /// Abandon the entry's subtree (for a file, skip just the file).
    SkipDir,
    /// Stop iterating the current directory immediately.
    SkipAll,
}

/// Hook consulted for every directory entry before it is processed.
pub type EntryFilter = dyn Fn(&Path, &std::fs::FileType) -> WalkControl + Send + Sync;

pub(crate) struct Walker {
    entries: mpsc::Sender<FileEntry>,
    errors: ErrorSink,
    stats: Arc<ScanStats>,
    limit: Arc<Semaphore>,
    filter: Option<Arc<EntryFilter>>,
}

impl Walker {
    pub(crate) fn new(
        entries: mpsc::Sender<FileEntry>,
        errors: ErrorSink,
        stats: Arc<ScanStats>,
        concurrency: usize,
        filter: Option<Arc<EntryFilter>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            entries,
            errors,
            stats,
            limit: Arc::new(Semaphore::new(concurrency)),
            filter,
        })
    }

    /// Walk every root to completion. The output queue closes once the last
    /// forked walk task has returned and dropped its sender clone.
    pub(crate) async fn walk_roots(self: Arc<Self>, roots: Vec<PathBuf>) {
        let mut walks = JoinSet::new();
        for root in roots {
            walks.spawn(Arc::clone(&self).walk_dir(root));
        }
        drop(self);
        while walks.join_next().await.is_some() {}
    }

    /// Walk a single directory, forking a task per subdirectory.
    ///
    /// Recursive async functions need an explicitly boxed future.
    fn walk_dir(self: Arc<Self>, dir: PathBuf) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            if self.errors.is_stopping() {
                return;
            }
            trace!("walking {}", dir.display());

            let mut children: Vec<JoinHandle<()>> = Vec::new();
            {
                // The permit covers only the listing of this directory;
                // child walks acquire their own.
                let _permit = match self.limit.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                let mut listing = match fs::read_dir(&dir).await {
                    Ok(listing) => listing,
                    Err(e) => {
                        let _ = self.errors.report(ScanError::io(dir, e)).await;
                        return;
                    }
                };

                'entries: loop {
                    let entry = match listing.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break,
                        Err(e) => {
                            // The listing itself failed; entries already
                            // seen still proceed.
                            let _ = self.errors.report(ScanError::io(&dir, e)).await;
                            break;
                        }
                    };
                    self.stats.record_dir_entry();

                    let path = entry.path();
                    let file_type = match entry.file_type().await {
                        Ok(file_type) => file_type,
                        Err(e) => match self.errors.report(ScanError::io(path, e)).await {
                            ErrorAction::Continue => continue,
                            ErrorAction::Stop => return,
                        },
                    };

                    if let Some(filter) = &self.filter {
                        match filter(&path, &file_type) {
                            WalkControl::Continue => {}
                            WalkControl::SkipDir => continue,
                            WalkControl::SkipAll => break 'entries,
                        }
                    }

                    if file_type.is_dir() {
                        children.push(tokio::spawn(Arc::clone(&self).walk_dir(path)));
                    } else if file_type.is_file() {
                        let size = match entry.metadata().await {
                            Ok(metadata) => metadata.len(),
                            Err(e) => match self.errors.report(ScanError::io(path, e)).await {
                                ErrorAction::Continue => continue,
                                ErrorAction::Stop => return,
                            },
                        };
                        self.stats.record_file(size);
                        if self.entries.send(FileEntry { path, size }).await.is_err() {
                            // Downstream closed; stop producing.
                            break 'entries;
                        }
                    }
                    // Symlinks, sockets, devices and pipes are not regular
                    // files; they are skipped silently.
                }
            }

            for child in children {
                let _ = child.await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::keep_going_sink;
    use std::collections::HashSet;
    use tempfile::tempdir;

    async fn collect_walk(
        roots: Vec<PathBuf>,
        filter: Option<Arc<EntryFilter>>,
    ) -> (Vec<FileEntry>, Arc<ScanStats>, Vec<ScanError>) {
        let stats = Arc::new(ScanStats::default());
        let (entry_tx, mut entry_rx) = mpsc::channel(256);
        let (sink, mut error_rx) = keep_going_sink(16);

        let walker = Walker::new(entry_tx, sink, Arc::clone(&stats), 8, filter);
        let walk = tokio::spawn(walker.walk_roots(roots));

        let mut entries = Vec::new();
        while let Some(entry) = entry_rx.recv().await {
            entries.push(entry);
        }
        walk.await.expect("walk task");

        let mut errors = Vec::new();
        while let Ok(error) = error_rx.try_recv() {
            errors.push(error);
        }
        (entries, stats, errors)
    }

    #[tokio::test]
    async fn test_finds_regular_files_recursively() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("alpha"), b"one").expect("write");
        std::fs::create_dir(dir.path().join("sub")).expect("mkdir");
        std::fs::write(dir.path().join("sub").join("beta"), b"seven").expect("write");

        let (entries, stats, errors) = collect_walk(vec![dir.path().to_path_buf()], None).await;

        let found: HashSet<_> = entries.iter().map(|e| e.path.clone()).collect();
        assert!(found.contains(&dir.path().join("alpha")));
        assert!(found.contains(&dir.path().join("sub").join("beta")));
        assert_eq!(entries.len(), 2);
        assert!(errors.is_empty());

        let report = stats.snapshot();
        assert_eq!(report.files, 2);
        assert_eq!(report.total_bytes, 8);
        // alpha, sub and sub/beta were all listed.
        assert_eq!(report.dir_entries, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_skips_symlinks() {
        let dir = tempdir().expect("tempdir");
        let target = dir.path().join("real");
        std::fs::write(&target, b"data").expect("write");
        std::os::unix::fs::symlink(&target, dir.path().join("link")).expect("symlink");

        let (entries, _, errors) = collect_walk(vec![dir.path().to_path_buf()], None).await;

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, target);
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_root_reports_error() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("missing");

        let (entries, _, errors) = collect_walk(vec![missing.clone()], None).await;

        assert!(entries.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], ScanError::Io { path, .. } if *path == missing));
    }

    #[tokio::test]
    async fn test_skip_dir_abandons_subtree() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("keep.txt"), b"x").expect("write");
        std::fs::create_dir(dir.path().join("skipme")).expect("mkdir");
        std::fs::write(dir.path().join("skipme").join("hidden"), b"y").expect("write");

        let filter: Arc<EntryFilter> = Arc::new(|path, _| {
            if path.file_name().is_some_and(|name| name == "skipme") {
                WalkControl::SkipDir
            } else {
                WalkControl::Continue
            }
        });
        let (entries, _, _) = collect_walk(vec![dir.path().to_path_buf()], Some(filter)).await;

        assert_eq!(entries.len(), 1);
        assert!(entries[0].path.ends_with("keep.txt"));
    }

    #[tokio::test]
    async fn test_skip_all_ends_directory() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("sub")).expect("mkdir");
        std::fs::write(dir.path().join("sub").join("inside"), b"z").expect("write");

        // The root holds a single entry, so skipping "all" there is
        // deterministic regardless of listing order.
        let filter: Arc<EntryFilter> = Arc::new(|_, _| WalkControl::SkipAll);
        let (entries, stats, _) = collect_walk(vec![dir.path().to_path_buf()], Some(filter)).await;

        assert!(entries.is_empty());
        assert_eq!(stats.snapshot().dir_entries, 1);
    }
}
