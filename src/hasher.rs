//! Content fingerprinting and the parallel hasher pool (stage 4), plus the
//! optional largest-first reordering that feeds it.

use std::collections::BinaryHeap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::trace;
use xxhash_rust::xxh3::Xxh3;

use crate::pipeline::ErrorSink;
use crate::stats::ScanStats;
use crate::{FileEntry, HashedFile, ScanError};

/// XXH3-128 of the empty input. Size-0 files are assigned this fingerprint
/// without ever being opened.
pub const EMPTY_FINGERPRINT: u128 = 0x99aa06d3014798d86001c324468d497f;

/// Read buffer for streaming a file through the fingerprinter.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Compute the 128-bit content fingerprint of one file.
///
/// The file is streamed through the hasher in a single pass and closed on
/// every exit path. `size` is the size reported at discovery; it is only
/// consulted for the empty-file shortcut, so a file that grew or shrank in
/// the meantime is fingerprinted over whatever is read.
pub async fn fingerprint_file(path: &Path, size: u64, stats: &ScanStats) -> io::Result<u128> {
    if size == 0 {
        return Ok(EMPTY_FINGERPRINT);
    }

    let mut file = fs::File::open(path).await?;
    stats.record_open();

    let mut hasher = Xxh3::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let bytes_read = file.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        stats.record_hashed(bytes_read as u64);
    }

    Ok(hasher.digest128())
}

/// Stage 4: fan entries out to fingerprint workers.
///
/// A dispatcher pulls from the input queue and spawns one task per file
/// under an owned semaphore permit, so at most `concurrency` files are open
/// at once. The output queue closes only after the last worker has
/// returned. Output order is unspecified.
pub(crate) async fn run_pool(
    mut input: mpsc::Receiver<FileEntry>,
    output: mpsc::Sender<HashedFile>,
    errors: ErrorSink,
    stats: Arc<ScanStats>,
    concurrency: usize,
) {
    let permits = Arc::new(Semaphore::new(concurrency));
    let mut workers = JoinSet::new();

    while let Some(entry) = input.recv().await {
        if errors.is_stopping() {
            break;
        }
        // Reap finished workers so the set stays small on long runs.
        while workers.try_join_next().is_some() {}

        let permit = match Arc::clone(&permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let output = output.clone();
        let errors = errors.clone();
        let stats = Arc::clone(&stats);

        workers.spawn(async move {
            let _permit = permit;
            match fingerprint_file(&entry.path, entry.size, &stats).await {
                Ok(fingerprint) => {
                    trace!("hashed {}", entry.path.display());
                    let _ = output
                        .send(HashedFile {
                            path: entry.path,
                            fingerprint,
                        })
                        .await;
                }
                Err(e) => {
                    // The entry is dropped; no placeholder fingerprint.
                    let _ = errors.report(ScanError::io(entry.path, e)).await;
                }
            }
        });
    }

    while workers.join_next().await.is_some() {}
}

/// Max-heap ordering by file size.
struct LargestFirst(FileEntry);

impl PartialEq for LargestFirst {
    fn eq(&self, other: &Self) -> bool {
        self.0.size == other.0.size
    }
}

impl Eq for LargestFirst {}

impl PartialOrd for LargestFirst {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LargestFirst {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.size.cmp(&other.0.size)
    }
}

/// Optional stage between the size filter and the pool: forward entries
/// roughly largest-first so a huge file on the tail cannot dominate the
/// total runtime.
///
/// The heap is capped at `max_buffer` entries to keep upstream backpressure
/// intact, which makes the ordering approximate under saturation.
pub(crate) async fn reorder_largest_first(
    mut input: mpsc::Receiver<FileEntry>,
    output: mpsc::Sender<FileEntry>,
    max_buffer: usize,
) {
    let max_buffer = max_buffer.max(1);
    let mut heap: BinaryHeap<LargestFirst> = BinaryHeap::new();
    let mut open = true;

    while open || !heap.is_empty() {
        if !open || heap.len() >= max_buffer {
            if let Some(LargestFirst(entry)) = heap.pop() {
                if output.send(entry).await.is_err() {
                    return;
                }
            }
        } else if heap.is_empty() {
            match input.recv().await {
                Some(entry) => heap.push(LargestFirst(entry)),
                None => open = false,
            }
        } else {
            tokio::select! {
                biased;
                received = input.recv() => match received {
                    Some(entry) => heap.push(LargestFirst(entry)),
                    None => open = false,
                },
                slot = output.reserve() => match slot {
                    Ok(slot) => {
                        if let Some(LargestFirst(entry)) = heap.pop() {
                            slot.send(entry);
                        }
                    }
                    Err(_) => return,
                },
            }
        }
    }
}
