//! The two cheap pruning stages: exact path/size dedup and the size-class
//! filter that keeps unique-size files from ever being opened.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::FileEntry;
use crate::stats::ScanStats;

/// Stage 2: forward each exact (path, size) pair once.
///
/// Overlapping roots make the walker report the same file repeatedly; a
/// repeat would both waste a hashing pass and inflate its group with a
/// phantom copy. The seen-set only ever grows.
pub(crate) async fn drop_duplicate_paths(
    mut input: mpsc::Receiver<FileEntry>,
    output: mpsc::Sender<FileEntry>,
) {
    let mut seen: HashSet<FileEntry> = HashSet::new();
    while let Some(entry) = input.recv().await {
        if seen.contains(&entry) {
            continue;
        }
        seen.insert(entry.clone());
        if output.send(entry).await.is_err() {
            return;
        }
    }
    debug!("dedup stage done, {} distinct entries", seen.len());
}

/// Per-size bucket state. Entries buffer until the bucket proves it can
/// contain a duplicate group, then ownership moves downstream for good.
enum Bucket {
    Pending(Vec<FileEntry>),
    Released,
}

/// Stage 3: forward only entries whose size class holds at least
/// `threshold` files.
///
/// The first `threshold` entries of a size buffer in arrival order; the
/// entry that completes the quorum flushes them all, and every later entry
/// of that size passes straight through.
pub(crate) async fn filter_by_size(
    mut input: mpsc::Receiver<FileEntry>,
    output: mpsc::Sender<FileEntry>,
    threshold: usize,
    stats: Arc<ScanStats>,
) {
    let mut buckets: HashMap<u64, Bucket> = HashMap::new();

    'recv: while let Some(entry) = input.recv().await {
        let size = entry.size;
        let ready = match buckets.get_mut(&size) {
            Some(Bucket::Released) => Some(vec![entry]),
            Some(Bucket::Pending(pending)) => {
                pending.push(entry);
                if pending.len() >= threshold {
                    Some(std::mem::take(pending))
                } else {
                    None
                }
            }
            None => {
                if threshold <= 1 {
                    Some(vec![entry])
                } else {
                    buckets.insert(size, Bucket::Pending(vec![entry]));
                    None
                }
            }
        };

        if let Some(batch) = ready {
            buckets.insert(size, Bucket::Released);
            for entry in batch {
                if output.send(entry).await.is_err() {
                    break 'recv;
                }
            }
        }
    }

    stats.record_unique_sizes(buckets.len() as u64);
    debug!("size filter done, {} distinct sizes", buckets.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn entry(path: &str, size: u64) -> FileEntry {
        FileEntry {
            path: PathBuf::from(path),
            size,
        }
    }

    async fn run_dedup(input: Vec<FileEntry>) -> Vec<FileEntry> {
        let (in_tx, in_rx) = mpsc::channel(64);
        let (out_tx, mut out_rx) = mpsc::channel(64);
        for e in input {
            in_tx.send(e).await.expect("send");
        }
        drop(in_tx);
        drop_duplicate_paths(in_rx, out_tx).await;

        let mut forwarded = Vec::new();
        while let Ok(e) = out_rx.try_recv() {
            forwarded.push(e);
        }
        forwarded
    }

    async fn run_size_filter(input: Vec<FileEntry>, threshold: usize) -> (Vec<FileEntry>, u64) {
        let stats = Arc::new(ScanStats::default());
        let (in_tx, in_rx) = mpsc::channel(64);
        let (out_tx, mut out_rx) = mpsc::channel(64);
        for e in input {
            in_tx.send(e).await.expect("send");
        }
        drop(in_tx);
        filter_by_size(in_rx, out_tx, threshold, Arc::clone(&stats)).await;

        let mut forwarded = Vec::new();
        while let Ok(e) = out_rx.try_recv() {
            forwarded.push(e);
        }
        (forwarded, stats.snapshot().unique_sizes)
    }

    #[tokio::test]
    async fn test_dedup_drops_repeats() {
        let forwarded = run_dedup(vec![
            entry("a", 1),
            entry("b", 1),
            entry("a", 1),
            entry("a", 1),
        ])
        .await;
        assert_eq!(forwarded, vec![entry("a", 1), entry("b", 1)]);
    }

    #[tokio::test]
    async fn test_dedup_keys_on_path_and_size() {
        // The same path with a different reported size is a new observation.
        let forwarded = run_dedup(vec![entry("a", 1), entry("a", 2)]).await;
        assert_eq!(forwarded, vec![entry("a", 1), entry("a", 2)]);
    }

    #[tokio::test]
    async fn test_size_filter_releases_on_quorum_in_arrival_order() {
        let (forwarded, unique_sizes) = run_size_filter(
            vec![
                entry("a", 1),
                entry("odd", 2),
                entry("b", 1),
                entry("c", 1),
            ],
            2,
        )
        .await;

        // The bucket for size 1 flushes in arrival order once "b" completes
        // the quorum; "c" passes straight through; "odd" never leaves.
        assert_eq!(forwarded, vec![entry("a", 1), entry("b", 1), entry("c", 1)]);
        assert_eq!(unique_sizes, 2);
    }

    #[tokio::test]
    async fn test_size_filter_holds_unique_sizes_back() {
        let (forwarded, unique_sizes) =
            run_size_filter(vec![entry("a", 10), entry("b", 20)], 2).await;
        assert!(forwarded.is_empty());
        assert_eq!(unique_sizes, 2);
    }

    #[tokio::test]
    async fn test_size_filter_threshold_one_releases_everything() {
        let (forwarded, _) = run_size_filter(vec![entry("a", 10), entry("b", 20)], 1).await;
        assert_eq!(forwarded, vec![entry("a", 10), entry("b", 20)]);
    }

    #[tokio::test]
    async fn test_size_filter_large_threshold() {
        let input: Vec<FileEntry> = (0..5).map(|i| entry(&format!("f{i}"), 7)).collect();
        let (forwarded, _) = run_size_filter(input.clone(), 3).await;
        // All five share one size; the first three flush together, the
        // remaining two follow immediately, order preserved throughout.
        assert_eq!(forwarded, input);
    }
}
