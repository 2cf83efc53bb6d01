//! Process-wide scan counters and the serializable statistics report.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// A single counter in its own cache line, so that hot counters updated by
/// different workers never share one.
#[derive(Debug, Default)]
#[repr(align(64))]
struct Counter(AtomicU64);

impl Counter {
    fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Monotonic counters updated by every pipeline stage while a scan runs.
///
/// All updates are relaxed atomics; a consistent view is only guaranteed
/// once the pipeline has shut down, which is when [`ScanStats::snapshot`]
/// is meant to be called.
#[derive(Debug, Default)]
pub struct ScanStats {
    errors: Counter,
    dir_entries: Counter,
    files: Counter,
    files_opened: Counter,
    total_bytes: Counter,
    bytes_hashed: Counter,
    unique_sizes: Counter,
}

impl ScanStats {
    /// One recoverable or fatal error observed by the supervisor.
    pub fn record_error(&self) {
        self.errors.add(1);
    }

    /// One entry returned by a directory listing (of any file type).
    pub fn record_dir_entry(&self) {
        self.dir_entries.add(1);
    }

    /// One regular file discovered, with the size reported at discovery.
    pub fn record_file(&self, size: u64) {
        self.files.add(1);
        self.total_bytes.add(size);
    }

    /// One successful `open` by the hasher pool.
    pub fn record_open(&self) {
        self.files_opened.add(1);
    }

    /// Bytes actually read and fed to the fingerprinter.
    pub fn record_hashed(&self, bytes: u64) {
        self.bytes_hashed.add(bytes);
    }

    /// Final count of distinct file sizes, recorded once by the size filter.
    pub fn record_unique_sizes(&self, count: u64) {
        self.unique_sizes.add(count);
    }

    /// Current counter values plus the derived percentages.
    pub fn snapshot(&self) -> StatsReport {
        let files = self.files.get();
        let files_opened = self.files_opened.get();
        let total_bytes = self.total_bytes.get();
        let bytes_hashed = self.bytes_hashed.get();

        StatsReport {
            errors: self.errors.get(),
            dir_entries: self.dir_entries.get(),
            files,
            files_opened,
            files_opened_percent: percent(files_opened, files),
            total_bytes,
            bytes_hashed,
            bytes_hashed_percent: percent(bytes_hashed, total_bytes),
            unique_sizes: self.unique_sizes.get(),
        }
    }
}

/// Point-in-time statistics, serialized to stderr under `--statistics`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub errors: u64,
    pub dir_entries: u64,
    pub files: u64,
    pub files_opened: u64,
    pub files_opened_percent: f64,
    pub total_bytes: u64,
    pub bytes_hashed: u64,
    pub bytes_hashed_percent: f64,
    pub unique_sizes: u64,
}

// The max(1, d) guard keeps an empty scan from dividing by zero.
fn percent(numerator: u64, denominator: u64) -> f64 {
    100.0 * numerator as f64 / denominator.max(1) as f64
}
