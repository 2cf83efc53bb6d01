//! # find-duplicates
//!
//! A fast, concurrent duplicate file finder. One or more directory trees are
//! walked in parallel; regular files flow through a five-stage pipeline
//! (walk → dedup → size filter → hash → aggregate) connected by bounded
//! queues, and groups of byte-identical files come out keyed by a 128-bit
//! XXH3 content fingerprint.
//!
//! ## Features
//!
//! - **Concurrent traversal**: every subdirectory forks a new walk task
//! - **Bounded memory**: fixed-capacity queues give the pipeline backpressure
//! - **Cheap pruning**: files with a unique size are never opened
//! - **Streaming hashing**: a single pass per file, 64 KiB at a time
//! - **Two failure modes**: fail-fast or keep-going with an error sink
//!
//! ## Example
//!
//! ```rust,no_run
//! use find_duplicates::{Cli, DuplicateFinder};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), find_duplicates::ScanError> {
//!     let config = Cli {
//!         paths: vec![PathBuf::from("/data")],
//!         threshold: 2,
//!         ..Default::default()
//!     };
//!
//!     let finder = DuplicateFinder::new(config);
//!     let groups = finder.run().await?;
//!
//!     println!("found {} duplicate groups", groups.len());
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};

use clap::Parser;

pub mod aggregate;
pub mod filter;
pub mod hasher;
pub mod output;
pub mod pipeline;
pub mod stats;
pub mod walker;

pub use aggregate::DuplicateGroups;
pub use hasher::{EMPTY_FINGERPRINT, fingerprint_file};
pub use pipeline::{DuplicateFinder, ErrorAction};
pub use stats::{ScanStats, StatsReport};
pub use walker::WalkControl;

/// CLI interface - structure for parsing command line arguments
///
/// Doubles as the library configuration: `DuplicateFinder` takes it as-is,
/// so programmatic callers build one with `Default` and override fields.
#[derive(Parser, Debug, Clone)]
#[command(name = "find-duplicates")]
#[command(about = "Find groups of files with identical contents")]
#[command(version)]
#[command(long_about = "
find-duplicates recursively scans one or more directory trees and reports
groups of regular files whose byte contents are identical, as a JSON object
mapping content fingerprints to sorted path lists.

Examples:
  find-duplicates ~/Documents
  find-duplicates -n 3 -s /mnt/photos /mnt/backup
  find-duplicates --keep-going -o dupes.json /srv
")]
pub struct Cli {
    /// Root directories to scan (defaults to the current directory)
    #[arg(value_name = "PATH")]
    pub paths: Vec<PathBuf>,

    /// Minimum number of identical files for a group to be reported
    #[arg(short = 'n', long, default_value_t = 2, allow_negative_numbers = true)]
    #[arg(help = "Minimum group size to report")]
    pub threshold: i64,

    /// Record file and directory errors instead of aborting on the first one
    #[arg(short = 'k', long)]
    #[arg(help = "Do not abort on file or directory errors")]
    pub keep_going: bool,

    /// Write the statistics object to standard error when the run ends
    #[arg(short = 's', long)]
    #[arg(help = "Print statistics to standard error")]
    pub statistics: bool,

    /// Write the result JSON to FILE; "-" or an empty value means stdout
    #[arg(short = 'o', long, value_name = "FILE")]
    #[arg(help = "Output file path (\"-\" for standard output)")]
    pub output: Option<PathBuf>,

    /// Write a TRACE-level execution log to FILE
    #[arg(long, value_name = "FILE")]
    #[arg(help = "Execution trace file")]
    pub trace: Option<PathBuf>,

    /// Cap on concurrently running hashers (0 is rejected)
    #[arg(long, value_name = "N")]
    #[arg(help = "Concurrent hasher limit (defaults to the core count)")]
    pub hasher_limit: Option<usize>,

    /// Cap on concurrently running directory walks (0 is rejected)
    #[arg(long, value_name = "N")]
    #[arg(help = "Concurrent walker limit (defaults to a multiple of the core count)")]
    pub walker_limit: Option<usize>,

    /// Hash larger files before smaller ones
    #[arg(long)]
    #[arg(help = "Hash larger files first")]
    pub largest_first: bool,

    /// Capacity of the queues connecting pipeline stages
    #[arg(long, default_value_t = 1024, value_name = "N")]
    #[arg(help = "Inter-stage queue capacity")]
    pub queue_capacity: usize,
}

/// Default implementation for Cli - useful for testing and programmatic usage
impl Default for Cli {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            threshold: 2,
            keep_going: false,
            statistics: false,
            output: None,
            trace: None,
            hasher_limit: None,
            walker_limit: None,
            largest_first: false,
            queue_capacity: 1024,
        }
    }
}

impl Cli {
    /// The group-size threshold with non-positive values normalized to 1.
    pub fn effective_threshold(&self) -> usize {
        self.threshold.max(1) as usize
    }

    /// Root directories to walk; the current directory when none were given.
    pub fn roots(&self) -> Vec<PathBuf> {
        if self.paths.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            self.paths.clone()
        }
    }

    /// Concurrent hasher cap; defaults to the number of hardware threads.
    pub fn hasher_concurrency(&self) -> usize {
        self.hasher_limit.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Concurrent walk cap. The default is a high multiple of the core count:
    /// walks are IO-bound, but an uncapped recursive fan-out can exhaust the
    /// runtime on filesystems with huge directory fanout.
    pub fn walker_concurrency(&self) -> usize {
        self.walker_limit
            .unwrap_or_else(|| num_cpus::get() * 16)
            .max(1)
    }

    /// Where the result JSON goes; `None` means standard output.
    pub fn output_destination(&self) -> Option<&Path> {
        self.output
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty() && *path != Path::new("-"))
    }
}

/// A regular file as discovered by the walker: its path and the size
/// reported at discovery time (not re-checked at hash time).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
}

/// A file together with its 128-bit content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedFile {
    pub path: PathBuf,
    pub fingerprint: u128,
}

/// Application custom errors
///
/// The three error kinds the pipeline distinguishes; everything the
/// operating system reports becomes `Io` with the offending path attached.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// An OS error from walking, stat, open, read or write
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An invalid flag combination or option value
    #[error("invalid argument: {0}")]
    Argument(String),

    /// A violated pipeline invariant (should be unreachable)
    #[error("internal error: {0}")]
    Internal(String),
}

impl ScanError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScanError::Io {
            path: path.into(),
            source,
        }
    }
}
