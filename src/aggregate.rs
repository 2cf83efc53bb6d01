//! Final grouping: fingerprint → sorted path list, thresholded.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::debug;

use crate::HashedFile;

/// The scan result: 32-character lowercase hex fingerprints mapped to the
/// byte-lexicographically sorted paths sharing that content. Iteration
/// order of the map itself carries no meaning.
pub type DuplicateGroups = HashMap<String, Vec<String>>;

/// Stage 5: collect hashed files until the upstream closes, then emit the
/// groups that reach the threshold.
pub(crate) async fn collect_groups(
    mut input: mpsc::Receiver<HashedFile>,
    threshold: usize,
) -> DuplicateGroups {
    let mut by_fingerprint: HashMap<u128, Vec<PathBuf>> = HashMap::new();
    while let Some(hashed) = input.recv().await {
        by_fingerprint
            .entry(hashed.fingerprint)
            .or_default()
            .push(hashed.path);
    }
    debug!("aggregated {} distinct fingerprints", by_fingerprint.len());

    by_fingerprint
        .into_iter()
        .filter(|(_, paths)| paths.len() >= threshold)
        .map(|(fingerprint, paths)| {
            let mut paths: Vec<String> = paths
                .iter()
                .map(|path| path.to_string_lossy().into_owned())
                .collect();
            paths.sort_unstable();
            // Hex encoding of the u128 is big-endian: high half first.
            (format!("{fingerprint:032x}"), paths)
        })
        .collect()
}
