//! JSON writers for the result map and the statistics report.

use std::io::Write;
use std::path::Path;

use tokio::fs;
use tracing::error;

use crate::ScanError;
use crate::aggregate::DuplicateGroups;
use crate::stats::StatsReport;

/// Write the result object to `destination`, or to standard output when
/// `destination` is `None`. The object is compact JSON with a trailing
/// newline; an empty result is `{}`.
pub async fn write_groups(
    groups: &DuplicateGroups,
    destination: Option<&Path>,
) -> Result<(), ScanError> {
    let mut json = serde_json::to_string(groups)
        .map_err(|e| ScanError::Internal(format!("cannot serialize result: {e}")))?;
    json.push('\n');

    match destination {
        Some(path) => fs::write(path, json)
            .await
            .map_err(|e| ScanError::io(path, e)),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(json.as_bytes())
                .and_then(|_| stdout.flush())
                .map_err(|e| ScanError::io("-", e))
        }
    }
}

/// Write the statistics object to standard error.
pub fn write_statistics(report: &StatsReport) {
    match serde_json::to_string(report) {
        Ok(json) => eprintln!("{json}"),
        Err(e) => error!("cannot serialize statistics: {e}"),
    }
}
