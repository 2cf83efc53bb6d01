//! Command-line entry point for the duplicate finder.
//!
//! Parses arguments, sets up tracing, runs the pipeline and writes the
//! result. Exit code 0 means the scan completed (keep-going runs count
//! recorded errors as completed); 1 means an unrecovered error, including
//! argument errors.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::Level;

use find_duplicates::{Cli, DuplicateFinder, output};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version arrive here too; only real parse
            // failures are errors.
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    if let Err(e) = init_tracing(cli.trace.as_deref()) {
        eprintln!("find-duplicates: {e:#}");
        return ExitCode::from(1);
    }

    let finder = DuplicateFinder::new(cli.clone());
    let outcome = finder.run().await;

    let code = match outcome {
        Ok(groups) => match output::write_groups(&groups, cli.output_destination()).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("find-duplicates: {e}");
                ExitCode::from(1)
            }
        },
        Err(e) => {
            eprintln!("find-duplicates: {e}");
            ExitCode::from(1)
        }
    };

    // Counters are valid up to the abort point, so a failed run still
    // gets its report.
    if cli.statistics {
        output::write_statistics(&finder.stats().snapshot());
    }

    code
}

/// Default logging goes to stderr at WARN. With `--trace=FILE` every
/// TRACE-level event is written to the file instead, which records the
/// pipeline's execution (directory walks, per-file hashing, stage
/// shutdowns) for offline inspection.
fn init_tracing(trace: Option<&Path>) -> anyhow::Result<()> {
    match trace {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("cannot create trace file {}", path.display()))?;
            let file = Arc::new(file);
            tracing_subscriber::fmt()
                .with_max_level(Level::TRACE)
                .with_ansi(false)
                .with_target(false)
                .with_writer(move || Arc::clone(&file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_max_level(Level::WARN)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
