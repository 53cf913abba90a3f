//! CLI output formatting.
//!
//! Successful runs report their counts so operators can tell "the run broke"
//! (a fatal error and non-zero exit) apart from "some images were
//! unreadable" (failed rows in a committed index).
//!
//! `format_*` functions are pure (return `Vec<String>`, no I/O) for
//! testability; `print_*` wrappers write to stdout.

use crate::pipeline::RunSummary;

/// Format the end-of-run report.
pub fn format_run_summary(summary: &RunSummary, destination: &str) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Shards: {} parquet file{}",
            summary.shard_files,
            plural(summary.shard_files)
        ),
        format!(
            "Rows: {} ({} ok, {} failed)",
            summary.rows, summary.ok, summary.failed
        ),
    ];
    lines.push(format!("Index written to {destination}"));
    lines
}

pub fn print_run_summary(summary: &RunSummary, destination: &str) {
    for line in format_run_summary(summary, destination) {
        println!("{line}");
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}
