//! Run configuration and fatal-configuration validation.
//!
//! Everything here is a *fatal* concern: a bad value means the run is
//! misconfigured and must terminate before any output is produced. Per-item
//! failures are handled downstream by the resolver, never here.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Filename used when the output destination is a directory.
pub const DEFAULT_OUTPUT_FILENAME: &str = "global_index.feather";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("num_workers must be positive")]
    ZeroWorkers,
    #[error("max_items must be greater than zero")]
    ZeroMaxItems,
    #[error("output file {0} must have a .feather or .fth extension")]
    BadOutputExtension(String),
}

/// Where the finished index table goes.
#[derive(Debug, Clone)]
pub enum OutputTarget {
    /// A path on the local filesystem. Committed via temp file + rename.
    Local(PathBuf),
    /// A key written through the injected store. Committed via a single
    /// `put` of the fully serialized table.
    Remote(String),
}

/// Configuration for one index run.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Shard-metadata column holding the per-record key. Renamed to
    /// `image_id` in the output and used to derive `image_path`.
    pub key_column: String,
    /// Suffix appended when deriving `image_path`, dot included (".jpg").
    pub image_extension: String,
    /// Concurrency bound for the dimension-resolver pool.
    pub num_workers: usize,
    /// Optional cap on the number of records processed.
    pub max_items: Option<usize>,
    pub output: OutputTarget,
}

impl IndexConfig {
    /// Check the fatal-configuration invariants. Called by the pipeline
    /// before any storage access.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.max_items == Some(0) {
            return Err(ConfigError::ZeroMaxItems);
        }
        match &self.output {
            OutputTarget::Local(path) => check_feather_extension(path),
            OutputTarget::Remote(key) => check_feather_extension(Path::new(key)),
        }
    }
}

/// Resolve a user-supplied output path: an existing directory gets the
/// fixed default filename appended; anything else is used as-is.
pub fn resolve_output_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(DEFAULT_OUTPUT_FILENAME)
    } else {
        path.to_path_buf()
    }
}

fn check_feather_extension(path: &Path) -> Result<(), ConfigError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if ext == "feather" || ext == "fth" {
        Ok(())
    } else {
        Err(ConfigError::BadOutputExtension(path.display().to_string()))
    }
}
