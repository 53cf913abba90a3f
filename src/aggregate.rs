//! Keyed join of shard records with resolver outcomes.
//!
//! Stage 4 of the pipeline. Merges the enumerated [`ShardRecord`]s with the
//! unordered resolver outcomes into the final [`OutputRecord`] rows,
//! deriving `image_path` and `aspect_ratio` along the way.
//!
//! The join is outer-biased toward the shard metadata: every shard record
//! appears exactly once in the output, whatever the resolver said about its
//! image. Duplicate `image_id` values are a fatal configuration error —
//! they would silently corrupt a keyed index, so they are never deduplicated.
//!
//! This module is pure data transformation; it knows nothing about storage
//! or concurrency, which keeps the schema mapping auditable and testable on
//! its own.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::resolve::Resolution;
use crate::shards::{Scalar, ShardRecord};

#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("duplicate image_id in shard metadata: {0}")]
    DuplicateKey(String),
    #[error("no resolver outcome for image_id: {0}")]
    MissingResolution(String),
}

/// Row status in the final index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Failed => "failed",
        }
    }
}

/// One row of the final index table. Immutable once built; the writer only
/// serializes these.
#[derive(Debug, Clone)]
pub struct OutputRecord {
    pub image_id: String,
    pub image_path: String,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
    pub aspect_ratio: Option<f64>,
    pub status: Status,
    pub error_message: Option<String>,
    pub passthrough: Vec<Scalar>,
}

/// Relative path of an image within the dataset root:
/// `{shard prefix}/{image_id}{extension}`, where the shard prefix is the
/// first five characters of the id (the whole id when shorter).
pub fn image_path_for(image_id: &str, extension: &str) -> String {
    format!("{}/{image_id}{extension}", shard_prefix(image_id))
}

fn shard_prefix(image_id: &str) -> &str {
    match image_id.char_indices().nth(5) {
        Some((idx, _)) => &image_id[..idx],
        None => image_id,
    }
}

/// Join shard records with resolver outcomes into output rows.
///
/// Consumes both inputs; the output row order follows the record order, but
/// callers must not rely on it (the table is keyed on `image_id`).
pub fn join(
    records: Vec<ShardRecord>,
    resolutions: Vec<(String, Resolution)>,
    extension: &str,
) -> Result<Vec<OutputRecord>, AggregateError> {
    let mut by_id: HashMap<String, Resolution> = HashMap::with_capacity(resolutions.len());
    for (image_id, resolution) in resolutions {
        by_id.insert(image_id, resolution);
    }

    let mut output = Vec::with_capacity(records.len());
    let mut seen: HashSet<&str> = HashSet::with_capacity(records.len());

    for record in &records {
        if !seen.insert(record.image_id.as_str()) {
            return Err(AggregateError::DuplicateKey(record.image_id.clone()));
        }
        let resolution = by_id
            .remove(record.image_id.as_str())
            .ok_or_else(|| AggregateError::MissingResolution(record.image_id.clone()))?;

        let image_path = image_path_for(&record.image_id, extension);
        let row = match resolution {
            Resolution::Resolved { width, height } => {
                // height is positive by the resolver contract; the guard is
                // the aspect-ratio invariant, not defensive arithmetic.
                let aspect_ratio = if height > 0 {
                    Some(f64::from(width) / f64::from(height))
                } else {
                    None
                };
                OutputRecord {
                    image_id: record.image_id.clone(),
                    image_path,
                    image_width: Some(width),
                    image_height: Some(height),
                    aspect_ratio,
                    status: Status::Ok,
                    error_message: None,
                    passthrough: record.passthrough.clone(),
                }
            }
            Resolution::Failed { reason } => OutputRecord {
                image_id: record.image_id.clone(),
                image_path,
                image_width: None,
                image_height: None,
                aspect_ratio: None,
                status: Status::Failed,
                error_message: Some(reason),
                passthrough: record.passthrough.clone(),
            },
        };
        output.push(row);
    }

    Ok(output)
}
