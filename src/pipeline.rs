//! End-to-end orchestration of the index build.
//!
//! Wires the stages together: enumerate → resolve (pooled) → aggregate →
//! serialize → write. Fatal errors from any stage abort the run before the
//! destination is touched; per-image failures surface only as `failed` rows
//! counted in the [`RunSummary`].

use arrow::error::ArrowError;
use thiserror::Error;

use crate::aggregate::{self, AggregateError, Status};
use crate::config::{ConfigError, IndexConfig};
use crate::pool::{self, ImageRef, PoolError};
use crate::shards::{self, ShardError};
use crate::store::ObjectStore;
use crate::table;
use crate::writer::{self, WriteError};

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("enumeration error: {0}")]
    Shards(#[from] ShardError),
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("aggregation error: {0}")]
    Aggregate(#[from] AggregateError),
    #[error("table construction error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("write error: {0}")]
    Write(#[from] WriteError),
}

/// Counts reported after a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub rows: usize,
    pub ok: usize,
    pub failed: usize,
    pub shard_files: usize,
}

/// Build the global index: read every shard under the store's root, resolve
/// each image's dimensions through the worker pool, and atomically write the
/// combined table to the configured target.
pub fn run(store: &dyn ObjectStore, config: &IndexConfig) -> Result<RunSummary, IndexError> {
    config.validate()?;

    let shards = shards::enumerate(store, &config.key_column, config.max_items)?;

    let refs: Vec<ImageRef> = shards
        .records
        .iter()
        .map(|r| ImageRef {
            image_id: r.image_id.clone(),
            path: aggregate::image_path_for(&r.image_id, &config.image_extension),
        })
        .collect();

    let resolutions = pool::resolve_all(store, &refs, config.num_workers)?;
    let records = aggregate::join(shards.records, resolutions, &config.image_extension)?;

    let ok = records
        .iter()
        .filter(|r| matches!(r.status, Status::Ok))
        .count();

    let batch = table::to_record_batch(&records, &shards.schema)?;
    writer::write_ipc(store, &batch, &config.output)?;

    Ok(RunSummary {
        rows: records.len(),
        ok,
        failed: records.len() - ok,
        shard_files: shards.shard_files,
    })
}
