//! Shard enumeration and metadata decoding.
//!
//! Stage 1 of the pipeline. Discovers the per-shard metadata parquet files
//! under the input prefix and decodes them into [`ShardRecord`]s: one record
//! per image, carrying the record key plus whatever passthrough metadata
//! columns the shard schema declares (caption, source URL, ...).
//!
//! ## Failure semantics
//!
//! Enumeration errors are *fatal*, not per-item: an unreachable input
//! location or zero eligible shard files means the run is misconfigured, so
//! the whole run terminates with no output. This is deliberately different
//! from the per-image failures handled by [`crate::resolve`].
//!
//! ## Passthrough schema
//!
//! The passthrough schema is fixed by the first shard file. Later files may
//! omit columns (read as nulls) and any extra columns they carry are
//! ignored. Pre-resolution placeholder columns (`width`, `height`) and
//! internal hashes are dropped here — the resolver is the only source of
//! dimension data in the output.

use arrow::array::{Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array, LargeStringArray, StringArray};
use arrow::datatypes::DataType;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::errors::ParquetError;
use thiserror::Error;

use crate::store::{ObjectStore, StoreError};

/// File suffix identifying shard metadata files under the input prefix.
pub const SHARD_EXTENSION: &str = ".parquet";

/// Input columns that never pass through to the index: the placeholder
/// dimensions shipped with the shard metadata and internal content hashes.
const DROPPED_COLUMNS: &[&str] = &["width", "height", "hash", "original_width", "original_height"];

#[derive(Error, Debug)]
pub enum ShardError {
    #[error("input location unreachable: {source}")]
    Unreachable {
        #[source]
        source: StoreError,
    },
    #[error("no shard files ({SHARD_EXTENSION}) found under the input location")]
    NoShards,
    #[error("failed to read shard {path}: {source}")]
    Store {
        path: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to open shard {path}: {source}")]
    Parquet {
        path: String,
        #[source]
        source: ParquetError,
    },
    #[error("failed to decode shard {path}: {source}")]
    Arrow {
        path: String,
        #[source]
        source: ArrowError,
    },
    #[error("shard {path} is missing the key column '{column}'")]
    MissingKeyColumn { path: String, column: String },
    #[error("key column '{column}' in shard {path} is not a string column")]
    KeyColumnNotUtf8 { path: String, column: String },
    #[error("shard {path} contains a null key")]
    NullKey { path: String },
    #[error("column '{column}' in shard {path} has unsupported type {data_type}")]
    UnsupportedColumn {
        path: String,
        column: String,
        data_type: String,
    },
}

/// Logical type of a passthrough metadata column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Utf8,
    Int64,
    Float64,
    Bool,
}

/// One passthrough cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Utf8(String),
    Int64(i64),
    Float64(f64),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassthroughColumn {
    pub name: String,
    pub kind: ScalarKind,
}

/// Names and kinds of the metadata columns carried through to the index,
/// in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassthroughSchema {
    pub columns: Vec<PassthroughColumn>,
}

/// One row of shard metadata. `passthrough` is positional against the
/// [`PassthroughSchema`] returned alongside it.
#[derive(Debug, Clone)]
pub struct ShardRecord {
    pub image_id: String,
    pub passthrough: Vec<Scalar>,
}

/// Result of shard enumeration.
#[derive(Debug)]
pub struct EnumeratedShards {
    pub records: Vec<ShardRecord>,
    pub schema: PassthroughSchema,
    /// Number of shard files actually read.
    pub shard_files: usize,
}

/// Discover and decode all shard metadata under the store's input prefix.
///
/// Shard files are processed in sorted key order so enumeration is
/// deterministic. `max_items` caps the number of records; once reached, no
/// further shard files are opened.
pub fn enumerate(
    store: &dyn ObjectStore,
    key_column: &str,
    max_items: Option<usize>,
) -> Result<EnumeratedShards, ShardError> {
    let mut keys = store
        .list("")
        .map_err(|source| ShardError::Unreachable { source })?;
    // Shard files live at the top of the dataset; nested keys are the image
    // tree, so a stray nested .parquet is never a shard.
    keys.retain(|k| k.ends_with(SHARD_EXTENSION) && !k.contains('/'));
    keys.sort();
    if keys.is_empty() {
        return Err(ShardError::NoShards);
    }

    let mut schema: Option<PassthroughSchema> = None;
    let mut records: Vec<ShardRecord> = Vec::new();
    let mut shard_files = 0usize;

    'shards: for key in &keys {
        shard_files += 1;
        let bytes = Bytes::from(store.get(key).map_err(|source| ShardError::Store {
            path: key.clone(),
            source,
        })?);
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
            .and_then(|b| b.build())
            .map_err(|source| ShardError::Parquet {
                path: key.clone(),
                source,
            })?;

        for batch in reader {
            let batch = batch.map_err(|source| ShardError::Arrow {
                path: key.clone(),
                source,
            })?;
            if schema.is_none() {
                schema = Some(derive_schema(&batch, key, key_column)?);
            }
            if let Some(pass) = &schema {
                extract_records(&batch, key, key_column, pass, &mut records)?;
            }
            if let Some(max) = max_items
                && records.len() >= max
            {
                break 'shards;
            }
        }
    }

    if let Some(max) = max_items {
        records.truncate(max);
    }

    Ok(EnumeratedShards {
        records,
        schema: schema.unwrap_or_default(),
        shard_files,
    })
}

/// Build the passthrough schema from the first decoded batch: every column
/// except the key column and the dropped placeholders, in declaration order.
fn derive_schema(
    batch: &RecordBatch,
    path: &str,
    key_column: &str,
) -> Result<PassthroughSchema, ShardError> {
    let arrow_schema = batch.schema();
    let key_field = arrow_schema
        .fields()
        .iter()
        .find(|f| f.name() == key_column)
        .ok_or_else(|| ShardError::MissingKeyColumn {
            path: path.to_string(),
            column: key_column.to_string(),
        })?;
    if !matches!(key_field.data_type(), DataType::Utf8 | DataType::LargeUtf8) {
        return Err(ShardError::KeyColumnNotUtf8 {
            path: path.to_string(),
            column: key_column.to_string(),
        });
    }

    let mut columns = Vec::new();
    for field in arrow_schema.fields() {
        let name = field.name();
        if name == key_column || DROPPED_COLUMNS.contains(&name.as_str()) {
            continue;
        }
        let kind = match field.data_type() {
            DataType::Utf8 | DataType::LargeUtf8 => ScalarKind::Utf8,
            DataType::Int32 | DataType::Int64 => ScalarKind::Int64,
            DataType::Float32 | DataType::Float64 => ScalarKind::Float64,
            DataType::Boolean => ScalarKind::Bool,
            other => {
                return Err(ShardError::UnsupportedColumn {
                    path: path.to_string(),
                    column: name.clone(),
                    data_type: other.to_string(),
                });
            }
        };
        columns.push(PassthroughColumn {
            name: name.clone(),
            kind,
        });
    }
    Ok(PassthroughSchema { columns })
}

fn extract_records(
    batch: &RecordBatch,
    path: &str,
    key_column: &str,
    schema: &PassthroughSchema,
    records: &mut Vec<ShardRecord>,
) -> Result<(), ShardError> {
    let arrow_schema = batch.schema();
    let key_idx =
        arrow_schema
            .index_of(key_column)
            .map_err(|_| ShardError::MissingKeyColumn {
                path: path.to_string(),
                column: key_column.to_string(),
            })?;
    let key_array = batch.column(key_idx);

    // Column positions can differ between shard files; resolve by name once
    // per batch. Missing columns read as nulls.
    let positions: Vec<Option<usize>> = schema
        .columns
        .iter()
        .map(|c| arrow_schema.index_of(&c.name).ok())
        .collect();

    for row in 0..batch.num_rows() {
        let image_id = key_at(key_array, row).ok_or_else(|| match key_array.is_null(row) {
            true => ShardError::NullKey {
                path: path.to_string(),
            },
            false => ShardError::KeyColumnNotUtf8 {
                path: path.to_string(),
                column: key_column.to_string(),
            },
        })?;

        let mut passthrough = Vec::with_capacity(schema.columns.len());
        for (column, position) in schema.columns.iter().zip(&positions) {
            let value = match position {
                Some(idx) => scalar_at(batch.column(*idx), column.kind, row).ok_or_else(|| {
                    ShardError::UnsupportedColumn {
                        path: path.to_string(),
                        column: column.name.clone(),
                        data_type: batch.column(*idx).data_type().to_string(),
                    }
                })?,
                None => Scalar::Null,
            };
            passthrough.push(value);
        }
        records.push(ShardRecord {
            image_id,
            passthrough,
        });
    }
    Ok(())
}

fn key_at(array: &ArrayRef, row: usize) -> Option<String> {
    if array.is_null(row) {
        return None;
    }
    if let Some(a) = array.as_any().downcast_ref::<StringArray>() {
        return Some(a.value(row).to_string());
    }
    if let Some(a) = array.as_any().downcast_ref::<LargeStringArray>() {
        return Some(a.value(row).to_string());
    }
    None
}

/// Read one cell, coerced to the passthrough kind. Returns `None` when the
/// physical column type cannot represent the expected kind.
fn scalar_at(array: &ArrayRef, kind: ScalarKind, row: usize) -> Option<Scalar> {
    if array.is_null(row) {
        return Some(Scalar::Null);
    }
    let any = array.as_any();
    match kind {
        ScalarKind::Utf8 => {
            if let Some(a) = any.downcast_ref::<StringArray>() {
                Some(Scalar::Utf8(a.value(row).to_string()))
            } else {
                any.downcast_ref::<LargeStringArray>()
                    .map(|a| Scalar::Utf8(a.value(row).to_string()))
            }
        }
        ScalarKind::Int64 => {
            if let Some(a) = any.downcast_ref::<Int64Array>() {
                Some(Scalar::Int64(a.value(row)))
            } else {
                any.downcast_ref::<Int32Array>()
                    .map(|a| Scalar::Int64(i64::from(a.value(row))))
            }
        }
        ScalarKind::Float64 => {
            if let Some(a) = any.downcast_ref::<Float64Array>() {
                Some(Scalar::Float64(a.value(row)))
            } else {
                any.downcast_ref::<Float32Array>()
                    .map(|a| Scalar::Float64(f64::from(a.value(row))))
            }
        }
        ScalarKind::Bool => any
            .downcast_ref::<BooleanArray>()
            .map(|a| Scalar::Bool(a.value(row))),
    }
}
