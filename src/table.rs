//! Conversion of output records into an arrow `RecordBatch`.
//!
//! The public index schema, in column order:
//!
//! | Column | Type | Nullable |
//! |--------|------|----------|
//! | `image_id` | Utf8 | no |
//! | `image_path` | Utf8 | no |
//! | `image_width` | Int64 | yes |
//! | `image_height` | Int64 | yes |
//! | `aspect_ratio` | Float64 | yes |
//! | `status` | Utf8 | no |
//! | `error_message` | Utf8 | yes |
//! | passthrough columns | per shard schema | yes |
//!
//! Dimensions are Int64 rather than UInt32 so downstream Arrow consumers
//! read the same types the dataset's original metadata used.

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

use crate::aggregate::OutputRecord;
use crate::shards::{PassthroughSchema, Scalar, ScalarKind};

/// Build the index `RecordBatch` from aggregated records.
pub fn to_record_batch(
    records: &[OutputRecord],
    passthrough: &PassthroughSchema,
) -> Result<RecordBatch, ArrowError> {
    let mut fields = vec![
        Field::new("image_id", DataType::Utf8, false),
        Field::new("image_path", DataType::Utf8, false),
        Field::new("image_width", DataType::Int64, true),
        Field::new("image_height", DataType::Int64, true),
        Field::new("aspect_ratio", DataType::Float64, true),
        Field::new("status", DataType::Utf8, false),
        Field::new("error_message", DataType::Utf8, true),
    ];
    for column in &passthrough.columns {
        let data_type = match column.kind {
            ScalarKind::Utf8 => DataType::Utf8,
            ScalarKind::Int64 => DataType::Int64,
            ScalarKind::Float64 => DataType::Float64,
            ScalarKind::Bool => DataType::Boolean,
        };
        fields.push(Field::new(&column.name, data_type, true));
    }

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.image_id.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.image_path.as_str()),
        )),
        Arc::new(Int64Array::from(
            records
                .iter()
                .map(|r| r.image_width.map(i64::from))
                .collect::<Vec<_>>(),
        )),
        Arc::new(Int64Array::from(
            records
                .iter()
                .map(|r| r.image_height.map(i64::from))
                .collect::<Vec<_>>(),
        )),
        Arc::new(Float64Array::from(
            records.iter().map(|r| r.aspect_ratio).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.status.as_str()),
        )),
        Arc::new(StringArray::from(
            records
                .iter()
                .map(|r| r.error_message.as_deref())
                .collect::<Vec<_>>(),
        )),
    ];
    for (position, column) in passthrough.columns.iter().enumerate() {
        columns.push(passthrough_array(records, position, column.kind));
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
}

fn passthrough_array(records: &[OutputRecord], position: usize, kind: ScalarKind) -> ArrayRef {
    match kind {
        ScalarKind::Utf8 => Arc::new(StringArray::from(
            records
                .iter()
                .map(|r| match r.passthrough.get(position) {
                    Some(Scalar::Utf8(s)) => Some(s.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ScalarKind::Int64 => Arc::new(Int64Array::from(
            records
                .iter()
                .map(|r| match r.passthrough.get(position) {
                    Some(Scalar::Int64(v)) => Some(*v),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ScalarKind::Float64 => Arc::new(Float64Array::from(
            records
                .iter()
                .map(|r| match r.passthrough.get(position) {
                    Some(Scalar::Float64(v)) => Some(*v),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ScalarKind::Bool => Arc::new(BooleanArray::from(
            records
                .iter()
                .map(|r| match r.passthrough.get(position) {
                    Some(Scalar::Bool(v)) => Some(*v),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
    }
}
