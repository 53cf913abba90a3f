//! End-to-end pipeline tests against an in-memory store.
//!
//! These exercise the full enumerate → resolve → aggregate → write path and
//! the run-level guarantees: row-count conservation, per-row invariants,
//! concurrency invariance, idempotence, and fatal-error behavior.

use arrow::array::{Array, Float64Array, Int64Array, StringArray};
use arrow::ipc::reader::FileReader;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use shard_index::config::{IndexConfig, OutputTarget};
use shard_index::pipeline::{self, IndexError};
use shard_index::store::MemoryStore;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

// =========================================================================
// Fixture helpers
// =========================================================================

/// Shard parquet bytes in the pd12m layout: key + caption + placeholder
/// width/height + hash.
fn shard_bytes(keys: &[&str]) -> Vec<u8> {
    use arrow::datatypes::{DataType, Field, Schema};

    let schema = Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("caption", DataType::Utf8, true),
        Field::new("width", DataType::Int64, true),
        Field::new("height", DataType::Int64, true),
        Field::new("hash", DataType::Utf8, true),
    ]));
    let n = keys.len();
    let captions: Vec<String> = keys.iter().map(|k| format!("caption-{k}")).collect();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(keys.to_vec())),
            Arc::new(StringArray::from_iter_values(
                captions.iter().map(String::as_str),
            )),
            Arc::new(Int64Array::from(vec![Some(0); n])),
            Arc::new(Int64Array::from(vec![Some(0); n])),
            Arc::new(StringArray::from(vec![Some("cafe"); n])),
        ],
    )
    .unwrap();

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
    buf
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 100, 50]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// Image key for an id under the five-char shard-prefix layout.
fn image_key(id: &str) -> String {
    let prefix: String = id.chars().take(5).collect();
    format!("{prefix}/{id}.jpg")
}

fn config(output: OutputTarget, num_workers: usize) -> IndexConfig {
    IndexConfig {
        key_column: "key".to_string(),
        image_extension: ".jpg".to_string(),
        num_workers,
        max_items: None,
        output,
    }
}

/// One decoded output row, keyed for order-independent comparison.
/// The ratio is kept as bits so idempotence can assert exact equality.
#[derive(Debug, PartialEq, Eq, Clone)]
struct Row {
    image_path: String,
    width: Option<i64>,
    height: Option<i64>,
    ratio_bits: Option<u64>,
    status: String,
    error: Option<String>,
    caption: Option<String>,
}

fn rows_from_batch(batch: &RecordBatch) -> BTreeMap<String, Row> {
    let col_str = |name: &str| -> &StringArray {
        batch
            .column_by_name(name)
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap()
    };
    let col_i64 = |name: &str| -> &Int64Array {
        batch
            .column_by_name(name)
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
    };
    let ids = col_str("image_id");
    let paths = col_str("image_path");
    let widths = col_i64("image_width");
    let heights = col_i64("image_height");
    let ratios = batch
        .column_by_name("aspect_ratio")
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    let statuses = col_str("status");
    let errors = col_str("error_message");
    let captions = col_str("caption");

    let opt_str = |a: &StringArray, i: usize| (!a.is_null(i)).then(|| a.value(i).to_string());
    let opt_i64 = |a: &Int64Array, i: usize| (!a.is_null(i)).then(|| a.value(i));

    (0..batch.num_rows())
        .map(|i| {
            (
                ids.value(i).to_string(),
                Row {
                    image_path: paths.value(i).to_string(),
                    width: opt_i64(widths, i),
                    height: opt_i64(heights, i),
                    ratio_bits: (!ratios.is_null(i)).then(|| ratios.value(i).to_bits()),
                    status: statuses.value(i).to_string(),
                    error: opt_str(errors, i),
                    caption: opt_str(captions, i),
                },
            )
        })
        .collect()
}

fn read_feather(path: &Path) -> BTreeMap<String, Row> {
    let reader = FileReader::try_new(File::open(path).unwrap(), None).unwrap();
    let mut rows = BTreeMap::new();
    for batch in reader {
        rows.extend(rows_from_batch(&batch.unwrap()));
    }
    rows
}

// =========================================================================
// The a1 / a2 / b1 scenario
// =========================================================================

fn scenario_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert("part-0.parquet", shard_bytes(&["a1", "a2", "b1"]));
    store.insert(&image_key("a1"), png_bytes(100, 50));
    // a2's object is deliberately missing
    store.insert(&image_key("b1"), png_bytes(200, 200));
    store
}

#[test]
fn scenario_missing_image_becomes_failed_row() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("index.feather");
    let store = scenario_store();

    let summary = pipeline::run(&store, &config(OutputTarget::Local(dest.clone()), 4)).unwrap();
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.ok, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.shard_files, 1);

    let rows = read_feather(&dest);
    assert_eq!(rows.len(), 3);

    let a1 = &rows["a1"];
    assert_eq!(a1.status, "ok");
    assert_eq!((a1.width, a1.height), (Some(100), Some(50)));
    assert_eq!(a1.ratio_bits, Some(2.0f64.to_bits()));
    assert_eq!(a1.image_path, "a1/a1.jpg");
    assert_eq!(a1.caption.as_deref(), Some("caption-a1"));

    let a2 = &rows["a2"];
    assert_eq!(a2.status, "failed");
    assert_eq!((a2.width, a2.height, a2.ratio_bits), (None, None, None));
    assert!(a2.error.as_deref().unwrap().contains("not found"));

    let b1 = &rows["b1"];
    assert_eq!(b1.status, "ok");
    assert_eq!(b1.ratio_bits, Some(1.0f64.to_bits()));
}

#[test]
fn timeout_recorded_as_failed_with_timeout_reason() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("index.feather");
    let store = scenario_store();
    store.mark_timeout(&image_key("b1"));

    pipeline::run(&store, &config(OutputTarget::Local(dest.clone()), 2)).unwrap();

    let rows = read_feather(&dest);
    let b1 = &rows["b1"];
    assert_eq!(b1.status, "failed");
    assert!(b1.error.as_deref().unwrap().contains("timeout"));
}

// =========================================================================
// Run-level properties
// =========================================================================

#[test]
fn row_count_equals_enumerated_records() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("index.feather");

    let ids: Vec<String> = (0..40).map(|i| format!("img{i:04}x")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let store = MemoryStore::new();
    store.insert("part-0.parquet", shard_bytes(&id_refs[..25]));
    store.insert("part-1.parquet", shard_bytes(&id_refs[25..]));
    // Only every other image exists, and one is corrupt.
    for (i, id) in ids.iter().enumerate() {
        if i % 2 == 0 {
            store.insert(&image_key(id), png_bytes(10 + i as u32, 10));
        }
    }
    store.insert(&image_key(&ids[0]), b"corrupt".to_vec());

    let summary = pipeline::run(&store, &config(OutputTarget::Local(dest.clone()), 8)).unwrap();
    assert_eq!(summary.rows, 40);
    assert_eq!(summary.ok + summary.failed, 40);

    let rows = read_feather(&dest);
    assert_eq!(rows.len(), 40);
    for (id, row) in &rows {
        match row.status.as_str() {
            "ok" => {
                assert!(row.width.unwrap() > 0, "{id}");
                assert!(row.height.unwrap() > 0, "{id}");
                let ratio = f64::from_bits(row.ratio_bits.unwrap());
                let expected = row.width.unwrap() as f64 / row.height.unwrap() as f64;
                assert!((ratio - expected).abs() < 1e-9, "{id}");
                assert!(row.error.is_none(), "{id}");
            }
            "failed" => {
                assert!(row.width.is_none() && row.height.is_none(), "{id}");
                assert!(row.ratio_bits.is_none(), "{id}");
                assert!(!row.error.as_deref().unwrap().is_empty(), "{id}");
            }
            other => panic!("unexpected status {other} for {id}"),
        }
    }
}

#[test]
fn result_set_invariant_under_num_workers() {
    let ids: Vec<String> = (0..16).map(|i| format!("wrk{i:03}ab")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

    let run_with = |workers: usize| -> BTreeMap<String, Row> {
        let store = MemoryStore::new();
        store.insert("part-0.parquet", shard_bytes(&id_refs));
        for (i, id) in ids.iter().enumerate() {
            if i != 7 {
                store.insert(&image_key(id), png_bytes(64, 16 + i as u32));
            }
        }
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("index.feather");
        pipeline::run(&store, &config(OutputTarget::Local(dest.clone()), workers)).unwrap();
        read_feather(&dest)
    };

    let canonical = run_with(1);
    for workers in [4, 64] {
        assert_eq!(run_with(workers), canonical, "num_workers = {workers}");
    }
}

#[test]
fn rerunning_unchanged_input_is_idempotent_modulo_order() {
    let store = scenario_store();
    let tmp = TempDir::new().unwrap();
    let first = tmp.path().join("first.feather");
    let second = tmp.path().join("second.feather");

    pipeline::run(&store, &config(OutputTarget::Local(first.clone()), 3)).unwrap();
    pipeline::run(&store, &config(OutputTarget::Local(second.clone()), 3)).unwrap();

    assert_eq!(read_feather(&first), read_feather(&second));
}

#[test]
fn max_items_caps_the_index() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("index.feather");
    let store = scenario_store();

    let mut cfg = config(OutputTarget::Local(dest.clone()), 2);
    cfg.max_items = Some(2);
    let summary = pipeline::run(&store, &cfg).unwrap();

    assert_eq!(summary.rows, 2);
    assert_eq!(read_feather(&dest).len(), 2);
}

#[test]
fn remote_output_written_through_the_store() {
    let store = scenario_store();
    let key = "indexes/global.feather";

    let summary = pipeline::run(&store, &config(OutputTarget::Remote(key.to_string()), 2)).unwrap();
    assert_eq!(summary.rows, 3);

    let bytes = store.contents(key).unwrap();
    let reader = FileReader::try_new(Cursor::new(bytes), None).unwrap();
    let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
    assert_eq!(rows, 3);
}

// =========================================================================
// Fatal errors produce no output
// =========================================================================

#[test]
fn zero_workers_is_fatal_and_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("index.feather");
    let store = scenario_store();

    let result = pipeline::run(&store, &config(OutputTarget::Local(dest.clone()), 0));
    assert!(matches!(result, Err(IndexError::Config(_))));
    assert!(!dest.exists());
}

#[test]
fn zero_shards_is_fatal_and_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("index.feather");
    let store = MemoryStore::new();
    store.insert("images-only/x.jpg", png_bytes(4, 4));

    let result = pipeline::run(&store, &config(OutputTarget::Local(dest.clone()), 2));
    assert!(matches!(result, Err(IndexError::Shards(_))));
    assert!(!dest.exists());
}

#[test]
fn duplicate_keys_are_fatal_and_write_nothing() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("index.feather");
    let store = MemoryStore::new();
    store.insert("part-0.parquet", shard_bytes(&["dup", "dup"]));
    store.insert(&image_key("dup"), png_bytes(2, 2));

    let result = pipeline::run(&store, &config(OutputTarget::Local(dest.clone()), 2));
    assert!(matches!(result, Err(IndexError::Aggregate(_))));
    assert!(!dest.exists());
}

#[test]
fn write_failure_leaves_previous_remote_index_intact() {
    let store = scenario_store();
    let key = "indexes/global.feather";

    pipeline::run(&store, &config(OutputTarget::Remote(key.to_string()), 2)).unwrap();
    let previous = store.contents(key).unwrap();

    store.fail_puts();
    let result = pipeline::run(&store, &config(OutputTarget::Remote(key.to_string()), 2));
    assert!(matches!(result, Err(IndexError::Write(_))));
    assert_eq!(store.contents(key).unwrap(), previous);
}
