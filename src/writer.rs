//! Atomic persistence of the index table.
//!
//! Stage 5 of the pipeline. Serializes the finished `RecordBatch` to an
//! Arrow IPC (Feather) file such that no observer ever sees a partial table
//! at the final destination:
//!
//! - **Local**: the table is written to a `NamedTempFile` in the destination
//!   directory, fsynced, and committed with a single atomic rename. Any
//!   failure before the rename drops the temp file and leaves the
//!   destination untouched (absent, or holding its previous content).
//! - **Remote**: the table is fully serialized into memory first; the store
//!   sees exactly one `put` of the complete bytes.
//!
//! After the commit, the table is read back and its row count compared
//! against what was written — a serialization bug must fail the run loudly,
//! not ship a short index.

use arrow::error::ArrowError;
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::config::OutputTarget;
use crate::store::{ObjectStore, StoreError};

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization failed: {0}")]
    Arrow(#[from] ArrowError),
    #[error("store write failed: {0}")]
    Store(#[from] StoreError),
    #[error("commit failed: {0}")]
    Commit(String),
    #[error("row count mismatch after write: wrote {expected}, read back {actual}")]
    RowCount { expected: usize, actual: usize },
}

/// Persist the batch to the target, atomically, then verify the readback
/// row count.
pub fn write_ipc(
    store: &dyn ObjectStore,
    batch: &RecordBatch,
    target: &OutputTarget,
) -> Result<(), WriteError> {
    match target {
        OutputTarget::Local(path) => write_local(batch, path),
        OutputTarget::Remote(key) => write_remote(store, batch, key),
    }
}

fn write_local(batch: &RecordBatch, dest: &Path) -> Result<(), WriteError> {
    let parent = parent_dir(dest);
    std::fs::create_dir_all(&parent)?;

    // Temp file in the destination directory so the final rename never
    // crosses a filesystem boundary.
    let mut tmp = NamedTempFile::new_in(&parent)?;
    {
        let mut writer = FileWriter::try_new(tmp.as_file_mut(), batch.schema().as_ref())?;
        writer.write(batch)?;
        writer.finish()?;
    }
    tmp.as_file().sync_all()?;

    // The single atomic step. On failure the temp file (returned inside the
    // error) is dropped and unlinked; the destination is untouched.
    tmp.persist(dest)
        .map_err(|e| WriteError::Commit(e.error.to_string()))?;

    let written = read_row_count(File::open(dest)?)?;
    verify_row_count(batch.num_rows(), written)
}

fn write_remote(
    store: &dyn ObjectStore,
    batch: &RecordBatch,
    key: &str,
) -> Result<(), WriteError> {
    let bytes = encode_ipc(batch)?;
    store.put(key, &bytes)?;

    let readback = store.get(key)?;
    let written = read_row_count(Cursor::new(readback))?;
    verify_row_count(batch.num_rows(), written)
}

/// Serialize a batch into a complete in-memory IPC file.
pub fn encode_ipc(batch: &RecordBatch) -> Result<Vec<u8>, ArrowError> {
    let mut writer = FileWriter::try_new(Vec::new(), batch.schema().as_ref())?;
    writer.write(batch)?;
    writer.finish()?;
    writer.into_inner()
}

/// Total row count of an IPC file.
pub fn read_row_count<R: Read + Seek>(reader: R) -> Result<usize, ArrowError> {
    let reader = FileReader::try_new(reader, None)?;
    let mut rows = 0;
    for batch in reader {
        rows += batch?.num_rows();
    }
    Ok(rows)
}

fn verify_row_count(expected: usize, actual: usize) -> Result<(), WriteError> {
    if expected == actual {
        Ok(())
    } else {
        Err(WriteError::RowCount { expected, actual })
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn sample_batch(n: i64) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("image_id", DataType::Utf8, false),
            Field::new("image_width", DataType::Int64, true),
        ]));
        let ids: Vec<String> = (0..n).map(|i| format!("id{i}")).collect();
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from_iter_values(ids.iter().map(String::as_str))),
                Arc::new(Int64Array::from((0..n).map(Some).collect::<Vec<_>>())),
            ],
        )
        .unwrap()
    }

    #[test]
    fn local_write_commits_and_verifies() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("index.feather");
        let store = MemoryStore::new();

        write_ipc(&store, &sample_batch(3), &OutputTarget::Local(dest.clone())).unwrap();

        assert_eq!(read_row_count(File::open(&dest).unwrap()).unwrap(), 3);
    }

    #[test]
    fn local_write_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("index.feather");
        let store = MemoryStore::new();

        write_ipc(&store, &sample_batch(2), &OutputTarget::Local(dest)).unwrap();

        let entries: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["index.feather".to_string()]);
    }

    #[test]
    fn local_write_creates_missing_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("deep/nested/index.feather");
        let store = MemoryStore::new();

        write_ipc(&store, &sample_batch(1), &OutputTarget::Local(dest.clone())).unwrap();
        assert!(dest.exists());
    }

    #[test]
    fn local_write_replaces_previous_output() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("index.feather");
        let store = MemoryStore::new();

        write_ipc(&store, &sample_batch(5), &OutputTarget::Local(dest.clone())).unwrap();
        write_ipc(&store, &sample_batch(2), &OutputTarget::Local(dest.clone())).unwrap();

        assert_eq!(read_row_count(File::open(&dest).unwrap()).unwrap(), 2);
    }

    #[test]
    fn failed_commit_keeps_previous_content_and_cleans_temp() {
        let tmp = TempDir::new().unwrap();
        // The destination is an existing directory, so the rename step must
        // fail after the temp file was written.
        let dest = tmp.path().join("index.feather");
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(dest.join("previous"), b"old").unwrap();
        let store = MemoryStore::new();

        let result = write_ipc(&store, &sample_batch(4), &OutputTarget::Local(dest.clone()));
        assert!(matches!(result, Err(WriteError::Commit(_))));

        // Previous content intact, no stray temp file alongside it.
        assert_eq!(std::fs::read(dest.join("previous")).unwrap(), b"old");
        let leftovers = std::fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn remote_write_is_single_put_of_complete_bytes() {
        let store = MemoryStore::new();
        write_ipc(
            &store,
            &sample_batch(3),
            &OutputTarget::Remote("indexes/global.feather".to_string()),
        )
        .unwrap();

        let bytes = store.contents("indexes/global.feather").unwrap();
        assert_eq!(read_row_count(Cursor::new(bytes)).unwrap(), 3);
    }

    #[test]
    fn remote_write_failure_leaves_previous_object() {
        let store = MemoryStore::new();
        let key = "indexes/global.feather";
        let previous = encode_ipc(&sample_batch(7)).unwrap();
        store.insert(key, previous.clone());
        store.fail_puts();

        let result = write_ipc(
            &store,
            &sample_batch(1),
            &OutputTarget::Remote(key.to_string()),
        );
        assert!(matches!(result, Err(WriteError::Store(_))));
        assert_eq!(store.contents(key).unwrap(), previous);
    }

    #[test]
    fn encode_then_read_row_count_roundtrips() {
        let bytes = encode_ipc(&sample_batch(9)).unwrap();
        assert_eq!(read_row_count(Cursor::new(bytes)).unwrap(), 9);
    }
}
