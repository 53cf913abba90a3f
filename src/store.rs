//! Storage accessor trait and implementations.
//!
//! The [`ObjectStore`] trait is the pipeline's only view of the outside
//! world: `list` a prefix, `get` an object, `put` an object. Everything the
//! pipeline reads or writes goes through an injected implementation, so the
//! same code runs against a local dataset directory, an in-memory fake, or a
//! remote object store.
//!
//! Credentials, endpoints, and per-request deadlines are properties of the
//! accessor, fixed at construction. A remote accessor that enforces a
//! per-request deadline surfaces it as [`StoreError::Timeout`]; nothing in
//! the pipeline reads ambient configuration.
//!
//! Keys are `/`-separated paths relative to the store root, e.g.
//! `a1b2c/a1b2c3d4.jpg` or `part-00001.parquet`.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object not found: {path}")]
    NotFound { path: String },
    #[error("timeout fetching {path}")]
    Timeout { path: String },
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Minimal object-store capability the pipeline depends on.
///
/// `Send + Sync` because `get` is called concurrently from the worker pool.
pub trait ObjectStore: Send + Sync {
    /// List all object keys under a prefix. The order is unspecified;
    /// callers that need determinism must sort.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Fetch a whole object.
    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Store a whole object, replacing any previous content. Implementations
    /// must only make the new content observable once it is complete.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;
}

/// Local-filesystem store rooted at a directory.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ObjectStore for LocalStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let base = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.root.join(prefix)
        };
        if !base.exists() {
            return Err(StoreError::NotFound {
                path: base.display().to_string(),
            });
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&base) {
            let entry = entry.map_err(|e| StoreError::Io {
                path: base.display().to_string(),
                source: e.into(),
            })?;
            if entry.file_type().is_file() {
                let rel = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
                keys.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(key);
        std::fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound {
                path: key.to_string(),
            },
            _ => StoreError::Io {
                path: key.to_string(),
                source: e,
            },
        })
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: key.to_string(),
                source: e,
            })?;
        }
        std::fs::write(&path, bytes).map_err(|e| StoreError::Io {
            path: key.to_string(),
            source: e,
        })
    }
}

/// In-memory store for deterministic tests.
///
/// Records every `get` so tests can assert what the pipeline fetched, and
/// can simulate per-object timeouts and put failures. Uses Mutex (not
/// RefCell) so it is Sync and works under the rayon worker pool.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    timeouts: Mutex<HashSet<String>>,
    fail_puts: Mutex<bool>,
    gets: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, bytes: Vec<u8>) {
        lock(&self.objects).insert(key.to_string(), bytes);
    }

    /// Make `get(key)` fail with [`StoreError::Timeout`], as a remote
    /// accessor would after its per-request deadline.
    pub fn mark_timeout(&self, key: &str) {
        lock(&self.timeouts).insert(key.to_string());
    }

    /// Make every subsequent `put` fail, simulating a write-time outage.
    pub fn fail_puts(&self) {
        *lock(&self.fail_puts) = true;
    }

    /// All keys fetched via `get`, in call order.
    pub fn recorded_gets(&self) -> Vec<String> {
        lock(&self.gets).clone()
    }

    pub fn contents(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.objects).get(key).cloned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A panicked worker must not wedge every later assertion.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ObjectStore for MemoryStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(lock(&self.objects)
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        lock(&self.gets).push(key.to_string());
        if lock(&self.timeouts).contains(key) {
            return Err(StoreError::Timeout {
                path: key.to_string(),
            });
        }
        lock(&self.objects)
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                path: key.to_string(),
            })
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if *lock(&self.fail_puts) {
            return Err(StoreError::Io {
                path: key.to_string(),
                source: io::Error::other("simulated put failure"),
            });
        }
        lock(&self.objects).insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}
