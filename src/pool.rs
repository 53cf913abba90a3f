//! Bounded worker pool for dimension resolution.
//!
//! Stage 3 of the pipeline. Runs [`crate::resolve::dimensions`] for every
//! pending image reference on a dedicated rayon thread pool of exactly
//! `num_workers` threads. A dedicated pool (rather than the global one)
//! makes the concurrency bound a per-run property and keeps a worker stuck
//! in blocking I/O from stalling anything outside this pool.
//!
//! Results come back as an unordered `(image_id, Resolution)` multiset:
//! completion order is whatever the scheduler produced, and the downstream
//! join is keyed, not positional. The pool drains completely — every
//! submitted reference yields exactly one outcome, because the resolver is
//! total. There is no partial cancellation; callers wanting early
//! termination must layer it above this module.

use rayon::prelude::*;
use thiserror::Error;

use crate::resolve::{self, Resolution};
use crate::store::ObjectStore;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("worker count must be positive")]
    ZeroWorkers,
    #[error("failed to build worker pool: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),
}

/// One unit of pending work: which record it belongs to and where the
/// image bytes live.
#[derive(Debug, Clone)]
pub struct ImageRef {
    pub image_id: String,
    pub path: String,
}

/// Resolve every reference with at most `num_workers` concurrent fetches.
///
/// The returned vector is in no particular order.
pub fn resolve_all(
    store: &dyn ObjectStore,
    refs: &[ImageRef],
    num_workers: usize,
) -> Result<Vec<(String, Resolution)>, PoolError> {
    if num_workers == 0 {
        return Err(PoolError::ZeroWorkers);
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_workers)
        .build()?;

    Ok(pool.install(|| {
        refs.par_iter()
            .map(|r| (r.image_id.clone(), resolve::dimensions(store, &r.path)))
            .collect()
    }))
}
