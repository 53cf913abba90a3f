//! # Shard Index
//!
//! Aggregates the per-shard metadata of a large, sharded image dataset into
//! one global Arrow IPC (Feather) index table. Shard metadata ships as
//! parquet files that know everything about an image *except* its pixel
//! dimensions, so each record is enriched by fetching the image and decoding
//! just enough of it to read width and height.
//!
//! # Architecture: One Pass, Five Stages
//!
//! ```text
//! 1. Enumerate   input prefix     →  shard records        (parquet → rows)
//! 2. Resolve     image reference  →  (width, height)      (header-only decode)
//! 3. Pool        all references   →  unordered outcomes   (bounded workers)
//! 4. Aggregate   records+outcomes →  output records       (keyed join)
//! 5. Write       output records   →  index.feather        (atomic commit)
//! ```
//!
//! The stages are deliberately independent:
//!
//! - **Failure isolation**: a single unreadable image becomes a `failed` row,
//!   never an aborted run. Only configuration and write errors are fatal.
//! - **Order independence**: workers complete in any order; the join is
//!   keyed on `image_id`, so row order is explicitly not a guaranteed
//!   property of the output.
//! - **Testability**: every stage is a function over plain data plus an
//!   injected [`store::ObjectStore`], so the whole pipeline runs against an
//!   in-memory store in tests.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`store`] | Storage accessor trait (`list`/`get`/`put`) with local-filesystem and in-memory implementations |
//! | [`shards`] | Stage 1 — discovers shard parquet files and decodes them into records plus a passthrough schema |
//! | [`resolve`] | Stage 2 — fetches one image and reads its dimensions; all errors become a tagged `Failed` outcome |
//! | [`pool`] | Stage 3 — runs resolutions across a dedicated rayon pool bounded by `num_workers` |
//! | [`aggregate`] | Stage 4 — keyed join of shard records with resolver outcomes, path and aspect-ratio derivation |
//! | [`table`] | Output records → arrow `RecordBatch` with the public index schema |
//! | [`writer`] | Stage 5 — Arrow IPC serialization with write-then-rename (local) or upload-after-complete (remote) |
//! | [`config`] | Run configuration and fatal-configuration validation |
//! | [`pipeline`] | End-to-end orchestration returning a run summary |
//! | [`output`] | CLI output formatting — pure `format_*` functions |
//!
//! # Design Decisions
//!
//! ## Injected Storage, Never Ambient
//!
//! The core never reads credentials or endpoints implicitly. Callers
//! construct an [`store::ObjectStore`] (local directory, in-memory fake, or
//! a remote accessor) and hand it to [`pipeline::run`]. This is what makes
//! the pipeline deterministic under test.
//!
//! ## Tagged Outcomes Over Exceptions
//!
//! The dimension resolver is a total function: every fetch or decode failure
//! is converted into [`resolve::Resolution::Failed`] with a human-readable
//! reason. Nothing can escape a worker and abort the batch.
//!
//! ## Atomic Output
//!
//! The writer serializes the whole table before the destination is touched.
//! Locally that means a temp file in the destination directory followed by a
//! single rename; remotely it means one `put` of the finished bytes. A crash
//! mid-run leaves the previous output (if any) intact.

pub mod aggregate;
pub mod config;
pub mod output;
pub mod pipeline;
pub mod pool;
pub mod resolve;
pub mod shards;
pub mod store;
pub mod table;
pub mod writer;
