//! Dimension resolution for a single image reference.
//!
//! Stage 2 of the pipeline. Fetches one image object and decodes only its
//! header to obtain width and height — a full pixel decode is unnecessary
//! and wasteful at dataset scale.
//!
//! The key contract: [`dimensions`] is a *total* function. Every fetch or
//! decode error (missing object, timeout, corrupt bytes, unsupported
//! format) is converted into [`Resolution::Failed`] with a human-readable
//! reason, so a single bad image can never abort the batch or escape the
//! worker pool.

use image::ImageReader;
use std::io::Cursor;

use crate::store::ObjectStore;

/// Outcome of resolving one image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Both dimensions read successfully; guaranteed positive.
    Resolved { width: u32, height: u32 },
    /// Fetch or decode failed; `reason` is non-empty.
    Failed { reason: String },
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }
}

/// Fetch `path` from the store and read its dimensions from the image
/// header. The format is detected from the bytes, not the file extension.
pub fn dimensions(store: &dyn ObjectStore, path: &str) -> Resolution {
    let bytes = match store.get(path) {
        Ok(bytes) => bytes,
        // StoreError's Display carries "not found" / "timeout" markers that
        // operators grep for in the error_message column.
        Err(e) => {
            return Resolution::Failed {
                reason: e.to_string(),
            };
        }
    };

    let reader = match ImageReader::new(Cursor::new(&bytes)).with_guessed_format() {
        Ok(reader) => reader,
        Err(e) => {
            return Resolution::Failed {
                reason: format!("format detection failed for {path}: {e}"),
            };
        }
    };

    match reader.into_dimensions() {
        Ok((width, height)) if width > 0 && height > 0 => Resolution::Resolved { width, height },
        Ok((width, height)) => Resolution::Failed {
            reason: format!("decoded degenerate dimensions {width}x{height} for {path}"),
        },
        Err(e) => Resolution::Failed {
            reason: format!("decode failed for {path}: {e}"),
        },
    }
}
