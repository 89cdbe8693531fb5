//! Progress-callback trait for per-cell and per-image events.
//!
//! Inject an [`Arc<dyn PublishProgressCallback>`] via
//! [`crate::config::PublishConfigBuilder::progress_callback`] to receive
//! events while a document is rendered and published. The CLI uses it to
//! drive its progress bar; library users can forward events anywhere.
//!
//! # Example
//!
//! ```rust
//! use esapub::{PublishConfig, PublishProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     cells: AtomicUsize,
//! }
//!
//! impl PublishProgressCallback for CountingCallback {
//!     fn on_cell_complete(&self, _index: usize, _total: usize, _kind: &str) {
//!         self.cells.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = PublishConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { cells: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes a document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Events arrive strictly in document order.
pub trait PublishProgressCallback: Send + Sync {
    /// Called once before the first cell is rendered.
    ///
    /// # Arguments
    /// * `total_cells` — number of cells (1 for markdown inputs)
    fn on_render_start(&self, total_cells: usize) {
        let _ = total_cells;
    }

    /// Called after each cell has been rendered.
    ///
    /// # Arguments
    /// * `index` — 1-indexed cell number
    /// * `total` — total cells
    /// * `kind`  — `"code"`, `"markdown"`, `"raw"` or `"markdown-file"`
    fn on_cell_complete(&self, index: usize, total: usize, kind: &str) {
        let _ = (index, total, kind);
    }

    /// Called after every image reference was handled.
    ///
    /// `error` is `None` on success (fresh upload or reused URL).
    fn on_image(&self, reference: &str, error: Option<&str>) {
        let _ = (reference, error);
    }

    /// Called right before the create/patch call.
    fn on_publish_start(&self, updating: bool) {
        let _ = updating;
    }

    /// Called once when the run is over, successful or not.
    ///
    /// # Arguments
    /// * `images`        — image references seen
    /// * `failed_images` — references that could not be resolved
    fn on_complete(&self, images: usize, failed_images: usize) {
        let _ = (images, failed_images);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PublishProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PublishConfig`].
pub type ProgressCallback = Arc<dyn PublishProgressCallback>;
