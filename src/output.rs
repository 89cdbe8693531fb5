//! Result types returned by the top-level entry points.

use crate::error::ImageError;
use crate::remote::PostId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How far a run got. Transitions are linear; a failure leaves the run at
/// the last completed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Unprocessed,
    Rendered,
    Published,
    Saved,
}

/// Per-run image bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderStats {
    /// Cells (or 1 for a markdown file) walked.
    pub cells: usize,
    /// Cells that contributed a fragment to the body.
    pub rendered_cells: usize,
    /// Image references encountered (remote URLs excluded).
    pub images: usize,
    /// Images sent over the network.
    pub uploaded: usize,
    /// Images whose digest was already in the hashdict.
    pub reused: usize,
    /// Images that could not be resolved; annotated in the body.
    pub failures: Vec<ImageError>,
}

impl RenderStats {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// The published post, as far as the caller needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: PostId,
    pub url: String,
    /// `true` when an existing post was patched.
    pub updated: bool,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishOutput {
    /// Final markdown body.
    pub markdown: String,
    /// Last stage reached.
    pub stage: Stage,
    /// `None` when publishing was skipped.
    pub post: Option<PostSummary>,
    /// Where the updated document was written, if anywhere.
    pub saved_to: Option<PathBuf>,
    pub stats: RenderStats,
}
