//! Publish orchestrator: render → upload → create/patch → save.
//!
//! One run walks the states
//!
//! ```text
//! Unprocessed ──▶ Rendered ──▶ Published ──▶ Saved
//! ```
//!
//! strictly forward. A failure stops the run at the last completed state;
//! the input document is only rewritten after the post call succeeded, and
//! even then through a temp file + rename.
//!
//! Everything runs sequentially on the caller's task: every upload and the
//! final post call are awaited one at a time, in document order.

use crate::config::{PostMode, PublishConfig, PublishMode};
use crate::convert::{render_document, InputKind};
use crate::error::EsaPubError;
use crate::notebook::{write_atomic, Notebook, PostInfo};
use crate::output::{PostSummary, PublishOutput, RenderStats, Stage};
use crate::pipeline::dedup::{DedupUploader, HashDict};
use crate::pipeline::image::WorkDir;
use crate::remote::{PostDraft, PostId, PublishedPost, Publisher, RemoteError};
use std::path::Path;
use tracing::{info, warn};

/// Change message used when none is configured.
pub const DEFAULT_MESSAGE: &str = "Upload post.";

/// Render `input` and publish it through `publisher`.
///
/// # Returns
/// `Ok(PublishOutput)` once the run reached its final stage, even when some
/// images failed (see `output.stats.failures`) and the mode tolerated it.
///
/// # Errors
/// - unsupported / unreadable input
/// - [`EsaPubError::ImagesFailed`] in [`PublishMode::Check`]
/// - the create/patch call failed (a missing post falls back to create)
/// - the updated document could not be written
pub async fn publish(
    input: impl AsRef<Path>,
    config: &PublishConfig,
    publisher: &dyn Publisher,
) -> Result<PublishOutput, EsaPubError> {
    let input = input.as_ref();
    let kind = InputKind::detect(input)?;
    info!(
        "Publishing {} via {} ({:?})",
        input.display(),
        publisher.name(),
        kind
    );

    let result = match kind {
        InputKind::Notebook => publish_notebook(input, config, publisher).await,
        InputKind::Markdown | InputKind::Latex => {
            publish_markdown(input, kind, config, publisher).await
        }
    };

    if let (Some(cb), Ok(output)) = (&config.progress_callback, &result) {
        cb.on_complete(output.stats.images, output.stats.failed());
    }
    result
}

// ── Notebook inputs ──────────────────────────────────────────────────────────

async fn publish_notebook(
    input: &Path,
    config: &PublishConfig,
    publisher: &dyn Publisher,
) -> Result<PublishOutput, EsaPubError> {
    // ── Step 1: Load and initialise metadata ─────────────────────────────
    let mut notebook = Notebook::load(input)?;
    let mut meta = notebook
        .esa_metadata()
        .map_err(|e| EsaPubError::InvalidNotebook {
            path: input.to_path_buf(),
            detail: format!("unreadable esapub metadata: {e}"),
        })?;
    if meta.post_info.number.is_none() {
        info!("No post recorded yet; this run creates one");
    }

    // ── Step 2: Render ───────────────────────────────────────────────────
    let workdir = WorkDir::new(input, config.keep_workdir).map_err(|e| EsaPubError::io(input, e))?;
    let (markdown, stats) = {
        let mut sink = DedupUploader::new(&mut meta.hashdict, publisher, &workdir);
        render_document(
            input,
            InputKind::Notebook,
            config,
            &workdir,
            &mut sink,
            Some(&notebook),
        )
        .await?
    };
    log_render(&stats);
    let mut output = rendered(markdown, stats);

    // ── Step 3: Publish ──────────────────────────────────────────────────
    if should_publish(config.publish_mode, &output.stats)? {
        if config.post_number.is_some() {
            meta.post_info.number = config.post_number.clone();
        }
        let (post, updated) =
            publish_body(publisher, config, &meta.post_info, input, &output.markdown).await?;
        meta.post_info = PostInfo::from_published(&post);
        output.stage = Stage::Published;
        output.post = Some(PostSummary {
            id: post.id,
            url: post.url,
            updated,
        });
    }

    // ── Step 4: Save ─────────────────────────────────────────────────────
    notebook
        .set_esa_metadata(&meta)
        .map_err(|e| EsaPubError::Internal(format!("metadata serialisation: {e}")))?;
    if let Some(target) = config.output_mode.target(input) {
        notebook.save(&target)?;
        info!("Saved {}", target.display());
        output.saved_to = Some(target);
        output.stage = Stage::Saved;
    }
    Ok(output)
}

// ── Markdown / LaTeX inputs ──────────────────────────────────────────────────

async fn publish_markdown(
    input: &Path,
    kind: InputKind,
    config: &PublishConfig,
    publisher: &dyn Publisher,
) -> Result<PublishOutput, EsaPubError> {
    let workdir = WorkDir::new(input, config.keep_workdir).map_err(|e| EsaPubError::io(input, e))?;

    // No metadata to persist into: dedup only lasts for this run.
    let mut hashdict = HashDict::new();
    let (markdown, stats) = {
        let mut sink = DedupUploader::new(&mut hashdict, publisher, &workdir);
        render_document(input, kind, config, &workdir, &mut sink, None).await?
    };
    log_render(&stats);
    let mut output = rendered(markdown, stats);

    if should_publish(config.publish_mode, &output.stats)? {
        let post_info = PostInfo {
            number: config.post_number.clone(),
            ..Default::default()
        };
        let (post, updated) =
            publish_body(publisher, config, &post_info, input, &output.markdown).await?;
        output.stage = Stage::Published;
        output.post = Some(PostSummary {
            id: post.id,
            url: post.url,
            updated,
        });
    }

    let base = match kind {
        InputKind::Latex => input.with_extension("md"),
        _ => input.to_path_buf(),
    };
    if let Some(target) = config.output_mode.target(&base) {
        write_atomic(&target, output.markdown.as_bytes())?;
        info!("Saved {}", target.display());
        output.saved_to = Some(target);
        output.stage = Stage::Saved;
    }
    Ok(output)
}

// ── Shared steps ─────────────────────────────────────────────────────────────

fn rendered(markdown: String, stats: RenderStats) -> PublishOutput {
    PublishOutput {
        markdown,
        stage: Stage::Rendered,
        post: None,
        saved_to: None,
        stats,
    }
}

fn log_render(stats: &RenderStats) {
    info!(
        "Rendered {}/{} cells, {} images ({} uploaded, {} reused, {} failed)",
        stats.rendered_cells,
        stats.cells,
        stats.images,
        stats.uploaded,
        stats.reused,
        stats.failed()
    );
}

/// Apply the publish mode to the render outcome.
pub fn should_publish(mode: PublishMode, stats: &RenderStats) -> Result<bool, EsaPubError> {
    match mode {
        PublishMode::Skip => {
            info!("Publishing skipped");
            Ok(false)
        }
        PublishMode::Check if stats.failed() > 0 => Err(EsaPubError::ImagesFailed {
            failed: stats.failed(),
            total: stats.images,
        }),
        PublishMode::Check => Ok(true),
        PublishMode::Force => {
            if stats.failed() > 0 {
                warn!(
                    "{}/{} images failed; publishing anyway",
                    stats.failed(),
                    stats.images
                );
            }
            Ok(true)
        }
    }
}

/// Create or patch the post. Returns the server's post and whether it was
/// an update.
async fn publish_body(
    publisher: &dyn Publisher,
    config: &PublishConfig,
    post_info: &PostInfo,
    input: &Path,
    body: &str,
) -> Result<(PublishedPost, bool), EsaPubError> {
    let target: Option<&PostId> = match config.post_mode {
        PostMode::Auto => post_info.number.as_ref(),
        PostMode::New => None,
    };
    if let Some(cb) = &config.progress_callback {
        cb.on_publish_start(target.is_some());
    }

    if let Some(id) = target {
        info!("Updating post {}", id);
        match publisher.patch_post(id, &update_draft(config, body)).await {
            Ok(post) => return Ok((post, true)),
            Err(RemoteError::NotFound { .. }) => {
                warn!("Post {} no longer exists; creating a new one", id);
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!("Creating a new post");
    let post = publisher
        .create_post(&create_draft(config, post_info, input, body))
        .await?;
    Ok((post, false))
}

/// Draft for a new post: configured values, then recorded ones, then defaults.
pub fn create_draft(config: &PublishConfig, post_info: &PostInfo, input: &Path, body: &str) -> PostDraft {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "untitled".to_string());
    PostDraft {
        name: Some(
            config
                .title
                .clone()
                .or_else(|| post_info.name().map(str::to_string))
                .unwrap_or(stem),
        ),
        tags: config.tags.clone().or_else(|| post_info.tags()),
        category: config
            .category
            .clone()
            .or_else(|| post_info.category().map(str::to_string)),
        wip: Some(config.wip.unwrap_or(true)),
        message: Some(
            config
                .message
                .clone()
                .unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
        ),
        body_md: body.to_string(),
    }
}

/// Draft for an update: only what was explicitly configured, plus the body.
pub fn update_draft(config: &PublishConfig, body: &str) -> PostDraft {
    PostDraft {
        name: config.title.clone(),
        tags: config.tags.clone(),
        category: config.category.clone(),
        wip: config.wip,
        message: config.message.clone(),
        body_md: body.to_string(),
    }
}
