//! Document → markdown conversion entry points.
//!
//! Three inputs are supported, chosen by file extension:
//!
//! | Extension | Handling |
//! |-----------|----------|
//! | `.ipynb`  | native cell renderer ([`crate::pipeline::cell`]) |
//! | `.md`     | image references rewritten line by line |
//! | `.tex`    | `pandoc` → markdown in the work dir, then as `.md` |
//!
//! Rendering never talks to the network directly: images go through an
//! [`ImageSink`]. [`convert_to_markdown`] uses a sink that copies images next
//! to the exported file; [`crate::publish`] plugs in the uploading one.

use crate::config::PublishConfig;
use crate::error::EsaPubError;
use crate::notebook::{write_atomic, Notebook};
use crate::output::{PublishOutput, RenderStats, Stage};
use crate::pipeline::cell::{render_cell, RenderContext};
use crate::pipeline::image::{ImageSink, LocalExport, WorkDir};
use crate::pipeline::markdown::rewrite_image_lines;
use crate::pipeline::math::MathRewriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Notebook,
    Markdown,
    Latex,
}

impl InputKind {
    /// Classify by extension (case-insensitive).
    pub fn detect(path: &Path) -> Result<Self, EsaPubError> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "ipynb" => Ok(InputKind::Notebook),
            "md" | "markdown" => Ok(InputKind::Markdown),
            "tex" => Ok(InputKind::Latex),
            _ => Err(EsaPubError::UnsupportedInput {
                path: path.to_path_buf(),
                extension,
            }),
        }
    }
}

/// Directory relative references in `input` resolve against.
pub(crate) fn root_dir_of(input: &Path) -> PathBuf {
    match input.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

// ── Rendering ────────────────────────────────────────────────────────────────

/// Render every cell in document order into one markdown body.
///
/// Image failures are recorded in `ctx.stats` and never abort the walk.
pub async fn render_notebook(notebook: &Notebook, ctx: &mut RenderContext<'_>) -> String {
    let total = notebook.cells.len();
    if let Some(cb) = &ctx.progress {
        cb.on_render_start(total);
    }

    let mut fragments = Vec::with_capacity(total);
    for (i, cell) in notebook.cells.iter().enumerate() {
        ctx.stats.cells += 1;
        if let Some(fragment) = render_cell(cell, ctx).await {
            ctx.stats.rendered_cells += 1;
            fragments.push(fragment);
        }
        debug!("Rendered cell {}/{} ({})", i + 1, total, cell.kind());
        if let Some(cb) = &ctx.progress {
            cb.on_cell_complete(i + 1, total, cell.kind());
        }
    }

    let mut body = fragments.join("\n\n");
    body.push('\n');
    body
}

/// Rewrite a plain markdown document. Math is only rewritten when the text
/// came out of pandoc; hand-written markdown is assumed to be esa-ready.
pub async fn render_markdown_text(
    text: &str,
    ctx: &mut RenderContext<'_>,
    rewrite_math: bool,
) -> String {
    if let Some(cb) = &ctx.progress {
        cb.on_render_start(1);
    }
    ctx.stats.cells += 1;
    ctx.stats.rendered_cells += 1;

    let lines: Vec<String> = if rewrite_math {
        MathRewriter::rewrite_lines(&text.lines().collect::<Vec<_>>())
    } else {
        text.lines().map(str::to_string).collect()
    };

    let out = rewrite_image_lines(&lines, ctx, None).await;
    if let Some(cb) = &ctx.progress {
        cb.on_cell_complete(1, 1, "markdown-file");
    }

    let mut body = out.join("\n");
    body.push('\n');
    body
}

/// Run `pandoc` on a LaTeX file, writing `<stem>.md` into `workdir`.
pub async fn latex_to_markdown(input: &Path, workdir: &Path) -> Result<PathBuf, EsaPubError> {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let output = workdir.join(format!("{stem}.md"));
    info!("LaTeX input, calling pandoc: {}", input.display());

    let result = tokio::process::Command::new("pandoc")
        .arg("-s")
        .arg(input)
        .arg("-t")
        .arg("markdown")
        .arg("-o")
        .arg(&output)
        .output()
        .await
        .map_err(|e| EsaPubError::ConverterFailed {
            program: "pandoc".to_string(),
            detail: format!("could not start pandoc (is it installed?): {e}"),
        })?;

    if !result.status.success() {
        return Err(EsaPubError::ConverterFailed {
            program: "pandoc".to_string(),
            detail: String::from_utf8_lossy(&result.stderr).trim().to_string(),
        });
    }
    debug!("pandoc wrote {}", output.display());
    Ok(output)
}

/// Read a `.md` input, or convert a `.tex` one first.
///
/// Returns the text and whether math still needs rewriting.
pub(crate) async fn load_markdown_source(
    input: &Path,
    kind: InputKind,
    workdir: &WorkDir,
) -> Result<(String, bool), EsaPubError> {
    if !input.exists() {
        return Err(EsaPubError::FileNotFound {
            path: input.to_path_buf(),
        });
    }
    let (path, rewrite_math) = match kind {
        InputKind::Latex => (latex_to_markdown(input, workdir.path()).await?, true),
        _ => (input.to_path_buf(), false),
    };
    let text = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| EsaPubError::io(&path, e))?;
    Ok((text, rewrite_math))
}

/// Render `input` with the given image sink. Shared by convert and publish.
pub(crate) async fn render_document(
    input: &Path,
    kind: InputKind,
    config: &PublishConfig,
    workdir: &WorkDir,
    sink: &mut dyn ImageSink,
    notebook: Option<&Notebook>,
) -> Result<(String, RenderStats), EsaPubError> {
    let language = notebook
        .map(Notebook::language)
        .unwrap_or_else(|| "python".to_string());
    let source = match kind {
        InputKind::Notebook => None,
        _ => Some(load_markdown_source(input, kind, workdir).await?),
    };

    let mut ctx = RenderContext::new(config.folding, root_dir_of(input), workdir, sink);
    ctx.language = language;
    ctx.scroll_height_px = config.scroll_height_px;
    ctx.progress = config.progress_callback.clone();

    let markdown = match (source, notebook) {
        (Some((text, rewrite_math)), _) => render_markdown_text(&text, &mut ctx, rewrite_math).await,
        (None, Some(nb)) => render_notebook(nb, &mut ctx).await,
        (None, None) => {
            return Err(EsaPubError::Internal(
                "notebook input rendered without a loaded notebook".to_string(),
            ))
        }
    };
    Ok((markdown, ctx.stats))
}

// ── Format-only conversion ───────────────────────────────────────────────────

/// Default markdown path for the `convert` subcommand: `<stem>.md` beside
/// the input.
pub fn default_markdown_path(input: &Path) -> PathBuf {
    input.with_extension("md")
}

/// Convert `input` to markdown without touching any remote service.
///
/// Images are written to `<stem>_files/` next to `output` (defaults to
/// [`default_markdown_path`]). A `.md` input with no explicit output is
/// left as it is.
pub async fn convert_to_markdown(
    input: impl AsRef<Path>,
    output: Option<&Path>,
    config: &PublishConfig,
) -> Result<PublishOutput, EsaPubError> {
    let input = input.as_ref();
    let kind = InputKind::detect(input)?;
    info!("Converting {} ({:?})", input.display(), kind);

    let target = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_markdown_path(input));
    if kind == InputKind::Markdown && output.is_none() {
        warn!("Input is already markdown; nothing to do");
        let markdown = tokio::fs::read_to_string(input)
            .await
            .map_err(|e| EsaPubError::io(input, e))?;
        return Ok(PublishOutput {
            markdown,
            stage: Stage::Rendered,
            post: None,
            saved_to: None,
            stats: Default::default(),
        });
    }

    let notebook = match kind {
        InputKind::Notebook => Some(Notebook::load(input)?),
        _ => None,
    };
    let workdir = WorkDir::new(input, config.keep_workdir).map_err(|e| EsaPubError::io(input, e))?;
    let mut sink = LocalExport::for_output(&target);
    let (markdown, stats) =
        render_document(input, kind, config, &workdir, &mut sink, notebook.as_ref()).await?;

    write_atomic(&target, markdown.as_bytes())?;
    info!("Wrote {}", target.display());

    if let Some(cb) = &config.progress_callback {
        cb.on_complete(stats.images, stats.failed());
    }
    Ok(PublishOutput {
        markdown,
        stage: Stage::Saved,
        post: None,
        saved_to: Some(target),
        stats,
    })
}
