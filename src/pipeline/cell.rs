//! Cell rendering: one markdown fragment per notebook cell.
//!
//! Every cell kind maps to a fenced block, optionally wrapped in a
//! `<details>` disclosure widget whose open/closed default comes from the
//! cell metadata combined with the configured [`FoldingMode`].

use super::image::{warn_image_failure, ImageAsset, ImageSink, WorkDir};
use super::markdown::rewrite_image_lines;
use super::math::MathRewriter;
use super::outputs::render_output;
use crate::config::FoldingMode;
use crate::error::ImageError;
use crate::notebook::{Cell, CodeCell, MarkdownCell, RawCell};
use crate::output::RenderStats;
use crate::progress::ProgressCallback;
use std::path::PathBuf;

/// Source token that asks for a code cell to be folded.
pub const FOLD_MARKER: &str = "%esa_fold";

/// Default `max-height` of a scrolled output block.
pub const DEFAULT_SCROLL_HEIGHT_PX: u32 = 300;

/// Everything rendering needs besides the cell itself.
///
/// Owned by one orchestrator run; the only mutable state shared between
/// cells is the image sink and the stats.
pub struct RenderContext<'a> {
    pub folding: FoldingMode,
    /// Fence language for code cells.
    pub language: String,
    /// Directory that relative image paths are resolved against.
    pub root_dir: PathBuf,
    pub workdir: &'a WorkDir,
    pub sink: &'a mut dyn ImageSink,
    pub stats: RenderStats,
    pub scroll_height_px: u32,
    pub progress: Option<ProgressCallback>,
}

impl<'a> RenderContext<'a> {
    pub fn new(
        folding: FoldingMode,
        root_dir: PathBuf,
        workdir: &'a WorkDir,
        sink: &'a mut dyn ImageSink,
    ) -> Self {
        Self {
            folding,
            language: "python".to_string(),
            root_dir,
            workdir,
            sink,
            stats: RenderStats::default(),
            scroll_height_px: DEFAULT_SCROLL_HEIGHT_PX,
            progress: None,
        }
    }

    /// Store an image through the sink, keeping the stats in step.
    pub async fn store_asset(
        &mut self,
        asset: &ImageAsset,
        reference: &str,
    ) -> Result<String, ImageError> {
        self.stats.images += 1;
        match self.sink.store(asset, reference).await {
            Ok(stored) => {
                if stored.reused {
                    self.stats.reused += 1;
                } else {
                    self.stats.uploaded += 1;
                }
                if let Some(cb) = &self.progress {
                    cb.on_image(reference, None);
                }
                Ok(stored.url)
            }
            Err(err) => {
                self.record_failure(reference, err.clone());
                Err(err)
            }
        }
    }

    /// Count an image that never reached the sink (missing file, bad payload).
    pub fn image_failed(&mut self, reference: &str, err: ImageError) {
        self.stats.images += 1;
        self.record_failure(reference, err);
    }

    fn record_failure(&mut self, reference: &str, err: ImageError) {
        warn_image_failure(&err);
        if let Some(cb) = &self.progress {
            cb.on_image(reference, Some(&err.to_string()));
        }
        self.stats.failures.push(err);
    }
}

// ── Markdown building blocks ─────────────────────────────────────────────────

/// Fenced block whose fence is longer than any backtick run in `body`.
pub fn fence(language: &str, body: &str) -> String {
    let longest = body
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let ticks = "`".repeat((longest + 1).max(3));
    format!("{ticks}{language}\n{}\n{ticks}", body.trim_end_matches('\n'))
}

/// `<details>` disclosure widget.
pub fn details(open: bool, summary: &str, body: &str) -> String {
    let tag = if open { "<details open>" } else { "<details>" };
    format!("{tag}<summary>{summary}</summary>\n\n{body}\n\n</details>")
}

/// Height-limited scrolling container.
pub fn scroll(body: &str, max_height_px: u32) -> String {
    format!(
        "<div style=\"max-height: {max_height_px}px; overflow-y: auto;\">\n\n{body}\n\n</div>"
    )
}

/// `true` when any line carries the fold marker before a comment character.
pub fn has_fold_marker<S: AsRef<str>>(lines: &[S]) -> bool {
    lines.iter().any(|line| {
        let line = line.as_ref();
        let code = line.split('#').next().unwrap_or(line);
        code.contains(FOLD_MARKER)
    })
}

fn is_marker_line(line: &str) -> bool {
    let t = line.trim();
    t == FOLD_MARKER || t == format!("%{FOLD_MARKER}")
}

fn execution_label(count: Option<u64>) -> String {
    count.map(|n| n.to_string()).unwrap_or_else(|| " ".to_string())
}

// ── Cells ────────────────────────────────────────────────────────────────────

/// Render one cell. `None` means the cell contributes nothing to the body.
pub async fn render_cell(cell: &Cell, ctx: &mut RenderContext<'_>) -> Option<String> {
    match cell {
        Cell::Raw(raw) => render_raw(raw, ctx.folding),
        Cell::Markdown(md) => render_markdown(md, ctx).await,
        Cell::Code(code) => render_code(code, ctx).await,
    }
}

/// Hidden raw/markdown cells are folded unless hints are ignored.
fn wrap_hidden(hidden: bool, folding: FoldingMode, summary: &str, body: String) -> String {
    if hidden && folding != FoldingMode::Ignore {
        details(false, summary, &body)
    } else {
        body
    }
}

fn render_raw(cell: &RawCell, folding: FoldingMode) -> Option<String> {
    if cell.source.is_blank() {
        return None;
    }
    let block = fence("", &cell.source.text());
    Some(wrap_hidden(
        cell.metadata.source_hidden(),
        folding,
        "Raw",
        block,
    ))
}

async fn render_markdown(cell: &MarkdownCell, ctx: &mut RenderContext<'_>) -> Option<String> {
    if cell.source.is_blank() {
        return None;
    }
    let rewritten = MathRewriter::rewrite_lines(&cell.source.lines());
    let lines = rewrite_image_lines(&rewritten, ctx, Some(cell)).await;
    Some(wrap_hidden(
        cell.metadata.source_hidden(),
        ctx.folding,
        "Markdown",
        lines.join("\n"),
    ))
}

async fn render_code(cell: &CodeCell, ctx: &mut RenderContext<'_>) -> Option<String> {
    let lines = cell.source.lines();
    let marked = has_fold_marker(&lines);
    let source_hidden = cell.metadata.source_hidden();
    let label = execution_label(cell.execution_count);

    let mut parts = Vec::new();

    let kept: Vec<&str> = lines
        .iter()
        .map(String::as_str)
        .filter(|l| !is_marker_line(l))
        .collect();
    let source = kept.join("\n");
    if !source.trim().is_empty() {
        let open = match ctx.folding {
            FoldingMode::Ignore => true,
            FoldingMode::AsShown => !source_hidden,
            FoldingMode::Auto => !(marked || source_hidden),
        };
        let block = fence(&ctx.language, &source);
        parts.push(details(open, &format!("In [{label}]:"), &block));
    }

    let mut rendered = Vec::new();
    for output in &cell.outputs {
        if let Some(fragment) = render_output(output, ctx).await {
            rendered.push(fragment);
        }
    }
    if !rendered.is_empty() {
        let mut body = rendered.join("\n\n");
        if cell.metadata.scrolled() {
            body = scroll(&body, ctx.scroll_height_px);
        }
        let open = ctx.folding == FoldingMode::Ignore || !cell.metadata.outputs_hidden();
        parts.push(details(open, &format!("Out [{label}]:"), &body));
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::image::LocalExport;
    use serde_json::json;

    fn cell(value: serde_json::Value) -> Cell {
        serde_json::from_value(value).unwrap()
    }

    async fn render(c: &Cell, folding: FoldingMode) -> Option<String> {
        let dir = tempfile::tempdir().unwrap();
        let work = WorkDir::new(&dir.path().join("nb.ipynb"), false).unwrap();
        let mut sink = LocalExport::for_output(&dir.path().join("nb.md"));
        let mut ctx = RenderContext::new(folding, dir.path().to_path_buf(), &work, &mut sink);
        render_cell(c, &mut ctx).await
    }

    #[test]
    fn fence_grows_past_inner_backticks() {
        assert_eq!(fence("py", "x = 1\n"), "```py\nx = 1\n```");
        assert_eq!(fence("", "a ```` b"), "`````\na ```` b\n`````");
    }

    #[test]
    fn details_open_and_closed() {
        assert_eq!(
            details(true, "S", "B"),
            "<details open><summary>S</summary>\n\nB\n\n</details>"
        );
        assert!(details(false, "S", "B").starts_with("<details><summary>"));
    }

    #[test]
    fn fold_marker_ignores_comments() {
        assert!(has_fold_marker(&["%esa_fold", "x = 1"]));
        assert!(has_fold_marker(&["%%esa_fold"]));
        assert!(!has_fold_marker(&["x = 1  # %esa_fold"]));
    }

    #[tokio::test]
    async fn empty_raw_and_markdown_render_nothing() {
        let raw = cell(json!({"cell_type": "raw", "metadata": {}, "source": []}));
        let md = cell(json!({"cell_type": "markdown", "metadata": {}, "source": ["  \n"]}));
        assert_eq!(render(&raw, FoldingMode::Auto).await, None);
        assert_eq!(render(&md, FoldingMode::Auto).await, None);
    }

    #[tokio::test]
    async fn hidden_raw_is_folded_unless_ignored() {
        let raw = cell(json!({
            "cell_type": "raw",
            "metadata": {"jupyter": {"source_hidden": true}},
            "source": "raw text"
        }));
        let auto = render(&raw, FoldingMode::Auto).await.unwrap();
        assert!(auto.starts_with("<details><summary>Raw</summary>"));
        let ignored = render(&raw, FoldingMode::Ignore).await.unwrap();
        assert_eq!(ignored, "```\nraw text\n```");
    }

    #[tokio::test]
    async fn markdown_math_is_rewritten() {
        let md = cell(json!({
            "cell_type": "markdown",
            "metadata": {},
            "source": ["# Title\n", "$$\n", "a_b\n", "$$\n", "with $x_i$"]
        }));
        let out = render(&md, FoldingMode::Auto).await.unwrap();
        assert_eq!(out, "# Title\n```math\na_b\n```\nwith $x\\_i$");
    }

    fn code(hidden: bool, source: &str) -> Cell {
        cell(json!({
            "cell_type": "code",
            "execution_count": 3,
            "metadata": {"jupyter": {"source_hidden": hidden}},
            "outputs": [],
            "source": source
        }))
    }

    #[tokio::test]
    async fn hidden_code_follows_folding_mode() {
        let c = code(true, "print(1)");
        let shown = render(&c, FoldingMode::AsShown).await.unwrap();
        assert!(shown.starts_with("<details><summary>In [3]:</summary>"));
        let ignored = render(&c, FoldingMode::Ignore).await.unwrap();
        assert!(ignored.starts_with("<details open><summary>In [3]:</summary>"));
    }

    #[tokio::test]
    async fn fold_marker_closes_in_auto_only() {
        let c = code(false, "%esa_fold\nprint(1)");
        let auto = render(&c, FoldingMode::Auto).await.unwrap();
        assert!(auto.starts_with("<details><summary>"));
        assert!(!auto.contains("esa_fold"));
        let shown = render(&c, FoldingMode::AsShown).await.unwrap();
        assert!(shown.starts_with("<details open>"));
    }

    #[tokio::test]
    async fn code_outputs_are_wrapped_and_scrolled() {
        let c = cell(json!({
            "cell_type": "code",
            "execution_count": null,
            "metadata": {"scrolled": true, "collapsed": true},
            "outputs": [{"output_type": "stream", "name": "stdout", "text": ["hi\n"]}],
            "source": ""
        }));
        let out = render(&c, FoldingMode::Auto).await.unwrap();
        assert!(out.starts_with("<details><summary>Out [ ]:</summary>"));
        assert!(out.contains("max-height: 300px"));
        assert!(out.contains("```\nhi\n```"));
        assert!(!out.contains("In ["));
    }

    #[tokio::test]
    async fn empty_code_cell_renders_nothing() {
        let c = code(false, "");
        assert_eq!(render(&c, FoldingMode::Auto).await, None);
    }
}
