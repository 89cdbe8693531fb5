//! Image-reference rewriting for markdown text.
//!
//! Scans a line for `![alt](target)` and swaps `target` for the URL the
//! image sink returns. Remote targets are left alone. A reference that
//! cannot be resolved keeps its original text followed by a short
//! annotation, so the author can spot it in the published post.

use super::cell::RenderContext;
use super::image::{classify, extension_for_mime, ImageAsset, ImageRef};
use super::math::CodeFence;
use crate::error::ImageError;
use crate::notebook::{mime_text, MarkdownCell};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[(.*?)\]\((.+?)\)").unwrap());

/// Split `path "title"` into the path and the (possibly empty) suffix.
fn split_target(inner: &str) -> (&str, &str) {
    match inner.find(char::is_whitespace) {
        Some(pos) => (&inner[..pos], &inner[pos..]),
        None => (inner, ""),
    }
}

/// Rewrite image references line by line, leaving fenced code blocks
/// (and the math blocks the math rewriter emits) untouched.
pub async fn rewrite_image_lines(
    lines: &[String],
    ctx: &mut RenderContext<'_>,
    cell: Option<&MarkdownCell>,
) -> Vec<String> {
    let mut fence = CodeFence::new();
    let mut out = Vec::with_capacity(lines.len());
    for line in lines {
        if fence.update(line) {
            out.push(line.clone());
        } else {
            out.push(rewrite_images(line, ctx, cell).await);
        }
    }
    out
}

/// Rewrite every image reference on `line`.
///
/// `cell` supplies `attachment:` payloads; pass `None` for plain markdown
/// files, where such references are reported missing.
pub async fn rewrite_images(
    line: &str,
    ctx: &mut RenderContext<'_>,
    cell: Option<&MarkdownCell>,
) -> String {
    if !line.contains("![") {
        return line.to_string();
    }

    // Collect first: the regex borrows `line` while the sink awaits.
    let found: Vec<(usize, usize, String, String)> = RE_IMAGE
        .captures_iter(line)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                whole.start(),
                whole.end(),
                caps[1].to_string(),
                caps[2].to_string(),
            ))
        })
        .collect();

    let mut out = String::with_capacity(line.len());
    let mut last = 0;
    for (start, end, alt, inner) in found {
        out.push_str(&line[last..start]);
        let original = &line[start..end];
        let (target, suffix) = split_target(&inner);

        match resolve(target, ctx, cell).await {
            Resolved::Unchanged => out.push_str(original),
            Resolved::Url(url) => out.push_str(&format!("![{alt}]({url}{suffix})")),
            Resolved::Failed(annotation) => {
                out.push_str(original);
                out.push_str(annotation);
            }
        }
        last = end;
    }
    out.push_str(&line[last..]);
    out
}

enum Resolved {
    Unchanged,
    Url(String),
    Failed(&'static str),
}

async fn resolve(
    target: &str,
    ctx: &mut RenderContext<'_>,
    cell: Option<&MarkdownCell>,
) -> Resolved {
    let asset = match classify(target, &ctx.root_dir) {
        ImageRef::Remote => return Resolved::Unchanged,
        ImageRef::Attachment(name) => attachment_asset(&name, ctx, cell),
        ImageRef::Local(path) => ImageAsset::from_file(&path).map_err(|e| ImageError::UploadFailed {
            reference: target.to_string(),
            detail: e.to_string(),
        }),
        ImageRef::NotFound(path) => Err(ImageError::NotFound { path }),
    };

    let asset = match asset {
        Ok(asset) => asset,
        Err(err) => {
            let annotation = err.annotation();
            ctx.image_failed(target, err);
            return Resolved::Failed(annotation);
        }
    };

    match ctx.store_asset(&asset, target).await {
        Ok(url) => Resolved::Url(url),
        Err(err) => Resolved::Failed(err.annotation()),
    }
}

fn attachment_asset(
    name: &str,
    ctx: &RenderContext<'_>,
    cell: Option<&MarkdownCell>,
) -> Result<ImageAsset, ImageError> {
    let missing = || ImageError::MissingAttachment {
        name: name.to_string(),
    };
    let bundle = cell.and_then(|c| c.attachment(name)).ok_or_else(missing)?;
    let (extension, payload) = bundle
        .keys()
        .find_map(|mime| Some((extension_for_mime(mime)?, mime_text(&bundle, mime)?)))
        .ok_or_else(missing)?;
    ctx.workdir.extract(&payload, extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FoldingMode;
    use crate::pipeline::image::{ImageSink, StoredImage, WorkDir};
    use async_trait::async_trait;
    use serde_json::json;

    const PNG_1X1: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

    #[derive(Default)]
    struct NumberingSink {
        calls: usize,
    }

    #[async_trait]
    impl ImageSink for NumberingSink {
        async fn store(
            &mut self,
            _asset: &ImageAsset,
            _reference: &str,
        ) -> Result<StoredImage, ImageError> {
            self.calls += 1;
            Ok(StoredImage {
                url: format!("https://img.example/{}.png", self.calls),
                reused: false,
            })
        }
    }

    #[test]
    fn title_suffix_is_split() {
        assert_eq!(split_target(r#"a.png "Title""#), ("a.png", r#" "Title""#));
        assert_eq!(split_target("a.png"), ("a.png", ""));
    }

    #[tokio::test]
    async fn local_remote_and_missing_references() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fig.png"), b"png-bytes").unwrap();
        let work = WorkDir::new(&dir.path().join("doc.md"), false).unwrap();
        let mut sink = NumberingSink::default();
        let mut ctx = RenderContext::new(FoldingMode::Auto, dir.path().into(), &work, &mut sink);

        let line = r#"A ![one](fig.png "t") B ![two](https://x/y.png) C ![three](gone.png)"#;
        let out = rewrite_images(line, &mut ctx, None).await;

        assert_eq!(
            out,
            r#"A ![one](https://img.example/1.png "t") B ![two](https://x/y.png) C ![three](gone.png) (file not found)"#
        );
        assert_eq!(ctx.stats.images, 2);
        assert_eq!(ctx.stats.failed(), 1);
    }

    #[tokio::test]
    async fn attachments_are_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let work = WorkDir::new(&dir.path().join("nb.ipynb"), false).unwrap();
        let mut sink = NumberingSink::default();
        let mut ctx = RenderContext::new(FoldingMode::Auto, dir.path().into(), &work, &mut sink);
        let cell: MarkdownCell = serde_json::from_value(json!({
            "attachments": {"paste.png": {"image/png": PNG_1X1}},
            "metadata": {},
            "source": "![x](attachment:paste.png)"
        }))
        .unwrap();

        let ok = rewrite_images("![x](attachment:paste.png)", &mut ctx, Some(&cell)).await;
        assert_eq!(ok, "![x](https://img.example/1.png)");

        let missing = rewrite_images("![y](attachment:other.png)", &mut ctx, Some(&cell)).await;
        assert_eq!(missing, "![y](attachment:other.png) (file not found)");
    }

    #[tokio::test]
    async fn fenced_examples_are_not_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let work = WorkDir::new(&dir.path().join("nb.ipynb"), false).unwrap();
        let mut sink = NumberingSink::default();
        let mut ctx = RenderContext::new(FoldingMode::Auto, dir.path().into(), &work, &mut sink);
        let lines: Vec<String> = [
            "Syntax example:",
            "```markdown",
            "![alt](path/to/your_figure.png)",
            "```",
            "![remote](https://x/y.png)",
        ]
        .iter()
        .map(|l| l.to_string())
        .collect();

        let out = rewrite_image_lines(&lines, &mut ctx, None).await;
        assert_eq!(out, lines);
        assert_eq!(ctx.stats.images, 0);
        assert_eq!(ctx.stats.failed(), 0);
    }

    #[tokio::test]
    async fn lines_without_images_are_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let work = WorkDir::new(&dir.path().join("doc.md"), false).unwrap();
        let mut sink = NumberingSink::default();
        let mut ctx = RenderContext::new(FoldingMode::Auto, dir.path().into(), &work, &mut sink);
        let line = "[link](page.md) and text";
        assert_eq!(rewrite_images(line, &mut ctx, None).await, line);
        assert_eq!(ctx.stats.images, 0);
    }
}
