//! Code-cell output rendering.
//!
//! Each [`Output`] variant has exactly one renderer. Rich outputs pick the
//! best MIME representation in a fixed preference order; images go through
//! the work directory and the image sink like any other image.

use super::cell::{fence, RenderContext};
use super::image::extension_for_mime;
use crate::notebook::{mime_text, ErrorOutput, MimeBundle, Output, StreamOutput};
use once_cell::sync::Lazy;
use regex::Regex;

/// CSI escape sequences (colours, cursor movement) as emitted by IPython.
static ANSI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap());

/// Image MIME types extracted from `display_data`, in preference order.
const IMAGE_MIMES: &[&str] = &["image/png", "image/jpeg"];

pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}

/// Render one output. `None` means it has nothing printable.
pub async fn render_output(output: &Output, ctx: &mut RenderContext<'_>) -> Option<String> {
    match output {
        Output::Stream(stream) => render_stream(stream),
        Output::ExecuteResult(rich) => render_rich(&rich.data),
        Output::DisplayData(rich) => render_display(&rich.data, ctx).await,
        Output::Error(err) => Some(render_error(err)),
    }
}

fn render_stream(stream: &StreamOutput) -> Option<String> {
    let text = strip_ansi(&stream.text.text());
    if text.trim().is_empty() {
        return None;
    }
    Some(fence("", &text))
}

/// html, then markdown, then LaTeX, then plain text.
pub fn render_rich(data: &MimeBundle) -> Option<String> {
    if let Some(html) = mime_text(data, "text/html") {
        return Some(html.trim().to_string());
    }
    if let Some(md) = mime_text(data, "text/markdown") {
        return Some(md.trim().to_string());
    }
    if let Some(latex) = mime_text(data, "text/latex") {
        return Some(latex_block(&latex));
    }
    let plain = mime_text(data, "text/plain")?;
    let plain = strip_ansi(&plain);
    if plain.trim().is_empty() {
        return None;
    }
    Some(fence("", &plain))
}

/// Turn a LaTeX result into a math block.
///
/// `$$…$$`, `$…$` and `equation*` wrappers are removed; `\\` row breaks
/// become `\cr`.
pub fn latex_block(latex: &str) -> String {
    let mut body = latex.trim();
    for (open, close) in [
        (r"\begin{equation*}", r"\end{equation*}"),
        ("$$", "$$"),
        ("$", "$"),
    ] {
        if let Some(inner) = body
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
        {
            body = inner.trim();
            break;
        }
    }
    format!("```math\n{}\n```", body.replace(r"\\", r"\cr"))
}

async fn render_display(data: &MimeBundle, ctx: &mut RenderContext<'_>) -> Option<String> {
    let image = IMAGE_MIMES
        .iter()
        .find_map(|mime| Some((*mime, mime_text(data, mime)?)));
    let Some((mime, payload)) = image else {
        return render_rich(data);
    };
    let extension = extension_for_mime(mime).unwrap_or("png");
    let alt = alt_text(data);
    let reference = format!("{alt} ({mime} output)");

    let asset = match ctx.workdir.extract(&payload, extension) {
        Ok(asset) => asset,
        Err(err) => {
            ctx.image_failed(&reference, err);
            return render_rich(data);
        }
    };

    match ctx.store_asset(&asset, &reference).await {
        Ok(url) => Some(format!("![{alt}]({url})")),
        // Inline the bytes so the figure still shows up.
        Err(_) => Some(format!("![{alt}]({})", asset.to_data_uri(mime))),
    }
}

/// First line of the `text/plain` representation, without brackets.
fn alt_text(data: &MimeBundle) -> String {
    mime_text(data, "text/plain")
        .and_then(|t| t.lines().next().map(str::to_string))
        .map(|line| line.replace(['[', ']'], ""))
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .unwrap_or_else(|| "output".to_string())
}

fn render_error(err: &ErrorOutput) -> String {
    let text = if err.traceback.is_empty() {
        format!("{}: {}", err.ename, err.evalue)
    } else {
        strip_ansi(&err.traceback.join("\n"))
    };
    fence("", &text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FoldingMode;
    use crate::error::ImageError;
    use crate::pipeline::image::{ImageAsset, ImageSink, StoredImage, WorkDir};
    use async_trait::async_trait;
    use serde_json::json;

    const PNG_1X1: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

    struct FailingSink;

    #[async_trait]
    impl ImageSink for FailingSink {
        async fn store(
            &mut self,
            _asset: &ImageAsset,
            reference: &str,
        ) -> Result<StoredImage, ImageError> {
            Err(ImageError::UploadFailed {
                reference: reference.to_string(),
                detail: "HTTP 503".into(),
            })
        }
    }

    struct FixedSink;

    #[async_trait]
    impl ImageSink for FixedSink {
        async fn store(
            &mut self,
            _asset: &ImageAsset,
            _reference: &str,
        ) -> Result<StoredImage, ImageError> {
            Ok(StoredImage {
                url: "https://img.example/a.png".into(),
                reused: false,
            })
        }
    }

    fn output(value: serde_json::Value) -> Output {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn ansi_sequences_are_removed() {
        assert_eq!(strip_ansi("\x1b[0;31mError\x1b[0m: x"), "Error: x");
    }

    #[test]
    fn rich_prefers_html() {
        let data = json!({"text/html": ["<b>x</b>\n"], "text/plain": "x"});
        assert_eq!(render_rich(data.as_object().unwrap()).unwrap(), "<b>x</b>");
    }

    #[test]
    fn rich_latex_becomes_math_block() {
        let data = json!({"text/latex": "$$a \\\\ b$$", "text/plain": "x"});
        assert_eq!(
            render_rich(data.as_object().unwrap()).unwrap(),
            "```math\na \\cr b\n```"
        );
        assert_eq!(
            latex_block("\\begin{equation*}x^2\\end{equation*}"),
            "```math\nx^2\n```"
        );
    }

    #[test]
    fn rich_plain_is_fenced() {
        let data = json!({"text/plain": ["array([1, 2])"]});
        assert_eq!(
            render_rich(data.as_object().unwrap()).unwrap(),
            "```\narray([1, 2])\n```"
        );
    }

    #[test]
    fn error_traceback_is_stripped() {
        let err = ErrorOutput {
            ename: "ValueError".into(),
            evalue: "bad".into(),
            traceback: vec!["\x1b[31mValueError\x1b[0m: bad".into()],
            ..Default::default()
        };
        assert_eq!(render_error(&err), "```\nValueError: bad\n```");
        let bare = ErrorOutput {
            ename: "KeyError".into(),
            evalue: "'k'".into(),
            ..Default::default()
        };
        assert_eq!(render_error(&bare), "```\nKeyError: 'k'\n```");
    }

    #[tokio::test]
    async fn display_png_uses_uploaded_url() {
        let dir = tempfile::tempdir().unwrap();
        let work = WorkDir::new(&dir.path().join("nb.ipynb"), false).unwrap();
        let mut sink = FixedSink;
        let mut ctx = RenderContext::new(FoldingMode::Auto, dir.path().into(), &work, &mut sink);
        let out = output(json!({
            "output_type": "display_data",
            "data": {"image/png": PNG_1X1, "text/plain": ["<Figure size [640x480]>"]},
            "metadata": {}
        }));

        let md = render_output(&out, &mut ctx).await.unwrap();
        assert_eq!(md, "![<Figure size 640x480>](https://img.example/a.png)");
        assert_eq!(ctx.stats.uploaded, 1);
    }

    #[tokio::test]
    async fn failed_png_upload_falls_back_to_data_uri() {
        let dir = tempfile::tempdir().unwrap();
        let work = WorkDir::new(&dir.path().join("nb.ipynb"), false).unwrap();
        let mut sink = FailingSink;
        let mut ctx = RenderContext::new(FoldingMode::Auto, dir.path().into(), &work, &mut sink);
        let out = output(json!({
            "output_type": "display_data",
            "data": {"image/png": PNG_1X1},
            "metadata": {}
        }));

        let md = render_output(&out, &mut ctx).await.unwrap();
        assert_eq!(md, format!("![output](data:image/png;base64,{PNG_1X1})"));
        assert_eq!(ctx.stats.failed(), 1);
    }

    #[tokio::test]
    async fn display_without_image_renders_like_result() {
        let dir = tempfile::tempdir().unwrap();
        let work = WorkDir::new(&dir.path().join("nb.ipynb"), false).unwrap();
        let mut sink = FixedSink;
        let mut ctx = RenderContext::new(FoldingMode::Auto, dir.path().into(), &work, &mut sink);
        let out = output(json!({
            "output_type": "display_data",
            "data": {"text/markdown": "**hi**"},
            "metadata": {}
        }));
        assert_eq!(render_output(&out, &mut ctx).await.unwrap(), "**hi**");
        assert_eq!(ctx.stats.images, 0);
    }
}
