//! Typed model of a Jupyter notebook (nbformat 4).
//!
//! Cells and outputs are closed enums dispatched on `cell_type` /
//! `output_type`; an unknown tag is a parse error rather than something the
//! renderer silently skips. Every field this crate does not interpret is kept
//! in a flattened map so a notebook survives load → save without losing
//! anything (key order included, via `serde_json`'s `preserve_order`).
//!
//! The tool's own bookkeeping lives under `metadata.esapub` and is only ever
//! touched through [`Notebook::esa_metadata`] / [`Notebook::set_esa_metadata`].

use crate::error::EsaPubError;
use crate::pipeline::dedup::HashDict;
use crate::remote::{strip_body_fields, PostId, PublishedPost};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, warn};

/// Reserved key in the notebook metadata.
pub const METADATA_NAMESPACE: &str = "esapub";

/// The only nbformat major version the renderer is written against.
pub const SUPPORTED_NBFORMAT: u64 = 4;

/// A MIME type → payload mapping (`data` of rich outputs, cell attachments).
pub type MimeBundle = Map<String, Value>;

/// Text stored either as one string or as a list of lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MultilineString {
    Single(String),
    Lines(Vec<String>),
}

impl Default for MultilineString {
    fn default() -> Self {
        MultilineString::Lines(Vec::new())
    }
}

impl MultilineString {
    /// The full text.
    pub fn text(&self) -> String {
        match self {
            MultilineString::Single(s) => s.clone(),
            MultilineString::Lines(lines) => lines.concat(),
        }
    }

    /// The text split into lines, without line terminators.
    pub fn lines(&self) -> Vec<String> {
        self.text().lines().map(str::to_string).collect()
    }

    /// `true` when there is nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        match self {
            MultilineString::Single(s) => s.trim().is_empty(),
            MultilineString::Lines(lines) => lines.iter().all(|l| l.trim().is_empty()),
        }
    }
}

/// Read a text payload out of a MIME bundle (string or list of strings).
pub fn mime_text(bundle: &MimeBundle, mime: &str) -> Option<String> {
    match bundle.get(mime)? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .concat(),
        ),
        _ => None,
    }
}

// ── Document ─────────────────────────────────────────────────────────────

/// A whole notebook document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub nbformat: u64,
    #[serde(default)]
    pub nbformat_minor: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Notebook {
    /// Parse notebook JSON.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Load a notebook from disk, warning (not failing) on a version mismatch.
    pub fn load(path: &Path) -> Result<Self, EsaPubError> {
        if !path.exists() {
            return Err(EsaPubError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|e| EsaPubError::io(path, e))?;
        let notebook = Self::from_json(&text).map_err(|e| EsaPubError::InvalidNotebook {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

        if notebook.nbformat != SUPPORTED_NBFORMAT {
            warn!(
                "{} declares nbformat {}.{}, expected {}.x; continuing anyway",
                path.display(),
                notebook.nbformat,
                notebook.nbformat_minor,
                SUPPORTED_NBFORMAT
            );
        }
        debug!("Loaded notebook with {} cells", notebook.cells.len());
        Ok(notebook)
    }

    /// Serialise the way Jupyter does: one-space indent, trailing newline.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        let mut text = String::from_utf8_lossy(&buf).into_owned();
        text.push('\n');
        Ok(text)
    }

    /// Write the notebook atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<(), EsaPubError> {
        let text = self
            .to_json()
            .map_err(|e| EsaPubError::Internal(format!("notebook serialisation: {e}")))?;
        write_atomic(path, text.as_bytes())
    }

    /// Kernel language used as the fence language of code cells.
    pub fn language(&self) -> String {
        let from = |pointer: &str| {
            Value::Object(self.metadata.clone())
                .pointer(pointer)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        from("/kernelspec/language")
            .or_else(|| from("/language_info/name"))
            .unwrap_or_else(|| "python".to_string())
    }

    /// Read the tool's metadata, defaulting everything that is absent.
    ///
    /// This is the single place where first-run initialisation happens:
    /// a missing namespace yields `post_info.number = None` and an empty
    /// hashdict.
    pub fn esa_metadata(&self) -> Result<EsaMetadata, serde_json::Error> {
        match self.metadata.get(METADATA_NAMESPACE) {
            None | Some(Value::Null) => Ok(EsaMetadata::default()),
            Some(value) => serde_json::from_value(value.clone()),
        }
    }

    /// Store the tool's metadata back into the document.
    pub fn set_esa_metadata(&mut self, meta: &EsaMetadata) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(meta)?;
        self.metadata.insert(METADATA_NAMESPACE.to_string(), value);
        Ok(())
    }

    /// Drop the tool's metadata. Returns `false` if there was none.
    pub fn reset_esa_metadata(&mut self) -> bool {
        self.metadata.shift_remove(METADATA_NAMESPACE).is_some()
    }
}

/// Write `bytes` to `<path>.tmp` and rename it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), EsaPubError> {
    let write_err = |source| EsaPubError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);
    std::fs::write(&tmp_path, bytes).map_err(write_err)?;
    std::fs::rename(&tmp_path, path).map_err(write_err)
}

// ── Cells ────────────────────────────────────────────────────────────────

/// One notebook cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub enum Cell {
    Raw(RawCell),
    Markdown(MarkdownCell),
    Code(CodeCell),
}

impl Cell {
    pub fn kind(&self) -> &'static str {
        match self {
            Cell::Raw(_) => "raw",
            Cell::Markdown(_) => "markdown",
            Cell::Code(_) => "code",
        }
    }

    pub fn metadata(&self) -> &CellMetadata {
        match self {
            Cell::Raw(c) => &c.metadata,
            Cell::Markdown(c) => &c.metadata,
            Cell::Code(c) => &c.metadata,
        }
    }

    pub fn source(&self) -> &MultilineString {
        match self {
            Cell::Raw(c) => &c.source,
            Cell::Markdown(c) => &c.source,
            Cell::Code(c) => &c.source,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCell {
    #[serde(default)]
    pub metadata: CellMetadata,
    #[serde(default)]
    pub source: MultilineString,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkdownCell {
    /// Images pasted into the cell, keyed by file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Map<String, Value>>,
    #[serde(default)]
    pub metadata: CellMetadata,
    #[serde(default)]
    pub source: MultilineString,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MarkdownCell {
    /// MIME bundle of the attachment called `name`.
    pub fn attachment(&self, name: &str) -> Option<MimeBundle> {
        self.attachments
            .as_ref()?
            .get(name)?
            .as_object()
            .cloned()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeCell {
    #[serde(default)]
    pub execution_count: Option<u64>,
    #[serde(default)]
    pub metadata: CellMetadata,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub source: MultilineString,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-cell metadata with the folding hints the renderer reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jupyter: Option<JupyterCellMetadata>,
    /// `true`, `false` or `"auto"` in the wild.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrolled: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JupyterCellMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hidden: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs_hidden: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CellMetadata {
    pub fn source_hidden(&self) -> bool {
        self.jupyter
            .as_ref()
            .and_then(|j| j.source_hidden)
            .unwrap_or(false)
    }

    /// JupyterLab's `outputs_hidden`, or the classic notebook's `collapsed`.
    pub fn outputs_hidden(&self) -> bool {
        self.jupyter
            .as_ref()
            .and_then(|j| j.outputs_hidden)
            .unwrap_or(false)
            || self.extra.get("collapsed") == Some(&Value::Bool(true))
    }

    /// Only an explicit `true` counts; `"auto"` leaves the height alone.
    pub fn scrolled(&self) -> bool {
        self.scrolled == Some(Value::Bool(true))
    }
}

// ── Outputs ──────────────────────────────────────────────────────────────

/// One output of a code cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    Stream(StreamOutput),
    ExecuteResult(RichOutput),
    DisplayData(RichOutput),
    Error(ErrorOutput),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamOutput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub text: MultilineString,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `execute_result` and `display_data` share this shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RichOutput {
    #[serde(default)]
    pub data: MimeBundle,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorOutput {
    #[serde(default)]
    pub ename: String,
    #[serde(default)]
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── Tool metadata ────────────────────────────────────────────────────────

/// Contents of `metadata.esapub`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EsaMetadata {
    #[serde(default)]
    pub post_info: PostInfo,
    #[serde(default)]
    pub hashdict: HashDict,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Remote identity of the published post plus the last server record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostInfo {
    /// `None` means the notebook has never been published.
    #[serde(default)]
    pub number: Option<PostId>,
    #[serde(flatten)]
    pub record: Map<String, Value>,
}

impl PostInfo {
    /// Build from a server response, dropping the body fields.
    pub fn from_published(post: &PublishedPost) -> Self {
        let mut record = post.record.clone();
        strip_body_fields(&mut record);
        record.shift_remove("number");
        Self {
            number: Some(post.id.clone()),
            record,
        }
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.record.get(key).and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.str_field("name")
    }

    pub fn category(&self) -> Option<&str> {
        self.str_field("category")
    }

    pub fn url(&self) -> Option<&str> {
        self.str_field("url")
    }

    pub fn wip(&self) -> Option<bool> {
        self.record.get("wip").and_then(Value::as_bool)
    }

    pub fn tags(&self) -> Option<Vec<String>> {
        let tags = self.record.get("tags")?.as_array()?;
        Some(
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r##"{
 "cells": [
  {
   "cell_type": "markdown",
   "id": "m1",
   "metadata": {"jupyter": {"source_hidden": true}},
   "source": ["# Title\n", "text"]
  },
  {
   "cell_type": "code",
   "execution_count": 3,
   "metadata": {"scrolled": true, "collapsed": true},
   "outputs": [
    {"name": "stdout", "output_type": "stream", "text": "hi\n"},
    {"data": {"text/plain": ["4"]}, "execution_count": 3, "metadata": {}, "output_type": "execute_result"}
   ],
   "source": "2 + 2"
  }
 ],
 "metadata": {"kernelspec": {"language": "julia", "name": "julia-1.9"}},
 "nbformat": 4,
 "nbformat_minor": 5
}"##;

    #[test]
    fn parses_cells_and_hints() {
        let nb = Notebook::from_json(SAMPLE).unwrap();
        assert_eq!(nb.cells.len(), 2);
        assert_eq!(nb.language(), "julia");

        let Cell::Markdown(md) = &nb.cells[0] else {
            panic!("expected markdown cell")
        };
        assert!(md.metadata.source_hidden());
        assert_eq!(md.source.lines(), vec!["# Title", "text"]);
        assert_eq!(md.extra.get("id"), Some(&json!("m1")));

        let Cell::Code(code) = &nb.cells[1] else {
            panic!("expected code cell")
        };
        assert_eq!(code.execution_count, Some(3));
        assert!(code.metadata.scrolled());
        assert!(code.metadata.outputs_hidden());
        assert!(matches!(code.outputs[0], Output::Stream(_)));
        assert!(matches!(code.outputs[1], Output::ExecuteResult(_)));
    }

    #[test]
    fn unknown_cell_type_is_an_error() {
        let text = r#"{"cells": [{"cell_type": "heading", "source": ""}], "metadata": {}, "nbformat": 4, "nbformat_minor": 0}"#;
        assert!(Notebook::from_json(text).is_err());
    }

    #[test]
    fn unknown_output_type_is_an_error() {
        let text = r#"{"cells": [{"cell_type": "code", "metadata": {}, "source": "", "outputs": [{"output_type": "pyout"}]}], "metadata": {}, "nbformat": 4, "nbformat_minor": 0}"#;
        assert!(Notebook::from_json(text).is_err());
    }

    #[test]
    fn round_trip_preserves_unknown_fields() {
        let nb = Notebook::from_json(SAMPLE).unwrap();
        let again: Value = serde_json::from_str(&nb.to_json().unwrap()).unwrap();
        let original: Value = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(again, original);
    }

    #[test]
    fn missing_namespace_initialises_defaults() {
        let nb = Notebook::from_json(SAMPLE).unwrap();
        let meta = nb.esa_metadata().unwrap();
        assert!(meta.post_info.number.is_none());
        assert!(meta.hashdict.is_empty());
    }

    #[test]
    fn metadata_round_trips_through_namespace() {
        let mut nb = Notebook::from_json(SAMPLE).unwrap();
        let mut meta = EsaMetadata::default();
        meta.post_info.number = Some(PostId::Number(42));
        meta.hashdict.insert("abc".into(), "https://img/1.png".into());
        nb.set_esa_metadata(&meta).unwrap();

        let stored = nb.metadata.get(METADATA_NAMESPACE).unwrap();
        assert_eq!(stored.pointer("/post_info/number"), Some(&json!(42)));
        assert_eq!(
            stored.pointer("/hashdict/abc"),
            Some(&json!("https://img/1.png"))
        );

        let back = nb.esa_metadata().unwrap();
        assert_eq!(back.post_info.number, Some(PostId::Number(42)));
        assert!(nb.reset_esa_metadata());
        assert!(!nb.reset_esa_metadata());
    }

    #[test]
    fn post_info_from_published_strips_bodies() {
        let record = json!({
            "number": 7,
            "name": "Notes",
            "tags": ["a", "b"],
            "wip": false,
            "body_md": "# huge",
            "body_html": "<h1>huge</h1>",
            "url": "https://team.esa.io/posts/7"
        })
        .as_object()
        .cloned()
        .unwrap();
        let post = PublishedPost {
            url: "https://team.esa.io/posts/7".into(),
            id: PostId::Number(7),
            record,
        };
        let info = PostInfo::from_published(&post);
        assert_eq!(info.number, Some(PostId::Number(7)));
        assert_eq!(info.name(), Some("Notes"));
        assert_eq!(info.tags(), Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(info.wip(), Some(false));
        assert!(!info.record.contains_key("body_md"));
        assert!(!info.record.contains_key("number"));
    }

    #[test]
    fn blank_sources() {
        assert!(MultilineString::default().is_blank());
        assert!(MultilineString::Single("  \n".into()).is_blank());
        assert!(!MultilineString::Lines(vec!["x".into()]).is_blank());
    }

    #[test]
    fn save_is_atomic_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nb.ipynb");
        let nb = Notebook::from_json(SAMPLE).unwrap();
        nb.save(&path).unwrap();
        assert!(!dir.path().join("nb.ipynb.tmp").exists());
        let loaded = Notebook::load(&path).unwrap();
        assert_eq!(loaded.cells.len(), 2);
        assert!(std::fs::read_to_string(&path).unwrap().ends_with("}\n"));
    }
}
