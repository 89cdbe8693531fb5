//! Image assets: decoding, hashing, the per-run work directory and the
//! [`ImageSink`] seam that turns bytes into a URL.
//!
//! ## Why a work directory next to the input?
//!
//! Both upload APIs take a file, not a byte buffer. Embedded images are
//! therefore written to a `TempDir` created beside the input document
//! (same file system, easy to find with `--keep-workdir`). The directory is
//! removed when [`WorkDir`] is dropped unless it was asked to be kept.

use crate::error::ImageError;
use async_trait::async_trait;
use base64::Engine;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// One image's bytes plus the digest used as its dedup key.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub bytes: Vec<u8>,
    pub hash: blake3::Hash,
    /// Extension without the dot (`png`, `jpeg`, ...).
    pub extension: String,
    /// The file the bytes already live in, when they came from disk.
    pub path: Option<PathBuf>,
}

impl ImageAsset {
    pub fn from_bytes(bytes: Vec<u8>, extension: &str) -> Self {
        let hash = blake3::hash(&bytes);
        Self {
            bytes,
            hash,
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
            path: None,
        }
    }

    /// Decode a base64 payload as stored in notebooks (may contain newlines).
    pub fn from_base64(payload: &str, extension: &str) -> Result<Self, base64::DecodeError> {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = base64::engine::general_purpose::STANDARD.decode(compact)?;
        Ok(Self::from_bytes(bytes, extension))
    }

    /// Read an image from disk; the hash covers the file contents.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bin".to_string());
        let mut asset = Self::from_bytes(bytes, &extension);
        asset.path = Some(path.to_path_buf());
        Ok(asset)
    }

    /// Hex digest stored in the hashdict.
    pub fn digest(&self) -> String {
        self.hash.to_hex().to_string()
    }

    /// Deterministic file name for the work directory.
    pub fn file_name(&self) -> String {
        format!("{}.{}", &self.digest()[..16], self.extension)
    }

    /// `data:` URI used as a last-resort inline fallback.
    pub fn to_data_uri(&self, mime: &str) -> String {
        format!(
            "data:{};base64,{}",
            mime,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

// ── Work directory ───────────────────────────────────────────────────────────

/// Scratch directory for extracted images and intermediate files.
pub struct WorkDir {
    dir: Option<TempDir>,
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    /// Create `<parent>/<name>.XXXXXX/` beside `near_input`.
    pub fn new(near_input: &Path, keep: bool) -> std::io::Result<Self> {
        let parent = match near_input.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let prefix = near_input
            .file_name()
            .map(|n| format!("{}.", n.to_string_lossy()))
            .unwrap_or_else(|| "esapub.".to_string());
        let dir = tempfile::Builder::new().prefix(&prefix).tempdir_in(&parent)?;
        let path = dir.path().to_path_buf();
        debug!("Work directory: {}", path.display());
        Ok(Self {
            dir: Some(dir),
            path,
            keep,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode a base64 payload and write it into the work directory.
    pub fn extract(&self, payload: &str, extension: &str) -> Result<ImageAsset, ImageError> {
        let asset = ImageAsset::from_base64(payload, extension).map_err(|e| ImageError::Decode {
            reference: format!("embedded .{extension}"),
            detail: e.to_string(),
        })?;
        let path = self.write_asset(&asset)?;
        Ok(ImageAsset {
            path: Some(path),
            ..asset
        })
    }

    /// Return a path holding the asset's bytes, writing one if needed.
    pub fn materialize(&self, asset: &ImageAsset) -> Result<PathBuf, ImageError> {
        match &asset.path {
            Some(path) if path.exists() => Ok(path.clone()),
            _ => self.write_asset(asset),
        }
    }

    fn write_asset(&self, asset: &ImageAsset) -> Result<PathBuf, ImageError> {
        let path = self.path.join(asset.file_name());
        if !path.exists() {
            std::fs::write(&path, &asset.bytes).map_err(|e| ImageError::UploadFailed {
                reference: path.display().to_string(),
                detail: format!("could not write work file: {e}"),
            })?;
        }
        Ok(path)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if !self.keep {
            return;
        }
        if let Some(dir) = self.dir.take() {
            let kept = dir.keep();
            info!("Keeping work directory {}", kept.display());
        }
    }
}

// ── References ───────────────────────────────────────────────────────────────

/// What an image target in markdown points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Already a URL (or data URI); left untouched.
    Remote,
    /// `attachment:NAME` inside a markdown cell.
    Attachment(String),
    /// An existing file, resolved against the document directory.
    Local(PathBuf),
    /// A relative path that does not exist.
    NotFound(PathBuf),
}

/// Classify a markdown image target.
pub fn classify(target: &str, root: &Path) -> ImageRef {
    let lower = target.to_ascii_lowercase();
    if lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with("data:")
        || target.starts_with("//")
    {
        return ImageRef::Remote;
    }
    if let Some(name) = target.strip_prefix("attachment:") {
        return ImageRef::Attachment(name.to_string());
    }

    let decoded = urlencoding::decode(target)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| target.to_string());
    let candidate = Path::new(&decoded);
    let path = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    if path.is_file() {
        ImageRef::Local(path)
    } else {
        ImageRef::NotFound(path)
    }
}

/// Extension for a MIME type the renderer extracts.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpeg"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

// ── Sinks ────────────────────────────────────────────────────────────────────

/// Where an image ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub url: String,
    /// `true` when no upload happened (digest already known).
    pub reused: bool,
}

/// Turns image bytes into a URL usable in the rendered markdown.
///
/// The publish path uploads (with dedup); the `convert` path copies files
/// next to the exported markdown.
#[async_trait]
pub trait ImageSink: Send {
    async fn store(&mut self, asset: &ImageAsset, reference: &str)
        -> Result<StoredImage, ImageError>;
}

/// Sink for local export: writes images into a `<stem>_files/` directory.
pub struct LocalExport {
    dir: PathBuf,
    link_prefix: String,
}

impl LocalExport {
    /// `output` is the markdown file being written.
    pub fn for_output(output: &Path) -> Self {
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let folder = format!("{stem}_files");
        let dir = output
            .parent()
            .map(|p| p.join(&folder))
            .unwrap_or_else(|| PathBuf::from(&folder));
        Self {
            dir,
            link_prefix: urlencoding::encode(&folder).into_owned(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ImageSink for LocalExport {
    async fn store(
        &mut self,
        asset: &ImageAsset,
        reference: &str,
    ) -> Result<StoredImage, ImageError> {
        let name = asset.file_name();
        let target = self.dir.join(&name);
        let fail = |e: std::io::Error| ImageError::UploadFailed {
            reference: reference.to_string(),
            detail: e.to_string(),
        };
        let reused = target.exists();
        if !reused {
            std::fs::create_dir_all(&self.dir).map_err(fail)?;
            std::fs::write(&target, &asset.bytes).map_err(fail)?;
        }
        if reused {
            debug!("{} already exported", name);
        }
        Ok(StoredImage {
            url: format!("{}/{}", self.link_prefix, name),
            reused,
        })
    }
}

/// Log one image failure in a uniform way.
pub(crate) fn warn_image_failure(err: &ImageError) {
    warn!("{}", err);
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_1X1: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

    #[test]
    fn base64_with_newlines_decodes() {
        let wrapped = format!("{}\n{}\n", &PNG_1X1[..20], &PNG_1X1[20..]);
        let a = ImageAsset::from_base64(&wrapped, "png").unwrap();
        let b = ImageAsset::from_base64(PNG_1X1, "png").unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(&a.bytes[1..4], b"PNG");
    }

    #[test]
    fn invalid_base64_is_an_error() {
        assert!(ImageAsset::from_base64("!!not base64!!", "png").is_err());
    }

    #[test]
    fn same_bytes_same_digest() {
        let a = ImageAsset::from_bytes(vec![1, 2, 3], "png");
        let b = ImageAsset::from_bytes(vec![1, 2, 3], ".PNG");
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
        assert_eq!(b.extension, "png");
        assert_eq!(a.file_name(), b.file_name());
    }

    #[test]
    fn data_uri_roundtrips_bytes() {
        let a = ImageAsset::from_base64(PNG_1X1, "png").unwrap();
        assert_eq!(a.to_data_uri("image/png"), format!("data:image/png;base64,{PNG_1X1}"));
    }

    #[test]
    fn classify_targets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("my fig.png"), b"x").unwrap();

        assert_eq!(classify("https://x/y.png", dir.path()), ImageRef::Remote);
        assert_eq!(classify("data:image/png;base64,AA", dir.path()), ImageRef::Remote);
        assert_eq!(
            classify("attachment:a.png", dir.path()),
            ImageRef::Attachment("a.png".into())
        );
        assert_eq!(
            classify("my%20fig.png", dir.path()),
            ImageRef::Local(dir.path().join("my fig.png"))
        );
        assert_eq!(
            classify("missing.png", dir.path()),
            ImageRef::NotFound(dir.path().join("missing.png"))
        );
    }

    #[test]
    fn workdir_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("nb.ipynb");
        let work = WorkDir::new(&input, false).unwrap();
        let path = work.path().to_path_buf();
        assert!(path.exists());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("nb.ipynb."));
        drop(work);
        assert!(!path.exists());
    }

    #[test]
    fn workdir_can_be_kept() {
        let dir = tempfile::tempdir().unwrap();
        let work = WorkDir::new(&dir.path().join("nb.ipynb"), true).unwrap();
        let path = work.path().to_path_buf();
        drop(work);
        assert!(path.exists());
    }

    #[test]
    fn extract_writes_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let work = WorkDir::new(&dir.path().join("nb.ipynb"), false).unwrap();
        let a = work.extract(PNG_1X1, "png").unwrap();
        let b = work.extract(PNG_1X1, "png").unwrap();
        assert_eq!(a.path, b.path);
        assert!(a.path.as_ref().unwrap().exists());
    }

    #[tokio::test]
    async fn local_export_writes_into_files_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = LocalExport::for_output(&dir.path().join("my note.md"));
        let asset = ImageAsset::from_bytes(vec![9, 9, 9], "png");

        let first = sink.store(&asset, "x").await.unwrap();
        let second = sink.store(&asset, "x").await.unwrap();

        assert!(!first.reused);
        assert!(second.reused);
        assert!(first.url.starts_with("my%20note_files/"));
        assert!(sink.dir().join(asset.file_name()).exists());
    }
}
