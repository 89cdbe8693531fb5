//! Error types for the esapub library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`EsaPubError`] — **Fatal**: the run cannot proceed at all (missing
//!   credentials, unsupported input, unreadable notebook, the post could not
//!   be created). Returned as `Err(EsaPubError)` from the top-level entry
//!   points.
//!
//! * [`ImageError`] — **Non-fatal**: a single image could not be resolved
//!   (missing file, failed upload) but the rest of the document is fine.
//!   Collected in [`crate::output::RenderStats`] and annotated in the
//!   rendered markdown so the run keeps going.
//!
//! Whether image failures turn fatal at publish time is decided by
//! [`crate::config::PublishMode`].

use crate::remote::RemoteError;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the esapub library.
#[derive(Debug, Error)]
pub enum EsaPubError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// The input file extension is not one of `.ipynb`, `.md`, `.tex`.
    #[error("Unsupported input '{path}' (extension {extension:?})\nSupported formats are .ipynb, .md and .tex.")]
    UnsupportedInput { path: PathBuf, extension: String },

    /// No access token / team could be found anywhere.
    #[error("Access credentials were not found.\n{hint}")]
    CredentialsNotFound { hint: String },

    /// Builder validation or rc file parsing failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// The notebook JSON could not be parsed or has an unknown cell/output type.
    #[error("Notebook '{path}' is invalid: {detail}")]
    InvalidNotebook { path: PathBuf, detail: String },

    /// An external converter (pandoc) failed or is not installed.
    #[error("Converter '{program}' failed: {detail}")]
    ConverterFailed { program: String, detail: String },

    // ── Remote errors ─────────────────────────────────────────────────────
    /// A post-level remote call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Publishing was refused because some images could not be resolved.
    ///
    /// Only returned in [`crate::config::PublishMode::Check`].
    #[error("{failed}/{total} images failed; refusing to publish (use --publish-mode force to publish anyway)")]
    ImagesFailed { failed: usize, total: usize },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not write the notebook or markdown output.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other file-system failure.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EsaPubError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EsaPubError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single image reference.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ImageError {
    /// A relative image path does not exist on disk.
    #[error("image file not found: '{path}'")]
    NotFound { path: PathBuf },

    /// The remote service rejected the upload.
    #[error("upload of '{reference}' failed: {detail}")]
    UploadFailed { reference: String, detail: String },

    /// An embedded payload was not valid base64.
    #[error("could not decode embedded image '{reference}': {detail}")]
    Decode { reference: String, detail: String },

    /// `attachment:NAME` points at an attachment the cell does not carry.
    #[error("cell has no attachment named '{name}'")]
    MissingAttachment { name: String },
}

impl ImageError {
    /// Short annotation appended after the original reference in the markdown.
    pub fn annotation(&self) -> &'static str {
        match self {
            ImageError::NotFound { .. } | ImageError::MissingAttachment { .. } => {
                " (file not found)"
            }
            ImageError::UploadFailed { .. } | ImageError::Decode { .. } => " (upload failed)",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_failed_display() {
        let e = EsaPubError::ImagesFailed { failed: 1, total: 4 };
        let msg = e.to_string();
        assert!(msg.contains("1/4"), "got: {msg}");
        assert!(msg.contains("--publish-mode force"));
    }

    #[test]
    fn unsupported_input_display() {
        let e = EsaPubError::UnsupportedInput {
            path: PathBuf::from("slides.pptx"),
            extension: ".pptx".into(),
        };
        assert!(e.to_string().contains("slides.pptx"));
        assert!(e.to_string().contains(".ipynb"));
    }

    #[test]
    fn remote_error_is_transparent() {
        let e: EsaPubError = RemoteError::NotFound { id: "42".into() }.into();
        assert_eq!(e.to_string(), "post 42 was not found");
    }

    #[test]
    fn annotations_distinguish_missing_from_failed() {
        let missing = ImageError::NotFound {
            path: PathBuf::from("fig.png"),
        };
        let failed = ImageError::UploadFailed {
            reference: "fig.png".into(),
            detail: "HTTP 500".into(),
        };
        assert_eq!(missing.annotation(), " (file not found)");
        assert_eq!(failed.annotation(), " (upload failed)");
    }
}
