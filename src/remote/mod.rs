//! Remote publishing backends.
//!
//! The conversion core only needs four operations from a knowledge-base
//! service, captured by the [`Publisher`] trait:
//!
//! | Operation | esa.io | Growi |
//! |-----------|--------|-------|
//! | upload binary → URL | attachment policy + S3 form upload | `attachments.add` |
//! | create post | `POST /posts` | `POST /_api/v3/pages/` |
//! | patch post | `PATCH /posts/{number}` | `pages.update` |
//! | get post | `GET /posts/{number}` | `pages.get` |
//!
//! Every call is attempted exactly once. There is no retry loop here: the
//! services do not document idempotency for uploads, and a duplicated post is
//! worse than a clear error.

pub mod esa;
pub mod growi;

use crate::config::{Credentials, RemoteConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use esa::EsaClient;
pub use growi::GrowiClient;

/// Errors raised by a remote call.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Binary upload failed at the metadata or the transfer stage.
    #[error("upload of '{path}' failed at {stage}: {detail}")]
    Upload {
        path: PathBuf,
        stage: &'static str,
        detail: String,
    },

    /// Creating or patching a post returned a non-2xx status.
    #[error("publishing failed: {detail}")]
    Publish { detail: String },

    /// The referenced post no longer exists.
    #[error("post {id} was not found")]
    NotFound { id: String },

    /// Growi refused to create a page whose path already exists.
    #[error("page path '{path}' already exists; retry with a different title")]
    Conflict { path: String },

    /// Transport-level failure (DNS, TLS, timeout, ...).
    #[error("HTTP request to '{url}' failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// A 2xx response whose body did not have the expected shape.
    #[error("unexpected response from '{url}': {detail}")]
    UnexpectedResponse { url: String, detail: String },
}

impl RemoteError {
    pub(crate) fn http(url: &str, source: reqwest::Error) -> Self {
        RemoteError::Http {
            url: url.to_string(),
            source,
        }
    }
}

/// Remote identity of a post: a number on esa.io, a page id on Growi.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PostId {
    Number(u64),
    Page(String),
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostId::Number(n) => write!(f, "{n}"),
            PostId::Page(id) => f.write_str(id),
        }
    }
}

impl From<u64> for PostId {
    fn from(n: u64) -> Self {
        PostId::Number(n)
    }
}

/// Everything needed to create or patch a post.
///
/// `None` fields are left untouched on update.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PostDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wip: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub body_md: String,
}

/// A post as returned by the server after create/patch.
#[derive(Debug, Clone)]
pub struct PublishedPost {
    /// Browser URL of the post.
    pub url: String,
    /// Remote identity to persist for the next run.
    pub id: PostId,
    /// Full server record (body fields included; strip before persisting).
    pub record: Map<String, Value>,
}

/// Record fields that carry the whole post body and are never persisted.
pub const BODY_FIELDS: &[&str] = &["body_md", "body_html", "body"];

/// Remove large body fields from a server record, including nested revisions.
pub fn strip_body_fields(record: &mut Map<String, Value>) {
    for key in BODY_FIELDS {
        record.remove(*key);
    }
    if let Some(Value::Object(revision)) = record.get_mut("revision") {
        for key in BODY_FIELDS {
            revision.remove(*key);
        }
    }
}

/// Knowledge-base service the core publishes to.
///
/// Implementations must be `Send + Sync` so a `&dyn Publisher` can be held
/// across `.await` points on the multi-threaded tokio runtime, even though
/// the orchestrator only ever issues one call at a time.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Short backend name used in log lines.
    fn name(&self) -> &'static str;

    /// Upload a local file and return its public URL.
    async fn upload_binary(&self, path: &Path) -> Result<String, RemoteError>;

    /// Create a new post.
    async fn create_post(&self, draft: &PostDraft) -> Result<PublishedPost, RemoteError>;

    /// Patch an existing post. Returns [`RemoteError::NotFound`] when it is gone.
    async fn patch_post(&self, id: &PostId, draft: &PostDraft)
        -> Result<PublishedPost, RemoteError>;

    /// Fetch the current server record of a post.
    async fn get_post(&self, id: &PostId) -> Result<Map<String, Value>, RemoteError>;
}

/// Build the publisher matching the resolved credentials.
pub fn connect(
    remote: &RemoteConfig,
    timeout_secs: u64,
) -> Result<Box<dyn Publisher>, RemoteError> {
    let proxy = remote.proxy.as_deref();
    match &remote.credentials {
        Credentials::Esa { team, token } => Ok(Box::new(EsaClient::new(
            team.as_str(),
            token.as_str(),
            proxy,
            timeout_secs,
        )?)),
        Credentials::Growi {
            url,
            token,
            username,
        } => Ok(Box::new(GrowiClient::new(
            url.as_str(),
            token.as_str(),
            username.as_str(),
            proxy,
            timeout_secs,
        )?)),
    }
}

/// Build the shared HTTP client, honouring an optional proxy.
pub(crate) fn http_client(
    proxy: Option<&str>,
    timeout_secs: u64,
) -> Result<reqwest::Client, RemoteError> {
    let mut builder =
        reqwest::Client::builder().timeout(std::time::Duration::from_secs(timeout_secs));
    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy).map_err(|e| RemoteError::http(proxy, e))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| RemoteError::http("<client>", e))
}

/// Guess the MIME type of an upload from its extension.
pub(crate) fn mime_of(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.bin".to_string())
}
