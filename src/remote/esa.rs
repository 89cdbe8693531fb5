//! esa.io REST API v1 client.
//!
//! Binary uploads are a two-step dance: esa first hands out an upload policy
//! (a pre-signed S3 form plus the final public URL), then the file itself is
//! POSTed to the storage endpoint as `multipart/form-data` together with the
//! policy's form fields. A failure at either step is an
//! [`RemoteError::Upload`] naming the stage.

use super::{
    file_name_of, http_client, mime_of, PostDraft, PostId, PublishedPost, Publisher, RemoteError,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::Path;
use tracing::{debug, info, warn};

/// Default API root; overridable for tests and self-hosted proxies.
pub const DEFAULT_API_ROOT: &str = "https://api.esa.io";

/// Client for one esa.io team.
#[derive(Debug, Clone)]
pub struct EsaClient {
    client: reqwest::Client,
    api_root: String,
    team: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct UploadPolicy {
    attachment: PolicyAttachment,
    #[serde(default)]
    form: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct PolicyAttachment {
    endpoint: String,
    url: String,
}

impl EsaClient {
    pub fn new(
        team: impl Into<String>,
        token: impl Into<String>,
        proxy: Option<&str>,
        timeout_secs: u64,
    ) -> Result<Self, RemoteError> {
        Ok(Self {
            client: http_client(proxy, timeout_secs)?,
            api_root: DEFAULT_API_ROOT.to_string(),
            team: team.into(),
            token: token.into(),
        })
    }

    /// Point the client at a different API root (no trailing slash).
    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = api_root.into().trim_end_matches('/').to_string();
        self
    }

    fn team_url(&self, tail: &str) -> String {
        format!("{}/v1/teams/{}/{}", self.api_root, self.team, tail)
    }

    fn number_of(id: &PostId) -> Result<u64, RemoteError> {
        match id {
            PostId::Number(n) => Ok(*n),
            PostId::Page(p) => Err(RemoteError::Publish {
                detail: format!("esa.io posts are identified by number, got page id '{p}'"),
            }),
        }
    }

    async fn send_post(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
        expected: StatusCode,
        id: Option<&PostId>,
    ) -> Result<PublishedPost, RemoteError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| RemoteError::http(url, e))?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            if let Some(id) = id {
                return Err(RemoteError::NotFound { id: id.to_string() });
            }
        }
        if status != expected {
            let body = response.text().await.unwrap_or_default();
            warn!("esa.io answered HTTP {} for {}", status, url);
            return Err(RemoteError::Publish {
                detail: format!("HTTP {status}: {body}"),
            });
        }

        let record: Map<String, Value> = response
            .json()
            .await
            .map_err(|e| RemoteError::UnexpectedResponse {
                url: url.to_string(),
                detail: e.to_string(),
            })?;
        published_from_record(url, record)
    }
}

/// Extract URL and number from an esa post record.
fn published_from_record(
    url: &str,
    record: Map<String, Value>,
) -> Result<PublishedPost, RemoteError> {
    let number = record.get("number").and_then(Value::as_u64).ok_or_else(|| {
        RemoteError::UnexpectedResponse {
            url: url.to_string(),
            detail: "post record has no `number`".into(),
        }
    })?;
    let post_url = record
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(PublishedPost {
        url: post_url,
        id: PostId::Number(number),
        record,
    })
}

#[async_trait]
impl Publisher for EsaClient {
    fn name(&self) -> &'static str {
        "esa.io"
    }

    async fn upload_binary(&self, path: &Path) -> Result<String, RemoteError> {
        let upload_err = |stage: &'static str, detail: String| RemoteError::Upload {
            path: path.to_path_buf(),
            stage,
            detail,
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| upload_err("read", e.to_string()))?;
        let name = file_name_of(path);
        let mime = mime_of(path);
        info!("Uploading {} ({} bytes) to esa.io", path.display(), bytes.len());

        // ── Step 1: obtain the upload policy ─────────────────────────────
        let policy_url = self.team_url("attachments/policies");
        let response = self
            .client
            .post(&policy_url)
            .bearer_auth(&self.token)
            .query(&[
                ("type", mime.as_str()),
                ("name", name.as_str()),
                ("size", bytes.len().to_string().as_str()),
            ])
            .send()
            .await
            .map_err(|e| upload_err("policy", e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(upload_err("policy", format!("HTTP {}", response.status())));
        }
        let policy: UploadPolicy = response
            .json()
            .await
            .map_err(|e| upload_err("policy", e.to_string()))?;
        debug!("Upload policy obtained, endpoint={}", policy.attachment.endpoint);

        // ── Step 2: transfer the file with the policy's form fields ──────
        let mut form = reqwest::multipart::Form::new();
        for (key, value) in policy.form {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            form = form.text(key, value);
        }
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(name)
            .mime_str(&mime)
            .map_err(|e| upload_err("transfer", e.to_string()))?;
        form = form.part("file", part);

        let response = self
            .client
            .post(&policy.attachment.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| upload_err("transfer", e.to_string()))?;
        if !response.status().is_success() {
            return Err(upload_err("transfer", format!("HTTP {}", response.status())));
        }

        info!("Uploaded {} → {}", path.display(), policy.attachment.url);
        Ok(policy.attachment.url)
    }

    async fn create_post(&self, draft: &PostDraft) -> Result<PublishedPost, RemoteError> {
        let url = self.team_url("posts");
        info!("Creating new esa.io post in team {}", self.team);
        let request = self.client.post(&url).json(&json!({ "post": draft }));
        self.send_post(request, &url, StatusCode::CREATED, None).await
    }

    async fn patch_post(
        &self,
        id: &PostId,
        draft: &PostDraft,
    ) -> Result<PublishedPost, RemoteError> {
        let number = Self::number_of(id)?;
        let url = self.team_url(&format!("posts/{number}"));
        info!("Updating esa.io post #{}", number);
        let request = self.client.patch(&url).json(&json!({ "post": draft }));
        self.send_post(request, &url, StatusCode::OK, Some(id)).await
    }

    async fn get_post(&self, id: &PostId) -> Result<Map<String, Value>, RemoteError> {
        let number = Self::number_of(id)?;
        let url = self.team_url(&format!("posts/{number}"));
        let request = self.client.get(&url);
        let published = self.send_post(request, &url, StatusCode::OK, Some(id)).await?;
        Ok(published.record)
    }
}
