//! Growi client (legacy `_api` endpoints plus `_api/v3/pages`).
//!
//! Growi has no notion of a free-standing attachment: every file hangs off a
//! page. Uploads are therefore attached to the user's home page
//! `/user/{username}`, and posts are created under that same prefix. Pages
//! are identified by their `_id`, so [`PostId::Page`] is used throughout.

use super::{
    file_name_of, http_client, mime_of, PostDraft, PostId, PublishedPost, Publisher, RemoteError,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info};

/// Client for one Growi instance and user.
#[derive(Debug, Clone)]
pub struct GrowiClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    username: String,
}

impl GrowiClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        username: impl Into<String>,
        proxy: Option<&str>,
        timeout_secs: u64,
    ) -> Result<Self, RemoteError> {
        Ok(Self {
            client: http_client(proxy, timeout_secs)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            username: username.into(),
        })
    }

    fn home_path(&self) -> String {
        format!("/user/{}", self.username)
    }

    fn page_url(&self, page_path: &str) -> String {
        format!("{}/{}", self.base_url, page_path.trim_start_matches('/'))
    }

    /// `GET /_api/pages.get` by either `path` or `page_id`.
    async fn fetch_page(&self, key: &str, value: &str) -> Result<Map<String, Value>, RemoteError> {
        let url = format!("{}/_api/pages.get", self.base_url);
        debug!("Getting Growi page {}={}", key, value);
        let response = self
            .client
            .get(&url)
            .query(&[("access_token", self.token.as_str()), (key, value)])
            .send()
            .await
            .map_err(|e| RemoteError::http(&url, e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound {
                id: value.to_string(),
            });
        }
        if response.status() != StatusCode::OK {
            return Err(RemoteError::Publish {
                detail: format!("getting page {value} failed: HTTP {}", response.status()),
            });
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::UnexpectedResponse {
                url: url.clone(),
                detail: e.to_string(),
            })?;
        // The legacy API answers 200 with `ok: false` for unknown pages.
        if body.get("ok") == Some(&Value::Bool(false)) {
            return Err(RemoteError::NotFound {
                id: value.to_string(),
            });
        }
        page_object(&url, &body, &["page"])
    }

    fn published(&self, url: &str, page: Map<String, Value>) -> Result<PublishedPost, RemoteError> {
        let id = page
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::UnexpectedResponse {
                url: url.to_string(),
                detail: "page has no `_id`".into(),
            })?
            .to_string();
        let path = page.get("path").and_then(Value::as_str).unwrap_or_default();
        Ok(PublishedPost {
            url: self.page_url(path),
            id: PostId::Page(id),
            record: page,
        })
    }
}

/// Walk `keys` into a JSON body and return the object found there.
fn page_object(url: &str, body: &Value, keys: &[&str]) -> Result<Map<String, Value>, RemoteError> {
    let mut cursor = body;
    for key in keys {
        cursor = cursor
            .get(key)
            .ok_or_else(|| RemoteError::UnexpectedResponse {
                url: url.to_string(),
                detail: format!("missing `{key}`"),
            })?;
    }
    cursor
        .as_object()
        .cloned()
        .ok_or_else(|| RemoteError::UnexpectedResponse {
            url: url.to_string(),
            detail: "page is not an object".into(),
        })
}

#[async_trait]
impl Publisher for GrowiClient {
    fn name(&self) -> &'static str {
        "Growi"
    }

    async fn upload_binary(&self, path: &Path) -> Result<String, RemoteError> {
        let upload_err = |stage: &'static str, detail: String| RemoteError::Upload {
            path: path.to_path_buf(),
            stage,
            detail,
        };

        let home = self
            .fetch_page("path", &self.home_path())
            .await
            .map_err(|e| upload_err("home page lookup", e.to_string()))?;
        let page_id = home
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| upload_err("home page lookup", "page has no `_id`".into()))?
            .to_string();

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| upload_err("read", e.to_string()))?;
        info!("Uploading {} ({} bytes) to Growi", path.display(), bytes.len());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name_of(path))
            .mime_str(&mime_of(path))
            .map_err(|e| upload_err("transfer", e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("page_id", page_id)
            .text("access_token", self.token.clone())
            .part("file", part);

        let url = format!("{}/_api/attachments.add", self.base_url);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| upload_err("transfer", e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(upload_err("transfer", format!("HTTP {}", response.status())));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| upload_err("transfer", e.to_string()))?;
        let image_url = body
            .pointer("/attachment/filePathProxied")
            .and_then(Value::as_str)
            .ok_or_else(|| upload_err("transfer", "response has no attachment URL".into()))?;

        info!("Uploaded {} → {}", path.display(), image_url);
        Ok(image_url.to_string())
    }

    async fn create_post(&self, draft: &PostDraft) -> Result<PublishedPost, RemoteError> {
        let name = draft.name.as_deref().ok_or_else(|| RemoteError::Publish {
            detail: "Growi pages need a title".into(),
        })?;
        let page_path = format!("{}/{}", self.home_path(), name);
        let url = format!("{}/_api/v3/pages/", self.base_url);
        info!("Creating Growi page {}", page_path);

        let response = self
            .client
            .post(&url)
            .form(&[
                ("access_token", self.token.as_str()),
                ("body", draft.body_md.as_str()),
                ("path", page_path.as_str()),
            ])
            .send()
            .await
            .map_err(|e| RemoteError::http(&url, e))?;
        match response.status() {
            StatusCode::CREATED => {}
            StatusCode::CONFLICT => return Err(RemoteError::Conflict { path: page_path }),
            status => {
                return Err(RemoteError::Publish {
                    detail: format!("creating page failed: HTTP {status}"),
                })
            }
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::UnexpectedResponse {
                url: url.clone(),
                detail: e.to_string(),
            })?;
        let page = page_object(&url, &body, &["data", "page"])?;
        self.published(&url, page)
    }

    async fn patch_post(
        &self,
        id: &PostId,
        draft: &PostDraft,
    ) -> Result<PublishedPost, RemoteError> {
        let current = self.get_post(id).await?;
        let revision_id = current
            .get("revision")
            .and_then(|r| r.get("_id"))
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::Publish {
                detail: format!("page {id} has no current revision"),
            })?
            .to_string();
        let page_id = id.to_string();
        let url = format!("{}/_api/pages.update", self.base_url);
        info!("Updating Growi page {}", page_id);

        let response = self
            .client
            .post(&url)
            .query(&[("access_token", self.token.as_str())])
            .form(&[
                ("body", draft.body_md.as_str()),
                ("page_id", page_id.as_str()),
                ("revision_id", revision_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| RemoteError::http(&url, e))?;
        if response.status() != StatusCode::OK {
            return Err(RemoteError::Publish {
                detail: format!("updating page {page_id} failed: HTTP {}", response.status()),
            });
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::UnexpectedResponse {
                url: url.clone(),
                detail: e.to_string(),
            })?;
        let page = page_object(&url, &body, &["page"])?;
        self.published(&url, page)
    }

    async fn get_post(&self, id: &PostId) -> Result<Map<String, Value>, RemoteError> {
        self.fetch_page("page_id", &id.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> GrowiClient {
        GrowiClient::new("https://wiki.example.com/", "tok", "alice", None, 5).unwrap()
    }

    #[test]
    fn page_url_avoids_double_slash() {
        assert_eq!(
            client().page_url("/user/alice/notes"),
            "https://wiki.example.com/user/alice/notes"
        );
    }

    #[test]
    fn page_object_walks_nested_keys() {
        let body = json!({"data": {"page": {"_id": "p1", "path": "/x"}}});
        let page = page_object("u", &body, &["data", "page"]).unwrap();
        assert_eq!(page.get("_id"), Some(&json!("p1")));
        assert!(page_object("u", &body, &["page"]).is_err());
    }

    #[test]
    fn published_uses_page_id() {
        let page = json!({"_id": "p1", "path": "/user/alice/notes"})
            .as_object()
            .cloned()
            .unwrap();
        let post = client().published("u", page).unwrap();
        assert_eq!(post.id, PostId::Page("p1".into()));
        assert_eq!(post.url, "https://wiki.example.com/user/alice/notes");
    }
}
