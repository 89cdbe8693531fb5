//! Content-hash deduplication in front of the upload API.
//!
//! The hashdict maps an image digest to the URL it was uploaded to. It is
//! persisted in the notebook metadata so an unchanged figure is never sent
//! twice across runs. Entries are only ever added: a recorded digest keeps
//! its first URL for the lifetime of the document.

use super::image::{ImageAsset, ImageSink, StoredImage, WorkDir};
use crate::error::ImageError;
use crate::remote::Publisher;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Digest → uploaded URL, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashDict(IndexMap<String, String>);

impl HashDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, digest: &str) -> Option<&str> {
        self.0.get(digest).map(String::as_str)
    }

    /// Record a URL for `digest`. Returns `false` (and changes nothing) if
    /// the digest is already known.
    pub fn insert(&mut self, digest: String, url: String) -> bool {
        if self.0.contains_key(&digest) {
            return false;
        }
        self.0.insert(digest, url);
        true
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// [`ImageSink`] that consults the hashdict before uploading.
pub struct DedupUploader<'a> {
    hashdict: &'a mut HashDict,
    publisher: &'a dyn Publisher,
    workdir: &'a WorkDir,
}

impl<'a> DedupUploader<'a> {
    pub fn new(hashdict: &'a mut HashDict, publisher: &'a dyn Publisher, workdir: &'a WorkDir) -> Self {
        Self {
            hashdict,
            publisher,
            workdir,
        }
    }
}

#[async_trait]
impl ImageSink for DedupUploader<'_> {
    async fn store(
        &mut self,
        asset: &ImageAsset,
        reference: &str,
    ) -> Result<StoredImage, ImageError> {
        let digest = asset.digest();
        if let Some(url) = self.hashdict.get(&digest) {
            debug!("Reusing upload for {} ({})", reference, &digest[..12]);
            return Ok(StoredImage {
                url: url.to_string(),
                reused: true,
            });
        }

        let path = self.workdir.materialize(asset)?;
        let url = self
            .publisher
            .upload_binary(&path)
            .await
            .map_err(|e| ImageError::UploadFailed {
                reference: reference.to_string(),
                detail: e.to_string(),
            })?;

        info!("Uploaded {} → {}", reference, url);
        self.hashdict.insert(digest, url.clone());
        Ok(StoredImage { url, reused: false })
    }
}
