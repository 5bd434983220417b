//! Google Cloud Storage over the JSON API.
//!
//! Uploads use the single-request `uploadType=media` endpoint, which either
//! creates the whole object or nothing. Authentication is a bearer OAuth
//! access token supplied through the credential store.

use super::ObjectStore;
use crate::error::{PipelineError, Result};
use crate::utils::truncate_for_log;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

const GCS_BASE_URL: &str = "https://storage.googleapis.com";

/// The part of the object resource we read. GCS encodes `size` as a string.
#[derive(Debug, Deserialize)]
struct ObjectResource {
    size: String,
}

impl ObjectResource {
    fn size(&self) -> Result<u64> {
        self.size.parse().map_err(|_| PipelineError::Provider {
            code: "gcs".into(),
            message: format!("unparseable object size {:?}", self.size),
        })
    }
}

pub struct GcsObjectStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
    token: String,
}

impl fmt::Debug for GcsObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcsObjectStore")
            .field("base_url", &self.base_url)
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl GcsObjectStore {
    pub fn new(bucket: String, token: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            base_url: GCS_BASE_URL.to_string(),
            bucket,
            token,
        })
    }

    fn upload_url(&self, key: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.base_url,
            urlencoding::encode(&self.bucket),
            urlencoding::encode(key)
        )
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.base_url,
            urlencoding::encode(&self.bucket),
            urlencoding::encode(key)
        )
    }

    async fn error_from(resp: reqwest::Response) -> PipelineError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        PipelineError::from_status(status, &truncate_for_log(&body, 300))
    }
}

#[cfg(test)]
impl GcsObjectStore {
    /// Point at a different endpoint, e.g. a storage emulator.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

impl ObjectStore for GcsObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(level = "debug", skip(self, body), fields(bucket = %self.bucket, bytes = body.len()))]
    async fn put(&self, key: &str, body: Bytes) -> Result<u64> {
        let resp = self
            .client
            .post(self.upload_url(key))
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/vnd.apache.parquet")
            .body(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        let object: ObjectResource = resp.json().await?;
        debug!(size = %object.size, "Upload acknowledged");
        object.size()
    }

    async fn size(&self, key: &str) -> Result<Option<u64>> {
        let resp = self
            .client
            .get(self.object_url(key))
            .bearer_auth(&self.token)
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let object: ObjectResource = resp.json().await?;
                object.size().map(Some)
            }
            _ => Err(Self::error_from(resp).await),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.object_url(key))
            .bearer_auth(&self.token)
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(()),
            s if s.is_success() => Ok(()),
            _ => Err(Self::error_from(resp).await),
        }
    }
}
