//! Stage a batch in object storage.
//!
//! Sequence for one batch:
//!
//! 1. encode to Parquet and write `<staging_dir>/<run-date>/<run-timestamp>.parquet`
//! 2. `put` to `<base-path>/<run-date>/<run-timestamp>.parquet`
//! 3. confirm the store reports the object with the encoded size
//! 4. remove the local file
//!
//! Any failure in 2–3 leaves the local file in place for manual recovery and
//! removes whatever may have landed at the final key, so the key either holds
//! the complete file or nothing.

use super::columnar::encode_records;
use crate::error::{PipelineError, Result};
use crate::models::{Batch, RunContext, StagedObject};
use crate::storage::ObjectStore;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tracing::{error, info, instrument, warn};

/// `<base-path>/<run-date>/<run-timestamp>.parquet`
pub fn staged_key(base_path: &str, run: &RunContext) -> String {
    let relative = format!("{}/{}.parquet", run.date_key(), run.timestamp_key());
    if base_path.is_empty() {
        relative
    } else {
        format!("{base_path}/{relative}")
    }
}

#[derive(Debug)]
pub struct StagingWriter<S> {
    store: S,
    base_path: String,
    staging_dir: PathBuf,
}

/// Auth failures stay fatal; everything else is a staging failure for this key.
fn as_staging_error(key: &str, err: PipelineError) -> PipelineError {
    match err {
        PipelineError::Auth(_) | PipelineError::MissingCredential(_) => err,
        other => PipelineError::staging(key, other.to_string()),
    }
}

#[cfg(test)]
impl<S> StagingWriter<S> {
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: ObjectStore> StagingWriter<S> {
    pub fn new(store: S, base_path: &str, staging_dir: &Path) -> Self {
        Self {
            store,
            base_path: base_path.trim_matches('/').to_string(),
            staging_dir: staging_dir.to_path_buf(),
        }
    }

    pub fn key_for(&self, run: &RunContext) -> String {
        staged_key(&self.base_path, run)
    }

    pub fn local_path(&self, run: &RunContext) -> PathBuf {
        self.staging_dir
            .join(run.date_key())
            .join(format!("{}.parquet", run.timestamp_key()))
    }

    /// Stage `batch`: write it locally as Parquet, upload it, confirm the size.
    ///
    /// # Arguments
    ///
    /// * `batch` - Normalized records of one run
    ///
    /// # Returns
    ///
    /// The staged object, or `None` for an empty batch, which stages nothing.
    ///
    /// # Errors
    ///
    /// `Staging` when the upload fails or the store reports a different size;
    /// the local file is kept for inspection. Auth failures pass through
    /// unchanged. Local I/O and encoding errors are returned as-is.
    #[instrument(level = "info", skip_all, fields(run_date = %batch.run.run_date, rows = batch.len()))]
    pub async fn stage(&self, batch: &Batch) -> Result<Option<StagedObject>> {
        if batch.is_empty() {
            warn!("Batch is empty; nothing to stage");
            return Ok(None);
        }
        let t0 = Instant::now();
        let key = self.key_for(&batch.run);
        let local = self.local_path(&batch.run);

        let body = encode_records(&batch.records)?;
        let expected = body.len() as u64;
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&local, &body).await?;
        info!(path = %local.display(), bytes = expected, "Wrote local Parquet file");

        match self.upload_and_confirm(&key, body, expected).await {
            Ok(size) => {
                fs::remove_file(&local).await?;
                info!(
                    bucket = %self.store.bucket(),
                    %key,
                    size,
                    elapsed_ms = t0.elapsed().as_millis() as u64,
                    "Staged batch; cleaned up local file"
                );
                Ok(Some(StagedObject {
                    bucket: self.store.bucket().to_string(),
                    key,
                    size,
                    rows: batch.len(),
                }))
            }
            Err(e) => {
                error!(
                    %key,
                    local_path = %local.display(),
                    error = %e,
                    "Upload failed; local file retained"
                );
                Err(e)
            }
        }
    }

    async fn upload_and_confirm(&self, key: &str, body: Bytes, expected: u64) -> Result<u64> {
        let reported = self
            .store
            .put(key, body)
            .await
            .map_err(|e| as_staging_error(key, e))?;
        if reported != expected {
            self.discard(key).await;
            return Err(PipelineError::staging(
                key,
                format!("store reported {reported} bytes, expected {expected}"),
            ));
        }

        match self.store.size(key).await {
            Ok(Some(size)) if size == expected => Ok(size),
            Ok(Some(size)) => {
                self.discard(key).await;
                Err(PipelineError::staging(
                    key,
                    format!("object has {size} bytes, expected {expected}"),
                ))
            }
            Ok(None) => Err(PipelineError::staging(key, "object missing after upload")),
            Err(e) => {
                self.discard(key).await;
                Err(as_staging_error(key, e))
            }
        }
    }

    /// Best-effort removal of a suspect object at the final key.
    async fn discard(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(%key, error = %e, "Could not remove suspect object");
        }
    }
}
