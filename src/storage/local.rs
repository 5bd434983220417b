//! Filesystem-backed object store for local runs and tests.
//!
//! Objects live at `<root>/<bucket>/<key>`. Writes go to a sibling
//! `.partial` file that is renamed into place, so a reader never sees a
//! half-written object at the final path.

use super::ObjectStore;
use crate::error::Result;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    bucket: String,
}

impl LocalObjectStore {
    pub fn new(root: PathBuf, bucket: String) -> Self {
        Self { root, bucket }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(&self.bucket).join(key)
    }
}

impl ObjectStore for LocalObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(level = "debug", skip(self, body), fields(bytes = body.len()))]
    async fn put(&self, key: &str, body: Bytes) -> Result<u64> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let partial = path.with_extension("partial");
        fs::write(&partial, &body).await?;
        fs::rename(&partial, &path).await?;
        let size = fs::metadata(&path).await?.len();
        debug!(path = %path.display(), size, "Wrote object");
        Ok(size)
    }

    async fn size(&self, key: &str) -> Result<Option<u64>> {
        match fs::metadata(self.path_for(key)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
