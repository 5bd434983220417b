//! Object storage for staged Parquet files.
//!
//! The pipeline only needs three operations from a blob store: write a key,
//! ask for a key's size, delete a key. [`ObjectStore`] is that surface.
//!
//! | Backend | Module | Notes |
//! |---------|--------|-------|
//! | Google Cloud Storage | [`gcs`] | JSON API over `reqwest`, bearer token |
//! | Local directory | [`local`] | `<root>/<bucket>/<key>`, atomic rename on write |
//!
//! [`AnyObjectStore`] picks one at runtime from configuration.

pub mod gcs;
pub mod local;

use crate::cli::ObjectStoreKind;
use crate::config::StagingConfig;
use crate::credentials::{CredentialStore, GCS_ACCESS_TOKEN};
use crate::error::Result;
use bytes::Bytes;

pub use gcs::GcsObjectStore;
pub use local::LocalObjectStore;

pub trait ObjectStore {
    fn bucket(&self) -> &str;

    /// Write `body` at `key`, replacing any previous object. Returns the size
    /// the store reports for the written object.
    async fn put(&self, key: &str, body: Bytes) -> Result<u64>;

    /// Size of the object at `key`, or `None` if it does not exist.
    async fn size(&self, key: &str) -> Result<Option<u64>>;

    /// Remove `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Runtime-selected backend.
#[derive(Debug)]
pub enum AnyObjectStore {
    Gcs(GcsObjectStore),
    Local(LocalObjectStore),
}

impl AnyObjectStore {
    pub fn from_config(config: &StagingConfig, credentials: &impl CredentialStore) -> Result<Self> {
        match config.backend {
            ObjectStoreKind::Gcs => Ok(AnyObjectStore::Gcs(GcsObjectStore::new(
                config.bucket.clone(),
                credentials.get(GCS_ACCESS_TOKEN)?,
                config.request_timeout,
            )?)),
            ObjectStoreKind::Local => Ok(AnyObjectStore::Local(LocalObjectStore::new(
                config.local_store_root.clone(),
                config.bucket.clone(),
            ))),
        }
    }
}

impl ObjectStore for AnyObjectStore {
    fn bucket(&self) -> &str {
        match self {
            AnyObjectStore::Gcs(s) => s.bucket(),
            AnyObjectStore::Local(s) => s.bucket(),
        }
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<u64> {
        match self {
            AnyObjectStore::Gcs(s) => s.put(key, body).await,
            AnyObjectStore::Local(s) => s.put(key, body).await,
        }
    }

    async fn size(&self, key: &str) -> Result<Option<u64>> {
        match self {
            AnyObjectStore::Gcs(s) => s.size(key).await,
            AnyObjectStore::Local(s) => s.size(key).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            AnyObjectStore::Gcs(s) => s.delete(key).await,
            AnyObjectStore::Local(s) => s.delete(key).await,
        }
    }
}
