//! Credential lookup.
//!
//! Secrets never live in [`crate::config::PipelineConfig`]; components ask a
//! [`CredentialStore`] for them when they build their clients.

use crate::error::{PipelineError, Result};
use std::collections::HashMap;
use tracing::debug;

pub const NEWS_API_KEY: &str = "NEWS_API_KEY";
pub const GCS_ACCESS_TOKEN: &str = "GCS_ACCESS_TOKEN";
pub const SNOWFLAKE_TOKEN: &str = "SNOWFLAKE_TOKEN";

pub trait CredentialStore {
    /// Look up `key`. Absent and blank values are both `MissingCredential`.
    fn get(&self, key: &str) -> Result<String>;
}

/// Reads credentials from process environment variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialStore for EnvCredentials {
    fn get(&self, key: &str) -> Result<String> {
        match std::env::var(key) {
            Ok(v) if !v.trim().is_empty() => {
                debug!(key, "Resolved credential from environment");
                Ok(v.trim().to_string())
            }
            _ => Err(PipelineError::MissingCredential(key.to_string())),
        }
    }
}

/// Fixed credentials, used when the key is supplied on the command line and in tests.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    values: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }
}

impl CredentialStore for StaticCredentials {
    fn get(&self, key: &str) -> Result<String> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| PipelineError::MissingCredential(key.to_string()))
    }
}

/// Tries `primary` first, then `fallback`.
#[derive(Debug, Clone)]
pub struct Layered<A, B> {
    pub primary: A,
    pub fallback: B,
}

impl<A: CredentialStore, B: CredentialStore> CredentialStore for Layered<A, B> {
    fn get(&self, key: &str) -> Result<String> {
        self.primary.get(key).or_else(|_| self.fallback.get(key))
    }
}
