//! Error taxonomy for the ingestion pipeline.
//!
//! Every fallible component returns [`PipelineError`]. The orchestrator only
//! needs one question answered about a failure, "is it worth another attempt?",
//! which [`PipelineError::is_retryable`] decides.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Timeouts, refused connections, 429s and 5xx responses.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Rejected or missing API key / bearer token.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// A single article could not be normalized. Absorbed by the normalizer.
    #[error("record from {url} dropped: {reason}")]
    PartialRecord { url: String, reason: String },

    /// The provider answered, but with a non-retryable error payload.
    #[error("provider error ({code}): {message}")]
    Provider { code: String, message: String },

    #[error("staging failed for {key}: {message}")]
    Staging { key: String, message: String },

    #[error("warehouse error: {0}")]
    Warehouse(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid task graph: {0}")]
    Graph(String),

    #[error("parquet encoding failed: {0}")]
    Encode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn partial_record(url: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::PartialRecord {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn staging(key: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Staging {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether another attempt of the same operation could succeed.
    ///
    /// Staging and warehouse failures count as retryable; the orchestrator
    /// re-runs the whole task for them.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::TransientNetwork(_)
            | PipelineError::Staging { .. }
            | PipelineError::Warehouse(_)
            | PipelineError::Io(_) => true,
            PipelineError::Auth(_)
            | PipelineError::MissingCredential(_)
            | PipelineError::PartialRecord { .. }
            | PipelineError::Provider { .. }
            | PipelineError::Config(_)
            | PipelineError::Graph(_)
            | PipelineError::Encode(_) => false,
        }
    }

    /// Map an HTTP status that is not a success into the taxonomy.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let code = status.as_u16();
        match code {
            401 | 403 => PipelineError::Auth(format!("HTTP {code}: {body}")),
            408 | 429 => PipelineError::TransientNetwork(format!("HTTP {code}: {body}")),
            500..=599 => PipelineError::TransientNetwork(format!("HTTP {code}: {body}")),
            _ => PipelineError::Provider {
                code: code.to_string(),
                message: body.to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return PipelineError::from_status(status, &err.to_string());
        }
        if err.is_decode() {
            return PipelineError::Provider {
                code: "decode".to_string(),
                message: err.to_string(),
            };
        }
        // timeouts, connect failures, reset bodies
        PipelineError::TransientNetwork(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Provider {
            code: "parse".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<parquet::errors::ParquetError> for PipelineError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        PipelineError::Encode(err.to_string())
    }
}

impl From<arrow::error::ArrowError> for PipelineError {
    fn from(err: arrow::error::ArrowError) -> Self {
        PipelineError::Encode(err.to_string())
    }
}

impl From<serde_yaml::Error> for PipelineError {
    fn from(err: serde_yaml::Error) -> Self {
        PipelineError::Config(err.to_string())
    }
}
