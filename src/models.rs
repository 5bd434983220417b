//! Data models for the ingestion pipeline.
//!
//! - [`RawArticle`] / [`NewsApiResponse`]: NewsAPI wire format, ephemeral
//! - [`NormalizedRecord`]: one row of the `news_api_data` table
//! - [`Batch`]: every normalized row of a single run
//! - [`RunContext`]: the identity of a run (date + logical timestamp)
//! - [`StagedObject`]: a confirmed Parquet object in the bucket
//!
//! `NormalizedRecord` keeps the warehouse column names (`newsTitle`,
//! `url_source`, `urlToImage`, ...) through serde renames, since the
//! warehouse copies by column name.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The `source` object nested in every NewsAPI article.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RawSource {
    pub id: Option<String>,
    pub name: Option<String>,
}

/// An article exactly as NewsAPI returns it. Every field may be absent.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawArticle {
    pub source: Option<RawSource>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub url_to_image: Option<String>,
    pub published_at: Option<String>,
    pub content: Option<String>,
}

impl RawArticle {
    /// Best identifier available for logging a rejected record.
    pub fn url_for_log(&self) -> &str {
        self.url.as_deref().unwrap_or("<no url>")
    }
}

/// One page of `/v2/everything`.
///
/// Error payloads share the envelope: `status` is `"error"` and `code` /
/// `message` are set instead of `articles`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsApiResponse {
    pub status: String,
    #[serde(default)]
    pub total_results: u64,
    #[serde(default)]
    pub articles: Vec<RawArticle>,
    pub code: Option<String>,
    pub message: Option<String>,
}

/// Parameters of a single page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub query: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub page_size: u32,
    /// 1-based, as the provider expects.
    pub page: u32,
    pub language: String,
    pub sort_by: String,
}

/// A cleaned, fixed-schema row.
///
/// Optional columns serialize as explicit `null`, never as missing keys.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NormalizedRecord {
    #[serde(rename = "newsTitle")]
    pub news_title: String,
    pub timestamp: String,
    pub url_source: String,
    pub content: String,
    pub source: String,
    pub author: Option<String>,
    #[serde(rename = "urlToImage")]
    pub url_to_image: Option<String>,
    pub processed_at: String,
}

/// The identity of one scheduled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    pub run_date: NaiveDate,
    /// The logical schedule instant, not the wall-clock start time.
    pub run_timestamp: DateTime<Utc>,
}

impl RunContext {
    pub fn new(run_timestamp: DateTime<Utc>) -> Self {
        Self {
            run_date: run_timestamp.date_naive(),
            run_timestamp,
        }
    }

    /// `2025-10-03`
    pub fn date_key(&self) -> String {
        self.run_date.format("%Y-%m-%d").to_string()
    }

    /// `20251003T000000Z`
    pub fn timestamp_key(&self) -> String {
        self.run_timestamp.format("%Y%m%dT%H%M%SZ").to_string()
    }
}

/// All rows produced by one run's fetch cycle.
#[derive(Debug, Clone)]
pub struct Batch {
    pub run: RunContext,
    pub records: Vec<NormalizedRecord>,
    /// Records rejected by the normalizer.
    pub dropped: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A Parquet file confirmed present in the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedObject {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub rows: usize,
}

impl StagedObject {
    /// The file name relative to its run-date directory.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}
