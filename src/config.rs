//! Immutable pipeline configuration.
//!
//! [`PipelineConfig::resolve`] merges three layers, first hit wins:
//!
//! 1. command-line flags and their environment variables ([`Cli`])
//! 2. the optional YAML file ([`FileConfig`])
//! 3. built-in defaults
//!
//! The result is built once per process, validated, and shared behind an
//! `Arc`. Nothing downstream reads the environment for settings; secrets are
//! resolved separately through [`crate::credentials`].

use crate::cli::{Cli, ObjectStoreKind, WarehouseKind};
use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;
use chrono::NaiveTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

pub const DEFAULT_QUERY: &str = "technology";
pub const DEFAULT_DAYS_BACK: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_MAX_PAGES: u32 = 5;
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 200;
pub const PROVIDER_MAX_PAGE_SIZE: u32 = 100;

pub const MAIN_TABLE: &str = "news_api_data";
pub const SOURCE_SUMMARY_TABLE: &str = "summary_news";
pub const AUTHOR_SUMMARY_TABLE: &str = "author_activity";

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").unwrap());

/// Shape of the optional YAML file. Keys mirror the long CLI flags in snake_case.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub api_base_url: Option<String>,
    pub query: Option<String>,
    pub days_back: Option<u32>,
    pub page_size: Option<u32>,
    pub max_pages: Option<u32>,
    pub language: Option<String>,
    pub sort_by: Option<String>,
    pub max_content_length: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub fetch_attempts: Option<u32>,
    pub object_store: Option<ObjectStoreKind>,
    pub bucket: Option<String>,
    pub base_path: Option<String>,
    pub local_store_root: Option<String>,
    pub staging_dir: Option<String>,
    pub warehouse: Option<WarehouseKind>,
    pub snowflake_account: Option<String>,
    pub snowflake_user: Option<String>,
    pub snowflake_role: Option<String>,
    pub snowflake_database: Option<String>,
    pub snowflake_schema: Option<String>,
    pub snowflake_warehouse: Option<String>,
    pub snowflake_stage: Option<String>,
    pub snowflake_file_format: Option<String>,
    pub task_retries: Option<u32>,
    pub task_retry_delay_secs: Option<u64>,
    pub schedule_time: Option<String>,
}

impl FileConfig {
    #[instrument(level = "info")]
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let parsed = serde_yaml::from_str(&text)?;
        info!(path = %path.display(), "Loaded configuration file");
        Ok(parsed)
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub api_base_url: String,
    pub query: String,
    pub days_back: u32,
    pub page_size: u32,
    pub max_pages: u32,
    pub language: String,
    pub sort_by: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct NormalizeConfig {
    pub max_content_length: usize,
}

#[derive(Debug, Clone)]
pub struct StagingConfig {
    pub backend: ObjectStoreKind,
    pub bucket: String,
    pub base_path: String,
    pub local_store_root: PathBuf,
    pub staging_dir: PathBuf,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub backend: WarehouseKind,
    pub account: String,
    pub user: String,
    pub role: Option<String>,
    pub database: String,
    pub schema: String,
    pub warehouse: String,
    pub stage: String,
    pub file_format: String,
    pub main_table: String,
    pub source_summary_table: String,
    pub author_summary_table: String,
    pub request_timeout: Duration,
    /// Server-side statement timeout.
    pub statement_timeout: Duration,
    pub poll_interval: Duration,
    pub max_polls: u32,
    /// Per-request retries for submit and poll calls.
    pub retry: RetryPolicy,
}

impl WarehouseConfig {
    /// `database.schema.name`
    pub fn qualify(&self, name: &str) -> String {
        format!("{}.{}.{}", self.database, self.schema, name)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub task_retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub time_of_day: NaiveTime,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fetch: FetchConfig,
    pub normalize: NormalizeConfig,
    pub staging: StagingConfig,
    pub warehouse: WarehouseConfig,
    pub orchestrator: OrchestratorConfig,
    pub schedule: ScheduleConfig,
}

fn pick<T>(cli: Option<T>, file: Option<T>, default: T) -> T {
    cli.or(file).unwrap_or(default)
}

fn pick_str(cli: &Option<String>, file: &Option<String>, default: &str) -> String {
    pick(cli.clone(), file.clone(), default.to_string())
}

impl PipelineConfig {
    /// Merge CLI, file and defaults, then validate.
    pub fn resolve(cli: &Cli, file: &FileConfig) -> Result<Self> {
        let request_timeout = Duration::from_secs(pick(
            cli.request_timeout_secs,
            file.request_timeout_secs,
            30,
        ));

        let fetch = FetchConfig {
            api_base_url: pick_str(&cli.api_base_url, &file.api_base_url, "https://newsapi.org"),
            query: pick_str(&cli.query, &file.query, DEFAULT_QUERY),
            days_back: pick(cli.days_back, file.days_back, DEFAULT_DAYS_BACK),
            page_size: pick(cli.page_size, file.page_size, DEFAULT_PAGE_SIZE),
            max_pages: pick(cli.max_pages, file.max_pages, DEFAULT_MAX_PAGES),
            language: pick_str(&cli.language, &file.language, "en"),
            sort_by: pick_str(&cli.sort_by, &file.sort_by, "popularity"),
            request_timeout,
            retry: RetryPolicy::exponential(
                pick(cli.fetch_attempts, file.fetch_attempts, 3),
                Duration::from_secs(1),
            ),
        };

        let normalize = NormalizeConfig {
            max_content_length: pick(
                cli.max_content_length,
                file.max_content_length,
                DEFAULT_MAX_CONTENT_LENGTH,
            ),
        };

        let staging = StagingConfig {
            backend: pick(cli.object_store, file.object_store, ObjectStoreKind::Gcs),
            bucket: pick_str(&cli.bucket, &file.bucket, "news-data-staging"),
            base_path: pick_str(&cli.base_path, &file.base_path, "news_data_analysis")
                .trim_matches('/')
                .to_string(),
            local_store_root: PathBuf::from(pick_str(
                &cli.local_store_root,
                &file.local_store_root,
                "./object_store",
            )),
            staging_dir: PathBuf::from(pick_str(&cli.staging_dir, &file.staging_dir, "./staging")),
            request_timeout,
        };

        let warehouse = WarehouseConfig {
            backend: pick(cli.warehouse, file.warehouse, WarehouseKind::Snowflake),
            account: pick_str(&cli.snowflake_account, &file.snowflake_account, ""),
            user: pick_str(&cli.snowflake_user, &file.snowflake_user, ""),
            role: cli.snowflake_role.clone().or_else(|| file.snowflake_role.clone()),
            database: pick_str(&cli.snowflake_database, &file.snowflake_database, "news_api"),
            schema: pick_str(&cli.snowflake_schema, &file.snowflake_schema, "PUBLIC"),
            warehouse: pick_str(&cli.snowflake_warehouse, &file.snowflake_warehouse, "COMPUTE_WH"),
            stage: pick_str(&cli.snowflake_stage, &file.snowflake_stage, "gcs_raw_data_stage"),
            file_format: pick_str(
                &cli.snowflake_file_format,
                &file.snowflake_file_format,
                "parquet_format",
            ),
            main_table: MAIN_TABLE.to_string(),
            source_summary_table: SOURCE_SUMMARY_TABLE.to_string(),
            author_summary_table: AUTHOR_SUMMARY_TABLE.to_string(),
            request_timeout,
            statement_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(2),
            max_polls: 300,
            retry: RetryPolicy::exponential(3, Duration::from_secs(1)),
        };

        let orchestrator = OrchestratorConfig {
            task_retry: RetryPolicy::fixed(
                pick(cli.task_retries, file.task_retries, 2) + 1,
                Duration::from_secs(pick(
                    cli.task_retry_delay_secs,
                    file.task_retry_delay_secs,
                    300,
                )),
            ),
        };

        let schedule_time = pick_str(&cli.schedule_time, &file.schedule_time, "00:00");
        let schedule = ScheduleConfig {
            time_of_day: NaiveTime::parse_from_str(&schedule_time, "%H:%M").map_err(|e| {
                PipelineError::Config(format!("schedule_time {schedule_time:?}: {e}"))
            })?,
        };

        let config = Self {
            fetch,
            normalize,
            staging,
            warehouse,
            orchestrator,
            schedule,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let f = &self.fetch;
        if f.query.trim().is_empty() {
            return Err(PipelineError::Config("query must not be empty".into()));
        }
        if f.page_size == 0 || f.page_size > PROVIDER_MAX_PAGE_SIZE {
            return Err(PipelineError::Config(format!(
                "page_size must be within 1..={PROVIDER_MAX_PAGE_SIZE}, got {}",
                f.page_size
            )));
        }
        if f.max_pages == 0 {
            return Err(PipelineError::Config("max_pages must be at least 1".into()));
        }
        if self.normalize.max_content_length == 0 {
            return Err(PipelineError::Config(
                "max_content_length must be at least 1".into(),
            ));
        }
        if self.staging.bucket.trim().is_empty() {
            return Err(PipelineError::Config("bucket must not be empty".into()));
        }

        let w = &self.warehouse;
        for (what, ident) in [
            ("database", &w.database),
            ("schema", &w.schema),
            ("warehouse", &w.warehouse),
            ("stage", &w.stage),
            ("file_format", &w.file_format),
        ] {
            if !IDENTIFIER.is_match(ident) {
                return Err(PipelineError::Config(format!(
                    "{what} {ident:?} is not a plain SQL identifier"
                )));
            }
        }
        if w.backend == WarehouseKind::Snowflake && (w.account.is_empty() || w.user.is_empty()) {
            return Err(PipelineError::Config(
                "snowflake_account and snowflake_user are required for the snowflake warehouse"
                    .into(),
            ));
        }
        Ok(())
    }
}
