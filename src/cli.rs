//! Command-line interface definitions.
//!
//! Every option can come from a flag, an environment variable, or the YAML
//! file passed with `--config`. Options left unset here fall through to the
//! file and then to built-in defaults (see [`crate::config`]), which is why
//! they are `Option`s without clap defaults.

use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectStoreKind {
    /// Google Cloud Storage JSON API
    Gcs,
    /// A directory on the local filesystem, one sub-directory per bucket
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarehouseKind {
    /// Snowflake SQL API v2
    Snowflake,
    /// Log statements instead of executing them
    DryRun,
}

/// Command-line arguments.
///
/// # Examples
///
/// ```sh
/// # One run for today, against a local bucket and no warehouse
/// news_warehouse_loader --once --object-store local --warehouse dry-run
///
/// # Re-run a specific date
/// news_warehouse_loader --once --run-date 2025-10-03 -c pipeline.yaml
///
/// # Daily schedule
/// news_warehouse_loader -c pipeline.yaml
/// ```
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML configuration file
    #[arg(short, long, env = "PIPELINE_CONFIG")]
    pub config: Option<String>,

    /// Execute a single run and exit instead of running on the daily schedule
    #[arg(long)]
    pub once: bool,

    /// Run date for `--once` (YYYY-MM-DD); defaults to today's tick
    #[arg(long, requires = "once")]
    pub run_date: Option<NaiveDate>,

    /// NewsAPI key
    #[arg(long, env = "NEWS_API_KEY", hide_env_values = true)]
    pub news_api_key: Option<String>,

    /// NewsAPI base URL
    #[arg(long, env = "NEWS_API_BASE_URL")]
    pub api_base_url: Option<String>,

    /// Search query
    #[arg(short, long, env = "NEWS_QUERY")]
    pub query: Option<String>,

    /// How many days back from the run date to search
    #[arg(long, env = "NEWS_DAYS_BACK")]
    pub days_back: Option<u32>,

    /// Articles per page (provider maximum is 100)
    #[arg(long, env = "NEWS_PAGE_SIZE")]
    pub page_size: Option<u32>,

    /// Upper bound on pages requested per run (NewsAPI developer keys stop at
    /// 100 results; pages past that need a paid plan)
    #[arg(long, env = "NEWS_MAX_PAGES")]
    pub max_pages: Option<u32>,

    /// Article language filter
    #[arg(long, env = "NEWS_LANGUAGE")]
    pub language: Option<String>,

    /// Provider sort order (relevancy, popularity, publishedAt)
    #[arg(long, env = "NEWS_SORT_BY")]
    pub sort_by: Option<String>,

    /// Maximum characters kept from an article body
    #[arg(long, env = "MAX_CONTENT_LENGTH")]
    pub max_content_length: Option<usize>,

    /// Timeout for every outbound HTTP request, in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Attempts per page request before the fetch is aborted
    #[arg(long, env = "FETCH_ATTEMPTS")]
    pub fetch_attempts: Option<u32>,

    /// Object store backend
    #[arg(long, value_enum, env = "OBJECT_STORE")]
    pub object_store: Option<ObjectStoreKind>,

    /// Bucket receiving the Parquet files
    #[arg(short, long, env = "STAGING_BUCKET")]
    pub bucket: Option<String>,

    /// Key prefix inside the bucket
    #[arg(long, env = "STAGING_BASE_PATH")]
    pub base_path: Option<String>,

    /// Root directory of the `local` object store
    #[arg(long, env = "LOCAL_STORE_ROOT")]
    pub local_store_root: Option<String>,

    /// Directory for Parquet files awaiting upload
    #[arg(long, env = "STAGING_DIR")]
    pub staging_dir: Option<String>,

    /// Warehouse backend
    #[arg(long, value_enum, env = "WAREHOUSE")]
    pub warehouse: Option<WarehouseKind>,

    /// Snowflake account identifier (e.g. `xy12345.us-east-1`)
    #[arg(long, env = "SNOWFLAKE_ACCOUNT")]
    pub snowflake_account: Option<String>,

    #[arg(long, env = "SNOWFLAKE_USER")]
    pub snowflake_user: Option<String>,

    #[arg(long, env = "SNOWFLAKE_ROLE")]
    pub snowflake_role: Option<String>,

    #[arg(long, env = "SNOWFLAKE_DATABASE")]
    pub snowflake_database: Option<String>,

    #[arg(long, env = "SNOWFLAKE_SCHEMA")]
    pub snowflake_schema: Option<String>,

    /// Virtual warehouse that runs the statements
    #[arg(long, env = "SNOWFLAKE_WAREHOUSE")]
    pub snowflake_warehouse: Option<String>,

    /// External stage pointing at `<bucket>/<base-path>/`
    #[arg(long, env = "SNOWFLAKE_STAGE")]
    pub snowflake_stage: Option<String>,

    /// Named Parquet file format
    #[arg(long, env = "SNOWFLAKE_FILE_FORMAT")]
    pub snowflake_file_format: Option<String>,

    /// Retries per task after the first failed attempt
    #[arg(long, env = "TASK_RETRIES")]
    pub task_retries: Option<u32>,

    /// Delay between task retries, in seconds
    #[arg(long, env = "TASK_RETRY_DELAY_SECS")]
    pub task_retry_delay_secs: Option<u64>,

    /// Daily run time, UTC (HH:MM)
    #[arg(long, env = "SCHEDULE_TIME")]
    pub schedule_time: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "news_warehouse_loader",
            "--once",
            "--run-date",
            "2025-10-03",
            "--query",
            "apple",
            "--object-store",
            "local",
            "--warehouse",
            "dry-run",
        ]);

        assert!(cli.once);
        assert_eq!(cli.run_date, NaiveDate::from_ymd_opt(2025, 10, 3));
        assert_eq!(cli.query.as_deref(), Some("apple"));
        assert_eq!(cli.object_store, Some(ObjectStoreKind::Local));
        assert_eq!(cli.warehouse, Some(WarehouseKind::DryRun));
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from([
            "news_warehouse_loader",
            "-c",
            "/etc/pipeline.yaml",
            "-b",
            "news-bucket",
        ]);

        assert_eq!(cli.config.as_deref(), Some("/etc/pipeline.yaml"));
        assert_eq!(cli.bucket.as_deref(), Some("news-bucket"));
        assert!(!cli.once);
    }

    #[test]
    fn test_run_date_requires_once() {
        let result = Cli::try_parse_from(["news_warehouse_loader", "--run-date", "2025-10-03"]);
        assert!(result.is_err());
    }
}
