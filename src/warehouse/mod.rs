//! Warehouse boundary.
//!
//! The warehouse is an opaque SQL engine: the pipeline hands it statements and
//! reads back an acknowledgement. Schema inference, `COPY INTO` and table
//! replacement all happen on its side.
//!
//! - [`load`]: creates the main table if absent and copies a staged file in
//! - [`summaries`]: full-replace recomputation of the two summary tables
//! - [`snowflake`]: Snowflake SQL API v2 client
//! - [`DryRunWarehouse`]: logs statements instead of executing them

pub mod load;
pub mod snowflake;
pub mod summaries;

use crate::cli::WarehouseKind;
use crate::config::WarehouseConfig;
use crate::credentials::{CredentialStore, SNOWFLAKE_TOKEN};
use crate::error::Result;
use crate::utils::one_line;
use std::sync::Mutex;
use tracing::info;

pub use snowflake::SnowflakeWarehouse;

/// What the warehouse reports back for one statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOutcome {
    pub statement_handle: Option<String>,
    /// Rows in the result set (for `COPY INTO`, one row per file).
    pub num_rows: u64,
    pub message: String,
}

pub trait Warehouse {
    async fn execute(&self, sql: &str) -> Result<QueryOutcome>;
}

/// Logs every statement and acknowledges it. Keeps what it saw for inspection.
#[derive(Debug, Default)]
pub struct DryRunWarehouse {
    statements: Mutex<Vec<String>>,
}

#[cfg(test)]
impl DryRunWarehouse {
    pub fn statements(&self) -> Vec<String> {
        self.statements
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

impl Warehouse for DryRunWarehouse {
    async fn execute(&self, sql: &str) -> Result<QueryOutcome> {
        info!(sql = %one_line(sql), "Dry run; statement not executed");
        if let Ok(mut statements) = self.statements.lock() {
            statements.push(sql.to_string());
        }
        Ok(QueryOutcome {
            statement_handle: None,
            num_rows: 0,
            message: "dry run".to_string(),
        })
    }
}

/// Runtime-selected backend.
#[derive(Debug)]
pub enum AnyWarehouse {
    Snowflake(SnowflakeWarehouse),
    DryRun(DryRunWarehouse),
}

impl AnyWarehouse {
    pub fn from_config(config: &WarehouseConfig, credentials: &impl CredentialStore) -> Result<Self> {
        match config.backend {
            WarehouseKind::Snowflake => Ok(AnyWarehouse::Snowflake(SnowflakeWarehouse::new(
                config,
                credentials.get(SNOWFLAKE_TOKEN)?,
            )?)),
            WarehouseKind::DryRun => Ok(AnyWarehouse::DryRun(DryRunWarehouse::default())),
        }
    }
}

impl Warehouse for AnyWarehouse {
    async fn execute(&self, sql: &str) -> Result<QueryOutcome> {
        match self {
            AnyWarehouse::Snowflake(w) => w.execute(sql).await,
            AnyWarehouse::DryRun(w) => w.execute(sql).await,
        }
    }
}
