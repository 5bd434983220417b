//! Summary tables, recomputed in full from the main table on every run.

use super::{QueryOutcome, Warehouse};
use crate::config::WarehouseConfig;
use crate::error::Result;
use itertools::Itertools;
use std::fmt;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Summary {
    /// `summary_news`: article counts and date range per source.
    BySource,
    /// `author_activity`: article counts and source spread per named author.
    ByAuthor,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Summary::BySource => write!(f, "by_source"),
            Summary::ByAuthor => write!(f, "by_author"),
        }
    }
}

impl Summary {
    pub fn table(&self, config: &WarehouseConfig) -> String {
        match self {
            Summary::BySource => config.qualify(&config.source_summary_table),
            Summary::ByAuthor => config.qualify(&config.author_summary_table),
        }
    }

    fn projection(&self) -> &'static [&'static str] {
        match self {
            Summary::BySource => &[
                r#""source" AS source"#,
                "COUNT(*) AS article_count",
                r#"MIN("timestamp") AS first_article_date"#,
                r#"MAX("timestamp") AS latest_article_date"#,
            ],
            Summary::ByAuthor => &[
                r#""author" AS author"#,
                "COUNT(*) AS article_count",
                r#"MAX("timestamp") AS latest_article_date"#,
                r#"COUNT(DISTINCT "source") AS distinct_source_count"#,
            ],
        }
    }

    /// Full-replace statement. Deterministic for a given config.
    pub fn sql(&self, config: &WarehouseConfig) -> String {
        let (filter, group) = match self {
            Summary::BySource => ("", r#""source""#),
            Summary::ByAuthor => ("\nWHERE \"author\" IS NOT NULL", r#""author""#),
        };
        format!(
            "CREATE OR REPLACE TABLE {table} AS\n\
             SELECT\n    {columns}\n\
             FROM {main}{filter}\n\
             GROUP BY {group}\n\
             ORDER BY article_count DESC",
            table = self.table(config),
            columns = self.projection().iter().join(",\n    "),
            main = config.qualify(&config.main_table),
        )
    }
}

#[instrument(level = "info", skip(warehouse, config))]
pub async fn rebuild<W: Warehouse>(
    warehouse: &W,
    config: &WarehouseConfig,
    summary: Summary,
) -> Result<QueryOutcome> {
    let outcome = warehouse.execute(&summary.sql(config)).await?;
    info!(table = %summary.table(config), "Summary table replaced");
    Ok(outcome)
}
