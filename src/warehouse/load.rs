//! Load a staged Parquet file into the main table.

use super::{QueryOutcome, Warehouse};
use crate::config::WarehouseConfig;
use crate::error::Result;
use crate::models::{RunContext, StagedObject};
use tracing::{info, instrument};

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Creates the main table from the staged files' inferred schema, if absent.
pub fn create_table_sql(config: &WarehouseConfig) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table}\n\
         USING TEMPLATE (\n  \
           SELECT ARRAY_AGG(OBJECT_CONSTRUCT(*))\n  \
           FROM TABLE(INFER_SCHEMA(\n    \
             LOCATION => '@{stage}',\n    \
             FILE_FORMAT => '{format}'\n  \
           ))\n\
         )",
        table = config.qualify(&config.main_table),
        stage = config.qualify(&config.stage),
        format = config.qualify(&config.file_format),
    )
}

/// Copies exactly one run's file; the stage is rooted at `<bucket>/<base-path>/`.
pub fn copy_sql(config: &WarehouseConfig, run: &RunContext, staged: &StagedObject) -> String {
    format!(
        "COPY INTO {table}\n\
         FROM @{stage}/{date}/\n\
         FILES = ({file})\n\
         MATCH_BY_COLUMN_NAME = CASE_INSENSITIVE\n\
         FILE_FORMAT = (FORMAT_NAME = '{format}')",
        table = config.qualify(&config.main_table),
        stage = config.qualify(&config.stage),
        date = run.date_key(),
        file = quote_literal(staged.file_name()),
        format = config.qualify(&config.file_format),
    )
}

/// Ensure the table exists and copy the staged file in. `None` means the
/// upstream batch was empty, so there is nothing to load.
#[instrument(level = "info", skip_all, fields(run_date = %run.run_date))]
pub async fn load_staged<W: Warehouse>(
    warehouse: &W,
    config: &WarehouseConfig,
    run: &RunContext,
    staged: Option<&StagedObject>,
) -> Result<Option<QueryOutcome>> {
    let Some(staged) = staged else {
        info!("Nothing staged for this run; skipping COPY");
        return Ok(None);
    };

    warehouse.execute(&create_table_sql(config)).await?;
    let outcome = warehouse.execute(&copy_sql(config, run, staged)).await?;
    info!(
        table = %config.qualify(&config.main_table),
        key = %staged.key,
        rows = staged.rows,
        files = outcome.num_rows,
        "Loaded staged file"
    );
    Ok(Some(outcome))
}
