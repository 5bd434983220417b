//! The daily news job as a four-task graph.
//!
//! ```text
//! extract_and_stage ──▶ load_to_warehouse ──┬──▶ summarize_by_source
//!                                           └──▶ summarize_by_author
//! ```
//!
//! `extract_and_stage` fetches, normalizes and stages one batch; the staged
//! object (or `None` for an empty batch) is handed to `load_to_warehouse`
//! through run-local state, never through a global.

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::fetcher::{Fetcher, NewsTransport};
use crate::models::{RunContext, StagedObject};
use crate::normalizer::Normalizer;
use crate::orchestrator::{Executor, RunReport, TaskGraph};
use crate::outputs::staging::StagingWriter;
use crate::storage::ObjectStore;
use crate::warehouse::Warehouse;
use crate::warehouse::load::load_staged;
use crate::warehouse::summaries::{Summary, rebuild};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{info, instrument};

pub const EXTRACT_AND_STAGE: &str = "extract_and_stage";
pub const LOAD_TO_WAREHOUSE: &str = "load_to_warehouse";
pub const SUMMARIZE_BY_SOURCE: &str = "summarize_by_source";
pub const SUMMARIZE_BY_AUTHOR: &str = "summarize_by_author";

pub fn task_graph() -> Result<TaskGraph> {
    TaskGraph::builder()
        .task(EXTRACT_AND_STAGE, &[])
        .task(LOAD_TO_WAREHOUSE, &[EXTRACT_AND_STAGE])
        .task(SUMMARIZE_BY_SOURCE, &[LOAD_TO_WAREHOUSE])
        .task(SUMMARIZE_BY_AUTHOR, &[LOAD_TO_WAREHOUSE])
        .build()
}

pub struct Pipeline<T, S, W> {
    config: Arc<PipelineConfig>,
    fetcher: Fetcher<T>,
    normalizer: Normalizer,
    writer: StagingWriter<S>,
    warehouse: W,
    abort: Arc<AtomicBool>,
    clock: fn() -> DateTime<Utc>,
}

impl<T: NewsTransport, S: ObjectStore, W: Warehouse> Pipeline<T, S, W> {
    pub fn new(config: Arc<PipelineConfig>, transport: T, store: S, warehouse: W) -> Self {
        Self {
            fetcher: Fetcher::new(transport, config.fetch.clone()),
            normalizer: Normalizer::new(config.normalize.max_content_length),
            writer: StagingWriter::new(store, &config.staging.base_path, &config.staging.staging_dir),
            warehouse,
            abort: Arc::new(AtomicBool::new(false)),
            clock: Utc::now,
            config,
        }
    }

    pub fn with_abort(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = abort;
        self
    }

    #[instrument(level = "info", skip_all, fields(run_date = %run.run_date))]
    pub async fn extract_and_stage(&self, run: &RunContext) -> Result<Option<StagedObject>> {
        let raws = self.fetcher.fetch_all(run).await?;
        let fetched = raws.len();
        let batch = self.normalizer.normalize_batch(*run, raws, (self.clock)());
        info!(fetched, kept = batch.len(), dropped = batch.dropped, "Batch ready");
        self.writer.stage(&batch).await
    }

    /// Execute the whole graph for one run.
    #[instrument(level = "info", skip_all, fields(run_date = %run.run_date, run_ts = %run.timestamp_key()))]
    pub async fn run(&self, run: RunContext) -> Result<RunReport> {
        let staged: RefCell<Option<StagedObject>> = RefCell::new(None);
        let staged = &staged;
        let warehouse_config = &self.config.warehouse;

        let executor = Executor::new(task_graph()?, self.config.orchestrator.task_retry.clone())
            .with_abort(self.abort.clone())
            .task(EXTRACT_AND_STAGE, move || {
                async move {
                    let object = self.extract_and_stage(&run).await?;
                    *staged.borrow_mut() = object;
                    Ok(())
                }
                .boxed_local()
            })
            .task(LOAD_TO_WAREHOUSE, move || {
                async move {
                    let object = staged.borrow().clone();
                    load_staged(&self.warehouse, warehouse_config, &run, object.as_ref()).await?;
                    Ok(())
                }
                .boxed_local()
            })
            .task(SUMMARIZE_BY_SOURCE, move || {
                async move {
                    rebuild(&self.warehouse, warehouse_config, Summary::BySource).await?;
                    Ok(())
                }
                .boxed_local()
            })
            .task(SUMMARIZE_BY_AUTHOR, move || {
                async move {
                    rebuild(&self.warehouse, warehouse_config, Summary::ByAuthor).await?;
                    Ok(())
                }
                .boxed_local()
            });

        executor.run(run).await
    }
}

#[cfg(test)]
impl<T, S, W> Pipeline<T, S, W> {
    /// Source of the `processed_at` stamp.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn writer(&self) -> &StagingWriter<S> {
        &self.writer
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }
}
