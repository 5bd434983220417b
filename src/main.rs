//! # News Warehouse Loader
//!
//! A daily batch job that pulls news articles from NewsAPI, cleans them into
//! flat records, stages them as a Parquet file in object storage, loads the
//! file into a warehouse table and recomputes two summary tables.
//!
//! ## Usage
//!
//! ```sh
//! news_warehouse_loader --once --object-store local --warehouse dry-run
//! news_warehouse_loader -c pipeline.yaml
//! ```
//!
//! ## Architecture
//!
//! One run is a four-task graph executed by [`orchestrator::Executor`]:
//! 1. **extract_and_stage**: fetch every page, normalize, write and upload Parquet
//! 2. **load_to_warehouse**: `CREATE TABLE IF NOT EXISTS` + `COPY INTO`
//! 3. **summarize_by_source** / **summarize_by_author**: full-replace summaries, concurrently
//!
//! Without `--once` the process stays up and runs once per day at the
//! configured UTC time.

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod credentials;
mod error;
mod fetcher;
mod models;
mod normalizer;
mod orchestrator;
mod outputs;
mod pipeline;
mod retry;
mod storage;
mod utils;
mod warehouse;

use cli::Cli;
use config::{FileConfig, PipelineConfig};
use credentials::{CredentialStore, EnvCredentials, Layered, NEWS_API_KEY, StaticCredentials};
use fetcher::HttpNewsTransport;
use models::RunContext;
use orchestrator::schedule::{latest_tick, next_tick, tick_on};
use orchestrator::{RunReport, RunState};
use pipeline::Pipeline;
use storage::AnyObjectStore;
use utils::ensure_writable_dir;
use warehouse::AnyWarehouse;

fn log_report(report: &RunReport) {
    for task in &report.tasks {
        info!(
            task = %task.name,
            run_date = %task.run_date,
            state = %task.state,
            attempts = task.attempts,
            last_error = task.last_error.as_deref().unwrap_or(""),
            "Task summary"
        );
    }
    info!(run_date = %report.run.run_date, state = %report.state, "Run finished");
}

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("news_warehouse_loader starting up");

    // Parse CLI, then layer the optional file underneath it
    let args = Cli::parse();
    debug!(config = ?args.config, once = args.once, run_date = ?args.run_date, "Parsed CLI arguments");

    let file_config = match &args.config {
        Some(path) => FileConfig::load(Path::new(path))?,
        None => FileConfig::default(),
    };
    let config = Arc::new(PipelineConfig::resolve(&args, &file_config)?);
    info!(
        query = %config.fetch.query,
        object_store = ?config.staging.backend,
        bucket = %config.staging.bucket,
        warehouse = ?config.warehouse.backend,
        "Configuration resolved"
    );

    // A key passed on the command line wins over the environment
    let mut cli_credentials = StaticCredentials::new();
    if let Some(key) = &args.news_api_key {
        cli_credentials = cli_credentials.with(NEWS_API_KEY, key);
    }
    let credentials = Layered {
        primary: cli_credentials,
        fallback: EnvCredentials,
    };

    // Early check: the staging directory must be writable before anything is fetched
    if let Err(e) = ensure_writable_dir(&config.staging.staging_dir).await {
        error!(
            path = %config.staging.staging_dir.display(),
            error = %e,
            "Staging directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }

    let transport = HttpNewsTransport::new(&config.fetch, credentials.get(NEWS_API_KEY)?)?;
    let store = AnyObjectStore::from_config(&config.staging, &credentials)?;
    let warehouse = AnyWarehouse::from_config(&config.warehouse, &credentials)?;

    // Ctrl-C takes effect at the next task boundary
    let abort = Arc::new(AtomicBool::new(false));
    let wake = Arc::new(Notify::new());
    {
        let abort = abort.clone();
        let wake = wake.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; aborting at the next task boundary");
                abort.store(true, Ordering::SeqCst);
                wake.notify_one();
            }
        });
    }

    let pipeline = Pipeline::new(config.clone(), transport, store, warehouse).with_abort(abort.clone());
    let time_of_day = config.schedule.time_of_day;

    if args.once {
        let tick = match args.run_date {
            Some(date) => tick_on(date, time_of_day),
            None => latest_tick(Utc::now(), time_of_day),
        };
        let report = pipeline.run(RunContext::new(tick)).await?;
        log_report(&report);

        let elapsed = start_time.elapsed();
        info!(
            ?elapsed,
            secs = elapsed.as_secs(),
            millis = elapsed.subsec_millis(),
            "Execution complete"
        );
        if report.state == RunState::Dead {
            return Err(format!("run for {} is dead", report.run.run_date).into());
        }
        return Ok(());
    }

    info!(%time_of_day, "Running on daily schedule (UTC)");
    while !abort.load(Ordering::SeqCst) {
        let tick = next_tick(Utc::now(), time_of_day);
        let wait = (tick - Utc::now()).to_std().unwrap_or_default();
        info!(next_run = %tick, wait_secs = wait.as_secs(), "Waiting for next tick");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = wake.notified() => break,
        }

        let run_t0 = std::time::Instant::now();
        match pipeline.run(RunContext::new(tick)).await {
            Ok(report) => log_report(&report),
            Err(e) => error!(error = %e, "Run could not start"),
        }
        info!(elapsed_secs = run_t0.elapsed().as_secs(), "Scheduled run complete");
    }

    let elapsed = start_time.elapsed();
    info!(?elapsed, secs = elapsed.as_secs(), "Shutting down");
    Ok(())
}
