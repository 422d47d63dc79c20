//! `pgbatch` -- run the configured SQL scripts against PostgreSQL.
//!
//! Loads `.env`, reads the script file, opens the connection pool and runs
//! every script once. Ctrl-C stops dispatching new scripts; scripts already
//! running finish and the rest are reported as cancelled. A second Ctrl-C
//! aborts immediately with exit code 2.
//!
//! # Exit codes
//!
//! | Code | Meaning                                   |
//! |------|-------------------------------------------|
//! | `0`  | every script succeeded                    |
//! | `1`  | at least one script failed                |
//! | `2`  | configuration or bootstrap error          |
//!
//! See [`RunnerConfig::from_env`] and [`LogSettings::from_env`] for the
//! environment variables.

use std::process::ExitCode;
use std::sync::Arc;

use pgbatch_core::loader::load_scripts;
use pgbatch_core::result::RunSummary;
use pgbatch_core::script::ScriptDefinition;
use pgbatch_core::types::new_run_id;
use pgbatch_runner::logging::{self, LogSettings};
use pgbatch_runner::{
    watch_interrupts, Interrupt, RunReporter, RunnerConfig, RunnerError, Scheduler, TracingSink,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // --- Logging ---
    let log_settings = LogSettings::from_env();
    if let Err(e) = logging::init(log_settings.as_ref().unwrap_or(&LogSettings::default())) {
        eprintln!("pgbatch: {e}");
        return ExitCode::from(2);
    }
    if let Err(e) = log_settings {
        tracing::error!(error = %e, "Invalid logging configuration");
        return ExitCode::from(2);
    }

    match run().await {
        Ok(summary) => ExitCode::from(summary.exit_code()),
        Err(e) => {
            tracing::error!(error = %e, "pgbatch aborted");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<RunSummary, RunnerError> {
    // --- Configuration ---
    let config = RunnerConfig::from_env()?;
    tracing::info!(
        target_db = %config.database.display_target(),
        min = config.pool.bounds().min(),
        max = config.pool.bounds().max(),
        concurrency = config.concurrency,
        "Loaded runner configuration",
    );

    let scripts: Arc<[ScriptDefinition]> = load_scripts(&config.script_file)?.into();
    tracing::info!(
        path = %config.script_file.display(),
        scripts = scripts.len(),
        "Loaded script definitions",
    );

    // --- Database ---
    let pool = pgbatch_db::create_pool(config.database.clone(), config.pool.clone()).await?;
    pool.health_check().await?;
    tracing::info!(status = ?pool.status(), "Database connection pool ready");

    // --- Shutdown signal ---
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if watch_interrupts(tokio::signal::ctrl_c, cancel).await == Interrupt::Forced {
                tracing::error!("Second interrupt received, aborting");
                std::process::exit(2);
            }
        }
    });

    // --- Run ---
    let scheduler = Scheduler::new(pool.clone(), config.concurrency)
        .with_command_timeout(config.command_timeout)
        .with_cancellation(cancel);
    let reporter = Arc::new(RunReporter::new(new_run_id(), &scripts, Arc::new(TracingSink)));
    let summary = scheduler.run(scripts, reporter).await;

    pool.shutdown().await;
    tracing::debug!(closed = pool.is_closed(), status = ?pool.status(), "Pool released");
    Ok(summary?)
}
