//! Fan-out of a script set across bounded worker concurrency.
//!
//! The [`Scheduler`] dispatches every script to its own tokio task, never
//! running more than `concurrency` at once, and hands each result to the
//! [`RunReporter`]. A script failing never stops the others. Cancellation
//! stops dispatch only; in-flight scripts run to completion and scripts that
//! were never dispatched are reported as cancelled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use pgbatch_core::result::{ExecutionResult, FailureKind, RunSummary};
use pgbatch_core::script::ScriptDefinition;
use pgbatch_db::{ConnectionPool, Connector};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::reporter::{ReportError, RunReporter};
use crate::worker;

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No run started yet.
    Idle,
    /// Dispatching scripts to workers.
    Running,
    /// Every script dispatched (or dispatch cancelled); waiting for workers.
    Draining,
    /// Summary produced.
    Completed,
}

pub struct Scheduler<C: Connector> {
    pool: ConnectionPool<C>,
    concurrency: usize,
    command_timeout: Option<Duration>,
    cancel: CancellationToken,
    state: watch::Sender<SchedulerState>,
}

impl<C: Connector> Scheduler<C> {
    /// `concurrency` is clamped to `1..=pool max`.
    pub fn new(pool: ConnectionPool<C>, concurrency: usize) -> Self {
        let max = pool.bounds().max();
        let effective = concurrency.clamp(1, max);
        if effective != concurrency {
            tracing::warn!(
                requested = concurrency,
                effective,
                pool_max = max,
                "Worker concurrency clamped to the connection pool bounds",
            );
        }

        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            pool,
            concurrency: effective,
            command_timeout: None,
            cancel: CancellationToken::new(),
            state,
        }
    }

    /// Default statement timeout for scripts without their own.
    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Use an externally owned shutdown signal.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Drive every script to exactly one result and return the summary.
    ///
    /// Errors only if the reporter's contract is broken; script failures are
    /// part of the summary.
    pub async fn run(
        &self,
        scripts: Arc<[ScriptDefinition]>,
        reporter: Arc<RunReporter>,
    ) -> Result<RunSummary, ReportError> {
        let run_id = reporter.run_id();
        let clock = Instant::now();
        self.transition(SchedulerState::Running);
        tracing::info!(
            %run_id,
            scripts = scripts.len(),
            concurrency = self.concurrency,
            "Run started",
        );

        let slots = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut dispatched = 0usize;

        while dispatched < scripts.len() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::warn!(
                        %run_id,
                        dispatched,
                        remaining = scripts.len() - dispatched,
                        "Run cancelled, no further scripts will be dispatched",
                    );
                    break;
                }
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let index = dispatched;
            let scripts = Arc::clone(&scripts);
            let reporter = Arc::clone(&reporter);
            let pool = self.pool.clone();
            let timeout = self.command_timeout;

            tasks.spawn(async move {
                let _permit = permit;
                let result = worker::run(&scripts[index], &pool, timeout).await;
                if let Err(e) = reporter.record(result) {
                    tracing::error!(error = %e, "Failed to record script result");
                }
            });
            dispatched += 1;
        }

        self.transition(SchedulerState::Draining);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(%run_id, error = %e, "Worker task ended abnormally");
            }
        }
        tracing::debug!(
            %run_id,
            dispatched,
            recorded = reporter.recorded(),
            "Workers drained",
        );

        for script in &scripts[dispatched..] {
            record_unfinished(
                &reporter,
                script,
                FailureKind::Cancelled,
                "Run cancelled before the script was dispatched",
            );
        }
        for script in &scripts[..dispatched] {
            if !reporter.has_result(script.name()) {
                record_unfinished(
                    &reporter,
                    script,
                    FailureKind::Panicked,
                    "Worker task ended without reporting a result",
                );
            }
        }

        let summary = reporter.finalize()?;
        self.transition(SchedulerState::Completed);
        tracing::info!(
            %run_id,
            total = summary.total,
            failed = summary.failed,
            elapsed_ms = clock.elapsed().as_millis() as u64,
            "Run completed",
        );
        Ok(summary)
    }

    fn transition(&self, next: SchedulerState) {
        let previous = self.state.send_replace(next);
        tracing::debug!(from = ?previous, to = ?next, "Scheduler state changed");
    }
}

fn record_unfinished(
    reporter: &RunReporter,
    script: &ScriptDefinition,
    kind: FailureKind,
    message: &str,
) {
    let result = ExecutionResult::failed(
        script.name(),
        script.kind(),
        kind,
        message,
        Utc::now(),
        Duration::ZERO,
    );
    if let Err(e) = reporter.record(result) {
        tracing::error!(script = %script.name(), error = %e, "Failed to record script result");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
