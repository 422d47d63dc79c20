//! Thread-safe collection point for execution results.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use pgbatch_core::result::{ExecutionResult, RunSummary};
use pgbatch_core::script::ScriptDefinition;
use pgbatch_core::types::RunId;

use crate::sink::{LogRecord, LogSink, ResultLine, SummaryLine};

/// Reporter contract violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("Run report was already finalized")]
    AlreadyFinalized,

    #[error("No result recorded for script \"{0}\"")]
    MissingResult(String),

    #[error("A result for script \"{0}\" was already recorded")]
    DuplicateResult(String),

    #[error("Script \"{0}\" is not part of this run")]
    UnknownScript(String),
}

#[derive(Default)]
struct ReporterState {
    results: HashMap<String, ExecutionResult>,
    finalized: bool,
}

/// Collects one [`ExecutionResult`] per script of a run.
///
/// Each accepted result is forwarded to the [`LogSink`] immediately. Once
/// every script has reported, [`finalize`](Self::finalize) arranges the
/// results in definition order and emits the [`RunSummary`].
pub struct RunReporter {
    run_id: RunId,
    order: Vec<String>,
    known: HashSet<String>,
    sink: Arc<dyn LogSink>,
    started: Instant,
    state: Mutex<ReporterState>,
}

impl RunReporter {
    pub fn new(run_id: RunId, scripts: &[ScriptDefinition], sink: Arc<dyn LogSink>) -> Self {
        let order: Vec<String> = scripts.iter().map(|s| s.name().to_string()).collect();
        let known = order.iter().cloned().collect();
        Self {
            run_id,
            order,
            known,
            sink,
            started: Instant::now(),
            state: Mutex::new(ReporterState::default()),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Accept the result of one script. Safe to call from many tasks.
    ///
    /// A second result for the same script, or one for a script outside the
    /// run, is rejected and never replaces the first.
    pub fn record(&self, result: ExecutionResult) -> Result<(), ReportError> {
        let line = {
            let mut state = self.lock();
            if state.finalized {
                return Err(ReportError::AlreadyFinalized);
            }
            let name = &result.script_name;
            if !self.known.contains(name) {
                tracing::warn!(run_id = %self.run_id, script = %name, "Rejected result for unknown script");
                return Err(ReportError::UnknownScript(name.clone()));
            }
            if state.results.contains_key(name) {
                tracing::warn!(run_id = %self.run_id, script = %name, "Rejected duplicate result");
                return Err(ReportError::DuplicateResult(name.clone()));
            }

            let line = ResultLine::from_result(self.run_id, &result);
            state.results.insert(result.script_name.clone(), result);
            line
        };

        self.sink.write(&LogRecord::Result(line));
        Ok(())
    }

    pub fn has_result(&self, script_name: &str) -> bool {
        self.lock().results.contains_key(script_name)
    }

    /// Number of results accepted so far.
    pub fn recorded(&self) -> usize {
        self.lock().results.len()
    }

    /// Build the run summary. Succeeds at most once.
    ///
    /// Must only be called once no further `record` calls can happen.
    pub fn finalize(&self) -> Result<RunSummary, ReportError> {
        let results = {
            let mut state = self.lock();
            if state.finalized {
                return Err(ReportError::AlreadyFinalized);
            }
            if let Some(missing) = self.order.iter().find(|n| !state.results.contains_key(*n)) {
                return Err(ReportError::MissingResult(missing.clone()));
            }
            state.finalized = true;
            self.order
                .iter()
                .filter_map(|name| state.results.remove(name))
                .collect()
        };

        let summary = RunSummary::from_results(self.run_id, results, self.started.elapsed());
        self.sink
            .write(&LogRecord::Summary(SummaryLine::from_summary(&summary)));
        Ok(summary)
    }

    fn lock(&self) -> MutexGuard<'_, ReporterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
