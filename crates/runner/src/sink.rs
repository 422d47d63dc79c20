//! Destinations for run records.
//!
//! The reporter never formats or writes output itself; it hands
//! [`LogRecord`]s to a [`LogSink`]. The binary uses [`TracingSink`], tests use
//! [`MemorySink`].

use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use pgbatch_core::result::{ExecutionResult, FailureKind, Outcome, RunOutcome, RunSummary};
use pgbatch_core::script::ScriptKind;
use pgbatch_core::types::{RunId, Timestamp};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One finished script.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultLine {
    pub run_id: RunId,
    pub timestamp: Timestamp,
    pub script: String,
    pub kind: ScriptKind,
    pub outcome: Outcome,
    pub duration_ms: u64,
    pub rows: Option<u64>,
    pub failure: Option<FailureKind>,
    pub error: Option<String>,
}

impl ResultLine {
    pub fn from_result(run_id: RunId, result: &ExecutionResult) -> Self {
        Self {
            run_id,
            timestamp: Utc::now(),
            script: result.script_name.clone(),
            kind: result.kind,
            outcome: result.outcome,
            duration_ms: result.duration_ms,
            rows: result.row_count,
            failure: result.failure_kind(),
            error: result.error_message().map(str::to_string),
        }
    }

    /// Human-readable recap entry, e.g. `[ OK ] Connection check (3 ms, 1 rows)`.
    pub fn recap(&self) -> String {
        let rows = self
            .rows
            .map(|n| format!(", {n} rows"))
            .unwrap_or_default();
        match (&self.outcome, &self.error) {
            (Outcome::Succeeded, _) => {
                format!("[ OK ] {} ({} ms{rows})", self.script, self.duration_ms)
            }
            (Outcome::Failed, Some(error)) => {
                format!("[FAIL] {} ({} ms): {error}", self.script, self.duration_ms)
            }
            (Outcome::Failed, None) => format!("[FAIL] {} ({} ms)", self.script, self.duration_ms),
        }
    }
}

/// The end-of-run summary, followed by a recap of every script in
/// definition order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryLine {
    pub run_id: RunId,
    pub timestamp: Timestamp,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcome: RunOutcome,
    pub duration_ms: u64,
    pub scripts: Vec<ResultLine>,
}

impl SummaryLine {
    pub fn from_summary(summary: &RunSummary) -> Self {
        Self {
            run_id: summary.run_id,
            timestamp: Utc::now(),
            total: summary.total,
            succeeded: summary.succeeded,
            failed: summary.failed,
            outcome: summary.outcome,
            duration_ms: summary.duration_ms,
            scripts: summary
                .results
                .iter()
                .map(|r| ResultLine::from_result(summary.run_id, r))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LogRecord {
    Result(ResultLine),
    Summary(SummaryLine),
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Receives every record of a run, in the order they are produced.
///
/// Called from worker tasks concurrently; implementations must not block for
/// long.
pub trait LogSink: Send + Sync {
    fn write(&self, record: &LogRecord);
}

/// Emits records as structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, record: &LogRecord) {
        match record {
            LogRecord::Result(line) if line.outcome == Outcome::Succeeded => {
                tracing::info!(
                    run_id = %line.run_id,
                    script = %line.script,
                    kind = %line.kind,
                    outcome = %line.outcome,
                    duration_ms = line.duration_ms,
                    rows = ?line.rows,
                    "Script succeeded",
                );
            }
            LogRecord::Result(line) => {
                tracing::error!(
                    run_id = %line.run_id,
                    script = %line.script,
                    kind = %line.kind,
                    outcome = %line.outcome,
                    duration_ms = line.duration_ms,
                    failure = ?line.failure,
                    error = line.error.as_deref().unwrap_or_default(),
                    "Script failed",
                );
            }
            LogRecord::Summary(summary) => {
                if summary.failed == 0 {
                    tracing::info!(
                        run_id = %summary.run_id,
                        total = summary.total,
                        succeeded = summary.succeeded,
                        failed = summary.failed,
                        duration_ms = summary.duration_ms,
                        "Run {}",
                        summary.outcome,
                    );
                } else {
                    tracing::warn!(
                        run_id = %summary.run_id,
                        total = summary.total,
                        succeeded = summary.succeeded,
                        failed = summary.failed,
                        duration_ms = summary.duration_ms,
                        "Run {}",
                        summary.outcome,
                    );
                }
                for line in &summary.scripts {
                    tracing::info!(run_id = %summary.run_id, "{}", line.recap());
                }
            }
        }
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn results(&self) -> Vec<ResultLine> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                LogRecord::Result(line) => Some(line),
                LogRecord::Summary(_) => None,
            })
            .collect()
    }

    pub fn summaries(&self) -> Vec<SummaryLine> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                LogRecord::Summary(line) => Some(line),
                LogRecord::Result(_) => None,
            })
            .collect()
    }
}

impl LogSink for MemorySink {
    fn write(&self, record: &LogRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pgbatch_core::types::new_run_id;

    use super::*;

    fn failed() -> ExecutionResult {
        ExecutionResult::failed(
            "Broken",
            ScriptKind::Command,
            FailureKind::Execution,
            "relation \"nonexistent_table\" does not exist",
            Utc::now(),
            Duration::from_millis(3),
        )
    }

    #[test]
    fn recap_for_success_includes_rows() {
        let result = ExecutionResult::succeeded(
            "Connection check",
            ScriptKind::Query,
            Some(1),
            Some(vec![]),
            Utc::now(),
            Duration::from_millis(3),
        );
        let line = ResultLine::from_result(new_run_id(), &result);
        assert_eq!(line.recap(), "[ OK ] Connection check (3 ms, 1 rows)");
    }

    #[test]
    fn recap_for_failure_includes_error() {
        let line = ResultLine::from_result(new_run_id(), &failed());
        assert_eq!(line.failure, Some(FailureKind::Execution));
        assert!(line.recap().starts_with("[FAIL] Broken (3 ms): relation"));
    }

    #[test]
    fn record_serializes_with_tag() {
        let record = LogRecord::Result(ResultLine::from_result(new_run_id(), &failed()));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["record"], "result");
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["failure"], "execution");
    }

    #[test]
    fn memory_sink_splits_records() {
        let sink = MemorySink::new();
        let run_id = new_run_id();
        let summary = RunSummary::from_results(run_id, vec![failed()], Duration::ZERO);

        sink.write(&LogRecord::Result(ResultLine::from_result(run_id, &failed())));
        sink.write(&LogRecord::Summary(SummaryLine::from_summary(&summary)));

        assert_eq!(sink.records().len(), 2);
        assert_eq!(sink.results().len(), 1);
        let summaries = sink.summaries();
        assert_eq!(summaries[0].failed, 1);
        assert_eq!(summaries[0].scripts[0].script, "Broken");
    }
}
