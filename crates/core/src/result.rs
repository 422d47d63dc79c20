//! Per-script execution results and the aggregate run summary.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::script::ScriptKind;
use crate::types::{Row, RunId, Timestamp};

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Outcome tag of a single script execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a script failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No connection could be obtained for the script.
    Connection,
    /// The database rejected or failed the statement.
    Execution,
    /// The statement exceeded its timeout and was abandoned.
    Timeout,
    /// The run was cancelled before the script was dispatched.
    Cancelled,
    /// The driver panicked while executing the statement.
    Panicked,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connection => "connection",
            Self::Execution => "execution",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Panicked => "panicked",
        };
        f.write_str(s)
    }
}

/// Failure details attached to a failed [`ExecutionResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub message: String,
}

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// The recorded outcome of one script.
///
/// Built with [`ExecutionResult::succeeded`] or [`ExecutionResult::failed`]
/// so that the outcome tag and the failure details can never disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub script_name: String,
    pub kind: ScriptKind,
    pub outcome: Outcome,
    /// Rows returned (queries) or rows affected (commands, best effort).
    pub row_count: Option<u64>,
    /// Materialized rows. Only ever `Some` for successful queries.
    pub rows: Option<Vec<Row>>,
    /// Wall-clock duration in milliseconds, including connection acquisition.
    pub duration_ms: u64,
    pub error: Option<ExecutionFailure>,
    pub started_at: Timestamp,
    pub completed_at: Timestamp,
}

impl ExecutionResult {
    /// Result of a script that completed without error.
    pub fn succeeded(
        script_name: impl Into<String>,
        kind: ScriptKind,
        row_count: Option<u64>,
        rows: Option<Vec<Row>>,
        started_at: Timestamp,
        elapsed: Duration,
    ) -> Self {
        Self {
            script_name: script_name.into(),
            kind,
            outcome: Outcome::Succeeded,
            row_count,
            rows,
            duration_ms: elapsed.as_millis() as u64,
            error: None,
            started_at,
            completed_at: chrono::Utc::now(),
        }
    }

    /// Result of a script that did not complete.
    pub fn failed(
        script_name: impl Into<String>,
        kind: ScriptKind,
        failure_kind: FailureKind,
        message: impl Into<String>,
        started_at: Timestamp,
        elapsed: Duration,
    ) -> Self {
        Self {
            script_name: script_name.into(),
            kind,
            outcome: Outcome::Failed,
            row_count: None,
            rows: None,
            duration_ms: elapsed.as_millis() as u64,
            error: Some(ExecutionFailure {
                kind: failure_kind,
                message: message.into(),
            }),
            started_at,
            completed_at: chrono::Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }

    /// Error description, if the script failed.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    AllSucceeded,
    CompletedWithFailures,
}

impl RunOutcome {
    /// Process exit code reported to the invoking orchestrator.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::AllSucceeded => 0,
            Self::CompletedWithFailures => 1,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllSucceeded => f.write_str("all succeeded"),
            Self::CompletedWithFailures => f.write_str("completed with failures"),
        }
    }
}

/// Aggregate over every [`ExecutionResult`] of a run.
///
/// `results` is in script definition order, regardless of completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcome: RunOutcome,
    pub duration_ms: u64,
    pub results: Vec<ExecutionResult>,
}

impl RunSummary {
    /// Build a summary from results already arranged in definition order.
    pub fn from_results(run_id: RunId, results: Vec<ExecutionResult>, elapsed: Duration) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let total = results.len();
        let failed = total - succeeded;
        let outcome = if failed == 0 {
            RunOutcome::AllSucceeded
        } else {
            RunOutcome::CompletedWithFailures
        };

        Self {
            run_id,
            total,
            succeeded,
            failed,
            outcome,
            duration_ms: elapsed.as_millis() as u64,
            results,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.outcome.exit_code()
    }

    /// Look up the result of a script by name.
    pub fn result(&self, script_name: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.script_name == script_name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::new_run_id;

    fn ok(name: &str) -> ExecutionResult {
        ExecutionResult::succeeded(
            name,
            ScriptKind::Command,
            Some(0),
            None,
            chrono::Utc::now(),
            Duration::from_millis(5),
        )
    }

    fn err(name: &str) -> ExecutionResult {
        ExecutionResult::failed(
            name,
            ScriptKind::Command,
            FailureKind::Execution,
            "relation \"nonexistent_table\" does not exist",
            chrono::Utc::now(),
            Duration::from_millis(5),
        )
    }

    #[test]
    fn failed_result_carries_error_and_no_rows() {
        let r = err("b");
        assert!(!r.is_success());
        assert_eq!(r.failure_kind(), Some(FailureKind::Execution));
        assert!(r.error_message().unwrap().contains("nonexistent_table"));
        assert!(r.rows.is_none());
        assert!(r.row_count.is_none());
    }

    #[test]
    fn summary_counts_mixed_results() {
        let summary = RunSummary::from_results(
            new_run_id(),
            vec![ok("A"), err("B"), ok("C")],
            Duration::from_millis(30),
        );
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.outcome, RunOutcome::CompletedWithFailures);
        assert_ne!(summary.exit_code(), 0);
    }

    #[test]
    fn summary_all_succeeded_exits_zero() {
        let summary =
            RunSummary::from_results(new_run_id(), vec![ok("A"), ok("B")], Duration::ZERO);
        assert_eq!(summary.outcome, RunOutcome::AllSucceeded);
        assert_eq!(summary.exit_code(), 0);
    }

    #[test]
    fn empty_run_counts_as_success() {
        let summary = RunSummary::from_results(new_run_id(), vec![], Duration::ZERO);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.outcome, RunOutcome::AllSucceeded);
    }

    #[test]
    fn result_serializes_with_snake_case_tags() {
        let json = serde_json::to_value(err("B")).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["kind"], "command");
        assert_eq!(json["error"]["kind"], "execution");
        assert!(json["rows"].is_null());
    }

    #[test]
    fn summary_lookup_by_name() {
        let summary =
            RunSummary::from_results(new_run_id(), vec![ok("A"), err("B")], Duration::ZERO);
        assert!(summary.result("A").unwrap().is_success());
        assert!(!summary.result("B").unwrap().is_success());
        assert!(summary.result("Z").is_none());
    }
}
