use pgbatch_core::error::CoreError;
use pgbatch_db::DbError;

use crate::reporter::ReportError;

/// Errors that abort a run before or after script execution.
///
/// Script-level failures are never `RunnerError`s; they are recorded as
/// failed results in the summary.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] CoreError),

    #[error("Database unavailable: {0}")]
    Database(#[from] DbError),

    #[error("Run report incomplete: {0}")]
    Report(#[from] ReportError),
}

impl RunnerError {
    /// Process exit code for an aborted run.
    pub fn exit_code(&self) -> u8 {
        2
    }
}
