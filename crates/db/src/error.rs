/// Errors surfaced by connections and the connection pool.
///
/// The runner never lets these escape a worker: each one is converted into
/// a failed execution result for the script that hit it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DbError {
    /// A connection could not be established or was lost.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The database rejected or failed a statement.
    #[error("Execution error: {0}")]
    Execution(String),

    /// `acquire()` was called after the pool was shut down.
    #[error("Connection pool is shut down")]
    PoolClosed,
}

impl DbError {
    /// Whether the connection that produced this error can still be trusted.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::PoolClosed)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => match db_err.code() {
                Some(code) => Self::Execution(format!("{db_err} (SQLSTATE {code})")),
                None => Self::Execution(db_err.to_string()),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::Configuration(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Connection(err.to_string()),
            _ => Self::Execution(err.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
