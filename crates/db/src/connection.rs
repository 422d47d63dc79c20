//! Driver-facing traits.
//!
//! The pool and the runner only ever see a database through these two
//! traits, so the engine can be exercised against an in-memory connector in
//! tests and against PostgreSQL ([`PgConnector`](crate::postgres::PgConnector))
//! in production.

use std::future::Future;

use pgbatch_core::types::Row;

use crate::error::DbError;

/// An open database session able to run script SQL.
pub trait ScriptConnection: Send + 'static {
    /// Run `sql` and discard any rows it returns.
    ///
    /// Returns the number of rows affected, when the driver reports one.
    fn execute(&mut self, sql: &str) -> impl Future<Output = Result<u64, DbError>> + Send;

    /// Run `sql` and materialize every row it returns.
    fn query(&mut self, sql: &str) -> impl Future<Output = Result<Vec<Row>, DbError>> + Send;

    /// Close the session gracefully.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Factory for new [`ScriptConnection`]s.
pub trait Connector: Send + Sync + 'static {
    type Connection: ScriptConnection;

    /// Establish a new session. Failures are [`DbError::Connection`].
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, DbError>> + Send;
}
