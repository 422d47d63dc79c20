//! Database access for pgbatch: a bounded connection pool over a pluggable
//! [`Connector`], and its PostgreSQL implementation.

pub mod connection;
pub mod error;
pub mod pool;
pub mod postgres;
pub mod row;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use connection::{Connector, ScriptConnection};
pub use error::DbError;
pub use pool::{ConnectionPool, PoolBounds, PoolOptions, PoolStatus, PooledConnection};
pub use postgres::{PgConnector, PgScriptConnection, PgSettings};

/// The production pool type.
pub type DbPool = ConnectionPool<PgConnector>;

/// Create a PostgreSQL pool and open its minimum connections.
pub async fn create_pool(settings: PgSettings, options: PoolOptions) -> Result<DbPool, DbError> {
    let connector = PgConnector::new(settings);
    tracing::info!(target_db = %connector.target(), "Connecting to database");
    ConnectionPool::connect(connector, options).await
}
