//! PostgreSQL implementation of the connection traits, backed by sqlx.

use std::fmt;
use std::time::Duration;

use pgbatch_core::types::Row;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor};

use crate::connection::{Connector, ScriptConnection};
use crate::error::DbError;
use crate::row::row_to_json;

/// Time allowed for establishing a connection when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const APPLICATION_NAME: &str = "pgbatch";

/// Where and how to reach the database.
#[derive(Clone)]
pub struct PgSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub connect_timeout: Duration,
}

impl PgSettings {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
            .application_name(APPLICATION_NAME)
    }

    /// `user@host:port/database`, safe to log.
    pub fn display_target(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

impl fmt::Debug for PgSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Opens one [`PgConnection`] per call.
///
/// Every session has its time zone pinned to UTC so timestamp columns render
/// the same regardless of server defaults.
pub struct PgConnector {
    options: PgConnectOptions,
    connect_timeout: Duration,
    target: String,
}

impl PgConnector {
    pub fn new(settings: PgSettings) -> Self {
        Self::from_options(settings.connect_options(), settings.connect_timeout)
    }

    /// Build from ready-made sqlx options, e.g. parsed from a URL.
    pub fn from_options(options: PgConnectOptions, connect_timeout: Duration) -> Self {
        let target = format!(
            "{}@{}:{}/{}",
            options.get_username(),
            options.get_host(),
            options.get_port(),
            options.get_database().unwrap_or_default()
        );
        Self {
            options,
            connect_timeout,
            target,
        }
    }

    /// `user@host:port/database` of the server this connector dials.
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Connector for PgConnector {
    type Connection = PgScriptConnection;

    async fn connect(&self) -> Result<PgScriptConnection, DbError> {
        let timeout = self.connect_timeout;
        let mut conn = tokio::time::timeout(timeout, PgConnection::connect_with(&self.options))
            .await
            .map_err(|_| {
                DbError::Connection(format!(
                    "Timed out after {}s connecting to {}",
                    timeout.as_secs(),
                    self.target
                ))
            })??;

        conn.execute(sqlx::raw_sql("SET TIME ZONE 'UTC'")).await?;

        Ok(PgScriptConnection { conn })
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A single PostgreSQL session.
///
/// Statements go over the simple query protocol: no parameter binding, and a
/// script may contain several `;`-separated statements. Each call runs in
/// autocommit mode unless the SQL manages its own transaction.
pub struct PgScriptConnection {
    conn: PgConnection,
}

impl ScriptConnection for PgScriptConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        let result = self.conn.execute(sqlx::raw_sql(sql)).await?;
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, DbError> {
        let rows = self.conn.fetch_all(sqlx::raw_sql(sql)).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn close(self) {
        if let Err(e) = self.conn.close().await {
            tracing::debug!(error = %e, "Error while closing connection");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
