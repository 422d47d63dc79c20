//! Round trips against a live server. Run with `DATABASE_URL` set and
//! `cargo test -- --ignored`.

use std::time::Duration;

use assert_matches::assert_matches;
use pgbatch_db::{ConnectionPool, DbError, PgConnector, PoolBounds, PoolOptions, ScriptConnection};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

fn pool(connect_opts: PgConnectOptions, max: usize) -> ConnectionPool<PgConnector> {
    let connector = PgConnector::from_options(connect_opts, Duration::from_secs(10));
    ConnectionPool::new(connector, PoolOptions::new(PoolBounds::new(1, max).unwrap()))
}

#[sqlx::test(migrations = false)]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn query_returns_lowercased_columns(_: PgPoolOptions, connect_opts: PgConnectOptions) {
    let pool = pool(connect_opts, 2);
    pool.warm().await.unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let rows = conn.query("SELECT 1\nas VALUE").await.unwrap();
    conn.release(true);

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["value"], serde_json::json!(1));
    pool.shutdown().await;
}

#[sqlx::test(migrations = false)]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn query_decodes_common_types(_: PgPoolOptions, connect_opts: PgConnectOptions) {
    let pool = pool(connect_opts, 1);
    let mut conn = pool.acquire().await.unwrap();
    let rows = conn
        .query(
            "SELECT true AS flag, 2.5::float8 AS ratio, 'x'::text AS label, \
             NULL::int4 AS missing, '{\"a\":1}'::jsonb AS doc, 12.30::numeric AS amount",
        )
        .await
        .unwrap();
    conn.release(true);

    let row = &rows[0];
    assert_eq!(row["flag"], serde_json::json!(true));
    assert_eq!(row["ratio"], serde_json::json!(2.5));
    assert_eq!(row["label"], serde_json::json!("x"));
    assert!(row["missing"].is_null());
    assert_eq!(row["doc"], serde_json::json!({"a": 1}));
    assert_eq!(row["amount"], serde_json::json!("12.30"));
}

#[sqlx::test(migrations = false)]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn missing_table_is_an_execution_error(_: PgPoolOptions, connect_opts: PgConnectOptions) {
    let pool = pool(connect_opts, 1);
    let mut conn = pool.acquire().await.unwrap();

    let err = conn.execute("SELECT * FROM nonexistent_table").await.unwrap_err();
    assert_matches!(&err, DbError::Execution(msg) if msg.contains("nonexistent_table"));

    // The session survives a statement error.
    conn.execute("SELECT 1").await.unwrap();
    conn.release(true);
}

#[sqlx::test(migrations = false)]
#[ignore = "requires a running PostgreSQL (DATABASE_URL)"]
async fn command_reports_rows_affected(_: PgPoolOptions, connect_opts: PgConnectOptions) {
    let pool = pool(connect_opts, 1);
    pool.health_check().await.unwrap();

    let mut conn = pool.acquire().await.unwrap();
    conn.execute("CREATE TEMP TABLE batch_items (id int)").await.unwrap();
    let affected = conn
        .execute("INSERT INTO batch_items VALUES (1), (2), (3)")
        .await
        .unwrap();
    assert_eq!(affected, 3);
    conn.release(true);
}
