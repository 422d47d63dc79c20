//! Execution of a single script.
//!
//! [`run`] never returns an error: every failure, including a panic inside
//! the driver, becomes a failed [`ExecutionResult`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use pgbatch_core::result::{ExecutionResult, FailureKind};
use pgbatch_core::script::{ScriptDefinition, ScriptKind};
use pgbatch_core::types::Row;
use pgbatch_db::{ConnectionPool, Connector, ScriptConnection};

enum Output {
    Affected(u64),
    Rows(Vec<Row>),
}

struct Failure {
    kind: FailureKind,
    message: String,
}

/// Execute `script` on a connection from `pool`.
///
/// The statement is bounded by the script's own timeout, or
/// `default_timeout` when the script has none. The connection goes back to
/// the pool only after a clean success; after any failure it is discarded.
pub async fn run<C: Connector>(
    script: &ScriptDefinition,
    pool: &ConnectionPool<C>,
    default_timeout: Option<Duration>,
) -> ExecutionResult {
    let started_at = Utc::now();
    let clock = Instant::now();
    let name = script.name();
    let kind = script.kind();

    tracing::debug!(script = %name, %kind, "Script started");

    let outcome = match pool.acquire().await {
        Ok(mut conn) => {
            let timeout = script.timeout().or(default_timeout);
            let executed = AssertUnwindSafe(execute(&mut *conn, script, timeout))
                .catch_unwind()
                .await;
            match executed {
                Ok(Ok(output)) => {
                    conn.release(true);
                    Ok(output)
                }
                Ok(Err(failure)) => {
                    conn.release(false);
                    Err(failure)
                }
                Err(panic) => {
                    drop(conn);
                    Err(Failure {
                        kind: FailureKind::Panicked,
                        message: format!("Driver panicked: {}", panic_message(&*panic)),
                    })
                }
            }
        }
        Err(e) => Err(Failure {
            kind: FailureKind::Connection,
            message: e.to_string(),
        }),
    };

    let elapsed = clock.elapsed();
    let result = match outcome {
        Ok(Output::Affected(affected)) => {
            ExecutionResult::succeeded(name, kind, Some(affected), None, started_at, elapsed)
        }
        Ok(Output::Rows(rows)) => {
            let count = rows.len() as u64;
            ExecutionResult::succeeded(name, kind, Some(count), Some(rows), started_at, elapsed)
        }
        Err(failure) => {
            ExecutionResult::failed(name, kind, failure.kind, failure.message, started_at, elapsed)
        }
    };

    tracing::debug!(
        script = %name,
        outcome = %result.outcome,
        duration_ms = result.duration_ms,
        "Script finished",
    );
    result
}

async fn execute<T: ScriptConnection>(
    conn: &mut T,
    script: &ScriptDefinition,
    timeout: Option<Duration>,
) -> Result<Output, Failure> {
    let work = async {
        match script.kind() {
            ScriptKind::Command => conn.execute(script.sql()).await.map(Output::Affected),
            ScriptKind::Query => conn.query(script.sql()).await.map(Output::Rows),
        }
    };

    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| Failure {
            kind: FailureKind::Timeout,
            message: format!("Statement timed out after {limit:?}"),
        })?,
        None => work.await,
    };

    result.map_err(|e| Failure {
        kind: if e.is_connection_error() {
            FailureKind::Connection
        } else {
            FailureKind::Execution
        },
        message: e.to_string(),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
