//! In-memory [`Connector`] for exercising the pool and the runner without a
//! database server.
//!
//! Enabled for this crate's own tests and, via the `test-support` feature,
//! for dependent crates' tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use pgbatch_core::types::Row;

use crate::connection::{Connector, ScriptConnection};
use crate::error::DbError;

/// Scripted reaction to a given SQL text.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return these rows (or their count, for `execute`).
    Rows(Vec<Row>),
    /// Report this many affected rows (an empty set, for `query`).
    Affected(u64),
    /// Fail with a database error.
    Fail(String),
    /// Fail as if the session had been lost.
    Disconnect(String),
    /// Sleep before succeeding with no rows.
    Delay(Duration),
    /// Panic inside the driver call.
    Panic,
}

#[derive(Default)]
struct MockState {
    connects: AtomicUsize,
    graceful_closes: AtomicUsize,
    open: AtomicUsize,
    peak_open: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    connect_failures: AtomicUsize,
    latency: Mutex<Duration>,
    close_delay: Mutex<Duration>,
    behaviours: Mutex<HashMap<String, MockBehaviour>>,
    executed: Mutex<Vec<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared-handle mock connector; clones observe the same counters.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every statement by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *lock(&self.state.latency) = latency;
        self
    }

    /// Make every graceful close take `delay`.
    pub fn with_close_delay(self, delay: Duration) -> Self {
        *lock(&self.state.close_delay) = delay;
        self
    }

    /// Register the reaction to an exact SQL text.
    pub fn on(&self, sql: &str, behaviour: MockBehaviour) -> &Self {
        lock(&self.state.behaviours).insert(sql.to_string(), behaviour);
        self
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.state.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Connection attempts, successful or not.
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn graceful_closes(&self) -> usize {
        self.state.graceful_closes.load(Ordering::SeqCst)
    }

    /// Connections currently alive.
    pub fn open_connections(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously alive connections.
    pub fn peak_open(&self) -> usize {
        self.state.peak_open.load(Ordering::SeqCst)
    }

    /// Highest number of statements running at the same time.
    pub fn peak_active(&self) -> usize {
        self.state.peak_active.load(Ordering::SeqCst)
    }

    /// Every SQL text submitted, in submission order.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.state.executed).clone()
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<MockConnection, DbError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        let refuse = self
            .state
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(DbError::Connection("mock: connection refused".into()));
        }

        let open = self.state.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_open.fetch_max(open, Ordering::SeqCst);
        Ok(MockConnection {
            state: Arc::clone(&self.state),
        })
    }
}

/// Session handed out by [`MockConnector`].
pub struct MockConnection {
    state: Arc<MockState>,
}

/// Output of one mocked statement, before it is shaped for `execute`/`query`.
enum MockOutput {
    Rows(Vec<Row>),
    Affected(u64),
}

struct ActiveGuard<'a>(&'a MockState);

impl<'a> ActiveGuard<'a> {
    fn enter(state: &'a MockState) -> Self {
        let now = state.active.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak_active.fetch_max(now, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockConnection {
    async fn run(&self, sql: &str) -> Result<MockOutput, DbError> {
        let _active = ActiveGuard::enter(&self.state);
        lock(&self.state.executed).push(sql.to_string());

        let latency = *lock(&self.state.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let behaviour = lock(&self.state.behaviours).get(sql).cloned();
        match behaviour {
            None => Ok(MockOutput::Affected(0)),
            Some(MockBehaviour::Rows(rows)) => Ok(MockOutput::Rows(rows)),
            Some(MockBehaviour::Affected(n)) => Ok(MockOutput::Affected(n)),
            Some(MockBehaviour::Fail(msg)) => Err(DbError::Execution(msg)),
            Some(MockBehaviour::Disconnect(msg)) => Err(DbError::Connection(msg)),
            Some(MockBehaviour::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(MockOutput::Affected(0))
            }
            Some(MockBehaviour::Panic) => panic!("mock driver panicked on {sql:?}"),
        }
    }
}

impl ScriptConnection for MockConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        Ok(match self.run(sql).await? {
            MockOutput::Rows(rows) => rows.len() as u64,
            MockOutput::Affected(n) => n,
        })
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, DbError> {
        Ok(match self.run(sql).await? {
            MockOutput::Rows(rows) => rows,
            MockOutput::Affected(_) => Vec::new(),
        })
    }

    async fn close(self) {
        let delay = *lock(&self.state.close_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.graceful_closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.state.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Build a [`Row`] from `(column, value)` pairs.
pub fn row<I, K>(columns: I) -> Row
where
    I: IntoIterator<Item = (K, serde_json::Value)>,
    K: Into<String>,
{
    columns.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
