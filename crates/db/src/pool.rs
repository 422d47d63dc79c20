//! Bounded connection pool.
//!
//! [`ConnectionPool`] keeps between `min` and `max` live connections. Checkout
//! slots are a FIFO [`Semaphore`] with `max` permits, so waiters are served in
//! arrival order and no more than `max` connections are ever open. A
//! connection is handed out as a [`PooledConnection`] guard; dropping the
//! guard without calling [`PooledConnection::release`] discards the
//! connection, which covers errors, timeouts and panics in the holder.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use pgbatch_core::error::CoreError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::connection::{Connector, ScriptConnection};
use crate::error::DbError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Connections opened eagerly when no minimum is configured.
pub const DEFAULT_CONNECTIONS_MIN: usize = 1;

/// Upper bound on open connections when no maximum is configured.
pub const DEFAULT_CONNECTIONS_MAX: usize = 10;

/// Idle connections older than this are replaced on the next checkout.
pub const DEFAULT_MAX_IDLE_LIFETIME: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Validated `[min, max]` connection bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolBounds {
    min: usize,
    max: usize,
}

impl PoolBounds {
    /// Rules: `min >= 1`, `min <= max` and `max` fits a semaphore.
    pub fn new(min: usize, max: usize) -> Result<Self, CoreError> {
        if min < 1 {
            return Err(CoreError::config(
                "connections_min must be at least 1".to_string(),
            ));
        }
        if min > max {
            return Err(CoreError::config(format!(
                "connections_min ({min}) must not exceed connections_max ({max})"
            )));
        }
        if max > Semaphore::MAX_PERMITS {
            return Err(CoreError::config(format!(
                "connections_max ({max}) must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

impl Default for PoolBounds {
    fn default() -> Self {
        Self {
            min: DEFAULT_CONNECTIONS_MIN,
            max: DEFAULT_CONNECTIONS_MAX,
        }
    }
}

/// Pool construction options.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    bounds: PoolBounds,
    max_idle_lifetime: Option<Duration>,
}

impl PoolOptions {
    pub fn new(bounds: PoolBounds) -> Self {
        Self {
            bounds,
            max_idle_lifetime: Some(DEFAULT_MAX_IDLE_LIFETIME),
        }
    }

    /// How long a connection may sit idle before it is replaced.
    /// `None` keeps idle connections indefinitely.
    pub fn max_idle_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_idle_lifetime = lifetime;
        self
    }

    pub fn bounds(&self) -> PoolBounds {
        self.bounds
    }
}

/// Point-in-time pool accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Open connections, idle or checked out.
    pub live: usize,
    pub idle: usize,
    pub in_use: usize,
    pub max: usize,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct IdleConnection<T> {
    conn: T,
    since: Instant,
}

struct Shared<C: Connector> {
    connector: C,
    options: PoolOptions,
    slots: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection<C::Connection>>>,
    live: AtomicUsize,
    in_use: AtomicUsize,
    closed: AtomicBool,
}

impl<C: Connector> Shared<C> {
    fn idle_guard(&self) -> MutexGuard<'_, VecDeque<IdleConnection<C::Connection>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn open(&self) -> Result<C::Connection, DbError> {
        let conn = self.connector.connect().await?;
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(live, max = self.options.bounds.max, "Opened database connection");
        Ok(conn)
    }

    fn pop_idle(&self) -> Option<IdleConnection<C::Connection>> {
        self.idle_guard().pop_front()
    }

    fn is_expired(&self, entry: &IdleConnection<C::Connection>) -> bool {
        self.options
            .max_idle_lifetime
            .is_some_and(|max| entry.since.elapsed() >= max)
    }

    /// Drop a connection without the close handshake.
    fn discard(&self, conn: C::Connection) {
        drop(conn);
        let live = self.live.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::debug!(live, "Discarded database connection");
    }

    /// Close with the handshake. Stops counting as live before the await.
    async fn close_gracefully(&self, conn: C::Connection) {
        let live = self.live.fetch_sub(1, Ordering::SeqCst) - 1;
        conn.close().await;
        tracing::debug!(live, "Closed database connection");
    }

    /// Return a checked-out connection. Healthy connections go back to the
    /// idle set unless the pool has been shut down.
    fn checkin(&self, conn: C::Connection, healthy: bool) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
        if healthy {
            // `closed` is read under the idle lock so a concurrent shutdown
            // cannot miss a connection pushed here.
            let mut idle = self.idle_guard();
            if !self.closed.load(Ordering::SeqCst) {
                idle.push_back(IdleConnection {
                    conn,
                    since: Instant::now(),
                });
                return;
            }
        }
        self.discard(conn);
    }
}

// ---------------------------------------------------------------------------
// ConnectionPool
// ---------------------------------------------------------------------------

/// A bounded, fair pool of database connections.
///
/// Cheap to clone; clones share the same connections.
pub struct ConnectionPool<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("bounds", &self.shared.options.bounds)
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Create a pool without opening any connection.
    pub fn new(connector: C, options: PoolOptions) -> Self {
        let PoolBounds { min, max } = options.bounds;
        Self {
            shared: Arc::new(Shared {
                connector,
                options,
                slots: Arc::new(Semaphore::new(max)),
                idle: Mutex::new(VecDeque::with_capacity(min)),
                live: AtomicUsize::new(0),
                in_use: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a pool and [`warm`](Self::warm) it.
    ///
    /// Fails if `min` connections cannot be established; a run cannot start
    /// in that case.
    pub async fn connect(connector: C, options: PoolOptions) -> Result<Self, DbError> {
        let pool = Self::new(connector, options);
        pool.warm().await?;
        Ok(pool)
    }

    /// Open connections until `min` are live.
    ///
    /// Each open holds a checkout slot, so warming never pushes the pool
    /// past `max` even if acquisitions run concurrently.
    pub async fn warm(&self) -> Result<(), DbError> {
        let min = self.shared.options.bounds.min;
        let mut opened = 0usize;

        while self.shared.live.load(Ordering::SeqCst) < min {
            let _slot = self
                .shared
                .slots
                .acquire()
                .await
                .map_err(|_| DbError::PoolClosed)?;
            if self.shared.live.load(Ordering::SeqCst) >= min {
                break;
            }

            let conn = self.shared.open().await?;
            let mut idle = self.shared.idle_guard();
            if self.is_closed() {
                drop(idle);
                self.shared.discard(conn);
                return Err(DbError::PoolClosed);
            }
            idle.push_back(IdleConnection {
                conn,
                since: Instant::now(),
            });
            opened += 1;
        }

        tracing::info!(opened, min, max = self.shared.options.bounds.max, "Connection pool warmed");
        Ok(())
    }

    /// Check out a connection, waiting for a free slot if all `max` are in use.
    ///
    /// Reuses an idle connection when one is available, otherwise opens a
    /// new one. Connection failures surface as [`DbError::Connection`] and
    /// free the slot again; the pool does not retry.
    pub async fn acquire(&self) -> Result<PooledConnection<C>, DbError> {
        let permit = Arc::clone(&self.shared.slots)
            .acquire_owned()
            .await
            .map_err(|_| DbError::PoolClosed)?;

        let conn = match self.take_idle().await {
            Some(conn) => conn,
            None => self.shared.open().await?,
        };

        self.shared.in_use.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection {
            conn: Some(conn),
            shared: Arc::clone(&self.shared),
            _permit: permit,
        })
    }

    /// Return a connection obtained from this pool.
    ///
    /// Equivalent to [`PooledConnection::release`].
    pub fn release(&self, conn: PooledConnection<C>, healthy: bool) {
        conn.release(healthy);
    }

    /// Close all idle connections and refuse further `acquire()` calls.
    ///
    /// Connections currently checked out stay valid; they are closed when
    /// released.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut idle = self.shared.idle_guard();
            self.shared.closed.store(true, Ordering::SeqCst);
            idle.drain(..).collect()
        };
        self.shared.slots.close();

        let closed = drained.len();
        for entry in drained {
            self.shared.close_gracefully(entry.conn).await;
        }

        tracing::info!(
            closed,
            in_use = self.shared.in_use.load(Ordering::SeqCst),
            "Connection pool shut down",
        );
    }

    /// Verify the database answers a trivial statement.
    pub async fn health_check(&self) -> Result<(), DbError> {
        let mut conn = self.acquire().await?;
        match conn.execute("SELECT 1").await {
            Ok(_) => {
                conn.release(true);
                Ok(())
            }
            Err(e) => {
                conn.release(false);
                Err(e)
            }
        }
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            live: self.shared.live.load(Ordering::SeqCst),
            idle: self.shared.idle_guard().len(),
            in_use: self.shared.in_use.load(Ordering::SeqCst),
            max: self.shared.options.bounds.max,
        }
    }

    pub fn bounds(&self) -> PoolBounds {
        self.shared.options.bounds
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Pop idle connections until a fresh one is found, closing expired ones.
    async fn take_idle(&self) -> Option<C::Connection> {
        while let Some(entry) = self.shared.pop_idle() {
            if self.shared.is_expired(&entry) {
                tracing::debug!("Replacing expired idle connection");
                self.shared.close_gracefully(entry.conn).await;
                continue;
            }
            return Some(entry.conn);
        }
        None
    }
}

// ---------------------------------------------------------------------------
// PooledConnection
// ---------------------------------------------------------------------------

/// Exclusive custody of one pooled connection.
///
/// Dereferences to the underlying [`ScriptConnection`]. Hand it back with
/// [`release`](Self::release); if it is dropped instead, the connection is
/// treated as unhealthy and discarded.
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    shared: Arc<Shared<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> PooledConnection<C> {
    /// Return the connection to its pool.
    ///
    /// `healthy == false` closes the connection and frees its place so a
    /// later `acquire()` may open a replacement.
    pub fn release(mut self, healthy: bool) {
        if let Some(conn) = self.conn.take() {
            self.shared.checkin(conn, healthy);
        }
    }
}

impl<C: Connector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("released", &self.conn.is_none())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("pooled connection is present until released")
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("pooled connection is present until released")
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!("Pooled connection dropped without release, discarding it");
            self.shared.checkin(conn, false);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
