//! Fixed-size connection pool
//!
//! Connections are opened eagerly under the aliases `conn_0` ..
//! `conn_{N-1}`. A semaphore with one permit per idle connection bounds
//! checkouts; a checked-out connection is returned when its
//! [`PooledConnection`] guard drops, on every exit path.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::connection::{Connector, StoreConnection};
use crate::error::{Result, StoreError};

/// Connection pool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPoolConfig {
    /// Number of connections opened at startup
    pub pool_size: usize,

    /// Default wait for a free connection
    pub acquire_timeout: Duration,

    /// Upper bound on a liveness probe
    pub probe_timeout: Duration,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            acquire_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_millis(100),
        }
    }
}

impl ConnectionPoolConfig {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Default::default()
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

struct Slot<C> {
    alias: String,
    conn: C,
}

struct PoolInner<K: Connector> {
    connector: K,
    config: ConnectionPoolConfig,
    idle: Mutex<VecDeque<Slot<K::Connection>>>,
    available: Arc<Semaphore>,
    closed: AtomicBool,
    reconnects: AtomicU64,
}

impl<K: Connector> PoolInner<K> {
    fn give_back(&self, slot: Slot<K::Connection>) {
        // `closed` is only flipped under the idle lock, so a slot pushed
        // here is always seen by `close`
        {
            let mut idle = self.idle.lock();
            if !self.closed.load(Ordering::SeqCst) {
                idle.push_back(slot);
                return;
            }
        }

        debug!(alias = %slot.alias, "Pool closed, disconnecting returned connection");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { slot.conn.disconnect().await });
        }
    }
}

/// A pool of named store connections
///
/// Cloning is cheap and shares the same connections.
pub struct ConnectionPool<K: Connector> {
    inner: Arc<PoolInner<K>>,
}

impl<K: Connector> Clone for ConnectionPool<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Connector> fmt::Debug for ConnectionPool<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("size", &self.size())
            .field("idle", &self.idle_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<K: Connector> ConnectionPool<K> {
    /// Open `pool_size` connections
    ///
    /// Fails if any connection cannot be opened; connections opened before
    /// the failure are disconnected.
    pub async fn connect(connector: K, config: ConnectionPoolConfig) -> Result<Self> {
        if config.pool_size == 0 {
            return Err(StoreError::InvalidConfig(
                "pool_size must be at least 1".into(),
            ));
        }

        let mut idle = VecDeque::with_capacity(config.pool_size);
        for i in 0..config.pool_size {
            let alias = format!("conn_{i}");
            match connector.connect(&alias).await {
                Ok(conn) => {
                    debug!(alias = %alias, "Connection opened");
                    idle.push_back(Slot { alias, conn });
                }
                Err(e) => {
                    warn!(alias = %alias, error = %e, "Failed to open pooled connection");
                    for slot in idle.drain(..) {
                        slot.conn.disconnect().await;
                    }
                    return Err(e);
                }
            }
        }

        info!(pool_size = config.pool_size, "Connection pool ready");

        Ok(Self {
            inner: Arc::new(PoolInner {
                available: Arc::new(Semaphore::new(config.pool_size)),
                connector,
                config,
                idle: Mutex::new(idle),
                closed: AtomicBool::new(false),
                reconnects: AtomicU64::new(0),
            }),
        })
    }

    /// Check out a connection, waiting up to the configured acquire timeout
    pub async fn acquire(&self) -> Result<PooledConnection<K>> {
        self.acquire_timeout(self.inner.config.acquire_timeout).await
    }

    /// Check out a connection, waiting up to `timeout`
    ///
    /// The connection is probed before it is handed out. A dead connection
    /// is reconnected under the same alias; if that fails the slot goes
    /// back to the pool and [`StoreError::ReconnectFailed`] is returned.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PooledConnection<K>> {
        if self.is_closed() {
            return Err(StoreError::PoolClosed);
        }

        let permit = match tokio::time::timeout(
            timeout,
            Arc::clone(&self.inner.available).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(StoreError::PoolClosed),
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    pool_size = self.size(),
                    "No connection available"
                );
                return Err(StoreError::PoolExhausted { timeout });
            }
        };

        let slot = self
            .inner
            .idle
            .lock()
            .pop_front()
            .ok_or(StoreError::PoolClosed)?;

        let mut conn = PooledConnection {
            pool: Arc::clone(&self.inner),
            slot: Some(slot),
            permit: Some(permit),
        };

        if !conn.is_alive().await {
            conn.reconnect().await?;
        }

        debug!(alias = conn.alias(), "Connection acquired");
        Ok(conn)
    }

    /// Return a connection to the pool
    ///
    /// Equivalent to dropping the guard.
    pub fn release(&self, conn: PooledConnection<K>) {
        drop(conn);
    }

    /// Close the pool
    ///
    /// Idle connections are disconnected now; checked-out connections are
    /// disconnected when their guards drop. Waiting acquirers fail with
    /// [`StoreError::PoolClosed`]. Calling this more than once is a no-op.
    pub async fn close(&self) {
        let idle: Vec<_> = {
            let mut idle = self.inner.idle.lock();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            idle.drain(..).collect()
        };

        self.inner.available.close();
        let count = idle.len();
        for slot in idle {
            slot.conn.disconnect().await;
        }

        info!(disconnected = count, "Connection pool closed");
    }

    /// Configured number of connections
    pub fn size(&self) -> usize {
        self.inner.config.pool_size
    }

    /// Connections currently idle in the pool
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Connections currently checked out
    pub fn in_use(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.size().saturating_sub(self.idle_count())
    }

    /// Successful reconnects since the pool opened
    pub fn reconnect_count(&self) -> u64 {
        self.inner.reconnects.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ConnectionPoolConfig {
        &self.inner.config
    }
}

/// Exclusive handle on a pooled connection
///
/// Dereferences to the underlying connection. Dropping it returns the
/// connection to the pool.
pub struct PooledConnection<K: Connector> {
    pool: Arc<PoolInner<K>>,
    slot: Option<Slot<K::Connection>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<K: Connector> PooledConnection<K> {
    fn slot(&self) -> &Slot<K::Connection> {
        // Only taken in Drop
        self.slot.as_ref().unwrap_or_else(|| unreachable!())
    }

    /// Alias this connection is registered under
    pub fn alias(&self) -> &str {
        &self.slot().alias
    }

    /// Probe the connection, bounded by the pool's probe timeout
    pub async fn is_alive(&self) -> bool {
        matches!(
            tokio::time::timeout(self.pool.config.probe_timeout, self.slot().conn.ping()).await,
            Ok(Ok(()))
        )
    }

    /// Replace the connection with a fresh one under the same alias
    pub async fn reconnect(&mut self) -> Result<()> {
        let alias = self.alias().to_string();
        warn!(alias = %alias, "Connection unhealthy, reconnecting");

        match self.pool.connector.connect(&alias).await {
            Ok(fresh) => {
                if let Some(slot) = self.slot.as_mut() {
                    let stale = std::mem::replace(&mut slot.conn, fresh);
                    stale.disconnect().await;
                }
                self.pool.reconnects.fetch_add(1, Ordering::Relaxed);
                info!(alias = %alias, "Reconnected");
                Ok(())
            }
            Err(e) => {
                warn!(alias = %alias, error = %e, "Reconnect failed");
                Err(StoreError::ReconnectFailed {
                    alias,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Probe the connection and reconnect if it is dead
    pub async fn validate(&mut self) -> Result<()> {
        if self.is_alive().await {
            return Ok(());
        }
        self.reconnect().await
    }
}

impl<K: Connector> Deref for PooledConnection<K> {
    type Target = K::Connection;

    fn deref(&self) -> &Self::Target {
        &self.slot().conn
    }
}

impl<K: Connector> fmt::Debug for PooledConnection<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("alias", &self.slot.as_ref().map(|s| s.alias.as_str()))
            .finish()
    }
}

impl<K: Connector> Drop for PooledConnection<K> {
    fn drop(&mut self) {
        // The slot must be back in the idle queue before the permit is
        // released, or a woken acquirer could find the queue empty.
        if let Some(slot) = self.slot.take() {
            debug!(alias = %slot.alias, "Connection released");
            self.pool.give_back(slot);
        }
        drop(self.permit.take());
    }
}
