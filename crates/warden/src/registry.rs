//! The connection registry: every open connection and what it is logged in
//! as.
//!
//! The map itself sits behind one async mutex and is touched only on
//! register, deregister, sweep, and shutdown. Per-message activity updates
//! go straight to the record, so a busy connection never contends with the
//! others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::time::Instant;
use warden_transport::{Connection, ConnectionId};

/// Who a connection is logged in as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub user_id: String,
    pub token: String,
}

/// One open connection.
pub struct ConnectionRecord<C> {
    conn: Arc<C>,
    epoch: Instant,
    /// Milliseconds since `epoch`. Only ever moves forward.
    last_activity: AtomicU64,
    binding: StdMutex<Option<Binding>>,
}

impl<C: Connection> ConnectionRecord<C> {
    fn new(conn: Arc<C>, epoch: Instant) -> Self {
        let record = Self {
            conn,
            epoch,
            last_activity: AtomicU64::new(0),
            binding: StdMutex::new(None),
        };
        record.touch();
        record
    }

    pub fn id(&self) -> ConnectionId {
        self.conn.id()
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.conn
    }

    /// Marks the connection as active now.
    pub fn touch(&self) {
        let now = millis_since(self.epoch, Instant::now());
        self.last_activity.fetch_max(now, Ordering::Relaxed);
    }

    /// Instant of the last recorded activity.
    pub fn last_activity(&self) -> Instant {
        self.epoch + Duration::from_millis(self.last_activity.load(Ordering::Relaxed))
    }

    /// How long the connection has been silent as of `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    pub fn binding(&self) -> Option<Binding> {
        self.lock_binding().clone()
    }

    pub fn bind(&self, user_id: impl Into<String>, token: impl Into<String>) {
        *self.lock_binding() = Some(Binding {
            user_id: user_id.into(),
            token: token.into(),
        });
    }

    /// Clears the binding if it is for `token`. Returns whether it was.
    pub fn clear_if(&self, token: &str) -> bool {
        let mut binding = self.lock_binding();
        if binding.as_ref().is_some_and(|b| b.token == token) {
            *binding = None;
            true
        } else {
            false
        }
    }

    fn lock_binding(&self) -> std::sync::MutexGuard<'_, Option<Binding>> {
        // The guarded value is a plain Option; a poisoned lock is still usable.
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn millis_since(epoch: Instant, now: Instant) -> u64 {
    u64::try_from(now.saturating_duration_since(epoch).as_millis()).unwrap_or(u64::MAX)
}

struct Inner<C> {
    open: bool,
    records: HashMap<ConnectionId, Arc<ConnectionRecord<C>>>,
}

/// All open connections.
pub struct ConnectionRegistry<C> {
    inner: Mutex<Inner<C>>,
    epoch: Instant,
}

impl<C: Connection> ConnectionRegistry<C> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                open: true,
                records: HashMap::new(),
            }),
            epoch: Instant::now(),
        }
    }

    /// Adds a connection. Returns `None` once [`close_all`](Self::close_all)
    /// has run; the caller must then close the connection itself.
    pub async fn register(&self, conn: Arc<C>) -> Option<Arc<ConnectionRecord<C>>> {
        let mut inner = self.inner.lock().await;
        if !inner.open {
            return None;
        }
        let record = Arc::new(ConnectionRecord::new(conn, self.epoch));
        inner.records.insert(record.id(), Arc::clone(&record));
        tracing::debug!(id = %record.id(), open = inner.records.len(), "connection registered");
        Some(record)
    }

    /// Removes a connection. Removing an unknown id is a no-op.
    pub async fn deregister(&self, id: ConnectionId) -> Option<Arc<ConnectionRecord<C>>> {
        let mut inner = self.inner.lock().await;
        let removed = inner.records.remove(&id);
        if removed.is_some() {
            tracing::debug!(%id, open = inner.records.len(), "connection deregistered");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Closes and removes every connection silent for longer than
    /// `idle_threshold`. Returns the ids that were evicted.
    ///
    /// Records leave the map under the lock; their handles are closed after
    /// it is released, so a slow close never blocks register or deregister.
    pub async fn sweep(&self, idle_threshold: Duration) -> Vec<ConnectionId> {
        let now = Instant::now();
        let (idle, open) = {
            let mut inner = self.inner.lock().await;
            let idle: Vec<Arc<ConnectionRecord<C>>> = inner
                .records
                .values()
                .filter(|r| r.idle_for(now) > idle_threshold)
                .cloned()
                .collect();
            for record in &idle {
                inner.records.remove(&record.id());
            }
            (idle, inner.records.len())
        };

        close_each(&idle).await;

        let evicted: Vec<ConnectionId> = idle.iter().map(|r| r.id()).collect();
        if !evicted.is_empty() {
            tracing::info!(evicted = evicted.len(), open, "idle connections closed");
        }
        evicted
    }

    /// Closes every connection and refuses further registrations.
    /// Returns how many connections were closed.
    pub async fn close_all(&self) -> usize {
        let all: Vec<Arc<ConnectionRecord<C>>> = {
            let mut inner = self.inner.lock().await;
            inner.open = false;
            inner.records.drain().map(|(_, record)| record).collect()
        };
        close_each(&all).await;
        tracing::info!(closed = all.len(), "all connections closed");
        all.len()
    }
}

impl<C: Connection> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

async fn close_each<C: Connection>(records: &[Arc<ConnectionRecord<C>>]) {
    let results = join_all(records.iter().map(|r| r.conn.close())).await;
    for (record, result) in records.iter().zip(results) {
        if let Err(e) = result {
            tracing::debug!(id = %record.id(), error = %e, "close failed");
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
