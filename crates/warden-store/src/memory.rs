//! In-process drivers for development and tests.
//!
//! These honor the same contracts as the Redis and Postgres drivers,
//! including per-key expiry (measured on Tokio's clock, so paused-time
//! tests can advance it). Each one can also be switched into an
//! "unavailable" mode where every call fails, to exercise outage paths.
//! [`MemoryCache`] can additionally fail calls on single keys.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{AuditRecord, AuditStore, CacheStore, StoreError, User, UserDirectory};

/// Shared outage switch.
#[derive(Debug, Default)]
struct Outage(AtomicBool);

impl Outage {
    fn set(&self, down: bool) {
        self.0.store(down, Ordering::SeqCst);
    }

    fn check(&self, what: &str) -> Result<(), StoreError> {
        if self.0.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(format!("{what} is down")))
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Value {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires.is_none_or(|at| at > now)
    }
}

/// Every this many `set_ex` calls, expired keys are dropped from the map.
const PRUNE_EVERY: u64 = 256;

/// [`CacheStore`] held in a `HashMap`.
///
/// Expired keys are dropped when touched, and in bulk every
/// [`PRUNE_EVERY`] writes, so keys nobody reads again do not pile up.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    outage: Outage,
    failing: StdMutex<HashSet<String>>,
    writes: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, down: bool) {
        self.outage.set(down);
    }

    /// Makes every call touching `key` fail (or succeed again).
    pub fn set_key_failing(&self, key: &str, failing: bool) {
        let mut keys = self.failing.lock().unwrap_or_else(PoisonError::into_inner);
        if failing {
            keys.insert(key.to_string());
        } else {
            keys.remove(key);
        }
    }

    fn check(&self, key: &str) -> Result<(), StoreError> {
        self.outage.check("cache")?;
        let keys = self.failing.lock().unwrap_or_else(PoisonError::into_inner);
        if keys.contains(key) {
            return Err(StoreError::Unavailable(format!("cache cannot reach {key}")));
        }
        Ok(())
    }

    /// Drops every expired key. Returns how many were removed.
    pub async fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    /// Remaining time-to-live of `key`, if it exists and has one.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl CacheStore for MemoryCache {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check(key)?;
        let entry = Entry {
            value: Value::Str(value.to_string()),
            expires: Some(Instant::now() + ttl),
        };
        self.entries.lock().await.insert(key.to_string(), entry);

        if self.writes.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            let pruned = self.prune_expired().await;
            if pruned > 0 {
                tracing::debug!(pruned, "expired cache keys dropped");
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check(key)?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };
        if !entry.is_live(now) {
            entries.remove(key);
            return Ok(None);
        }
        match &entry.value {
            Value::Str(s) => Ok(Some(s.clone())),
            Value::Set(_) => Err(StoreError::Unavailable(format!(
                "WRONGTYPE {key} holds a set"
            ))),
        }
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.check(key)?;
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.check(key)?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(key.to_string())
            .and_modify(|e| {
                if !e.is_live(now) {
                    *e = Entry {
                        value: Value::Set(HashSet::new()),
                        expires: None,
                    };
                }
            })
            .or_insert_with(|| Entry {
                value: Value::Set(HashSet::new()),
                expires: None,
            });
        match &mut entry.value {
            Value::Set(set) => {
                set.insert(member.to_string());
                Ok(())
            }
            Value::Str(_) => Err(StoreError::Unavailable(format!(
                "WRONGTYPE {key} holds a string"
            ))),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.check(key)?;
        let mut entries = self.entries.lock().await;
        let now_empty = match entries.get_mut(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => {
                set.remove(member);
                set.is_empty()
            }
            _ => false,
        };
        // Redis deletes a set once its last member is removed.
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.check(key)?;
        let now = Instant::now();
        let entries = self.entries.lock().await;
        match entries.get(key).filter(|e| e.is_live(now)) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check(key)?;
        if let Some(entry) = self.entries.lock().await.get_mut(key) {
            entry.expires = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// [`AuditStore`] held in a `HashMap` keyed by token.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    rows: Mutex<HashMap<String, AuditRecord>>,
    outage: Outage,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, down: bool) {
        self.outage.set(down);
    }

    /// Number of shadow rows currently held.
    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl AuditStore for MemoryAudit {
    async fn upsert_session(&self, record: &AuditRecord) -> Result<(), StoreError> {
        self.outage.check("audit store")?;
        self.rows
            .lock()
            .await
            .insert(record.token.clone(), record.clone());
        Ok(())
    }

    async fn find_session(&self, token: &str) -> Result<Option<AuditRecord>, StoreError> {
        self.outage.check("audit store")?;
        Ok(self.rows.lock().await.get(token).cloned())
    }

    async fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        self.outage.check("audit store")?;
        self.rows.lock().await.remove(token);
        Ok(())
    }

    async fn delete_user_sessions(&self, user_id: &str) -> Result<u64, StoreError> {
        self.outage.check("audit store")?;
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|_, r| r.user_id != user_id);
        Ok((before - rows.len()) as u64)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.outage.check("audit store")?;
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|_, r| r.expires_at >= now);
        Ok((before - rows.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// [`UserDirectory`] held in a `HashMap` keyed by user id.
#[derive(Debug, Default)]
pub struct MemoryUsers {
    users: Mutex<HashMap<String, User>>,
    outage: Outage,
}

impl MemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, down: bool) {
        self.outage.set(down);
    }

    /// Removes an account. Returns `true` if it existed.
    pub async fn remove(&self, id: &str) -> bool {
        self.users.lock().await.remove(id).is_some()
    }
}

impl UserDirectory for MemoryUsers {
    async fn find_by_username(&self, username: &str) -> Result<User, StoreError> {
        self.outage.check("user directory")?;
        self.users
            .lock()
            .await
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_id(&self, id: &str) -> Result<User, StoreError> {
        self.outage.check("user directory")?;
        self.users
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn exists(&self, username: &str, email: &str) -> Result<bool, StoreError> {
        self.outage.check("user directory")?;
        Ok(self
            .users
            .lock()
            .await
            .values()
            .any(|u| u.username == username || u.email == email))
    }

    async fn create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        self.outage.check("user directory")?;
        let mut users = self.users.lock().await;
        if users
            .values()
            .any(|u| u.username == username || u.email == email)
        {
            return Err(StoreError::Conflict(
                "username or email already exists".into(),
            ));
        }

        let now = Utc::now();
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id.clone(), user.clone());
        Ok(user)
    }
}

// =========================================================================
// Tests
// =========================================================================
