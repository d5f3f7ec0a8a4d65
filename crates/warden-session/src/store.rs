//! The session store adapter.
//!
//! Sessions live in two places with different roles:
//!
//! - the **cache** is authoritative: `session:{token}` holds the session as
//!   JSON with a TTL, and `user_sessions:{user_id}` is a set of the user's
//!   tokens with the same TTL. Validation reads only from here.
//! - the **audit store** is a shadow. It is written once per issue/revoke
//!   and its failures are logged, counted, and otherwise ignored.
//!
//! Only a failure of the primary cache write or read is reported to the
//! caller. Index maintenance (the per-user set) is best-effort too.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use warden_store::{AuditRecord, AuditStore, CacheStore, StoreError};

use crate::token::fingerprint;
use crate::{AuditPolicy, Session, StoreConfig, Token};

fn session_key(token: &str) -> String {
    format!("session:{token}")
}

fn user_index_key(user_id: &str) -> String {
    format!("user_sessions:{user_id}")
}

fn presence_key(connection: &str) -> String {
    format!("connection:{connection}")
}

/// Cache + audit adapter used by the session manager.
pub struct SessionStore<C, A> {
    cache: C,
    audit: Arc<A>,
    config: StoreConfig,
    audit_failures: Arc<AtomicU64>,
}

impl<C: CacheStore, A: AuditStore> SessionStore<C, A> {
    pub fn new(cache: C, audit: A, config: StoreConfig) -> Self {
        Self {
            cache,
            audit: Arc::new(audit),
            config,
            audit_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    /// Number of audit writes that have failed since startup.
    pub fn audit_failures(&self) -> u64 {
        self.audit_failures.load(Ordering::Relaxed)
    }

    // -- Sessions ---------------------------------------------------------

    /// Writes `session` with the given TTL, indexes it under its user,
    /// then shadows it to the audit store.
    ///
    /// # Errors
    /// Only when the primary cache write fails.
    pub async fn put(&self, session: &Session, ttl: Duration) -> Result<(), StoreError> {
        let key = session_key(session.token.as_str());
        let body = serde_json::to_string(session).map_err(|source| StoreError::Corrupt {
            key: key.clone(),
            source,
        })?;
        self.cache.set_ex(&key, &body, ttl).await?;

        let index = user_index_key(&session.user_id);
        if let Err(e) = self.cache.sadd(&index, session.token.as_str()).await {
            tracing::warn!(user_id = %session.user_id, error = %e, "session index add failed");
        } else if let Err(e) = self.cache.expire(&index, ttl).await {
            tracing::warn!(user_id = %session.user_id, error = %e, "session index expire failed");
        }

        let record = AuditRecord {
            token: session.token.as_str().to_string(),
            user_id: session.user_id.clone(),
            expires_at: session.expires_at,
            created_at: session.issued_at,
        };
        self.shadow("upsert", move |audit| async move {
            audit.upsert_session(&record).await
        })
        .await;

        tracing::debug!(
            token = session.token.fingerprint(),
            user_id = %session.user_id,
            "session stored"
        );
        Ok(())
    }

    /// Reads a session from the cache without looking at its expiry.
    pub async fn get_raw(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let key = session_key(token);
        let Some(body) = self.cache.get(&key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|source| StoreError::Corrupt { key, source })
    }

    /// Reads a live session. A record past its `expires_at` is treated as
    /// absent and removed on the way out.
    pub async fn get(&self, token: &str) -> Result<Option<Session>, StoreError> {
        match self.get_raw(token).await? {
            Some(session) if session.is_expired() => {
                tracing::debug!(token = fingerprint(token), "stale session dropped on read");
                if let Err(e) = self.remove(&session).await {
                    tracing::warn!(error = %e, "stale session delete failed");
                }
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Deletes a session from every index. Unknown tokens are fine.
    pub async fn delete(&self, token: &str) -> Result<(), StoreError> {
        match self.get_raw(token).await {
            Ok(Some(session)) => self.remove(&session).await,
            Ok(None) => {
                self.cache.del(&session_key(token)).await?;
                self.shadow_delete(token).await;
                Ok(())
            }
            // An undecodable record still gets deleted; its user index entry
            // ages out with the set's TTL.
            Err(StoreError::Corrupt { key, .. }) => {
                self.cache.del(&key).await?;
                self.shadow_delete(token).await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn remove(&self, session: &Session) -> Result<(), StoreError> {
        let token = session.token.as_str();
        self.cache.del(&session_key(token)).await?;
        if let Err(e) = self
            .cache
            .srem(&user_index_key(&session.user_id), token)
            .await
        {
            tracing::warn!(user_id = %session.user_id, error = %e, "session index remove failed");
        }
        self.shadow_delete(token).await;
        Ok(())
    }

    async fn shadow_delete(&self, token: &str) {
        let token = token.to_string();
        self.shadow("delete", move |audit| async move {
            audit.delete_session(&token).await
        })
        .await;
    }

    /// Tokens currently indexed under `user_id`.
    pub async fn index_by_user(&self, user_id: &str) -> Result<Vec<Token>, StoreError> {
        let members = self.cache.smembers(&user_index_key(user_id)).await?;
        Ok(members.into_iter().map(Token::from).collect())
    }

    /// Deletes every session of `user_id`. Per-token failures are logged
    /// and skipped. Returns how many tokens were removed.
    pub async fn delete_all(&self, user_id: &str) -> Result<usize, StoreError> {
        let tokens = self.index_by_user(user_id).await?;
        let mut removed = 0;
        for token in &tokens {
            match self.cache.del(&session_key(token.as_str())).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(token = token.fingerprint(), error = %e, "session delete failed");
                }
            }
        }

        if let Err(e) = self.cache.del(&user_index_key(user_id)).await {
            tracing::warn!(%user_id, error = %e, "session index delete failed");
        }
        let owner = user_id.to_string();
        self.shadow("delete_user", move |audit| async move {
            audit.delete_user_sessions(&owner).await.map(|_| ())
        })
        .await;

        tracing::info!(%user_id, removed, "all sessions revoked");
        Ok(removed)
    }

    // -- Presence ---------------------------------------------------------

    /// Records that `connection` is logged in as `session`. Best-effort.
    pub async fn put_presence(&self, connection: &str, session: &Session, ttl: Duration) {
        let body = serde_json::json!({
            "user_id": session.user_id,
            "token": session.token,
        })
        .to_string();
        if let Err(e) = self.cache.set_ex(&presence_key(connection), &body, ttl).await {
            tracing::warn!(%connection, error = %e, "presence write failed");
        }
    }

    /// Removes the presence record of `connection`. Best-effort.
    pub async fn clear_presence(&self, connection: &str) {
        if let Err(e) = self.cache.del(&presence_key(connection)).await {
            tracing::warn!(%connection, error = %e, "presence delete failed");
        }
    }

    // -- Audit ------------------------------------------------------------

    /// Deletes shadow rows that expired before `now`. Failures are logged
    /// and counted like any other audit failure.
    pub async fn purge_audit(&self, now: DateTime<Utc>) -> u64 {
        match self.audit.purge_expired(now).await {
            Ok(purged) => {
                if purged > 0 {
                    tracing::info!(purged, "expired audit rows purged");
                }
                purged
            }
            Err(e) => {
                note_audit_failure(&self.audit_failures, self.config.alert_threshold, "purge", &e);
                0
            }
        }
    }

    /// Runs one audit write under the configured policy.
    async fn shadow<F, Fut>(&self, op: &'static str, write: F)
    where
        F: FnOnce(Arc<A>) -> Fut,
        Fut: Future<Output = Result<(), StoreError>> + Send + 'static,
    {
        let fut = write(Arc::clone(&self.audit));
        let failures = Arc::clone(&self.audit_failures);
        let threshold = self.config.alert_threshold;
        let task = async move {
            if let Err(e) = fut.await {
                note_audit_failure(&failures, threshold, op, &e);
            }
        };
        match self.config.audit {
            AuditPolicy::Inline => task.await,
            AuditPolicy::Detached => {
                tokio::spawn(task);
            }
        }
    }
}

fn note_audit_failure(
    failures: &AtomicU64,
    threshold: Option<u64>,
    op: &'static str,
    err: &StoreError,
) {
    let total = failures.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::warn!(op, total, error = %err, "audit write failure");
    if let Some(every) = threshold.filter(|n| *n > 0) {
        if total % every == 0 {
            tracing::error!(op, total, "audit store failing repeatedly");
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use warden_store::{MemoryAudit, MemoryCache};

    use super::*;

    const TTL: Duration = Duration::from_secs(3600);

    fn store() -> SessionStore<MemoryCache, MemoryAudit> {
        SessionStore::new(MemoryCache::new(), MemoryAudit::new(), StoreConfig::default())
    }

    fn session(token: &str, user_id: &str, expires_in: i64) -> Session {
        let now = Utc::now();
        Session {
            token: Token::from(token),
            user_id: user_id.into(),
            username: "alice".into(),
            email: "a@x.com".into(),
            issued_at: now,
            expires_at: now + chrono::Duration::seconds(expires_in),
        }
    }

    // =====================================================================
    // put() / get()
    // =====================================================================

    #[tokio::test]
    async fn test_put_writes_cache_index_and_shadow() {
        let store = store();
        let s = session("t1", "u1", 3600);

        store.put(&s, TTL).await.unwrap();

        assert_eq!(store.get("t1").await.unwrap(), Some(s.clone()));
        assert_eq!(store.index_by_user("u1").await.unwrap(), vec![Token::from("t1")]);
        assert!(store.audit().find_session("t1").await.unwrap().is_some());
        assert!(store.cache().ttl("user_sessions:u1").await.is_some());
    }

    #[tokio::test]
    async fn test_put_cache_down_returns_error() {
        let store = store();
        store.cache().set_unavailable(true);

        let result = store.put(&session("t1", "u1", 3600), TTL).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_put_audit_down_still_succeeds_and_counts() {
        let store = store();
        store.audit().set_unavailable(true);

        store.put(&session("t1", "u1", 3600), TTL).await.unwrap();

        assert!(store.get("t1").await.unwrap().is_some());
        assert_eq!(store.audit_failures(), 1);
    }

    #[tokio::test]
    async fn test_put_detached_audit_lands_eventually() {
        let store = SessionStore::new(
            MemoryCache::new(),
            MemoryAudit::new(),
            StoreConfig {
                audit: AuditPolicy::Detached,
                alert_threshold: Some(1),
            },
        );
        store.put(&session("t1", "u1", 3600), TTL).await.unwrap();

        for _ in 0..50 {
            if store.audit().find_session("t1").await.unwrap().is_some() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("detached audit write never landed");
    }

    #[tokio::test]
    async fn test_get_missing_in_cache_ignores_audit() {
        let store = store();
        store
            .audit()
            .upsert_session(&AuditRecord {
                token: "ghost".into(),
                user_id: "u1".into(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(store.get("ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_expired_record_returns_none_and_deletes() {
        let store = store();
        store.put(&session("old", "u1", -5), TTL).await.unwrap();

        assert_eq!(store.get("old").await.unwrap(), None);
        assert_eq!(store.get_raw("old").await.unwrap(), None);
        assert!(store.index_by_user("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_corrupt_record_is_error() {
        let store = store();
        store
            .cache()
            .set_ex("session:bad", "not json", TTL)
            .await
            .unwrap();

        let err = store.get("bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    // =====================================================================
    // delete() / delete_all()
    // =====================================================================

    #[tokio::test]
    async fn test_delete_removes_every_index() {
        let store = store();
        store.put(&session("t1", "u1", 3600), TTL).await.unwrap();
        store.put(&session("t2", "u1", 3600), TTL).await.unwrap();

        store.delete("t1").await.unwrap();

        assert_eq!(store.get("t1").await.unwrap(), None);
        assert_eq!(store.index_by_user("u1").await.unwrap(), vec![Token::from("t2")]);
        assert!(store.audit().find_session("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_unknown_token_is_ok() {
        let store = store();
        store.delete("never-issued").await.unwrap();
        store.delete("never-issued").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_all_clears_user_only() {
        let store = store();
        store.put(&session("a1", "alice", 3600), TTL).await.unwrap();
        store.put(&session("a2", "alice", 3600), TTL).await.unwrap();
        store.put(&session("b1", "bob", 3600), TTL).await.unwrap();

        let removed = store.delete_all("alice").await.unwrap();

        assert_eq!(removed, 2);
        assert_eq!(store.get("a1").await.unwrap(), None);
        assert_eq!(store.get("a2").await.unwrap(), None);
        assert!(store.get("b1").await.unwrap().is_some());
        assert!(store.index_by_user("alice").await.unwrap().is_empty());
        assert_eq!(store.audit().len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_all_one_token_failing_still_clears_the_rest() {
        let store = store();
        for token in ["a1", "a2", "a3"] {
            store.put(&session(token, "alice", 3600), TTL).await.unwrap();
        }
        store.cache().set_key_failing("session:a2", true);

        let removed = store.delete_all("alice").await.unwrap();

        assert_eq!(removed, 2);
        assert_eq!(store.get("a1").await.unwrap(), None);
        assert_eq!(store.get("a3").await.unwrap(), None);
        assert!(store.index_by_user("alice").await.unwrap().is_empty());
        assert!(store.cache().ttl("user_sessions:alice").await.is_none());
        assert!(store.audit().is_empty().await);
        assert_eq!(store.audit_failures(), 0);

        // The failed key was left alone, not mangled.
        store.cache().set_key_failing("session:a2", false);
        assert!(store.get("a2").await.unwrap().is_some());
    }

    // =====================================================================
    // presence / purge
    // =====================================================================

    #[tokio::test]
    async fn test_presence_put_then_clear() {
        let store = store();
        let s = session("t1", "u1", 3600);

        store
            .put_presence("conn-7", &s, Duration::from_secs(1800))
            .await;
        let body = store.cache().get("connection:conn-7").await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["user_id"], "u1");
        assert_eq!(value["token"], "t1");

        store.clear_presence("conn-7").await;
        assert!(store.cache().get("connection:conn-7").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_audit_removes_expired_rows() {
        let store = store();
        store.put(&session("old", "u1", -5), TTL).await.unwrap();
        store.put(&session("new", "u1", 3600), TTL).await.unwrap();

        assert_eq!(store.purge_audit(Utc::now()).await, 1);
        assert_eq!(store.audit().len().await, 1);
    }

    #[tokio::test]
    async fn test_purge_audit_failure_is_counted() {
        let store = store();
        store.audit().set_unavailable(true);

        assert_eq!(store.purge_audit(Utc::now()).await, 0);
        assert_eq!(store.audit_failures(), 1);
    }
}
