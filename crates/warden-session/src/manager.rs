//! The session manager: issues, checks, rotates, and revokes sessions.
//!
//! All state lives in the [`SessionStore`]; the manager itself holds only
//! configuration, so it can be shared freely behind an `Arc`.
//!
//! ## Lifecycle
//!
//! ```text
//! create() ──→ [Active] ──validate()──→ [Active]
//!                 │  │
//!                 │  └──refresh()──→ revoke old + create new
//!                 │
//!        revoke() / revoke_all() / TTL
//!                 ▼
//!             [Deleted]
//! ```
//!
//! `refresh` is not atomic: if the new session cannot be written after the
//! old one was revoked, the caller ends up with no session and has to log
//! in again. It never leaves two live sessions behind for one refresh.

use chrono::Utc;
use warden_store::{AuditStore, CacheStore, StoreError, User, UserDirectory};

use crate::token::{self, TokenSource, fingerprint};
use crate::{Session, SessionConfig, SessionError, SessionState, SessionStore};

pub struct SessionManager<C, A> {
    store: SessionStore<C, A>,
    config: SessionConfig,
    tokens: TokenSource,
}

impl<C: CacheStore, A: AuditStore> SessionManager<C, A> {
    pub fn new(store: SessionStore<C, A>, config: SessionConfig) -> Self {
        Self {
            store,
            config,
            tokens: token::generate,
        }
    }

    /// Replaces the token source. Tests use this to simulate entropy
    /// failure.
    pub fn with_token_source(mut self, tokens: TokenSource) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn store(&self) -> &SessionStore<C, A> {
        &self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Issues a new session for `user`.
    ///
    /// # Errors
    /// - [`SessionError::Entropy`] if no token could be drawn
    /// - [`SessionError::StoreUnavailable`] if the cache write failed
    pub async fn create(&self, user: &User) -> Result<Session, SessionError> {
        let token = (self.tokens)()?;
        let issued_at = Utc::now();
        // A TTL too large for chrono saturates to the far future.
        let expires_at = chrono::Duration::from_std(self.config.ttl)
            .ok()
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);

        let session = Session {
            token,
            user_id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            issued_at,
            expires_at,
        };
        self.store.put(&session, self.config.ttl).await?;

        tracing::info!(
            user_id = %session.user_id,
            token = session.token.fingerprint(),
            "session created"
        );
        Ok(session)
    }

    /// Returns the live session behind `token`.
    ///
    /// # Errors
    /// [`SessionError::InvalidOrExpired`] when the token is unknown,
    /// revoked, or past its expiry.
    pub async fn validate(&self, token: &str) -> Result<Session, SessionError> {
        self.store
            .get(token)
            .await?
            .ok_or(SessionError::InvalidOrExpired)
    }

    /// Deletes the session behind `token`. Revoking twice is fine.
    pub async fn revoke(&self, token: &str) -> Result<(), SessionError> {
        self.store.delete(token).await?;
        tracing::info!(token = fingerprint(token), "session revoked");
        Ok(())
    }

    /// Swaps `token` for a fresh session of the same user.
    ///
    /// The owning account is re-read from `users`; if it no longer exists
    /// the token is treated as invalid.
    pub async fn refresh(
        &self,
        token: &str,
        users: &impl UserDirectory,
    ) -> Result<Session, SessionError> {
        let current = self.validate(token).await?;
        let user = match users.find_by_id(&current.user_id).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => return Err(SessionError::InvalidOrExpired),
            Err(e) => return Err(e.into()),
        };

        self.revoke(token).await?;
        let fresh = self.create(&user).await?;
        tracing::info!(
            user_id = %user.id,
            old = fingerprint(token),
            new = fresh.token.fingerprint(),
            "session refreshed"
        );
        Ok(fresh)
    }

    /// Deletes every session of `user_id`. Returns how many were removed.
    pub async fn revoke_all(&self, user_id: &str) -> Result<usize, SessionError> {
        Ok(self.store.delete_all(user_id).await?)
    }

    /// Where `token` is in its lifecycle.
    pub async fn state(&self, token: &str) -> Result<SessionState, SessionError> {
        Ok(match self.store.get_raw(token).await? {
            None => SessionState::Deleted,
            Some(session) if session.is_expired() => SessionState::Expired,
            Some(_) => SessionState::Active,
        })
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Naming: `test_{function}_{scenario}_{expected}`.

    use std::time::Duration;

    use warden_store::{MemoryAudit, MemoryCache, MemoryUsers};

    use super::*;
    use crate::{StoreConfig, Token, TokenError};

    // -- Helpers ----------------------------------------------------------

    type Manager = SessionManager<MemoryCache, MemoryAudit>;

    fn manager_with_ttl(ttl: Duration) -> Manager {
        let store = SessionStore::new(MemoryCache::new(), MemoryAudit::new(), StoreConfig::default());
        SessionManager::new(
            store,
            SessionConfig {
                ttl,
                ..SessionConfig::default()
            },
        )
    }

    fn manager() -> Manager {
        manager_with_ttl(Duration::from_secs(3600))
    }

    async fn alice(users: &MemoryUsers) -> User {
        users.create("alice", "a@x.com", "hash").await.unwrap()
    }

    fn broken_entropy() -> Result<Token, TokenError> {
        Err(TokenError("entropy pool empty".into()))
    }

    // =====================================================================
    // create()
    // =====================================================================

    #[tokio::test]
    async fn test_create_then_validate_returns_same_identity() {
        let mgr = manager();
        let users = MemoryUsers::new();
        let user = alice(&users).await;

        let session = mgr.create(&user).await.unwrap();
        let found = mgr.validate(session.token.as_str()).await.unwrap();

        assert_eq!(found.user_id, user.id);
        assert_eq!(found.username, "alice");
        assert_eq!(found.email, "a@x.com");
        assert_eq!(found.token, session.token);
    }

    #[tokio::test]
    async fn test_create_sets_expiry_from_ttl() {
        let mgr = manager();
        let users = MemoryUsers::new();
        let session = mgr.create(&alice(&users).await).await.unwrap();

        let lifetime = session.expires_at - session.issued_at;
        assert_eq!(lifetime, chrono::Duration::seconds(3600));
    }

    #[tokio::test]
    async fn test_create_twice_issues_distinct_tokens() {
        let mgr = manager();
        let users = MemoryUsers::new();
        let user = alice(&users).await;

        let a = mgr.create(&user).await.unwrap();
        let b = mgr.create(&user).await.unwrap();

        assert_ne!(a.token, b.token);
        assert_eq!(mgr.store().index_by_user(&user.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_cache_down_returns_store_unavailable() {
        let mgr = manager();
        let users = MemoryUsers::new();
        let user = alice(&users).await;
        mgr.store().cache().set_unavailable(true);

        let err = mgr.create(&user).await.unwrap_err();
        assert!(matches!(err, SessionError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_create_audit_down_still_succeeds() {
        let mgr = manager();
        let users = MemoryUsers::new();
        let user = alice(&users).await;
        mgr.store().audit().set_unavailable(true);

        let session = mgr.create(&user).await.unwrap();
        assert!(mgr.validate(session.token.as_str()).await.is_ok());
        assert_eq!(mgr.store().audit_failures(), 1);
    }

    #[tokio::test]
    async fn test_create_entropy_failure_is_fatal() {
        let mgr = manager().with_token_source(broken_entropy);
        let users = MemoryUsers::new();

        let err = mgr.create(&alice(&users).await).await.unwrap_err();
        assert!(err.is_fatal());
    }

    // =====================================================================
    // validate()
    // =====================================================================

    #[tokio::test]
    async fn test_validate_never_issued_returns_invalid() {
        let mgr = manager();
        let err = mgr.validate("no-such-token").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidOrExpired));
    }

    #[tokio::test]
    async fn test_validate_zero_ttl_returns_invalid() {
        let mgr = manager_with_ttl(Duration::ZERO);
        let users = MemoryUsers::new();
        let session = mgr.create(&alice(&users).await).await.unwrap();

        let err = mgr.validate(session.token.as_str()).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidOrExpired));
    }

    // =====================================================================
    // revoke()
    // =====================================================================

    #[tokio::test]
    async fn test_revoke_then_validate_returns_invalid() {
        let mgr = manager();
        let users = MemoryUsers::new();
        let session = mgr.create(&alice(&users).await).await.unwrap();

        mgr.revoke(session.token.as_str()).await.unwrap();

        assert!(matches!(
            mgr.validate(session.token.as_str()).await,
            Err(SessionError::InvalidOrExpired)
        ));
    }

    #[tokio::test]
    async fn test_revoke_twice_is_idempotent() {
        let mgr = manager();
        let users = MemoryUsers::new();
        let session = mgr.create(&alice(&users).await).await.unwrap();

        mgr.revoke(session.token.as_str()).await.unwrap();
        mgr.revoke(session.token.as_str()).await.unwrap();
        assert_eq!(
            mgr.state(session.token.as_str()).await.unwrap(),
            SessionState::Deleted
        );
    }

    // =====================================================================
    // refresh()
    // =====================================================================

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let mgr = manager();
        let users = MemoryUsers::new();
        let user = alice(&users).await;
        let old = mgr.create(&user).await.unwrap();

        let fresh = mgr.refresh(old.token.as_str(), &users).await.unwrap();

        assert_ne!(fresh.token, old.token);
        assert_eq!(fresh.user_id, user.id);
        assert!(mgr.validate(fresh.token.as_str()).await.is_ok());
        assert!(mgr.validate(old.token.as_str()).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_invalid_token_returns_invalid() {
        let mgr = manager();
        let users = MemoryUsers::new();

        let err = mgr.refresh("bogus", &users).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidOrExpired));
    }

    #[tokio::test]
    async fn test_refresh_deleted_user_returns_invalid() {
        let mgr = manager();
        let users = MemoryUsers::new();
        let user = alice(&users).await;
        let session = mgr.create(&user).await.unwrap();
        users.remove(&user.id).await;

        let err = mgr
            .refresh(session.token.as_str(), &users)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidOrExpired));
    }

    // =====================================================================
    // revoke_all() / state()
    // =====================================================================

    #[tokio::test]
    async fn test_revoke_all_invalidates_every_session_of_user() {
        let mgr = manager();
        let users = MemoryUsers::new();
        let user = alice(&users).await;
        let bob = users.create("bob", "b@x.com", "hash").await.unwrap();

        let a1 = mgr.create(&user).await.unwrap();
        let a2 = mgr.create(&user).await.unwrap();
        let b1 = mgr.create(&bob).await.unwrap();

        assert_eq!(mgr.revoke_all(&user.id).await.unwrap(), 2);
        assert!(mgr.validate(a1.token.as_str()).await.is_err());
        assert!(mgr.validate(a2.token.as_str()).await.is_err());
        assert!(mgr.validate(b1.token.as_str()).await.is_ok());
    }

    #[tokio::test]
    async fn test_state_reports_active_expired_deleted() {
        let mgr = manager();
        let users = MemoryUsers::new();
        let user = alice(&users).await;
        let live = mgr.create(&user).await.unwrap();
        assert_eq!(
            mgr.state(live.token.as_str()).await.unwrap(),
            SessionState::Active
        );

        // Still in the cache, but past its deadline.
        let now = Utc::now();
        let stale = Session {
            token: Token::from("stale"),
            user_id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            issued_at: now - chrono::Duration::hours(2),
            expires_at: now - chrono::Duration::hours(1),
        };
        mgr.store()
            .put(&stale, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(mgr.state("stale").await.unwrap(), SessionState::Expired);

        assert_eq!(mgr.state("missing").await.unwrap(), SessionState::Deleted);
    }
}
