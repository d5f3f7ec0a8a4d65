//! Account-level operations the request dispatcher calls.
//!
//! [`AuthProvider`] is the seam between the network layer and everything
//! below it. The server only ever sees this trait, so tests can drive the
//! dispatcher with a stub and the concrete store types stay out of the
//! server's generics.
//!
//! [`AuthService`] is the real implementation: it checks input, talks to
//! the [`UserDirectory`] and [`CredentialVerifier`], and delegates session
//! work to the [`SessionManager`].

use std::future::Future;

use chrono::Utc;
use warden_store::{AuditStore, CacheStore, CredentialVerifier, StoreError, User, UserDirectory};

use crate::{Session, SessionError, SessionManager};

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 6;

/// The operations behind each request kind, plus hooks the server uses for
/// connection bookkeeping.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` because one provider is shared by every
/// connection task for the lifetime of the server.
pub trait AuthProvider: Send + Sync + 'static {
    /// Creates an account.
    fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<User, SessionError>> + Send;

    /// Checks credentials and issues a session.
    fn login(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<Session, SessionError>> + Send;

    /// Revokes `token`. Unknown tokens are not an error.
    fn logout(&self, token: &str) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Returns the account behind a live `token`.
    fn validate(&self, token: &str) -> impl Future<Output = Result<User, SessionError>> + Send;

    /// Rotates `token` into a fresh session.
    fn refresh(&self, token: &str) -> impl Future<Output = Result<Session, SessionError>> + Send;

    /// Records that `connection` is now logged in as `session`.
    fn attach(&self, connection: &str, session: &Session) -> impl Future<Output = ()> + Send;

    /// Forgets whatever `connection` was logged in as.
    fn detach(&self, connection: &str) -> impl Future<Output = ()> + Send;

    /// Periodic housekeeping. Returns the number of audit rows purged.
    fn purge_expired(&self) -> impl Future<Output = u64> + Send;
}

/// [`AuthProvider`] over real stores.
pub struct AuthService<C, A, U, H> {
    sessions: SessionManager<C, A>,
    users: U,
    hasher: H,
}

impl<C, A, U, H> AuthService<C, A, U, H>
where
    C: CacheStore,
    A: AuditStore,
    U: UserDirectory,
    H: CredentialVerifier,
{
    pub fn new(sessions: SessionManager<C, A>, users: U, hasher: H) -> Self {
        Self {
            sessions,
            users,
            hasher,
        }
    }

    pub fn sessions(&self) -> &SessionManager<C, A> {
        &self.sessions
    }

    pub fn users(&self) -> &U {
        &self.users
    }
}

fn require(value: &str, message: &str) -> Result<(), SessionError> {
    if value.is_empty() {
        Err(SessionError::Validation(message.to_string()))
    } else {
        Ok(())
    }
}

impl<C, A, U, H> AuthProvider for AuthService<C, A, U, H>
where
    C: CacheStore,
    A: AuditStore,
    U: UserDirectory,
    H: CredentialVerifier,
{
    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, SessionError> {
        require(username, "username is required")?;
        require(email, "email is required")?;
        require(password, "password is required")?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(SessionError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        if self.users.exists(username, email).await? {
            return Err(SessionError::UserExists);
        }

        let hash = self.hasher.hash(password).await?;
        let user = match self.users.create(username, email, &hash).await {
            Ok(user) => user,
            // Lost a race with a concurrent registration.
            Err(StoreError::Conflict(_)) => return Err(SessionError::UserExists),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(user_id = %user.id, username = %user.username, "user registered");
        Ok(user)
    }

    async fn login(&self, username: &str, password: &str) -> Result<Session, SessionError> {
        require(username, "username is required")?;
        require(password, "password is required")?;

        let user = match self.users.find_by_username(username).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                tracing::debug!(%username, "login for unknown user");
                return Err(SessionError::InvalidCredentials);
            }
            Err(e) => return Err(e.into()),
        };

        if !self.hasher.verify(&user.password_hash, password).await {
            tracing::debug!(user_id = %user.id, "login with wrong password");
            return Err(SessionError::InvalidCredentials);
        }

        let session = self.sessions.create(&user).await?;
        tracing::info!(user_id = %user.id, "user logged in");
        Ok(session)
    }

    async fn logout(&self, token: &str) -> Result<(), SessionError> {
        require(token, "token is required")?;
        self.sessions.revoke(token).await
    }

    async fn validate(&self, token: &str) -> Result<User, SessionError> {
        require(token, "token is required")?;
        let session = self.sessions.validate(token).await?;
        match self.users.find_by_id(&session.user_id).await {
            Ok(user) => Ok(user),
            Err(StoreError::NotFound) => Err(SessionError::InvalidOrExpired),
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh(&self, token: &str) -> Result<Session, SessionError> {
        require(token, "token is required")?;
        self.sessions.refresh(token, &self.users).await
    }

    async fn attach(&self, connection: &str, session: &Session) {
        let ttl = self.sessions.config().presence_ttl;
        self.sessions
            .store()
            .put_presence(connection, session, ttl)
            .await;
    }

    async fn detach(&self, connection: &str) {
        self.sessions.store().clear_presence(connection).await;
    }

    async fn purge_expired(&self) -> u64 {
        self.sessions.store().purge_audit(Utc::now()).await
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use warden_store::{BcryptVerifier, MemoryAudit, MemoryCache, MemoryUsers};

    use super::*;
    use crate::{SessionConfig, SessionStore, StoreConfig};

    type Service = AuthService<MemoryCache, MemoryAudit, MemoryUsers, BcryptVerifier>;

    fn service() -> Service {
        let store = SessionStore::new(MemoryCache::new(), MemoryAudit::new(), StoreConfig::default());
        AuthService::new(
            SessionManager::new(store, SessionConfig::default()),
            MemoryUsers::new(),
            BcryptVerifier::with_cost(4),
        )
    }

    fn validation_message(err: SessionError) -> String {
        match err {
            SessionError::Validation(msg) => msg,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    // =====================================================================
    // register()
    // =====================================================================

    #[tokio::test]
    async fn test_register_then_login_succeeds() {
        let auth = service();
        let user = auth.register("alice", "a@x.com", "secret1").await.unwrap();
        assert_ne!(user.password_hash, "secret1");

        let session = auth.login("alice", "secret1").await.unwrap();
        assert_eq!(session.user_id, user.id);
        assert_eq!(session.username, "alice");
    }

    #[tokio::test]
    async fn test_register_short_password_is_rejected() {
        let auth = service();
        let err = auth.register("alice", "a@x.com", "12345").await.unwrap_err();
        assert_eq!(
            validation_message(err),
            "password must be at least 6 characters"
        );
    }

    #[tokio::test]
    async fn test_register_missing_fields_name_the_field() {
        let auth = service();
        let cases = [
            (("", "a@x.com", "secret1"), "username is required"),
            (("alice", "", "secret1"), "email is required"),
            (("alice", "a@x.com", ""), "password is required"),
        ];
        for ((username, email, password), expected) in cases {
            let err = auth.register(username, email, password).await.unwrap_err();
            assert_eq!(validation_message(err), expected);
        }
    }

    #[tokio::test]
    async fn test_register_duplicate_returns_user_exists() {
        let auth = service();
        auth.register("alice", "a@x.com", "secret1").await.unwrap();

        let err = auth.register("alice", "b@x.com", "secret1").await.unwrap_err();
        assert!(matches!(err, SessionError::UserExists));
        assert_eq!(err.client_message(), "username or email already exists");
    }

    // =====================================================================
    // login()
    // =====================================================================

    #[tokio::test]
    async fn test_login_wrong_password_and_unknown_user_look_identical() {
        let auth = service();
        auth.register("alice", "a@x.com", "secret1").await.unwrap();

        let wrong = auth.login("alice", "nope-nope").await.unwrap_err();
        let unknown = auth.login("mallory", "secret1").await.unwrap_err();

        assert_eq!(wrong.client_message(), "invalid username or password");
        assert_eq!(unknown.client_message(), wrong.client_message());
    }

    #[tokio::test]
    async fn test_login_directory_down_is_internal_error() {
        let auth = service();
        auth.users().set_unavailable(true);

        let err = auth.login("alice", "secret1").await.unwrap_err();
        assert_eq!(err.client_message(), "internal server error");
    }

    // =====================================================================
    // validate() / logout() / refresh()
    // =====================================================================

    #[tokio::test]
    async fn test_validate_live_token_returns_user() {
        let auth = service();
        auth.register("alice", "a@x.com", "secret1").await.unwrap();
        let session = auth.login("alice", "secret1").await.unwrap();

        let user = auth.validate(session.token.as_str()).await.unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "a@x.com");
    }

    #[tokio::test]
    async fn test_validate_after_account_removed_is_invalid() {
        let auth = service();
        let user = auth.register("alice", "a@x.com", "secret1").await.unwrap();
        let session = auth.login("alice", "secret1").await.unwrap();
        auth.users().remove(&user.id).await;

        let err = auth.validate(session.token.as_str()).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidOrExpired));
    }

    #[tokio::test]
    async fn test_logout_then_validate_is_invalid() {
        let auth = service();
        auth.register("alice", "a@x.com", "secret1").await.unwrap();
        let session = auth.login("alice", "secret1").await.unwrap();

        auth.logout(session.token.as_str()).await.unwrap();
        auth.logout(session.token.as_str()).await.unwrap();

        assert!(matches!(
            auth.validate(session.token.as_str()).await,
            Err(SessionError::InvalidOrExpired)
        ));
    }

    #[tokio::test]
    async fn test_logout_empty_token_is_validation_error() {
        let auth = service();
        let err = auth.logout("").await.unwrap_err();
        assert_eq!(validation_message(err), "token is required");
    }

    #[tokio::test]
    async fn test_refresh_returns_new_working_token() {
        let auth = service();
        auth.register("alice", "a@x.com", "secret1").await.unwrap();
        let old = auth.login("alice", "secret1").await.unwrap();

        let fresh = auth.refresh(old.token.as_str()).await.unwrap();

        assert_ne!(fresh.token, old.token);
        assert!(auth.validate(fresh.token.as_str()).await.is_ok());
        assert!(auth.validate(old.token.as_str()).await.is_err());
    }

    // =====================================================================
    // attach() / detach() / purge_expired()
    // =====================================================================

    #[tokio::test]
    async fn test_attach_writes_presence_with_configured_ttl() {
        let auth = service();
        auth.register("alice", "a@x.com", "secret1").await.unwrap();
        let session = auth.login("alice", "secret1").await.unwrap();

        auth.attach("conn-1", &session).await;
        let cache = auth.sessions().store().cache();
        let ttl = cache.ttl("connection:conn-1").await.unwrap();
        assert!(ttl <= std::time::Duration::from_secs(1800));

        auth.detach("conn-1").await;
        assert!(cache.get("connection:conn-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired_with_nothing_stale_returns_zero() {
        let auth = service();
        auth.register("alice", "a@x.com", "secret1").await.unwrap();
        auth.login("alice", "secret1").await.unwrap();

        assert_eq!(auth.purge_expired().await, 0);
    }
}
