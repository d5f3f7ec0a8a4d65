//! The durable audit store: a shadow of issued sessions.
//!
//! Nothing on the serving path reads from here. The session layer writes
//! every issue/revoke through once and swallows failures; the store exists
//! for audit continuity and operator recovery.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::StoreError;

/// One shadow row: which user a token was issued to, and until when.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct AuditRecord {
    #[cfg_attr(feature = "postgres", sqlx(rename = "session_token"))]
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Durable upsert/select/delete by token, plus per-user cleanup.
pub trait AuditStore: Send + Sync + 'static {
    /// Inserts the record, or refreshes expiry and creation time if the
    /// token is already present.
    fn upsert_session(
        &self,
        record: &AuditRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Looks up a shadow row. For operators and tests only.
    fn find_session(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Option<AuditRecord>, StoreError>> + Send;

    /// Deletes the shadow row for `token`, if any.
    fn delete_session(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Deletes every shadow row belonging to `user_id`.
    fn delete_user_sessions(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Deletes every row whose `expires_at` is before `now`.
    /// Returns the number of rows removed.
    fn purge_expired(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;
}
