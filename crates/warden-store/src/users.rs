//! User directory: account lookup and creation.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// A user account.
///
/// `password_hash` is never serialized, so a `User` can be logged or
/// echoed without leaking the hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Account persistence consumed by the auth layer.
///
/// Lookups report a missing account as [`StoreError::NotFound`] so callers
/// can tell it apart from an outage.
pub trait UserDirectory: Send + Sync + 'static {
    fn find_by_username(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<User, StoreError>> + Send;

    fn find_by_id(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<User, StoreError>> + Send;

    /// `true` if any account already uses `username` or `email`.
    fn exists(
        &self,
        username: &str,
        email: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Creates an account with a fresh id.
    ///
    /// # Errors
    /// [`StoreError::Conflict`] if `username` or `email` is taken.
    fn create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> impl Future<Output = Result<User, StoreError>> + Send;
}
