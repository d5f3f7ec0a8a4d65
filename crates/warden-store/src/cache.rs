//! The authoritative cache: an expiring key/value store with sets.
//!
//! This is the only store the session layer *reads* to decide whether a
//! credential is valid. Every call is assumed atomic on its own; no
//! multi-key transactions are required.

use std::future::Future;
use std::time::Duration;

use crate::StoreError;

/// Expiring key/value store with set operations.
///
/// Implementations must be safe to call from many tasks at once. The
/// Redis driver opens (or reuses) a multiplexed connection per call, so
/// callers never lock around it.
pub trait CacheStore: Send + Sync + 'static {
    /// Stores `value` under `key`, expiring after `ttl`.
    fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Reads `key`. A missing or expired key is `Ok(None)`.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Deletes `key`. Deleting a missing key succeeds.
    fn del(&self, key: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Adds `member` to the set at `key`, creating it if needed.
    fn sadd(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes `member` from the set at `key`.
    fn srem(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Lists the members of the set at `key` (empty if missing).
    fn smembers(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Sets (or resets) the expiry of an existing `key`.
    fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
