//! Error types for the store drivers.

/// Errors returned by any store driver.
///
/// Drivers never decide whether a failure is fatal: the session layer
/// treats a cache error as `StoreUnavailable` and an audit error as a
/// swallowed audit write failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing service could not be reached or refused the call.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A Redis command failed.
    #[cfg(feature = "redis")]
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    /// A Postgres query failed.
    #[cfg(feature = "postgres")]
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be decoded.
    #[error("corrupt record under {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The requested record does not exist.
    #[error("not found")]
    NotFound,

    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Password hashing or verification failed internally.
    #[error("credential hashing failed: {0}")]
    Hash(String),
}
