//! # warden-store
//!
//! Storage seams for Warden and the drivers behind them.
//!
//! - [`CacheStore`]: the authoritative expiring cache (Redis in production).
//! - [`AuditStore`]: the durable session shadow (Postgres in production).
//! - [`UserDirectory`]: account lookup and creation.
//! - [`CredentialVerifier`]: password hashing (bcrypt).
//!
//! Every seam also has an in-process driver in [`memory`] for tests and
//! local development.
//!
//! ## Feature flags
//!
//! | feature    | enables                                   | default |
//! |------------|-------------------------------------------|---------|
//! | `redis`    | [`RedisCache`]                            | yes     |
//! | `postgres` | [`PgAuditStore`], [`PgUserDirectory`]     | yes     |
//! | `bcrypt`   | [`BcryptVerifier`]                        | yes     |

mod audit;
mod cache;
mod error;
pub mod memory;
mod password;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "redis")]
mod redis_cache;
mod users;

pub use audit::{AuditRecord, AuditStore};
pub use cache::CacheStore;
pub use error::StoreError;
pub use memory::{MemoryAudit, MemoryCache, MemoryUsers};
#[cfg(feature = "bcrypt")]
pub use password::BcryptVerifier;
pub use password::CredentialVerifier;
#[cfg(feature = "postgres")]
pub use postgres::{PgAuditStore, PgUserDirectory, connect_pool, migrate};
#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;
pub use users::{User, UserDirectory};

#[cfg(feature = "postgres")]
pub use sqlx::PgPool;
