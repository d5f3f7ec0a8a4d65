//! Session types and the knobs that control them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Token;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Lifetime settings for issued sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a session stays valid after issuance. Default: 24 hours.
    pub ttl: Duration,

    /// Expiry of the `connection:{id}` presence record. Default: 30 minutes.
    pub presence_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(86_400),
            presence_ttl: Duration::from_secs(30 * 60),
        }
    }
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// How shadow writes to the audit store are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuditPolicy {
    /// The request waits for the single audit attempt to finish.
    #[default]
    Inline,
    /// The audit attempt runs on its own task; the request does not wait.
    Detached,
}

/// Settings for the session store adapter.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub audit: AuditPolicy,

    /// Emit an `error!` every time the cumulative audit failure count
    /// reaches a multiple of this. `None` disables alerting.
    pub alert_threshold: Option<u64>,
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle of a session as observed from the cache.
///
/// ```text
///   Active ──(expires_at passes)──→ Expired ──(delete / TTL)──→ Deleted
///     │                                                            ↑
///     └──────────────────────(revoke)──────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// Past `expires_at` but still physically present.
    Expired,
    /// Absent from the cache.
    Deleted,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// An issued credential and the identity it stands for.
///
/// This is exactly what is stored (as JSON) under `session:{token}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: Token,
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
