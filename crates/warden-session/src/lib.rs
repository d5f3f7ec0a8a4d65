//! Session lifecycle for Warden.
//!
//! 1. **Tokens**: opaque 256-bit credentials ([`token::generate`])
//! 2. **Storage**: an authoritative expiring cache plus a best-effort audit
//!    shadow ([`SessionStore`])
//! 3. **Lifecycle**: create, validate, refresh, revoke ([`SessionManager`])
//! 4. **Accounts**: registration and login on top of all of the above
//!    ([`AuthProvider`], [`AuthService`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Server (above)        ← dispatches requests to an AuthProvider
//!     ↕
//! Session Layer (this crate)
//!     ↕
//! Store Layer (below)   ← cache, audit, user directory, password hashing
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod manager;
mod session;
mod store;
pub mod token;

pub use auth::{AuthProvider, AuthService, MIN_PASSWORD_LEN};
pub use error::SessionError;
pub use manager::SessionManager;
pub use session::{AuditPolicy, Session, SessionConfig, SessionState, StoreConfig};
pub use store::SessionStore;
pub use token::{Token, TokenError};
