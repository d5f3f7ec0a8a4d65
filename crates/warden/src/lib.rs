//! # Warden
//!
//! A session-credential server over line-framed TCP.
//!
//! Clients open a long-lived connection and send one JSON request per line
//! (`register`, `login`, `logout`, `validate`, `refresh`); the server
//! answers each with exactly one JSON line. Sessions live in an expiring
//! cache with a durable audit shadow, and idle connections are swept.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use warden::prelude::*;
//! use warden_store::{BcryptVerifier, MemoryAudit, MemoryCache, MemoryUsers};
//!
//! # async fn start() -> Result<(), WardenError> {
//! let store = SessionStore::new(MemoryCache::new(), MemoryAudit::new(), StoreConfig::default());
//! let sessions = SessionManager::new(store, SessionConfig::default());
//! let auth = AuthService::new(sessions, MemoryUsers::new(), BcryptVerifier::new());
//!
//! let server = WardenServer::builder().bind("127.0.0.1:9090").build(auth).await?;
//! server.run().await
//! # }
//! ```

pub mod config;
mod error;
mod handler;
pub mod registry;
mod server;

pub use config::{Backend, ServerConfig};
pub use error::WardenError;
pub use server::{ShutdownHandle, WardenServer, WardenServerBuilder};

pub mod prelude {
    pub use crate::{ServerConfig, ShutdownHandle, WardenError, WardenServer, WardenServerBuilder};
    pub use warden_protocol::{Request, RequestKind, Response, Status};
    pub use warden_session::{
        AuditPolicy, AuthProvider, AuthService, SessionConfig, SessionManager, SessionStore,
        StoreConfig,
    };
}
