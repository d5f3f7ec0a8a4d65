//! `wardend`: runs a Warden server configured from the environment.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden::prelude::*;
use warden::{Backend, ServerConfig};
use warden_store::{
    BcryptVerifier, MemoryAudit, MemoryCache, MemoryUsers, PgAuditStore, PgUserDirectory,
    RedisCache,
};

#[tokio::main]
async fn main() -> Result<(), WardenError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(
        bind = %config.bind_addr,
        backend = ?config.backend,
        session_ttl_secs = config.session.ttl.as_secs(),
        "configuration loaded"
    );

    match config.backend {
        Backend::Memory => {
            tracing::warn!("using in-memory stores; nothing survives a restart");
            let store = SessionStore::new(MemoryCache::new(), MemoryAudit::new(), config.store.clone());
            let sessions = SessionManager::new(store, config.session.clone());
            let auth = AuthService::new(sessions, MemoryUsers::new(), BcryptVerifier::new());
            serve(&config, auth).await
        }
        Backend::RedisPostgres => {
            let cache = RedisCache::connect(&config.redis_url).await?;
            let pool = warden_store::connect_pool(&config.database_url, config.db_max_connections).await?;
            warden_store::migrate(&pool).await?;

            let store = SessionStore::new(cache, PgAuditStore::new(pool.clone()), config.store.clone());
            let sessions = SessionManager::new(store, config.session.clone());
            let auth = AuthService::new(sessions, PgUserDirectory::new(pool), BcryptVerifier::new());
            serve(&config, auth).await
        }
    }
}

async fn serve<A: AuthProvider>(config: &ServerConfig, auth: A) -> Result<(), WardenError> {
    let server = WardenServerBuilder::from_config(config).build(auth).await?;
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("signal received, shutting down");
        shutdown.trigger();
    });
    server.run().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
