//! Server configuration, with defaults and environment overrides.
//!
//! | variable                | default                 |
//! |-------------------------|-------------------------|
//! | `TCP_AUTH_HOST`         | `0.0.0.0`               |
//! | `TCP_AUTH_PORT`         | `9090`                  |
//! | `SESSION_TTL`           | `86400` (seconds)       |
//! | `SWEEP_INTERVAL`        | `300` (seconds)         |
//! | `IDLE_TIMEOUT`          | `1800` (seconds)        |
//! | `MAX_LINE_BYTES`        | `65536`                 |
//! | `AUDIT_POLICY`          | `inline` (or `detached`)|
//! | `AUDIT_ALERT_THRESHOLD` | unset                   |
//! | `WARDEN_BACKEND`        | `redis-postgres` (or `memory`) |
//! | `REDIS_URL`             | built from `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD` |
//! | `DATABASE_URL`          | built from `PG_HOST`, `PG_PORT`, `PG_USER`, `PG_PASSWORD`, `PG_DATABASE` |
//! | `PG_MAX_CONNECTIONS`    | `10`                    |
//!
//! A `.env` file in the working directory is loaded first, if present.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use warden_session::{AuditPolicy, SessionConfig, StoreConfig};
use warden_transport::DEFAULT_MAX_FRAME;

use crate::WardenError;

/// Which store drivers the binary wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// In-process stores. Nothing survives a restart.
    Memory,
    /// Redis cache, Postgres audit store and user directory.
    RedisPostgres,
}

impl FromStr for Backend {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Backend::Memory),
            "redis-postgres" => Ok(Backend::RedisPostgres),
            other => Err(WardenError::Config(format!("unknown backend {other:?}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub session: SessionConfig,
    pub store: StoreConfig,
    /// How often the idle sweep runs.
    pub sweep_interval: Duration,
    /// Connections silent for longer than this are closed by the sweep.
    pub idle_threshold: Duration,
    /// Longest accepted request line, in bytes.
    pub max_frame: usize,
    pub backend: Backend,
    pub redis_url: String,
    pub database_url: String,
    pub db_max_connections: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9090".to_string(),
            session: SessionConfig::default(),
            store: StoreConfig::default(),
            sweep_interval: Duration::from_secs(5 * 60),
            idle_threshold: Duration::from_secs(30 * 60),
            max_frame: DEFAULT_MAX_FRAME,
            backend: Backend::RedisPostgres,
            redis_url: "redis://localhost:6379".to_string(),
            database_url: "postgres://postgres@localhost:5432/warden".to_string(),
            db_max_connections: 10,
        }
    }
}

impl ServerConfig {
    /// Loads `.env` (if any), then reads the process environment.
    pub fn from_env() -> Result<Self, WardenError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source. Empty values
    /// count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, WardenError> {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let mut config = Self::default();

        let host = get("TCP_AUTH_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = get("TCP_AUTH_PORT").unwrap_or_else(|| "9090".into());
        config.bind_addr = format!("{host}:{port}");

        if let Some(secs) = parse(&get, "SESSION_TTL")? {
            config.session.ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&get, "SWEEP_INTERVAL")? {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&get, "IDLE_TIMEOUT")? {
            config.idle_threshold = Duration::from_secs(secs);
        }
        if let Some(bytes) = parse(&get, "MAX_LINE_BYTES")? {
            config.max_frame = bytes;
        }
        if let Some(policy) = get("AUDIT_POLICY") {
            config.store.audit = match policy.as_str() {
                "inline" => AuditPolicy::Inline,
                "detached" => AuditPolicy::Detached,
                other => {
                    return Err(WardenError::Config(format!(
                        "AUDIT_POLICY must be inline or detached, got {other:?}"
                    )));
                }
            };
        }
        config.store.alert_threshold = parse(&get, "AUDIT_ALERT_THRESHOLD")?;
        if let Some(backend) = get("WARDEN_BACKEND") {
            config.backend = backend.parse()?;
        }

        config.redis_url = get("REDIS_URL").unwrap_or_else(|| {
            let host = get("REDIS_HOST").unwrap_or_else(|| "localhost".into());
            let port = get("REDIS_PORT").unwrap_or_else(|| "6379".into());
            match get("REDIS_PASSWORD") {
                Some(password) => format!("redis://:{password}@{host}:{port}"),
                None => format!("redis://{host}:{port}"),
            }
        });
        config.database_url = get("DATABASE_URL").unwrap_or_else(|| {
            let host = get("PG_HOST").unwrap_or_else(|| "localhost".into());
            let port = get("PG_PORT").unwrap_or_else(|| "5432".into());
            let user = get("PG_USER").unwrap_or_else(|| "postgres".into());
            let database = get("PG_DATABASE").unwrap_or_else(|| "warden".into());
            match get("PG_PASSWORD") {
                Some(password) => format!("postgres://{user}:{password}@{host}:{port}/{database}"),
                None => format!("postgres://{user}@{host}:{port}/{database}"),
            }
        });
        if let Some(max) = parse(&get, "PG_MAX_CONNECTIONS")? {
            config.db_max_connections = max;
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, WardenError> {
    get(key)
        .map(|raw| {
            raw.parse()
                .map_err(|_| WardenError::Config(format!("{key} is not a valid number: {raw:?}")))
        })
        .transpose()
}
