//! `WardenServer` builder and server loop.
//!
//! This is the entry point for running a Warden server. It ties together
//! all the layers: transport → protocol → session → store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use warden_protocol::{Codec, JsonCodec};
use warden_session::AuthProvider;
use warden_transport::{
    Connection, DEFAULT_MAX_FRAME, TcpLineConnection, TcpLineTransport, Transport,
};

use crate::WardenError;
use crate::config::ServerConfig;
use crate::handler::handle_connection;
use crate::registry::ConnectionRegistry;

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<A, K, C> {
    pub(crate) auth: A,
    pub(crate) codec: K,
    pub(crate) registry: ConnectionRegistry<C>,
    pub(crate) shutdown: broadcast::Sender<()>,
}

/// Stops a running server from anywhere. Cheap to clone.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Asks the server to stop. Calling it more than once is harmless.
    pub fn trigger(&self) {
        // Err only means the server has already stopped.
        let _ = self.tx.send(());
    }
}

/// Builder for configuring and starting a Warden server.
///
/// # Example
///
/// ```rust,ignore
/// use warden::prelude::*;
///
/// let server = WardenServer::builder()
///     .bind("0.0.0.0:9090")
///     .idle_threshold(Duration::from_secs(1800))
///     .build(auth)
///     .await?;
/// server.run().await
/// ```
pub struct WardenServerBuilder {
    bind_addr: String,
    max_frame: usize,
    sweep_interval: Duration,
    idle_threshold: Duration,
}

impl WardenServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::from_config(&ServerConfig::default())
    }

    /// Takes the network and sweep settings from `config`.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            bind_addr: config.bind_addr.clone(),
            max_frame: config.max_frame,
            sweep_interval: config.sweep_interval,
            idle_threshold: config.idle_threshold,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the longest accepted request line, in bytes.
    pub fn max_frame(mut self, bytes: usize) -> Self {
        self.max_frame = bytes;
        self
    }

    /// Sets how often idle connections are swept.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets how long a connection may stay silent before the sweep closes it.
    pub fn idle_threshold(mut self, threshold: Duration) -> Self {
        self.idle_threshold = threshold;
        self
    }

    /// Binds the listener and builds the server around `auth`.
    ///
    /// Uses `JsonCodec` over newline-framed TCP.
    pub async fn build<A: AuthProvider>(
        self,
        auth: A,
    ) -> Result<WardenServer<A, JsonCodec>, WardenError> {
        let transport = TcpLineTransport::bind(&self.bind_addr)
            .await?
            .with_max_frame(if self.max_frame == 0 {
                DEFAULT_MAX_FRAME
            } else {
                self.max_frame
            });
        // Receivers exist from here on, so a trigger that fires before
        // `run` is polled is still delivered.
        let (shutdown, accept_rx) = broadcast::channel(1);
        let sweep_rx = shutdown.subscribe();

        let state = Arc::new(ServerState {
            auth,
            codec: JsonCodec,
            registry: ConnectionRegistry::new(),
            shutdown,
        });

        Ok(WardenServer {
            transport,
            state,
            accept_rx,
            sweep_rx,
            sweep_interval: self.sweep_interval,
            idle_threshold: self.idle_threshold,
        })
    }
}

impl Default for WardenServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Warden server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct WardenServer<A, K> {
    transport: TcpLineTransport,
    state: Arc<ServerState<A, K, TcpLineConnection>>,
    accept_rx: broadcast::Receiver<()>,
    sweep_rx: broadcast::Receiver<()>,
    sweep_interval: Duration,
    idle_threshold: Duration,
}

impl WardenServer<(), ()> {
    /// Creates a new builder.
    pub fn builder() -> WardenServerBuilder {
        WardenServerBuilder::new()
    }
}

impl<A, K> WardenServer<A, K>
where
    A: AuthProvider,
    K: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// A handle that stops [`run`](Self::run) when triggered.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.state.shutdown.clone(),
        }
    }

    /// Runs the accept loop and the idle sweep until shutdown.
    ///
    /// On shutdown the listener stops, the sweep task stops, and every open
    /// connection is closed.
    pub async fn run(self) -> Result<(), WardenError> {
        let Self {
            mut transport,
            state,
            mut accept_rx,
            sweep_rx,
            sweep_interval,
            idle_threshold,
        } = self;
        let sweeper = tokio::spawn(sweep_loop(
            Arc::clone(&state),
            sweep_interval,
            idle_threshold,
            sweep_rx,
        ));

        tracing::info!(addr = %transport.local_addr(), "Warden server running");

        loop {
            tokio::select! {
                _ = accept_rx.recv() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                accepted = transport.accept() => match accepted {
                    Ok(conn) => admit(&state, conn).await,
                    Err(e) => tracing::error!(error = %e, "accept failed"),
                },
            }
        }

        if let Err(e) = transport.shutdown().await {
            tracing::warn!(error = %e, "listener shutdown failed");
        }
        if let Err(e) = sweeper.await {
            tracing::warn!(error = %e, "sweep task failed");
        }
        state.registry.close_all().await;
        tracing::info!("Warden server stopped");
        Ok(())
    }
}

async fn admit<A, K>(state: &Arc<ServerState<A, K, TcpLineConnection>>, conn: TcpLineConnection)
where
    A: AuthProvider,
    K: Codec,
{
    let conn = Arc::new(conn);
    let Some(record) = state.registry.register(Arc::clone(&conn)).await else {
        let _ = conn.close().await;
        return;
    };
    tracing::info!(id = %record.id(), peer = %conn.peer_addr(), "client connected");

    let state = Arc::clone(state);
    tokio::spawn(async move {
        let id = record.id();
        if let Err(e) = handle_connection(record, state).await {
            tracing::debug!(%id, error = %e, "connection ended with error");
        }
        tracing::info!(%id, "client disconnected");
    });
}

/// Closes idle connections and purges expired audit rows on every tick.
async fn sweep_loop<A, K, C>(
    state: Arc<ServerState<A, K, C>>,
    every: Duration,
    idle_threshold: Duration,
    mut shutdown: broadcast::Receiver<()>,
) where
    A: AuthProvider,
    K: Codec,
    C: Connection,
{
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let evicted = state.registry.sweep(idle_threshold).await;
                for id in &evicted {
                    tracing::info!(%id, "idle connection evicted");
                }
                state.auth.purge_expired().await;
            }
        }
    }
    tracing::debug!("sweep task stopped");
}
