//! Line-framed TCP transport.
//!
//! Each frame is one `\n`-terminated line. A trailing `\r` is stripped too,
//! so clients that send CRLF work unchanged.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, watch};

use crate::{Connection, ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Longest line accepted before the read fails (64 KiB).
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024;

/// A TCP [`Transport`] that frames traffic as newline-delimited lines.
pub struct TcpLineTransport {
    /// `None` once [`Transport::shutdown`] has run.
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    max_frame: usize,
}

impl TcpLineTransport {
    /// Binds a new line transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        let local_addr = listener.local_addr().map_err(TransportError::AcceptFailed)?;
        tracing::info!(%local_addr, "TCP line transport listening");
        Ok(Self {
            listener: Some(listener),
            local_addr,
            max_frame: DEFAULT_MAX_FRAME,
        })
    }

    /// Overrides the maximum accepted line length.
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    /// Returns the address the listener was bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Transport for TcpLineTransport {
    type Connection = TcpLineConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let listener = self.listener.as_ref().ok_or(TransportError::Shutdown)?;
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let id =
            ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %peer, "accepted TCP connection");

        let (read, write) = stream.into_split();
        let (closed, _) = watch::channel(false);

        Ok(TcpLineConnection {
            id,
            peer,
            reader: Mutex::new(BufReader::new(read)),
            writer: Mutex::new(write),
            closed,
            max_frame: self.max_frame,
        })
    }

    async fn shutdown(&mut self) -> Result<(), Self::Error> {
        if self.listener.take().is_some() {
            tracing::info!(addr = %self.local_addr, "TCP line transport stopped listening");
        }
        Ok(())
    }
}

/// A single line-framed TCP connection.
///
/// Reader and writer halves are locked independently so a pending `recv`
/// never blocks a `send` or `close` from another task.
pub struct TcpLineConnection {
    id: ConnectionId,
    peer: SocketAddr,
    reader: Mutex<BufReader<OwnedReadHalf>>,
    writer: Mutex<OwnedWriteHalf>,
    closed: watch::Sender<bool>,
    max_frame: usize,
}

impl TcpLineConnection {
    /// Returns the remote address of the peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Connection for TcpLineConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(TransportError::ConnectionClosed(self.id.to_string()));
        }
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.extend_from_slice(data);
        frame.push(b'\n');

        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        // A peer that stops reading can stall the write forever; `close`
        // must still be able to take the writer.
        tokio::select! {
            written = write => written.map_err(TransportError::SendFailed),
            _ = closed.wait_for(|closed| *closed) => {
                Err(TransportError::ConnectionClosed(self.id.to_string()))
            }
        }
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(None);
        }

        let mut reader = self.reader.lock().await;
        tokio::select! {
            frame = read_frame(&mut reader, self.max_frame) => frame,
            _ = closed.wait_for(|closed| *closed) => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if self.closed.send_replace(true) {
            return Ok(());
        }
        tracing::debug!(id = %self.id, peer = %self.peer, "closing connection");
        let mut writer = self.writer.lock().await;
        match writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(TransportError::SendFailed(e)),
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Reads one line, bounded by `max_frame` bytes (excluding the newline).
///
/// An unterminated final line before EOF is still returned as a frame.
async fn read_frame(
    reader: &mut BufReader<OwnedReadHalf>,
    max_frame: usize,
) -> Result<Option<Vec<u8>>, TransportError> {
    let mut buf = Vec::new();
    let limit = max_frame as u64 + 1;
    let n = (&mut *reader)
        .take(limit)
        .read_until(b'\n', &mut buf)
        .await
        .map_err(TransportError::ReceiveFailed)?;

    if n == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > max_frame {
        return Err(TransportError::FrameTooLarge { limit: max_frame });
    }

    Ok(Some(buf))
}
