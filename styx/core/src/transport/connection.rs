//! Connection Stream
//!
//! Every transport kind produces a different tokio stream type. They are
//! erased into one [`Connection`] so the session layer and the external
//! protocol never see which transport a client came in on.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

/// Unique identifier for one accepted or dialed connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next process-unique connection ID
    #[must_use]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Any bidirectional byte stream a transport can hand out
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

/// An open byte stream with one peer
///
/// Owned by exactly one session. Dropping it closes the underlying
/// transport; [`Connection::close`] additionally flushes and shuts down the
/// write side first.
pub struct Connection {
    id: ConnectionId,
    peer: String,
    stream: Box<dyn Stream>,
}

impl Connection {
    /// Wrap a transport stream, allocating a fresh [`ConnectionId`]
    pub fn new(stream: impl Stream + 'static, peer: impl Into<String>) -> Self {
        Self {
            id: ConnectionId::new(),
            peer: peer.into(),
            stream: Box::new(stream),
        }
    }

    /// The connection's ID
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Informational description of the peer (address, pipe name, ...)
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Flush and shut down the write half
    ///
    /// # Errors
    ///
    /// Returns the transport error; a peer that already went away typically
    /// reports `BrokenPipe` or `NotConnected` here.
    pub async fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}
