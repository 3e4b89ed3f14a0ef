//! Bound and Listening Resources
//!
//! A [`BoundListener`] is what the factory produces for a passive target: a
//! socket (or pipe) that is bound to its address but not yet accepting. The
//! accept loop turns it into a [`Listener`] by applying the backlog, then
//! calls [`Listener::accept`] forever.

use std::io;
use std::path::PathBuf;

use tokio::net::{TcpListener, TcpSocket};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixSocket};

#[cfg(windows)]
use super::hyperv::{HyperVListener, HyperVSocket};
#[cfg(windows)]
use super::named_pipe::PipeListener;
use super::Connection;

/// A bound, not yet listening, resource for one passive target
#[derive(Debug)]
pub enum BoundListener {
    /// Unix domain stream socket bound to a path
    #[cfg(unix)]
    Unix {
        /// The bound socket
        socket: UnixSocket,
        /// Path the socket is bound to
        path: PathBuf,
    },

    /// TCP socket bound to an address
    Tcp(TcpSocket),

    /// First instance of a named pipe server
    #[cfg(windows)]
    NamedPipe(PipeListener),

    /// Hyper-V socket bound to `(vm_id, service_id)`
    #[cfg(windows)]
    HyperV(HyperVSocket),
}

impl BoundListener {
    /// Start listening with the given backlog
    ///
    /// Named pipes have no backlog; each accepted instance is replaced by a
    /// fresh one instead.
    ///
    /// # Errors
    ///
    /// Returns the OS error from `listen(2)` (or its platform equivalent).
    pub fn listen(self, backlog: u32) -> io::Result<Listener> {
        match self {
            #[cfg(unix)]
            Self::Unix { socket, path } => Ok(Listener::Unix {
                listener: socket.listen(backlog)?,
                path,
            }),
            Self::Tcp(socket) => Ok(Listener::Tcp(socket.listen(backlog)?)),
            #[cfg(windows)]
            Self::NamedPipe(pipe) => Ok(Listener::NamedPipe(pipe)),
            #[cfg(windows)]
            Self::HyperV(socket) => Ok(Listener::HyperV(socket.listen(backlog)?)),
        }
    }
}

/// A listening resource, ready to accept
#[derive(Debug)]
pub enum Listener {
    /// Unix domain stream listener
    #[cfg(unix)]
    Unix {
        /// The listener
        listener: UnixListener,
        /// Path it listens on (used to label peers, which are unnamed)
        path: PathBuf,
    },

    /// TCP listener
    Tcp(TcpListener),

    /// Named pipe server
    #[cfg(windows)]
    NamedPipe(PipeListener),

    /// Hyper-V socket listener
    #[cfg(windows)]
    HyperV(HyperVListener),
}

impl Listener {
    /// Wait for the next inbound connection
    ///
    /// Cancel-safe for every kind: a dropped call never consumes a client.
    ///
    /// # Errors
    ///
    /// Returns the accept error. Most are transient (peer reset before
    /// accept, descriptor exhaustion) and the caller keeps accepting.
    pub async fn accept(&mut self) -> io::Result<Connection> {
        match self {
            #[cfg(unix)]
            Self::Unix { listener, path } => {
                let (stream, addr) = listener.accept().await?;
                let peer = match addr.as_pathname() {
                    Some(peer_path) => format!("unix:{}", peer_path.display()),
                    None => format!("unix:{} (unnamed peer)", path.display()),
                };
                Ok(Connection::new(stream, peer))
            }
            Self::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                Ok(Connection::new(stream, addr.to_string()))
            }
            #[cfg(windows)]
            Self::NamedPipe(pipe) => pipe.accept().await,
            #[cfg(windows)]
            Self::HyperV(listener) => listener.accept().await,
        }
    }

    /// Local address of a TCP listener, mostly useful when bound to port 0
    #[must_use]
    pub fn tcp_local_addr(&self) -> Option<std::net::SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tcp_bind_listen_accept() {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut listener = BoundListener::Tcp(socket).listen(5).unwrap();
        let addr = listener.tcp_local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"hi").await.unwrap();
        });

        let mut conn = listener.accept().await.unwrap();
        let mut buf = [0u8; 2];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
        assert!(conn.peer().starts_with("127.0.0.1:"));
        client.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_bind_listen_accept() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("styx.sock");

        let socket = UnixSocket::new_stream().unwrap();
        socket.bind(&path).unwrap();
        let mut listener = BoundListener::Unix {
            socket,
            path: path.clone(),
        }
        .listen(5)
        .unwrap();

        let connect_path = path.clone();
        let client = tokio::spawn(async move {
            tokio::net::UnixStream::connect(connect_path).await.unwrap()
        });

        let conn = listener.accept().await.unwrap();
        assert!(conn.peer().starts_with("unix:"));
        assert!(listener.tcp_local_addr().is_none());
        drop(client.await.unwrap());
    }
}
