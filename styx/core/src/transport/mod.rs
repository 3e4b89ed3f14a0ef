//! Transport Layer
//!
//! Turns a classified [`TransportSpec`] into something that produces
//! connections:
//! - passive kinds (Unix socket, TCP, named pipe, Hyper-V accept) become a
//!   [`BoundListener`]
//! - the active kind (Hyper-V connect) becomes a [`Dial`] procedure
//!
//! # Platform Support
//!
//! | Kind            | Unix | Windows |
//! |-----------------|------|---------|
//! | `file://`       | yes  | no      |
//! | `tcp://`        | yes  | yes     |
//! | named pipe      | no   | yes     |
//! | `hyperv-*://`   | no   | yes     |
//!
//! Unsupported kinds fail at bind time with [`BindError::Unsupported`],
//! which is fatal like any other bind failure.

#[cfg(any(windows, test))]
pub mod blocking_accept;
pub mod connection;
#[cfg(windows)]
pub mod hyperv;
pub mod listener;
#[cfg(windows)]
pub mod named_pipe;

use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::TcpSocket;

use crate::target::TransportSpec;

// Re-exports for convenience
pub use connection::{Connection, ConnectionId, Stream};
pub use listener::{BoundListener, Listener};

/// Errors that prevent a target from being bound or dialed at all
#[derive(Debug, Error)]
pub enum BindError {
    /// The OS refused to create or bind the endpoint
    #[error("failed to bind {target}: {source}")]
    Io {
        /// Target as displayed by [`TransportSpec`]
        target: String,
        /// The underlying IO error
        #[source]
        source: io::Error,
    },

    /// A Hyper-V VM or service id is not a GUID
    #[error("invalid hypervisor socket address in {target}: {source}")]
    InvalidAddress {
        /// Target as displayed by [`TransportSpec`]
        target: String,
        /// The GUID parse error
        #[source]
        source: uuid::Error,
    },

    /// This transport kind does not exist on the current platform
    #[error("{target}: transport not supported on this platform")]
    Unsupported {
        /// Target as displayed by [`TransportSpec`]
        target: String,
    },
}

impl BindError {
    /// Wrap an IO error with the target it happened on
    pub fn io(target: impl ToString, source: io::Error) -> Self {
        Self::Io {
            target: target.to_string(),
            source,
        }
    }

    /// The target this error is about
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Io { target, .. }
            | Self::InvalidAddress { target, .. }
            | Self::Unsupported { target } => target,
        }
    }
}

/// Outbound connection procedure for active transport kinds
///
/// Every call opens a fresh client endpoint. A failed attempt must leave
/// nothing open behind it.
#[async_trait]
pub trait Dial: Send + Sync {
    /// Attempt one outbound connection
    async fn dial(&self) -> io::Result<Connection>;

    /// Human-readable description of where this dials to
    fn describe(&self) -> String;
}

/// What a target materializes into
pub enum Endpoint {
    /// Bound resource for a passive kind
    Listen(BoundListener),
    /// Dial procedure for the active kind
    Dial(Box<dyn Dial>),
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Listen(bound) => f.debug_tuple("Listen").field(bound).finish(),
            Self::Dial(dialer) => f.debug_tuple("Dial").field(&dialer.describe()).finish(),
        }
    }
}

/// Acquire the resource for a target
///
/// # Errors
///
/// Returns [`BindError`] when the endpoint cannot be created, resolved or
/// bound, or when the kind is unsupported on this platform.
pub async fn materialize(spec: &TransportSpec) -> Result<Endpoint, BindError> {
    match spec {
        TransportSpec::Unix { path } => bind_unix(spec, path).await,
        TransportSpec::Tcp { host, port } => bind_tcp(spec, host, *port).await,
        TransportSpec::NamedPipe { path } => bind_named_pipe(spec, path),
        TransportSpec::HyperVAccept(address) => bind_hyperv(spec, address),
        TransportSpec::HyperVConnect(address) => dialer_hyperv(spec, address),
    }
}

#[cfg(unix)]
async fn bind_unix(spec: &TransportSpec, path: &std::path::Path) -> Result<Endpoint, BindError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BindError::io(spec, e))?;
        }
    }

    // Remove stale socket file
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = ?path, "Removed stale socket file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(BindError::io(spec, e)),
    }

    let socket = tokio::net::UnixSocket::new_stream().map_err(|e| BindError::io(spec, e))?;
    socket.bind(path).map_err(|e| BindError::io(spec, e))?;

    tracing::debug!(path = ?path, "Bound Unix socket");
    Ok(Endpoint::Listen(BoundListener::Unix {
        socket,
        path: path.to_path_buf(),
    }))
}

#[cfg(not(unix))]
async fn bind_unix(spec: &TransportSpec, _path: &std::path::Path) -> Result<Endpoint, BindError> {
    Err(BindError::Unsupported {
        target: spec.to_string(),
    })
}

async fn bind_tcp(spec: &TransportSpec, host: &str, port: u16) -> Result<Endpoint, BindError> {
    let addr = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| BindError::io(spec, e))?
        .next()
        .ok_or_else(|| {
            BindError::io(
                spec,
                io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"),
            )
        })?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|e| BindError::io(spec, e))?;

    #[cfg(unix)]
    socket
        .set_reuseaddr(true)
        .map_err(|e| BindError::io(spec, e))?;
    socket.bind(addr).map_err(|e| BindError::io(spec, e))?;

    tracing::debug!(addr = %addr, "Bound TCP socket");
    Ok(Endpoint::Listen(BoundListener::Tcp(socket)))
}

#[cfg(windows)]
fn bind_named_pipe(spec: &TransportSpec, path: &str) -> Result<Endpoint, BindError> {
    let pipe = named_pipe::PipeListener::bind(path).map_err(|e| BindError::io(spec, e))?;
    Ok(Endpoint::Listen(BoundListener::NamedPipe(pipe)))
}

#[cfg(not(windows))]
fn bind_named_pipe(spec: &TransportSpec, _path: &str) -> Result<Endpoint, BindError> {
    Err(BindError::Unsupported {
        target: spec.to_string(),
    })
}

#[cfg(windows)]
fn bind_hyperv(
    spec: &TransportSpec,
    address: &crate::target::HyperVAddress,
) -> Result<Endpoint, BindError> {
    let endpoint = hyperv::HvEndpoint::resolve(address).map_err(|source| {
        BindError::InvalidAddress {
            target: spec.to_string(),
            source,
        }
    })?;
    let socket = hyperv::HyperVSocket::bind(endpoint, spec.to_string())
        .map_err(|e| BindError::io(spec, e))?;
    Ok(Endpoint::Listen(BoundListener::HyperV(socket)))
}

#[cfg(not(windows))]
fn bind_hyperv(
    spec: &TransportSpec,
    _address: &crate::target::HyperVAddress,
) -> Result<Endpoint, BindError> {
    Err(BindError::Unsupported {
        target: spec.to_string(),
    })
}

#[cfg(windows)]
fn dialer_hyperv(
    spec: &TransportSpec,
    address: &crate::target::HyperVAddress,
) -> Result<Endpoint, BindError> {
    Ok(Endpoint::Dial(Box::new(hyperv::HyperVDialer::new(
        address.clone(),
        spec.to_string(),
    ))))
}

#[cfg(not(windows))]
fn dialer_hyperv(
    spec: &TransportSpec,
    _address: &crate::target::HyperVAddress,
) -> Result<Endpoint, BindError> {
    Err(BindError::Unsupported {
        target: spec.to_string(),
    })
}
