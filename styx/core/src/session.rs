//! Connection Handler
//!
//! One [`SessionHandler::handle`] call owns one connection from start to
//! finish:
//!
//! 1. build a fresh root through the [`RootFactory`]
//! 2. hand root and connection to the [`ProtocolServer`]
//! 3. contain whatever goes wrong (protocol errors, root errors, panics)
//! 4. close the connection
//!
//! Nothing escapes to the caller, so an accept or dial loop can never be
//! taken down by a single client.
//!
//! # Root Isolation
//!
//! Roots carry per-client state (command-style files answer differently per
//! client), so every connection gets its own root, created lazily right
//! before the protocol starts. Roots are moved into the protocol and never
//! shared.

use std::any::Any;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, error, Instrument};

use crate::transport::Connection;

pub use crate::transport::ConnectionId;

/// Recoverable, protocol-level failure of one session
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// IO error on the connection
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The client sent something the protocol cannot interpret
    #[error("Protocol violation: {0}")]
    Violation(String),

    /// A single message exceeded the protocol's limit
    #[error("Message too large: {size} bytes (limit {limit})")]
    MessageTooLarge {
        /// Observed size
        size: usize,
        /// Configured limit
        limit: usize,
    },
}

/// Failure to construct a session root
///
/// Treated as an unexpected fault of that one connection.
#[derive(Debug, Error)]
pub enum RootError {
    /// The backing store cannot hand out roots right now
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Produces one private root per connection
///
/// Called concurrently from any number of sessions; implementations must
/// not block on other connections.
#[async_trait]
pub trait RootFactory: Send + Sync + 'static {
    /// Per-connection root handed to the protocol
    type Root: Send + 'static;

    /// Build a fresh root
    async fn create(&self) -> Result<Self::Root, RootError>;
}

/// Drives one connection to completion
#[async_trait]
pub trait ProtocolServer<R>: Send + Sync + 'static {
    /// Serve the client until it disconnects or a protocol error occurs
    ///
    /// The root is consumed; it must not outlive this call.
    async fn accept(&self, root: R, connection: &mut Connection) -> Result<(), ProtocolError>;
}

/// How a session ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Protocol finished normally
    Completed,
    /// Protocol reported a recoverable error (logged at debug level)
    Rejected(String),
    /// Root construction failed or something panicked (logged at error level)
    Faulted(String),
}

enum SessionError {
    Root(RootError),
    Protocol(ProtocolError),
}

/// Bookkeeping for one active session
#[derive(Clone, Debug)]
pub struct SessionInfo {
    /// Peer description as reported by the transport
    pub peer: String,
    /// When the session started
    pub started_at: Instant,
}

/// Tracks which sessions are currently active
///
/// Purely observational: used for log fields and introspection, never for
/// control flow.
#[derive(Clone, Debug, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<ConnectionId, SessionInfo>>,
}

impl SessionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is active
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of the active sessions
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ConnectionId, SessionInfo)> {
        self.sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    fn register(&self, conn_id: ConnectionId, peer: &str) -> SessionGuard {
        self.sessions.insert(
            conn_id,
            SessionInfo {
                peer: peer.to_string(),
                started_at: Instant::now(),
            },
        );
        SessionGuard {
            conn_id,
            sessions: Arc::clone(&self.sessions),
        }
    }
}

/// Removes a session from the registry on every exit path
struct SessionGuard {
    conn_id: ConnectionId,
    sessions: Arc<DashMap<ConnectionId, SessionInfo>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.conn_id);
    }
}

/// Runs sessions for one root factory and protocol pair
pub struct SessionHandler<F, P> {
    factory: Arc<F>,
    protocol: Arc<P>,
    registry: SessionRegistry,
}

impl<F, P> Clone for SessionHandler<F, P> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            protocol: Arc::clone(&self.protocol),
            registry: self.registry.clone(),
        }
    }
}

impl<F, P> SessionHandler<F, P>
where
    F: RootFactory,
    P: ProtocolServer<F::Root>,
{
    /// Create a handler
    pub fn new(factory: Arc<F>, protocol: Arc<P>) -> Self {
        Self {
            factory,
            protocol,
            registry: SessionRegistry::new(),
        }
    }

    /// The registry of sessions this handler is running
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Serve one connection; always consumes and closes it
    pub async fn handle(&self, connection: Connection) -> SessionOutcome {
        let span = tracing::info_span!(
            "connection",
            conn_id = %connection.id(),
            peer = %connection.peer()
        );
        self.handle_inner(connection).instrument(span).await
    }

    async fn handle_inner(&self, mut connection: Connection) -> SessionOutcome {
        let _guard = self.registry.register(connection.id(), connection.peer());
        debug!(active_sessions = self.registry.len(), "Session started");

        let outcome = match AssertUnwindSafe(self.run(&mut connection))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => SessionOutcome::Completed,
            Ok(Err(SessionError::Protocol(e))) => {
                debug!(error = %e, "Session ended with protocol error");
                SessionOutcome::Rejected(e.to_string())
            }
            Ok(Err(SessionError::Root(e))) => {
                error!(error = %e, "Failed to construct session root");
                SessionOutcome::Faulted(e.to_string())
            }
            Err(panic) => {
                let description = panic_description(panic.as_ref());
                error!(fault = %description, "Session faulted");
                SessionOutcome::Faulted(description)
            }
        };

        if let Err(e) = connection.close().await {
            debug!(error = %e, "Connection already closed by peer");
        }
        drop(connection);

        debug!(outcome = ?outcome, "Session finished");
        outcome
    }

    async fn run(&self, connection: &mut Connection) -> Result<(), SessionError> {
        let root = self.factory.create().await.map_err(SessionError::Root)?;
        self.protocol
            .accept(root, connection)
            .await
            .map_err(SessionError::Protocol)
    }
}

fn panic_description(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic with non-string payload".to_string()
    }
}
