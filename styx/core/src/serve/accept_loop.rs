//! Accept Loop for passive transport kinds

use std::convert::Infallible;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{error, info, Instrument};

use crate::session::{ProtocolServer, RootFactory, SessionHandler, SessionOutcome};
use crate::transport::{BindError, BoundListener, Connection, Listener};

/// Pause after a failed accept, so a persistent error (descriptor
/// exhaustion) does not spin the loop
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Source of inbound connections
///
/// `accept` must be cancel-safe: the loop drops a pending call whenever a
/// session finishes first.
#[async_trait]
trait Accept: Send {
    async fn accept(&mut self) -> io::Result<Connection>;
}

#[async_trait]
impl Accept for Listener {
    async fn accept(&mut self) -> io::Result<Connection> {
        Listener::accept(self).await
    }
}

/// Accepts connections on one bound resource and runs a session for each
pub struct AcceptLoop<F, P> {
    handler: SessionHandler<F, P>,
    endpoint: String,
    backlog: u32,
}

impl<F, P> AcceptLoop<F, P>
where
    F: RootFactory,
    P: ProtocolServer<F::Root>,
{
    /// Create an accept loop
    ///
    /// `endpoint` is the target description used in logs and errors.
    pub fn new(handler: SessionHandler<F, P>, endpoint: impl Into<String>, backlog: u32) -> Self {
        Self {
            handler,
            endpoint: endpoint.into(),
            backlog,
        }
    }

    /// Start listening and accept forever
    ///
    /// Sessions run as separate tasks; a slow, failing or panicking session
    /// never blocks or ends the loop. Dropping the returned future aborts
    /// every session still running.
    ///
    /// # Errors
    ///
    /// Returns [`BindError`] only if listening cannot start. Once listening,
    /// this never returns.
    pub async fn run(self, bound: BoundListener) -> Result<Infallible, BindError> {
        let listener = bound
            .listen(self.backlog)
            .map_err(|e| BindError::io(&self.endpoint, e))?;

        info!(endpoint = %self.endpoint, backlog = self.backlog, "Listening for connections");
        Ok(self.serve(listener).await)
    }

    async fn serve(self, mut listener: impl Accept) -> Infallible {
        let mut sessions: JoinSet<SessionOutcome> = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(connection) => {
                        info!(
                            endpoint = %self.endpoint,
                            conn_id = %connection.id(),
                            peer = %connection.peer(),
                            active_connections = sessions.len() + 1,
                            "New connection accepted"
                        );
                        let handler = self.handler.clone();
                        sessions.spawn(
                            async move { handler.handle(connection).await }.in_current_span(),
                        );
                    }
                    Err(e) => {
                        error!(endpoint = %self.endpoint, error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    // Sessions contain their own panics; this only fires if
                    // the task itself was torn down.
                    if let Err(e) = joined {
                        error!(endpoint = %self.endpoint, error = %e, "Session task failed");
                    }
                }
            }
        }
    }
}
