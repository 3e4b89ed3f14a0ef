//! Dial Loop for the active transport kind

use std::convert::Infallible;
use std::time::Duration;

use tracing::{debug, info};

use crate::session::{ProtocolServer, RootFactory, SessionHandler};
use crate::transport::Dial;

/// Pause after a failed dial attempt
pub const DIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Repeatedly dials out and serves each established connection in turn
pub struct DialLoop<F, P> {
    handler: SessionHandler<F, P>,
    dialer: Box<dyn Dial>,
    backoff: Duration,
}

impl<F, P> DialLoop<F, P>
where
    F: RootFactory,
    P: ProtocolServer<F::Root>,
{
    /// Create a dial loop with the default [`DIAL_BACKOFF`]
    pub fn new(handler: SessionHandler<F, P>, dialer: Box<dyn Dial>) -> Self {
        Self {
            handler,
            dialer,
            backoff: DIAL_BACKOFF,
        }
    }

    /// Override the pause between failed attempts
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Dial forever
    ///
    /// A successful dial is served to completion before the next attempt,
    /// with no pause in between. A failed dial is logged at debug level and
    /// retried after the backoff. The peer may simply not be up yet.
    pub async fn run(self) -> Infallible {
        let endpoint = self.dialer.describe();
        info!(endpoint = %endpoint, "Dialing out");

        loop {
            match self.dialer.dial().await {
                Ok(connection) => {
                    info!(
                        endpoint = %endpoint,
                        conn_id = %connection.id(),
                        "Outbound connection established"
                    );
                    self.handler.handle(connection).await;
                }
                Err(e) => {
                    debug!(endpoint = %endpoint, error = %e, "Dial failed, retrying");
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }
}
