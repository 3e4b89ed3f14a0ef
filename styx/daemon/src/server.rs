//! Daemon Server Implementation
//!
//! Wires the configured store and protocol into the core orchestrator:
//!
//! ```text
//!                     DaemonServer
//!                          │
//!                     Orchestrator
//!          ┌───────────────┼───────────────┐
//!          │               │               │
//!     tcp://...       file://...     hyperv-connect://...
//!     AcceptLoop      AcceptLoop         DialLoop
//!          │               │               │
//!          └───────────────┴───────────────┘
//!                          │
//!                SessionHandler (one root per connection)
//!                MemoryStore + LineProtocol
//! ```

use std::sync::Arc;

use tracing::{debug, info};

use styx_core::{
    ExitReason, FatalError, LineProtocol, MemoryStore, Orchestrator, SessionHandler,
    ShutdownContext, StoreKind, StyxConfig,
};

/// The main daemon server
pub struct DaemonServer {
    config: StyxConfig,
}

impl DaemonServer {
    /// Create a server for a validated configuration
    pub fn new(config: StyxConfig) -> Self {
        Self { config }
    }

    fn handler(&self) -> SessionHandler<MemoryStore, LineProtocol> {
        match self.config.store {
            StoreKind::Memory => SessionHandler::new(
                Arc::new(MemoryStore::new(self.config.store_options())),
                Arc::new(LineProtocol::new()),
            ),
        }
    }

    /// Serve every configured target until a fatal error or shutdown
    pub async fn run(&self, shutdown: ShutdownContext) -> Result<ExitReason, FatalError> {
        info!(
            store = %self.config.store,
            read_only = self.config.read_only,
            path_rewrite = ?self.config.path_rewrite,
            "Store ready"
        );

        let orchestrator = Orchestrator::new(self.handler(), self.config.serve_options());
        let result = orchestrator.run(&self.config.targets, shutdown).await;

        let registry = orchestrator.handler().registry();
        for (conn_id, session) in registry.snapshot() {
            debug!(
                conn_id = %conn_id,
                peer = %session.peer,
                age = ?session.started_at.elapsed(),
                "Session open at stop"
            );
        }
        info!(active_sessions = registry.len(), "Orchestrator stopped");
        result
    }
}
