//! Shutdown Context
//!
//! Process-level termination requests (Ctrl+C and friends) are delivered to
//! the orchestrator through a [`ShutdownContext`] instead of terminating the
//! process from inside a signal handler. The daemon's signal task calls
//! [`ShutdownContext::request`]; the orchestrator awaits
//! [`ShutdownContext::wait`].

use tokio::sync::watch;

/// Why the server is stopping
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// Interactive interrupt (Ctrl+C / SIGINT)
    Interrupted,
}

impl ExitReason {
    /// Process exit status for this reason
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Interrupted => 1,
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Shared handle for requesting and observing shutdown
///
/// Cloning is cheap; all clones observe the same request. The first request
/// wins, later ones are ignored.
#[derive(Clone, Debug)]
pub struct ShutdownContext {
    tx: watch::Sender<Option<ExitReason>>,
}

impl Default for ShutdownContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownContext {
    /// Create a context with no shutdown requested
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Request shutdown
    ///
    /// Returns `true` if this call made the request, `false` if shutdown was
    /// already requested.
    pub fn request(&self, reason: ExitReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    /// The requested reason, if any
    #[must_use]
    pub fn requested(&self) -> Option<ExitReason> {
        *self.tx.borrow()
    }

    /// Wait until shutdown is requested
    pub async fn wait(&self) -> ExitReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            // Unreachable while `self` holds the sender
            if rx.changed().await.is_err() {
                return ExitReason::Interrupted;
            }
        }
    }
}
