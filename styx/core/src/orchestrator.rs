//! Orchestrator
//!
//! Runs every configured target concurrently and decides when the server
//! stops. Each target gets its own task that classifies the target string,
//! materializes it and then runs the matching loop forever.
//!
//! The server stops in exactly two ways:
//! - a target fails to classify or bind: [`FatalError`], and every other
//!   target is torn down with it, healthy or not
//! - the [`ShutdownContext`] is triggered: [`ExitReason`]

use std::convert::Infallible;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, Instrument};

use crate::serve::{AcceptLoop, DialLoop};
use crate::session::{ProtocolServer, RootFactory, SessionHandler};
use crate::shutdown::{ExitReason, ShutdownContext};
use crate::target::{classify, ClassifyOptions, TargetError};
use crate::transport::{materialize, BindError, Endpoint};

/// Listen backlog used when none is configured
pub const DEFAULT_BACKLOG: u32 = 5;

/// Settings shared by all targets
#[derive(Clone, Debug)]
pub struct ServeOptions {
    /// How target strings are interpreted
    pub classify: ClassifyOptions,
    /// Backlog applied to every listening target
    pub backlog: u32,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            classify: ClassifyOptions::default(),
            backlog: DEFAULT_BACKLOG,
        }
    }
}

/// Errors that end the whole server
#[derive(Debug, Error)]
pub enum FatalError {
    /// Nothing to serve
    #[error("no listen targets configured")]
    NoTargets,

    /// A target string could not be classified
    #[error(transparent)]
    Target(#[from] TargetError),

    /// A target could not be bound or dialed at all
    #[error(transparent)]
    Bind(#[from] BindError),

    /// A target task panicked outside of any session
    #[error("serving {target} panicked")]
    TargetPanicked {
        /// The target string as configured
        target: String,
    },
}

impl FatalError {
    /// Process exit status for this error
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Runs all targets with one shared session handler
pub struct Orchestrator<F, P> {
    handler: SessionHandler<F, P>,
    options: ServeOptions,
}

impl<F, P> Orchestrator<F, P>
where
    F: RootFactory,
    P: ProtocolServer<F::Root>,
{
    /// Create an orchestrator
    pub fn new(handler: SessionHandler<F, P>, options: ServeOptions) -> Self {
        Self { handler, options }
    }

    /// The session handler shared by all targets
    #[must_use]
    pub fn handler(&self) -> &SessionHandler<F, P> {
        &self.handler
    }

    /// Serve all targets until one fails fatally or shutdown is requested
    ///
    /// # Errors
    ///
    /// Returns [`FatalError::NoTargets`] for an empty list, otherwise the
    /// first classification or bind failure of any target.
    pub async fn run(
        &self,
        targets: &[String],
        shutdown: ShutdownContext,
    ) -> Result<ExitReason, FatalError> {
        if targets.is_empty() {
            return Err(FatalError::NoTargets);
        }

        let mut tasks: JoinSet<Result<Infallible, FatalError>> = JoinSet::new();
        for raw in targets {
            let handler = self.handler.clone();
            let options = self.options.clone();
            let raw = raw.clone();
            let span = tracing::info_span!("target", endpoint = %raw);
            tasks.spawn(
                async move {
                    let outcome = AssertUnwindSafe(serve_target(handler, &options, &raw))
                        .catch_unwind()
                        .await;
                    outcome.unwrap_or_else(|_| Err(FatalError::TargetPanicked { target: raw }))
                }
                .instrument(span),
            );
        }

        info!(targets = targets.len(), "Serving");

        let result = loop {
            tokio::select! {
                reason = shutdown.wait() => {
                    info!(reason = %reason, "Shutdown requested");
                    break Ok(reason);
                }
                Some(joined) = tasks.join_next() => match joined {
                    Ok(Err(e)) => {
                        error!(error = %e, "Target failed");
                        break Err(e);
                    }
                    Ok(Ok(never)) => match never {},
                    Err(e) => {
                        error!(error = %e, "Target task cancelled");
                    }
                },
            }
        };

        tasks.abort_all();
        result
    }
}

async fn serve_target<F, P>(
    handler: SessionHandler<F, P>,
    options: &ServeOptions,
    raw: &str,
) -> Result<Infallible, FatalError>
where
    F: RootFactory,
    P: ProtocolServer<F::Root>,
{
    let spec = classify(raw, &options.classify)?;
    match materialize(&spec).await? {
        Endpoint::Listen(bound) => {
            Ok(AcceptLoop::new(handler, spec.to_string(), options.backlog)
                .run(bound)
                .await?)
        }
        Endpoint::Dial(dialer) => Ok(DialLoop::new(handler, dialer).run().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serve::test_support::{Echo, SeqRoots};
    use std::sync::Arc;
    use std::time::Duration;

    fn orchestrator() -> Orchestrator<SeqRoots, Echo> {
        let handler = SessionHandler::new(Arc::new(SeqRoots::default()), Arc::new(Echo));
        Orchestrator::new(handler, ServeOptions::default())
    }

    fn targets(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_default_options() {
        let options = ServeOptions::default();
        assert_eq!(options.backlog, DEFAULT_BACKLOG);
        assert!(options.classify.sandbox_root.is_none());
    }

    #[tokio::test]
    async fn test_no_targets_is_fatal() {
        let err = orchestrator()
            .run(&[], ShutdownContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FatalError::NoTargets));
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_fatal_next_to_valid_target() {
        let err = orchestrator()
            .run(
                &targets(&["tcp://127.0.0.1:0", "bogus://host"]),
                ShutdownContext::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FatalError::Target(TargetError::UnknownScheme { .. })));
        assert!(err.to_string().contains("unknown URL schema"));
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = orchestrator()
            .run(
                &targets(&[&format!("tcp://127.0.0.1:{port}")]),
                ShutdownContext::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FatalError::Bind(_)));
        assert!(err.to_string().contains(&port.to_string()));
    }

    #[tokio::test]
    async fn test_shutdown_request_ends_run() {
        let shutdown = ShutdownContext::new();
        let requester = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            requester.request(ExitReason::Interrupted);
        });

        let reason = orchestrator()
            .run(&targets(&["tcp://127.0.0.1:0"]), shutdown)
            .await
            .unwrap();
        assert_eq!(reason, ExitReason::Interrupted);
        assert_eq!(reason.exit_code(), 1);
    }
}
