//! Signal Handling
//!
//! Maps process signals onto the [`ShutdownContext`]:
//!
//! | Signal                        | Effect                                  |
//! |-------------------------------|-----------------------------------------|
//! | `SIGPIPE`                     | ignored; writes fail with `BrokenPipe`  |
//! | `SIGINT` / Ctrl+C             | shutdown with `ExitReason::Interrupted` |
//! | `SIGTERM`                     | logged, server keeps running            |
//! | Ctrl+Break, close (Windows)   | logged at debug level                   |
//!
//! Windows raises console break/close events for failed inbound Hyper-V
//! connection attempts, so those never stop the server.

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::info;

use styx_core::{ExitReason, ShutdownContext};

/// Ignore `SIGPIPE` so a peer that hangs up surfaces as an I/O error
pub fn ignore_broken_pipe() -> Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{signal, SigHandler, Signal};

        // SAFETY: SigIgn installs no handler code.
        unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }
            .context("Failed to ignore SIGPIPE")?;
    }
    Ok(())
}

/// Install handlers and spawn the task that feeds `shutdown`
#[cfg(unix)]
pub fn spawn(shutdown: ShutdownContext) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                received = sigint.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("Received SIGINT, shutting down");
                    shutdown.request(ExitReason::Interrupted);
                    break;
                }
                received = sigterm.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("Received SIGTERM, ignoring (send SIGINT to stop)");
                }
            }
        }
    }))
}

/// Install handlers and spawn the task that feeds `shutdown`
#[cfg(windows)]
pub fn spawn(shutdown: ShutdownContext) -> Result<JoinHandle<()>> {
    use tokio::signal::windows::{ctrl_break, ctrl_c, ctrl_close};
    use tracing::debug;

    let mut interrupt = ctrl_c().context("Failed to install Ctrl+C handler")?;
    let mut brk = ctrl_break().context("Failed to install Ctrl+Break handler")?;
    let mut close = ctrl_close().context("Failed to install console close handler")?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                received = interrupt.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("Received Ctrl+C, shutting down");
                    shutdown.request(ExitReason::Interrupted);
                    break;
                }
                Some(()) = brk.recv() => debug!("Received Ctrl+Break, ignoring"),
                Some(()) = close.recv() => debug!("Received console close, ignoring"),
            }
        }
    }))
}
