//! Connection Loops
//!
//! Each target runs exactly one loop for as long as the server runs:
//! - [`AcceptLoop`] for passive kinds: accept, spawn a session, repeat.
//!   Sessions run concurrently with each other and with accepting.
//! - [`DialLoop`] for the active kind: dial, serve the session to
//!   completion, repeat. At most one session per dial loop at a time; failed
//!   dials are retried after [`DIAL_BACKOFF`].
//!
//! Neither loop ever ends on its own. Recoverable failures (accept errors,
//! dial errors, session errors) are logged and the loop carries on. Only a
//! failure to start listening leaves [`AcceptLoop::run`].

mod accept_loop;
mod dial_loop;

pub use accept_loop::AcceptLoop;
pub use dial_loop::{DialLoop, DIAL_BACKOFF};

pub use crate::transport::Dial;
