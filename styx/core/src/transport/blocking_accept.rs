//! Blocking Accept Thread
//!
//! Some sockets only offer a blocking `accept`. Running it on the blocking
//! pool per call is not cancel-safe: when the awaiting future is dropped the
//! blocking call still completes and its connection is lost. Instead one
//! dedicated thread accepts forever and hands every result to a channel,
//! and [`BlockingAcceptor::accept`] only receives from that channel.

use std::io;
use std::thread;

use tokio::sync::mpsc;

/// Receiving end of a dedicated accept thread
#[derive(Debug)]
pub struct BlockingAcceptor<T> {
    accepted: mpsc::Receiver<io::Result<T>>,
}

impl<T: Send + 'static> BlockingAcceptor<T> {
    /// Start the accept thread
    ///
    /// The thread exits after the next accept once the acceptor is dropped.
    ///
    /// # Errors
    ///
    /// Returns the error from spawning the thread.
    pub fn spawn<F>(name: String, mut accept: F) -> io::Result<Self>
    where
        F: FnMut() -> io::Result<T> + Send + 'static,
    {
        let (tx, accepted) = mpsc::channel(1);
        thread::Builder::new().name(name).spawn(move || loop {
            if tx.blocking_send(accept()).is_err() {
                break;
            }
        })?;
        Ok(Self { accepted })
    }

    /// Wait for the next accepted connection
    ///
    /// Cancel-safe: dropping the future never loses a connection.
    ///
    /// # Errors
    ///
    /// Returns the accept error, or `BrokenPipe` if the thread is gone.
    pub async fn accept(&mut self) -> io::Result<T> {
        match self.accepted.recv().await {
            Some(result) => result,
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "accept thread stopped",
            )),
        }
    }
}
