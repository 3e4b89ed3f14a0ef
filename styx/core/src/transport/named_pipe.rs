//! Named Pipe Transport (Windows)
//!
//! A named pipe server instance serves exactly one client. After a client
//! connects, the connected instance is handed to the session and a fresh
//! instance is created so the next client has something to connect to.

use std::io;

use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};

use super::Connection;

/// Named pipe server that keeps one idle instance waiting for clients
#[derive(Debug)]
pub struct PipeListener {
    path: String,
    next: NamedPipeServer,
}

impl PipeListener {
    /// Create the first instance of the pipe
    ///
    /// Fails if another process already owns a pipe with this name.
    ///
    /// # Errors
    ///
    /// Returns the OS error from `CreateNamedPipe`.
    pub fn bind(path: &str) -> io::Result<Self> {
        let next = ServerOptions::new()
            .first_pipe_instance(true)
            .create(path)?;
        Ok(Self {
            path: path.to_string(),
            next,
        })
    }

    /// Wait for a client on the idle instance and replace it
    ///
    /// # Errors
    ///
    /// Returns the error from `ConnectNamedPipe` or from creating the
    /// replacement instance.
    pub async fn accept(&mut self) -> io::Result<Connection> {
        self.next.connect().await?;
        let replacement = ServerOptions::new().create(&self.path)?;
        let connected = std::mem::replace(&mut self.next, replacement);
        Ok(Connection::new(connected, self.path.clone()))
    }
}
