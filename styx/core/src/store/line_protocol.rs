//! Line Protocol
//!
//! Newline-delimited text protocol over a [`Connection`]. One command per
//! line, one reply line per command:
//!
//! ```text
//! version               -> ok styx/1 <store-version>
//! ls                    -> ok <path> <path> ...
//! read <path>           -> ok <data>
//! write <path> <text>   -> ok <version>
//! ctl <text>            -> ok
//! ctl                   -> ok [<text>]
//! quit                  -> ok bye           (then the server closes)
//! ```
//!
//! Command failures (unknown command, missing file, read-only store) are
//! answered with `error: <reason>` and the session continues. Framing
//! failures (invalid UTF-8, a line longer than [`MAX_LINE_SIZE`]) end the
//! session with a [`ProtocolError`].

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

use super::{SessionRoot, StoreError};
use crate::session::{ProtocolError, ProtocolServer};
use crate::transport::Connection;

/// Longest accepted line, terminator excluded
pub const MAX_LINE_SIZE: usize = 64 * 1024;

/// Protocol name reported by `version`
pub const PROTOCOL_VERSION: &str = "styx/1";

/// Read chunk size
const READ_CHUNK: usize = 4096;

/// Splits a byte stream into lines
///
/// Bytes are pushed as they arrive; [`LineDecoder::decode`] hands out
/// complete lines and keeps the partial tail buffered.
#[derive(Debug)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    read_pos: usize,
    max_line: usize,
}

impl LineDecoder {
    /// Create a decoder enforcing `max_line`
    #[must_use]
    pub fn new(max_line: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(READ_CHUNK),
            read_pos: 0,
            max_line,
        }
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > READ_CHUNK {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as a line
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Next complete line, without its `\n` or `\r\n` terminator
    ///
    /// # Errors
    ///
    /// [`ProtocolError::MessageTooLarge`] once a line exceeds the limit
    /// (even before its terminator arrives), [`ProtocolError::Violation`]
    /// for a line that is not UTF-8.
    pub fn decode(&mut self) -> Result<Option<String>, ProtocolError> {
        let pending = &self.buffer[self.read_pos..];
        let Some(end) = pending.iter().position(|&b| b == b'\n') else {
            if pending.len() > self.max_line {
                return Err(ProtocolError::MessageTooLarge {
                    size: pending.len(),
                    limit: self.max_line,
                });
            }
            return Ok(None);
        };

        let mut line = &pending[..end];
        if let [rest @ .., b'\r'] = line {
            line = rest;
        }
        if line.len() > self.max_line {
            return Err(ProtocolError::MessageTooLarge {
                size: line.len(),
                limit: self.max_line,
            });
        }

        let text = std::str::from_utf8(line)
            .map_err(|e| ProtocolError::Violation(format!("invalid UTF-8: {e}")))?
            .to_string();
        self.read_pos += end + 1;
        Ok(Some(text))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
enum CommandError {
    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Empty,
    Version,
    List,
    Read(&'a str),
    Write(&'a str, &'a str),
    SetCtl(&'a str),
    GetCtl,
    Quit,
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Result<Self, CommandError> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim_start()),
            None => (line, ""),
        };

        match verb {
            "" => Ok(Self::Empty),
            "version" => Ok(Self::Version),
            "ls" => Ok(Self::List),
            "read" if !rest.is_empty() && !rest.contains(char::is_whitespace) => {
                Ok(Self::Read(rest))
            }
            "read" => Err(CommandError::Usage("read <path>")),
            "write" => match rest.split_once(char::is_whitespace) {
                Some((path, text)) => Ok(Self::Write(path, text.trim_start())),
                None if !rest.is_empty() => Ok(Self::Write(rest, "")),
                None => Err(CommandError::Usage("write <path> <text>")),
            },
            "ctl" if rest.is_empty() => Ok(Self::GetCtl),
            "ctl" => Ok(Self::SetCtl(rest)),
            "quit" => Ok(Self::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

enum Reply {
    Ok(String),
    Error(String),
}

impl From<StoreError> for Reply {
    fn from(e: StoreError) -> Self {
        Self::Error(e.to_string())
    }
}

impl From<CommandError> for Reply {
    fn from(e: CommandError) -> Self {
        Self::Error(e.to_string())
    }
}

/// Serves [`SessionRoot`]s over the line protocol
#[derive(Clone, Debug)]
pub struct LineProtocol {
    max_line: usize,
}

impl Default for LineProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl LineProtocol {
    /// Protocol with the default [`MAX_LINE_SIZE`]
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_line: MAX_LINE_SIZE,
        }
    }

    /// Execute one command; `None` means the client quit
    fn execute(root: &mut SessionRoot, command: Command<'_>) -> Option<Reply> {
        let reply = match command {
            Command::Empty => return Some(Reply::Ok(String::new())),
            Command::Version => Reply::Ok(format!("{PROTOCOL_VERSION} {}", root.version())),
            Command::List => Reply::Ok(root.list().join(" ")),
            Command::Read(path) => match root.read(path) {
                Ok((data, _version)) => Reply::Ok(data),
                Err(e) => e.into(),
            },
            Command::Write(path, text) => match root.write(path, text) {
                Ok(version) => Reply::Ok(version.to_string()),
                Err(e) => e.into(),
            },
            Command::SetCtl(text) => {
                root.set_ctl(text);
                Reply::Ok(String::new())
            }
            Command::GetCtl => Reply::Ok(root.ctl().unwrap_or_default().to_string()),
            Command::Quit => return None,
        };
        Some(reply)
    }
}

async fn send(connection: &mut Connection, reply: &Reply) -> Result<(), ProtocolError> {
    let line = match reply {
        Reply::Ok(body) if body.is_empty() => "ok\n".to_string(),
        Reply::Ok(body) => format!("ok {body}\n"),
        Reply::Error(reason) => format!("error: {reason}\n"),
    };
    connection.write_all(line.as_bytes()).await?;
    Ok(())
}

#[async_trait]
impl ProtocolServer<SessionRoot> for LineProtocol {
    async fn accept(
        &self,
        mut root: SessionRoot,
        connection: &mut Connection,
    ) -> Result<(), ProtocolError> {
        let mut decoder = LineDecoder::new(self.max_line);
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            while let Some(line) = decoder.decode()? {
                trace!(session = root.session(), line = %line, "Command received");
                let parsed = Command::parse(&line);
                if parsed == Ok(Command::Empty) {
                    continue;
                }
                let reply = match parsed {
                    Ok(command) => match Self::execute(&mut root, command) {
                        Some(reply) => reply,
                        None => {
                            send(connection, &Reply::Ok("bye".to_string())).await?;
                            debug!(session = root.session(), "Client quit");
                            return Ok(());
                        }
                    },
                    Err(e) => e.into(),
                };
                send(connection, &reply).await?;
            }

            let n = connection.read(&mut chunk).await?;
            if n == 0 {
                if decoder.available() > 0 {
                    debug!(
                        session = root.session(),
                        bytes = decoder.available(),
                        "Discarding unterminated line at EOF"
                    );
                }
                return Ok(());
            }
            decoder.push(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RootFactory;
    use crate::store::{MemoryStore, StoreOptions};
    use pretty_assertions::assert_eq;

    fn decode_all(decoder: &mut LineDecoder) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = decoder.decode().unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_decoder_splits_lines_across_pushes() {
        let mut decoder = LineDecoder::new(MAX_LINE_SIZE);
        decoder.push(b"ver");
        assert!(decoder.decode().unwrap().is_none());
        decoder.push(b"sion\r\nls\nread ");
        assert_eq!(decode_all(&mut decoder), vec!["version", "ls"]);
        assert_eq!(decoder.available(), 5);
        decoder.push(b"/a\n");
        assert_eq!(decode_all(&mut decoder), vec!["read /a"]);
    }

    #[test]
    fn test_decoder_rejects_long_line_before_terminator() {
        let mut decoder = LineDecoder::new(8);
        decoder.push(b"123456789");
        assert!(matches!(
            decoder.decode(),
            Err(ProtocolError::MessageTooLarge { size: 9, limit: 8 })
        ));
    }

    #[test]
    fn test_decoder_rejects_invalid_utf8() {
        let mut decoder = LineDecoder::new(MAX_LINE_SIZE);
        decoder.push(b"read \xff\xfe\n");
        assert!(matches!(decoder.decode(), Err(ProtocolError::Violation(_))));
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("  "), Ok(Command::Empty));
        assert_eq!(Command::parse("ls"), Ok(Command::List));
        assert_eq!(Command::parse("read /a"), Ok(Command::Read("/a")));
        assert_eq!(
            Command::parse("write /a hello  world"),
            Ok(Command::Write("/a", "hello  world"))
        );
        assert_eq!(Command::parse("write /a"), Ok(Command::Write("/a", "")));
        assert_eq!(Command::parse("ctl"), Ok(Command::GetCtl));
        assert_eq!(Command::parse("ctl debug on"), Ok(Command::SetCtl("debug on")));
        assert_eq!(Command::parse("read"), Err(CommandError::Usage("read <path>")));
        assert_eq!(
            Command::parse("frobnicate x"),
            Err(CommandError::Unknown("frobnicate".to_string()))
        );
    }

    async fn session(store: &MemoryStore, input: &[u8]) -> (Result<(), ProtocolError>, String) {
        let (mut client, server) = tokio::io::duplex(MAX_LINE_SIZE * 2);
        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap();

        let mut connection = Connection::new(server, "test");
        let root = store.create().await.unwrap();
        let result = LineProtocol::new().accept(root, &mut connection).await;
        drop(connection);

        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        (result, output)
    }

    #[tokio::test]
    async fn test_session_transcript() {
        let store = MemoryStore::new(StoreOptions::default());
        let (result, output) = session(
            &store,
            b"version\nwrite /motd hi there\nread /motd\nls\nread /nope\nbogus\nctl x\nctl\n",
        )
        .await;

        result.unwrap();
        assert_eq!(
            output,
            "ok styx/1 0\n\
             ok 1\n\
             ok hi there\n\
             ok /motd\n\
             error: /nope: not found\n\
             error: unknown command 'bogus'\n\
             ok\n\
             ok x\n"
        );
    }

    #[tokio::test]
    async fn test_quit_stops_reading() {
        let store = MemoryStore::new(StoreOptions::default());
        let (result, output) = session(&store, b"quit\nwrite /never x\n").await;
        result.unwrap();
        assert_eq!(output, "ok bye\n");
        assert_eq!(store.version(), 0);
    }

    #[tokio::test]
    async fn test_read_only_write_is_error_reply() {
        let store = MemoryStore::new(StoreOptions {
            read_only: true,
            ..Default::default()
        });
        let (result, output) = session(&store, b"write /a x\nversion\n").await;
        result.unwrap();
        assert_eq!(output, "error: read-only store\nok styx/1 0\n");
    }

    #[tokio::test]
    async fn test_over_long_line_ends_session() {
        let store = MemoryStore::new(StoreOptions::default());
        let mut input = b"version\n".to_vec();
        input.extend(std::iter::repeat(b'a').take(MAX_LINE_SIZE + 1));
        input.extend_from_slice(b"\nversion\n");

        let (result, output) = session(&store, &input).await;
        assert!(matches!(
            result,
            Err(ProtocolError::MessageTooLarge { limit: MAX_LINE_SIZE, .. })
        ));
        assert_eq!(output, "ok styx/1 0\n");
    }

    #[tokio::test]
    async fn test_invalid_utf8_ends_session() {
        let store = MemoryStore::new(StoreOptions::default());
        let (result, output) = session(&store, b"version\n\xff\nversion\n").await;
        assert!(matches!(result, Err(ProtocolError::Violation(_))));
        assert_eq!(output, "ok styx/1 0\n");
    }
}
