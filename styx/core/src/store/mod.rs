//! Reference Store
//!
//! A small in-memory file store that plugs into the connection layer as its
//! [`RootFactory`], together with [`LineProtocol`] as the matching
//! [`ProtocolServer`](crate::session::ProtocolServer). It exists so the
//! daemon serves something real; production deployments swap in their own
//! collaborators.
//!
//! # Per-Client State
//!
//! File contents are shared by every client. The `ctl` value is not: each
//! [`SessionRoot`] carries its own, so two clients writing `ctl` never see
//! each other's value.

mod line_protocol;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::session::{RootError, RootFactory};

pub use line_protocol::{LineDecoder, LineProtocol, MAX_LINE_SIZE, PROTOCOL_VERSION};

/// Which store backs the daemon
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Volatile in-process store
    #[default]
    Memory,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(format!("unknown store kind '{other}'")),
        }
    }
}

/// Store behavior switches
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Reject every write
    pub read_only: bool,
    /// Prefix prepended to every path a client names
    pub path_rewrite: Option<String>,
}

/// Errors reported back to the client; none of them end a session
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No file at this path
    #[error("{0}: not found")]
    NotFound(String),

    /// Store was opened read-only
    #[error("read-only store")]
    ReadOnly,

    /// Path is empty or escapes the rewrite prefix
    #[error("{0}: invalid path")]
    InvalidPath(String),
}

#[derive(Clone, Debug)]
struct Entry {
    data: String,
    version: u64,
}

#[derive(Debug, Default)]
struct Files {
    entries: BTreeMap<String, Entry>,
    version: u64,
}

/// Shared in-memory store
///
/// Every write bumps a store-wide version; each file remembers the version
/// it was last written at.
#[derive(Debug)]
pub struct MemoryStore {
    files: Arc<RwLock<Files>>,
    options: StoreOptions,
    next_session: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new(options: StoreOptions) -> Self {
        Self {
            files: Arc::new(RwLock::new(Files::default())),
            options,
            next_session: AtomicU64::new(1),
        }
    }

    /// Seed a file, bypassing read-only mode and path rewriting
    #[must_use]
    pub fn with_file(self, path: &str, data: &str) -> Self {
        {
            let mut files = self.files.write();
            files.version += 1;
            let version = files.version;
            files.entries.insert(
                path.to_string(),
                Entry {
                    data: data.to_string(),
                    version,
                },
            );
        }
        self
    }

    /// Current store-wide version
    #[must_use]
    pub fn version(&self) -> u64 {
        self.files.read().version
    }
}

#[async_trait]
impl RootFactory for MemoryStore {
    type Root = SessionRoot;

    async fn create(&self) -> Result<SessionRoot, RootError> {
        let session = self.next_session.fetch_add(1, Ordering::SeqCst);
        debug!(session, "Created session root");
        Ok(SessionRoot {
            session,
            files: Arc::clone(&self.files),
            options: self.options.clone(),
            ctl: None,
        })
    }
}

/// One client's view of a [`MemoryStore`]
#[derive(Debug)]
pub struct SessionRoot {
    session: u64,
    files: Arc<RwLock<Files>>,
    options: StoreOptions,
    ctl: Option<String>,
}

impl SessionRoot {
    /// Store-assigned session number
    #[must_use]
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Store-wide version
    #[must_use]
    pub fn version(&self) -> u64 {
        self.files.read().version
    }

    /// Paths visible to this client, in order
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let files = self.files.read();
        match &self.options.path_rewrite {
            None => files.entries.keys().cloned().collect(),
            Some(prefix) => {
                let prefix = format!("{}/", prefix.trim_end_matches('/'));
                files
                    .entries
                    .keys()
                    .filter_map(|path| path.strip_prefix(&prefix))
                    .map(|path| format!("/{path}"))
                    .collect()
            }
        }
    }

    /// Contents and version of a file
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] or [`StoreError::InvalidPath`].
    pub fn read(&self, path: &str) -> Result<(String, u64), StoreError> {
        let key = self.resolve(path)?;
        self.files
            .read()
            .entries
            .get(&key)
            .map(|entry| (entry.data.clone(), entry.version))
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    /// Replace a file's contents, returning the new version
    ///
    /// # Errors
    ///
    /// [`StoreError::ReadOnly`] or [`StoreError::InvalidPath`].
    pub fn write(&mut self, path: &str, data: &str) -> Result<u64, StoreError> {
        if self.options.read_only {
            return Err(StoreError::ReadOnly);
        }
        let key = self.resolve(path)?;

        let mut files = self.files.write();
        files.version += 1;
        let version = files.version;
        files.entries.insert(
            key,
            Entry {
                data: data.to_string(),
                version,
            },
        );
        Ok(version)
    }

    /// This client's `ctl` value
    #[must_use]
    pub fn ctl(&self) -> Option<&str> {
        self.ctl.as_deref()
    }

    /// Set this client's `ctl` value
    pub fn set_ctl(&mut self, value: &str) {
        self.ctl = Some(value.to_string());
    }

    fn resolve(&self, path: &str) -> Result<String, StoreError> {
        let trimmed = path.trim_start_matches('/');
        if trimmed.is_empty() || trimmed.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(match &self.options.path_rewrite {
            Some(prefix) => format!("{}/{trimmed}", prefix.trim_end_matches('/')),
            None => format!("/{trimmed}"),
        })
    }
}
