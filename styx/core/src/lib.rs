//! Styx Core - Transport-Agnostic Connection Acceptance
//!
//! This crate is the connection layer of the styx file server. It turns a
//! list of listen/dial target URLs into running accept and dial loops and
//! hands every connection to its own, independently constructed protocol
//! session. It knows nothing about the wire protocol itself.
//!
//! # Architecture
//!
//! ```text
//!   "tcp://127.0.0.1:5640"   "file:///run/styx.sock"   "hyperv-connect://vm/svc"
//!            │                        │                          │
//!            ▼                        ▼                          ▼
//!     ┌─────────────────────── target::classify ──────────────────────┐
//!     │                        TransportSpec                          │
//!     └──────────────────── transport::materialize ───────────────────┘
//!            │                        │                          │
//!      BoundListener            BoundListener              dyn Dial
//!            │                        │                          │
//!       AcceptLoop               AcceptLoop                  DialLoop
//!       (spawn per conn)        (spawn per conn)          (await per conn)
//!            └────────────────────────┼──────────────────────────┘
//!                                     ▼
//!                              SessionHandler
//!                    RootFactory::create + ProtocolServer::accept
//! ```
//!
//! # Module Overview
//!
//! - [`target`]: parse target strings into [`TransportSpec`]
//! - [`transport`]: bind listeners, build dialers, the [`Connection`] stream
//! - [`session`]: per-connection handler and the collaborator traits
//! - [`serve`]: accept loop (passive kinds) and dial loop (active kind)
//! - [`orchestrator`]: run every target concurrently, escalate fatal errors
//! - [`shutdown`]: explicit shutdown context fed by the daemon's signals
//! - [`config`]: layered TOML/env/CLI configuration
//! - [`store`]: reference in-memory store and line protocol

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod orchestrator;
pub mod serve;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod target;
pub mod transport;

// Re-exports for convenience
pub use orchestrator::{FatalError, Orchestrator, ServeOptions, DEFAULT_BACKLOG};
pub use serve::{AcceptLoop, Dial, DialLoop, DIAL_BACKOFF};
pub use session::{
    ConnectionId, ProtocolError, ProtocolServer, RootError, RootFactory, SessionHandler,
    SessionOutcome, SessionRegistry,
};
pub use shutdown::{ExitReason, ShutdownContext};
pub use store::{LineProtocol, MemoryStore, SessionRoot, StoreKind, StoreOptions};
pub use target::{classify, ClassifyOptions, HyperVAddress, TargetError, TransportSpec};
pub use transport::{materialize, BindError, BoundListener, Connection, Endpoint, Listener};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, StyxConfig, StyxToml,
};
