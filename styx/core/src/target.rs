//! Target Classification
//!
//! Parses a configured listen/dial address into a [`TransportSpec`]. This is
//! the only place where target strings are inspected; everything downstream
//! matches on the closed enum.
//!
//! Recognised forms:
//!
//! | Target                                | Kind             |
//! |---------------------------------------|------------------|
//! | `\\.\pipe\styx`                       | named pipe       |
//! | `file:///run/styx/styx.sock`          | Unix socket      |
//! | `tcp://127.0.0.1:5640`                | TCP              |
//! | `hyperv-accept://<vmid>/<serviceid>`  | Hyper-V listen   |
//! | `hyperv-connect://<vmid>/<serviceid>` | Hyper-V dial     |

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::{Host, Url};
use uuid::Uuid;

/// Prefix that marks a platform named-pipe path (`\\server\pipe\name`)
pub const UNC_PREFIX: &str = r"\\";

/// Host used when a `tcp://` target omits it
pub const DEFAULT_TCP_HOST: &str = "127.0.0.1";

/// Port used when a `tcp://` target omits it
pub const DEFAULT_TCP_PORT: u16 = 5640;

/// `HV_GUID_LOOPBACK`: the partition the server itself runs in
pub const HV_GUID_LOOPBACK: &str = "e0e16197-dd56-4a10-9195-5ee7a155a838";

/// `HV_GUID_PARENT`: the parent partition (host) of a guest
pub const HV_GUID_PARENT: &str = "a42e7cda-d03f-480c-9cc2-a4de20abb878";

/// `HV_GUID_CHILDREN`: every child partition of the host
pub const HV_GUID_CHILDREN: &str = "90db8b89-0d35-4f79-8ce9-49ea0ac8b7cd";

/// `HV_GUID_WILDCARD`: any partition
pub const HV_GUID_WILDCARD: &str = "00000000-0000-0000-0000-000000000000";

/// Service id used when a Hyper-V target has no path.
///
/// This is the hypervisor socket service template for port 564 (9P), so
/// Linux guests reach it as vsock port 564.
pub const DEFAULT_HYPERV_SERVICE_ID: &str = "00000234-facb-11e6-bd58-64006a7986d3";

/// Errors produced while classifying a target string
///
/// Both variants mean the target is not understood at all. They are fatal
/// for the whole process, not just the offending target.
#[derive(Debug, Error)]
pub enum TargetError {
    /// The URL parsed but its scheme is not one we serve
    #[error("unknown URL schema '{scheme}' in target '{target}'")]
    UnknownScheme {
        /// The raw target as configured
        target: String,
        /// The scheme that was found
        scheme: String,
    },

    /// The target is not a URL and not a pipe path
    #[error("unknown URL schema in target '{target}': {source}")]
    Unparseable {
        /// The raw target as configured
        target: String,
        /// Why the URL parser rejected it
        #[source]
        source: url::ParseError,
    },
}

/// Options that influence classification
#[derive(Clone, Debug, Default)]
pub struct ClassifyOptions {
    /// Directory that `file://` paths are placed under, if any
    pub sandbox_root: Option<PathBuf>,
}

/// Virtual machine and service identifiers of a Hyper-V socket target
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HyperVAddress {
    /// VM id as written (GUID or well-known alias)
    pub vm_id: String,
    /// Service id as written (GUID)
    pub service_id: String,
}

impl HyperVAddress {
    /// Resolve the VM id to a GUID, expanding well-known aliases
    ///
    /// # Errors
    ///
    /// Returns the parse error when the id is neither an alias nor a GUID.
    pub fn vm_guid(&self) -> Result<Uuid, uuid::Error> {
        let resolved = match self.vm_id.to_ascii_lowercase().as_str() {
            "" | "loopback" => HV_GUID_LOOPBACK,
            "parent" => HV_GUID_PARENT,
            "children" => HV_GUID_CHILDREN,
            "wildcard" => HV_GUID_WILDCARD,
            _ => self.vm_id.as_str(),
        };
        Uuid::parse_str(resolved)
    }

    /// Resolve the service id to a GUID
    ///
    /// # Errors
    ///
    /// Returns the parse error when the service id is not a GUID.
    pub fn service_guid(&self) -> Result<Uuid, uuid::Error> {
        Uuid::parse_str(&self.service_id)
    }
}

impl fmt::Display for HyperVAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.vm_id, self.service_id)
    }
}

/// A classified listen or dial target
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportSpec {
    /// Local stream socket at a filesystem path
    Unix {
        /// Socket path (already placed under the sandbox root, if any)
        path: PathBuf,
    },

    /// TCP listener
    Tcp {
        /// Host name or address literal
        host: String,
        /// Port number
        port: u16,
    },

    /// Platform named pipe (Windows)
    NamedPipe {
        /// Full pipe path, e.g. `\\.\pipe\styx`
        path: String,
    },

    /// Hyper-V socket accepting inbound connections
    HyperVAccept(HyperVAddress),

    /// Hyper-V socket dialing out, with retry
    HyperVConnect(HyperVAddress),
}

impl fmt::Display for TransportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix { path } => write!(f, "file://{}", path.display()),
            Self::Tcp { host, port } if host.contains(':') => write!(f, "tcp://[{host}]:{port}"),
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::NamedPipe { path } => write!(f, "{path}"),
            Self::HyperVAccept(addr) => write!(f, "hyperv-accept://{addr}"),
            Self::HyperVConnect(addr) => write!(f, "hyperv-connect://{addr}"),
        }
    }
}

impl FromStr for TransportSpec {
    type Err = TargetError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        classify(input, &ClassifyOptions::default())
    }
}

/// Classify a raw target string
///
/// # Errors
///
/// Returns [`TargetError`] when the target is neither a pipe path nor a URL
/// with a recognised scheme.
pub fn classify(raw: &str, options: &ClassifyOptions) -> Result<TransportSpec, TargetError> {
    if raw.starts_with(UNC_PREFIX) {
        return Ok(TransportSpec::NamedPipe {
            path: raw.to_string(),
        });
    }

    let url = Url::parse(raw).map_err(|source| TargetError::Unparseable {
        target: raw.to_string(),
        source,
    })?;

    match url.scheme() {
        "file" => Ok(TransportSpec::Unix {
            path: sandboxed(&decoded_path(&url), options),
        }),
        "tcp" => Ok(TransportSpec::Tcp {
            host: host_of(&url).unwrap_or_else(|| DEFAULT_TCP_HOST.to_string()),
            port: url.port().unwrap_or(DEFAULT_TCP_PORT),
        }),
        "hyperv-accept" => Ok(TransportSpec::HyperVAccept(hyperv_address(&url))),
        "hyperv-connect" => Ok(TransportSpec::HyperVConnect(hyperv_address(&url))),
        other => Err(TargetError::UnknownScheme {
            target: raw.to_string(),
            scheme: other.to_string(),
        }),
    }
}

/// Host component without IPv6 brackets; `None` when absent or empty
fn host_of(url: &Url) -> Option<String> {
    let host = match url.host()? {
        Host::Domain(domain) => domain.to_string(),
        Host::Ipv4(addr) => addr.to_string(),
        Host::Ipv6(addr) => addr.to_string(),
    };
    (!host.is_empty()).then_some(host)
}

/// URL path with percent-escapes (`%20` and friends) undone
fn decoded_path(url: &Url) -> PathBuf {
    let bytes: Vec<u8> = percent_decode_str(url.path()).collect();
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStringExt;
        PathBuf::from(std::ffi::OsString::from_vec(bytes))
    }
    #[cfg(not(unix))]
    {
        PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn sandboxed(path: &Path, options: &ClassifyOptions) -> PathBuf {
    match &options.sandbox_root {
        Some(root) => root.join(path.strip_prefix("/").unwrap_or(path)),
        None => path.to_path_buf(),
    }
}

fn hyperv_address(url: &Url) -> HyperVAddress {
    let vm_id = host_of(url).unwrap_or_else(|| HV_GUID_LOOPBACK.to_string());
    let service = url.path().trim_start_matches('/');
    let service_id = if service.is_empty() {
        DEFAULT_HYPERV_SERVICE_ID.to_string()
    } else {
        service.to_string()
    };
    HyperVAddress { vm_id, service_id }
}
