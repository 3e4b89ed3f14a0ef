//! Hyper-V Socket Transport (Windows)
//!
//! `AF_HYPERV` sockets are ordinary Winsock stream sockets with their own
//! address family, so they are created through `socket2`. Accept and connect
//! are blocking calls: accept runs on a dedicated thread per listener,
//! connect on the blocking pool. Once established, the socket is switched to
//! non-blocking mode and registered with tokio as a stream socket.

use std::io;
use std::mem;

use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use uuid::Uuid;

use super::blocking_accept::BlockingAcceptor;
use super::{Connection, Dial};
use crate::target::HyperVAddress;

/// `AF_HYPERV` from `hvsocket.h`
const AF_HYPERV: i32 = 34;

/// `HV_PROTOCOL_RAW` from `hvsocket.h`
const HV_PROTOCOL_RAW: i32 = 1;

/// Winsock `GUID` layout
#[repr(C)]
struct Guid {
    data1: u32,
    data2: u16,
    data3: u16,
    data4: [u8; 8],
}

impl From<Uuid> for Guid {
    fn from(uuid: Uuid) -> Self {
        let (data1, data2, data3, data4) = uuid.as_fields();
        Self {
            data1,
            data2,
            data3,
            data4: *data4,
        }
    }
}

/// `SOCKADDR_HV` from `hvsocket.h`
#[repr(C)]
struct SockAddrHv {
    family: u16,
    reserved: u16,
    vm_id: Guid,
    service_id: Guid,
}

/// Resolved GUID pair of a Hyper-V target
#[derive(Clone, Copy, Debug)]
pub struct HvEndpoint {
    vm_id: Uuid,
    service_id: Uuid,
}

impl HvEndpoint {
    /// Resolve the textual ids of a target
    ///
    /// # Errors
    ///
    /// Returns the parse error of whichever id is not a GUID or alias.
    pub fn resolve(address: &HyperVAddress) -> Result<Self, uuid::Error> {
        Ok(Self {
            vm_id: address.vm_guid()?,
            service_id: address.service_guid()?,
        })
    }

    fn sock_addr(self) -> io::Result<SockAddr> {
        let raw = SockAddrHv {
            family: AF_HYPERV as u16,
            reserved: 0,
            vm_id: self.vm_id.into(),
            service_id: self.service_id.into(),
        };
        // SAFETY: SOCKADDR_HV is smaller than SOCKADDR_STORAGE and the
        // reported length matches what was written.
        let ((), addr) = unsafe {
            SockAddr::try_init(|storage, len| {
                storage.cast::<SockAddrHv>().write(raw);
                *len = mem::size_of::<SockAddrHv>() as _;
                Ok(())
            })
        }?;
        Ok(addr)
    }

    fn socket() -> io::Result<Socket> {
        Socket::new(
            Domain::from(AF_HYPERV),
            Type::STREAM,
            Some(Protocol::from(HV_PROTOCOL_RAW)),
        )
    }
}

/// Hand an established hypervisor socket to tokio
fn into_connection(socket: Socket, peer: String) -> io::Result<Connection> {
    socket.set_nonblocking(true)?;
    let stream = tokio::net::TcpStream::from_std(std::net::TcpStream::from(socket))?;
    Ok(Connection::new(stream, peer))
}

/// Hyper-V socket bound to a `(vm_id, service_id)` pair, not yet listening
#[derive(Debug)]
pub struct HyperVSocket {
    socket: Socket,
    label: String,
}

impl HyperVSocket {
    /// Create and bind the socket
    ///
    /// # Errors
    ///
    /// Returns the Winsock error from `socket` or `bind`.
    pub fn bind(endpoint: HvEndpoint, label: String) -> io::Result<Self> {
        let socket = HvEndpoint::socket()?;
        socket.bind(&endpoint.sock_addr()?)?;
        Ok(Self { socket, label })
    }

    /// Start listening and hand the socket to its accept thread
    ///
    /// # Errors
    ///
    /// Returns the Winsock error from `listen`, or the thread spawn error.
    pub fn listen(self, backlog: u32) -> io::Result<HyperVListener> {
        self.socket
            .listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;
        let socket = self.socket;
        let acceptor = BlockingAcceptor::spawn(format!("hv-accept {}", self.label), move || {
            socket.accept().map(|(stream, _addr)| stream)
        })?;
        Ok(HyperVListener {
            acceptor,
            label: self.label,
        })
    }
}

/// Listening Hyper-V socket
#[derive(Debug)]
pub struct HyperVListener {
    acceptor: BlockingAcceptor<Socket>,
    label: String,
}

impl HyperVListener {
    /// Wait for the next inbound connection
    ///
    /// # Errors
    ///
    /// Returns the Winsock error from `accept`.
    pub async fn accept(&mut self) -> io::Result<Connection> {
        let stream = self.acceptor.accept().await?;
        into_connection(stream, self.label.clone())
    }
}

/// Dial procedure for `hyperv-connect://` targets
///
/// Ids are resolved on every attempt, so an id that is not a GUID is a
/// failed dial (and retried) rather than a startup error.
#[derive(Debug)]
pub struct HyperVDialer {
    address: HyperVAddress,
    label: String,
}

impl HyperVDialer {
    /// Build a dialer; nothing is opened until [`Dial::dial`]
    #[must_use]
    pub fn new(address: HyperVAddress, label: String) -> Self {
        Self { address, label }
    }
}

#[async_trait]
impl Dial for HyperVDialer {
    async fn dial(&self) -> io::Result<Connection> {
        let endpoint = HvEndpoint::resolve(&self.address)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let stream = tokio::task::spawn_blocking(move || {
            // A failed connect drops (closes) this endpoint; the next attempt
            // starts from a fresh socket.
            let socket = HvEndpoint::socket()?;
            socket.connect(&endpoint.sock_addr()?)?;
            Ok::<_, io::Error>(socket)
        })
        .await
        .map_err(io::Error::other)??;
        into_connection(stream, self.label.clone())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
