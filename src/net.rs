//! UDP plumbing and host interface lookups.
//!
//! The daemon core talks to the network through two narrow traits so the
//! protocol logic stays testable without sockets: a [`SocketProvider`]
//! that owns per-session transmit sockets, and an [`InterfaceResolver`]
//! for interface index / MAC / VRF queries. Inbound packets arrive on a
//! channel fed by [`run_udp_listener`] tasks, one per well-known port.

use crate::session::defaults::{SINGLE_HOP_TTL, SOURCE_PORT_RANGE};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Errors from socket setup and interface lookups.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("no free source port in the BFD range")]
    NoSourcePort,

    #[error("socket setup failed: {0}")]
    SocketSetup(#[source] std::io::Error),

    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown interface {0}")]
    UnknownInterface(String),

    #[error("unknown socket handle")]
    UnknownSocket,
}

/// Opaque handle to a transmit socket owned by the provider. Each session
/// owns exactly one; it is closed when the session is deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerSocket(u64);

impl PeerSocket {
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

/// What a transmit socket must look like.
#[derive(Clone, Debug)]
pub struct SocketSpec {
    /// Local address to bind, unspecified when the host should choose.
    pub local: Option<IpAddr>,
    /// Peer address family selects v4/v6 when `local` is absent.
    pub ipv6: bool,
    /// Whether this is a multihop session (single-hop sends with TTL 255
    /// per GTSM; multihop uses its configured TTL).
    pub multihop: bool,
    /// TTL for multihop transmit.
    pub mh_ttl: u8,
}

/// One packet handed to the daemon by a listener.
#[derive(Clone, Debug)]
pub struct InboundPacket {
    pub data: Vec<u8>,
    pub peer: SocketAddr,
    pub local: SocketAddr,
    /// Receiving interface, when the listener knows it.
    pub ifname: Option<String>,
    /// IP TTL / hop limit of the packet, when the platform exposes it.
    /// `None` skips the GTSM check rather than failing it.
    pub ttl: Option<u8>,
    /// Well-known destination port the packet arrived on.
    pub dst_port: u16,
}

/// Owns transmit sockets on behalf of sessions.
pub trait SocketProvider {
    /// Open a transmit socket for a new session.
    fn open_peer_socket(&mut self, spec: &SocketSpec) -> Result<PeerSocket, NetError>;

    /// Transmit one datagram. Non-blocking: a failed send is reported,
    /// never retried.
    fn send(&mut self, socket: PeerSocket, dst: SocketAddr, data: &[u8]) -> Result<(), NetError>;

    /// Close a session's socket. Closing an unknown handle is a no-op.
    fn close(&mut self, socket: PeerSocket);
}

/// Host interface queries.
pub trait InterfaceResolver {
    fn ifindex_of(&self, name: &str) -> Result<u32, NetError>;
    fn mac_of(&self, name: &str) -> Result<[u8; 6], NetError>;
    fn vrf_of_interface(&self, name: &str) -> Option<String>;
}

// ============================================================================
// UDP socket provider
// ============================================================================

/// Production [`SocketProvider`] over the kernel UDP stack.
///
/// Each session gets its own non-blocking socket bound to a source port
/// from the BFD ephemeral range, because the source port identifies the
/// sender on single-hop links (RFC 5881 §4).
pub struct UdpSocketProvider {
    sockets: HashMap<u64, std::net::UdpSocket>,
    next_id: u64,
}

impl UdpSocketProvider {
    pub fn new() -> Self {
        Self {
            sockets: HashMap::new(),
            next_id: 1,
        }
    }
}

impl Default for UdpSocketProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketProvider for UdpSocketProvider {
    fn open_peer_socket(&mut self, spec: &SocketSpec) -> Result<PeerSocket, NetError> {
        let local_ip = spec.local.unwrap_or(if spec.ipv6 {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        });

        // Walk the BFD source port range until a bind sticks.
        let socket = SOURCE_PORT_RANGE
            .clone()
            .find_map(|port| std::net::UdpSocket::bind(SocketAddr::new(local_ip, port)).ok())
            .ok_or(NetError::NoSourcePort)?;

        socket.set_nonblocking(true).map_err(NetError::SocketSetup)?;
        let ttl = if spec.multihop {
            spec.mh_ttl
        } else {
            SINGLE_HOP_TTL
        };
        socket.set_ttl(ttl as u32).map_err(NetError::SocketSetup)?;

        let id = self.next_id;
        self.next_id += 1;
        self.sockets.insert(id, socket);
        debug!(id, ttl, "peer socket opened");
        Ok(PeerSocket(id))
    }

    fn send(&mut self, socket: PeerSocket, dst: SocketAddr, data: &[u8]) -> Result<(), NetError> {
        let sock = self.sockets.get(&socket.0).ok_or(NetError::UnknownSocket)?;
        sock.send_to(data, dst)
            .map(|_| ())
            .map_err(NetError::SendFailed)
    }

    fn close(&mut self, socket: PeerSocket) {
        self.sockets.remove(&socket.0);
    }
}

// ============================================================================
// Sysfs interface resolver
// ============================================================================

/// [`InterfaceResolver`] backed by `/sys/class/net`.
pub struct SysfsResolver {
    root: PathBuf,
}

impl SysfsResolver {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/sys/class/net"),
        }
    }

    /// Resolver rooted at an arbitrary directory, for tests.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_attr(&self, name: &str, attr: &str) -> Result<String, NetError> {
        let path = self.root.join(name).join(attr);
        std::fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .map_err(|_| NetError::UnknownInterface(name.to_string()))
    }
}

impl Default for SysfsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceResolver for SysfsResolver {
    fn ifindex_of(&self, name: &str) -> Result<u32, NetError> {
        self.read_attr(name, "ifindex")?
            .parse()
            .map_err(|_| NetError::UnknownInterface(name.to_string()))
    }

    fn mac_of(&self, name: &str) -> Result<[u8; 6], NetError> {
        let raw = self.read_attr(name, "address")?;
        let mut mac = [0u8; 6];
        let mut parts = raw.split(':');
        for byte in mac.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| NetError::UnknownInterface(name.to_string()))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| NetError::UnknownInterface(name.to_string()))?;
        }
        Ok(mac)
    }

    fn vrf_of_interface(&self, name: &str) -> Option<String> {
        // A VRF slave exposes its master device as a symlink.
        let master = self.root.join(name).join("master");
        let target = std::fs::read_link(master).ok()?;
        target.file_name().map(|n| n.to_string_lossy().into_owned())
    }
}

// ============================================================================
// Listeners
// ============================================================================

/// Receive loop for one well-known BFD port, run as a spawned task.
///
/// Packets are forwarded into the daemon's ingress channel; when the
/// daemon goes away the loop ends. TTL and receiving interface are not
/// available through the portable socket API and are left unset; the
/// ingress path treats them as unverifiable rather than wrong.
pub async fn run_udp_listener(
    bind: IpAddr,
    port: u16,
    tx: mpsc::Sender<InboundPacket>,
) -> Result<(), NetError> {
    let addr = SocketAddr::new(bind, port);
    let socket = tokio::net::UdpSocket::bind(addr)
        .await
        .map_err(|e| NetError::BindFailed { addr, source: e })?;
    let local = socket.local_addr().map_err(NetError::SocketSetup)?;

    info!(%local, "listener started");

    let mut buf = vec![0u8; 512];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, peer)) => {
                let packet = InboundPacket {
                    data: buf[..len].to_vec(),
                    peer,
                    local,
                    ifname: None,
                    ttl: None,
                    dst_port: port,
                };
                if tx.send(packet).await.is_err() {
                    info!(%local, "ingress channel closed, stopping listener");
                    return Ok(());
                }
            }
            Err(e) => {
                // Transient receive errors are expected; keep serving.
                warn!(%local, error = %e, "receive error");
            }
        }
    }
}

/// Convenience spec for a session profile.
pub fn socket_spec(
    local: Option<IpAddr>,
    peer: IpAddr,
    multihop: bool,
    mh_ttl: u8,
) -> SocketSpec {
    SocketSpec {
        local,
        ipv6: peer.is_ipv6(),
        multihop,
        mh_ttl,
    }
}

// ============================================================================
// Tests
// ============================================================================
