//! BFD Session Entity
//!
//! A [`Session`] carries everything the protocol knows about one peer:
//! identity (discriminators, optional label), the address key, protocol
//! state and diagnostics, negotiated and working timer values, the poll
//! sub-state, statistics, and SLA accumulators. Sessions are owned by the
//! [`registry`](crate::session::registry) and addressed by handle; all
//! mutation happens on the daemon event loop.

pub mod defaults;
pub mod discriminator;
pub mod registry;

use crate::net::PeerSocket;
use crate::sla::SlaTracker;
use crate::wire::{ControlPacket, Diag};
use defaults::{
    DEFAULT_DETECT_MULT, DEFAULT_MHOP_TTL, DEFAULT_REQUIRED_MIN_ECHO_US,
    DEFAULT_REQUIRED_MIN_RX_US, PORT_MULTI_HOP, PORT_SINGLE_HOP, SLOW_TX_INTERVAL_US,
};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

// ============================================================================
// Protocol state
// ============================================================================

/// Session state, as carried in the two state bits of a control packet
/// (RFC 5880 §4.1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Administratively held down. Entered and left only by local
    /// configuration.
    AdminDown,
    /// Session is down or has just been created.
    #[default]
    Down,
    /// The peer was heard in Down state; waiting for it to see us.
    Init,
    /// Both directions are live.
    Up,
}

impl SessionState {
    pub fn to_wire(self) -> u8 {
        match self {
            SessionState::AdminDown => 0,
            SessionState::Down => 1,
            SessionState::Init => 2,
            SessionState::Up => 3,
        }
    }

    /// Decode the 2-bit state field. Infallible after masking.
    pub fn from_wire(val: u8) -> Self {
        match val & 0x03 {
            0 => SessionState::AdminDown,
            1 => SessionState::Down,
            2 => SessionState::Init,
            _ => SessionState::Up,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::AdminDown => "admin-down",
            SessionState::Down => "down",
            SessionState::Init => "init",
            SessionState::Up => "up",
        };
        write!(f, "{}", s)
    }
}

/// Poll sequence sub-state (RFC 5880 §6.5).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PollState {
    /// No poll sequence in progress.
    #[default]
    Idle,
    /// We transmitted with the Poll bit and are waiting for Final.
    PollSent,
    /// Final arrived and the staged timers were committed. Cleared on the
    /// next scheduled transmit.
    FinalReceived,
}

// ============================================================================
// Address keys
// ============================================================================

/// Key of a single-hop session: peer address plus an optional local
/// interface name (empty string matches any interface).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SingleHopKey {
    pub peer: IpAddr,
    pub interface: String,
}

/// Key of a multihop session: peer and local addresses plus VRF name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MultiHopKey {
    pub peer: IpAddr,
    pub local: IpAddr,
    pub vrf: String,
}

/// How a session is addressed. Exactly one variant applies for the whole
/// session lifetime. Keys carry bare IP addresses; UDP ports are stripped
/// before key construction so packets from ephemeral source ports match.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SessionKey {
    SingleHop(SingleHopKey),
    MultiHop(MultiHopKey),
}

impl SessionKey {
    pub fn peer(&self) -> IpAddr {
        match self {
            SessionKey::SingleHop(k) => k.peer,
            SessionKey::MultiHop(k) => k.peer,
        }
    }

    pub fn is_multihop(&self) -> bool {
        matches!(self, SessionKey::MultiHop(_))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKey::SingleHop(k) if k.interface.is_empty() => write!(f, "{}", k.peer),
            SessionKey::SingleHop(k) => write!(f, "{}%{}", k.peer, k.interface),
            SessionKey::MultiHop(k) if k.vrf.is_empty() => {
                write!(f, "{}->{}", k.local, k.peer)
            }
            SessionKey::MultiHop(k) => write!(f, "{}->{}@{}", k.local, k.peer, k.vrf),
        }
    }
}

// ============================================================================
// Timer and peer parameter sets
// ============================================================================

/// The three interval values this endpoint advertises, microseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntervalConfig {
    pub desired_min_tx: u32,
    pub required_min_rx: u32,
    pub required_min_echo: u32,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            desired_min_tx: SLOW_TX_INTERVAL_US,
            required_min_rx: DEFAULT_REQUIRED_MIN_RX_US,
            required_min_echo: DEFAULT_REQUIRED_MIN_ECHO_US,
        }
    }
}

/// Transmit parameters staged during a poll sequence and committed when
/// the peer answers with Final.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StagedTimers {
    pub desired_min_tx: u32,
    pub required_min_rx: u32,
}

/// Everything learned from the peer's most recent valid control packet.
#[derive(Clone, Copy, Debug, Default)]
pub struct RemoteParams {
    pub state: SessionState,
    pub diag: Diag,
    pub detect_mult: u8,
    pub desired_min_tx: u32,
    pub required_min_rx: u32,
    pub required_min_echo: u32,
}

// ============================================================================
// Flags, statistics
// ============================================================================

/// Session mode flags.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionFlags {
    /// Held in AdminDown by configuration.
    pub admin_shutdown: bool,
    /// Echo mode requested by configuration.
    pub echo_requested: bool,
    /// Echo timers are currently running.
    pub echo_active: bool,
    /// Peer is an IPv6 address.
    pub ipv6: bool,
    /// SLA accounting enabled.
    pub track_sla: bool,
    /// Session rides a VXLAN tunnel. Accepted from configuration but
    /// encapsulation is not performed.
    pub vxlan: bool,
}

/// Packet and transition counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionStats {
    pub rx_ctrl: u64,
    pub tx_ctrl: u64,
    pub rx_echo: u64,
    pub tx_echo: u64,
    pub state_changes: u64,
    pub up_events: u64,
}

impl SessionStats {
    /// Total packets received on this session, control plus echo.
    pub fn rx_total(&self) -> u64 {
        self.rx_ctrl + self.rx_echo
    }

    /// Total packets transmitted on this session, control plus echo.
    pub fn tx_total(&self) -> u64 {
        self.tx_ctrl + self.tx_echo
    }
}

// ============================================================================
// Session
// ============================================================================

/// One BFD session with one peer.
#[derive(Debug)]
pub struct Session {
    /// Our discriminator, unique in this process, nonzero.
    pub local_discr: u32,
    /// Peer's discriminator, 0 until learned and cleared on every entry
    /// to Down.
    pub remote_discr: u32,
    /// Optional operator-facing name, unique across sessions.
    pub label: Option<String>,
    /// Address key. Fixed at creation.
    pub key: SessionKey,

    pub state: SessionState,
    pub local_diag: Diag,
    pub poll: PollState,
    pub staged: StagedTimers,

    /// Intervals currently advertised to the peer.
    pub local: IntervalConfig,
    /// Desired transmit interval to negotiate once Up.
    pub up_min_tx: u32,
    pub detect_mult: u8,
    pub remote: RemoteParams,

    /// Working control transmit period, microseconds.
    pub xmt_to: u64,
    /// Working control detection timeout, microseconds.
    pub detect_to: u64,
    /// Working echo transmit period, microseconds. 0 while echo is off.
    pub echo_xmt_to: u64,
    /// Working echo detection timeout, microseconds. 0 while echo is off.
    pub echo_detect_to: u64,

    pub flags: SessionFlags,
    pub stats: SessionStats,
    pub sla: SlaTracker,

    /// Monotonic µs of the last transition to Up.
    pub uptime_us: u64,
    /// Monotonic µs of the last transition to Down.
    pub downtime_us: u64,
    /// Monotonic µs of the last transmitted packet, if any.
    pub last_xmit_us: Option<u64>,

    /// Next echo sequence number.
    pub echo_seq: u64,
    /// Transmit socket owned by this session.
    pub socket: PeerSocket,
    /// Interface index for single-hop sessions bound to an interface.
    pub ifindex: Option<u32>,
    /// Local interface MAC, kept for the single-hop echo path.
    pub local_mac: Option<[u8; 6]>,
    /// TTL used on multihop transmit.
    pub mh_ttl: u8,
    /// External references pinning this session against deletion.
    pub refcount: u32,
}

impl Session {
    /// Create a session in Down state with slow-start timers.
    pub fn new(local_discr: u32, key: SessionKey, socket: PeerSocket) -> Self {
        let ipv6 = key.peer().is_ipv6();
        Self {
            local_discr,
            remote_discr: 0,
            label: None,
            key,
            state: SessionState::Down,
            local_diag: Diag::None,
            poll: PollState::Idle,
            staged: StagedTimers::default(),
            local: IntervalConfig::default(),
            up_min_tx: defaults::DEFAULT_DESIRED_MIN_TX_US,
            detect_mult: DEFAULT_DETECT_MULT,
            remote: RemoteParams::default(),
            xmt_to: SLOW_TX_INTERVAL_US as u64,
            detect_to: DEFAULT_DETECT_MULT as u64 * SLOW_TX_INTERVAL_US as u64,
            echo_xmt_to: 0,
            echo_detect_to: 0,
            flags: SessionFlags {
                ipv6,
                ..SessionFlags::default()
            },
            stats: SessionStats::default(),
            sla: SlaTracker::new(),
            uptime_us: 0,
            downtime_us: 0,
            last_xmit_us: None,
            echo_seq: 0,
            socket,
            ifindex: None,
            local_mac: None,
            mh_ttl: DEFAULT_MHOP_TTL,
            refcount: 0,
        }
    }

    pub fn is_multihop(&self) -> bool {
        self.key.is_multihop()
    }

    pub fn peer_addr(&self) -> IpAddr {
        self.key.peer()
    }

    /// Destination for control packets.
    pub fn control_dst(&self) -> SocketAddr {
        let port = if self.is_multihop() {
            PORT_MULTI_HOP
        } else {
            PORT_SINGLE_HOP
        };
        SocketAddr::new(self.peer_addr(), port)
    }

    /// Destination for echo packets.
    pub fn echo_dst(&self) -> SocketAddr {
        SocketAddr::new(self.peer_addr(), defaults::PORT_ECHO)
    }

    /// Recompute the working control timers from local and remote
    /// parameters (RFC 5880 §6.8.2, §6.8.4).
    ///
    /// The effective desired transmit interval is floored at the slow
    /// start value until the session is Up.
    pub fn recompute_intervals(&mut self) {
        let desired = if self.state == SessionState::Up {
            self.local.desired_min_tx
        } else {
            self.local.desired_min_tx.max(SLOW_TX_INTERVAL_US)
        };
        self.xmt_to = desired.max(self.remote.required_min_rx) as u64;
        self.detect_to = self.remote.detect_mult as u64
            * self.local.required_min_rx.max(self.remote.desired_min_tx) as u64;
    }

    /// Build the control packet this session would transmit now.
    ///
    /// While a poll sequence is open the staged timer values are
    /// advertised; they become live only when the peer answers with
    /// Final. A Final reply never carries the Poll bit.
    pub fn control_packet(&self, final_bit: bool) -> ControlPacket {
        let polling = self.poll == PollState::PollSent;
        let (desired_min_tx, required_min_rx) = if polling {
            (self.staged.desired_min_tx, self.staged.required_min_rx)
        } else {
            (self.local.desired_min_tx, self.local.required_min_rx)
        };
        ControlPacket {
            diag: self.local_diag,
            state: self.state,
            poll: polling && !final_bit,
            final_bit,
            cpi: false,
            auth_present: false,
            demand: false,
            detect_mult: self.detect_mult,
            my_discr: self.local_discr,
            your_discr: self.remote_discr,
            desired_min_tx,
            required_min_rx,
            required_min_echo: self.local.required_min_echo,
        }
    }

    /// Whether the echo function may run right now (RFC 5880 §6.4: Up,
    /// requested, peer willing, single-hop only).
    pub fn echo_eligible(&self) -> bool {
        self.state == SessionState::Up
            && self.flags.echo_requested
            && self.remote.required_min_echo > 0
            && !self.is_multihop()
    }

    /// The echo interval both ends can sustain.
    pub fn negotiated_echo_interval(&self) -> u64 {
        self.local.required_min_echo.max(self.remote.required_min_echo) as u64
    }
}

// ============================================================================
// Tests
// ============================================================================
