use super::*;
use crate::config::PeerProfile;
use crate::net::{
    InboundPacket, InterfaceResolver, NetError, PeerSocket, SocketProvider, SocketSpec,
};
use crate::notify::{ConfigOp, EventSink};
use crate::session::defaults::{PORT_ECHO, PORT_MULTI_HOP, PORT_SINGLE_HOP};
use crate::session::{PollState, Session};
use crate::sla::SlaReport;
use crate::timer::TimerToken;
use crate::wire::ControlPacket;
use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;

mod detect;
mod echo;
mod sla;

/// Discriminator the simulated peer uses in these tests.
pub(super) const PEER_DISCR: u32 = 0x50EE_D001;

/// Default peer address in these tests.
pub(super) const PEER_ADDR: &str = "198.51.100.2";

// ============================================================================
// Recording doubles
// ============================================================================

#[derive(Clone, Debug)]
pub(super) struct SentPacket {
    pub socket: PeerSocket,
    pub dst: SocketAddr,
    pub data: Vec<u8>,
}

/// Socket provider that records every transmission.
pub(super) struct RecordingProvider {
    pub sent: Rc<RefCell<Vec<SentPacket>>>,
    pub open: Rc<RefCell<Vec<PeerSocket>>>,
    next_id: u64,
}

impl RecordingProvider {
    fn new(sent: Rc<RefCell<Vec<SentPacket>>>, open: Rc<RefCell<Vec<PeerSocket>>>) -> Self {
        Self {
            sent,
            open,
            next_id: 1,
        }
    }
}

impl SocketProvider for RecordingProvider {
    fn open_peer_socket(&mut self, _spec: &SocketSpec) -> Result<PeerSocket, NetError> {
        let socket = PeerSocket::from_raw(self.next_id);
        self.next_id += 1;
        self.open.borrow_mut().push(socket);
        Ok(socket)
    }

    fn send(&mut self, socket: PeerSocket, dst: SocketAddr, data: &[u8]) -> Result<(), NetError> {
        self.sent.borrow_mut().push(SentPacket {
            socket,
            dst,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn close(&mut self, socket: PeerSocket) {
        self.open.borrow_mut().retain(|s| *s != socket);
    }
}

/// Resolver with a fixed interface table.
pub(super) struct StaticResolver {
    ifindexes: HashMap<String, u32>,
}

impl StaticResolver {
    fn new() -> Self {
        let mut ifindexes = HashMap::new();
        ifindexes.insert("eth0".to_string(), 2);
        Self { ifindexes }
    }
}

impl InterfaceResolver for StaticResolver {
    fn ifindex_of(&self, name: &str) -> Result<u32, NetError> {
        self.ifindexes
            .get(name)
            .copied()
            .ok_or_else(|| NetError::UnknownInterface(name.to_string()))
    }

    fn mac_of(&self, name: &str) -> Result<[u8; 6], NetError> {
        if self.ifindexes.contains_key(name) {
            Ok([0x02, 0, 0, 0, 0, 0x01])
        } else {
            Err(NetError::UnknownInterface(name.to_string()))
        }
    }

    fn vrf_of_interface(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Observer events, reduced to comparable snapshots.
#[derive(Clone, Debug, PartialEq)]
pub(super) enum Event {
    State(SessionState, Diag),
    Config(ConfigOp),
    Sla(SlaReport),
}

pub(super) struct RecordingSink {
    pub events: Rc<RefCell<Vec<Event>>>,
}

impl EventSink for RecordingSink {
    fn on_state_change(&mut self, session: &Session) {
        self.events
            .borrow_mut()
            .push(Event::State(session.state, session.local_diag));
    }

    fn on_config_change(&mut self, op: ConfigOp, _session: &Session) {
        self.events.borrow_mut().push(Event::Config(op));
    }

    fn on_sla_report(&mut self, _session: &Session, report: &SlaReport) {
        self.events.borrow_mut().push(Event::Sla(*report));
    }
}

// ============================================================================
// Test bed
// ============================================================================

pub(super) struct TestBed {
    pub daemon: Daemon,
    pub sent: Rc<RefCell<Vec<SentPacket>>>,
    pub open_sockets: Rc<RefCell<Vec<PeerSocket>>>,
    pub events: Rc<RefCell<Vec<Event>>>,
}

impl TestBed {
    /// Control packets transmitted so far, in order, echo excluded.
    pub fn sent_ctrl(&self) -> Vec<ControlPacket> {
        self.sent
            .borrow()
            .iter()
            .filter(|p| p.dst.port() != PORT_ECHO)
            .map(|p| ControlPacket::parse(&p.data).expect("valid outbound packet"))
            .collect()
    }

    /// The most recent control packet put on the wire.
    pub fn last_ctrl(&self) -> ControlPacket {
        self.sent_ctrl().last().expect("a packet was sent").clone()
    }

    /// Echo packets transmitted so far.
    pub fn sent_echo(&self) -> Vec<crate::wire::EchoPacket> {
        self.sent
            .borrow()
            .iter()
            .filter(|p| p.dst.port() == PORT_ECHO)
            .map(|p| crate::wire::EchoPacket::parse(&p.data).expect("valid echo"))
            .collect()
    }

    /// Observer state-change events seen so far.
    pub fn state_events(&self) -> Vec<(SessionState, Diag)> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::State(s, d) => Some((*s, *d)),
                _ => None,
            })
            .collect()
    }

    pub fn sla_events(&self) -> Vec<SlaReport> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Sla(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    pub fn session(&self, handle: SessionHandle) -> &Session {
        self.daemon.registry.get(handle).expect("session exists")
    }

    /// Fire the control transmit timer by hand at `now_us`.
    pub fn fire_xmit(&mut self, handle: SessionHandle, now_us: u64) {
        self.daemon.handle_timer(
            TimerToken {
                session: handle,
                kind: TimerKind::CtrlXmit,
            },
            now_us,
        );
    }

    /// Fire the control detect timer by hand at `now_us`.
    pub fn fire_detect(&mut self, handle: SessionHandle, now_us: u64) {
        self.daemon.handle_timer(
            TimerToken {
                session: handle,
                kind: TimerKind::CtrlDetect,
            },
            now_us,
        );
    }
}

pub(super) fn make_testbed() -> TestBed {
    let sent = Rc::new(RefCell::new(Vec::new()));
    let open_sockets = Rc::new(RefCell::new(Vec::new()));
    let events = Rc::new(RefCell::new(Vec::new()));
    let mut daemon = Daemon::new(
        Box::new(RecordingProvider::new(sent.clone(), open_sockets.clone())),
        Box::new(StaticResolver::new()),
        Box::new(RecordingSink {
            events: events.clone(),
        }),
    );
    daemon.rng = SmallRng::seed_from_u64(42);
    TestBed {
        daemon,
        sent,
        open_sockets,
        events,
    }
}

// ============================================================================
// Profile and packet builders
// ============================================================================

pub(super) fn make_profile() -> PeerProfile {
    let mut profile = PeerProfile::new(PEER_ADDR.parse().unwrap());
    profile.tx_interval_ms = Some(300);
    profile.rx_interval_ms = Some(300);
    profile.detect_multiplier = Some(3);
    profile
}

pub(super) fn peer_packet(state: SessionState, your_discr: u32) -> ControlPacket {
    ControlPacket {
        diag: Diag::None,
        state,
        poll: false,
        final_bit: false,
        cpi: false,
        auth_present: false,
        demand: false,
        detect_mult: 3,
        my_discr: PEER_DISCR,
        your_discr,
        desired_min_tx: 300_000,
        required_min_rx: 300_000,
        required_min_echo: 0,
    }
}

/// Wrap a control packet the way the single-hop listener would deliver
/// it.
pub(super) fn inbound(pkt: &ControlPacket) -> InboundPacket {
    inbound_from(pkt, PEER_ADDR)
}

pub(super) fn inbound_from(pkt: &ControlPacket, peer: &str) -> InboundPacket {
    InboundPacket {
        data: pkt.encode().to_vec(),
        peer: SocketAddr::new(peer.parse().unwrap(), 49252),
        local: SocketAddr::new("198.51.100.1".parse().unwrap(), PORT_SINGLE_HOP),
        ifname: None,
        ttl: Some(255),
        dst_port: PORT_SINGLE_HOP,
    }
}

pub(super) fn inbound_mhop(pkt: &ControlPacket, peer: &str, local: &str) -> InboundPacket {
    InboundPacket {
        data: pkt.encode().to_vec(),
        peer: SocketAddr::new(peer.parse().unwrap(), 49252),
        local: SocketAddr::new(local.parse().unwrap(), PORT_MULTI_HOP),
        ifname: None,
        ttl: Some(37),
        dst_port: PORT_MULTI_HOP,
    }
}

/// Drive a session through the three-way handshake to Up and complete
/// the timer negotiation. Returns the local discriminator.
pub(super) fn bring_up(tb: &mut TestBed, handle: SessionHandle) -> u32 {
    let discr = tb.session(handle).local_discr;
    tb.daemon
        .handle_packet(inbound(&peer_packet(SessionState::Down, discr)), 1_200_000);
    tb.daemon
        .handle_packet(inbound(&peer_packet(SessionState::Init, discr)), 1_500_000);
    let mut fin = peer_packet(SessionState::Up, discr);
    fin.final_bit = true;
    tb.daemon.handle_packet(inbound(&fin), 1_800_000);
    assert_eq!(tb.session(handle).state, SessionState::Up);
    discr
}
