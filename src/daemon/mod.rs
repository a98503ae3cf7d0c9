//! BFD Daemon Entity
//!
//! Top-level structure representing a running BFD instance. The Daemon
//! holds all state required for liveness detection: the session registry
//! and discriminator allocator, the timer queue, the transmit socket
//! provider, the interface resolver, and the observer sink.
//!
//! Everything runs on one cooperative event loop. Packet ingress, timer
//! firings, and configuration commands are handled to completion in
//! arrival order; the loop suspends only while waiting for the next
//! event or timer deadline. Handlers never block: transmit failures are
//! logged and the packet is dropped.

mod ingress;
mod lifecycle;
mod transmit;
#[cfg(test)]
mod tests;

use crate::config::PeerProfile;
use crate::net::{InboundPacket, InterfaceResolver, NetError, SocketProvider};
use crate::notify::EventSink;
use crate::session::defaults::SLOW_TX_INTERVAL_US;
use crate::session::discriminator::DiscriminatorAllocator;
use crate::session::registry::{SessionHandle, SessionRegistry};
use crate::session::SessionState;
use crate::timer::{TimerKind, TimerQueue, TimerToken};
use crate::wire::Diag;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Errors returned by the configuration API. The protocol state machine
/// itself never surfaces errors; it reports through the observer sink.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid peer configuration: {0}")]
    InvalidProfile(String),

    #[error("discriminator 0x{0:08x} already in use")]
    DiscriminatorInUse(u32),

    #[error("session already exists for this peer")]
    AlreadyExists,

    #[error("session not found")]
    NotFound,

    #[error("session has {refs} outstanding references")]
    Referenced { refs: u32 },

    #[error(transparent)]
    Net(#[from] NetError),
}

/// Commands the configuration collaborator sends into the event loop.
#[derive(Debug)]
pub enum Command {
    /// Create the session for this profile, or update it in place when
    /// the key already exists.
    Apply(PeerProfile),
    /// Delete the session addressed by this profile. Idempotent.
    Remove(PeerProfile),
    /// Stop the event loop.
    Shutdown,
}

/// Monotonic clock for the daemon. All timer deadlines and timestamps
/// are microseconds since construction.
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// A running BFD instance.
pub struct Daemon {
    pub(crate) registry: SessionRegistry,
    pub(crate) allocator: DiscriminatorAllocator,
    pub(crate) timers: TimerQueue,
    pub(crate) sockets: Box<dyn SocketProvider>,
    pub(crate) resolver: Box<dyn InterfaceResolver>,
    pub(crate) sink: Box<dyn EventSink>,
    pub(crate) rng: SmallRng,
    pub(crate) clock: Clock,
    /// Malformed or unmatched packets discarded since startup.
    pub(crate) dropped_packets: u64,
}

impl Daemon {
    pub fn new(
        sockets: Box<dyn SocketProvider>,
        resolver: Box<dyn InterfaceResolver>,
        sink: Box<dyn EventSink>,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            allocator: DiscriminatorAllocator::new(),
            timers: TimerQueue::new(),
            sockets,
            resolver,
            sink,
            rng: SmallRng::from_entropy(),
            clock: Clock::new(),
            dropped_packets: 0,
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Packets dropped before reaching a session.
    pub fn dropped_packets(&self) -> u64 {
        self.dropped_packets
    }

    /// Take an external reference on a session, pinning it against
    /// deletion. Returns false when the handle no longer resolves.
    pub fn acquire(&mut self, handle: SessionHandle) -> bool {
        match self.registry.get_mut(handle) {
            Some(session) => {
                session.refcount += 1;
                true
            }
            None => false,
        }
    }

    /// Drop an external reference.
    pub fn release(&mut self, handle: SessionHandle) {
        if let Some(session) = self.registry.get_mut(handle) {
            debug_assert!(session.refcount > 0, "refcount underflow");
            if session.refcount == 0 {
                warn!(discr = format_args!("0x{:08x}", session.local_discr),
                      "release without matching acquire");
                return;
            }
            session.refcount -= 1;
        }
    }

    /// Drive the daemon until the command channel closes or a Shutdown
    /// command arrives. This is the only place the loop suspends.
    pub async fn run(
        &mut self,
        mut packets: mpsc::Receiver<InboundPacket>,
        mut commands: mpsc::Receiver<Command>,
    ) {
        info!("event loop started");
        loop {
            let now = self.clock.now_us();
            while let Some(token) = self.timers.pop_due(now) {
                self.handle_timer(token, now);
            }

            let sleep_for = match self.timers.next_deadline() {
                Some(deadline) => Duration::from_micros(deadline.saturating_sub(now)),
                None => Duration::from_secs(3600),
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                maybe = packets.recv() => match maybe {
                    Some(pkt) => {
                        let now = self.clock.now_us();
                        self.handle_packet(pkt, now);
                    }
                    None => {
                        info!("packet channel closed, stopping");
                        break;
                    }
                },
                maybe = commands.recv() => match maybe {
                    Some(cmd) => {
                        let now = self.clock.now_us();
                        if !self.handle_command(cmd, now) {
                            break;
                        }
                    }
                    None => {
                        info!("command channel closed, stopping");
                        break;
                    }
                },
            }
        }
    }

    /// Apply one command. Returns false when the loop should stop.
    pub fn handle_command(&mut self, cmd: Command, now_us: u64) -> bool {
        match cmd {
            Command::Apply(profile) => {
                if let Err(e) = self.apply_profile(&profile, now_us) {
                    warn!(peer = %profile.peer, error = %e, "configuration rejected");
                }
                true
            }
            Command::Remove(profile) => {
                if let Err(e) = self.remove_peer(&profile) {
                    warn!(peer = %profile.peer, error = %e, "delete rejected");
                }
                true
            }
            Command::Shutdown => {
                info!("shutdown requested");
                false
            }
        }
    }

    /// Dispatch one fired timer. A token whose handle no longer resolves
    /// belonged to a deleted session and is dropped here.
    pub fn handle_timer(&mut self, token: TimerToken, now_us: u64) {
        if self.registry.get(token.session).is_none() {
            debug!(session = %token.session, "timer for deleted session ignored");
            return;
        }
        match token.kind {
            TimerKind::CtrlXmit => self.transmit_scheduled(token.session, now_us),
            TimerKind::CtrlDetect => self.detect_expired(token.session, now_us),
            TimerKind::EchoXmit => self.echo_transmit(token.session, now_us),
            TimerKind::EchoDetect => self.echo_detect_expired(token.session, now_us),
        }
    }

    /// The control detection timer ran out: no valid packet from the
    /// peer within the detection time.
    fn detect_expired(&mut self, handle: SessionHandle, now_us: u64) {
        let Some(session) = self.registry.get_mut(handle) else {
            return;
        };
        match session.state {
            SessionState::Init | SessionState::Up => {
                info!(
                    discr = format_args!("0x{:08x}", session.local_discr),
                    peer = %session.key,
                    state = %session.state,
                    "detection time expired"
                );
                self.session_down(handle, Diag::DetectTime, now_us);
            }
            SessionState::Down => {
                // Second expiration: forget the remote discriminator
                // (RFC 5880 §6.5.1).
                session.remote_discr = 0;
            }
            SessionState::AdminDown => {}
        }
    }

    /// The echo detection timer ran out while the echo function was
    /// active.
    fn echo_detect_expired(&mut self, handle: SessionHandle, now_us: u64) {
        let Some(session) = self.registry.get(handle) else {
            return;
        };
        if matches!(session.state, SessionState::Init | SessionState::Up) {
            info!(
                discr = format_args!("0x{:08x}", session.local_discr),
                peer = %session.key,
                "echo detection time expired"
            );
            self.session_down(handle, Diag::DetectTime, now_us);
        }
    }

    /// Slow detection window used before the peer has been heard.
    pub(crate) fn slow_detect_to(detect_mult: u8) -> u64 {
        detect_mult as u64 * SLOW_TX_INTERVAL_US as u64
    }
}
