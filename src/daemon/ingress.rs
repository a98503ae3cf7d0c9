//! Inbound packet processing.
//!
//! Packets arrive from the listeners with their transport metadata and
//! go through three gates before touching a session: codec validation,
//! the port/TTL rules for how they arrived, and demultiplexing. An
//! accepted control packet refreshes the remote parameter set, answers
//! polls, commits poll sequences, drives the state transition table, and
//! feeds SLA sampling.

use super::Daemon;
use crate::net::InboundPacket;
use crate::session::defaults::{PORT_ECHO, PORT_MULTI_HOP, SINGLE_HOP_TTL, SOURCE_PORT_RANGE};
use crate::session::registry::SessionHandle;
use crate::session::{PollState, SessionState};
use crate::timer::TimerKind;
use crate::wire::{ControlPacket, Diag, EchoPacket};
use tracing::debug;

impl Daemon {
    /// Entry point for every packet a listener hands us.
    pub fn handle_packet(&mut self, pkt: InboundPacket, now_us: u64) {
        if pkt.dst_port == PORT_ECHO {
            self.handle_echo_packet(&pkt, now_us);
            return;
        }

        let parsed = match ControlPacket::parse(&pkt.data) {
            Ok(p) => p,
            Err(e) => {
                self.dropped_packets += 1;
                debug!(peer = %pkt.peer, error = %e, "control packet dropped");
                return;
            }
        };

        let is_mhop = pkt.dst_port == PORT_MULTI_HOP;
        if !is_mhop {
            // RFC 5881: single-hop senders use the BFD ephemeral source
            // range and TTL 255 (GTSM). An unknown TTL cannot be checked.
            if !SOURCE_PORT_RANGE.contains(&pkt.peer.port()) {
                self.dropped_packets += 1;
                debug!(peer = %pkt.peer, "source port outside BFD range");
                return;
            }
            if let Some(ttl) = pkt.ttl {
                if ttl != SINGLE_HOP_TTL {
                    self.dropped_packets += 1;
                    debug!(peer = %pkt.peer, ttl, "TTL check failed");
                    return;
                }
            }
        }

        let interface = pkt.ifname.as_deref().unwrap_or("");
        let vrf = pkt
            .ifname
            .as_deref()
            .and_then(|name| self.resolver.vrf_of_interface(name))
            .unwrap_or_default();

        let Some(handle) = self.registry.session_for_packet(
            &parsed,
            pkt.peer.ip(),
            pkt.local.ip(),
            interface,
            &vrf,
            is_mhop,
        ) else {
            self.dropped_packets += 1;
            debug!(
                peer = %pkt.peer,
                your_discr = format_args!("0x{:08x}", parsed.your_discr),
                "no session for packet"
            );
            return;
        };

        self.ingress_control(handle, &parsed, now_us);
    }

    /// Apply one accepted control packet to its session.
    pub(crate) fn ingress_control(
        &mut self,
        handle: SessionHandle,
        pkt: &ControlPacket,
        now_us: u64,
    ) {
        let (detect_to, track_sla, last_xmit) = {
            let Some(session) = self.registry.get_mut(handle) else {
                return;
            };
            // An administratively held session does not react to peers.
            if session.state == SessionState::AdminDown {
                return;
            }
            session.stats.rx_ctrl += 1;

            session.remote_discr = pkt.my_discr;
            session.remote.state = pkt.state;
            session.remote.diag = pkt.diag;
            session.remote.detect_mult = pkt.detect_mult;
            session.remote.desired_min_tx = pkt.desired_min_tx;
            session.remote.required_min_rx = pkt.required_min_rx;
            session.remote.required_min_echo = pkt.required_min_echo;

            // Final answers our poll: the staged values go live.
            if pkt.final_bit && session.poll == PollState::PollSent {
                session.local.desired_min_tx = session.staged.desired_min_tx;
                session.local.required_min_rx = session.staged.required_min_rx;
                session.poll = PollState::FinalReceived;
            }

            session.recompute_intervals();
            (
                session.detect_to,
                session.flags.track_sla,
                session.last_xmit_us,
            )
        };

        // The packet itself is proof of life: restart detection.
        if detect_to > 0 {
            self.timers
                .arm(handle, TimerKind::CtrlDetect, now_us + detect_to);
        }

        // A poll is answered immediately, independent of the transmit
        // timer.
        if pkt.poll {
            self.transmit_control(handle, true, now_us);
        }

        self.apply_transition(handle, pkt.state, now_us);

        if track_sla {
            self.sla_sample(handle, last_xmit, now_us);
        }
    }

    /// The receive-state transition table (RFC 5880 §6.8.6). AdminDown
    /// never appears as the local state here; those sessions ignored the
    /// packet earlier.
    fn apply_transition(&mut self, handle: SessionHandle, remote: SessionState, now_us: u64) {
        let Some(session) = self.registry.get(handle) else {
            return;
        };
        use SessionState::*;
        match (session.state, remote) {
            (Down, Down) => self.session_init(handle),
            (Down, Init) | (Down, Up) => self.session_up(handle, now_us),
            (Init, Init) | (Init, Up) => self.session_up(handle, now_us),
            (Init, Down) => {}
            (Init, AdminDown) => self.session_down(handle, Diag::NeighDown, now_us),
            (Up, AdminDown) | (Up, Down) => self.session_down(handle, Diag::NeighDown, now_us),
            (Up, Init) | (Up, Up) => {}
            (Down, AdminDown) => {}
            (AdminDown, _) => {}
        }
    }

    /// A looped-back echo packet. The payload is ours, so the embedded
    /// discriminator resolves the session directly.
    fn handle_echo_packet(&mut self, pkt: &InboundPacket, now_us: u64) {
        let parsed = match EchoPacket::parse(&pkt.data) {
            Ok(p) => p,
            Err(e) => {
                self.dropped_packets += 1;
                debug!(peer = %pkt.peer, error = %e, "echo packet dropped");
                return;
            }
        };

        let Some(handle) = self.registry.find_by_discr(parsed.discr) else {
            self.dropped_packets += 1;
            debug!(
                discr = format_args!("0x{:08x}", parsed.discr),
                "echo for unknown session"
            );
            return;
        };

        let (echo_detect_to, track_sla, last_xmit) = {
            let Some(session) = self.registry.get_mut(handle) else {
                return;
            };
            if !session.flags.echo_active {
                self.dropped_packets += 1;
                return;
            }
            session.stats.rx_echo += 1;
            (
                session.echo_detect_to,
                session.flags.track_sla,
                session.last_xmit_us,
            )
        };

        // Loopback proves the forwarding path: refresh echo detection.
        self.timers
            .arm(handle, TimerKind::EchoDetect, now_us + echo_detect_to);

        if track_sla {
            self.sla_sample(handle, last_xmit, now_us);
        }
    }

    /// Fold one latency sample into the session's SLA state and publish
    /// a report when one is due.
    fn sla_sample(&mut self, handle: SessionHandle, last_xmit_us: Option<u64>, now_us: u64) {
        let Some(tx_us) = last_xmit_us else {
            return;
        };
        let report = {
            let Some(session) = self.registry.get_mut(handle) else {
                return;
            };
            let elapsed_ms = now_us.saturating_sub(tx_us) / 1_000;
            let rx_total = session.stats.rx_total();
            let tx_total = session.stats.tx_total();
            session
                .sla
                .record(elapsed_ms, session.detect_mult, rx_total, tx_total)
        };

        if let Some(report) = report {
            if let Some(session) = self.registry.get(handle) {
                self.sink.on_sla_report(session, &report);
            }
        }
    }
}
