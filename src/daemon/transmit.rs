//! Transmit scheduling, state transitions, poll sequences, and the echo
//! function.

use super::Daemon;
use crate::session::defaults::SLOW_TX_INTERVAL_US;
use crate::session::registry::SessionHandle;
use crate::session::{PollState, SessionState, StagedTimers};
use crate::timer::{jittered_interval, TimerKind};
use crate::wire::{Diag, EchoPacket};
use tracing::{debug, info, warn};

impl Daemon {
    /// Build and send one control packet with the session's current
    /// values. Records the transmit timestamp for SLA sampling. Does not
    /// touch the transmit timer.
    pub(crate) fn transmit_control(&mut self, handle: SessionHandle, final_bit: bool, now_us: u64) {
        let Some(session) = self.registry.get_mut(handle) else {
            return;
        };
        let pkt = session.control_packet(final_bit);
        let dst = session.control_dst();
        let socket = session.socket;
        let discr = session.local_discr;
        session.stats.tx_ctrl += 1;
        session.last_xmit_us = Some(now_us);

        if let Err(e) = self.sockets.send(socket, dst, &pkt.encode()) {
            warn!(
                discr = format_args!("0x{discr:08x}"),
                error = %e,
                "control transmit failed"
            );
        }
    }

    /// Arm the transmit timer for the next scheduled control packet,
    /// jittered per RFC 5880 §6.8.7.
    pub(crate) fn schedule_transmit(&mut self, handle: SessionHandle, now_us: u64) {
        let Some(session) = self.registry.get(handle) else {
            return;
        };
        let nominal = session.xmt_to;
        let detect_mult = session.detect_mult;
        let interval = jittered_interval(nominal, detect_mult, &mut self.rng);
        self.timers.arm(handle, TimerKind::CtrlXmit, now_us + interval);
    }

    /// Transmit-timer handler: send the periodic packet and re-arm.
    pub(crate) fn transmit_scheduled(&mut self, handle: SessionHandle, now_us: u64) {
        if let Some(session) = self.registry.get_mut(handle) {
            // A completed poll sequence stays observable until the next
            // scheduled transmit.
            if session.poll == PollState::FinalReceived {
                session.poll = PollState::Idle;
            }
        }
        self.transmit_control(handle, false, now_us);
        self.schedule_transmit(handle, now_us);
    }

    /// Open a poll sequence: stage the operational timer values and send
    /// a packet carrying the Poll bit. The staged values go live when
    /// the peer answers with Final.
    pub(crate) fn start_poll(&mut self, handle: SessionHandle, now_us: u64) {
        let Some(session) = self.registry.get_mut(handle) else {
            return;
        };
        session.poll = PollState::PollSent;
        session.staged = StagedTimers {
            desired_min_tx: session.up_min_tx,
            required_min_rx: session.local.required_min_rx,
        };
        self.transmit_control(handle, false, now_us);
    }

    /// Transition to Up: clear the diagnostic, negotiate the operational
    /// timers with a poll sequence, and start echo if both sides allow
    /// it.
    pub(crate) fn session_up(&mut self, handle: SessionHandle, now_us: u64) {
        {
            let Some(session) = self.registry.get_mut(handle) else {
                return;
            };
            if session.state == SessionState::Up {
                return;
            }
            session.state = SessionState::Up;
            session.local_diag = Diag::None;
            session.uptime_us = now_us;
            session.stats.state_changes += 1;
            session.stats.up_events += 1;
            session.recompute_intervals();
        }

        self.start_poll(handle, now_us);

        let echo = self
            .registry
            .get(handle)
            .map(|s| s.echo_eligible())
            .unwrap_or(false);
        if echo {
            self.start_echo(handle, now_us);
        }

        if let Some(session) = self.registry.get(handle) {
            info!(
                discr = format_args!("0x{:08x}", session.local_discr),
                peer = %session.key,
                "session up"
            );
            self.sink.on_state_change(session);
        }
    }

    /// Transition to Down. Clears the remote discriminator, falls back
    /// to the slow transmit rate, stops echo, and tells the peer right
    /// away instead of waiting for the transmit timer.
    pub(crate) fn session_down(&mut self, handle: SessionHandle, diag: Diag, now_us: u64) {
        let (old_state, echo_active) = {
            let Some(session) = self.registry.get_mut(handle) else {
                return;
            };
            let old_state = session.state;
            session.local_diag = diag;
            session.remote_discr = 0;
            session.state = SessionState::Down;
            session.poll = PollState::Idle;
            session.downtime_us = now_us;
            session.stats.state_changes += 1;
            session.local.desired_min_tx = SLOW_TX_INTERVAL_US;
            session.recompute_intervals();
            (old_state, session.flags.echo_active)
        };

        if echo_active {
            self.stop_echo(handle);
        }

        self.transmit_control(handle, false, now_us);

        // Keep one detection window armed so a second expiration can
        // forget leftover remote state (RFC 5880 §6.5.1).
        if let Some(session) = self.registry.get(handle) {
            let detect_to = if session.detect_to > 0 {
                session.detect_to
            } else {
                Self::slow_detect_to(session.detect_mult)
            };
            self.timers.arm(handle, TimerKind::CtrlDetect, now_us + detect_to);

            info!(
                discr = format_args!("0x{:08x}", session.local_discr),
                peer = %session.key,
                reason = %diag,
                previous = %old_state,
                "session down"
            );
            if old_state != SessionState::Down {
                self.sink.on_state_change(session);
            }
        }
    }

    /// Transition Down → Init: the peer has been heard but has not yet
    /// seen us.
    pub(crate) fn session_init(&mut self, handle: SessionHandle) {
        let Some(session) = self.registry.get_mut(handle) else {
            return;
        };
        session.state = SessionState::Init;
        session.stats.state_changes += 1;
        let session = self.registry.get(handle).expect("just updated");
        debug!(
            discr = format_args!("0x{:08x}", session.local_discr),
            peer = %session.key,
            "session init"
        );
        self.sink.on_state_change(session);
    }

    // ------------------------------------------------------------------
    // Echo function
    // ------------------------------------------------------------------

    /// Start the echo function: derive the echo intervals, send the
    /// first echo packet, and arm the echo detection timer.
    pub(crate) fn start_echo(&mut self, handle: SessionHandle, now_us: u64) {
        let echo_detect_to = {
            let Some(session) = self.registry.get_mut(handle) else {
                return;
            };
            if session.flags.echo_active {
                return;
            }
            session.flags.echo_active = true;
            session.echo_xmt_to = session.negotiated_echo_interval();
            session.echo_detect_to = session.detect_mult as u64 * session.echo_xmt_to;
            debug!(
                discr = format_args!("0x{:08x}", session.local_discr),
                interval_us = session.echo_xmt_to,
                "echo started"
            );
            session.echo_detect_to
        };

        self.echo_transmit(handle, now_us);
        self.timers
            .arm(handle, TimerKind::EchoDetect, now_us + echo_detect_to);
    }

    /// Stop the echo function and cancel its timers. Safe to call when
    /// echo is not running.
    pub(crate) fn stop_echo(&mut self, handle: SessionHandle) {
        if let Some(session) = self.registry.get_mut(handle) {
            session.flags.echo_active = false;
            session.echo_xmt_to = 0;
            session.echo_detect_to = 0;
        }
        self.timers.cancel(handle, TimerKind::EchoXmit);
        self.timers.cancel(handle, TimerKind::EchoDetect);
    }

    /// Echo-transmit-timer handler: send the next echo packet and
    /// re-arm with jitter.
    pub(crate) fn echo_transmit(&mut self, handle: SessionHandle, now_us: u64) {
        let Some(session) = self.registry.get_mut(handle) else {
            return;
        };
        if !session.flags.echo_active {
            return;
        }
        let pkt = EchoPacket {
            discr: session.local_discr,
            seq: session.echo_seq,
        };
        session.echo_seq = session.echo_seq.wrapping_add(1);
        session.stats.tx_echo += 1;
        session.last_xmit_us = Some(now_us);
        let dst = session.echo_dst();
        let socket = session.socket;
        let discr = session.local_discr;
        let nominal = session.echo_xmt_to;
        let detect_mult = session.detect_mult;

        if let Err(e) = self.sockets.send(socket, dst, &pkt.encode()) {
            warn!(
                discr = format_args!("0x{discr:08x}"),
                error = %e,
                "echo transmit failed"
            );
        }

        let interval = jittered_interval(nominal, detect_mult, &mut self.rng);
        self.timers.arm(handle, TimerKind::EchoXmit, now_us + interval);
    }
}
