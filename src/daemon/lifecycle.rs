//! Session lifecycle: create, update, delete.
//!
//! Config arrives as [`PeerProfile`] descriptors. A profile whose key
//! (or label) matches a live session updates it in place; anything else
//! creates. Delete requires the external reference count to be zero and
//! is idempotent.

use super::{Daemon, SessionError};
use crate::config::PeerProfile;
use crate::net::socket_spec;
use crate::notify::ConfigOp;
use crate::session::defaults::{DEFAULT_MHOP_TTL, MAX_LABEL_LEN, SLOW_TX_INTERVAL_US};
use crate::session::registry::{RegistryError, SessionHandle};
use crate::session::{PollState, Session, SessionKey, SessionState};
use crate::timer::TimerKind;
use crate::wire::Diag;
use tracing::{info, warn};

impl Daemon {
    /// Create or update the session a profile addresses.
    ///
    /// A label that already names a session wins over the address key,
    /// so a rename-free label update reaches the right session even when
    /// its addresses changed meaning in config.
    pub fn apply_profile(
        &mut self,
        profile: &PeerProfile,
        now_us: u64,
    ) -> Result<SessionHandle, SessionError> {
        validate_profile(profile)?;

        if let Some(label) = &profile.label {
            if let Some(handle) = self.registry.find_by_label(label) {
                self.update_session(handle, profile, now_us)?;
                return Ok(handle);
            }
        }

        let key = profile
            .key()
            .ok_or_else(|| SessionError::InvalidProfile("inconsistent address key".into()))?;

        if let Some(handle) = self.registry.find_by_key(&key) {
            self.update_session(handle, profile, now_us)?;
            return Ok(handle);
        }

        self.create_session(profile, key, now_us)
    }

    fn create_session(
        &mut self,
        profile: &PeerProfile,
        key: SessionKey,
        now_us: u64,
    ) -> Result<SessionHandle, SessionError> {
        // Interface facts first: a failed lookup must not leak a socket.
        let mut ifindex = None;
        let mut local_mac = None;
        if !profile.multihop {
            if let Some(ifname) = profile.interface.as_deref().filter(|n| !n.is_empty()) {
                ifindex = Some(self.resolver.ifindex_of(ifname)?);
                local_mac = self.resolver.mac_of(ifname).ok();
            }
        }

        let spec = socket_spec(
            profile.local,
            profile.peer,
            profile.multihop,
            profile.mh_ttl.unwrap_or(DEFAULT_MHOP_TTL),
        );
        let socket = self.sockets.open_peer_socket(&spec)?;

        let discr = match profile.discriminator {
            Some(d) => {
                if self.registry.find_by_discr(d).is_some() {
                    self.sockets.close(socket);
                    return Err(SessionError::DiscriminatorInUse(d));
                }
                d
            }
            None => loop {
                let d = self.allocator.allocate();
                if self.registry.find_by_discr(d).is_none() {
                    break d;
                }
            },
        };

        let mut session = Session::new(discr, key, socket);
        session.ifindex = ifindex;
        session.local_mac = local_mac;
        session.mh_ttl = profile.mh_ttl.unwrap_or(DEFAULT_MHOP_TTL);
        if let Some(tx) = profile.tx_interval_us() {
            session.up_min_tx = tx;
        }
        if let Some(rx) = profile.rx_interval_us() {
            session.local.required_min_rx = rx;
        }
        if let Some(echo_iv) = profile.echo_interval_us() {
            session.local.required_min_echo = echo_iv;
        }
        if let Some(mult) = profile.detect_multiplier {
            session.detect_mult = mult;
        }
        session.flags.echo_requested = profile.echo;
        session.flags.track_sla = profile.track_sla;
        session.flags.vxlan = profile.vxlan;
        session.flags.admin_shutdown = profile.shutdown;
        if profile.shutdown {
            session.state = SessionState::AdminDown;
            session.local_diag = Diag::AdminDown;
        }
        session.detect_to = Self::slow_detect_to(session.detect_mult);

        let handle = self.registry.insert(session).map_err(|(sess, e)| {
            self.sockets.close(sess.socket);
            match e {
                RegistryError::DiscriminatorInUse(d) => SessionError::DiscriminatorInUse(d),
                RegistryError::KeyInUse => SessionError::AlreadyExists,
            }
        })?;

        if let Some(label) = &profile.label {
            if !self.registry.set_label(handle, label) {
                warn!(label, "label already in use, session left unlabeled");
            }
        }

        // First transmit happens right away; the jittered schedule takes
        // over from there. An admin-down session still announces itself
        // once, then stays silent.
        self.transmit_control(handle, false, now_us);
        if !profile.shutdown {
            let detect_to = Self::slow_detect_to(
                self.registry.get(handle).map(|s| s.detect_mult).unwrap_or(1),
            );
            self.timers.arm(handle, TimerKind::CtrlDetect, now_us + detect_to);
            self.schedule_transmit(handle, now_us);
        }

        if let Some(session) = self.registry.get(handle) {
            info!(
                discr = format_args!("0x{:08x}", session.local_discr),
                peer = %session.key,
                "session created"
            );
            self.sink.on_config_change(ConfigOp::Add, session);
        }
        Ok(handle)
    }

    fn update_session(
        &mut self,
        handle: SessionHandle,
        profile: &PeerProfile,
        now_us: u64,
    ) -> Result<(), SessionError> {
        if profile.create_only {
            return Err(SessionError::AlreadyExists);
        }

        let (was_shutdown, was_up, timers_changed, echo_changed) = {
            let session = self
                .registry
                .get_mut(handle)
                .ok_or(SessionError::NotFound)?;
            let was_shutdown = session.flags.admin_shutdown;
            let was_up = session.state == SessionState::Up;
            let mut timers_changed = false;
            let mut echo_changed = false;

            if let Some(tx) = profile.tx_interval_us() {
                if tx != session.up_min_tx {
                    session.up_min_tx = tx;
                    timers_changed = true;
                }
            }
            if let Some(rx) = profile.rx_interval_us() {
                if rx != session.local.required_min_rx {
                    session.local.required_min_rx = rx;
                    timers_changed = true;
                }
            }
            if let Some(echo_iv) = profile.echo_interval_us() {
                if echo_iv != session.local.required_min_echo {
                    session.local.required_min_echo = echo_iv;
                    echo_changed = true;
                }
            }
            if let Some(mult) = profile.detect_multiplier {
                if mult != session.detect_mult {
                    session.detect_mult = mult;
                    timers_changed = true;
                }
            }
            if session.flags.echo_requested != profile.echo {
                session.flags.echo_requested = profile.echo;
                echo_changed = true;
            }
            session.flags.track_sla = profile.track_sla;
            session.recompute_intervals();

            (was_shutdown, was_up, timers_changed, echo_changed)
        };

        if let Some(label) = &profile.label {
            if !self.registry.set_label(handle, label) {
                warn!(label, "label already in use, keeping previous label");
            }
        }

        match (was_shutdown, profile.shutdown) {
            (false, true) => self.admin_down(handle, now_us),
            (true, false) => self.admin_up(handle, now_us),
            _ if !profile.shutdown => {
                // Echo first: a changed echo interval restarts the echo
                // timers from the new negotiated value.
                let active = self
                    .registry
                    .get(handle)
                    .map(|s| s.flags.echo_active)
                    .unwrap_or(false);
                if active && echo_changed {
                    self.stop_echo(handle);
                }
                let (eligible, active) = self
                    .registry
                    .get(handle)
                    .map(|s| (s.echo_eligible(), s.flags.echo_active))
                    .unwrap_or((false, false));
                if eligible && !active {
                    self.start_echo(handle, now_us);
                } else if !eligible && active {
                    self.stop_echo(handle);
                }

                // Renegotiate timer values in flight.
                if was_up && timers_changed {
                    self.start_poll(handle, now_us);
                }
            }
            _ => {}
        }

        if let Some(session) = self.registry.get(handle) {
            self.sink.on_config_change(ConfigOp::Update, session);
        }
        Ok(())
    }

    /// Force the session into AdminDown: tell the peer once, then stop
    /// every timer.
    fn admin_down(&mut self, handle: SessionHandle, now_us: u64) {
        let echo_active = {
            let Some(session) = self.registry.get_mut(handle) else {
                return;
            };
            session.flags.admin_shutdown = true;
            if session.state == SessionState::AdminDown {
                return;
            }
            session.state = SessionState::AdminDown;
            session.local_diag = Diag::AdminDown;
            session.poll = PollState::Idle;
            session.stats.state_changes += 1;
            session.flags.echo_active
        };

        if echo_active {
            self.stop_echo(handle);
        }
        self.transmit_control(handle, false, now_us);
        self.timers.cancel_all(handle);

        if let Some(session) = self.registry.get(handle) {
            info!(
                discr = format_args!("0x{:08x}", session.local_discr),
                peer = %session.key,
                "session administratively down"
            );
            self.sink.on_state_change(session);
        }
    }

    /// Leave AdminDown: back to Down with slow-start transmit and a
    /// fresh detection window.
    fn admin_up(&mut self, handle: SessionHandle, now_us: u64) {
        let detect_to = {
            let Some(session) = self.registry.get_mut(handle) else {
                return;
            };
            session.flags.admin_shutdown = false;
            if session.state != SessionState::AdminDown {
                return;
            }
            session.state = SessionState::Down;
            session.local_diag = Diag::None;
            session.poll = PollState::Idle;
            session.local.desired_min_tx = SLOW_TX_INTERVAL_US;
            session.stats.state_changes += 1;
            session.recompute_intervals();
            if session.detect_to > 0 {
                session.detect_to
            } else {
                Self::slow_detect_to(session.detect_mult)
            }
        };

        self.timers.arm(handle, TimerKind::CtrlDetect, now_us + detect_to);
        self.transmit_control(handle, false, now_us);
        self.schedule_transmit(handle, now_us);

        if let Some(session) = self.registry.get(handle) {
            info!(
                discr = format_args!("0x{:08x}", session.local_discr),
                peer = %session.key,
                "session administratively re-enabled"
            );
            self.sink.on_state_change(session);
        }
    }

    /// Delete the session a profile addresses. Deleting a session that
    /// does not exist is not an error.
    pub fn remove_peer(&mut self, profile: &PeerProfile) -> Result<(), SessionError> {
        let by_label = profile
            .label
            .as_deref()
            .and_then(|l| self.registry.find_by_label(l));
        let handle = by_label.or_else(|| {
            profile
                .key()
                .and_then(|key| self.registry.find_by_key(&key))
        });
        let Some(handle) = handle else {
            return Ok(());
        };

        let refs = self
            .registry
            .get(handle)
            .map(|s| s.refcount)
            .unwrap_or(0);
        if refs > 0 {
            return Err(SessionError::Referenced { refs });
        }

        self.timers.cancel_all(handle);
        if let Some(session) = self.registry.get(handle) {
            self.sink.on_config_change(ConfigOp::Delete, session);
        }
        if let Some(session) = self.registry.remove(handle) {
            self.sockets.close(session.socket);
            info!(
                discr = format_args!("0x{:08x}", session.local_discr),
                peer = %session.key,
                "session deleted"
            );
        }
        Ok(())
    }
}

fn validate_profile(profile: &PeerProfile) -> Result<(), SessionError> {
    if profile.peer.is_unspecified() {
        return Err(SessionError::InvalidProfile(
            "peer address is unspecified".into(),
        ));
    }
    if profile.detect_multiplier == Some(0) {
        return Err(SessionError::InvalidProfile(
            "detect multiplier must be at least 1".into(),
        ));
    }
    if profile.tx_interval_ms == Some(0) || profile.rx_interval_ms == Some(0) {
        return Err(SessionError::InvalidProfile(
            "control intervals must be positive".into(),
        ));
    }
    if profile.discriminator == Some(0) {
        return Err(SessionError::InvalidProfile(
            "discriminator must be nonzero".into(),
        ));
    }
    if let Some(label) = &profile.label {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(SessionError::InvalidProfile(format!(
                "label must be 1..={MAX_LABEL_LEN} bytes"
            )));
        }
    }
    if profile.multihop && profile.local.is_none() {
        return Err(SessionError::InvalidProfile(
            "multihop sessions need a local address".into(),
        ));
    }
    Ok(())
}
