//! Echo function activation, liveness, and teardown.

use super::*;
use crate::session::defaults::PORT_ECHO;
use std::net::SocketAddr;

fn echo_profile() -> crate::config::PeerProfile {
    let mut profile = make_profile();
    profile.echo = true;
    profile.echo_interval_ms = Some(50);
    profile
}

/// Peer that advertises willingness to loop echo packets.
fn echo_peer_packet(state: SessionState, your_discr: u32) -> crate::wire::ControlPacket {
    let mut pkt = peer_packet(state, your_discr);
    pkt.required_min_echo = 50_000;
    pkt
}

fn bring_up_with_echo(tb: &mut TestBed, handle: SessionHandle) -> u32 {
    let discr = tb.session(handle).local_discr;
    tb.daemon
        .handle_packet(inbound(&echo_peer_packet(SessionState::Down, discr)), 1_200_000);
    let mut fin = echo_peer_packet(SessionState::Init, discr);
    fin.final_bit = true;
    tb.daemon.handle_packet(inbound(&fin), 1_500_000);
    assert_eq!(tb.session(handle).state, SessionState::Up);
    discr
}

fn loopback(tb: &TestBed) -> InboundPacket {
    let echo = tb.sent_echo().last().expect("echo sent").encode().to_vec();
    InboundPacket {
        data: echo,
        peer: SocketAddr::new(PEER_ADDR.parse().unwrap(), PORT_ECHO),
        local: SocketAddr::new("198.51.100.1".parse().unwrap(), PORT_ECHO),
        ifname: None,
        ttl: None,
        dst_port: PORT_ECHO,
    }
}

#[test]
fn test_echo_starts_on_up() {
    let mut tb = make_testbed();
    let handle = tb.daemon.apply_profile(&echo_profile(), 0).unwrap();
    bring_up_with_echo(&mut tb, handle);

    let session = tb.session(handle);
    assert!(session.flags.echo_active);
    assert_eq!(session.echo_xmt_to, 50_000);
    assert_eq!(session.echo_detect_to, 3 * 50_000);

    // First echo went out immediately, carrying our discriminator.
    let echoes = tb.sent_echo();
    assert_eq!(echoes.len(), 1);
    assert_eq!(echoes[0].discr, session.local_discr);
    assert_eq!(echoes[0].seq, 0);

    assert!(tb.daemon.timers.is_armed(handle, TimerKind::EchoXmit));
    assert!(tb.daemon.timers.is_armed(handle, TimerKind::EchoDetect));
}

#[test]
fn test_echo_not_started_when_peer_declines() {
    let mut tb = make_testbed();
    let handle = tb.daemon.apply_profile(&echo_profile(), 0).unwrap();
    // Plain bring-up: peer advertises required_min_echo = 0.
    bring_up(&mut tb, handle);

    assert!(!tb.session(handle).flags.echo_active);
    assert!(tb.sent_echo().is_empty());
}

#[test]
fn test_echo_sequence_increments() {
    let mut tb = make_testbed();
    let handle = tb.daemon.apply_profile(&echo_profile(), 0).unwrap();
    bring_up_with_echo(&mut tb, handle);

    tb.daemon.echo_transmit(handle, 1_600_000);
    tb.daemon.echo_transmit(handle, 1_650_000);
    let seqs: Vec<u64> = tb.sent_echo().iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2]);
}

#[test]
fn test_loopback_refreshes_echo_detect() {
    let mut tb = make_testbed();
    let handle = tb.daemon.apply_profile(&echo_profile(), 0).unwrap();
    bring_up_with_echo(&mut tb, handle);

    tb.daemon.handle_packet(loopback(&tb), 1_540_000);
    assert_eq!(tb.session(handle).stats.rx_echo, 1);
    assert_eq!(
        tb.daemon.timers.deadline(handle, TimerKind::EchoDetect),
        Some(1_540_000 + 150_000)
    );
}

#[test]
fn test_echo_detect_timeout_takes_session_down() {
    let mut tb = make_testbed();
    let handle = tb.daemon.apply_profile(&echo_profile(), 0).unwrap();
    bring_up_with_echo(&mut tb, handle);

    tb.daemon.handle_timer(
        TimerToken {
            session: handle,
            kind: TimerKind::EchoDetect,
        },
        1_650_000,
    );
    let session = tb.session(handle);
    assert_eq!(session.state, SessionState::Down);
    assert_eq!(session.local_diag, Diag::DetectTime);
    assert!(!session.flags.echo_active, "echo stopped on down");
    assert!(!tb.daemon.timers.is_armed(handle, TimerKind::EchoXmit));
}

#[test]
fn test_echo_stops_when_session_leaves_up() {
    let mut tb = make_testbed();
    let handle = tb.daemon.apply_profile(&echo_profile(), 0).unwrap();
    let discr = bring_up_with_echo(&mut tb, handle);

    tb.daemon.handle_packet(
        inbound(&echo_peer_packet(SessionState::AdminDown, discr)),
        2_000_000,
    );
    let session = tb.session(handle);
    assert_eq!(session.state, SessionState::Down);
    assert!(!session.flags.echo_active);
    assert_eq!(session.echo_xmt_to, 0);
    assert!(!tb.daemon.timers.is_armed(handle, TimerKind::EchoDetect));
}

#[test]
fn test_echo_toggle_roundtrip_restores_timers() {
    let mut tb = make_testbed();
    let profile = echo_profile();
    let handle = tb.daemon.apply_profile(&profile, 0).unwrap();
    bring_up_with_echo(&mut tb, handle);

    let xmt_before = tb.session(handle).xmt_to;
    let detect_before = tb.session(handle).detect_to;

    // Echo off.
    let mut off = profile.clone();
    off.echo = false;
    tb.daemon.apply_profile(&off, 2_000_000).unwrap();
    {
        let session = tb.session(handle);
        assert!(!session.flags.echo_active);
        assert_eq!(session.echo_xmt_to, 0);
    }

    // Echo back on.
    tb.daemon.apply_profile(&profile, 2_100_000).unwrap();
    let session = tb.session(handle);
    assert!(session.flags.echo_active);
    assert_eq!(session.echo_xmt_to, 50_000);
    assert_eq!(session.xmt_to, xmt_before);
    assert_eq!(session.detect_to, detect_before);
}

#[test]
fn test_loopback_for_inactive_echo_dropped() {
    let mut tb = make_testbed();
    let handle = tb.daemon.apply_profile(&echo_profile(), 0).unwrap();
    bring_up_with_echo(&mut tb, handle);
    let packet = loopback(&tb);

    // Stop echo, then the stale loopback arrives.
    let mut off = echo_profile();
    off.echo = false;
    tb.daemon.apply_profile(&off, 2_000_000).unwrap();

    let dropped_before = tb.daemon.dropped_packets();
    tb.daemon.handle_packet(packet, 2_100_000);
    assert_eq!(tb.daemon.dropped_packets(), dropped_before + 1);
    assert_eq!(tb.session(handle).stats.rx_echo, 0);
}
