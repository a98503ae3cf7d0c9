//! SLA telemetry driven through the packet path.

use super::*;

/// Bring a session up, then enable SLA tracking so the handshake
/// packets do not skew the sample groups.
fn sla_session(tb: &mut TestBed) -> (SessionHandle, u32) {
    let profile = make_profile();
    let handle = tb.daemon.apply_profile(&profile, 0).unwrap();
    let discr = bring_up(tb, handle);

    // The handshake receives one packet more than it sends; even the
    // counters out so loss deltas start from zero.
    tb.fire_xmit(handle, 1_850_000);
    assert_eq!(
        tb.session(handle).stats.tx_total(),
        tb.session(handle).stats.rx_total()
    );

    let mut tracked = profile;
    tracked.track_sla = true;
    tb.daemon.apply_profile(&tracked, 1_900_000).unwrap();
    (handle, discr)
}

/// One transmit/receive exchange with a chosen one-way delay.
fn exchange(tb: &mut TestBed, handle: SessionHandle, discr: u32, at_us: u64, delay_ms: u64) {
    tb.fire_xmit(handle, at_us);
    tb.daemon.handle_packet(
        inbound(&peer_packet(SessionState::Up, discr)),
        at_us + delay_ms * 1_000,
    );
}

#[test]
fn test_latency_and_jitter_rollup() {
    let mut tb = make_testbed();
    let (handle, discr) = sla_session(&mut tb);
    assert_eq!(tb.session(handle).stats.rx_ctrl, 3, "handshake packets");

    // Three samples: 10, 20, 30 ms round the group out at rx_total = 6.
    exchange(&mut tb, handle, discr, 2_000_000, 10);
    exchange(&mut tb, handle, discr, 2_300_000, 20);
    assert!(tb.sla_events().is_empty());
    exchange(&mut tb, handle, discr, 2_600_000, 30);

    let reports = tb.sla_events();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].latency_ms, 20);
    assert_eq!(reports[0].jitter_ms, Some(10));
    assert_eq!(reports[0].loss_pct, None);
}

#[test]
fn test_no_reports_without_tracking() {
    let mut tb = make_testbed();
    let profile = make_profile();
    let handle = tb.daemon.apply_profile(&profile, 0).unwrap();
    let discr = bring_up(&mut tb, handle);

    for i in 0..6u64 {
        exchange(&mut tb, handle, discr, 2_000_000 + i * 300_000, 10);
    }
    assert!(tb.sla_events().is_empty());
}

#[test]
fn test_loss_report_counts_unanswered_transmits() {
    let mut tb = make_testbed();
    let (handle, discr) = sla_session(&mut tb);

    // Two transmits that never come back.
    tb.fire_xmit(handle, 1_950_000);
    tb.fire_xmit(handle, 1_960_000);

    // Then a steady exchange until the loss window closes. The window
    // closes on the first report at or past 100 received packets.
    let mut t = 2_000_000u64;
    let mut loss = None;
    for _ in 0..102 {
        exchange(&mut tb, handle, discr, t, 10);
        t += 100_000;
        if let Some(report) = tb.sla_events().iter().rev().find(|r| r.loss_pct.is_some()) {
            loss = report.loss_pct;
            break;
        }
    }
    assert_eq!(loss, Some(2.0));
}

#[test]
fn test_echo_packets_feed_sla() {
    let mut tb = make_testbed();
    let mut profile = make_profile();
    profile.echo = true;
    profile.echo_interval_ms = Some(50);
    profile.track_sla = true;
    let handle = tb.daemon.apply_profile(&profile, 0).unwrap();
    let discr = tb.session(handle).local_discr;

    // Peer that loops echo.
    let mut up = peer_packet(SessionState::Down, discr);
    up.required_min_echo = 50_000;
    tb.daemon.handle_packet(inbound(&up), 1_000_000);
    let mut init = peer_packet(SessionState::Init, discr);
    init.required_min_echo = 50_000;
    tb.daemon.handle_packet(inbound(&init), 1_200_000);
    assert!(tb.session(handle).flags.echo_active);

    let rx_before = tb.session(handle).stats.rx_echo;
    let echo = tb.sent_echo().last().unwrap().encode().to_vec();
    let lb = InboundPacket {
        data: echo,
        peer: std::net::SocketAddr::new(PEER_ADDR.parse().unwrap(), PORT_ECHO),
        local: std::net::SocketAddr::new("198.51.100.1".parse().unwrap(), PORT_ECHO),
        ifname: None,
        ttl: None,
        dst_port: PORT_ECHO,
    };
    tb.daemon.handle_packet(lb, 1_210_000);
    assert_eq!(tb.session(handle).stats.rx_echo, rx_before + 1);
    // rx_total hit a multiple of the detect multiplier: a report fired
    // from the echo path.
    assert_eq!(tb.sla_events().len(), 1);
}
