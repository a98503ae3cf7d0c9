//! Detection timeouts and remotely signalled failures.

use super::*;

#[test]
fn test_detect_timeout_takes_session_down() {
    let mut tb = make_testbed();
    let handle = tb.daemon.apply_profile(&make_profile(), 0).unwrap();
    bring_up(&mut tb, handle);

    // Last packet arrived at t=1.8s; the window is 3 × 300 ms.
    let deadline = tb
        .daemon
        .timers
        .deadline(handle, TimerKind::CtrlDetect)
        .expect("detect armed");
    assert_eq!(deadline, 2_700_000);

    tb.fire_detect(handle, deadline);
    let session = tb.session(handle);
    assert_eq!(session.state, SessionState::Down);
    assert_eq!(session.local_diag, Diag::DetectTime);
    assert_eq!(session.remote_discr, 0, "remote discriminator forgotten");

    // The failure was announced immediately, not on the next tick.
    let pkt = tb.last_ctrl();
    assert_eq!(pkt.state, SessionState::Down);
    assert_eq!(pkt.diag, Diag::DetectTime);

    assert_eq!(
        tb.state_events().last(),
        Some(&(SessionState::Down, Diag::DetectTime))
    );
}

#[test]
fn test_down_session_transmits_slow_again() {
    let mut tb = make_testbed();
    let handle = tb.daemon.apply_profile(&make_profile(), 0).unwrap();
    bring_up(&mut tb, handle);

    tb.fire_detect(handle, 2_700_000);
    let session = tb.session(handle);
    assert_eq!(session.local.desired_min_tx, 1_000_000);
    assert_eq!(session.xmt_to, 1_000_000);
}

#[test]
fn test_second_expiration_clears_remote_discr() {
    let mut tb = make_testbed();
    let handle = tb.daemon.apply_profile(&make_profile(), 0).unwrap();
    let discr = bring_up(&mut tb, handle);

    tb.fire_detect(handle, 2_700_000);
    assert_eq!(tb.session(handle).state, SessionState::Down);

    // The peer is heard once while Down (remote discriminator relearned),
    // then goes quiet again.
    tb.daemon
        .handle_packet(inbound(&peer_packet(SessionState::Down, discr)), 3_000_000);
    // Heard in Down: we move to Init with the peer relearned.
    assert_eq!(tb.session(handle).remote_discr, PEER_DISCR);

    // Silence again: first expiry drops to Down, second forgets the peer.
    tb.fire_detect(handle, 4_000_000);
    assert_eq!(tb.session(handle).state, SessionState::Down);
    tb.fire_detect(handle, 5_000_000);
    assert_eq!(tb.session(handle).remote_discr, 0);
    assert_eq!(tb.session(handle).state, SessionState::Down);
}

#[test]
fn test_peer_admin_down_is_neighbor_down() {
    let mut tb = make_testbed();
    let handle = tb.daemon.apply_profile(&make_profile(), 0).unwrap();
    let discr = bring_up(&mut tb, handle);

    tb.daemon.handle_packet(
        inbound(&peer_packet(SessionState::AdminDown, discr)),
        2_000_000,
    );
    let session = tb.session(handle);
    assert_eq!(session.state, SessionState::Down);
    assert_eq!(session.local_diag, Diag::NeighDown);
    assert_eq!(
        tb.state_events().last(),
        Some(&(SessionState::Down, Diag::NeighDown))
    );
}

#[test]
fn test_peer_down_from_up_is_neighbor_down() {
    let mut tb = make_testbed();
    let handle = tb.daemon.apply_profile(&make_profile(), 0).unwrap();
    let discr = bring_up(&mut tb, handle);

    tb.daemon
        .handle_packet(inbound(&peer_packet(SessionState::Down, discr)), 2_000_000);
    let session = tb.session(handle);
    assert_eq!(session.state, SessionState::Down);
    assert_eq!(session.local_diag, Diag::NeighDown);
}

#[test]
fn test_init_peer_admin_down_goes_down() {
    let mut tb = make_testbed();
    let handle = tb.daemon.apply_profile(&make_profile(), 0).unwrap();
    let discr = tb.session(handle).local_discr;

    tb.daemon
        .handle_packet(inbound(&peer_packet(SessionState::Down, discr)), 1_000_000);
    assert_eq!(tb.session(handle).state, SessionState::Init);

    tb.daemon.handle_packet(
        inbound(&peer_packet(SessionState::AdminDown, discr)),
        1_100_000,
    );
    let session = tb.session(handle);
    assert_eq!(session.state, SessionState::Down);
    assert_eq!(session.local_diag, Diag::NeighDown);
}

#[test]
fn test_detect_while_admin_down_is_ignored() {
    let mut tb = make_testbed();
    let mut profile = make_profile();
    profile.shutdown = true;
    let handle = tb.daemon.apply_profile(&profile, 0).unwrap();

    tb.fire_detect(handle, 5_000_000);
    assert_eq!(tb.session(handle).state, SessionState::AdminDown);
}

#[test]
fn test_timer_racing_delete_is_dropped() {
    let mut tb = make_testbed();
    let profile = make_profile();
    let handle = tb.daemon.apply_profile(&profile, 0).unwrap();
    bring_up(&mut tb, handle);

    tb.daemon.remove_peer(&profile).unwrap();

    // A token that was already dequeued when the delete happened must
    // not touch anything.
    let sent_before = tb.sent.borrow().len();
    tb.fire_detect(handle, 2_700_000);
    tb.fire_xmit(handle, 2_700_000);
    assert_eq!(tb.sent.borrow().len(), sent_before);
}
