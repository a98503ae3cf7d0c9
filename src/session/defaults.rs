//! Protocol constants and timer defaults.
//!
//! Interval values are microseconds unless the name says otherwise.

use std::ops::RangeInclusive;

/// Default desired minimum transmit interval once a session is up (300 ms).
pub const DEFAULT_DESIRED_MIN_TX_US: u32 = 300_000;

/// Default required minimum receive interval advertised to the peer (300 ms).
pub const DEFAULT_REQUIRED_MIN_RX_US: u32 = 300_000;

/// Default required minimum echo receive interval (50 ms).
pub const DEFAULT_REQUIRED_MIN_ECHO_US: u32 = 50_000;

/// Default detection time multiplier.
pub const DEFAULT_DETECT_MULT: u8 = 3;

/// Transmit interval used until the session reaches Up (RFC 5880 §6.8.3
/// requires at least one second while not up).
pub const SLOW_TX_INTERVAL_US: u32 = 1_000_000;

/// Default TTL for multihop control packets.
pub const DEFAULT_MHOP_TTL: u8 = 5;

/// TTL set on single-hop control packets and required on receipt (GTSM).
pub const SINGLE_HOP_TTL: u8 = 255;

/// Destination UDP port for single-hop control packets (RFC 5881).
pub const PORT_SINGLE_HOP: u16 = 3784;

/// Destination UDP port for multihop control packets (RFC 5883).
pub const PORT_MULTI_HOP: u16 = 4784;

/// Destination UDP port for echo packets.
pub const PORT_ECHO: u16 = 3785;

/// Source ports a single-hop sender must use (RFC 5881 §4).
pub const SOURCE_PORT_RANGE: RangeInclusive<u16> = 49152..=65535;

/// Window over which packet loss is computed for SLA reports.
pub const PKTS_FOR_LOSS_WINDOW: u64 = 100;

/// Upper bound for session labels.
pub const MAX_LABEL_LEN: usize = 64;
