//! Per-peer session profiles.
//!
//! A [`PeerProfile`] is the descriptor the configuration file and the
//! control surface both hand to the daemon core. Intervals are given in
//! milliseconds at this layer and converted to the protocol's
//! microseconds when applied.

use crate::session::{MultiHopKey, SessionKey, SingleHopKey};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Everything an operator can say about one BFD peer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerProfile {
    /// Peer address. Required.
    pub peer: IpAddr,

    /// Local address to bind and, for multihop, half of the session key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<IpAddr>,

    /// Local interface name (single-hop only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,

    /// VRF name (multihop only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vrf: Option<String>,

    /// Peer is more than one IP hop away.
    #[serde(default)]
    pub multihop: bool,

    /// Desired minimum transmit interval once up, milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_interval_ms: Option<u32>,

    /// Required minimum receive interval, milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rx_interval_ms: Option<u32>,

    /// Required minimum echo receive interval, milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo_interval_ms: Option<u32>,

    /// Detection time multiplier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detect_multiplier: Option<u8>,

    /// Run the echo function once the session is up.
    #[serde(default)]
    pub echo: bool,

    /// Hold the session in AdminDown.
    #[serde(default)]
    pub shutdown: bool,

    /// Compute latency / jitter / loss telemetry.
    #[serde(default)]
    pub track_sla: bool,

    /// Session rides a VXLAN tunnel (accepted, encapsulation not
    /// implemented).
    #[serde(default)]
    pub vxlan: bool,

    /// Pin the local discriminator instead of allocating one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<u32>,

    /// Operator-facing session name, unique across sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Fail instead of updating when the session already exists.
    #[serde(default)]
    pub create_only: bool,

    /// TTL for multihop transmit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mh_ttl: Option<u8>,
}

impl PeerProfile {
    /// Minimal profile for one peer address.
    pub fn new(peer: IpAddr) -> Self {
        Self {
            peer,
            local: None,
            interface: None,
            vrf: None,
            multihop: false,
            tx_interval_ms: None,
            rx_interval_ms: None,
            echo_interval_ms: None,
            detect_multiplier: None,
            echo: false,
            shutdown: false,
            track_sla: false,
            vxlan: false,
            discriminator: None,
            label: None,
            create_only: false,
            mh_ttl: None,
        }
    }

    /// Derive the session key this profile addresses. `None` when the
    /// profile is not internally consistent (multihop without a local
    /// address, or mixed address families).
    pub fn key(&self) -> Option<SessionKey> {
        if self.multihop {
            let local = self.local?;
            if local.is_ipv4() != self.peer.is_ipv4() {
                return None;
            }
            Some(SessionKey::MultiHop(MultiHopKey {
                peer: self.peer,
                local,
                vrf: self.vrf.clone().unwrap_or_default(),
            }))
        } else {
            if let Some(local) = self.local {
                if local.is_ipv4() != self.peer.is_ipv4() {
                    return None;
                }
            }
            Some(SessionKey::SingleHop(SingleHopKey {
                peer: self.peer,
                interface: self.interface.clone().unwrap_or_default(),
            }))
        }
    }

    pub fn tx_interval_us(&self) -> Option<u32> {
        self.tx_interval_ms.map(|ms| ms.saturating_mul(1000))
    }

    pub fn rx_interval_us(&self) -> Option<u32> {
        self.rx_interval_ms.map(|ms| ms.saturating_mul(1000))
    }

    pub fn echo_interval_us(&self) -> Option<u32> {
        self.echo_interval_ms.map(|ms| ms.saturating_mul(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_hop_key() {
        let mut p = PeerProfile::new("192.0.2.1".parse().unwrap());
        p.interface = Some("eth0".into());
        match p.key().unwrap() {
            SessionKey::SingleHop(k) => {
                assert_eq!(k.interface, "eth0");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_multihop_key_requires_local() {
        let mut p = PeerProfile::new("192.0.2.1".parse().unwrap());
        p.multihop = true;
        assert!(p.key().is_none());

        p.local = Some("198.51.100.1".parse().unwrap());
        p.vrf = Some("red".into());
        match p.key().unwrap() {
            SessionKey::MultiHop(k) => assert_eq!(k.vrf, "red"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_mixed_families_rejected() {
        let mut p = PeerProfile::new("192.0.2.1".parse().unwrap());
        p.multihop = true;
        p.local = Some("2001:db8::1".parse().unwrap());
        assert!(p.key().is_none());
    }

    #[test]
    fn test_interval_conversion() {
        let mut p = PeerProfile::new("192.0.2.1".parse().unwrap());
        p.tx_interval_ms = Some(300);
        assert_eq!(p.tx_interval_us(), Some(300_000));
        assert_eq!(p.rx_interval_us(), None);
    }
}
