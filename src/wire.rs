//! Wire Format Parsing and Serialization
//!
//! Defines the BFD control packet format (RFC 5880 §4.1) and the echo
//! packet format owned by this daemon. All multi-byte fields are network
//! byte order.
//!
//! ## Control packet (24 bytes, no authentication section)
//!
//! ```text
//! [vers(3)+diag(5):1][state(2)+P+F+C+A+D+M:1][detect_mult:1][length:1]
//! [my_discriminator:4][your_discriminator:4]
//! [desired_min_tx:4][required_min_rx:4][required_min_echo_rx:4]
//! ```
//!
//! ## Echo packet (16 bytes)
//!
//! The peer loops echo packets back without interpreting the payload, so
//! the layout is ours alone:
//!
//! ```text
//! [version:1][reserved:3][discriminator:4][sequence:8]
//! ```

use crate::session::SessionState;
use thiserror::Error;

// ============================================================================
// Constants
// ============================================================================

/// BFD protocol version (RFC 5880).
pub const BFD_VERSION: u8 = 1;

/// Size of a control packet without an authentication section.
pub const CONTROL_PACKET_LEN: usize = 24;

/// Size of an echo packet.
pub const ECHO_PACKET_LEN: usize = 16;

/// Echo payload version.
pub const ECHO_VERSION: u8 = 1;

// ============================================================================
// Diagnostic codes
// ============================================================================

/// Diagnostic code carried in the high header byte (RFC 5880 §4.1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Diag {
    /// No diagnostic.
    #[default]
    None,
    /// Control detection time expired.
    DetectTime,
    /// Echo function failed.
    EchoFailed,
    /// Neighbor signaled session down.
    NeighDown,
    /// Forwarding plane reset.
    FwdPlaneReset,
    /// Path down.
    PathDown,
    /// Concatenated path down.
    ConcatPathDown,
    /// Administratively down.
    AdminDown,
    /// Reverse concatenated path down.
    RevConcatPathDown,
}

impl Diag {
    pub fn to_wire(self) -> u8 {
        match self {
            Diag::None => 0,
            Diag::DetectTime => 1,
            Diag::EchoFailed => 2,
            Diag::NeighDown => 3,
            Diag::FwdPlaneReset => 4,
            Diag::PathDown => 5,
            Diag::ConcatPathDown => 6,
            Diag::AdminDown => 7,
            Diag::RevConcatPathDown => 8,
        }
    }

    /// Decode a 5-bit diagnostic field. Reserved values map to `None`.
    pub fn from_wire(val: u8) -> Self {
        match val & 0x1f {
            1 => Diag::DetectTime,
            2 => Diag::EchoFailed,
            3 => Diag::NeighDown,
            4 => Diag::FwdPlaneReset,
            5 => Diag::PathDown,
            6 => Diag::ConcatPathDown,
            7 => Diag::AdminDown,
            8 => Diag::RevConcatPathDown,
            _ => Diag::None,
        }
    }
}

impl std::fmt::Display for Diag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Diag::None => "none",
            Diag::DetectTime => "detect-time-expired",
            Diag::EchoFailed => "echo-failed",
            Diag::NeighDown => "neighbor-down",
            Diag::FwdPlaneReset => "fwd-plane-reset",
            Diag::PathDown => "path-down",
            Diag::ConcatPathDown => "concat-path-down",
            Diag::AdminDown => "admin-down",
            Diag::RevConcatPathDown => "rev-concat-path-down",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Decode errors
// ============================================================================

/// Reasons a received control or echo packet is discarded before it can
/// touch any session state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet truncated: {0} bytes")]
    Truncated(usize),

    #[error("unsupported version {0}")]
    Version(u8),

    #[error("length field {length} inconsistent with {received} received bytes")]
    Length { length: u8, received: usize },

    #[error("detect multiplier is zero")]
    ZeroDetectMult,

    #[error("multipoint bit set")]
    Multipoint,

    #[error("my-discriminator is zero")]
    ZeroMyDiscriminator,

    #[error("your-discriminator zero outside Down/AdminDown")]
    ZeroYourDiscriminator,

    #[error("authentication not supported")]
    AuthUnsupported,
}

// ============================================================================
// Control packet
// ============================================================================

/// A decoded BFD control packet, or one about to be put on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlPacket {
    /// Diagnostic for the last local state change.
    pub diag: Diag,
    /// Sender's session state.
    pub state: SessionState,
    /// Poll bit: sender requests parameter verification.
    pub poll: bool,
    /// Final bit: sender is answering a poll.
    pub final_bit: bool,
    /// Control plane independent bit. Always cleared on transmit.
    pub cpi: bool,
    /// Authentication present bit. Packets with this set are discarded.
    pub auth_present: bool,
    /// Demand mode bit. Always cleared on transmit, ignored on receipt.
    pub demand: bool,
    /// Sender's detection time multiplier.
    pub detect_mult: u8,
    /// Sender's discriminator for this session.
    pub my_discr: u32,
    /// Discriminator the sender learned from us, 0 until learned.
    pub your_discr: u32,
    /// Minimum interval the sender would like to use when transmitting (µs).
    pub desired_min_tx: u32,
    /// Minimum interval between packets the sender can receive (µs).
    pub required_min_rx: u32,
    /// Minimum interval between echo packets the sender can receive (µs).
    pub required_min_echo: u32,
}

impl ControlPacket {
    /// Decode and validate a control packet.
    ///
    /// Performs every check that does not require session or transport
    /// context: version, length consistency, zero detect multiplier,
    /// multipoint bit, zero my-discriminator, the your-discriminator /
    /// state coupling from RFC 5880 §6.8.6, and the authentication bit
    /// (this daemon only speaks unauthenticated BFD). Port and TTL rules
    /// are enforced by the ingress path, which knows how the packet
    /// arrived.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < CONTROL_PACKET_LEN {
            return Err(DecodeError::Truncated(data.len()));
        }

        let version = data[0] >> 5;
        if version != BFD_VERSION {
            return Err(DecodeError::Version(version));
        }

        let diag = Diag::from_wire(data[0] & 0x1f);
        let state = SessionState::from_wire(data[1] >> 6);
        let poll = data[1] & 0x20 != 0;
        let final_bit = data[1] & 0x10 != 0;
        let cpi = data[1] & 0x08 != 0;
        let auth_present = data[1] & 0x04 != 0;
        let demand = data[1] & 0x02 != 0;
        let multipoint = data[1] & 0x01 != 0;

        let detect_mult = data[2];
        if detect_mult == 0 {
            return Err(DecodeError::ZeroDetectMult);
        }
        if multipoint {
            return Err(DecodeError::Multipoint);
        }

        if auth_present {
            return Err(DecodeError::AuthUnsupported);
        }

        let length = data[3];
        if (length as usize) != CONTROL_PACKET_LEN || (length as usize) > data.len() {
            return Err(DecodeError::Length {
                length,
                received: data.len(),
            });
        }

        let my_discr = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if my_discr == 0 {
            return Err(DecodeError::ZeroMyDiscriminator);
        }

        let your_discr = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
        if your_discr == 0
            && !matches!(state, SessionState::Down | SessionState::AdminDown)
        {
            return Err(DecodeError::ZeroYourDiscriminator);
        }

        let desired_min_tx = u32::from_be_bytes([data[12], data[13], data[14], data[15]]);
        let required_min_rx = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
        let required_min_echo = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);

        Ok(Self {
            diag,
            state,
            poll,
            final_bit,
            cpi,
            auth_present,
            demand,
            detect_mult,
            my_discr,
            your_discr,
            desired_min_tx,
            required_min_rx,
            required_min_echo,
        })
    }

    /// Encode to the 24-byte wire representation.
    pub fn encode(&self) -> [u8; CONTROL_PACKET_LEN] {
        let mut buf = [0u8; CONTROL_PACKET_LEN];
        buf[0] = (BFD_VERSION << 5) | self.diag.to_wire();
        buf[1] = (self.state.to_wire() << 6)
            | ((self.poll as u8) << 5)
            | ((self.final_bit as u8) << 4)
            | ((self.cpi as u8) << 3)
            | ((self.auth_present as u8) << 2)
            | ((self.demand as u8) << 1);
        buf[2] = self.detect_mult;
        buf[3] = CONTROL_PACKET_LEN as u8;
        buf[4..8].copy_from_slice(&self.my_discr.to_be_bytes());
        buf[8..12].copy_from_slice(&self.your_discr.to_be_bytes());
        buf[12..16].copy_from_slice(&self.desired_min_tx.to_be_bytes());
        buf[16..20].copy_from_slice(&self.required_min_rx.to_be_bytes());
        buf[20..24].copy_from_slice(&self.required_min_echo.to_be_bytes());
        buf
    }
}

// ============================================================================
// Echo packet
// ============================================================================

/// Payload of an echo packet. Only this endpoint ever interprets it; the
/// peer reflects it untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EchoPacket {
    /// Local discriminator of the transmitting session.
    pub discr: u32,
    /// Monotonically increasing per-session sequence number.
    pub seq: u64,
}

impl EchoPacket {
    /// Decode a looped-back echo packet.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < ECHO_PACKET_LEN {
            return Err(DecodeError::Truncated(data.len()));
        }
        if data[0] != ECHO_VERSION {
            return Err(DecodeError::Version(data[0]));
        }
        let discr = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if discr == 0 {
            return Err(DecodeError::ZeroMyDiscriminator);
        }
        let seq = u64::from_be_bytes([
            data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
        ]);
        Ok(Self { discr, seq })
    }

    /// Encode to the 16-byte wire representation.
    pub fn encode(&self) -> [u8; ECHO_PACKET_LEN] {
        let mut buf = [0u8; ECHO_PACKET_LEN];
        buf[0] = ECHO_VERSION;
        buf[4..8].copy_from_slice(&self.discr.to_be_bytes());
        buf[8..16].copy_from_slice(&self.seq.to_be_bytes());
        buf
    }
}

// ============================================================================
// Tests
// ============================================================================
