//! bfdd: Bidirectional Forwarding Detection daemon
//!
//! Sub-second liveness detection between this host and a set of
//! configured peers, following RFC 5880 with single-hop (RFC 5881) and
//! multihop (RFC 5883) encapsulations and the echo function.

pub mod config;
pub mod daemon;
pub mod net;
pub mod notify;
pub mod session;
pub mod sla;
pub mod timer;
pub mod wire;

// Re-export config types
pub use config::{Config, ConfigError, DaemonConfig, PeerProfile};

// Re-export daemon types
pub use daemon::{Clock, Command, Daemon, SessionError};

// Re-export session types
pub use session::registry::{RegistryError, SessionHandle, SessionRegistry};
pub use session::{
    IntervalConfig, MultiHopKey, PollState, RemoteParams, Session, SessionFlags, SessionKey,
    SessionState, SessionStats, SingleHopKey, StagedTimers,
};

// Re-export wire types
pub use wire::{ControlPacket, DecodeError, Diag, EchoPacket};

// Re-export timer types
pub use timer::{jittered_interval, TimerKind, TimerQueue, TimerToken};

// Re-export SLA types
pub use sla::{SlaReport, SlaTracker};

// Re-export notification types
pub use notify::{ChannelSink, ConfigOp, EventSink, LogSink, Notification, NullSink};

// Re-export network types
pub use net::{
    run_udp_listener, InboundPacket, InterfaceResolver, NetError, PeerSocket, SocketProvider,
    SocketSpec, SysfsResolver, UdpSocketProvider,
};
