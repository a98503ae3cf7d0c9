//! Observer notifications.
//!
//! The daemon core never talks to operators directly; it reports session
//! events through an [`EventSink`]. The control-socket subsystem plugs in
//! a [`ChannelSink`]; `main` falls back to a [`LogSink`] when no control
//! surface is attached.

use crate::session::{Session, SessionState};
use crate::sla::SlaReport;
use crate::wire::Diag;
use std::fmt;
use std::net::IpAddr;
use tokio::sync::mpsc;
use tracing::info;

/// Which configuration operation touched a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigOp {
    Add,
    Update,
    Delete,
}

impl fmt::Display for ConfigOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfigOp::Add => "add",
            ConfigOp::Update => "update",
            ConfigOp::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// Receiver of session events. Implementations must not block; they run
/// on the daemon event loop.
pub trait EventSink {
    fn on_state_change(&mut self, session: &Session);
    fn on_config_change(&mut self, op: ConfigOp, session: &Session);
    fn on_sla_report(&mut self, session: &Session, report: &SlaReport);
}

/// Sink that drops everything. Useful in tests and embedded use.
pub struct NullSink;

impl EventSink for NullSink {
    fn on_state_change(&mut self, _session: &Session) {}
    fn on_config_change(&mut self, _op: ConfigOp, _session: &Session) {}
    fn on_sla_report(&mut self, _session: &Session, _report: &SlaReport) {}
}

/// Sink that logs events through `tracing`.
pub struct LogSink;

impl EventSink for LogSink {
    fn on_state_change(&mut self, session: &Session) {
        info!(
            discr = format_args!("0x{:08x}", session.local_discr),
            peer = %session.key,
            state = %session.state,
            diag = %session.local_diag,
            "session state change"
        );
    }

    fn on_config_change(&mut self, op: ConfigOp, session: &Session) {
        info!(
            discr = format_args!("0x{:08x}", session.local_discr),
            peer = %session.key,
            op = %op,
            "session configuration change"
        );
    }

    fn on_sla_report(&mut self, session: &Session, report: &SlaReport) {
        info!(
            discr = format_args!("0x{:08x}", session.local_discr),
            peer = %session.key,
            latency_ms = report.latency_ms,
            jitter_ms = ?report.jitter_ms,
            loss_pct = ?report.loss_pct,
            "sla report"
        );
    }
}

/// Owned snapshot of a session event, safe to hand across tasks.
#[derive(Clone, Debug)]
pub enum Notification {
    StateChange {
        discr: u32,
        peer: IpAddr,
        label: Option<String>,
        state: SessionState,
        diag: Diag,
    },
    ConfigChange {
        op: ConfigOp,
        discr: u32,
        peer: IpAddr,
        label: Option<String>,
    },
    Sla {
        discr: u32,
        peer: IpAddr,
        report: SlaReport,
    },
}

/// Sink that forwards snapshots over a channel, e.g. to the control
/// socket subsystem. Sends never block; if the receiver lags behind or
/// goes away, events are dropped.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn on_state_change(&mut self, session: &Session) {
        let _ = self.tx.send(Notification::StateChange {
            discr: session.local_discr,
            peer: session.peer_addr(),
            label: session.label.clone(),
            state: session.state,
            diag: session.local_diag,
        });
    }

    fn on_config_change(&mut self, op: ConfigOp, session: &Session) {
        let _ = self.tx.send(Notification::ConfigChange {
            op,
            discr: session.local_discr,
            peer: session.peer_addr(),
            label: session.label.clone(),
        });
    }

    fn on_sla_report(&mut self, session: &Session, report: &SlaReport) {
        let _ = self.tx.send(Notification::Sla {
            discr: session.local_discr,
            peer: session.peer_addr(),
            report: *report,
        });
    }
}
