//! Session timer engine.
//!
//! Every session owns four logical one-shot timers: control transmit,
//! control detect, echo transmit, echo detect. Arming a kind replaces any
//! earlier arming of the same kind; handlers re-arm from inside the event
//! loop. Deadlines are absolute microseconds on the daemon's monotonic
//! clock, so periodic re-arming does not accumulate drift.
//!
//! The queue never touches sessions itself. A fired entry yields a
//! [`TimerToken`] carrying the session handle (index plus generation);
//! the daemon drops tokens whose generation no longer resolves, which is
//! how a fire racing a session delete is ignored.

use crate::session::registry::SessionHandle;
use rand::Rng;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Which of a session's four timers fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Periodic control packet transmission.
    CtrlXmit,
    /// Control packet detection timeout.
    CtrlDetect,
    /// Periodic echo packet transmission.
    EchoXmit,
    /// Echo detection timeout.
    EchoDetect,
}

/// Identifies one timer arming for one session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerToken {
    pub session: SessionHandle,
    pub kind: TimerKind,
}

#[derive(PartialEq, Eq)]
struct Entry {
    deadline_us: u64,
    seq: u64,
    token: TimerToken,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline_us, self.seq).cmp(&(other.deadline_us, other.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Deadline queue over all sessions.
///
/// Cancellation is lazy: `cancel` only forgets the live arming sequence,
/// and the superseded heap entry is discarded when it reaches the top.
/// This keeps cancel and re-arm O(log n) with no heap surgery.
#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    armed: HashMap<(SessionHandle, TimerKind), u64>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) a timer. A previous arming of the same kind for the
    /// same session is superseded.
    pub fn arm(&mut self, session: SessionHandle, kind: TimerKind, deadline_us: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.armed.insert((session, kind), seq);
        self.heap.push(Reverse(Entry {
            deadline_us,
            seq,
            token: TimerToken { session, kind },
        }));
    }

    /// Cancel a timer. Cancelling a timer that is not armed is a no-op.
    pub fn cancel(&mut self, session: SessionHandle, kind: TimerKind) {
        self.armed.remove(&(session, kind));
    }

    /// Cancel all four timers of a session.
    pub fn cancel_all(&mut self, session: SessionHandle) {
        for kind in [
            TimerKind::CtrlXmit,
            TimerKind::CtrlDetect,
            TimerKind::EchoXmit,
            TimerKind::EchoDetect,
        ] {
            self.armed.remove(&(session, kind));
        }
    }

    /// Whether a timer is currently armed.
    pub fn is_armed(&self, session: SessionHandle, kind: TimerKind) -> bool {
        self.armed.contains_key(&(session, kind))
    }

    /// Deadline of a live arming, if any.
    pub fn deadline(&self, session: SessionHandle, kind: TimerKind) -> Option<u64> {
        let live_seq = *self.armed.get(&(session, kind))?;
        self.heap
            .iter()
            .find(|Reverse(e)| e.seq == live_seq)
            .map(|Reverse(e)| e.deadline_us)
    }

    /// Earliest live deadline. Stale heap heads are discarded on the way.
    pub fn next_deadline(&mut self) -> Option<u64> {
        self.drop_stale_head();
        self.heap.peek().map(|Reverse(e)| e.deadline_us)
    }

    /// Pop the next timer due at or before `now_us`. Firing disarms the
    /// timer; handlers re-arm explicitly.
    pub fn pop_due(&mut self, now_us: u64) -> Option<TimerToken> {
        loop {
            self.drop_stale_head();
            let head = self.heap.peek()?;
            if head.0.deadline_us > now_us {
                return None;
            }
            let Reverse(entry) = self.heap.pop().expect("peeked entry");
            let key = (entry.token.session, entry.token.kind);
            if self.armed.get(&key) == Some(&entry.seq) {
                self.armed.remove(&key);
                return Some(entry.token);
            }
        }
    }

    fn drop_stale_head(&mut self) {
        while let Some(Reverse(entry)) = self.heap.peek() {
            let key = (entry.token.session, entry.token.kind);
            if self.armed.get(&key) == Some(&entry.seq) {
                return;
            }
            self.heap.pop();
        }
    }
}

/// Apply transmit jitter per RFC 5880 §6.8.7.
///
/// The armed interval is 75–100% of nominal, or 75–90% when the local
/// detect multiplier is 1, drawn independently for every arming.
pub fn jittered_interval<R: Rng>(nominal_us: u64, detect_mult: u8, rng: &mut R) -> u64 {
    let max_jitter: u64 = if detect_mult == 1 { 16 } else { 26 };
    nominal_us * (75 + rng.gen_range(0..max_jitter)) / 100
}

// ============================================================================
// Tests
// ============================================================================
