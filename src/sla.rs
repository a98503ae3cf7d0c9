//! SLA accounting.
//!
//! Folds one-way latency samples from control and echo packet exchanges
//! into rolling sums, and emits a report every `detect_mult` received
//! packets: mean latency, mean jitter, and — once per loss window —
//! packet loss derived from the transmit/receive counter gap.
//!
//! Accumulators are 64-bit; the divisions guard the `detect_mult == 1`
//! case, where a jitter mean is undefined.

use crate::session::defaults::PKTS_FOR_LOSS_WINDOW;

/// One emitted SLA report.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SlaReport {
    /// Mean one-way latency over the last `detect_mult` packets, ms.
    pub latency_ms: u64,
    /// Mean inter-sample jitter, ms. `None` when `detect_mult` is 1.
    pub jitter_ms: Option<u64>,
    /// Packet loss over the last loss window, percent. Only present on
    /// the report that closes a window.
    pub loss_pct: Option<f32>,
}

/// Per-session rolling SLA state.
#[derive(Clone, Copy, Debug, Default)]
pub struct SlaTracker {
    lat_sum_ms: u64,
    jit_sum_ms: u64,
    last_lat_ms: Option<u64>,
    lost_snapshot: u64,
}

impl SlaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one latency sample.
    ///
    /// `rx_total` and `tx_total` are the session's cumulative received
    /// and transmitted packet counts (control plus echo), with the packet
    /// that produced this sample already counted. Returns a report when
    /// the sample completes a `detect_mult` group; the rolling sums reset
    /// after each report.
    pub fn record(
        &mut self,
        elapsed_ms: u64,
        detect_mult: u8,
        rx_total: u64,
        tx_total: u64,
    ) -> Option<SlaReport> {
        self.lat_sum_ms += elapsed_ms;
        if let Some(last) = self.last_lat_ms {
            self.jit_sum_ms += last.abs_diff(elapsed_ms);
        }
        self.last_lat_ms = Some(elapsed_ms);

        let mult = detect_mult.max(1) as u64;
        if rx_total % mult != 0 {
            return None;
        }

        // The first report at or past a window boundary closes the window.
        let loss_pct = if rx_total % PKTS_FOR_LOSS_WINDOW < mult {
            let lost_now = tx_total.saturating_sub(rx_total);
            let delta = lost_now.saturating_sub(self.lost_snapshot);
            self.lost_snapshot = lost_now;
            Some(delta as f32 / PKTS_FOR_LOSS_WINDOW as f32 * 100.0)
        } else {
            None
        };

        let report = SlaReport {
            latency_ms: self.lat_sum_ms / mult,
            jitter_ms: (mult > 1).then(|| self.jit_sum_ms / (mult - 1)),
            loss_pct,
        };

        self.lat_sum_ms = 0;
        self.jit_sum_ms = 0;
        self.last_lat_ms = None;

        Some(report)
    }
}

// ============================================================================
// Tests
// ============================================================================
