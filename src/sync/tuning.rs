//! Self-tuning of batching, timing, and compression for sync.
//!
//! Only those three knobs move. Encryption and integrity checks are outside
//! the tuner's reach.

use serde::Serialize;

use crate::config::SyncTuningConfig;
use crate::routing::metrics::RunningAverage;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SyncTuningState {
    pub batch_size: usize,
    pub sync_interval_secs: u64,
    pub compression_enabled: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SyncTuningAdjustment {
    pub before: SyncTuningState,
    pub after: SyncTuningState,
    pub avg_rtt_ms: Option<f64>,
    pub avg_savings: Option<f64>,
    pub conflict_rate: Option<f64>,
}

impl SyncTuningAdjustment {
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

/// Observations since the last tick plus the current knob settings.
#[derive(Clone, Debug)]
pub struct SyncPerformanceTuner {
    cfg: SyncTuningConfig,
    state: SyncTuningState,
    rtt: RunningAverage,
    savings: RunningAverage,
    uploads: u64,
    conflicts: u64,
}

impl SyncPerformanceTuner {
    pub fn new(cfg: SyncTuningConfig) -> Self {
        let state = SyncTuningState {
            batch_size: cfg.batch_size,
            sync_interval_secs: cfg.sync_interval_secs,
            compression_enabled: true,
        };
        Self {
            cfg,
            state,
            rtt: RunningAverage::default(),
            savings: RunningAverage::default(),
            uploads: 0,
            conflicts: 0,
        }
    }

    pub fn state(&self) -> SyncTuningState {
        self.state
    }

    pub fn record_round_trip(&mut self, rtt_ms: f64) {
        if rtt_ms.is_finite() && rtt_ms >= 0.0 {
            self.rtt.push(rtt_ms);
        }
    }

    /// Estimated savings ratio of one body, recorded whether or not it was compressed.
    pub fn record_savings(&mut self, ratio: f64) {
        if ratio.is_finite() {
            self.savings.push(ratio.clamp(0.0, 1.0));
        }
    }

    pub fn record_upload(&mut self) {
        self.uploads += 1;
    }

    pub fn record_conflict(&mut self) {
        self.conflicts += 1;
    }

    /// Apply one adjustment from the observations gathered since the last tick, then clear them.
    /// A knob with no observations behind it stays where it is.
    pub fn tick(&mut self) -> SyncTuningAdjustment {
        let before = self.state;
        let cfg = &self.cfg;

        let avg_rtt_ms = (!self.rtt.is_empty()).then(|| self.rtt.value());
        if let Some(rtt) = avg_rtt_ms {
            let batch = self.state.batch_size;
            self.state.batch_size = if rtt > cfg.high_rtt_ms {
                (batch / 2).max(cfg.batch_size_min)
            } else {
                (batch + (batch / 4).max(1)).min(cfg.batch_size_max)
            };
        }

        let avg_savings = (!self.savings.is_empty()).then(|| self.savings.value());
        if let Some(savings) = avg_savings {
            if savings < cfg.negligible_savings {
                self.state.compression_enabled = false;
            } else if savings > cfg.substantial_savings {
                self.state.compression_enabled = true;
            }
        }

        // Conflicts with no uploads behind them count as a saturated rate.
        let conflict_rate = match (self.uploads, self.conflicts) {
            (0, 0) => None,
            (0, _) => Some(1.0),
            (uploads, conflicts) => Some(conflicts as f64 / uploads as f64),
        };
        if let Some(rate) = conflict_rate {
            let interval = self.state.sync_interval_secs;
            self.state.sync_interval_secs = if rate > cfg.high_conflict_rate {
                (interval * 2).min(cfg.sync_interval_max_secs)
            } else {
                (interval - interval / 4).max(cfg.sync_interval_min_secs)
            };
        }

        self.rtt = RunningAverage::default();
        self.savings = RunningAverage::default();
        self.uploads = 0;
        self.conflicts = 0;

        SyncTuningAdjustment {
            before,
            after: self.state,
            avg_rtt_ms,
            avg_savings,
            conflict_rate,
        }
    }
}
