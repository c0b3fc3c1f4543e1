//! Hysteresis controller for routing thresholds.
//!
//! Latency threshold rises in large steps when the running average exceeds
//! it and falls in small steps only once the average drops below 70% of it.
//! The score threshold only ever relaxes. All values stay inside their
//! configured bounds.

use serde::Serialize;

use crate::config::RoutingConfig;
use crate::routing::metrics::RoutingMetrics;

const LOWER_WHEN_BELOW_RATIO: f64 = 0.7;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AdaptiveThresholds {
    pub latency_threshold_ms: f64,
    pub score_threshold: f64,
    pub crisis_latency_ceiling_ms: f64,
}

impl AdaptiveThresholds {
    pub fn from_config(cfg: &RoutingConfig) -> Self {
        Self {
            latency_threshold_ms: cfg.latency_threshold_ms,
            score_threshold: cfg.score_threshold,
            crisis_latency_ceiling_ms: cfg.crisis_latency_ceiling_ms,
        }
    }

    /// Pull values back inside the bounds of a (possibly updated) config.
    pub fn clamp_to(&mut self, cfg: &RoutingConfig) {
        self.latency_threshold_ms = self
            .latency_threshold_ms
            .clamp(cfg.latency_threshold_min_ms, cfg.latency_threshold_max_ms);
        self.score_threshold = self.score_threshold.clamp(cfg.score_threshold_min, 100.0);
        self.crisis_latency_ceiling_ms = cfg.crisis_latency_ceiling_ms;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyAdjustment {
    Unchanged,
    Raised,
    Lowered,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ThresholdAdjustment {
    pub latency: LatencyAdjustment,
    pub score_lowered: bool,
    pub before: AdaptiveThresholds,
    pub after: AdaptiveThresholds,
}

impl ThresholdAdjustment {
    pub fn changed(&self) -> bool {
        self.latency != LatencyAdjustment::Unchanged || self.score_lowered
    }
}

/// One tuning step. A no-op until at least one request has been observed.
pub fn tune(thresholds: &mut AdaptiveThresholds, metrics: &RoutingMetrics, cfg: &RoutingConfig) -> ThresholdAdjustment {
    let before = *thresholds;
    let mut latency = LatencyAdjustment::Unchanged;
    let mut score_lowered = false;

    if !metrics.latency.is_empty() {
        let avg_latency = metrics.latency.value();
        if avg_latency > thresholds.latency_threshold_ms {
            let next = (thresholds.latency_threshold_ms + cfg.latency_raise_step_ms).min(cfg.latency_threshold_max_ms);
            if next != thresholds.latency_threshold_ms {
                thresholds.latency_threshold_ms = next;
                latency = LatencyAdjustment::Raised;
            }
        } else if avg_latency < thresholds.latency_threshold_ms * LOWER_WHEN_BELOW_RATIO {
            let next = (thresholds.latency_threshold_ms - cfg.latency_lower_step_ms).max(cfg.latency_threshold_min_ms);
            if next != thresholds.latency_threshold_ms {
                thresholds.latency_threshold_ms = next;
                latency = LatencyAdjustment::Lowered;
            }
        }
    }

    if !metrics.score.is_empty() && metrics.score.value() < thresholds.score_threshold {
        let next = (thresholds.score_threshold - cfg.score_lower_step).max(cfg.score_threshold_min);
        if next != thresholds.score_threshold {
            thresholds.score_threshold = next;
            score_lowered = true;
        }
    }

    ThresholdAdjustment {
        latency,
        score_lowered,
        before,
        after: *thresholds,
    }
}
