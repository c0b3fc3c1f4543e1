use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::routing::SecurityResult;
use crate::types::ValidationPath;

/// Incremental mean: `avg' = (avg·(n−1) + x) / n`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct RunningAverage {
    count: u64,
    value: f64,
}

impl RunningAverage {
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let n = self.count as f64;
        self.value = (self.value * (n - 1.0) + x) / n;
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[derive(Clone, Debug)]
pub struct Histo {
    /// Whole milliseconds.
    inner: Histogram<u64>,
}

impl Default for Histo {
    fn default() -> Self {
        Self {
            inner: Histogram::new(3).expect("3 significant figures is a valid histogram precision"),
        }
    }
}

impl Histo {
    pub fn record(&mut self, v: u64) {
        let _ = self.inner.record(v.max(1));
    }

    pub fn quantile(&self, q: f64) -> u64 {
        self.inner.value_at_quantile(q)
    }

    pub fn max(&self) -> u64 {
        self.inner.max()
    }

    pub fn count(&self) -> u64 {
        self.inner.len()
    }
}

#[derive(Clone, Debug, Default)]
pub struct RoutingMetrics {
    pub total_requests: u64,
    pub crisis_requests: u64,
    pub fallbacks: u64,
    pub conservative_defaults: u64,
    pub latency: RunningAverage,
    pub score: RunningAverage,
    per_path: BTreeMap<ValidationPath, Histo>,
}

impl RoutingMetrics {
    pub fn record(&mut self, result: &SecurityResult) {
        self.total_requests += 1;
        if result.crisis_mode {
            self.crisis_requests += 1;
        }
        if result.performance.fallback_triggered {
            self.fallbacks += 1;
        }
        if result.performance.conservative_default {
            self.conservative_defaults += 1;
        }
        self.latency.push(result.latency_ms);
        self.score.push(result.score);
        self.per_path
            .entry(result.path)
            .or_default()
            .record(result.latency_ms.max(0.0).round() as u64);
    }

    pub fn snapshot(&self) -> RoutingMetricsSnapshot {
        RoutingMetricsSnapshot {
            total_requests: self.total_requests,
            crisis_requests: self.crisis_requests,
            fallbacks: self.fallbacks,
            conservative_defaults: self.conservative_defaults,
            avg_latency_ms: self.latency.value(),
            avg_score: self.score.value(),
            samples: self.latency.count(),
            per_path: self
                .per_path
                .iter()
                .map(|(path, h)| {
                    (
                        path.as_str().to_string(),
                        PathLatency {
                            count: h.count(),
                            p50_ms: h.quantile(0.50),
                            p95_ms: h.quantile(0.95),
                            p99_ms: h.quantile(0.99),
                            max_ms: h.max(),
                        },
                    )
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PathLatency {
    pub count: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub max_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoutingMetricsSnapshot {
    pub total_requests: u64,
    pub crisis_requests: u64,
    pub fallbacks: u64,
    pub conservative_defaults: u64,
    pub avg_latency_ms: f64,
    pub avg_score: f64,
    pub samples: u64,
    pub per_path: BTreeMap<String, PathLatency>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::PerformanceMetrics;
    use crate::types::ThreatLevel;
    use proptest::prelude::*;

    fn result(path: ValidationPath, latency_ms: f64, score: f64) -> SecurityResult {
        SecurityResult {
            score,
            threat_level: ThreatLevel::Low,
            latency_ms,
            path,
            crisis_mode: false,
            emergency_access: false,
            recommendations: vec![],
            performance: PerformanceMetrics::default(),
        }
    }

    #[test]
    fn running_average_matches_arithmetic_mean() {
        let mut avg = RunningAverage::default();
        for x in [10.0, 20.0, 30.0, 40.0] {
            avg.push(x);
        }
        assert_eq!(avg.count(), 4);
        assert!((avg.value() - 25.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn identical_inputs_average_to_themselves(x in 0.0f64..10_000.0, n in 1usize..200) {
            let mut avg = RunningAverage::default();
            for _ in 0..n {
                avg.push(x);
            }
            prop_assert!((avg.value() - x).abs() <= 1e-9 * x.max(1.0));
        }
    }

    #[test]
    fn snapshot_reports_per_path_latency() {
        let mut metrics = RoutingMetrics::default();
        metrics.record(&result(ValidationPath::Fast, 12.0, 80.0));
        metrics.record(&result(ValidationPath::Fast, 30.0, 70.0));
        metrics.record(&result(ValidationPath::Deep, 300.0, 95.0));

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.per_path["fast"].count, 2);
        assert_eq!(snap.per_path["deep"].count, 1);
        assert!(snap.per_path["deep"].max_ms >= 299);
        assert!((snap.avg_score - 81.666_666).abs() < 1e-3);
    }
}
