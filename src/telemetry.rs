//! In-process telemetry facade: counters, latency samples, and gauges kept in
//! memory so tests can assert on instrumentation and operators can pull a
//! snapshot without an exporter.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;

fn default_flush_interval_ms() -> u64 {
    5_000
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct TelemetryConfig {
    /// Where snapshots would be shipped. Informational only.
    pub endpoint: String,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Labels stamped onto every snapshot.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl TelemetryConfig {
    pub fn sample(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_owned(),
            flush_interval_ms: default_flush_interval_ms(),
            labels: BTreeMap::from([("component".into(), "haven-guard".into())]),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::sample("memory://haven-guard")
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("counter overflow for metric {0}")]
    CounterOverflow(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub timestamp: DateTime<Utc>,
    pub labels: BTreeMap<String, String>,
    pub counters: BTreeMap<String, u64>,
    pub latencies_ms: BTreeMap<String, Vec<u64>>,
    pub gauges: BTreeMap<String, f64>,
}

#[derive(Default)]
struct TelemetryState {
    counters: BTreeMap<String, u64>,
    latencies_ms: BTreeMap<String, Vec<u64>>,
    gauges: BTreeMap<String, f64>,
}

#[derive(Clone)]
pub struct TelemetryHandle {
    config: TelemetryConfig,
    state: Arc<Mutex<TelemetryState>>,
}

impl TelemetryHandle {
    pub fn from_config(config: TelemetryConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(TelemetryState::default())),
        }
    }

    pub fn record_counter(&self, name: &str, delta: u64) -> Result<(), TelemetryError> {
        let mut guard = self.state.lock();
        let entry = guard.counters.entry(name.to_owned()).or_default();
        *entry = entry
            .checked_add(delta)
            .ok_or_else(|| TelemetryError::CounterOverflow(name.to_owned()))?;
        Ok(())
    }

    /// Bump a counter by one on paths that must not fail because of instrumentation.
    pub fn incr(&self, name: &str) {
        if let Err(err) = self.record_counter(name, 1) {
            tracing::warn!(metric = name, error = %err, "telemetry counter saturated");
        }
    }

    pub fn record_latency_ms(&self, name: &str, value: u64) {
        self.state
            .lock()
            .latencies_ms
            .entry(name.to_owned())
            .or_default()
            .push(value);
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        self.state.lock().gauges.insert(name.to_owned(), value);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.state.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// Current values without resetting anything.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let guard = self.state.lock();
        TelemetrySnapshot {
            timestamp: Utc::now(),
            labels: self.config.labels.clone(),
            counters: guard.counters.clone(),
            latencies_ms: guard.latencies_ms.clone(),
            gauges: guard.gauges.clone(),
        }
    }

    /// Snapshot and clear counters and latency samples. Gauges persist.
    pub fn flush(&self) -> TelemetrySnapshot {
        let snapshot = self.snapshot();
        let mut guard = self.state.lock();
        guard.counters.clear();
        guard.latencies_ms.clear();
        snapshot
    }

    pub fn flush_interval_ms(&self) -> u64 {
        self.config.flush_interval_ms
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

impl Default for TelemetryHandle {
    fn default() -> Self {
        Self::from_config(TelemetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_counters_latencies_and_gauges() {
        let handle = TelemetryHandle::default();
        handle.record_counter("routing.requests", 1).unwrap();
        handle.incr("routing.requests");
        handle.record_latency_ms("routing.fast", 12);
        handle.set_gauge("session.active", 3.0);
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.counters["routing.requests"], 2);
        assert_eq!(snapshot.latencies_ms["routing.fast"], vec![12]);
        assert_eq!(snapshot.gauges["session.active"], 3.0);
    }

    #[test]
    fn detects_counter_overflow() {
        let handle = TelemetryHandle::default();
        handle.record_counter("sync.packaged", u64::MAX).unwrap();
        let err = handle.record_counter("sync.packaged", 1).unwrap_err();
        assert!(matches!(err, TelemetryError::CounterOverflow(_)));
    }

    #[test]
    fn flush_clears_counters_but_keeps_gauges() {
        let handle = TelemetryHandle::default();
        handle.incr("session.granted");
        handle.set_gauge("degraded_mode", 1.0);
        handle.flush();
        let second = handle.flush();
        assert!(second.counters.is_empty());
        assert_eq!(second.gauges["degraded_mode"], 1.0);
    }
}
