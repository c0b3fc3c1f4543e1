use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{SecurityRequest, ThreatLevel};

/// What a validation strategy reports back for one request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// 0–100, higher is safer.
    pub score: f64,
    pub threat_level: ThreatLevel,
    /// Time the strategy itself spent, as it measured it.
    pub latency_ms: f64,
    pub recommendations: Vec<String>,
}

/// A threat-detection strategy. The engine only sees this uniform capability.
#[async_trait]
pub trait ValidationStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn validate(&self, request: &SecurityRequest) -> anyhow::Result<ValidationOutcome>;
}

/// Strategy that always reports the same outcome, optionally after a delay.
///
/// Handy for drills and for standing in when a real detector is not wired up.
#[derive(Clone, Debug)]
pub struct FixedValidator {
    name: String,
    outcome: ValidationOutcome,
    delay: std::time::Duration,
}

impl FixedValidator {
    pub fn new(name: impl Into<String>, score: f64, threat_level: ThreatLevel) -> Self {
        Self {
            name: name.into(),
            outcome: ValidationOutcome {
                score,
                threat_level,
                latency_ms: 0.0,
                recommendations: Vec::new(),
            },
            delay: std::time::Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self.outcome.latency_ms = delay.as_secs_f64() * 1_000.0;
        self
    }

    pub fn with_recommendation(mut self, text: impl Into<String>) -> Self {
        self.outcome.recommendations.push(text.into());
        self
    }
}

#[async_trait]
impl ValidationStrategy for FixedValidator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate(&self, _request: &SecurityRequest) -> anyhow::Result<ValidationOutcome> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.outcome.clone())
    }
}
