//! Adaptive routing between fast, deep, and hybrid validation paths.

pub mod classifier;
pub mod engine;
pub mod metrics;
pub mod thresholds;
pub mod validator;

use serde::{Deserialize, Serialize};

use crate::types::{ThreatLevel, ValidationPath};

/// Per-request routing choice. Built by [`engine::AdaptiveRoutingEngine::route`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub chosen_path: ValidationPath,
    pub crisis_active: bool,
    pub reasoning: Vec<String>,
    pub expected_latency_ms: f64,
    pub expected_score: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub expected_latency_ms: f64,
    pub expected_score: f64,
    pub fallback_triggered: bool,
    pub fallback_path: Option<ValidationPath>,
    /// Latency of the primary attempt when a fallback replaced it.
    pub primary_latency_ms: Option<f64>,
    /// True when the result is the conservative stand-in for a failed validator.
    pub conservative_default: bool,
    /// Hybrid only: whether the deep leg ran.
    pub escalated: bool,
}

/// Unified outcome handed back to callers and folded into routing metrics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SecurityResult {
    pub score: f64,
    pub threat_level: ThreatLevel,
    pub latency_ms: f64,
    pub path: ValidationPath,
    pub crisis_mode: bool,
    pub emergency_access: bool,
    pub recommendations: Vec<String>,
    pub performance: PerformanceMetrics,
}

pub const CONSERVATIVE_SCORE: f64 = 50.0;

impl SecurityResult {
    /// Stand-in result when validation could not complete. Always grants emergency access.
    pub fn conservative(path: ValidationPath, crisis_mode: bool, latency_ms: f64, reason: &str) -> Self {
        Self {
            score: CONSERVATIVE_SCORE,
            threat_level: ThreatLevel::Medium,
            latency_ms,
            path,
            crisis_mode,
            emergency_access: true,
            recommendations: vec![
                format!("validation unavailable: {reason}"),
                "conservative defaults applied; crisis resources remain reachable".to_string(),
            ],
            performance: PerformanceMetrics {
                conservative_default: true,
                ..Default::default()
            },
        }
    }
}
