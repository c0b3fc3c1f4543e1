//! Configuration for the orchestration core.
//!
//! # TOML
//! ```text
//! [routing]
//! priority-mode = "balanced"
//! hybrid-floor = 75.0
//! crisis-latency-ceiling-ms = 200
//!
//! [session]
//! default-duration-secs = 1800
//! always-allow = ["suicidal-ideation", "self-harm"]
//!
//! [sync]
//! enabled = true
//! max-record-bytes = 1048576
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::types::CrisisType;
use crate::telemetry::TelemetryConfig;
use crate::types::PriorityMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("configuration invalid: {0}")]
    Validation(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct GuardConfig {
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl GuardConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.routing.validate()?;
        self.session.validate()?;
        self.sync.validate()?;
        if self.telemetry.flush_interval_ms == 0 {
            return Err(invalid("telemetry flush-interval-ms must be greater than zero"));
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<GuardConfig, ConfigError> {
    let config: GuardConfig = toml::from_str(contents).map_err(|err| ConfigError::Parse(err.to_string()))?;
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Expected behavior of one validation path, used for fallback decisions.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct PathProfile {
    pub expected_latency_ms: f64,
    pub expected_score: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct RoutingConfig {
    #[serde(default)]
    pub priority_mode: PriorityMode,
    #[serde(default = "default_fast_profile")]
    pub fast: PathProfile,
    #[serde(default = "default_deep_profile")]
    pub deep: PathProfile,
    #[serde(default = "default_hybrid_profile")]
    pub hybrid: PathProfile,
    /// Lowest score a hybrid result may report once the fast leg has run.
    #[serde(default = "default_hybrid_floor")]
    pub hybrid_floor: f64,
    /// Soft deadline for crisis requests.
    #[serde(default = "default_crisis_latency_ceiling_ms")]
    pub crisis_latency_ceiling_ms: f64,
    /// Hard bound on one validator call. Crisis calls are further capped at
    /// twice the crisis ceiling.
    #[serde(default = "default_validator_timeout_ms")]
    pub validator_timeout_ms: u64,
    #[serde(default = "default_latency_threshold_ms")]
    pub latency_threshold_ms: f64,
    #[serde(default = "default_latency_threshold_min_ms")]
    pub latency_threshold_min_ms: f64,
    #[serde(default = "default_latency_threshold_max_ms")]
    pub latency_threshold_max_ms: f64,
    #[serde(default = "default_latency_raise_step_ms")]
    pub latency_raise_step_ms: f64,
    #[serde(default = "default_latency_lower_step_ms")]
    pub latency_lower_step_ms: f64,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    #[serde(default = "default_score_threshold_min")]
    pub score_threshold_min: f64,
    #[serde(default = "default_score_lower_step")]
    pub score_lower_step: f64,
    /// Case-insensitive regular expressions matched against request payloads.
    #[serde(default = "default_crisis_patterns")]
    pub crisis_patterns: Vec<String>,
}

fn default_fast_profile() -> PathProfile {
    PathProfile {
        expected_latency_ms: 50.0,
        expected_score: 70.0,
    }
}

fn default_deep_profile() -> PathProfile {
    PathProfile {
        expected_latency_ms: 400.0,
        expected_score: 90.0,
    }
}

fn default_hybrid_profile() -> PathProfile {
    PathProfile {
        expected_latency_ms: 200.0,
        expected_score: 85.0,
    }
}

fn default_hybrid_floor() -> f64 {
    75.0
}

fn default_crisis_latency_ceiling_ms() -> f64 {
    200.0
}

fn default_validator_timeout_ms() -> u64 {
    2_000
}

fn default_latency_threshold_ms() -> f64 {
    250.0
}

fn default_latency_threshold_min_ms() -> f64 {
    100.0
}

fn default_latency_threshold_max_ms() -> f64 {
    1_000.0
}

fn default_latency_raise_step_ms() -> f64 {
    50.0
}

fn default_latency_lower_step_ms() -> f64 {
    20.0
}

fn default_score_threshold() -> f64 {
    75.0
}

fn default_score_threshold_min() -> f64 {
    50.0
}

fn default_score_lower_step() -> f64 {
    5.0
}

pub fn default_crisis_patterns() -> Vec<String> {
    [
        r"\bsuicid(e|al)\b",
        r"\bkill(ing)? my ?self\b",
        r"\bend (it all|my life)\b",
        r"\bwant to die\b",
        r"\bself[- ]?harm\b",
        r"\bcut(ting)? myself\b",
        r"\boverdos(e|ing)\b",
        r"\bno reason to live\b",
        r"\bhurt(ing)? myself\b",
        r"\bemergency\b",
        r"\bcrisis\b",
        r"\bpanic attack\b",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            priority_mode: PriorityMode::default(),
            fast: default_fast_profile(),
            deep: default_deep_profile(),
            hybrid: default_hybrid_profile(),
            hybrid_floor: default_hybrid_floor(),
            crisis_latency_ceiling_ms: default_crisis_latency_ceiling_ms(),
            validator_timeout_ms: default_validator_timeout_ms(),
            latency_threshold_ms: default_latency_threshold_ms(),
            latency_threshold_min_ms: default_latency_threshold_min_ms(),
            latency_threshold_max_ms: default_latency_threshold_max_ms(),
            latency_raise_step_ms: default_latency_raise_step_ms(),
            latency_lower_step_ms: default_latency_lower_step_ms(),
            score_threshold: default_score_threshold(),
            score_threshold_min: default_score_threshold_min(),
            score_lower_step: default_score_lower_step(),
            crisis_patterns: default_crisis_patterns(),
        }
    }
}

fn check_score(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(value.is_finite() && (0.0..=100.0).contains(&value)) {
        return Err(invalid(format!("{name} must be within 0..=100 (got {value})")));
    }
    Ok(())
}

fn check_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(invalid(format!("{name} must be positive (got {value})")));
    }
    Ok(())
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, profile) in [("fast", &self.fast), ("deep", &self.deep), ("hybrid", &self.hybrid)] {
            check_positive(&format!("{name}.expected-latency-ms"), profile.expected_latency_ms)?;
            check_score(&format!("{name}.expected-score"), profile.expected_score)?;
        }
        check_score("hybrid-floor", self.hybrid_floor)?;
        check_positive("crisis-latency-ceiling-ms", self.crisis_latency_ceiling_ms)?;
        if self.validator_timeout_ms == 0 {
            return Err(invalid("validator-timeout-ms must be greater than zero"));
        }
        check_positive("latency-threshold-min-ms", self.latency_threshold_min_ms)?;
        if self.latency_threshold_min_ms > self.latency_threshold_max_ms {
            return Err(invalid("latency-threshold-min-ms exceeds latency-threshold-max-ms"));
        }
        if !(self.latency_threshold_min_ms..=self.latency_threshold_max_ms).contains(&self.latency_threshold_ms) {
            return Err(invalid("latency-threshold-ms outside its configured bounds"));
        }
        check_positive("latency-raise-step-ms", self.latency_raise_step_ms)?;
        check_positive("latency-lower-step-ms", self.latency_lower_step_ms)?;
        if self.latency_lower_step_ms >= self.latency_raise_step_ms {
            return Err(invalid("latency-lower-step-ms must be smaller than latency-raise-step-ms"));
        }
        check_score("score-threshold", self.score_threshold)?;
        check_score("score-threshold-min", self.score_threshold_min)?;
        if self.score_threshold < self.score_threshold_min {
            return Err(invalid("score-threshold below score-threshold-min"));
        }
        check_positive("score-lower-step", self.score_lower_step)?;
        if self.crisis_patterns.is_empty() {
            return Err(invalid("at least one crisis pattern must be defined"));
        }
        Ok(())
    }

    /// Longest a single validator call may run before it counts as failed.
    pub fn validator_budget(&self, crisis: bool) -> Duration {
        let budget = Duration::from_millis(self.validator_timeout_ms);
        if crisis {
            budget.min(Duration::from_millis((2.0 * self.crisis_latency_ceiling_ms).ceil() as u64))
        } else {
            budget
        }
    }

    /// Apply a partial update, leaving `self` untouched if the result would be invalid.
    pub fn apply(&mut self, patch: &RoutingConfigPatch) -> Result<(), ConfigError> {
        let mut next = self.clone();
        if let Some(mode) = patch.priority_mode {
            next.priority_mode = mode;
        }
        if let Some(v) = patch.hybrid_floor {
            next.hybrid_floor = v;
        }
        if let Some(v) = patch.crisis_latency_ceiling_ms {
            next.crisis_latency_ceiling_ms = v;
        }
        if let Some(v) = patch.latency_threshold_min_ms {
            next.latency_threshold_min_ms = v;
        }
        if let Some(v) = patch.latency_threshold_max_ms {
            next.latency_threshold_max_ms = v;
        }
        if let Some(v) = patch.score_threshold_min {
            next.score_threshold_min = v;
        }
        if let Some(profile) = patch.fast {
            next.fast = profile;
        }
        if let Some(profile) = patch.deep {
            next.deep = profile;
        }
        if let Some(profile) = patch.hybrid {
            next.hybrid = profile;
        }
        // Live values follow tightened bounds instead of invalidating the patch.
        if next.latency_threshold_min_ms <= next.latency_threshold_max_ms {
            next.latency_threshold_ms = next
                .latency_threshold_ms
                .clamp(next.latency_threshold_min_ms, next.latency_threshold_max_ms);
        }
        next.score_threshold = next.score_threshold.max(next.score_threshold_min);
        next.validate()?;
        *self = next;
        Ok(())
    }
}

/// Runtime-adjustable subset of [`RoutingConfig`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct RoutingConfigPatch {
    pub priority_mode: Option<PriorityMode>,
    pub hybrid_floor: Option<f64>,
    pub crisis_latency_ceiling_ms: Option<f64>,
    pub latency_threshold_min_ms: Option<f64>,
    pub latency_threshold_max_ms: Option<f64>,
    pub score_threshold_min: Option<f64>,
    pub fast: Option<PathProfile>,
    pub deep: Option<PathProfile>,
    pub hybrid: Option<PathProfile>,
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct SessionConfig {
    #[serde(default = "default_session_duration_secs")]
    pub default_duration_secs: u64,
    /// Ceiling on a session's total lifetime, extensions included.
    #[serde(default = "default_max_total_duration_secs")]
    pub max_total_duration_secs: u64,
    #[serde(default = "default_max_extension_secs")]
    pub max_extension_secs: u64,
    #[serde(default = "default_audit_timeout_ms")]
    pub audit_timeout_ms: u64,
    /// Upper bound on a single authenticator call before it counts as failed.
    #[serde(default = "default_auth_attempt_timeout_ms")]
    pub auth_attempt_timeout_ms: u64,
    /// Crisis types that are granted a session even when every method fails.
    #[serde(default = "default_always_allow")]
    pub always_allow: Vec<CrisisType>,
    /// Consecutive authentication failures, across all sessions, that flip degraded mode.
    #[serde(default = "default_systemic_failure_threshold")]
    pub systemic_failure_threshold: u32,
}

/// Upper bound for every session duration setting.
pub const MAX_SESSION_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

fn default_session_duration_secs() -> u64 {
    30 * 60
}

fn default_max_total_duration_secs() -> u64 {
    4 * 60 * 60
}

fn default_max_extension_secs() -> u64 {
    30 * 60
}

fn default_audit_timeout_ms() -> u64 {
    250
}

fn default_auth_attempt_timeout_ms() -> u64 {
    500
}

fn default_always_allow() -> Vec<CrisisType> {
    vec![CrisisType::SuicidalIdeation, CrisisType::SelfHarm]
}

fn default_systemic_failure_threshold() -> u32 {
    5
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_duration_secs: default_session_duration_secs(),
            max_total_duration_secs: default_max_total_duration_secs(),
            max_extension_secs: default_max_extension_secs(),
            audit_timeout_ms: default_audit_timeout_ms(),
            auth_attempt_timeout_ms: default_auth_attempt_timeout_ms(),
            always_allow: default_always_allow(),
            systemic_failure_threshold: default_systemic_failure_threshold(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_duration_secs == 0 {
            return Err(invalid("default-duration-secs must be greater than zero"));
        }
        if self.default_duration_secs > self.max_total_duration_secs {
            return Err(invalid("default-duration-secs exceeds max-total-duration-secs"));
        }
        if self.max_extension_secs == 0 {
            return Err(invalid("max-extension-secs must be greater than zero"));
        }
        for (name, value) in [
            ("default-duration-secs", self.default_duration_secs),
            ("max-total-duration-secs", self.max_total_duration_secs),
            ("max-extension-secs", self.max_extension_secs),
        ] {
            if value > MAX_SESSION_DURATION_SECS {
                return Err(invalid(format!(
                    "{name} must not exceed {MAX_SESSION_DURATION_SECS} (got {value})"
                )));
            }
        }
        if self.audit_timeout_ms == 0 || self.audit_timeout_ms > 5_000 {
            return Err(invalid("audit-timeout-ms must be within 1..=5000"));
        }
        if self.auth_attempt_timeout_ms == 0 {
            return Err(invalid("auth-attempt-timeout-ms must be greater than zero"));
        }
        if self.systemic_failure_threshold == 0 {
            return Err(invalid("systemic-failure-threshold must be greater than zero"));
        }
        Ok(())
    }

    pub fn audit_timeout(&self) -> Duration {
        Duration::from_millis(self.audit_timeout_ms)
    }

    pub fn auth_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_attempt_timeout_ms)
    }

    pub fn default_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.default_duration_secs as i64)
    }

    pub fn max_total_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_total_duration_secs as i64)
    }

    pub fn max_extension(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_extension_secs as i64)
    }

    pub fn is_always_allow(&self, crisis_type: &CrisisType) -> bool {
        self.always_allow.contains(crisis_type)
    }
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct SyncConfig {
    #[serde(default = "default_sync_enabled")]
    pub enabled: bool,
    /// Upper bound on the serialized record body.
    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: usize,
    #[serde(default = "default_max_fields")]
    pub max_fields: usize,
    /// Minimum estimated savings ratio (0..1) before a body is compressed.
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: f64,
    /// Bytes of each original ciphertext kept in conflict samples.
    #[serde(default = "default_conflict_sample_bytes")]
    pub conflict_sample_bytes: usize,
    /// Bound on the compliance audit emitted for clinical records.
    #[serde(default = "default_audit_timeout_ms")]
    pub audit_timeout_ms: u64,
    #[serde(default)]
    pub tuning: SyncTuningConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct SyncTuningConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_size_min")]
    pub batch_size_min: usize,
    #[serde(default = "default_batch_size_max")]
    pub batch_size_max: usize,
    #[serde(default = "default_high_rtt_ms")]
    pub high_rtt_ms: f64,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_sync_interval_min_secs")]
    pub sync_interval_min_secs: u64,
    #[serde(default = "default_sync_interval_max_secs")]
    pub sync_interval_max_secs: u64,
    #[serde(default = "default_high_conflict_rate")]
    pub high_conflict_rate: f64,
    #[serde(default = "default_negligible_savings")]
    pub negligible_savings: f64,
    #[serde(default = "default_substantial_savings")]
    pub substantial_savings: f64,
}

fn default_sync_enabled() -> bool {
    true
}

fn default_max_record_bytes() -> usize {
    1024 * 1024
}

fn default_max_fields() -> usize {
    512
}

fn default_compression_threshold() -> f64 {
    0.2
}

fn default_conflict_sample_bytes() -> usize {
    32
}

fn default_batch_size() -> usize {
    25
}

fn default_batch_size_min() -> usize {
    5
}

fn default_batch_size_max() -> usize {
    100
}

fn default_high_rtt_ms() -> f64 {
    800.0
}

fn default_sync_interval_secs() -> u64 {
    30
}

fn default_sync_interval_min_secs() -> u64 {
    10
}

fn default_sync_interval_max_secs() -> u64 {
    300
}

fn default_high_conflict_rate() -> f64 {
    0.1
}

fn default_negligible_savings() -> f64 {
    0.05
}

fn default_substantial_savings() -> f64 {
    0.3
}

impl Default for SyncTuningConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_size_min: default_batch_size_min(),
            batch_size_max: default_batch_size_max(),
            high_rtt_ms: default_high_rtt_ms(),
            sync_interval_secs: default_sync_interval_secs(),
            sync_interval_min_secs: default_sync_interval_min_secs(),
            sync_interval_max_secs: default_sync_interval_max_secs(),
            high_conflict_rate: default_high_conflict_rate(),
            negligible_savings: default_negligible_savings(),
            substantial_savings: default_substantial_savings(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: default_sync_enabled(),
            max_record_bytes: default_max_record_bytes(),
            max_fields: default_max_fields(),
            compression_threshold: default_compression_threshold(),
            conflict_sample_bytes: default_conflict_sample_bytes(),
            audit_timeout_ms: default_audit_timeout_ms(),
            tuning: SyncTuningConfig::default(),
        }
    }
}

fn check_ratio(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(value.is_finite() && (0.0..=1.0).contains(&value)) {
        return Err(invalid(format!("{name} must be within 0..=1 (got {value})")));
    }
    Ok(())
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_record_bytes == 0 {
            return Err(invalid("max-record-bytes must be greater than zero"));
        }
        if self.max_fields == 0 {
            return Err(invalid("max-fields must be greater than zero"));
        }
        if self.conflict_sample_bytes == 0 {
            return Err(invalid("conflict-sample-bytes must be greater than zero"));
        }
        if self.audit_timeout_ms == 0 || self.audit_timeout_ms > 5_000 {
            return Err(invalid("sync audit-timeout-ms must be within 1..=5000"));
        }
        check_ratio("compression-threshold", self.compression_threshold)?;
        self.tuning.validate()
    }

    pub fn audit_timeout(&self) -> Duration {
        Duration::from_millis(self.audit_timeout_ms)
    }
}

impl SyncTuningConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size_min == 0 || self.batch_size_min > self.batch_size_max {
            return Err(invalid("batch size bounds are inverted or zero"));
        }
        if !(self.batch_size_min..=self.batch_size_max).contains(&self.batch_size) {
            return Err(invalid("batch-size outside its configured bounds"));
        }
        if self.sync_interval_min_secs == 0 || self.sync_interval_min_secs > self.sync_interval_max_secs {
            return Err(invalid("sync interval bounds are inverted or zero"));
        }
        if !(self.sync_interval_min_secs..=self.sync_interval_max_secs).contains(&self.sync_interval_secs) {
            return Err(invalid("sync-interval-secs outside its configured bounds"));
        }
        check_positive("high-rtt-ms", self.high_rtt_ms)?;
        check_ratio("high-conflict-rate", self.high_conflict_rate)?;
        check_ratio("negligible-savings", self.negligible_savings)?;
        check_ratio("substantial-savings", self.substantial_savings)?;
        if self.negligible_savings >= self.substantial_savings {
            return Err(invalid("negligible-savings must be below substantial-savings"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        GuardConfig::default().validate().unwrap();
    }

    #[test]
    fn telemetry_section_defaults_match_between_code_and_toml() {
        let parsed = parse_config("").unwrap();
        assert_eq!(parsed.telemetry, TelemetryConfig::default());
        assert_eq!(GuardConfig::default().telemetry, parsed.telemetry);
        assert_eq!(parsed.telemetry.endpoint, "memory://haven-guard");
    }

    #[test]
    fn parses_toml_config() {
        let contents = r#"
            [routing]
            priority-mode = "security"
            hybrid-floor = 80.0

            [session]
            default-duration-secs = 600
            always-allow = ["suicidal-ideation"]

            [sync]
            enabled = false
            max-record-bytes = 4096

            [sync.tuning]
            batch-size = 10
        "#;
        let config = parse_config(contents).unwrap();
        assert_eq!(config.routing.priority_mode, PriorityMode::Security);
        assert_eq!(config.routing.hybrid_floor, 80.0);
        assert_eq!(config.session.default_duration_secs, 600);
        assert_eq!(config.session.always_allow, vec![CrisisType::SuicidalIdeation]);
        assert!(!config.sync.enabled);
        assert_eq!(config.sync.tuning.batch_size, 10);
        // untouched sections fall back to defaults
        assert_eq!(config.routing.fast, default_fast_profile());
    }

    #[test]
    fn rejects_inverted_latency_bounds() {
        let contents = r#"
            [routing]
            latency-threshold-min-ms = 900.0
            latency-threshold-max-ms = 100.0
        "#;
        assert!(matches!(parse_config(contents), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn patch_rejects_out_of_range_and_leaves_config_untouched() {
        let mut config = RoutingConfig::default();
        let before = config.clone();
        let patch = RoutingConfigPatch {
            hybrid_floor: Some(140.0),
            ..Default::default()
        };
        assert!(config.apply(&patch).is_err());
        assert_eq!(config, before);
    }

    #[test]
    fn patch_applies_valid_values() {
        let mut config = RoutingConfig::default();
        let patch = RoutingConfigPatch {
            priority_mode: Some(PriorityMode::Speed),
            crisis_latency_ceiling_ms: Some(150.0),
            ..Default::default()
        };
        config.apply(&patch).unwrap();
        assert_eq!(config.priority_mode, PriorityMode::Speed);
        assert_eq!(config.crisis_latency_ceiling_ms, 150.0);
    }

    #[test]
    fn session_default_cannot_exceed_total() {
        let config = SessionConfig {
            default_duration_secs: 10_000,
            max_total_duration_secs: 600,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn session_durations_are_capped() {
        let config = SessionConfig {
            default_duration_secs: 9_000_000_000_000_000,
            max_total_duration_secs: 9_000_000_000_000_000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let week = SessionConfig {
            default_duration_secs: MAX_SESSION_DURATION_SECS,
            max_total_duration_secs: MAX_SESSION_DURATION_SECS,
            max_extension_secs: MAX_SESSION_DURATION_SECS + 1,
            ..Default::default()
        };
        assert!(week.validate().is_err());
    }

    #[test]
    fn crisis_validator_budget_follows_the_ceiling() {
        let config = RoutingConfig::default();
        assert_eq!(config.validator_budget(false), Duration::from_millis(2_000));
        assert_eq!(config.validator_budget(true), Duration::from_millis(400));
        let zero = RoutingConfig {
            validator_timeout_ms: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn sync_savings_thresholds_must_be_ordered() {
        let mut config = SyncConfig::default();
        config.tuning.negligible_savings = 0.5;
        config.tuning.substantial_savings = 0.4;
        assert!(config.validate().is_err());
    }
}
