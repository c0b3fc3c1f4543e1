use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;

use crate::config::{ConfigError, PathProfile, RoutingConfig, RoutingConfigPatch};
use crate::error::GuardResult;
use crate::routing::classifier::{CrisisClassifier, CrisisSignal, KeywordCrisisClassifier};
use crate::routing::metrics::{RoutingMetrics, RoutingMetricsSnapshot};
use crate::routing::thresholds::{self, AdaptiveThresholds, ThresholdAdjustment};
use crate::routing::validator::{ValidationOutcome, ValidationStrategy};
use crate::routing::{PerformanceMetrics, RoutingDecision, SecurityResult};
use crate::telemetry::TelemetryHandle;
use crate::types::{Priority, PriorityMode, RequestContext, SecurityRequest, UserId, ValidationPath};

const FALLBACK_LATENCY_FACTOR: f64 = 2.0;
const FALLBACK_SCORE_MARGIN: f64 = 20.0;

#[derive(Clone, Debug, Serialize)]
pub struct RoutingSnapshot {
    pub priority_mode: PriorityMode,
    pub thresholds: AdaptiveThresholds,
    pub metrics: RoutingMetricsSnapshot,
}

/// A path that could not produce an outcome.
struct PathFailure {
    latency_ms: f64,
    message: String,
}

/// Chooses a validation path per request and keeps the shared routing metrics.
///
/// Crisis requests always take the fast path. Validator failures never reach
/// the caller; they turn into a conservative result that keeps emergency
/// access open.
pub struct AdaptiveRoutingEngine {
    config: RwLock<Arc<RoutingConfig>>,
    classifier: Arc<dyn CrisisClassifier>,
    fast: Arc<dyn ValidationStrategy>,
    deep: Arc<dyn ValidationStrategy>,
    metrics: Mutex<RoutingMetrics>,
    thresholds: RwLock<AdaptiveThresholds>,
    telemetry: TelemetryHandle,
}

impl AdaptiveRoutingEngine {
    pub fn new(
        config: RoutingConfig,
        classifier: Arc<dyn CrisisClassifier>,
        fast: Arc<dyn ValidationStrategy>,
        deep: Arc<dyn ValidationStrategy>,
        telemetry: TelemetryHandle,
    ) -> GuardResult<Self> {
        config.validate()?;
        let thresholds = AdaptiveThresholds::from_config(&config);
        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            classifier,
            fast,
            deep,
            metrics: Mutex::new(RoutingMetrics::default()),
            thresholds: RwLock::new(thresholds),
            telemetry,
        })
    }

    /// Build with the regex classifier compiled from `config.crisis_patterns`.
    pub fn with_keyword_classifier(
        config: RoutingConfig,
        fast: Arc<dyn ValidationStrategy>,
        deep: Arc<dyn ValidationStrategy>,
        telemetry: TelemetryHandle,
    ) -> GuardResult<Self> {
        let classifier = KeywordCrisisClassifier::new(&config.crisis_patterns)
            .map_err(|err| ConfigError::Validation(format!("crisis-patterns: {err:#}")))?;
        Self::new(config, Arc::new(classifier), fast, deep, telemetry)
    }

    fn config(&self) -> Arc<RoutingConfig> {
        self.config.read().clone()
    }

    pub async fn route(&self, request: &SecurityRequest) -> RoutingDecision {
        let cfg = self.config();
        let mut reasoning = Vec::new();

        let signal = match self.classifier.classify(request).await {
            Ok(signal) => signal,
            Err(err) => {
                tracing::warn!(error = %err, "crisis classifier failed; routing on caller priority only");
                reasoning.push(format!("crisis classifier unavailable: {err}"));
                CrisisSignal::none()
            }
        };
        let caller_crisis = request.context.priority == Priority::Crisis;
        let crisis_active = signal.is_crisis || caller_crisis;

        let chosen_path = if crisis_active {
            if signal.is_crisis {
                reasoning.push(format!("crisis language matched: {}", signal.matched.join(", ")));
            }
            if caller_crisis {
                reasoning.push("caller flagged crisis priority".to_string());
            }
            reasoning.push("crisis override: fast path, no escalation".to_string());
            ValidationPath::Fast
        } else if request.context.priority == Priority::High {
            reasoning.push("high priority: hybrid validation".to_string());
            ValidationPath::Hybrid
        } else {
            self.select_by_mode(cfg.priority_mode, &mut reasoning)
        };

        let profile = profile_for(&cfg, chosen_path);
        RoutingDecision {
            chosen_path,
            crisis_active,
            reasoning,
            expected_latency_ms: profile.expected_latency_ms,
            expected_score: profile.expected_score,
        }
    }

    fn select_by_mode(&self, mode: PriorityMode, reasoning: &mut Vec<String>) -> ValidationPath {
        match mode {
            PriorityMode::Speed => {
                reasoning.push("speed mode: fast path".to_string());
                ValidationPath::Fast
            }
            PriorityMode::Security => {
                reasoning.push("security mode: deep path".to_string());
                ValidationPath::Deep
            }
            PriorityMode::Balanced => {
                let (samples, avg_latency, avg_score) = {
                    let metrics = self.metrics.lock();
                    (metrics.latency.count(), metrics.latency.value(), metrics.score.value())
                };
                let t = *self.thresholds.read();
                if samples == 0 {
                    reasoning.push("balanced mode with no history: fast path".to_string());
                    ValidationPath::Fast
                } else if avg_latency > t.latency_threshold_ms {
                    reasoning.push(format!(
                        "balanced mode: average latency {avg_latency:.1}ms over {:.1}ms threshold, fast path",
                        t.latency_threshold_ms
                    ));
                    ValidationPath::Fast
                } else if avg_score < t.score_threshold {
                    reasoning.push(format!(
                        "balanced mode: average score {avg_score:.1} under {:.1} threshold, deep path",
                        t.score_threshold
                    ));
                    ValidationPath::Deep
                } else {
                    reasoning.push("balanced mode within thresholds: fast path".to_string());
                    ValidationPath::Fast
                }
            }
        }
    }

    /// Run the decided path, applying at most one fallback.
    pub async fn execute(&self, decision: &RoutingDecision, request: &SecurityRequest) -> SecurityResult {
        let cfg = self.config();
        let crisis = decision.crisis_active;
        let primary_path = decision.chosen_path;

        let mut result = match self.run_path(primary_path, request, crisis, &cfg).await {
            Ok(result) => result,
            Err(failure) => {
                tracing::warn!(
                    path = primary_path.as_str(),
                    crisis,
                    reason = %failure.message,
                    "validation failed; applying conservative defaults"
                );
                let mut result = SecurityResult::conservative(primary_path, crisis, failure.latency_ms, &failure.message);
                result.performance.expected_latency_ms = decision.expected_latency_ms;
                result.performance.expected_score = decision.expected_score;
                self.record(&result);
                return result;
            }
        };

        let ceiling = self.thresholds.read().crisis_latency_ceiling_ms;
        if let Some(reason) = fallback_reason(&result, profile_for(&cfg, primary_path), crisis, ceiling) {
            let fallback_path = if crisis { ValidationPath::Fast } else { primary_path.fallback() };
            tracing::info!(
                primary = primary_path.as_str(),
                fallback = fallback_path.as_str(),
                crisis,
                %reason,
                "validation fallback triggered"
            );
            self.telemetry.incr("routing.fallbacks");
            match self.run_path(fallback_path, request, crisis, &cfg).await {
                Ok(mut fallback) => {
                    fallback.performance.primary_latency_ms = Some(result.latency_ms);
                    fallback.latency_ms += result.latency_ms;
                    fallback
                        .recommendations
                        .insert(0, format!("fell back from {} path: {reason}", primary_path.as_str()));
                    result = fallback;
                }
                Err(failure) => {
                    tracing::warn!(
                        fallback = fallback_path.as_str(),
                        reason = %failure.message,
                        "fallback validation failed; keeping primary result"
                    );
                    result.latency_ms += failure.latency_ms;
                    result.recommendations.push(format!(
                        "fallback to {} path failed ({}); primary result kept",
                        fallback_path.as_str(),
                        failure.message
                    ));
                }
            }
            result.performance.fallback_triggered = true;
            result.performance.fallback_path = Some(fallback_path);
        }

        result.performance.expected_latency_ms = decision.expected_latency_ms;
        result.performance.expected_score = decision.expected_score;
        self.record(&result);
        result
    }

    async fn run_path(
        &self,
        path: ValidationPath,
        request: &SecurityRequest,
        crisis: bool,
        cfg: &RoutingConfig,
    ) -> Result<SecurityResult, PathFailure> {
        let budget = cfg.validator_budget(crisis);
        match path {
            ValidationPath::Fast => self.run_single(self.fast.as_ref(), path, request, crisis, budget).await,
            ValidationPath::Deep => self.run_single(self.deep.as_ref(), path, request, crisis, budget).await,
            ValidationPath::Hybrid => self.run_hybrid(request, crisis, cfg.hybrid_floor, budget).await,
        }
    }

    async fn run_single(
        &self,
        strategy: &dyn ValidationStrategy,
        path: ValidationPath,
        request: &SecurityRequest,
        crisis: bool,
        budget: Duration,
    ) -> Result<SecurityResult, PathFailure> {
        let (outcome, latency_ms) = invoke(strategy, request, budget).await?;
        Ok(SecurityResult {
            score: sanitize_score(outcome.score),
            threat_level: outcome.threat_level,
            latency_ms,
            path,
            crisis_mode: crisis,
            emergency_access: crisis,
            recommendations: outcome.recommendations,
            performance: PerformanceMetrics::default(),
        })
    }

    /// Fast leg first; the deep leg runs only when the fast leg sees a medium or worse threat.
    async fn run_hybrid(
        &self,
        request: &SecurityRequest,
        crisis: bool,
        floor: f64,
        budget: Duration,
    ) -> Result<SecurityResult, PathFailure> {
        let (fast, fast_latency) = invoke(self.fast.as_ref(), request, budget).await?;
        let mut score = sanitize_score(fast.score);
        let mut threat_level = fast.threat_level;
        let mut latency_ms = fast_latency;
        let mut recommendations = fast.recommendations;
        let mut escalated = false;

        if fast.threat_level.is_medium_or_higher() {
            match invoke(self.deep.as_ref(), request, budget).await {
                Ok((deep, deep_latency)) => {
                    escalated = true;
                    threat_level = threat_level.max(deep.threat_level);
                    latency_ms += deep_latency;
                    recommendations.extend(deep.recommendations);
                }
                Err(failure) => {
                    latency_ms += failure.latency_ms;
                    recommendations.push(format!("deep escalation unavailable: {}", failure.message));
                }
            }
            score = score.max(floor);
        }

        Ok(SecurityResult {
            score,
            threat_level,
            latency_ms,
            path: ValidationPath::Hybrid,
            crisis_mode: crisis,
            emergency_access: crisis,
            recommendations,
            performance: PerformanceMetrics {
                escalated,
                ..Default::default()
            },
        })
    }

    fn record(&self, result: &SecurityResult) {
        self.metrics.lock().record(result);
        self.telemetry.incr("routing.requests");
        if result.crisis_mode {
            self.telemetry.incr("routing.crisis");
        }
        if result.performance.conservative_default {
            self.telemetry.incr("routing.conservative_defaults");
        }
        self.telemetry.record_latency_ms(
            &format!("routing.latency.{}", result.path.as_str()),
            result.latency_ms.max(0.0).round() as u64,
        );
    }

    /// Route and validate one request. Never fails.
    pub async fn validate_request(&self, request: &SecurityRequest) -> SecurityResult {
        let decision = self.route(request).await;
        tracing::debug!(
            path = decision.chosen_path.as_str(),
            crisis = decision.crisis_active,
            reasoning = ?decision.reasoning,
            "routing decision"
        );
        self.execute(&decision, request).await
    }

    pub async fn route_and_validate(
        &self,
        payload: impl Into<String>,
        headers: BTreeMap<String, String>,
        source_address: impl Into<String>,
        user_id: Option<UserId>,
        context: Option<RequestContext>,
    ) -> SecurityResult {
        let request = SecurityRequest {
            payload: payload.into(),
            headers,
            source_address: source_address.into(),
            user_id,
            context: context.unwrap_or_default(),
        };
        self.validate_request(&request).await
    }

    /// Entry point for crisis UI actions: always crisis priority, always a usable result.
    pub async fn validate_crisis_path(
        &self,
        payload: impl Into<String>,
        headers: BTreeMap<String, String>,
        source_address: impl Into<String>,
        emergency_type: Option<String>,
    ) -> SecurityResult {
        let context = RequestContext {
            priority: Priority::Crisis,
            emergency_type,
        };
        self.route_and_validate(payload, headers, source_address, None, Some(context))
            .await
    }

    /// One adaptive tuning step over the metrics gathered so far.
    pub fn tune_thresholds(&self) -> ThresholdAdjustment {
        let cfg = self.config();
        let adjustment = {
            let metrics = self.metrics.lock();
            let mut current = self.thresholds.write();
            thresholds::tune(&mut current, &metrics, &cfg)
        };
        if adjustment.changed() {
            tracing::info!(
                latency = ?adjustment.latency,
                latency_threshold_ms = adjustment.after.latency_threshold_ms,
                score_threshold = adjustment.after.score_threshold,
                "routing thresholds adjusted"
            );
        }
        self.telemetry
            .set_gauge("routing.latency_threshold_ms", adjustment.after.latency_threshold_ms);
        self.telemetry
            .set_gauge("routing.score_threshold", adjustment.after.score_threshold);
        adjustment
    }

    /// Validate and apply a partial config update. Live thresholds are pulled inside any new bounds.
    pub fn apply_config_patch(&self, patch: &RoutingConfigPatch) -> GuardResult<()> {
        let mut guard = self.config.write();
        let mut next = RoutingConfig::clone(&guard);
        next.apply(patch)?;
        self.thresholds.write().clamp_to(&next);
        tracing::info!(priority_mode = ?next.priority_mode, "routing config updated");
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn thresholds(&self) -> AdaptiveThresholds {
        *self.thresholds.read()
    }

    pub fn snapshot(&self) -> RoutingSnapshot {
        RoutingSnapshot {
            priority_mode: self.config().priority_mode,
            thresholds: self.thresholds(),
            metrics: self.metrics.lock().snapshot(),
        }
    }
}

async fn invoke(
    strategy: &dyn ValidationStrategy,
    request: &SecurityRequest,
    budget: Duration,
) -> Result<(ValidationOutcome, f64), PathFailure> {
    let started = Instant::now();
    let outcome = tokio::time::timeout(budget, strategy.validate(request)).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
    match outcome {
        // The strategy may know about time spent before it was polled.
        Ok(Ok(outcome)) => {
            let latency_ms = outcome.latency_ms.max(elapsed_ms);
            Ok((outcome, latency_ms))
        }
        Err(_) => {
            tracing::warn!(
                strategy = strategy.name(),
                budget_ms = budget.as_millis() as u64,
                "validation strategy timed out"
            );
            Err(PathFailure {
                latency_ms: elapsed_ms,
                message: format!("{} validator timed out after {}ms", strategy.name(), budget.as_millis()),
            })
        }
        Ok(Err(err)) => {
            tracing::warn!(strategy = strategy.name(), error = %err, "validation strategy failed");
            Err(PathFailure {
                latency_ms: elapsed_ms,
                message: format!("{} validator: {err}", strategy.name()),
            })
        }
    }
}

fn sanitize_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn profile_for(cfg: &RoutingConfig, path: ValidationPath) -> PathProfile {
    match path {
        ValidationPath::Fast => cfg.fast,
        ValidationPath::Deep => cfg.deep,
        ValidationPath::Hybrid => cfg.hybrid,
    }
}

/// Why `result` misses its path's expectations, if it does.
fn fallback_reason(result: &SecurityResult, expected: PathProfile, crisis: bool, ceiling_ms: f64) -> Option<String> {
    if result.latency_ms > FALLBACK_LATENCY_FACTOR * expected.expected_latency_ms {
        return Some(format!(
            "latency {:.1}ms exceeds twice the expected {:.1}ms",
            result.latency_ms, expected.expected_latency_ms
        ));
    }
    if result.score < expected.expected_score - FALLBACK_SCORE_MARGIN {
        return Some(format!(
            "score {:.1} undershoots expected {:.1} by more than {FALLBACK_SCORE_MARGIN}",
            result.score, expected.expected_score
        ));
    }
    if crisis && result.latency_ms > ceiling_ms {
        return Some(format!(
            "crisis latency {:.1}ms exceeds {:.1}ms ceiling",
            result.latency_ms, ceiling_ms
        ));
    }
    None
}
