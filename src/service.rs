use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::audit::AuditSink;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, GuardConfig};
use crate::crypto::EncryptionProvider;
use crate::error::GuardResult;
use crate::routing::classifier::{CrisisClassifier, KeywordCrisisClassifier};
use crate::routing::engine::AdaptiveRoutingEngine;
use crate::routing::thresholds::ThresholdAdjustment;
use crate::routing::validator::ValidationStrategy;
use crate::routing::SecurityResult;
use crate::schedule::{spawn_periodic, PeriodicTask};
use crate::session::manager::EmergencySessionManager;
use crate::session::{
    Authenticator, DegradedMode, EmergencySession, EmergencySessionRequest, EmergencySessionResult, Operation,
    SessionValidation,
};
use crate::sync::engine::ZeroKnowledgeSyncEngine;
use crate::sync::{ConflictResolution, ConflictStrategy, RecordMetadata, SyncPayload, SyncRecord, SyncTuningAdjustment};
use crate::telemetry::{TelemetryHandle, TelemetrySnapshot};
use crate::types::{RequestContext, SessionId, UserId};

/// Everything the orchestrator cannot build for itself.
pub struct Collaborators {
    pub fast_validator: Arc<dyn ValidationStrategy>,
    pub deep_validator: Arc<dyn ValidationStrategy>,
    /// Defaults to a keyword classifier over `routing.crisis-patterns`.
    pub classifier: Option<Arc<dyn CrisisClassifier>>,
    pub authenticators: Vec<Arc<dyn Authenticator>>,
    pub encryption: Arc<dyn EncryptionProvider>,
    pub audit_sink: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    pub fn new(
        fast_validator: Arc<dyn ValidationStrategy>,
        deep_validator: Arc<dyn ValidationStrategy>,
        encryption: Arc<dyn EncryptionProvider>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            fast_validator,
            deep_validator,
            classifier: None,
            authenticators: Vec::new(),
            encryption,
            audit_sink,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn CrisisClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push(authenticator);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TuningReport {
    pub routing: ThresholdAdjustment,
    pub sync: SyncTuningAdjustment,
}

/// One routing engine, one session manager, and one sync engine sharing a
/// degraded-mode flag and a telemetry handle.
pub struct SecurityOrchestrator {
    routing: AdaptiveRoutingEngine,
    sessions: EmergencySessionManager,
    sync: ZeroKnowledgeSyncEngine,
    degraded: DegradedMode,
    telemetry: TelemetryHandle,
}

impl SecurityOrchestrator {
    pub fn new(config: GuardConfig, collaborators: Collaborators) -> GuardResult<Self> {
        config.validate()?;
        let telemetry = TelemetryHandle::from_config(config.telemetry.clone());
        let degraded = DegradedMode::new();

        let classifier: Arc<dyn CrisisClassifier> = match collaborators.classifier {
            Some(classifier) => classifier,
            None => Arc::new(
                KeywordCrisisClassifier::new(&config.routing.crisis_patterns)
                    .map_err(|err| ConfigError::Validation(format!("crisis-patterns: {err:#}")))?,
            ),
        };
        let routing = AdaptiveRoutingEngine::new(
            config.routing,
            classifier,
            collaborators.fast_validator,
            collaborators.deep_validator,
            telemetry.clone(),
        )?;
        let sessions = EmergencySessionManager::new(
            config.session,
            collaborators.authenticators,
            collaborators.audit_sink.clone(),
            degraded.clone(),
            collaborators.clock.clone(),
            telemetry.clone(),
        )?;
        let sync = ZeroKnowledgeSyncEngine::new(
            config.sync,
            collaborators.encryption,
            collaborators.audit_sink,
            degraded.clone(),
            collaborators.clock,
            telemetry.clone(),
        )?;

        tracing::info!("security orchestrator ready");
        Ok(Self {
            routing,
            sessions,
            sync,
            degraded,
            telemetry,
        })
    }

    pub fn routing(&self) -> &AdaptiveRoutingEngine {
        &self.routing
    }

    pub fn sessions(&self) -> &EmergencySessionManager {
        &self.sessions
    }

    pub fn sync(&self) -> &ZeroKnowledgeSyncEngine {
        &self.sync
    }

    pub fn degraded_mode(&self) -> &DegradedMode {
        &self.degraded
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    pub async fn route_and_validate(
        &self,
        payload: impl Into<String>,
        headers: BTreeMap<String, String>,
        source_address: impl Into<String>,
        user_id: Option<UserId>,
        context: Option<RequestContext>,
    ) -> SecurityResult {
        self.routing
            .route_and_validate(payload, headers, source_address, user_id, context)
            .await
    }

    pub async fn validate_crisis_path(
        &self,
        payload: impl Into<String>,
        headers: BTreeMap<String, String>,
        source_address: impl Into<String>,
        emergency_type: Option<String>,
    ) -> SecurityResult {
        self.routing
            .validate_crisis_path(payload, headers, source_address, emergency_type)
            .await
    }

    pub async fn create_emergency_session(&self, request: &EmergencySessionRequest) -> EmergencySessionResult {
        self.sessions.create_emergency_session(request).await
    }

    pub async fn validate_session(&self, session_id: &SessionId, operation: Operation) -> SessionValidation {
        self.sessions.validate_session(session_id, operation).await
    }

    pub async fn extend_session(
        &self,
        session_id: &SessionId,
        operation: Operation,
        additional: chrono::Duration,
    ) -> GuardResult<EmergencySession> {
        self.sessions.extend_session(session_id, operation, additional).await
    }

    pub async fn revoke_session(&self, session_id: &SessionId, reason: &str) -> GuardResult<EmergencySession> {
        self.sessions.revoke_session(session_id, reason).await
    }

    pub async fn package_for_upload(&self, record: &SyncRecord, metadata: &RecordMetadata) -> GuardResult<SyncPayload> {
        self.sync.package_for_upload(record, metadata).await
    }

    pub async fn unpack_from_download(&self, payload: &SyncPayload, expected: &RecordMetadata) -> GuardResult<SyncRecord> {
        self.sync.unpack_from_download(payload, expected).await
    }

    pub async fn resolve_conflict(
        &self,
        client: &SyncPayload,
        server: &SyncPayload,
        strategy: ConflictStrategy,
    ) -> GuardResult<ConflictResolution> {
        self.sync.resolve_conflict(client, server, strategy).await
    }

    /// One tuning step for routing thresholds and sync knobs.
    pub fn tuning_tick(&self) -> TuningReport {
        TuningReport {
            routing: self.routing.tune_thresholds(),
            sync: self.sync.tune_performance(),
        }
    }

    /// Drop expired sessions and retry any audit events that missed their sink.
    pub async fn maintenance(&self) -> (usize, usize) {
        let expired = self.sessions.sweep_expired().await;
        let reconciled = self.sessions.reconcile_audit().await;
        (expired, reconciled)
    }

    /// Hand back everything recorded since the last flush and start counting afresh.
    pub fn flush_telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.flush()
    }

    /// Flush telemetry every `flush-interval-ms` and log what was collected.
    pub fn spawn_telemetry_flush(self: &Arc<Self>) -> PeriodicTask {
        let telemetry = self.telemetry.clone();
        let period = Duration::from_millis(telemetry.flush_interval_ms());
        spawn_periodic("telemetry-flush", period, move || {
            let snapshot = telemetry.flush();
            tracing::info!(
                endpoint = telemetry.endpoint(),
                counters = ?snapshot.counters,
                gauges = ?snapshot.gauges,
                "telemetry flushed"
            );
        })
    }

    /// Run [`Self::tuning_tick`] every `period` in the background.
    pub fn spawn_tuning(self: &Arc<Self>, period: Duration) -> PeriodicTask {
        let orchestrator = Arc::clone(self);
        spawn_periodic("tuning", period, move || {
            orchestrator.tuning_tick();
        })
    }
}
