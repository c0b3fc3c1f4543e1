use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use tokio::time::Instant;

use crate::audit::{AuditDispatcher, AuditEventKind, AuditGap, AuditSink, EmergencyAuditEvent};
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::{GuardError, GuardResult};
use crate::session::authenticator::{AuthAttempt, Authenticator};
use crate::session::degraded::{DegradedMode, DegradedTrigger};
use crate::session::policy;
use crate::session::types::{
    AccessLevel, AuthMethod, EmergencySession, EmergencySessionRequest, EmergencySessionResult, Operation,
    SessionValidation, Severity,
};
use crate::telemetry::TelemetryHandle;
use crate::types::{CrisisEventId, RiskLevel, SessionId};

const FALLBACK_OPTIONS: [&str; 4] = [
    "call the crisis hotline, reachable without a session",
    "retry with the emergency PIN",
    "enter a one-time emergency code",
    "ask a trusted contact to reach out",
];

fn fallback_options() -> Vec<String> {
    FALLBACK_OPTIONS.iter().map(|s| s.to_string()).collect()
}

fn saturating_add(at: DateTime<Utc>, by: chrono::Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

struct Grant {
    method: AuthMethod,
    authenticated: bool,
    forced: bool,
    bypassed_controls: Vec<String>,
}

/// Owns the active-session table and the emergency audit trail.
///
/// Every attempt, grant, extension, expiry, and revocation is handed to the
/// audit dispatcher before the caller sees a result. A slow or failing sink
/// only produces a reconciliation gap.
pub struct EmergencySessionManager {
    config: SessionConfig,
    /// Sorted into [`AuthMethod::ORDER`].
    authenticators: Vec<Arc<dyn Authenticator>>,
    sessions: DashMap<SessionId, EmergencySession>,
    by_event: DashMap<CrisisEventId, SessionId>,
    creation_locks: DashMap<CrisisEventId, Arc<tokio::sync::Mutex<()>>>,
    audit: AuditDispatcher,
    degraded: DegradedMode,
    clock: Arc<dyn Clock>,
    telemetry: TelemetryHandle,
}

impl EmergencySessionManager {
    pub fn new(
        config: SessionConfig,
        mut authenticators: Vec<Arc<dyn Authenticator>>,
        audit_sink: Arc<dyn AuditSink>,
        degraded: DegradedMode,
        clock: Arc<dyn Clock>,
        telemetry: TelemetryHandle,
    ) -> GuardResult<Self> {
        config.validate()?;
        authenticators.sort_by_key(|a| a.method());
        let audit = AuditDispatcher::new(audit_sink, config.audit_timeout(), telemetry.clone());
        Ok(Self {
            config,
            authenticators,
            sessions: DashMap::new(),
            by_event: DashMap::new(),
            creation_locks: DashMap::new(),
            audit,
            degraded,
            clock,
            telemetry,
        })
    }

    async fn emit(&self, event: EmergencyAuditEvent, gaps: &mut usize) {
        if !self.audit.emit(event).await.is_ok() {
            *gaps += 1;
        }
    }

    fn publish_active_gauge(&self) {
        self.telemetry.set_gauge("session.active", self.sessions.len() as f64);
    }

    /// Authenticate and open a session for one crisis event.
    ///
    /// Concurrent calls for the same `crisis_event_id` are serialized; later
    /// callers get the session the first one created.
    pub async fn create_emergency_session(&self, request: &EmergencySessionRequest) -> EmergencySessionResult {
        let started = Instant::now();
        let event_id = request.crisis_event_id.clone();
        let lock = self
            .creation_locks
            .entry(event_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        let mut result = {
            let _guard = lock.lock().await;
            match self.live_session_for_event(&event_id).await {
                Some(existing) => {
                    tracing::debug!(session_id = %existing.id, "returning existing session for crisis event");
                    self.telemetry.incr("session.reused");
                    EmergencySessionResult {
                        success: true,
                        method: Some(existing.auth_method),
                        forced: false,
                        reused: true,
                        bypassed_controls: existing.bypassed_controls.clone(),
                        fallback_options: Vec::new(),
                        audit_gaps: 0,
                        latency_ms: 0.0,
                        session: Some(existing),
                    }
                }
                None => self.authenticate_and_grant(request).await,
            }
        };

        drop(lock);
        // Only the map holds the lock now, so nobody is waiting on it.
        self.creation_locks
            .remove_if(&event_id, |_, lock| Arc::strong_count(lock) == 1);

        result.latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
        self.telemetry
            .record_latency_ms("session.create", result.latency_ms.round() as u64);
        result
    }

    async fn live_session_for_event(&self, event_id: &CrisisEventId) -> Option<EmergencySession> {
        let session_id = self.by_event.get(event_id).map(|id| id.clone())?;
        let session = self.sessions.get(&session_id).map(|s| s.clone())?;
        if session.is_expired(self.clock.now()) {
            self.expire(&session_id).await;
            return None;
        }
        Some(session)
    }

    async fn authenticate_and_grant(&self, request: &EmergencySessionRequest) -> EmergencySessionResult {
        let risk = request.severity.risk_level();
        let mut gaps = 0;
        let mut succeeded: Option<(AuthMethod, AuthAttempt)> = None;

        for authenticator in &self.authenticators {
            let method = authenticator.method();
            let attempt =
                match tokio::time::timeout(self.config.auth_attempt_timeout(), authenticator.attempt(request)).await {
                    Ok(Ok(attempt)) => attempt,
                    Ok(Err(err)) => {
                        tracing::warn!(method = method.as_str(), error = %err, "authenticator raised");
                        AuthAttempt::failed()
                    }
                    Err(_) => {
                        tracing::warn!(method = method.as_str(), "authenticator timed out");
                        AuthAttempt::failed()
                    }
                };
            let kind = if attempt.success {
                AuditEventKind::AuthSuccess
            } else {
                AuditEventKind::AuthFailure
            };
            let event = EmergencyAuditEvent::new(
                kind,
                None,
                format!("authenticate:{}", method.as_str()),
                risk,
                self.clock.now(),
            )
            .with_bypassed(attempt.bypassed_controls.clone());
            self.emit(event, &mut gaps).await;

            if attempt.success {
                succeeded = Some((method, attempt));
                break;
            }
        }

        let critical = request.severity == Severity::Critical;
        let always_allow = self.config.is_always_allow(&request.crisis_type);

        let grant = match succeeded {
            Some((method, attempt)) => {
                self.degraded.record_auth_success();
                Grant {
                    method,
                    authenticated: !method.is_weak(),
                    forced: false,
                    bypassed_controls: attempt.bypassed_controls,
                }
            }
            None => {
                self.telemetry.incr("session.auth_failures");
                let now = self.clock.now();
                if self
                    .degraded
                    .record_auth_failure(self.config.systemic_failure_threshold, now)
                {
                    let consecutive = self.degraded.status().consecutive_auth_failures;
                    tracing::warn!(
                        consecutive_failures = consecutive,
                        "systemic emergency authentication failure; degraded mode activated"
                    );
                    self.telemetry.incr("session.degraded_activations");
                    let event = EmergencyAuditEvent::new(
                        AuditEventKind::DegradedModeActivated,
                        None,
                        "degraded_mode:systemic_auth_failure",
                        RiskLevel::High,
                        now,
                    );
                    self.emit(event, &mut gaps).await;
                }

                if !(critical || always_allow) {
                    tracing::info!(
                        crisis_event_id = %request.crisis_event_id.0,
                        severity = ?request.severity,
                        "emergency authentication failed; offering fallback options"
                    );
                    return EmergencySessionResult {
                        success: false,
                        session: None,
                        method: None,
                        forced: false,
                        reused: false,
                        bypassed_controls: Vec::new(),
                        fallback_options: fallback_options(),
                        audit_gaps: gaps,
                        latency_ms: 0.0,
                    };
                }

                Grant {
                    method: AuthMethod::DeviceFallback,
                    authenticated: false,
                    forced: true,
                    bypassed_controls: AuthMethod::ORDER.iter().map(|m| m.control().to_string()).collect(),
                }
            }
        };

        self.grant(request, grant, gaps).await
    }

    async fn grant(&self, request: &EmergencySessionRequest, grant: Grant, mut gaps: usize) -> EmergencySessionResult {
        let now = self.clock.now();
        let always_allow = self.config.is_always_allow(&request.crisis_type);
        let critical = request.severity == Severity::Critical;
        // A weak fallback that succeeded must not leave the caller worse off
        // than a forced grant would have.
        let access_level = if grant.forced || (!grant.authenticated && (critical || always_allow)) {
            AccessLevel::CrisisOnly
        } else {
            policy::access_level(grant.authenticated, request.severity, always_allow)
        };
        let session = EmergencySession {
            id: SessionId(format!("ems_{:016x}", rand::thread_rng().gen::<u64>())),
            crisis_event_id: request.crisis_event_id.clone(),
            device_id: request.device_id.clone(),
            user_id: request.user_id.clone(),
            crisis_type: request.crisis_type,
            severity: request.severity,
            created_at: now,
            expires_at: saturating_add(now, self.config.default_duration()),
            last_activity_at: now,
            access_level,
            allowed_operations: policy::allowed_operations(access_level).to_vec(),
            restricted_operations: policy::restricted_operations(access_level),
            audit_level: policy::audit_level(access_level, !grant.bypassed_controls.is_empty()),
            auth_method: grant.method,
            authenticated: grant.authenticated,
            bypassed_controls: grant.bypassed_controls.clone(),
        };

        self.sessions.insert(session.id.clone(), session.clone());
        self.by_event
            .insert(session.crisis_event_id.clone(), session.id.clone());
        self.publish_active_gauge();
        self.telemetry.incr("session.granted");
        if grant.forced {
            self.telemetry.incr("session.forced");
        }
        tracing::info!(
            session_id = %session.id,
            access_level = access_level.as_str(),
            method = grant.method.as_str(),
            forced = grant.forced,
            "emergency session granted"
        );

        let event = EmergencyAuditEvent::new(
            AuditEventKind::SessionGranted,
            Some(session.id.clone()),
            format!("grant:{}", access_level.as_str()),
            request.severity.risk_level(),
            now,
        )
        .with_bypassed(grant.bypassed_controls.clone());
        self.emit(event, &mut gaps).await;

        EmergencySessionResult {
            success: true,
            session: Some(session),
            method: Some(grant.method),
            forced: grant.forced,
            reused: false,
            bypassed_controls: grant.bypassed_controls,
            fallback_options: if grant.forced { fallback_options() } else { Vec::new() },
            audit_gaps: gaps,
            latency_ms: 0.0,
        }
    }

    /// Remove a session that has run past its expiry. Returns false if it was already gone.
    async fn expire(&self, session_id: &SessionId) -> bool {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return false;
        };
        self.by_event
            .remove_if(&session.crisis_event_id, |_, id| id == session_id);
        self.publish_active_gauge();
        self.telemetry.incr("session.expired");
        tracing::info!(session_id = %session.id, expires_at = %session.expires_at, "emergency session expired");
        let event = EmergencyAuditEvent::new(
            AuditEventKind::SessionExpired,
            Some(session.id.clone()),
            "expire",
            session.severity.risk_level(),
            self.clock.now(),
        );
        self.audit.emit(event).await;
        true
    }

    fn snapshot(&self, session_id: &SessionId) -> Option<EmergencySession> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Live copy of a session, or `None` if it is unknown, revoked, or expired.
    pub fn session(&self, session_id: &SessionId) -> Option<EmergencySession> {
        let now = self.clock.now();
        self.snapshot(session_id).filter(|s| !s.is_expired(now))
    }

    pub async fn validate_session(&self, session_id: &SessionId, operation: Operation) -> SessionValidation {
        let now = self.clock.now();
        let Some(session) = self.snapshot(session_id) else {
            return SessionValidation::invalid("unknown or revoked session");
        };
        if session.is_expired(now) {
            self.expire(session_id).await;
            return SessionValidation::invalid("session expired");
        }

        let mut reason = None;
        let mut allowed = session.allows(operation);
        if !allowed {
            reason = Some(format!(
                "{operation} is not permitted at {} access",
                session.access_level.as_str()
            ));
        } else if operation.requires_network() && !operation.is_essential() && self.degraded.is_active() {
            allowed = false;
            reason = Some(format!("{operation} is disabled while degraded mode is active"));
        }

        if allowed {
            if let Some(mut live) = self.sessions.get_mut(session_id) {
                live.last_activity_at = now;
            }
        } else {
            self.telemetry.incr("session.denied");
            let event = EmergencyAuditEvent::new(
                AuditEventKind::OperationDenied,
                Some(session.id.clone()),
                operation.as_str(),
                session.severity.risk_level(),
                now,
            );
            self.audit.emit(event).await;
        }

        SessionValidation {
            valid: true,
            allowed,
            time_remaining: session.time_remaining(now),
            access_level: Some(session.access_level),
            reason,
        }
    }

    /// Push a session's expiry out by up to `max-extension-secs`, never past
    /// `created_at + max-total-duration-secs`. The operation that motivates the
    /// extension must be allowed for the session.
    pub async fn extend_session(
        &self,
        session_id: &SessionId,
        operation: Operation,
        additional: chrono::Duration,
    ) -> GuardResult<EmergencySession> {
        if additional <= chrono::Duration::zero() {
            return Err(GuardError::Validation("extension must be positive".into()));
        }
        let now = self.clock.now();
        let Some(session) = self.snapshot(session_id) else {
            return Err(GuardError::Validation(format!("unknown session {session_id}")));
        };
        if session.is_expired(now) {
            self.expire(session_id).await;
            return Err(GuardError::Validation(format!("session {session_id} has expired")));
        }
        if !session.allows(operation) {
            let event = EmergencyAuditEvent::new(
                AuditEventKind::OperationDenied,
                Some(session.id.clone()),
                format!("extend:{operation}"),
                session.severity.risk_level(),
                now,
            );
            self.audit.emit(event).await;
            return Err(GuardError::Validation(format!(
                "{operation} is not permitted for session {session_id}"
            )));
        }

        let additional = additional.min(self.config.max_extension());
        let cap = saturating_add(session.created_at, self.config.max_total_duration());
        let extended = {
            let Some(mut live) = self.sessions.get_mut(session_id) else {
                return Err(GuardError::Validation(format!("unknown session {session_id}")));
            };
            let target = saturating_add(live.expires_at, additional).min(cap);
            if target <= live.expires_at {
                return Err(GuardError::Validation(format!(
                    "session {session_id} is already at its maximum lifetime"
                )));
            }
            live.expires_at = target;
            live.last_activity_at = now;
            live.clone()
        };

        self.telemetry.incr("session.extended");
        tracing::info!(session_id = %extended.id, expires_at = %extended.expires_at, "emergency session extended");
        let event = EmergencyAuditEvent::new(
            AuditEventKind::SessionExtended,
            Some(extended.id.clone()),
            format!("extend:{operation}"),
            extended.severity.risk_level(),
            now,
        );
        self.audit.emit(event).await;
        Ok(extended)
    }

    pub async fn revoke_session(&self, session_id: &SessionId, reason: &str) -> GuardResult<EmergencySession> {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return Err(GuardError::Validation(format!("unknown session {session_id}")));
        };
        self.by_event
            .remove_if(&session.crisis_event_id, |_, id| id == session_id);
        self.publish_active_gauge();
        self.telemetry.incr("session.revoked");
        tracing::info!(session_id = %session.id, reason, "emergency session revoked");
        let event = EmergencyAuditEvent::new(
            AuditEventKind::SessionRevoked,
            Some(session.id.clone()),
            format!("revoke:{reason}"),
            session.severity.risk_level(),
            self.clock.now(),
        );
        self.audit.emit(event).await;
        Ok(session)
    }

    /// Expire every session past its deadline. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let due: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        let mut removed = 0;
        for id in due {
            if self.expire(&id).await {
                removed += 1;
            }
        }
        removed
    }

    pub fn active_session_count(&self) -> usize {
        let now = self.clock.now();
        self.sessions
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    pub fn audit_gaps(&self) -> Vec<AuditGap> {
        self.audit.pending_gaps()
    }

    pub async fn reconcile_audit(&self) -> usize {
        self.audit.reconcile().await
    }

    pub fn degraded_mode(&self) -> &DegradedMode {
        &self.degraded
    }

    pub async fn activate_degraded_mode(&self, reason: &str) -> bool {
        let now = self.clock.now();
        let activated = self.degraded.activate(
            DegradedTrigger::Explicit {
                reason: reason.to_string(),
            },
            now,
        );
        if activated {
            tracing::warn!(reason, "degraded mode activated");
            self.telemetry.incr("session.degraded_activations");
            let event = EmergencyAuditEvent::new(
                AuditEventKind::DegradedModeActivated,
                None,
                format!("degraded_mode:{reason}"),
                RiskLevel::High,
                now,
            );
            self.audit.emit(event).await;
        }
        activated
    }

    pub async fn deactivate_degraded_mode(&self, actor: &str) -> bool {
        let deactivated = self.degraded.deactivate();
        if deactivated {
            tracing::info!(actor, "degraded mode cleared");
            let event = EmergencyAuditEvent::new(
                AuditEventKind::DegradedModeDeactivated,
                None,
                format!("degraded_mode_cleared_by:{actor}"),
                RiskLevel::Medium,
                self.clock.now(),
            );
            self.audit.emit(event).await;
        }
        deactivated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::clock::ManualClock;
    use crate::session::types::{CrisisType, EmergencyCredentials};
    use crate::types::DeviceId;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    struct Scripted {
        method: AuthMethod,
        success: bool,
    }

    #[async_trait]
    impl Authenticator for Scripted {
        fn method(&self) -> AuthMethod {
            self.method
        }

        async fn attempt(&self, _request: &EmergencySessionRequest) -> anyhow::Result<AuthAttempt> {
            Ok(if self.success {
                AuthAttempt::succeeded()
            } else {
                AuthAttempt::failed()
            })
        }
    }

    fn all_failing() -> Vec<Arc<dyn Authenticator>> {
        AuthMethod::ORDER
            .iter()
            .map(|&method| Arc::new(Scripted { method, success: false }) as Arc<dyn Authenticator>)
            .collect()
    }

    fn request(event: &str, crisis_type: CrisisType, severity: Severity) -> EmergencySessionRequest {
        EmergencySessionRequest {
            crisis_event_id: CrisisEventId(event.into()),
            device_id: DeviceId("phone-1".into()),
            user_id: None,
            crisis_type,
            severity,
            credentials: EmergencyCredentials::default(),
        }
    }

    fn manager(
        authenticators: Vec<Arc<dyn Authenticator>>,
    ) -> (EmergencySessionManager, Arc<MemoryAuditSink>, Arc<ManualClock>) {
        let sink = Arc::new(MemoryAuditSink::new());
        let clock = Arc::new(ManualClock::default());
        let manager = EmergencySessionManager::new(
            SessionConfig::default(),
            authenticators,
            sink.clone(),
            DegradedMode::new(),
            clock.clone(),
            TelemetryHandle::default(),
        )
        .unwrap();
        (manager, sink, clock)
    }

    #[tokio::test]
    async fn methods_are_tried_in_fixed_order_and_short_circuit() {
        let authenticators: Vec<Arc<dyn Authenticator>> = vec![
            Arc::new(Scripted {
                method: AuthMethod::DeviceFallback,
                success: true,
            }),
            Arc::new(Scripted {
                method: AuthMethod::EmergencyPin,
                success: true,
            }),
            Arc::new(Scripted {
                method: AuthMethod::BiometricBypass,
                success: false,
            }),
        ];
        let (manager, sink, _) = manager(authenticators);
        let result = manager
            .create_emergency_session(&request("evt-1", CrisisType::PanicAttack, Severity::Critical))
            .await;

        assert_eq!(result.method, Some(AuthMethod::EmergencyPin));
        let session = result.session.unwrap();
        assert!(session.authenticated);
        assert_eq!(session.access_level, AccessLevel::Full);
        assert_eq!(
            sink.kinds(),
            vec![
                AuditEventKind::AuthFailure,
                AuditEventKind::AuthSuccess,
                AuditEventKind::SessionGranted
            ]
        );
    }

    #[tokio::test]
    async fn always_allow_crisis_is_granted_when_every_method_fails() {
        let (manager, sink, _) = manager(all_failing());
        let result = manager
            .create_emergency_session(&request("evt-2", CrisisType::SelfHarm, Severity::Moderate))
            .await;

        assert!(result.success);
        assert!(result.forced);
        let session = result.session.unwrap();
        assert_eq!(session.access_level, AccessLevel::CrisisOnly);
        assert_eq!(session.auth_method, AuthMethod::DeviceFallback);
        assert!(!session.authenticated);
        assert_eq!(session.bypassed_controls.len(), AuthMethod::ORDER.len());
        let granted = sink
            .events()
            .into_iter()
            .find(|e| e.kind == AuditEventKind::SessionGranted)
            .unwrap();
        assert!(granted.compliance_flags.emergency_override);
        assert!(granted.compliance_flags.requires_review);
    }

    #[tokio::test]
    async fn non_critical_failure_returns_fallback_options() {
        let (manager, _, _) = manager(all_failing());
        let result = manager
            .create_emergency_session(&request("evt-3", CrisisType::PanicAttack, Severity::High))
            .await;
        assert!(!result.success);
        assert!(result.session.is_none());
        assert!(!result.fallback_options.is_empty());
        assert_eq!(manager.active_session_count(), 0);
    }

    #[tokio::test]
    async fn device_fallback_success_counts_as_unauthenticated() {
        let authenticators: Vec<Arc<dyn Authenticator>> = vec![Arc::new(Scripted {
            method: AuthMethod::DeviceFallback,
            success: true,
        })];
        let (manager, _, _) = manager(authenticators);
        let result = manager
            .create_emergency_session(&request("evt-4", CrisisType::PanicAttack, Severity::Moderate))
            .await;
        let session = result.session.unwrap();
        assert!(!session.authenticated);
        assert_eq!(session.access_level, AccessLevel::Degraded);
    }

    #[tokio::test]
    async fn expired_session_is_rejected_without_explicit_revocation() {
        let (manager, sink, clock) = manager(all_failing());
        let session = manager
            .create_emergency_session(&request("evt-5", CrisisType::SuicidalIdeation, Severity::Critical))
            .await
            .session
            .unwrap();

        let live = manager.validate_session(&session.id, Operation::CrisisHotline).await;
        assert!(live.valid && live.allowed);

        clock.advance(chrono::Duration::seconds(SessionConfig::default().default_duration_secs as i64 + 1));
        let stale = manager.validate_session(&session.id, Operation::CrisisHotline).await;
        assert!(!stale.valid);
        assert!(!stale.allowed);
        assert_eq!(manager.active_session_count(), 0);
        assert!(sink.kinds().contains(&AuditEventKind::SessionExpired));
    }

    #[tokio::test]
    async fn extensions_are_capped_by_total_lifetime() {
        let (manager, _, clock) = manager(all_failing());
        let session = manager
            .create_emergency_session(&request("evt-6", CrisisType::SelfHarm, Severity::High))
            .await
            .session
            .unwrap();
        let cap = session.created_at + SessionConfig::default().max_total_duration();

        let mut last = session.expires_at;
        loop {
            match manager
                .extend_session(&session.id, Operation::SafetyPlan, chrono::Duration::hours(2))
                .await
            {
                Ok(extended) => {
                    assert!(extended.expires_at > last);
                    assert!(extended.expires_at <= cap);
                    last = extended.expires_at;
                    clock.advance(chrono::Duration::minutes(1));
                }
                Err(err) => {
                    assert!(matches!(err, GuardError::Validation(_)));
                    break;
                }
            }
        }
        assert_eq!(last, cap);
    }

    #[tokio::test]
    async fn extension_requires_an_allowed_operation() {
        let (manager, _, _) = manager(all_failing());
        let session = manager
            .create_emergency_session(&request("evt-7", CrisisType::SelfHarm, Severity::High))
            .await
            .session
            .unwrap();
        let err = manager
            .extend_session(&session.id, Operation::PaymentSettings, chrono::Duration::minutes(10))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::Validation(_)));
    }

    #[tokio::test]
    async fn systemic_failures_flip_degraded_mode() {
        let (manager, sink, _) = manager(all_failing());
        let threshold = SessionConfig::default().systemic_failure_threshold;
        for i in 0..threshold {
            let result = manager
                .create_emergency_session(&request(&format!("evt-d{i}"), CrisisType::SelfHarm, Severity::Critical))
                .await;
            // crisis access is still granted while the failures pile up
            assert!(result.success);
        }
        assert!(manager.degraded_mode().is_active());
        assert!(sink.kinds().contains(&AuditEventKind::DegradedModeActivated));
    }

    #[tokio::test]
    async fn degraded_mode_blocks_non_essential_network_operations_until_cleared() {
        let authenticators: Vec<Arc<dyn Authenticator>> = vec![Arc::new(Scripted {
            method: AuthMethod::EmergencyPin,
            success: true,
        })];
        let (manager, _, _) = manager(authenticators);
        let session = manager
            .create_emergency_session(&request("evt-net", CrisisType::PanicAttack, Severity::Critical))
            .await
            .session
            .unwrap();
        assert_eq!(session.access_level, AccessLevel::Full);

        assert!(manager.activate_degraded_mode("upstream outage").await);
        let sync = manager.validate_session(&session.id, Operation::DataSync).await;
        assert!(sync.valid);
        assert!(!sync.allowed);
        assert!(manager.validate_session(&session.id, Operation::CrisisChat).await.allowed);
        assert!(manager.validate_session(&session.id, Operation::JournalWrite).await.allowed);

        assert!(manager.deactivate_degraded_mode("on-call").await);
        assert!(manager.validate_session(&session.id, Operation::DataSync).await.allowed);
    }

    #[tokio::test]
    async fn concurrent_requests_for_one_crisis_event_share_a_session() {
        let (manager, _, _) = manager(all_failing());
        let manager = Arc::new(manager);
        let req = request("evt-shared", CrisisType::SuicidalIdeation, Severity::Critical);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                let req = req.clone();
                tokio::spawn(async move { manager.create_emergency_session(&req).await })
            })
            .collect();

        let mut ids = Vec::new();
        let mut reused = 0;
        for handle in handles {
            let result = handle.await.unwrap();
            if result.reused {
                reused += 1;
            }
            ids.push(result.session.unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(reused, 7);
        assert_eq!(manager.active_session_count(), 1);
    }

    #[tokio::test]
    async fn revoke_and_sweep_remove_sessions() {
        let (manager, sink, clock) = manager(all_failing());
        let a = manager
            .create_emergency_session(&request("evt-r1", CrisisType::SelfHarm, Severity::High))
            .await
            .session
            .unwrap();
        let _b = manager
            .create_emergency_session(&request("evt-r2", CrisisType::SelfHarm, Severity::High))
            .await
            .session
            .unwrap();

        manager.revoke_session(&a.id, "resolved").await.unwrap();
        assert!(manager.revoke_session(&a.id, "again").await.is_err());
        assert_eq!(manager.active_session_count(), 1);

        clock.advance(chrono::Duration::hours(1));
        assert_eq!(manager.sweep_expired().await, 1);
        assert_eq!(manager.sweep_expired().await, 0);
        assert!(sink.kinds().contains(&AuditEventKind::SessionRevoked));
    }
}
