use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::telemetry::TelemetryHandle;
use crate::types::{RiskLevel, SessionId};

pub mod ledger;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    AuthSuccess,
    AuthFailure,
    SessionGranted,
    SessionExtended,
    SessionExpired,
    SessionRevoked,
    OperationDenied,
    DegradedModeActivated,
    DegradedModeDeactivated,
    ClinicalRecordPackaged,
    ConflictResolved,
}

impl AuditEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEventKind::AuthSuccess => "auth_success",
            AuditEventKind::AuthFailure => "auth_failure",
            AuditEventKind::SessionGranted => "session_granted",
            AuditEventKind::SessionExtended => "session_extended",
            AuditEventKind::SessionExpired => "session_expired",
            AuditEventKind::SessionRevoked => "session_revoked",
            AuditEventKind::OperationDenied => "operation_denied",
            AuditEventKind::DegradedModeActivated => "degraded_mode_activated",
            AuditEventKind::DegradedModeDeactivated => "degraded_mode_deactivated",
            AuditEventKind::ClinicalRecordPackaged => "clinical_record_packaged",
            AuditEventKind::ConflictResolved => "conflict_resolved",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFlags {
    /// Event touches protected health information.
    pub phi_involved: bool,
    /// A control was bypassed to preserve availability.
    pub emergency_override: bool,
    /// Needs human review after the crisis window closes.
    pub requires_review: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmergencyAuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<SessionId>,
    pub kind: AuditEventKind,
    pub operation: String,
    pub risk_level: RiskLevel,
    pub bypassed_controls: Vec<String>,
    pub compliance_flags: ComplianceFlags,
}

impl EmergencyAuditEvent {
    pub fn new(
        kind: AuditEventKind,
        session_id: Option<SessionId>,
        operation: impl Into<String>,
        risk_level: RiskLevel,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("aud_{:016x}", rand::thread_rng().gen::<u64>()),
            timestamp,
            session_id,
            kind,
            operation: operation.into(),
            risk_level,
            bypassed_controls: Vec::new(),
            compliance_flags: ComplianceFlags::default(),
        }
    }

    pub fn with_bypassed(mut self, controls: Vec<String>) -> Self {
        if !controls.is_empty() {
            self.compliance_flags.emergency_override = true;
            self.compliance_flags.requires_review = true;
        }
        self.bypassed_controls = controls;
        self
    }

    pub fn with_flags(mut self, flags: ComplianceFlags) -> Self {
        self.compliance_flags = flags;
        self
    }
}

/// Append-only destination for audit events. Persistence lives behind this seam.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: EmergencyAuditEvent) -> anyhow::Result<()>;
}

/// Result of one audit emission. Callers decide what a gap means for them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum AuditOutcome {
    Ok,
    TimedOut,
    Failed(String),
}

impl AuditOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, AuditOutcome::Ok)
    }
}

/// An event that did not reach the sink and still needs to be reconciled.
#[derive(Clone, Debug, Serialize)]
pub struct AuditGap {
    pub event: EmergencyAuditEvent,
    pub outcome: AuditOutcome,
}

/// Gaps held for reconciliation before the oldest start being dropped.
pub const DEFAULT_GAP_CAPACITY: usize = 10_000;

/// Fail-open front end for an [`AuditSink`]: bounded wait, gaps queued for later.
///
/// The gap queue holds at most `gap_capacity` events. Past that the oldest
/// gap is dropped and counted in `audit.gaps_dropped`.
pub struct AuditDispatcher {
    sink: Arc<dyn AuditSink>,
    timeout: Duration,
    gaps: Mutex<VecDeque<AuditGap>>,
    gap_capacity: usize,
    telemetry: TelemetryHandle,
}

impl AuditDispatcher {
    pub fn new(sink: Arc<dyn AuditSink>, timeout: Duration, telemetry: TelemetryHandle) -> Self {
        Self {
            sink,
            timeout,
            gaps: Mutex::new(VecDeque::new()),
            gap_capacity: DEFAULT_GAP_CAPACITY,
            telemetry,
        }
    }

    pub fn with_gap_capacity(mut self, capacity: usize) -> Self {
        self.gap_capacity = capacity.max(1);
        self
    }

    fn queue_gaps(&self, gaps: impl IntoIterator<Item = AuditGap>) {
        let mut queue = self.gaps.lock();
        queue.extend(gaps);
        while queue.len() > self.gap_capacity {
            if let Some(dropped) = queue.pop_front() {
                tracing::error!(
                    event_id = %dropped.event.id,
                    kind = dropped.event.kind.as_str(),
                    "audit gap queue full; dropping oldest unreconciled event"
                );
                self.telemetry.incr("audit.gaps_dropped");
            }
        }
    }

    pub async fn emit(&self, event: EmergencyAuditEvent) -> AuditOutcome {
        let outcome = match tokio::time::timeout(self.timeout, self.sink.append(event.clone())).await {
            Ok(Ok(())) => AuditOutcome::Ok,
            Ok(Err(err)) => AuditOutcome::Failed(err.to_string()),
            Err(_) => AuditOutcome::TimedOut,
        };
        if outcome.is_ok() {
            self.telemetry.incr("audit.appended");
        } else {
            tracing::warn!(
                event_id = %event.id,
                kind = event.kind.as_str(),
                ?outcome,
                "audit append did not complete; queued for reconciliation"
            );
            self.telemetry.incr("audit.gaps");
            self.queue_gaps([AuditGap {
                event,
                outcome: outcome.clone(),
            }]);
        }
        outcome
    }

    pub fn gap_count(&self) -> usize {
        self.gaps.lock().len()
    }

    pub fn pending_gaps(&self) -> Vec<AuditGap> {
        self.gaps.lock().iter().cloned().collect()
    }

    /// Retry every queued gap once. Returns how many were delivered.
    pub async fn reconcile(&self) -> usize {
        let pending = std::mem::take(&mut *self.gaps.lock());
        let mut delivered = 0;
        let mut still_missing = Vec::new();
        for gap in pending {
            match tokio::time::timeout(self.timeout, self.sink.append(gap.event.clone())).await {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => still_missing.push(AuditGap {
                    event: gap.event,
                    outcome: AuditOutcome::Failed(err.to_string()),
                }),
                Err(_) => still_missing.push(AuditGap {
                    event: gap.event,
                    outcome: AuditOutcome::TimedOut,
                }),
            }
        }
        if !still_missing.is_empty() {
            self.queue_gaps(still_missing);
        }
        delivered
    }
}

/// No-op audit sink (useful for demos).
#[derive(Clone, Debug, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn append(&self, _event: EmergencyAuditEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<EmergencyAuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EmergencyAuditEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<AuditEventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, event: EmergencyAuditEvent) -> anyhow::Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Fan-out sink for emitting to multiple audit backends.
///
/// Every backend is attempted concurrently; the first error is reported after
/// all of them finish.
pub struct CompositeAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AuditSink for CompositeAuditSink {
    async fn append(&self, event: EmergencyAuditEvent) -> anyhow::Result<()> {
        let results = join_all(self.sinks.iter().map(|sink| sink.append(event.clone()))).await;
        results.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StallingSink;

    #[async_trait]
    impl AuditSink for StallingSink {
        async fn append(&self, _event: EmergencyAuditEvent) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    /// Fails until switched on.
    #[derive(Default)]
    struct FlakySink {
        healthy: AtomicBool,
        inner: MemoryAuditSink,
    }

    #[async_trait]
    impl AuditSink for FlakySink {
        async fn append(&self, event: EmergencyAuditEvent) -> anyhow::Result<()> {
            if !self.healthy.load(Ordering::SeqCst) {
                anyhow::bail!("audit store unavailable");
            }
            self.inner.append(event).await
        }
    }

    fn event(kind: AuditEventKind) -> EmergencyAuditEvent {
        EmergencyAuditEvent::new(kind, None, "test", RiskLevel::Low, Utc::now())
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_sink_times_out_and_records_gap() {
        let dispatcher = AuditDispatcher::new(
            Arc::new(StallingSink),
            Duration::from_millis(50),
            TelemetryHandle::default(),
        );
        let outcome = dispatcher.emit(event(AuditEventKind::SessionGranted)).await;
        assert_eq!(outcome, AuditOutcome::TimedOut);
        assert_eq!(dispatcher.gap_count(), 1);
    }

    #[tokio::test]
    async fn failed_appends_reconcile_once_sink_recovers() {
        let sink = Arc::new(FlakySink::default());
        let dispatcher = AuditDispatcher::new(sink.clone(), Duration::from_millis(50), TelemetryHandle::default());

        let outcome = dispatcher.emit(event(AuditEventKind::AuthSuccess)).await;
        assert!(matches!(outcome, AuditOutcome::Failed(_)));
        assert_eq!(dispatcher.reconcile().await, 0);
        assert_eq!(dispatcher.gap_count(), 1);

        sink.healthy.store(true, Ordering::SeqCst);
        assert_eq!(dispatcher.reconcile().await, 1);
        assert_eq!(dispatcher.gap_count(), 0);
        assert_eq!(sink.inner.kinds(), vec![AuditEventKind::AuthSuccess]);
    }

    #[tokio::test]
    async fn gap_queue_drops_oldest_past_capacity() {
        let telemetry = TelemetryHandle::default();
        let dispatcher = AuditDispatcher::new(Arc::new(FlakySink::default()), Duration::from_millis(50), telemetry.clone())
            .with_gap_capacity(2);
        for kind in [AuditEventKind::AuthFailure, AuditEventKind::SessionGranted, AuditEventKind::SessionExpired] {
            dispatcher.emit(event(kind)).await;
        }
        let kinds: Vec<_> = dispatcher.pending_gaps().into_iter().map(|gap| gap.event.kind).collect();
        assert_eq!(kinds, vec![AuditEventKind::SessionGranted, AuditEventKind::SessionExpired]);
        assert_eq!(telemetry.counter("audit.gaps_dropped"), 1);
    }

    #[tokio::test]
    async fn composite_fans_out() {
        let a = Arc::new(MemoryAuditSink::new());
        let b = Arc::new(MemoryAuditSink::new());
        let composite = CompositeAuditSink::new(vec![a.clone(), b.clone()]);
        composite.append(event(AuditEventKind::SessionRevoked)).await.unwrap();
        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);
    }

    #[tokio::test]
    async fn composite_reaches_healthy_sinks_past_a_broken_one() {
        let broken = Arc::new(FlakySink::default());
        let healthy = Arc::new(MemoryAuditSink::new());
        let sinks: Vec<Arc<dyn AuditSink>> = vec![broken, healthy.clone()];
        let composite = CompositeAuditSink::new(sinks);
        assert!(composite.append(event(AuditEventKind::AuthFailure)).await.is_err());
        assert_eq!(healthy.kinds(), vec![AuditEventKind::AuthFailure]);
    }

    #[test]
    fn bypassed_controls_raise_compliance_flags() {
        let e = event(AuditEventKind::SessionGranted).with_bypassed(vec!["emergency_pin".into()]);
        assert!(e.compliance_flags.emergency_override);
        assert!(e.compliance_flags.requires_review);
    }
}
