use async_trait::async_trait;
use chrono::Utc;
use haven_guard::audit::{AuditEventKind, AuditSink, EmergencyAuditEvent, MemoryAuditSink};
use haven_guard::clock::ManualClock;
use haven_guard::config::SessionConfig;
use haven_guard::session::authenticator::{
    DeviceFallbackAuthenticator, EmergencyCodeAuthenticator, EmergencyPinAuthenticator,
};
use haven_guard::session::manager::EmergencySessionManager;
use haven_guard::session::{
    AccessLevel, AuthMethod, Authenticator, CrisisType, DegradedMode, EmergencyCredentials, EmergencySessionRequest,
    Operation, Severity,
};
use haven_guard::telemetry::TelemetryHandle;
use haven_guard::types::{CrisisEventId, DeviceId};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Sink that refuses appends until switched back on.
#[derive(Default)]
struct FlakySink {
    down: AtomicBool,
    inner: MemoryAuditSink,
}

#[async_trait]
impl AuditSink for FlakySink {
    async fn append(&self, event: EmergencyAuditEvent) -> anyhow::Result<()> {
        if self.down.load(Ordering::SeqCst) {
            anyhow::bail!("audit store unreachable");
        }
        self.inner.append(event).await
    }
}

fn request(event: &str, severity: Severity, credentials: EmergencyCredentials) -> EmergencySessionRequest {
    EmergencySessionRequest {
        crisis_event_id: CrisisEventId(event.into()),
        device_id: DeviceId("phone-7".into()),
        user_id: None,
        crisis_type: CrisisType::PanicAttack,
        severity,
        credentials,
    }
}

fn manager(
    authenticators: Vec<Arc<dyn Authenticator>>,
    sink: Arc<dyn AuditSink>,
    clock: Arc<ManualClock>,
) -> EmergencySessionManager {
    EmergencySessionManager::new(
        SessionConfig::default(),
        authenticators,
        sink,
        DegradedMode::new(),
        clock,
        TelemetryHandle::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn pin_then_code_then_device_in_order() {
    let pin = Arc::new(EmergencyPinAuthenticator::new());
    pin.enroll(DeviceId("phone-7".into()), "2468");
    let codes = Arc::new(EmergencyCodeAuthenticator::new(["ALPHA-77"]));
    let device = Arc::new(DeviceFallbackAuthenticator::new([DeviceId("phone-7".into())]));
    let sink = Arc::new(MemoryAuditSink::new());
    let mgr = manager(
        vec![device, codes.clone(), pin],
        sink.clone(),
        Arc::new(ManualClock::new(Utc::now())),
    );

    let by_pin = mgr
        .create_emergency_session(&request(
            "e1",
            Severity::Critical,
            EmergencyCredentials {
                pin: Some("2468".into()),
                emergency_code: Some("ALPHA-77".into()),
                ..Default::default()
            },
        ))
        .await;
    assert_eq!(by_pin.method, Some(AuthMethod::EmergencyPin));
    assert_eq!(by_pin.session.unwrap().access_level, AccessLevel::Full);
    // the code was never tried, so it is still available
    assert_eq!(codes.remaining(), 1);

    let by_code = mgr
        .create_emergency_session(&request(
            "e2",
            Severity::High,
            EmergencyCredentials {
                emergency_code: Some("ALPHA-77".into()),
                ..Default::default()
            },
        ))
        .await;
    assert_eq!(by_code.method, Some(AuthMethod::EmergencyCode));
    assert_eq!(by_code.session.unwrap().access_level, AccessLevel::CrisisOnly);
    assert_eq!(codes.remaining(), 0);

    let by_device = mgr
        .create_emergency_session(&request("e3", Severity::High, EmergencyCredentials::default()))
        .await;
    assert_eq!(by_device.method, Some(AuthMethod::DeviceFallback));
    let session = by_device.session.unwrap();
    assert!(!session.authenticated);
    assert_eq!(session.access_level, AccessLevel::Degraded);
    assert!(session.bypassed_controls.contains(&"user_verification".to_string()));

    assert!(sink.kinds().contains(&AuditEventKind::AuthFailure));
    assert_eq!(
        sink.kinds()
            .iter()
            .filter(|k| **k == AuditEventKind::SessionGranted)
            .count(),
        3
    );
}

#[tokio::test]
async fn audit_outage_does_not_block_access_and_reconciles_later() {
    let sink = Arc::new(FlakySink::default());
    sink.down.store(true, Ordering::SeqCst);
    let mgr = manager(Vec::new(), sink.clone(), Arc::new(ManualClock::new(Utc::now())));

    let result = mgr
        .create_emergency_session(&request("e-outage", Severity::Critical, EmergencyCredentials::default()))
        .await;
    assert!(result.success);
    assert!(result.forced);
    assert!(result.audit_gaps > 0);
    let gaps = mgr.audit_gaps().len();
    assert_eq!(gaps, result.audit_gaps);

    sink.down.store(false, Ordering::SeqCst);
    assert_eq!(mgr.reconcile_audit().await, gaps);
    assert!(mgr.audit_gaps().is_empty());
    assert_eq!(sink.inner.events().len(), gaps);
}

#[tokio::test]
async fn session_expires_and_extension_is_capped() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let mgr = manager(Vec::new(), Arc::new(MemoryAuditSink::new()), clock.clone());
    let config = SessionConfig::default();

    let session = mgr
        .create_emergency_session(&request("e-long", Severity::Critical, EmergencyCredentials::default()))
        .await
        .session
        .unwrap();

    // keep extending well past the total budget
    let mut last = session.clone();
    for _ in 0..20 {
        clock.advance(chrono::Duration::minutes(20));
        match mgr
            .extend_session(&session.id, Operation::CrisisChat, chrono::Duration::hours(2))
            .await
        {
            Ok(extended) => {
                assert!(extended.expires_at - extended.created_at <= chrono::Duration::seconds(config.max_total_duration_secs as i64));
                last = extended;
            }
            Err(_) => break,
        }
    }
    assert_eq!(
        last.expires_at,
        session.created_at + chrono::Duration::seconds(config.max_total_duration_secs as i64)
    );

    clock.set(last.expires_at);
    let check = mgr.validate_session(&session.id, Operation::CrisisHotline).await;
    assert!(!check.valid);
    assert_eq!(mgr.active_session_count(), 0);
}

#[tokio::test]
async fn device_fallback_success_never_grants_less_than_total_failure() {
    let pin = Arc::new(EmergencyPinAuthenticator::new());
    pin.enroll(DeviceId("phone-7".into()), "2468");
    let device = Arc::new(DeviceFallbackAuthenticator::new([DeviceId("phone-7".into())]));
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let wrong_pin = EmergencyCredentials {
        pin: Some("0000".into()),
        ..Default::default()
    };

    let chain: Vec<Arc<dyn Authenticator>> = vec![pin.clone(), device];
    let with_device = manager(chain, Arc::new(MemoryAuditSink::new()), clock.clone());
    let by_device = with_device
        .create_emergency_session(&request("e-fallback", Severity::Critical, wrong_pin.clone()))
        .await;
    assert_eq!(by_device.method, Some(AuthMethod::DeviceFallback));
    assert!(!by_device.forced);

    let without_device = manager(vec![pin as Arc<dyn Authenticator>], Arc::new(MemoryAuditSink::new()), clock);
    let forced = without_device
        .create_emergency_session(&request("e-forced", Severity::Critical, wrong_pin))
        .await;
    assert!(forced.forced);

    let fallback_level = by_device.session.unwrap().access_level;
    let forced_level = forced.session.unwrap().access_level;
    assert_eq!(forced_level, AccessLevel::CrisisOnly);
    assert_eq!(fallback_level, forced_level);
}

#[test]
fn oversized_session_durations_are_rejected_up_front() {
    let config = SessionConfig {
        default_duration_secs: 9_000_000_000_000_000,
        max_total_duration_secs: 9_000_000_000_000_000,
        ..Default::default()
    };
    let result = EmergencySessionManager::new(
        config,
        Vec::new(),
        Arc::new(MemoryAuditSink::new()),
        DegradedMode::new(),
        Arc::new(ManualClock::new(Utc::now())),
        TelemetryHandle::default(),
    );
    assert!(result.is_err());
}
