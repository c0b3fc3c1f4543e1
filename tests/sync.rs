use chrono::Utc;
use haven_guard::audit::{AuditEventKind, MemoryAuditSink};
use haven_guard::config::GuardConfig;
use haven_guard::crypto::AesGcmProvider;
use haven_guard::routing::validator::FixedValidator;
use haven_guard::service::{Collaborators, SecurityOrchestrator};
use haven_guard::sync::{ConflictStrategy, DataClassification, RecordMetadata, SyncPayload, SyncRecord, SyncStrategy};
use haven_guard::types::{DeviceId, ThreatLevel, UserId};
use haven_guard::GuardError;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

fn orchestrator(config: GuardConfig) -> (SecurityOrchestrator, Arc<MemoryAuditSink>) {
    let sink = Arc::new(MemoryAuditSink::new());
    let collaborators = Collaborators::new(
        Arc::new(FixedValidator::new("fast", 80.0, ThreatLevel::Low)),
        Arc::new(FixedValidator::new("deep", 95.0, ThreatLevel::Low)),
        Arc::new(AesGcmProvider::from_hex(KEY_HEX).unwrap()),
        sink.clone(),
    );
    (SecurityOrchestrator::new(config, collaborators).unwrap(), sink)
}

fn metadata(record: &SyncRecord, classification: DataClassification, version: u64) -> RecordMetadata {
    RecordMetadata {
        record_id: record.id.clone(),
        record_type: record.record_type.clone(),
        owner_id: UserId("owner-1".into()),
        device_id: DeviceId("tablet-1".into()),
        version,
        classification,
        sync_strategy: SyncStrategy::Batched,
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn payload_survives_the_remote_store_as_json() {
    let (guard, _) = orchestrator(GuardConfig::default());
    let record = SyncRecord::new("mood-2024-05-01", "mood_log")
        .with_field("score", json!(3))
        .with_field("note", json!("tired but okay"));
    let meta = metadata(&record, DataClassification::Personal, 1);

    let payload = guard.package_for_upload(&record, &meta).await.unwrap();
    let stored = serde_json::to_string(&payload).unwrap();
    assert!(!stored.contains("tired but okay"));

    let fetched: SyncPayload = serde_json::from_str(&stored).unwrap();
    assert_eq!(guard.unpack_from_download(&fetched, &meta).await.unwrap(), record);
}

#[tokio::test]
async fn payload_for_one_record_cannot_stand_in_for_another() {
    let (guard, _) = orchestrator(GuardConfig::default());
    let a = SyncRecord::new("rec-a", "journal_entry").with_field("text", json!("a"));
    let b = SyncRecord::new("rec-b", "journal_entry").with_field("text", json!("b"));
    let payload_a = guard
        .package_for_upload(&a, &metadata(&a, DataClassification::Personal, 1))
        .await
        .unwrap();

    let err = guard
        .unpack_from_download(&payload_a, &metadata(&b, DataClassification::Personal, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, GuardError::Consistency { field: "record_id", .. }));
}

#[tokio::test]
async fn merge_conflict_bumps_version_and_audits() {
    let (guard, sink) = orchestrator(GuardConfig::default());
    let client = SyncRecord::new("plan-1", "safety_plan")
        .with_field("contacts", json!(["sam", "jo"]))
        .with_field("reasons", json!(["my dog"]));
    let server = SyncRecord::new("plan-1", "safety_plan")
        .with_field("contacts", json!(["sam"]))
        .with_field("places", json!(["library"]));
    let cp = guard
        .package_for_upload(&client, &metadata(&client, DataClassification::Clinical, 4))
        .await
        .unwrap();
    let sp = guard
        .package_for_upload(&server, &metadata(&server, DataClassification::Clinical, 7))
        .await
        .unwrap();

    let resolved = guard.resolve_conflict(&cp, &sp, ConflictStrategy::Merge).await.unwrap();
    assert_eq!(resolved.metadata.version, 8);
    assert_eq!(resolved.metadata.sync_strategy, SyncStrategy::Immediate);
    assert_eq!(
        resolved.record,
        SyncRecord::new("plan-1", "safety_plan")
            .with_field("contacts", json!(["sam", "jo"]))
            .with_field("places", json!(["library"]))
            .with_field("reasons", json!(["my dog"]))
    );
    assert!(resolved.payload.conflict_data.is_some());

    let kinds = sink.kinds();
    assert_eq!(
        kinds.iter().filter(|k| **k == AuditEventKind::ClinicalRecordPackaged).count(),
        2
    );
    assert!(kinds.contains(&AuditEventKind::ConflictResolved));
}

#[tokio::test]
async fn slow_network_shrinks_batches_on_tick() {
    let (guard, _) = orchestrator(GuardConfig::default());
    let before = guard.sync().tuning_state();
    for _ in 0..10 {
        guard.sync().record_round_trip(5_000.0);
    }
    let report = guard.tuning_tick();
    assert!(report.sync.after.batch_size < before.batch_size);
    assert_eq!(guard.sync().tuning_state(), report.sync.after);
}
