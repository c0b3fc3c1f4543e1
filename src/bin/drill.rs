use anyhow::Context;
use clap::Parser;
use haven_guard::audit::ledger::HashChainAuditSink;
use haven_guard::audit::{AuditSink, CompositeAuditSink, MemoryAuditSink};
use haven_guard::config::{load_config, GuardConfig};
use haven_guard::crypto::AesGcmProvider;
use haven_guard::routing::validator::FixedValidator;
use haven_guard::service::{Collaborators, SecurityOrchestrator};
use haven_guard::session::authenticator::{EmergencyCodeAuthenticator, EmergencyPinAuthenticator};
use haven_guard::session::{CrisisType, EmergencyCredentials, EmergencySessionRequest, Operation, Severity};
use haven_guard::sync::{ConflictStrategy, DataClassification, RecordMetadata, SyncRecord, SyncStrategy};
use haven_guard::types::{CrisisEventId, DeviceId, ThreatLevel, UserId};
use rand::Rng;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "haven-drill", about = "Run a crisis drill against the orchestration core")]
struct Args {
    /// TOML config; defaults apply when omitted.
    #[arg(long, env = "HAVEN_GUARD_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, default_value = "I can't do this anymore, I want to end my life")]
    message: String,

    #[arg(long, default_value = "suicidal-ideation")]
    crisis_type: String,

    #[arg(long, default_value = "critical")]
    severity: String,

    /// Simulated latency of the deep validator.
    #[arg(long, default_value_t = 40)]
    deep_delay_ms: u64,

    #[arg(long, default_value = "merge")]
    strategy: String,
}

fn parse_crisis_type(s: &str) -> CrisisType {
    match s.to_ascii_lowercase().as_str() {
        "suicidal-ideation" | "suicidal" => CrisisType::SuicidalIdeation,
        "self-harm" => CrisisType::SelfHarm,
        "panic-attack" | "panic" => CrisisType::PanicAttack,
        "psychosis" => CrisisType::Psychosis,
        "substance-crisis" | "substance" => CrisisType::SubstanceCrisis,
        _ => CrisisType::Other,
    }
}

fn parse_severity(s: &str) -> Severity {
    match s.to_ascii_lowercase().as_str() {
        "low" => Severity::Low,
        "moderate" | "medium" => Severity::Moderate,
        "high" => Severity::High,
        _ => Severity::Critical,
    }
}

fn parse_strategy(s: &str) -> ConflictStrategy {
    match s.to_ascii_lowercase().as_str() {
        "client" | "client-wins" => ConflictStrategy::ClientWins,
        "server" | "server-wins" => ConflictStrategy::ServerWins,
        "user" | "user-choice" => ConflictStrategy::UserChoice,
        _ => ConflictStrategy::Merge,
    }
}

fn metadata(record: &SyncRecord, owner: &UserId, device: &DeviceId, version: u64) -> RecordMetadata {
    RecordMetadata {
        record_id: record.id.clone(),
        record_type: record.record_type.clone(),
        owner_id: owner.clone(),
        device_id: device.clone(),
        version,
        classification: DataClassification::Clinical,
        sync_strategy: SyncStrategy::Batched,
        updated_at: chrono::Utc::now(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display()))?,
        None => GuardConfig::default(),
    };

    let ledger = Arc::new(HashChainAuditSink::new("did:haven:drill"));
    let memory = Arc::new(MemoryAuditSink::new());
    let sinks: Vec<Arc<dyn AuditSink>> = vec![ledger.clone(), memory.clone()];
    let audit: Arc<dyn AuditSink> = Arc::new(CompositeAuditSink::new(sinks));

    // Nothing is enrolled, so every authenticator refuses.
    let collaborators = Collaborators::new(
        Arc::new(FixedValidator::new("fast-heuristics", 82.0, ThreatLevel::Low)),
        Arc::new(
            FixedValidator::new("deep-inspection", 96.0, ThreatLevel::Low)
                .with_delay(Duration::from_millis(args.deep_delay_ms)),
        ),
        Arc::new(AesGcmProvider::generate()?),
        audit,
    )
    .with_authenticator(Arc::new(EmergencyPinAuthenticator::new()))
    .with_authenticator(Arc::new(EmergencyCodeAuthenticator::new(Vec::<String>::new())));
    let guard = SecurityOrchestrator::new(config, collaborators)?;

    let user = UserId("drill-user".into());
    let device = DeviceId("drill-phone".into());

    // 1. Route the crisis message.
    let routed = guard
        .route_and_validate(args.message.clone(), BTreeMap::new(), "127.0.0.1", Some(user.clone()), None)
        .await;

    // 2. Open an emergency session with nothing that can authenticate.
    let event = CrisisEventId(format!("drill-{}", rand::thread_rng().gen::<u32>()));
    let request = EmergencySessionRequest {
        crisis_event_id: event,
        device_id: device.clone(),
        user_id: Some(user.clone()),
        crisis_type: parse_crisis_type(&args.crisis_type),
        severity: parse_severity(&args.severity),
        credentials: EmergencyCredentials {
            pin: Some("0000".into()),
            ..Default::default()
        },
    };
    let session = guard.create_emergency_session(&request).await;
    let hotline = match &session.session {
        Some(s) => Some(guard.validate_session(&s.id, Operation::CrisisHotline).await),
        None => None,
    };

    // 3. Package a safety plan, then tamper with a copy.
    let plan = SyncRecord::new("safety-plan-1", "safety_plan")
        .with_field("warning_signs", json!(["not sleeping", "withdrawing"]))
        .with_field("contacts", json!(["sam"]));
    let plan_meta = metadata(&plan, &user, &device, 1);
    let packaged = guard.package_for_upload(&plan, &plan_meta).await?;
    let restored = guard.unpack_from_download(&packaged, &plan_meta).await?;

    let mut tampered = packaged.clone();
    if let Some(byte) = tampered.ciphertext.first_mut() {
        *byte ^= 0x5a;
    }
    let tamper_outcome = match guard.unpack_from_download(&tampered, &plan_meta).await {
        Ok(_) => "accepted".to_string(),
        Err(err) => err.to_string(),
    };

    // 4. Resolve a conflict against a server-side edit.
    let server_plan = SyncRecord::new("safety-plan-1", "safety_plan")
        .with_field("contacts", json!(["alex"]))
        .with_field("coping", json!(["box breathing"]));
    let server_payload = guard
        .package_for_upload(&server_plan, &metadata(&server_plan, &user, &device, 2))
        .await?;
    let resolution = guard
        .resolve_conflict(&packaged, &server_payload, parse_strategy(&args.strategy))
        .await?;

    let tuning = guard.tuning_tick();

    let summary = json!({
        "routing": routed,
        "session": session,
        "hotline_check": hotline,
        "sync": {
            "round_trip_ok": restored == plan,
            "packaged_bytes": packaged.perf_metadata.ciphertext_bytes,
            "compressed": packaged.perf_metadata.compressed,
            "tampered": tamper_outcome,
        },
        "conflict": {
            "strategy": resolution.strategy,
            "version": resolution.metadata.version,
            "fields": resolution.record.fields,
        },
        "tuning": tuning,
        "audit": {
            "events": memory.kinds(),
            "ledger_len": ledger.len(),
            "ledger_head": ledger.head_hex(),
            "ledger_intact": ledger.verify().is_ok(),
        },
        "telemetry": guard.flush_telemetry(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
