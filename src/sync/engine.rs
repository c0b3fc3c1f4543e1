use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;

use crate::audit::{AuditDispatcher, AuditEventKind, AuditSink, ComplianceFlags, EmergencyAuditEvent};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::crypto::{digests_match, Classification, EncryptionProvider};
use crate::error::{GuardError, GuardResult};
use crate::session::DegradedMode;
use crate::sync::compression;
use crate::sync::payload::{
    ConflictData, ConflictResolution, ConflictStrategy, DataClassification, PerfMetadata, RecordMetadata,
    SyncPayload, SyncRecord, SyncStrategy,
};
use crate::sync::tuning::{SyncPerformanceTuner, SyncTuningAdjustment, SyncTuningState};
use crate::telemetry::TelemetryHandle;
use crate::types::RiskLevel;

const PROVIDER: &str = "encryption provider";

/// Client-side encrypted sync. Payloads leaving this engine carry ciphertext,
/// a salt, and a keyed integrity hash; nothing is decrypted until that hash
/// verifies.
pub struct ZeroKnowledgeSyncEngine {
    config: SyncConfig,
    provider: Arc<dyn EncryptionProvider>,
    audit: AuditDispatcher,
    degraded: DegradedMode,
    tuner: Mutex<SyncPerformanceTuner>,
    clock: Arc<dyn Clock>,
    telemetry: TelemetryHandle,
}

impl ZeroKnowledgeSyncEngine {
    pub fn new(
        config: SyncConfig,
        provider: Arc<dyn EncryptionProvider>,
        audit_sink: Arc<dyn AuditSink>,
        degraded: DegradedMode,
        clock: Arc<dyn Clock>,
        telemetry: TelemetryHandle,
    ) -> GuardResult<Self> {
        config.validate()?;
        let audit = AuditDispatcher::new(audit_sink, config.audit_timeout(), telemetry.clone());
        let tuner = Mutex::new(SyncPerformanceTuner::new(config.tuning.clone()));
        Ok(Self {
            config,
            provider,
            audit,
            degraded,
            tuner,
            clock,
            telemetry,
        })
    }

    fn validate_record(&self, record: &SyncRecord, metadata: &RecordMetadata) -> GuardResult<Vec<u8>> {
        if record.id.0.trim().is_empty() {
            return Err(GuardError::Validation("record id is empty".into()));
        }
        if record.record_type.trim().is_empty() {
            return Err(GuardError::Validation(format!("record {} has no type", record.id)));
        }
        if record.fields.len() > self.config.max_fields {
            return Err(GuardError::Validation(format!(
                "record {} has {} fields, limit is {}",
                record.id,
                record.fields.len(),
                self.config.max_fields
            )));
        }
        if record.fields.keys().any(|name| name.is_empty()) {
            return Err(GuardError::Validation(format!("record {} has an unnamed field", record.id)));
        }
        if metadata.record_id != record.id || metadata.record_type != record.record_type {
            return Err(GuardError::Validation(format!(
                "metadata describes {}/{} but record is {}/{}",
                metadata.record_type, metadata.record_id, record.record_type, record.id
            )));
        }
        if metadata.owner_id.0.trim().is_empty() {
            return Err(GuardError::Validation(format!("record {} has no owner", record.id)));
        }
        let body = serde_json::to_vec(record).map_err(|err| GuardError::Validation(err.to_string()))?;
        if body.len() > self.config.max_record_bytes {
            return Err(GuardError::Validation(format!(
                "record {} is {} bytes, limit is {}",
                record.id,
                body.len(),
                self.config.max_record_bytes
            )));
        }
        Ok(body)
    }

    /// Encrypt and hash a record for upload.
    ///
    /// Fails with `Disabled` when sync is off or degraded mode is active, and
    /// with `Validation` before any crypto work if the record is malformed or
    /// oversized.
    pub async fn package_for_upload(&self, record: &SyncRecord, metadata: &RecordMetadata) -> GuardResult<SyncPayload> {
        if !self.config.enabled {
            return Err(GuardError::Disabled("sync is disabled".into()));
        }
        if self.degraded.is_active() {
            return Err(GuardError::Disabled("degraded mode is active; uploads are suspended".into()));
        }
        let started = Instant::now();
        let body = self.validate_record(record, metadata)?;
        let payload = self.seal(&body, metadata, None).await?;
        self.tuner.lock().record_upload();

        if metadata.classification == DataClassification::Clinical {
            let event = EmergencyAuditEvent::new(
                AuditEventKind::ClinicalRecordPackaged,
                None,
                format!("package:{}:{}", record.record_type, record.id),
                RiskLevel::Medium,
                self.clock.now(),
            )
            .with_flags(ComplianceFlags {
                phi_involved: true,
                ..Default::default()
            });
            self.audit.emit(event).await;
        }

        self.telemetry.incr("sync.packaged");
        self.telemetry
            .record_latency_ms("sync.package", started.elapsed().as_millis() as u64);
        tracing::debug!(
            record_id = %record.id,
            compressed = payload.perf_metadata.compressed,
            bytes = payload.perf_metadata.ciphertext_bytes,
            "record packaged for upload"
        );
        Ok(payload)
    }

    /// Frame, encrypt and hash an already-validated body.
    async fn seal(
        &self,
        body: &[u8],
        metadata: &RecordMetadata,
        conflict_data: Option<ConflictData>,
    ) -> GuardResult<SyncPayload> {
        let salt = self
            .provider
            .random_salt()
            .map_err(|err| GuardError::dependency(PROVIDER, err))?;

        let savings = compression::estimate_savings(body);
        let compress = {
            let mut tuner = self.tuner.lock();
            tuner.record_savings(savings);
            tuner.state().compression_enabled && savings > self.config.compression_threshold
        };
        let framed = compression::frame(body, compress).map_err(|err| GuardError::Validation(format!("{err:#}")))?;
        let compressed = compression::is_compressed(&framed);

        let metadata_bytes = serde_json::to_vec(metadata).map_err(|err| GuardError::Validation(err.to_string()))?;
        let ciphertext = self
            .provider
            .encrypt(&framed, &salt, Classification::RecordBody)
            .await
            .map_err(|err| GuardError::dependency(PROVIDER, err))?;
        let encrypted_metadata = self
            .provider
            .encrypt(&metadata_bytes, &salt, Classification::RecordMetadata)
            .await
            .map_err(|err| GuardError::dependency(PROVIDER, err))?;
        let integrity_hash = self
            .provider
            .hash(&[ciphertext.as_slice(), encrypted_metadata.as_slice(), salt.as_slice()])
            .await
            .map_err(|err| GuardError::dependency(PROVIDER, err))?;

        Ok(SyncPayload {
            perf_metadata: PerfMetadata {
                original_bytes: body.len(),
                ciphertext_bytes: ciphertext.len(),
                compressed,
                packaged_at: self.clock.now(),
                sync_strategy: metadata.sync_strategy,
            },
            ciphertext,
            encrypted_metadata,
            salt,
            integrity_hash,
            conflict_data,
        })
    }

    /// Recompute the integrity hash. Must pass before anything in `payload` is decrypted.
    async fn verify(&self, payload: &SyncPayload, context: &str) -> GuardResult<()> {
        let actual = self
            .provider
            .hash(&[
                payload.ciphertext.as_slice(),
                payload.encrypted_metadata.as_slice(),
                payload.salt.as_slice(),
            ])
            .await
            .map_err(|err| GuardError::dependency(PROVIDER, err))?;
        if !digests_match(&payload.integrity_hash, &actual) {
            self.telemetry.incr("sync.integrity_failures");
            tracing::warn!(context, "sync payload failed integrity verification; possible tampering");
            return Err(GuardError::integrity(context));
        }
        Ok(())
    }

    /// Decrypt a payload that has already been verified.
    async fn open(&self, payload: &SyncPayload) -> GuardResult<(SyncRecord, RecordMetadata)> {
        let metadata_bytes = self
            .provider
            .decrypt(&payload.encrypted_metadata, &payload.salt, Classification::RecordMetadata)
            .await
            .map_err(|err| GuardError::dependency(PROVIDER, err))?;
        let metadata: RecordMetadata = serde_json::from_slice(&metadata_bytes)
            .map_err(|err| GuardError::integrity(format!("record metadata could not be decoded: {err}")))?;

        let framed = self
            .provider
            .decrypt(&payload.ciphertext, &payload.salt, Classification::RecordBody)
            .await
            .map_err(|err| GuardError::dependency(PROVIDER, err))?;
        let (body, _) = compression::unframe(&framed, self.config.max_record_bytes)
            .map_err(|err| GuardError::integrity(format!("record {} body: {err:#}", metadata.record_id)))?;
        let record: SyncRecord = serde_json::from_slice(&body)
            .map_err(|err| GuardError::integrity(format!("record {} body could not be decoded: {err}", metadata.record_id)))?;

        if record.id != metadata.record_id {
            return Err(GuardError::Consistency {
                field: "record_id",
                expected: metadata.record_id.0.clone(),
                found: record.id.0.clone(),
            });
        }
        Ok((record, metadata))
    }

    /// Verify, decrypt, and check the record against what the caller expected to receive.
    pub async fn unpack_with_metadata(
        &self,
        payload: &SyncPayload,
        expected: &RecordMetadata,
    ) -> GuardResult<(SyncRecord, RecordMetadata)> {
        self.verify(payload, &format!("download of record {}", expected.record_id))
            .await?;
        let (record, metadata) = self.open(payload).await?;
        check_identity(expected, &metadata)?;
        self.telemetry.incr("sync.unpacked");
        Ok((record, metadata))
    }

    pub async fn unpack_from_download(&self, payload: &SyncPayload, expected: &RecordMetadata) -> GuardResult<SyncRecord> {
        self.unpack_with_metadata(payload, expected)
            .await
            .map(|(record, _)| record)
    }

    /// Resolve two versions of the same record.
    ///
    /// Both payloads are verified before either is decrypted. The result is
    /// re-packaged at `max(prior versions) + 1` for immediate sync and carries
    /// truncated samples of both originals.
    pub async fn resolve_conflict(
        &self,
        client: &SyncPayload,
        server: &SyncPayload,
        strategy: ConflictStrategy,
    ) -> GuardResult<ConflictResolution> {
        self.verify(client, "client side of conflict").await?;
        self.verify(server, "server side of conflict").await?;

        let (client_record, client_meta) = self.open(client).await?;
        let (server_record, server_meta) = self.open(server).await?;
        check_identity(&client_meta, &server_meta)?;

        let (record, base_meta) = match strategy {
            ConflictStrategy::ClientWins | ConflictStrategy::UserChoice => (client_record, client_meta.clone()),
            ConflictStrategy::ServerWins => (server_record, server_meta.clone()),
            ConflictStrategy::Merge => {
                let mut merged = server_record;
                merged.fields.extend(client_record.fields);
                merged.id = client_record.id;
                merged.record_type = client_record.record_type;
                (merged, client_meta.clone())
            }
        };

        let now = self.clock.now();
        let metadata = RecordMetadata {
            version: client_meta.version.max(server_meta.version) + 1,
            sync_strategy: SyncStrategy::Immediate,
            updated_at: now,
            ..base_meta
        };

        let conflict_data = self.conflict_data(client, server, strategy).await?;
        let body = serde_json::to_vec(&record).map_err(|err| GuardError::Validation(err.to_string()))?;
        if body.len() > self.config.max_record_bytes {
            return Err(GuardError::Validation(format!(
                "resolved record {} is {} bytes, limit is {}",
                record.id,
                body.len(),
                self.config.max_record_bytes
            )));
        }
        let payload = self.seal(&body, &metadata, Some(conflict_data)).await?;

        self.tuner.lock().record_conflict();
        self.telemetry.incr("sync.conflicts_resolved");
        tracing::info!(
            record_id = %record.id,
            strategy = strategy.as_str(),
            version = metadata.version,
            "sync conflict resolved"
        );
        let event = EmergencyAuditEvent::new(
            AuditEventKind::ConflictResolved,
            None,
            format!("resolve:{}:{}", strategy.as_str(), record.id),
            RiskLevel::Low,
            now,
        )
        .with_flags(ComplianceFlags {
            phi_involved: metadata.classification == DataClassification::Clinical,
            ..Default::default()
        });
        self.audit.emit(event).await;

        Ok(ConflictResolution {
            record,
            metadata,
            payload,
            strategy,
            pending_user_choice: strategy == ConflictStrategy::UserChoice,
        })
    }

    async fn conflict_data(
        &self,
        client: &SyncPayload,
        server: &SyncPayload,
        strategy: ConflictStrategy,
    ) -> GuardResult<ConflictData> {
        let n = self.config.conflict_sample_bytes;
        let sample = |bytes: &[u8]| hex::encode(&bytes[..bytes.len().min(n)]);
        let conflict_salt = self
            .provider
            .random_salt()
            .map_err(|err| GuardError::dependency(PROVIDER, err))?;
        let encrypted_strategy = self
            .provider
            .encrypt(strategy.as_str().as_bytes(), &conflict_salt, Classification::ConflictStrategy)
            .await
            .map_err(|err| GuardError::dependency(PROVIDER, err))?;
        Ok(ConflictData {
            client_sample: sample(&client.ciphertext),
            server_sample: sample(&server.ciphertext),
            encrypted_strategy_sample: sample(&encrypted_strategy),
            conflict_salt: hex::encode(&conflict_salt),
            resolved_at: self.clock.now(),
        })
    }

    pub fn record_round_trip(&self, rtt_ms: f64) {
        self.tuner.lock().record_round_trip(rtt_ms);
    }

    /// One periodic tuning step over batching, interval, and compression.
    pub fn tune_performance(&self) -> SyncTuningAdjustment {
        let adjustment = self.tuner.lock().tick();
        if adjustment.changed() {
            tracing::info!(
                batch_size = adjustment.after.batch_size,
                sync_interval_secs = adjustment.after.sync_interval_secs,
                compression = adjustment.after.compression_enabled,
                "sync tuning adjusted"
            );
        }
        self.telemetry
            .set_gauge("sync.batch_size", adjustment.after.batch_size as f64);
        self.telemetry
            .set_gauge("sync.interval_secs", adjustment.after.sync_interval_secs as f64);
        adjustment
    }

    pub fn tuning_state(&self) -> SyncTuningState {
        self.tuner.lock().state()
    }

    pub fn audit_gap_count(&self) -> usize {
        self.audit.gap_count()
    }
}

fn check_identity(expected: &RecordMetadata, found: &RecordMetadata) -> GuardResult<()> {
    if expected.record_id != found.record_id {
        return Err(GuardError::Consistency {
            field: "record_id",
            expected: expected.record_id.0.clone(),
            found: found.record_id.0.clone(),
        });
    }
    if expected.record_type != found.record_type {
        return Err(GuardError::Consistency {
            field: "record_type",
            expected: expected.record_type.clone(),
            found: found.record_type.clone(),
        });
    }
    if expected.owner_id != found.owner_id {
        return Err(GuardError::Consistency {
            field: "owner_id",
            expected: expected.owner_id.0.clone(),
            found: found.owner_id.0.clone(),
        });
    }
    Ok(())
}
