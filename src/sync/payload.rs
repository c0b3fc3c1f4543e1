use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{DeviceId, RecordId, UserId};

/// Byte fields travel as lowercase hex.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T: AsRef<[u8]>, S: Serializer>(bytes: T, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// A domain record in plaintext form. Only the device holding the key ever sees this.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: RecordId,
    pub record_type: String,
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl SyncRecord {
    pub fn new(id: impl Into<String>, record_type: impl Into<String>) -> Self {
        Self {
            id: RecordId(id.into()),
            record_type: record_type.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClassification {
    /// Protected health information. Packaging emits a compliance audit entry.
    Clinical,
    Personal,
    Operational,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    Immediate,
    #[default]
    Batched,
}

/// Encrypted separately from the body. `record_id`, `record_type` and
/// `owner_id` identify the record and are checked on download.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub record_id: RecordId,
    pub record_type: String,
    pub owner_id: UserId,
    pub device_id: DeviceId,
    /// Logical version, bumped on every conflict resolution.
    pub version: u64,
    pub classification: DataClassification,
    #[serde(default)]
    pub sync_strategy: SyncStrategy,
    pub updated_at: DateTime<Utc>,
}

/// Unencrypted packaging statistics. Never covered by the integrity hash, never trusted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerfMetadata {
    pub original_bytes: usize,
    pub ciphertext_bytes: usize,
    pub compressed: bool,
    pub packaged_at: DateTime<Utc>,
    pub sync_strategy: SyncStrategy,
}

/// Bounded trace of a conflict: truncated samples, never the full originals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConflictData {
    pub client_sample: String,
    pub server_sample: String,
    pub encrypted_strategy_sample: String,
    pub conflict_salt: String,
    pub resolved_at: DateTime<Utc>,
}

/// What the remote store receives. Ciphertext only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub encrypted_metadata: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub salt: Vec<u8>,
    /// Keyed hash over `(ciphertext, encrypted_metadata, salt)`.
    #[serde(with = "hex_bytes")]
    pub integrity_hash: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_data: Option<ConflictData>,
    pub perf_metadata: PerfMetadata,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    ClientWins,
    ServerWins,
    /// Client fields overlay server fields; server values survive where the client has none.
    Merge,
    /// Resolved as client-wins until someone picks explicitly.
    UserChoice,
}

impl ConflictStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictStrategy::ClientWins => "client-wins",
            ConflictStrategy::ServerWins => "server-wins",
            ConflictStrategy::Merge => "merge",
            ConflictStrategy::UserChoice => "user-choice",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConflictResolution {
    pub record: SyncRecord,
    pub metadata: RecordMetadata,
    pub payload: SyncPayload,
    pub strategy: ConflictStrategy,
    /// Set for `user-choice`: the client version stands in until a person decides.
    pub pending_user_choice: bool,
}
