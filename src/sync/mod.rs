//! Zero-knowledge sync: records are compressed, encrypted, and hashed on the
//! device; the remote side only ever stores ciphertext.

pub mod compression;
pub mod engine;
pub mod payload;
pub mod tuning;

pub use engine::ZeroKnowledgeSyncEngine;
pub use payload::{
    ConflictData, ConflictResolution, ConflictStrategy, DataClassification, PerfMetadata, RecordMetadata,
    SyncPayload, SyncRecord, SyncStrategy,
};
pub use tuning::{SyncPerformanceTuner, SyncTuningAdjustment, SyncTuningState};
