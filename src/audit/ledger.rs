use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::audit::{AuditSink, EmergencyAuditEvent};

const GENESIS: [u8; 32] = [0u8; 32];

#[derive(Clone, Debug)]
pub struct LedgerEntry {
    pub event: EmergencyAuditEvent,
    pub parent: [u8; 32],
    pub digest: [u8; 32],
}

/// Append-only, hash-chained audit log.
///
/// Each entry commits to the serialized event and to its parent's digest, so
/// a rewritten or dropped entry breaks [`HashChainAuditSink::verify`].
pub struct HashChainAuditSink {
    author: String,
    entries: Mutex<Vec<LedgerEntry>>,
}

impl HashChainAuditSink {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn head_hex(&self) -> Option<String> {
        self.entries.lock().last().map(|e| hex::encode(e.digest))
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.lock().clone()
    }

    /// Recompute every link. Returns the index of the first broken entry, if any.
    pub fn verify(&self) -> Result<(), usize> {
        let entries = self.entries.lock();
        let mut parent = GENESIS;
        for (idx, entry) in entries.iter().enumerate() {
            if entry.parent != parent {
                return Err(idx);
            }
            let Ok(payload) = serde_json::to_vec(&entry.event) else {
                return Err(idx);
            };
            if link_digest(&self.author, &parent, &payload) != entry.digest {
                return Err(idx);
            }
            parent = entry.digest;
        }
        Ok(())
    }

    #[cfg(test)]
    fn tamper(&self, idx: usize, operation: &str) {
        self.entries.lock()[idx].event.operation = operation.to_string();
    }
}

fn link_digest(author: &str, parent: &[u8; 32], payload: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(author.as_bytes());
    hasher.update(parent);
    hasher.update(payload);
    *hasher.finalize().as_bytes()
}

#[async_trait]
impl AuditSink for HashChainAuditSink {
    async fn append(&self, event: EmergencyAuditEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(&event).context("serialize audit event")?;
        let mut entries = self.entries.lock();
        let parent = entries.last().map(|e| e.digest).unwrap_or(GENESIS);
        let digest = link_digest(&self.author, &parent, &payload);
        entries.push(LedgerEntry { event, parent, digest });
        Ok(())
    }
}
