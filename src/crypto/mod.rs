//! Encryption capability consumed by the sync engine.
//!
//! The engine treats the provider as opaque: it never sees keys, only
//! ciphertext, salts, and integrity hashes. Implementations must fail closed
//! and never hand back partial plaintext.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

pub mod aes;

pub use aes::AesGcmProvider;

/// Domain separation for everything the provider encrypts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    RecordBody,
    RecordMetadata,
    ConflictStrategy,
}

impl Classification {
    pub fn label(self) -> &'static [u8] {
        match self {
            Classification::RecordBody => b"haven-guard/record-body/v1",
            Classification::RecordMetadata => b"haven-guard/record-metadata/v1",
            Classification::ConflictStrategy => b"haven-guard/conflict-strategy/v1",
        }
    }
}

#[async_trait]
pub trait EncryptionProvider: Send + Sync {
    async fn encrypt(&self, plaintext: &[u8], salt: &[u8], classification: Classification) -> anyhow::Result<Vec<u8>>;

    async fn decrypt(&self, ciphertext: &[u8], salt: &[u8], classification: Classification) -> anyhow::Result<Vec<u8>>;

    /// Keyed digest over an ordered list of byte strings.
    async fn hash(&self, parts: &[&[u8]]) -> anyhow::Result<Vec<u8>>;

    fn random_salt(&self) -> anyhow::Result<Vec<u8>>;
}

/// Constant-time digest comparison.
pub fn digests_match(expected: &[u8], actual: &[u8]) -> bool {
    expected.len() == actual.len() && bool::from(expected.ct_eq(actual))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_comparison_rejects_length_and_content_mismatch() {
        assert!(digests_match(b"abcd", b"abcd"));
        assert!(!digests_match(b"abcd", b"abce"));
        assert!(!digests_match(b"abcd", b"abc"));
    }

    #[test]
    fn classifications_are_domain_separated() {
        assert_ne!(Classification::RecordBody.label(), Classification::RecordMetadata.label());
        assert_ne!(Classification::RecordMetadata.label(), Classification::ConflictStrategy.label());
    }
}
