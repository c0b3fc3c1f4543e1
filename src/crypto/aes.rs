use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;

use crate::crypto::{Classification, EncryptionProvider};

const MASTER_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;
const INTEGRITY_INFO: &[u8] = b"haven-guard/integrity/v1";

/// Reference provider: AES-256-GCM with per-salt, per-classification keys.
///
/// Keys are derived with HKDF-SHA256 from a device master key; ciphertext is
/// `nonce || aead_output`. Integrity hashes are keyed BLAKE3 over
/// length-prefixed parts.
pub struct AesGcmProvider {
    master: [u8; MASTER_KEY_LEN],
    integrity_key: [u8; 32],
}

impl AesGcmProvider {
    pub fn new(master: [u8; MASTER_KEY_LEN]) -> anyhow::Result<Self> {
        let hkdf = Hkdf::<Sha256>::new(None, &master);
        let mut integrity_key = [0u8; 32];
        hkdf.expand(INTEGRITY_INFO, &mut integrity_key)
            .map_err(|_| anyhow!("integrity key derivation failed"))?;
        Ok(Self { master, integrity_key })
    }

    pub fn generate() -> anyhow::Result<Self> {
        let mut master = [0u8; MASTER_KEY_LEN];
        OsRng.fill_bytes(&mut master);
        Self::new(master)
    }

    pub fn from_hex(master_hex: &str) -> anyhow::Result<Self> {
        let raw = hex::decode(master_hex.trim()).context("decode master key hex")?;
        let master: [u8; MASTER_KEY_LEN] = raw
            .try_into()
            .map_err(|_| anyhow!("master key must be {MASTER_KEY_LEN} bytes"))?;
        Self::new(master)
    }

    fn cipher_for(&self, salt: &[u8], classification: Classification) -> anyhow::Result<Aes256Gcm> {
        if salt.is_empty() {
            bail!("empty salt");
        }
        let hkdf = Hkdf::<Sha256>::new(Some(salt), &self.master);
        let mut key = [0u8; 32];
        hkdf.expand(classification.label(), &mut key)
            .map_err(|_| anyhow!("key derivation failed"))?;
        Aes256Gcm::new_from_slice(&key).map_err(|_| anyhow!("invalid derived key length"))
    }
}

#[async_trait]
impl EncryptionProvider for AesGcmProvider {
    async fn encrypt(&self, plaintext: &[u8], salt: &[u8], classification: Classification) -> anyhow::Result<Vec<u8>> {
        let cipher = self.cipher_for(salt, classification)?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| anyhow!("encryption failed"))?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    async fn decrypt(&self, ciphertext: &[u8], salt: &[u8], classification: Classification) -> anyhow::Result<Vec<u8>> {
        if ciphertext.len() <= NONCE_LEN {
            bail!("ciphertext too short");
        }
        let cipher = self.cipher_for(salt, classification)?;
        let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| anyhow!("decryption failed"))
    }

    async fn hash(&self, parts: &[&[u8]]) -> anyhow::Result<Vec<u8>> {
        let mut hasher = blake3::Hasher::new_keyed(&self.integrity_key);
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Ok(hasher.finalize().as_bytes().to_vec())
    }

    fn random_salt(&self) -> anyhow::Result<Vec<u8>> {
        let mut salt = vec![0u8; SALT_LEN];
        OsRng
            .try_fill_bytes(&mut salt)
            .map_err(|err| anyhow!("salt generation failed: {err}"))?;
        Ok(salt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> AesGcmProvider {
        AesGcmProvider::new([7u8; 32]).unwrap()
    }

    #[tokio::test]
    async fn decrypts_what_it_encrypts() {
        let p = provider();
        let salt = p.random_salt().unwrap();
        let ct = p.encrypt(b"mood: 3/10", &salt, Classification::RecordBody).await.unwrap();
        let pt = p.decrypt(&ct, &salt, Classification::RecordBody).await.unwrap();
        assert_eq!(pt, b"mood: 3/10");
    }

    #[tokio::test]
    async fn wrong_classification_fails_closed() {
        let p = provider();
        let salt = p.random_salt().unwrap();
        let ct = p.encrypt(b"secret", &salt, Classification::RecordBody).await.unwrap();
        assert!(p.decrypt(&ct, &salt, Classification::RecordMetadata).await.is_err());
    }

    #[tokio::test]
    async fn wrong_salt_fails_closed() {
        let p = provider();
        let salt = p.random_salt().unwrap();
        let other = p.random_salt().unwrap();
        let ct = p.encrypt(b"secret", &salt, Classification::RecordBody).await.unwrap();
        assert!(p.decrypt(&ct, &other, Classification::RecordBody).await.is_err());
    }

    #[tokio::test]
    async fn hash_is_keyed_and_length_prefixed() {
        let p = provider();
        let a = p.hash(&[b"ab", b"c"]).await.unwrap();
        let b = p.hash(&[b"a", b"bc"]).await.unwrap();
        assert_ne!(a, b);

        let other = AesGcmProvider::new([9u8; 32]).unwrap();
        assert_ne!(a, other.hash(&[b"ab", b"c"]).await.unwrap());
    }

    #[test]
    fn from_hex_rejects_short_keys() {
        assert!(AesGcmProvider::from_hex("abcd").is_err());
        assert!(AesGcmProvider::from_hex(&"11".repeat(32)).is_ok());
    }
}
