//! AES-256-GCM sealing for the credential file.
//!
//! The on-disk form is base64 text of `nonce || ciphertext || tag`, with a
//! fresh 12-byte nonce per write. The cipher key is the SHA-256 digest of the
//! passphrase so any non-empty string can act as a store key.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use anyhow::{Context, Result};
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// A passphrase-derived sealing key.
#[derive(Clone)]
pub struct SealingKey {
    key: [u8; 32],
}

impl SealingKey {
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| anyhow::anyhow!("Key init failed: {e}"))
    }

    /// Encrypt `plaintext` and return the base64 envelope.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| anyhow::anyhow!("Encryption failed: {e}"))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    /// Decrypt a base64 envelope produced by [`SealingKey::seal`].
    pub fn open(&self, envelope: &str) -> Result<Vec<u8>> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(envelope.trim())
            .context("Envelope is not valid base64")?;

        if combined.len() < NONCE_SIZE + TAG_SIZE {
            anyhow::bail!("Envelope too short ({} bytes)", combined.len());
        }

        let (nonce, ciphertext) = combined.split_at(NONCE_SIZE);
        self.cipher()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow::anyhow!("Decryption failed (wrong key or corrupt data)"))
    }
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SealingKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_payload_opens_with_same_passphrase() {
        let key = SealingKey::from_passphrase("zumi-store-key");
        let sealed = key.seal(br#"{"serverToken":"abc"}"#).unwrap();
        assert_eq!(key.open(&sealed).unwrap(), br#"{"serverToken":"abc"}"#);
    }

    #[test]
    fn wrong_passphrase_is_rejected() {
        let sealed = SealingKey::from_passphrase("right").seal(b"secret").unwrap();
        assert!(SealingKey::from_passphrase("wrong").open(&sealed).is_err());
    }

    #[test]
    fn nonce_differs_between_writes() {
        let key = SealingKey::from_passphrase("k");
        assert_ne!(key.seal(b"same").unwrap(), key.seal(b"same").unwrap());
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let key = SealingKey::from_passphrase("k");
        assert!(key.open("AAAA").is_err());
        assert!(key.open("not base64 at all!").is_err());
    }
}
