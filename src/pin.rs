//! PIN lock backed by the credential store's `pinHash` slot.
//!
//! The lock screen hashes the digits before handing them over, so only the
//! hash is ever stored or compared.

use crate::credentials::{CredentialStore, Slot};
use anyhow::Result;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinCheck {
    Valid,
    Invalid,
    NotSet,
}

/// Lowercase hex SHA-256 of the PIN, as produced by the lock screen.
pub fn hash_pin(pin: &str) -> String {
    hex::encode(Sha256::digest(pin.as_bytes()))
}

#[derive(Clone)]
pub struct PinLock {
    store: CredentialStore,
}

impl PinLock {
    pub fn new(store: CredentialStore) -> Self {
        Self { store }
    }

    pub async fn has_pin(&self) -> bool {
        self.stored_hash().await.is_some()
    }

    pub async fn set_pin(&self, pin_hash: &str) -> Result<()> {
        if pin_hash.is_empty() {
            anyhow::bail!("Invalid PIN hash");
        }
        self.store.set(Slot::PinHash, &pin_hash).await?;
        tracing::info!("PIN set");
        Ok(())
    }

    pub async fn verify_pin(&self, pin_hash: &str) -> PinCheck {
        match self.stored_hash().await {
            None => PinCheck::NotSet,
            Some(stored) if !pin_hash.is_empty() && stored == pin_hash => PinCheck::Valid,
            Some(_) => PinCheck::Invalid,
        }
    }

    pub async fn delete_pin(&self) -> Result<()> {
        self.store.delete(Slot::PinHash).await
    }

    async fn stored_hash(&self) -> Option<String> {
        self.store
            .get::<String>(Slot::PinHash)
            .await
            .filter(|hash| !hash.is_empty())
    }
}
