//! Encrypted credential store.
//!
//! Holds the OAuth credential record, the backend session token, the cached
//! user profile and the PIN hash in a single sealed file. Reads never fail:
//! a missing key or an unreadable file simply looks empty. Writes reach disk
//! before they become visible to readers.

use crate::cipher::SealingKey;
use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// File name of the store inside the data directory.
pub const STORE_FILE_NAME: &str = "auth.json";

/// Environment variable carrying the store passphrase.
pub const ENCRYPTION_KEY_VAR: &str = "STORE_ENCRYPTION_KEY";

const SELF_TEST_PROBE: &[u8] = b"zumi-credential-self-test";

/// The named slots the store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Tokens,
    ServerToken,
    User,
    PinHash,
}

impl Slot {
    pub const ALL: [Slot; 4] = [Slot::Tokens, Slot::ServerToken, Slot::User, Slot::PinHash];

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Tokens => "tokens",
            Slot::ServerToken => "serverToken",
            Slot::User => "user",
            Slot::PinHash => "pinHash",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|slot| slot.as_str() == name)
    }
}

/// Outcome of loading the store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreHealth {
    Healthy,
    KeyUnavailable,
    /// The file existed but could not be decrypted or parsed. Its contents
    /// were discarded and the next write replaces it.
    Corrupt,
}

struct StoreState {
    slots: BTreeMap<String, Value>,
    health: StoreHealth,
}

#[derive(Clone)]
pub struct CredentialStore {
    path: PathBuf,
    key: Option<SealingKey>,
    state: Arc<RwLock<StoreState>>,
}

impl CredentialStore {
    /// Open (or lazily create) the store at `path`.
    ///
    /// Never fails. Use [`CredentialStore::self_test`] to find out whether the
    /// store is actually usable.
    pub async fn open(path: impl Into<PathBuf>, passphrase: Option<&str>) -> Self {
        let path = path.into();
        let key = passphrase
            .filter(|p| !p.is_empty())
            .map(SealingKey::from_passphrase);

        let (slots, health) = match &key {
            None => {
                tracing::warn!(
                    "No credential store key available; credentials will not be persisted"
                );
                (BTreeMap::new(), StoreHealth::KeyUnavailable)
            }
            Some(key) => match load_slots(&path, key).await {
                Ok(slots) => (slots, StoreHealth::Healthy),
                Err(e) => {
                    tracing::warn!(
                        "Discarding unreadable credential store {}: {:#}",
                        path.display(),
                        e
                    );
                    (BTreeMap::new(), StoreHealth::Corrupt)
                }
            },
        };

        tracing::debug!(
            path = %path.display(),
            slots = slots.len(),
            ?health,
            "Credential store opened"
        );

        Self {
            path,
            key,
            state: Arc::new(RwLock::new(StoreState { slots, health })),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn health(&self) -> StoreHealth {
        self.state.read().await.health
    }

    /// Read a slot. Missing, undecodable or unavailable values read as `None`.
    pub async fn get<T: DeserializeOwned>(&self, slot: Slot) -> Option<T> {
        let state = self.state.read().await;
        let value = state.slots.get(slot.as_str())?.clone();
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::warn!("Ignoring malformed '{}' slot: {}", slot.as_str(), e);
                None
            }
        }
    }

    pub async fn contains(&self, slot: Slot) -> bool {
        self.state.read().await.slots.contains_key(slot.as_str())
    }

    /// Write a slot and flush the whole store to disk before returning.
    pub async fn set<T: Serialize>(&self, slot: Slot, value: &T) -> Result<()> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Credential store has no encryption key"))?;
        let value = serde_json::to_value(value)
            .with_context(|| format!("Failed to encode '{}' slot", slot.as_str()))?;

        let mut state = self.state.write().await;
        let mut slots = state.slots.clone();
        slots.insert(slot.as_str().to_string(), value);
        self.persist(key, &slots).await?;

        state.slots = slots;
        state.health = StoreHealth::Healthy;
        tracing::debug!("Stored '{}' slot", slot.as_str());
        Ok(())
    }

    /// Remove a slot. Removing an absent slot is a no-op.
    pub async fn delete(&self, slot: Slot) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.slots.contains_key(slot.as_str()) {
            return Ok(());
        }
        // Slots are only ever populated when a key is present.
        let Some(key) = self.key.as_ref() else {
            return Ok(());
        };

        let mut slots = state.slots.clone();
        slots.remove(slot.as_str());
        self.persist(key, &slots).await?;

        state.slots = slots;
        tracing::debug!("Deleted '{}' slot", slot.as_str());
        Ok(())
    }

    /// Verify that the store can seal and open data with its key and that the
    /// file on disk (if any) decrypts.
    pub async fn self_test(&self) -> Result<()> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Credential store has no encryption key"))?;

        if self.health().await == StoreHealth::Corrupt {
            anyhow::bail!(
                "Credential store {} could not be decrypted with the configured key",
                self.path.display()
            );
        }

        let sealed = key.seal(SELF_TEST_PROBE)?;
        if key.open(&sealed)? != SELF_TEST_PROBE {
            anyhow::bail!("Credential store round trip produced different data");
        }

        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            load_slots(&self.path, key)
                .await
                .context("Credential store file failed verification")?;
        }

        Ok(())
    }

    async fn persist(&self, key: &SealingKey, slots: &BTreeMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let plaintext = serde_json::to_vec(slots).context("Failed to encode credential store")?;
        let sealed = key.seal(&plaintext)?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, sealed)
            .await
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        Ok(())
    }
}

async fn load_slots(path: &Path, key: &SealingKey) -> Result<BTreeMap<String, Value>> {
    let envelope = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    let plaintext = key.open(&envelope)?;
    let raw: BTreeMap<String, Value> =
        serde_json::from_slice(&plaintext).context("Credential store is not a JSON object")?;

    Ok(raw
        .into_iter()
        .filter(|(name, _)| {
            let known = Slot::parse(name).is_some();
            if !known {
                tracing::debug!("Dropping unknown credential slot '{}'", name);
            }
            known
        })
        .collect())
}

/// Resolve the store passphrase from `STORE_ENCRYPTION_KEY`, falling back to
/// a packaged resource file.
pub fn resolve_passphrase(resource: Option<&Path>) -> Option<String> {
    resolve_passphrase_from(std::env::var(ENCRYPTION_KEY_VAR).ok(), resource)
}

/// The resource file may be JSON (`{"STORE_ENCRYPTION_KEY": "..."}`) or hold
/// the bare key as text.
pub fn resolve_passphrase_from(env_value: Option<String>, resource: Option<&Path>) -> Option<String> {
    if let Some(value) = env_value.filter(|v| !v.trim().is_empty()) {
        return Some(value);
    }

    let path = resource?;
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Failed to read key resource {}: {}", path.display(), e);
            return None;
        }
    };

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&text) {
        return map
            .get(ENCRYPTION_KEY_VAR)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
    }

    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
