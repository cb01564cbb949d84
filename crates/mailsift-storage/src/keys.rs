use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use mailsift_core::error::StoreError;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Most keys the ring may hold: the active key plus two retired ones.
/// Data encrypted before the last two rotations therefore stays readable.
pub const MAX_KEYS: usize = 3;

/// Key material used for encryption at rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Stable identifier recorded in encrypted blobs (never log key bytes).
    pub id: String,
    /// 256-bit symmetric key.
    pub bytes: [u8; 32],
    pub created_at: DateTime<Utc>,
}

/// Wire form of one keyring entry; key bytes travel base64-encoded.
#[derive(Debug, Serialize, Deserialize)]
struct KeyEntry {
    id: String,
    key: String,
    created_at: DateTime<Utc>,
}

/// Persists the serialized keyring somewhere outside the record file
/// (OS keychain in production; memory in tests).
pub trait KeyStore: Send + Sync {
    fn load(&self) -> Result<Option<String>, StoreError>;
    fn save(&self, serialized: &str) -> Result<(), StoreError>;
}

/// OS keychain-backed store using the `keyring` crate.
pub struct OsKeyringStore {
    service: String,
    account: String,
}

impl OsKeyringStore {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

impl KeyStore for OsKeyringStore {
    fn load(&self) -> Result<Option<String>, StoreError> {
        let entry = keyring::Entry::new(&self.service, &self.account).map_err(keyring_err)?;
        match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(keyring_err(err)),
        }
    }

    fn save(&self, serialized: &str) -> Result<(), StoreError> {
        let entry = keyring::Entry::new(&self.service, &self.account).map_err(keyring_err)?;
        entry.set_password(serialized).map_err(keyring_err)
    }
}

/// In-memory key store for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyStore {
    inner: Arc<Mutex<Option<String>>>,
}

impl KeyStore for InMemoryKeyStore {
    fn load(&self) -> Result<Option<String>, StoreError> {
        let guard = self
            .inner
            .lock()
            .map_err(|err| StoreError::storage(format!("lock poisoned: {err}")))?;
        Ok(guard.clone())
    }

    fn save(&self, serialized: &str) -> Result<(), StoreError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| StoreError::storage(format!("lock poisoned: {err}")))?;
        *guard = Some(serialized.to_string());
        Ok(())
    }
}

/// Owns the active encryption key and a bounded history of retired keys.
///
/// The ring is ordered active-first, newest-retired next, and is never
/// empty after construction.
pub struct KeyManager<K: KeyStore> {
    store: K,
    keys: Vec<KeyMaterial>,
}

impl<K: KeyStore> KeyManager<K> {
    /// Load the persisted keyring, generating and persisting a fresh one
    /// on first use.
    pub fn load_or_init(store: K) -> Result<Self, StoreError> {
        let keys = match store.load()? {
            Some(serialized) => {
                let keys = decode_ring(&serialized)?;
                if keys.is_empty() {
                    let keys = vec![generate_key()];
                    store.save(&encode_ring(&keys)?)?;
                    keys
                } else {
                    keys
                }
            }
            None => {
                let keys = vec![generate_key()];
                store.save(&encode_ring(&keys)?)?;
                debug!(key_id = %keys[0].id, "initialized new keyring");
                keys
            }
        };
        Ok(Self { store, keys })
    }

    /// The key every new save uses. The ring is never empty by construction.
    pub fn active(&self) -> &KeyMaterial {
        &self.keys[0]
    }

    /// All known keys in decrypt-attempt order: active first, then retired
    /// keys newest first.
    pub fn keys(&self) -> &[KeyMaterial] {
        &self.keys
    }

    /// Generate a new active key, demote the current one, and evict the
    /// oldest retired key past [`MAX_KEYS`]. All-or-nothing: the new ring
    /// is persisted before the in-memory swap, so a persistence failure
    /// leaves the previous active key in effect.
    pub fn rotate(&mut self) -> Result<&KeyMaterial, StoreError> {
        let mut next = vec![generate_key()];
        next.extend(self.keys.iter().cloned());
        next.truncate(MAX_KEYS);

        let serialized = encode_ring(&next).map_err(|err| StoreError::KeyRotation {
            reason: err.to_string(),
        })?;
        self.store
            .save(&serialized)
            .map_err(|err| StoreError::KeyRotation {
                reason: err.to_string(),
            })?;

        self.keys = next;
        debug!(key_id = %self.keys[0].id, keys = self.keys.len(), "rotated encryption key");
        Ok(self.active())
    }
}

fn keyring_err(err: keyring::Error) -> StoreError {
    StoreError::storage(format!("keyring: {err}"))
}

fn generate_key() -> KeyMaterial {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    KeyMaterial {
        id: Uuid::new_v4().to_string(),
        bytes,
        created_at: Utc::now(),
    }
}

fn encode_ring(keys: &[KeyMaterial]) -> Result<String, StoreError> {
    let entries: Vec<KeyEntry> = keys
        .iter()
        .map(|key| KeyEntry {
            id: key.id.clone(),
            key: STANDARD.encode(key.bytes),
            created_at: key.created_at,
        })
        .collect();
    serde_json::to_string(&entries)
        .map_err(|err| StoreError::storage(format!("keyring encode failed: {err}")))
}

fn decode_ring(serialized: &str) -> Result<Vec<KeyMaterial>, StoreError> {
    let entries: Vec<KeyEntry> = serde_json::from_str(serialized)
        .map_err(|err| StoreError::storage(format!("keyring decode failed: {err}")))?;

    let mut keys = Vec::with_capacity(entries.len());
    for entry in entries {
        let bytes = STANDARD
            .decode(&entry.key)
            .map_err(|err| StoreError::storage(format!("key decode failed: {err}")))?;
        if bytes.len() != 32 {
            return Err(StoreError::storage(format!(
                "expected 32 key bytes, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        keys.push(KeyMaterial {
            id: entry.id,
            bytes: out,
            created_at: entry.created_at,
        });
    }
    Ok(keys)
}
