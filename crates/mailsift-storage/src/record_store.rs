use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use mailsift_core::{error::StoreError, record::Record};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{instrument, warn};

use crate::{backup::BackupManager, keys::KeyMaterial};

/// AES-256-GCM nonce size in bytes.
const NONCE_LEN: usize = 12;

/// Envelope written to disk. Nonce and ciphertext travel base64-encoded so
/// the file stays valid JSON regardless of cipher output.
#[derive(Debug, Serialize, Deserialize)]
struct EncryptedBlob {
    /// Id of the key that produced the ciphertext; tried first on read.
    key_id: String,
    nonce: String,
    ciphertext: String,
}

/// Single source of truth for the encrypted record file and its decrypted
/// in-memory view.
pub struct EncryptedRecordStore {
    path: PathBuf,
    backups: BackupManager,
}

impl EncryptedRecordStore {
    pub fn new(path: impl Into<PathBuf>, backups: BackupManager) -> Self {
        Self {
            path: path.into(),
            backups,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Read and decrypt the live file. A missing file is an empty
    /// collection; a file no key decrypts falls back to the most recent
    /// backup before being declared corrupted.
    #[instrument(skip_all)]
    pub fn load(&self, keys: &[KeyMaterial]) -> Result<Vec<Record>, StoreError> {
        let bytes = match self.read_live() {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound { .. }) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };

        match decode(&bytes, keys) {
            Ok(records) => Ok(records),
            Err(_) => self.recover(keys),
        }
    }

    fn read_live(&self) -> Result<Vec<u8>, StoreError> {
        fs::read(&self.path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound {
                    what: self.path.display().to_string(),
                }
            } else {
                StoreError::Io(err)
            }
        })
    }

    fn recover(&self, keys: &[KeyMaterial]) -> Result<Vec<Record>, StoreError> {
        warn!("record file failed to decrypt, trying most recent backup");
        let Some(bytes) = self.backups.most_recent()? else {
            return Err(StoreError::StorageCorrupted);
        };
        match decode(&bytes, keys) {
            Ok(records) => {
                warn!(
                    records = records.len(),
                    "recovered record collection from backup"
                );
                Ok(records)
            }
            Err(_) => Err(StoreError::StorageCorrupted),
        }
    }

    /// Encrypt and atomically replace the live file. The exact bytes being
    /// committed are snapshotted immediately before the replace, so a later
    /// corruption of the live file loses nothing that was ever saved.
    #[instrument(skip_all, fields(records = records.len()))]
    pub fn save(&self, records: &[Record], key: &KeyMaterial) -> Result<(), StoreError> {
        let plaintext = serde_json::to_vec(records)
            .map_err(|err| StoreError::storage(format!("record encode failed: {err}")))?;

        let cipher = build_cipher(key)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|err| StoreError::storage(format!("encrypt failed: {err}")))?;

        let blob = EncryptedBlob {
            key_id: key.id.clone(),
            nonce: URL_SAFE_NO_PAD.encode(nonce.as_slice()),
            ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
        };
        let bytes = serde_json::to_vec(&blob)
            .map_err(|err| StoreError::storage(format!("blob encode failed: {err}")))?;

        self.backups.snapshot(&bytes)?;

        let parent = self
            .path
            .parent()
            .ok_or_else(|| StoreError::storage("record path has no parent"))?;
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|err| StoreError::Io(err.error))?;
        Ok(())
    }
}

fn decode(bytes: &[u8], keys: &[KeyMaterial]) -> Result<Vec<Record>, StoreError> {
    let blob: EncryptedBlob =
        serde_json::from_slice(bytes).map_err(|_| StoreError::StorageCorrupted)?;
    let nonce_bytes = URL_SAFE_NO_PAD
        .decode(&blob.nonce)
        .map_err(|_| StoreError::StorageCorrupted)?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(StoreError::StorageCorrupted);
    }
    let ciphertext = URL_SAFE_NO_PAD
        .decode(&blob.ciphertext)
        .map_err(|_| StoreError::StorageCorrupted)?;

    // Try the key the blob claims first, then the rest of the ring in
    // order. A restored backup may predate the current active key.
    let claimed = keys.iter().filter(|key| key.id == blob.key_id);
    let others = keys.iter().filter(|key| key.id != blob.key_id);
    for key in claimed.chain(others) {
        let cipher = build_cipher(key)?;
        if let Ok(plaintext) = cipher.decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        {
            return serde_json::from_slice(&plaintext).map_err(|_| StoreError::StorageCorrupted);
        }
    }
    Err(StoreError::StorageCorrupted)
}

fn build_cipher(key: &KeyMaterial) -> Result<Aes256Gcm, StoreError> {
    Aes256Gcm::new_from_slice(&key.bytes)
        .map_err(|err| StoreError::storage(format!("cipher init failed: {err}")))
}

#[cfg(test)]
mod tests {
    use crate::keys::{InMemoryKeyStore, KeyManager};

    use super::*;

    fn test_store(root: &Path) -> EncryptedRecordStore {
        EncryptedRecordStore::new(
            root.join("records.bin"),
            BackupManager::new(root.join("backups")),
        )
    }

    fn test_keys() -> KeyManager<InMemoryKeyStore> {
        KeyManager::load_or_init(InMemoryKeyStore::default()).expect("keyring init")
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let keys = test_keys();

        let records = vec![Record::new("msg-1"), Record::new("msg-2")];
        store.save(&records, keys.active()).expect("save");

        let loaded = store.load(keys.keys()).expect("load");
        assert_eq!(loaded, records);
    }

    #[test]
    fn missing_file_is_an_empty_collection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let keys = test_keys();

        assert!(store.load(keys.keys()).expect("load").is_empty());
    }

    #[test]
    fn plaintext_never_reaches_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let keys = test_keys();

        store
            .save(&[Record::new("very-secret-id")], keys.active())
            .expect("save");

        let on_disk = fs::read_to_string(store.path()).expect("read file");
        assert!(!on_disk.contains("very-secret-id"));
    }

    #[test]
    fn retired_key_still_decrypts_older_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let mut keys = test_keys();

        let records = vec![Record::new("msg-1")];
        store.save(&records, keys.active()).expect("save");
        keys.rotate().expect("rotate");

        // The live file is still encrypted under the now-retired key.
        let loaded = store.load(keys.keys()).expect("load");
        assert_eq!(loaded, records);
    }

    #[test]
    fn corrupted_file_recovers_from_backup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let keys = test_keys();

        let records = vec![Record::new("msg-1")];
        store.save(&records, keys.active()).expect("save");
        fs::write(store.path(), b"corrupted data").expect("corrupt file");

        let loaded = store.load(keys.keys()).expect("load via backup");
        assert_eq!(loaded, records);
    }

    #[test]
    fn corruption_with_no_backup_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let keys = test_keys();

        fs::write(store.path(), b"corrupted data").expect("write garbage");

        let err = store.load(keys.keys()).expect_err("nothing to recover");
        assert!(matches!(err, StoreError::StorageCorrupted));
    }

    #[test]
    fn truncated_file_is_corruption_not_absence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(dir.path());
        let keys = test_keys();

        store.save(&[Record::new("msg-1")], keys.active()).expect("save");
        let bytes = fs::read(store.path()).expect("read");
        fs::write(store.path(), &bytes[..bytes.len() / 2]).expect("truncate");

        // Still recoverable because the backup holds the committed bytes.
        let loaded = store.load(keys.keys()).expect("load via backup");
        assert_eq!(loaded.len(), 1);
    }
}
