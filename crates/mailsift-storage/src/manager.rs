use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use chrono::Utc;
use mailsift_core::{error::StoreError, record::Record, store::ProcessedStore};
use tracing::{info, instrument};

use crate::{
    backup::BackupManager,
    keys::{KeyManager, KeyStore},
    record_store::EncryptedRecordStore,
    retention::RetentionPolicy,
};

const RECORD_FILE: &str = "records.bin";
const BACKUP_DIR: &str = "backups";

/// Façade combining key management, the encrypted record file, backups and
/// retention behind the [`ProcessedStore`] contract.
///
/// One instance exclusively owns its storage root for its lifetime. The
/// internal mutex serializes every load-mutate-save cycle; the store is
/// single-process by design and callers needing cross-process sharing must
/// bring their own lock.
pub struct SecureStorageManager<K: KeyStore> {
    root: PathBuf,
    retention: RetentionPolicy,
    inner: Mutex<Inner<K>>,
}

struct Inner<K: KeyStore> {
    keys: KeyManager<K>,
    store: EncryptedRecordStore,
}

impl<K: KeyStore> SecureStorageManager<K> {
    /// Open (or initialize) a store rooted at `root` with the default
    /// 30-day retention window.
    pub fn open(root: impl Into<PathBuf>, key_store: K) -> Result<Self, StoreError> {
        Self::with_retention(root, key_store, RetentionPolicy::default())
    }

    pub fn with_retention(
        root: impl Into<PathBuf>,
        key_store: K,
        retention: RetentionPolicy,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let keys = KeyManager::load_or_init(key_store)?;
        let store = EncryptedRecordStore::new(
            root.join(RECORD_FILE),
            BackupManager::new(root.join(BACKUP_DIR)),
        );
        Ok(Self {
            root,
            retention,
            inner: Mutex::new(Inner { keys, store }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the live encrypted record file.
    pub fn record_path(&self) -> PathBuf {
        self.root.join(RECORD_FILE)
    }

    /// Number of keys currently on the ring (active plus retired).
    pub fn key_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.keys.keys().len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner<K>>, StoreError> {
        self.inner
            .lock()
            .map_err(|err| StoreError::storage(format!("lock poisoned: {err}")))
    }
}

impl<K: KeyStore> ProcessedStore for SecureStorageManager<K> {
    #[instrument(skip_all, fields(message_id = %record.message_id))]
    fn add_record(&self, record: Record, force_cleanup: bool) -> Result<String, StoreError> {
        if !record.is_valid() {
            // Rejected before any disk access.
            return Err(StoreError::MalformedInput);
        }

        let inner = self.lock()?;
        let mut records = inner.store.load(inner.keys.keys())?;
        if force_cleanup {
            records = self.retention.prune(records, Utc::now());
        }
        let record_id = format!("{}-{}", record.message_id, records.len() + 1);
        records.push(record);
        inner.store.save(&records, inner.keys.active())?;
        Ok(record_id)
    }

    fn is_processed(&self, message_id: &str) -> Result<bool, StoreError> {
        if message_id.trim().is_empty() {
            return Ok(false);
        }
        let inner = self.lock()?;
        let records = inner.store.load(inner.keys.keys())?;
        Ok(records.iter().any(|r| r.message_id == message_id))
    }

    fn record_count(&self) -> Result<usize, StoreError> {
        let inner = self.lock()?;
        Ok(inner.store.load(inner.keys.keys())?.len())
    }

    /// Rotate the active key and re-encrypt the live file under it, so the
    /// file always uses the current key going forward. Retired keys remain
    /// on the ring only to decrypt older backups.
    #[instrument(skip_all)]
    fn rotate_key(&self) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        // Load under the old ring before the new key takes over.
        let records = inner.store.load(inner.keys.keys())?;
        inner.keys.rotate()?;
        inner.store.save(&records, inner.keys.active())?;
        info!("rotated store encryption key");
        Ok(())
    }

    fn records(&self) -> Result<Vec<Record>, StoreError> {
        let inner = self.lock()?;
        inner.store.load(inner.keys.keys())
    }
}
