use std::sync::{Arc, Mutex};

use crate::{error::StoreError, record::Record};

/// Durability and idempotency contract the email pipeline depends on.
///
/// Implementations serialize their own load-mutate-save cycle; callers may
/// share one instance across a process but must not point two instances at
/// the same backing path.
pub trait ProcessedStore: Send + Sync {
    /// Append a record, optionally pruning expired entries first.
    /// Returns the generated record id.
    fn add_record(&self, record: Record, force_cleanup: bool) -> Result<String, StoreError>;

    /// Whether a message id has already been recorded. An empty id is
    /// simply "not found", never an error.
    fn is_processed(&self, message_id: &str) -> Result<bool, StoreError>;

    /// Size of the collection after a fresh load.
    fn record_count(&self) -> Result<usize, StoreError>;

    /// Retire the active encryption key and re-encrypt the live file.
    fn rotate_key(&self) -> Result<(), StoreError>;

    /// The full decrypted collection, for cross-record duplicate scans.
    /// This is the only way the store's data escapes the façade.
    fn records(&self) -> Result<Vec<Record>, StoreError>;
}

/// In-memory store for pipeline tests and offline smoke runs.
/// Retention and key rotation are concerns of the durable store and are
/// no-ops here.
#[derive(Debug, Default, Clone)]
pub struct InMemoryProcessedStore {
    inner: Arc<Mutex<Vec<Record>>>,
}

impl InMemoryProcessedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessedStore for InMemoryProcessedStore {
    fn add_record(&self, record: Record, _force_cleanup: bool) -> Result<String, StoreError> {
        if !record.is_valid() {
            return Err(StoreError::MalformedInput);
        }
        let mut records = self.inner.lock().map_err(poisoned)?;
        let record_id = format!("{}-{}", record.message_id, records.len() + 1);
        records.push(record);
        Ok(record_id)
    }

    fn is_processed(&self, message_id: &str) -> Result<bool, StoreError> {
        if message_id.trim().is_empty() {
            return Ok(false);
        }
        let records = self.inner.lock().map_err(poisoned)?;
        Ok(records.iter().any(|r| r.message_id == message_id))
    }

    fn record_count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.lock().map_err(poisoned)?.len())
    }

    fn rotate_key(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn records(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.inner.lock().map_err(poisoned)?.clone())
    }
}

fn poisoned<E: std::fmt::Display>(err: E) -> StoreError {
    StoreError::storage(format!("lock poisoned: {err}"))
}
