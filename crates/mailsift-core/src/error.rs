use thiserror::Error;

/// Errors produced by the processed-record store.
///
/// `NotFound` and `MalformedInput` are ordinary domain outcomes callers
/// resolve locally; `StorageCorrupted` and `Io` are caught at the pipeline
/// boundary and logged so a transiently unavailable store never stops the
/// triage pass.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Requested entry does not exist.
    #[error("entry not found: {what}")]
    NotFound { what: String },

    /// Record rejected before touching disk (missing or empty message id).
    #[error("record is missing a usable message_id")]
    MalformedInput,

    /// Neither the live file nor any backup decrypts with any known key.
    #[error("store is corrupted and no backup could be recovered")]
    StorageCorrupted,

    /// Key rotation did not complete; the previous active key is still in
    /// effect and the keyring on disk is unchanged.
    #[error("key rotation failed: {reason}")]
    KeyRotation { reason: String },

    /// Transient filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Internal storage failure (cipher init, lock poisoning, encoding).
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

impl StoreError {
    /// Shorthand for the internal-failure variant.
    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            reason: reason.into(),
        }
    }
}
