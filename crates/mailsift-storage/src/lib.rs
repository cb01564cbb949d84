//! Encrypted, crash-tolerant persistence for processed-mail records.
//!
//! AES-256-GCM at rest, a bounded keyring with rotation, write-once backups
//! taken before every replace of the live file, and age-based retention,
//! all behind the [`manager::SecureStorageManager`] façade.

pub mod backup;
pub mod keys;
pub mod manager;
pub mod record_store;
pub mod retention;
