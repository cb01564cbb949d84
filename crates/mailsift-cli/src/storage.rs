use std::path::PathBuf;

use color_eyre::Result;
use dirs::data_dir;
use mailsift_storage::{
    keys::OsKeyringStore, manager::SecureStorageManager, retention::RetentionPolicy,
};
use tracing::debug;

use crate::config::Config;

const KEYRING_SERVICE: &str = "mailsift";
const KEYRING_ACCOUNT: &str = "record-keyring";

/// Resolve the default data directory for Mailsift.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("mailsift"))
}

/// Open the encrypted record store, honoring config overrides, with keys
/// held in the OS keychain.
pub fn open_store(config: &Config) -> Result<SecureStorageManager<OsKeyringStore>> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    let retention = config
        .retention_days
        .map(RetentionPolicy::days)
        .unwrap_or_default();

    debug!(?root, "opening encrypted record store");
    SecureStorageManager::with_retention(
        root,
        OsKeyringStore::new(KEYRING_SERVICE, KEYRING_ACCOUNT),
        retention,
    )
    .map_err(|err| color_eyre::eyre::eyre!(err.to_string()))
}

/// Helper for tests to open a store rooted at a temp dir with an in-memory
/// keyring.
#[cfg(test)]
pub fn test_store(
    root: impl Into<PathBuf>,
) -> Result<SecureStorageManager<mailsift_storage::keys::InMemoryKeyStore>> {
    SecureStorageManager::open(root, mailsift_storage::keys::InMemoryKeyStore::default())
        .map_err(|err| color_eyre::eyre::eyre!(err.to_string()))
}
