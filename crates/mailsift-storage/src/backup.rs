use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use mailsift_core::error::StoreError;
use tempfile::NamedTempFile;
use tracing::debug;

const BACKUP_PREFIX: &str = "records_backup_";
const BACKUP_SUFFIX: &str = ".bin";

/// Writes point-in-time copies of the encrypted record file.
///
/// Backups are write-once: nothing here ever mutates or deletes an existing
/// snapshot. Pruning old backups is an external housekeeping concern.
pub struct BackupManager {
    dir: PathBuf,
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `bytes` as a new snapshot. Names are zero-padded epoch
    /// nanoseconds so lexical and temporal order coincide.
    pub fn snapshot(&self, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir)?;

        let mut stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u128;
        let path = loop {
            let candidate = self
                .dir
                .join(format!("{BACKUP_PREFIX}{stamp:020}{BACKUP_SUFFIX}"));
            if !candidate.exists() {
                break candidate;
            }
            // Two writes within the same nanosecond tick.
            stamp += 1;
        };

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.persist_noclobber(&path)
            .map_err(|err| StoreError::Io(err.error))?;

        debug!(path = %path.display(), "wrote backup snapshot");
        Ok(path)
    }

    /// All snapshot paths, oldest first.
    pub fn snapshots(&self) -> Result<Vec<PathBuf>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_SUFFIX) {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Raw bytes of the newest snapshot, or `None` when no backup exists.
    pub fn most_recent(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let mut paths = self.snapshots()?;
        match paths.pop() {
            Some(path) => Ok(Some(fs::read(path)?)),
            None => Ok(None),
        }
    }
}
