//! Cross-process lock on the archive store
//!
//! At most one capture-or-prune cycle may touch a store at a time. The lock
//! is an advisory OS lock on `<store>/.lock`, released when the guard drops.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::{BackupError, BackupResult};

/// Lock file name inside the store (never matches the archive pattern)
pub const LOCK_FILE: &str = ".lock";

/// A held lock on an archive store
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Take the store lock without waiting
    ///
    /// Fails with [`BackupError::Locked`] if another process holds it.
    pub fn acquire(store_root: &Path) -> BackupResult<Self> {
        let path = store_root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| BackupError::Store(format!("Failed to open {}: {}", path.display(), e)))?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(BackupError::Locked(format!(
                    "another backup or prune is running on {}",
                    store_root.display()
                )));
            }
            return Err(BackupError::Store(format!(
                "Failed to lock {}: {}",
                path.display(),
                e
            )));
        }

        debug!(lock = %path.display(), "acquired store lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let temp = TempDir::new().unwrap();

        let held = StoreLock::acquire(temp.path()).unwrap();
        let err = StoreLock::acquire(temp.path()).unwrap_err();
        assert!(matches!(err, BackupError::Locked(_)));

        drop(held);
        assert!(StoreLock::acquire(temp.path()).is_ok());
    }

    #[test]
    fn test_lock_file_location() {
        let temp = TempDir::new().unwrap();
        let lock = StoreLock::acquire(temp.path()).unwrap();
        assert_eq!(lock.path(), temp.path().join(".lock"));
    }
}
