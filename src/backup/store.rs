//! Archive store
//!
//! The store is a plain directory. Its state is whatever the directory
//! listing says: every file named `<prefix>-<timestamp>.<ext>` is an archive,
//! everything else (scratch directories, partial packages, the lock file,
//! operator notes) is invisible.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{BackupError, BackupResult};
use crate::naming::ArchiveNaming;

/// A finished archive in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    /// Archive filename
    pub file_name: String,
    /// Full path to the archive
    pub path: PathBuf,
    /// Capture time parsed from the filename
    pub timestamp: DateTime<Utc>,
    /// Size in bytes
    pub size_bytes: u64,
}

impl Archive {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }
}

/// Filesystem capacity underneath the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCapacity {
    pub total: u64,
    pub free: u64,
}

/// Directory of finished archives
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    root: PathBuf,
    naming: ArchiveNaming,
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>, naming: ArchiveNaming) -> Self {
        Self {
            root: root.into(),
            naming,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn naming(&self) -> &ArchiveNaming {
        &self.naming
    }

    /// Create the store directory if it doesn't exist yet
    pub fn ensure_exists(&self) -> BackupResult<()> {
        fs::create_dir_all(&self.root).map_err(|e| {
            BackupError::Store(format!(
                "Failed to create store directory {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    /// Path an archive captured at `timestamp` is stored under
    pub fn archive_path(&self, timestamp: DateTime<Utc>) -> PathBuf {
        self.root.join(self.naming.file_name(timestamp))
    }

    /// List all archives, newest first
    pub fn list(&self) -> BackupResult<Vec<Archive>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut archives = Vec::new();

        for entry in fs::read_dir(&self.root)
            .map_err(|e| BackupError::Io(format!("Failed to read store directory: {}", e)))?
        {
            let entry = entry
                .map_err(|e| BackupError::Io(format!("Failed to read directory entry: {}", e)))?;

            if let Some(archive) = self.inspect(&entry.path()) {
                archives.push(archive);
            }
        }

        archives.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });

        Ok(archives)
    }

    /// Describe a path as an archive, if it is one
    pub fn inspect(&self, path: &Path) -> Option<Archive> {
        let file_name = path.file_name()?.to_str()?.to_string();
        let timestamp = self.naming.parse(&file_name)?;

        let metadata = fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }

        Some(Archive {
            file_name,
            path: path.to_path_buf(),
            timestamp,
            size_bytes: metadata.len(),
        })
    }

    /// Get the most recent archive
    pub fn latest(&self) -> BackupResult<Option<Archive>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Resolve an archive identifier to a path
    ///
    /// Accepts `latest`, a path to an existing file, or a filename inside the
    /// store.
    pub fn resolve(&self, identifier: &str) -> BackupResult<PathBuf> {
        if identifier.eq_ignore_ascii_case("latest") {
            return self
                .latest()?
                .map(|a| a.path)
                .ok_or_else(|| BackupError::archive_not_found("latest"));
        }

        let path = PathBuf::from(identifier);
        if path.is_file() {
            return Ok(path);
        }

        let in_store = self.root.join(identifier);
        if in_store.is_file() {
            return Ok(in_store);
        }

        Err(BackupError::archive_not_found(identifier))
    }

    /// Total and free bytes of the filesystem holding the store
    pub fn capacity(&self) -> BackupResult<StoreCapacity> {
        let total = fs2::total_space(&self.root)
            .map_err(|e| BackupError::Io(format!("Failed to query disk size: {}", e)))?;
        let free = fs2::available_space(&self.root)
            .map_err(|e| BackupError::Io(format!("Failed to query free space: {}", e)))?;
        Ok(StoreCapacity { total, free })
    }

    /// Bytes occupied by archives
    pub fn used_by_archives(&self) -> BackupResult<u64> {
        Ok(self.list()?.iter().map(|a| a.size_bytes).sum())
    }

    /// Delete an archive
    ///
    /// Returns `false` if it was already gone.
    pub fn remove(&self, archive: &Archive) -> BackupResult<bool> {
        match fs::remove_file(&archive.path) {
            Ok(()) => {
                info!(archive = %archive.file_name, "removed archive");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(archive = %archive.file_name, "archive already removed");
                Ok(false)
            }
            Err(e) => Err(BackupError::Store(format!(
                "Failed to delete {}: {}",
                archive.path.display(),
                e
            ))),
        }
    }
}
