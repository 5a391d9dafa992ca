//! Staging coordinator
//!
//! Captures every source into a scratch directory under the store root,
//! writes the manifest, and packages the tree into one archive. The scratch
//! directory is owned by a [`TempDir`] guard, so it is removed on success, on
//! any error, and while unwinding from a panic. Interrupts surface as errors
//! at the next poll and take the same path.

use std::fs;
use std::path::Path;
use std::rc::Rc;

use chrono::SubsecRound;
use tempfile::TempDir;
use tracing::{info, warn};

use super::manifest::Manifest;
use super::package::package_tree;
use super::store::{Archive, ArchiveStore};
use crate::capture::{CaptureSource, SourceKind};
use crate::error::{BackupError, BackupResult};
use crate::interrupt;
use crate::naming::{format_timestamp, Clock};

/// Name prefix of scratch directories inside the store
pub const STAGING_PREFIX: &str = "staging";

/// Builds one archive from all capture sources
pub struct StagingCoordinator {
    store: ArchiveStore,
    sources: Vec<Box<dyn CaptureSource>>,
    clock: Rc<dyn Clock>,
    compression_level: i32,
}

impl StagingCoordinator {
    /// Create a coordinator
    ///
    /// Sources are captured grouped by kind (databases, volumes, secrets,
    /// configuration tree), keeping the given order within each kind.
    pub fn new(
        store: ArchiveStore,
        mut sources: Vec<Box<dyn CaptureSource>>,
        clock: Rc<dyn Clock>,
        compression_level: i32,
    ) -> Self {
        sources.sort_by_key(|source| source.kind());
        Self {
            store,
            sources,
            clock,
            compression_level,
        }
    }

    pub(crate) fn set_clock(&mut self, clock: Rc<dyn Clock>) {
        self.clock = clock;
    }

    pub(crate) fn set_compression_level(&mut self, level: i32) {
        self.compression_level = level;
    }

    pub fn sources(&self) -> impl Iterator<Item = &dyn CaptureSource> {
        self.sources.iter().map(|source| source.as_ref())
    }

    /// Capture all sources and add exactly one archive to the store
    ///
    /// On failure nothing is added and the scratch directory is gone.
    pub fn create_backup(&self) -> BackupResult<Archive> {
        self.store.ensure_exists()?;

        let timestamp = self.clock.now().trunc_subsecs(0);
        let destination = self.store.archive_path(timestamp);
        if destination.exists() {
            return Err(BackupError::Store(format!(
                "{} already exists",
                destination.display()
            )));
        }

        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", STAGING_PREFIX, format_timestamp(timestamp)))
            .tempdir_in(self.store.root())
            .map_err(|e| {
                BackupError::Store(format!("Failed to create staging directory: {}", e))
            })?;

        info!(
            staging = %scratch.path().display(),
            sources = self.sources.len(),
            "starting backup"
        );

        self.capture_all(scratch.path())?;

        let manifest = Manifest::collect(
            scratch.path(),
            timestamp,
            self.clock.now(),
            self.ids_of(Some(SourceKind::Volume)),
            self.ids_of(None),
        )?;
        manifest.write_to(scratch.path())?;

        package_tree(scratch.path(), &destination, self.compression_level)?;

        let archive = self.store.inspect(&destination).ok_or_else(|| {
            BackupError::Store(format!(
                "{} vanished after packaging",
                destination.display()
            ))
        })?;

        info!(
            archive = %archive.file_name,
            size_bytes = archive.size_bytes,
            files = manifest.files.len(),
            "backup created"
        );

        close_scratch(scratch);
        Ok(archive)
    }

    fn capture_all(&self, scratch: &Path) -> BackupResult<()> {
        for source in &self.sources {
            if interrupt::requested() {
                return Err(BackupError::capture(source.id(), "interrupted"));
            }

            let destination = scratch.join(source.relative_path());
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }

            info!(source = source.id(), kind = %source.kind(), "capturing");
            source.capture(&destination)?;

            if !destination.is_file() {
                return Err(BackupError::capture(
                    source.id(),
                    "capture reported success but produced no file",
                ));
            }
        }
        Ok(())
    }

    fn ids_of(&self, kind: Option<SourceKind>) -> Vec<String> {
        self.sources
            .iter()
            .filter(|source| kind.map_or(true, |k| source.kind() == k))
            .map(|source| source.id().to_string())
            .collect()
    }

    /// Remove scratch directories and partial packages left by a killed run
    ///
    /// Only safe while holding the store lock.
    pub fn sweep_stale(&self) -> BackupResult<usize> {
        if !self.store.root().exists() {
            return Ok(0);
        }

        let staging_prefix = format!("{}-", STAGING_PREFIX);
        let mut removed = 0;

        for entry in fs::read_dir(self.store.root())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type()?;

            let result = if file_type.is_dir() && name.starts_with(&staging_prefix) {
                fs::remove_dir_all(entry.path())
            } else if file_type.is_file() && name.starts_with('.') && name.ends_with(".partial") {
                fs::remove_file(entry.path())
            } else {
                continue;
            };

            match result {
                Ok(()) => {
                    warn!(entry = %name, "removed leftover from an interrupted backup");
                    removed += 1;
                }
                Err(e) => warn!(entry = %name, error = %e, "could not remove stale entry"),
            }
        }

        Ok(removed)
    }
}

fn close_scratch(scratch: TempDir) {
    let path = scratch.path().to_path_buf();
    if let Err(e) = scratch.close() {
        warn!(staging = %path.display(), error = %e, "failed to remove staging directory");
    }
}
