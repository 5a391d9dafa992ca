//! Backup manager for tierback
//!
//! Ties the store, the staging coordinator, the retention policy and the
//! verifier together. A run captures one archive and then prunes the store;
//! both steps happen under the store lock.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{info, warn};

use super::lock::StoreLock;
use super::retention::RetentionPolicy;
use super::staging::StagingCoordinator;
use super::store::{Archive, ArchiveStore};
use super::verify::{IntegrityVerifier, VerificationReport};
use crate::capture::{sources_from_settings, CaptureSource};
use crate::config::Settings;
use crate::error::{BackupError, BackupResult};
use crate::naming::{Clock, SystemClock};

/// Result of one capture-and-prune cycle
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The archive this run added
    pub created: Archive,
    /// Archives deleted by retention afterwards
    pub removed: Vec<PathBuf>,
}

/// Manages backup creation, retention and verification
pub struct BackupManager {
    store: ArchiveStore,
    coordinator: StagingCoordinator,
    policy: RetentionPolicy,
    verifier: IntegrityVerifier,
    clock: Rc<dyn Clock>,
}

impl BackupManager {
    /// Create a manager for the store at `store_root` using configured sources
    pub fn from_settings(store_root: impl Into<PathBuf>, settings: &Settings) -> BackupResult<Self> {
        settings.validate()?;

        let store = ArchiveStore::new(store_root, settings.naming());
        let policy = settings.retention.to_policy()?;
        let verifier = IntegrityVerifier::from_settings(settings);
        let sources = sources_from_settings(settings, store.root());

        Ok(Self::new(store, sources, policy, verifier)
            .with_compression_level(settings.compression_level))
    }

    /// Create a manager from explicit parts, using the wall clock
    pub fn new(
        store: ArchiveStore,
        sources: Vec<Box<dyn CaptureSource>>,
        policy: RetentionPolicy,
        verifier: IntegrityVerifier,
    ) -> Self {
        let clock: Rc<dyn Clock> = Rc::new(SystemClock);
        let coordinator = StagingCoordinator::new(store.clone(), sources, clock.clone(), 3);
        Self {
            store,
            coordinator,
            policy,
            verifier,
            clock,
        }
    }

    /// Replace the clock used for naming archives and aging them
    pub fn with_clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.coordinator.set_clock(clock.clone());
        self.clock = clock;
        self
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.coordinator.set_compression_level(level);
        self
    }

    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Capture a new archive, then prune the store
    ///
    /// Nothing is pruned if the capture fails.
    pub fn run(&self) -> BackupResult<RunReport> {
        let _lock = self.lock()?;

        let created = self.coordinator.create_backup()?;
        let removed = self.prune_unlocked()?;

        Ok(RunReport { created, removed })
    }

    /// Capture a new archive without pruning
    pub fn create_backup(&self) -> BackupResult<Archive> {
        let _lock = self.lock()?;
        self.coordinator.create_backup()
    }

    /// Delete every archive the retention policy does not keep
    ///
    /// Returns the paths of the deleted archives.
    pub fn prune(&self) -> BackupResult<Vec<PathBuf>> {
        let _lock = self.lock()?;
        self.prune_unlocked()
    }

    fn prune_unlocked(&self) -> BackupResult<Vec<PathBuf>> {
        let archives = self.store.list()?;
        let decision = self.policy.decide(&archives, self.clock.now());

        let mut removed = Vec::new();
        for archive in decision.remove {
            if self.store.remove(&archive)? {
                removed.push(archive.path);
            }
        }

        info!(
            kept = decision.keep.len(),
            removed = removed.len(),
            "retention applied"
        );
        Ok(removed)
    }

    /// Verify a single archive
    pub fn verify(&self, path: &Path) -> BackupResult<VerificationReport> {
        self.verifier.verify(path)
    }

    /// Verify the newest archive in the store
    pub fn verify_latest(&self) -> BackupResult<VerificationReport> {
        let latest = self
            .store
            .latest()?
            .ok_or_else(|| BackupError::archive_not_found("latest"))?;
        self.verify(&latest.path)
    }

    /// Take the store lock and clear leftovers from killed runs
    fn lock(&self) -> BackupResult<StoreLock> {
        self.store.ensure_exists()?;
        let lock = StoreLock::acquire(self.store.root())?;

        if let Err(e) = self.coordinator.sweep_stale() {
            warn!(error = %e, "failed to sweep stale staging entries");
        }

        Ok(lock)
    }
}
