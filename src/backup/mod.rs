//! Backup system for tierback
//!
//! Captures the Art Institut stack into timestamped archives, prunes them with
//! a tiered retention policy and verifies their integrity.
//!
//! # Architecture
//!
//! - `ArchiveStore`: the directory of finished archives
//! - `StagingCoordinator`: captures all sources and packages one archive
//! - `RetentionPolicy`: decides which archives survive, without touching disk
//! - `IntegrityVerifier`: checks an archive against its manifest
//! - `BackupManager`: runs capture then prune under the store lock
//!
//! # Archive Format
//!
//! Each archive is a zstd-compressed tar of the staged tree, with
//! `metadata.json` as the first entry:
//! - `databases/<id>.sql`: database dumps
//! - `volumes/<id>.tar.gz`: volume snapshots
//! - `files_encryption.tar.gz`: the Nextcloud encryption keys
//! - `repo.tar.zst`: the deployment's configuration tree
//!
//! # Example
//!
//! ```rust,ignore
//! use tierback::backup::BackupManager;
//! use tierback::config::{BackupPaths, Settings};
//!
//! let paths = BackupPaths::new()?;
//! let settings = Settings::load_or_default(&paths.settings_file())?;
//! let manager = BackupManager::from_settings(settings.store_dir(&paths), &settings)?;
//!
//! let report = manager.run()?;
//! manager.verify(&report.created.path)?;
//! ```

mod lock;
mod manager;
mod manifest;
mod package;
mod retention;
mod staging;
mod store;
mod verify;

pub use lock::StoreLock;
pub use manager::{BackupManager, RunReport};
pub use manifest::{Manifest, MANIFEST_FILE};
pub use package::{read_package, PackageListing};
pub use retention::{RetentionDecision, RetentionPolicy, RetentionRule};
pub use staging::{StagingCoordinator, STAGING_PREFIX};
pub use store::{Archive, ArchiveStore, StoreCapacity};
pub use verify::{IntegrityVerifier, VerificationReport};
