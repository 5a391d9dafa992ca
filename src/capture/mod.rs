//! Capture sources for tierback
//!
//! A capture source turns one external data source into one file inside the
//! staged tree. Every source shares the same contract: write the capture to
//! the destination path, or fail without leaving anything at that path.
//!
//! # Staged layout
//!
//! - `databases/<id>.sql`: database dumps
//! - `volumes/<id>.tar.gz`: volume snapshots
//! - `<id>.tar.gz`: the secrets directory
//! - `<id>.tar.zst`: the configuration tree

mod command;
mod sources;

use std::fs;
use std::path::Path;

use crate::config::Settings;
use crate::error::{BackupError, BackupResult};

pub use command::{partial_path, CommandCapture};
pub use sources::{ConfigTree, DatabaseDump, SecretsDirectory, VolumeSnapshot};

/// Kind of data source, in capture order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceKind {
    Database,
    Volume,
    Secrets,
    ConfigTree,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Database => write!(f, "database"),
            SourceKind::Volume => write!(f, "volume"),
            SourceKind::Secrets => write!(f, "secrets"),
            SourceKind::ConfigTree => write!(f, "config tree"),
        }
    }
}

/// One capturable data source
pub trait CaptureSource {
    /// Logical identifier recorded in the manifest
    fn id(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// `/`-separated path of the capture inside the staged tree
    fn relative_path(&self) -> String;

    /// Write the capture to `destination`
    ///
    /// Must not leave a file at `destination` unless the capture succeeded.
    fn capture(&self, destination: &Path) -> BackupResult<()>;
}

pub fn database_dump_path(id: &str) -> String {
    format!("databases/{}.sql", id)
}

pub fn volume_snapshot_path(id: &str) -> String {
    format!("volumes/{}.tar.gz", id)
}

pub fn secrets_archive_path(id: &str) -> String {
    format!("{}.tar.gz", id)
}

pub fn config_tree_path(id: &str) -> String {
    format!("{}.tar.zst", id)
}

/// Build the configured capture sources in capture order
///
/// `store_root` is kept out of the configuration tree capture.
pub fn sources_from_settings(
    settings: &Settings,
    store_root: &Path,
) -> Vec<Box<dyn CaptureSource>> {
    let timeout = settings.capture_timeout();
    let docker = settings.docker_binary.as_str();
    let mut sources: Vec<Box<dyn CaptureSource>> = Vec::new();

    for db in &settings.sources.databases {
        sources.push(Box::new(DatabaseDump::new(db.clone(), docker, timeout)));
    }

    for volume in &settings.sources.volumes {
        sources.push(Box::new(VolumeSnapshot::new(
            volume.clone(),
            docker,
            settings.volume_image.as_str(),
            timeout,
        )));
    }

    sources.push(Box::new(SecretsDirectory::new(
        settings.sources.secrets.clone(),
        docker,
        timeout,
    )));

    if let Some(tree) = &settings.sources.config_tree {
        sources.push(Box::new(
            ConfigTree::new(tree.clone(), settings.tar_binary.as_str(), timeout)
                .excluding(store_root),
        ));
    }

    sources
}

/// Source that writes fixed bytes instead of calling out to external systems
#[derive(Debug, Clone)]
pub struct FixedBytesSource {
    id: String,
    kind: SourceKind,
    relative_path: String,
    bytes: Vec<u8>,
}

impl FixedBytesSource {
    pub fn new(
        id: impl Into<String>,
        kind: SourceKind,
        relative_path: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            relative_path: relative_path.into(),
            bytes: bytes.into(),
        }
    }

    pub fn database(id: &str) -> Self {
        Self::new(
            id,
            SourceKind::Database,
            database_dump_path(id),
            format!("-- dump of {}\n", id),
        )
    }

    pub fn volume(id: &str) -> Self {
        Self::new(
            id,
            SourceKind::Volume,
            volume_snapshot_path(id),
            format!("volume {}", id),
        )
    }

    pub fn secrets(id: &str) -> Self {
        Self::new(id, SourceKind::Secrets, secrets_archive_path(id), "secret keys")
    }

    pub fn config_tree(id: &str) -> Self {
        Self::new(id, SourceKind::ConfigTree, config_tree_path(id), "config tree")
    }
}

impl CaptureSource for FixedBytesSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn relative_path(&self) -> String {
        self.relative_path.clone()
    }

    fn capture(&self, destination: &Path) -> BackupResult<()> {
        fs::write(destination, &self.bytes).map_err(|e| {
            BackupError::capture(&self.id, format!("failed to write capture: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_from_default_settings_are_ordered() {
        let settings = Settings::default();
        let sources = sources_from_settings(&settings, Path::new("/srv/backups"));

        assert_eq!(sources.len(), 2 + 6 + 1 + 1);
        let kinds: Vec<SourceKind> = sources.iter().map(|s| s.kind()).collect();
        let mut sorted = kinds.clone();
        sorted.sort();
        assert_eq!(kinds, sorted);
        assert_eq!(sources[0].id(), "kimai");
        assert_eq!(sources[8].relative_path(), "files_encryption.tar.gz");
        assert_eq!(sources[9].relative_path(), "repo.tar.zst");
    }

    #[test]
    fn test_sources_without_config_tree() {
        let mut settings = Settings::default();
        settings.sources.config_tree = None;
        let sources = sources_from_settings(&settings, Path::new("/srv/backups"));
        assert_eq!(sources.last().unwrap().kind(), SourceKind::Secrets);
    }

    #[test]
    fn test_fixed_bytes_source_writes() {
        let temp = tempfile::TempDir::new().unwrap();
        let dest = temp.path().join("kimai.sql");

        FixedBytesSource::database("kimai").capture(&dest).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "-- dump of kimai\n");
    }
}
