//! Settings for tierback
//!
//! Describes what gets captured, how archives are named, and the retention
//! tiers. Everything is passed explicitly into the backup components; defaults
//! mirror the Art Institut deployment the tool was written for.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::paths::BackupPaths;
use crate::backup::{RetentionPolicy, RetentionRule};
use crate::error::BackupError;
use crate::naming::ArchiveNaming;

/// A database dumped with `mysqldump` inside its container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSource {
    /// Logical identifier, also the dump's file stem
    pub id: String,
    /// Container running the database server
    pub container: String,
    /// Whether verification insists on this dump being present
    #[serde(default = "default_true")]
    pub required: bool,
}

/// A named Docker volume snapshotted as a gzipped tarball
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSource {
    pub id: String,
    pub volume: String,
}

/// A directory inside a container holding key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretsSource {
    pub id: String,
    pub container: String,
    /// Directory inside the container that holds `directory`
    pub parent_dir: String,
    /// Directory name to archive, relative to `parent_dir`
    pub directory: String,
}

/// A host directory tree (the deployment's configuration checkout)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigTreeSource {
    pub id: String,
    pub root: PathBuf,
    /// tar exclude patterns, relative to the tree's own directory name
    #[serde(default)]
    pub excludes: Vec<String>,
}

/// All capture sources, in capture order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    #[serde(default)]
    pub databases: Vec<DatabaseSource>,
    #[serde(default)]
    pub volumes: Vec<VolumeSource>,
    pub secrets: SecretsSource,
    #[serde(default)]
    pub config_tree: Option<ConfigTreeSource>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        let volumes = [
            ("kimai_db_data", "art-insitut_kimai_db_data"),
            ("kimai_public", "art-insitut_kimai_public"),
            ("kimai_var", "art-insitut_kimai_var"),
            ("nextcloud_data", "art-insitut_nextcloud_data"),
            ("nextcloud_db_data", "art-insitut_nextcloud_db_data"),
            ("redis_data", "art-insitut_redis_data"),
        ]
        .into_iter()
        .map(|(id, volume)| VolumeSource {
            id: id.to_string(),
            volume: volume.to_string(),
        })
        .collect();

        Self {
            databases: vec![
                DatabaseSource {
                    id: "kimai".into(),
                    container: "art-institut-kimai-db".into(),
                    required: true,
                },
                DatabaseSource {
                    id: "nextcloud".into(),
                    container: "art-institut-nextcloud-db".into(),
                    required: true,
                },
            ],
            volumes,
            secrets: SecretsSource {
                id: "files_encryption".into(),
                container: "art-institut-nextcloud".into(),
                parent_dir: "/var/www/html/data".into(),
                directory: "files_encryption".into(),
            },
            config_tree: Some(ConfigTreeSource {
                id: "repo".into(),
                root: PathBuf::from("."),
                excludes: vec![
                    "backups".into(),
                    "node_modules".into(),
                    "*.pyc".into(),
                    "__pycache__".into(),
                ],
            }),
        }
    }
}

/// One retention tier as written in the settings file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSettings {
    /// Upper bound on archive age in seconds; absent for the catch-all tier
    #[serde(default)]
    pub age_limit_secs: Option<u64>,
    /// Bucket width in seconds
    pub bucket_width_secs: u64,
}

/// Retention tiers, tightest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSettings {
    pub tiers: Vec<TierSettings>,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        const DAY: u64 = 24 * HOUR;

        let tier = |limit: Option<u64>, width: u64| TierSettings {
            age_limit_secs: limit,
            bucket_width_secs: width,
        };

        Self {
            tiers: vec![
                tier(Some(2 * HOUR), 15 * MINUTE),
                tier(Some(DAY), 30 * MINUTE),
                tier(Some(14 * DAY), DAY),
                tier(Some(30 * DAY), 5 * DAY),
                tier(None, 30 * DAY),
            ],
        }
    }
}

impl RetentionSettings {
    /// Build a validated retention policy from these tiers
    pub fn to_policy(&self) -> Result<RetentionPolicy, BackupError> {
        let rules = self
            .tiers
            .iter()
            .map(|t| RetentionRule {
                age_limit: t.age_limit_secs.map(Duration::from_secs),
                bucket_width: Duration::from_secs(t.bucket_width_secs),
            })
            .collect();
        RetentionPolicy::new(rules)
    }
}

/// User settings for tierback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Archive store directory; defaults to `<base>/backups`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,

    /// Filename prefix shared by every archive
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,

    /// Archive filename extension
    #[serde(default = "default_archive_extension")]
    pub archive_extension: String,

    /// zstd level used when packaging
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Per-source capture timeout in seconds; none waits indefinitely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_timeout_secs: Option<u64>,

    /// Docker CLI used by the database, volume and secrets adapters
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    /// tar binary used for the configuration tree
    #[serde(default = "default_tar_binary")]
    pub tar_binary: String,

    /// Helper image mounting volumes for snapshots
    #[serde(default = "default_volume_image")]
    pub volume_image: String,

    #[serde(default)]
    pub sources: SourceSettings,

    #[serde(default)]
    pub retention: RetentionSettings,
}

fn default_true() -> bool {
    true
}

fn default_archive_prefix() -> String {
    "art-institut-backup".to_string()
}

fn default_archive_extension() -> String {
    "tar.zst".to_string()
}

fn default_compression_level() -> i32 {
    3
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_tar_binary() -> String {
    "tar".to_string()
}

fn default_volume_image() -> String {
    "busybox".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_dir: None,
            archive_prefix: default_archive_prefix(),
            archive_extension: default_archive_extension(),
            compression_level: default_compression_level(),
            capture_timeout_secs: None,
            docker_binary: default_docker_binary(),
            tar_binary: default_tar_binary(),
            volume_image: default_volume_image(),
            sources: SourceSettings::default(),
            retention: RetentionSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a file, or fall back to defaults if it doesn't exist
    ///
    /// A relative configuration tree root is taken relative to the settings
    /// file's directory, never the working directory.
    pub fn load_or_default(path: &Path) -> Result<Self, BackupError> {
        let mut settings = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| BackupError::Io(format!("Failed to read settings file: {}", e)))?;

            serde_json::from_str(&contents).map_err(|e| {
                BackupError::Config(format!("Failed to parse settings file: {}", e))
            })?
        } else {
            Settings::default()
        };

        if let Some(dir) = path.parent() {
            settings.anchor_to(dir);
        }
        Ok(settings)
    }

    /// Resolve a relative configuration tree root against `dir`
    pub fn anchor_to(&mut self, dir: &Path) {
        if let Some(tree) = self.sources.config_tree.as_mut() {
            if tree.root.is_relative() {
                tree.root = dir.join(&tree.root);
            }
        }
    }

    /// Check that every source captures to its own path inside the staged tree
    ///
    /// Source ids must be a single plain path component, and no two sources
    /// may produce the same staged file.
    pub fn validate(&self) -> Result<(), BackupError> {
        let sources = &self.sources;
        let mut staged = Vec::new();

        for db in &sources.databases {
            staged.push((&db.id, crate::capture::database_dump_path(&db.id)));
        }
        for volume in &sources.volumes {
            staged.push((&volume.id, crate::capture::volume_snapshot_path(&volume.id)));
        }
        staged.push((
            &sources.secrets.id,
            crate::capture::secrets_archive_path(&sources.secrets.id),
        ));
        if let Some(tree) = &sources.config_tree {
            staged.push((&tree.id, crate::capture::config_tree_path(&tree.id)));
        }

        let mut seen = HashSet::new();
        for (id, relative) in staged {
            if !is_plain_component(id) {
                return Err(BackupError::Config(format!(
                    "source id '{}' must be a single file name",
                    id
                )));
            }
            if !seen.insert(relative.clone()) {
                return Err(BackupError::Config(format!(
                    "more than one source captures to {}",
                    relative
                )));
            }
        }

        Ok(())
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> Result<(), BackupError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BackupError::Io(format!("Failed to create config directory: {}", e))
            })?;
        }

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| BackupError::Config(format!("Failed to serialize settings: {}", e)))?;

        std::fs::write(path, contents)
            .map_err(|e| BackupError::Io(format!("Failed to write settings file: {}", e)))
    }

    /// Resolve the archive store directory
    pub fn store_dir(&self, paths: &BackupPaths) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(|| paths.default_store_dir())
    }

    /// Archive naming scheme for the store
    pub fn naming(&self) -> ArchiveNaming {
        ArchiveNaming::new(self.archive_prefix.clone(), self.archive_extension.clone())
    }

    pub fn capture_timeout(&self) -> Option<Duration> {
        self.capture_timeout_secs.map(Duration::from_secs)
    }

    /// Manifest paths that must be present for an archive to verify
    pub fn required_items(&self) -> Vec<String> {
        let mut required: Vec<String> = self
            .sources
            .databases
            .iter()
            .filter(|db| db.required)
            .map(|db| crate::capture::database_dump_path(&db.id))
            .collect();
        required.push(crate::capture::secrets_archive_path(&self.sources.secrets.id));
        required
    }
}

fn is_plain_component(id: &str) -> bool {
    let mut components = Path::new(id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == OsStr::new(id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.archive_prefix, "art-institut-backup");
        assert_eq!(settings.archive_extension, "tar.zst");
        assert_eq!(settings.sources.databases.len(), 2);
        assert_eq!(settings.sources.volumes.len(), 6);
        assert_eq!(settings.retention.tiers.len(), 5);
        assert!(settings.capture_timeout().is_none());
    }

    #[test]
    fn test_default_retention_is_valid() {
        let policy = Settings::default().retention.to_policy().unwrap();
        assert_eq!(policy.rules().len(), 5);
        assert!(policy.rules()[4].age_limit.is_none());
    }

    #[test]
    fn test_required_items() {
        let settings = Settings::default();
        assert_eq!(
            settings.required_items(),
            vec![
                "databases/kimai.sql".to_string(),
                "databases/nextcloud.sql".to_string(),
                "files_encryption.tar.gz".to_string(),
            ]
        );
    }

    #[test]
    fn test_optional_database_not_required() {
        let mut settings = Settings::default();
        settings.sources.databases[1].required = false;
        assert!(!settings
            .required_items()
            .contains(&"databases/nextcloud.sql".to_string()));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");

        let mut settings = Settings::default();
        settings.archive_prefix = "snap".into();
        settings.capture_timeout_secs = Some(600);
        settings.save(&path).unwrap();

        let loaded = Settings::load_or_default(&path).unwrap();
        assert_eq!(loaded.archive_prefix, "snap");
        assert_eq!(loaded.capture_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(loaded.sources.databases, settings.sources.databases);
        assert_eq!(loaded.sources.volumes, settings.sources.volumes);
    }

    #[test]
    fn test_relative_tree_root_follows_settings_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        Settings::default().save(&path).unwrap();

        let loaded = Settings::load_or_default(&path).unwrap();
        let root = &loaded.sources.config_tree.as_ref().unwrap().root;
        assert_eq!(root, &temp_dir.path().join("."));

        let defaults = Settings::load_or_default(&temp_dir.path().join("absent.json")).unwrap();
        assert!(defaults.sources.config_tree.unwrap().root.starts_with(temp_dir.path()));
    }

    #[test]
    fn test_absolute_tree_root_is_kept() {
        let mut settings = Settings::default();
        settings.sources.config_tree.as_mut().unwrap().root = PathBuf::from("/srv/stack");
        settings.anchor_to(Path::new("/home/ops"));
        assert_eq!(
            settings.sources.config_tree.unwrap().root,
            PathBuf::from("/srv/stack")
        );
    }

    #[test]
    fn test_old_settings_with_schema_version_still_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{"schema_version": 1, "archive_prefix": "x"}"#).unwrap();

        assert_eq!(Settings::load_or_default(&path).unwrap().archive_prefix, "x");
    }

    #[test]
    fn test_default_sources_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_duplicate_source_ids_rejected() {
        let mut settings = Settings::default();
        settings.sources.databases[1].id = "kimai".into();

        let err = settings.validate().unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
        assert!(err.to_string().contains("databases/kimai.sql"));
    }

    #[test]
    fn test_same_id_across_kinds_is_allowed() {
        let mut settings = Settings::default();
        settings.sources.volumes[0].id = "kimai".into();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_path_like_source_ids_rejected() {
        for bad in ["../escaped", "a/b", "", ".", "..", "nested/"] {
            let mut settings = Settings::default();
            settings.sources.secrets.id = bad.into();
            assert!(
                matches!(settings.validate(), Err(BackupError::Config(_))),
                "{bad:?} accepted"
            );
        }

        let mut settings = Settings::default();
        settings.sources.volumes[2].id = "../../store/x".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let loaded = Settings::load_or_default(&temp_dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded.archive_prefix, "art-institut-backup");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{"archive_prefix": "custom"}"#).unwrap();

        let loaded = Settings::load_or_default(&path).unwrap();
        assert_eq!(loaded.archive_prefix, "custom");
        assert_eq!(loaded.retention, RetentionSettings::default());
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        let err = Settings::load_or_default(&path).unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[test]
    fn test_store_dir_override() {
        let paths = BackupPaths::with_base_dir(PathBuf::from("/base"));
        let mut settings = Settings::default();
        assert_eq!(settings.store_dir(&paths), PathBuf::from("/base/backups"));

        settings.store_dir = Some(PathBuf::from("/srv/backups"));
        assert_eq!(settings.store_dir(&paths), PathBuf::from("/srv/backups"));
    }
}
