//! Manifest embedded at the root of every archive
//!
//! Written as pretty-printed JSON to `metadata.json` after all captures have
//! finished. `files` lists every regular file in the staged tree at that
//! point, and `sizes` records their lengths so verification can catch a
//! truncated payload without hashing it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{BackupError, BackupResult};
use crate::naming::format_timestamp;

/// Filename of the manifest inside the staged tree and the archive
pub const MANIFEST_FILE: &str = "metadata.json";

/// Archive manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Timestamp token shared with the archive filename
    pub timestamp: String,
    /// When the manifest was written (ISO-8601)
    pub created_utc: String,
    /// Volume snapshot identifiers
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Every captured source identifier, in capture order
    #[serde(default)]
    pub sources: Vec<String>,
    /// Sorted relative paths of the staged regular files
    ///
    /// Directories such as `databases` are not listed; each appears in the
    /// package only as the parent of the files below it.
    #[serde(default)]
    pub files: Vec<String>,
    /// Byte length of each staged file
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sizes: BTreeMap<String, u64>,
}

impl Manifest {
    /// Build a manifest from the files currently in a staged tree
    pub fn collect(
        staged: &Path,
        timestamp: DateTime<Utc>,
        created: DateTime<Utc>,
        volumes: Vec<String>,
        sources: Vec<String>,
    ) -> BackupResult<Self> {
        let mut sizes = BTreeMap::new();

        for entry in WalkDir::new(staged).min_depth(1) {
            let entry = entry
                .map_err(|e| BackupError::Io(format!("Failed to walk staged tree: {}", e)))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = relative_name(staged, entry.path())?;
            if relative == MANIFEST_FILE {
                continue;
            }

            let len = entry
                .metadata()
                .map_err(|e| BackupError::Io(format!("Failed to stat staged file: {}", e)))?
                .len();
            sizes.insert(relative, len);
        }

        Ok(Self {
            timestamp: format_timestamp(timestamp),
            created_utc: created.to_rfc3339_opts(SecondsFormat::Secs, true),
            volumes,
            sources,
            files: sizes.keys().cloned().collect(),
            sizes,
        })
    }

    /// Write the manifest into a staged tree
    pub fn write_to(&self, staged: &Path) -> BackupResult<()> {
        let mut json = serde_json::to_string_pretty(self)
            .map_err(|e| BackupError::Json(format!("Failed to serialize manifest: {}", e)))?;
        json.push('\n');

        fs::write(staged.join(MANIFEST_FILE), json)
            .map_err(|e| BackupError::Io(format!("Failed to write manifest: {}", e)))
    }

    pub fn from_slice(bytes: &[u8]) -> BackupResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| BackupError::Json(format!("Failed to parse manifest: {}", e)))
    }

    /// Required items absent from `files`, in the order given
    pub fn missing(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|item| !self.files.contains(item))
            .cloned()
            .collect()
    }
}

/// `/`-separated path of `path` relative to `root`
pub fn relative_name(root: &Path, path: &Path) -> BackupResult<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        BackupError::Io(format!(
            "{} is outside {}",
            path.display(),
            root.display()
        ))
    })?;

    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn staged_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("databases")).unwrap();
        fs::create_dir_all(temp.path().join("volumes")).unwrap();
        fs::write(temp.path().join("databases/kimai.sql"), "kimai").unwrap();
        fs::write(temp.path().join("volumes/redis_data.tar.gz"), "redis!").unwrap();
        fs::write(temp.path().join("files_encryption.tar.gz"), "k").unwrap();
        temp
    }

    #[test]
    fn test_collect_lists_files_only() {
        let temp = staged_tree();
        let ts = Utc.with_ymd_and_hms(2025, 5, 6, 7, 8, 9).unwrap();

        let manifest = Manifest::collect(
            temp.path(),
            ts,
            ts,
            vec!["redis_data".into()],
            vec!["kimai".into(), "redis_data".into(), "files_encryption".into()],
        )
        .unwrap();

        assert_eq!(manifest.timestamp, "20250506T070809Z");
        assert_eq!(manifest.created_utc, "2025-05-06T07:08:09Z");
        assert_eq!(
            manifest.files,
            vec![
                "databases/kimai.sql",
                "files_encryption.tar.gz",
                "volumes/redis_data.tar.gz"
            ]
        );
        assert_eq!(manifest.sizes["volumes/redis_data.tar.gz"], 6);
    }

    #[test]
    fn test_manifest_excludes_itself() {
        let temp = staged_tree();
        let ts = Utc.with_ymd_and_hms(2025, 5, 6, 7, 8, 9).unwrap();

        let first = Manifest::collect(temp.path(), ts, ts, vec![], vec![]).unwrap();
        first.write_to(temp.path()).unwrap();
        let second = Manifest::collect(temp.path(), ts, ts, vec![], vec![]).unwrap();

        assert_eq!(first, second);
        assert!(!second.files.contains(&MANIFEST_FILE.to_string()));
    }

    #[test]
    fn test_missing_required_items() {
        let temp = staged_tree();
        let ts = Utc.with_ymd_and_hms(2025, 5, 6, 7, 8, 9).unwrap();
        let manifest = Manifest::collect(temp.path(), ts, ts, vec![], vec![]).unwrap();

        let required = vec![
            "databases/kimai.sql".to_string(),
            "databases/nextcloud.sql".to_string(),
            "files_encryption.tar.gz".to_string(),
        ];
        assert_eq!(manifest.missing(&required), vec!["databases/nextcloud.sql"]);
    }

    #[test]
    fn test_reads_manifest_without_optional_fields() {
        let json = br#"{
            "timestamp": "20250101T000000Z",
            "created_utc": "2025-01-01T00:00:00.123456Z",
            "volumes": ["kimai_db_data"],
            "files": ["databases", "databases/kimai.sql"]
        }"#;

        let manifest = Manifest::from_slice(json).unwrap();
        assert!(manifest.sizes.is_empty());
        assert!(manifest.sources.is_empty());
        assert_eq!(manifest.files.len(), 2);
    }

    #[test]
    fn test_relative_name() {
        let root = Path::new("/stage");
        assert_eq!(
            relative_name(root, Path::new("/stage/databases/kimai.sql")).unwrap(),
            "databases/kimai.sql"
        );
        assert!(relative_name(root, Path::new("/elsewhere/x")).is_err());
    }
}
