//! Capture adapters for the deployment's data sources
//!
//! Each adapter is a thin wrapper that turns its settings into a
//! [`CommandCapture`]; the runner enforces the shared failure contract.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::command::CommandCapture;
use super::{
    config_tree_path, database_dump_path, secrets_archive_path, volume_snapshot_path,
    CaptureSource, SourceKind,
};
use crate::config::settings::{ConfigTreeSource, DatabaseSource, SecretsSource, VolumeSource};
use crate::error::{BackupError, BackupResult};

/// `mysqldump` run inside the database container, credentials from its environment
pub struct DatabaseDump {
    source: DatabaseSource,
    docker: String,
    timeout: Option<Duration>,
}

impl DatabaseDump {
    pub fn new(source: DatabaseSource, docker: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            source,
            docker: docker.into(),
            timeout,
        }
    }

    pub fn command(&self) -> CommandCapture {
        CommandCapture::new(&self.docker).args([
            "exec",
            self.source.container.as_str(),
            "sh",
            "-c",
            "mysqldump -u\"$MYSQL_USER\" -p\"$MYSQL_PASSWORD\" \"$MYSQL_DATABASE\"",
        ])
    }
}

impl CaptureSource for DatabaseDump {
    fn id(&self) -> &str {
        &self.source.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Database
    }

    fn relative_path(&self) -> String {
        database_dump_path(&self.source.id)
    }

    fn capture(&self, destination: &Path) -> BackupResult<()> {
        self.command().run(&self.source.id, destination, self.timeout)
    }
}

/// Read-only mount of a named volume into a throwaway container, tarred to stdout
pub struct VolumeSnapshot {
    source: VolumeSource,
    docker: String,
    image: String,
    timeout: Option<Duration>,
}

impl VolumeSnapshot {
    pub fn new(
        source: VolumeSource,
        docker: impl Into<String>,
        image: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            source,
            docker: docker.into(),
            image: image.into(),
            timeout,
        }
    }

    pub fn command(&self) -> CommandCapture {
        CommandCapture::new(&self.docker)
            .args(["run", "--rm"])
            .arg(format!("-v{}:/volume:ro", self.source.volume))
            .args([self.image.as_str(), "tar", "czf", "-", "-C", "/volume", "."])
    }
}

impl CaptureSource for VolumeSnapshot {
    fn id(&self) -> &str {
        &self.source.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Volume
    }

    fn relative_path(&self) -> String {
        volume_snapshot_path(&self.source.id)
    }

    fn capture(&self, destination: &Path) -> BackupResult<()> {
        self.command().run(&self.source.id, destination, self.timeout)
    }
}

/// Key material directory tarred from inside its application container
pub struct SecretsDirectory {
    source: SecretsSource,
    docker: String,
    timeout: Option<Duration>,
}

impl SecretsDirectory {
    pub fn new(source: SecretsSource, docker: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            source,
            docker: docker.into(),
            timeout,
        }
    }

    pub fn command(&self) -> CommandCapture {
        CommandCapture::new(&self.docker).args([
            "exec",
            self.source.container.as_str(),
            "tar",
            "czf",
            "-",
            "-C",
            self.source.parent_dir.as_str(),
            self.source.directory.as_str(),
        ])
    }
}

impl CaptureSource for SecretsDirectory {
    fn id(&self) -> &str {
        &self.source.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Secrets
    }

    fn relative_path(&self) -> String {
        secrets_archive_path(&self.source.id)
    }

    fn capture(&self, destination: &Path) -> BackupResult<()> {
        self.command().run(&self.source.id, destination, self.timeout)
    }
}

/// Host directory tree packed with `tar --zstd`
pub struct ConfigTree {
    source: ConfigTreeSource,
    tar: String,
    timeout: Option<Duration>,
    store_root: Option<PathBuf>,
}

impl ConfigTree {
    pub fn new(source: ConfigTreeSource, tar: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            source,
            tar: tar.into(),
            timeout,
            store_root: None,
        }
    }

    /// Keep the archive store (and the scratch directories inside it) out of the capture
    pub fn excluding(mut self, store_root: &Path) -> Self {
        self.store_root = Some(store_root.to_path_buf());
        self
    }

    /// Resolve the tree root and split it into the `-C` directory and the entry name
    fn locate(&self) -> BackupResult<(PathBuf, PathBuf, String)> {
        let root = self.source.root.canonicalize().map_err(|e| {
            BackupError::capture(
                &self.source.id,
                format!("cannot resolve {}: {}", self.source.root.display(), e),
            )
        })?;

        match (root.parent(), root.file_name()) {
            (Some(parent), Some(name)) => {
                let parent = parent.to_path_buf();
                let name = name.to_string_lossy().into_owned();
                Ok((root, parent, name))
            }
            _ => Err(BackupError::capture(
                &self.source.id,
                format!("{} has no parent directory", root.display()),
            )),
        }
    }

    /// Exclude pattern for the store when it lies under the tree
    fn store_exclude(&self, root: &Path, name: &str) -> BackupResult<Option<String>> {
        let Some(store) = &self.store_root else {
            return Ok(None);
        };
        let store = store.canonicalize().unwrap_or_else(|_| store.clone());

        if root.starts_with(&store) {
            return Err(BackupError::capture(
                &self.source.id,
                format!(
                    "{} lies inside the archive store {}",
                    root.display(),
                    store.display()
                ),
            ));
        }

        let Ok(inside) = store.strip_prefix(root) else {
            return Ok(None);
        };
        let parts: Vec<String> = inside
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(Some(format!("--exclude={}/{}", name, parts.join("/"))))
    }

    pub fn command(&self) -> BackupResult<CommandCapture> {
        let (root, parent, name) = self.locate()?;
        let store_exclude = self.store_exclude(&root, &name)?;
        let excludes = self
            .source
            .excludes
            .iter()
            .map(|pattern| format!("--exclude={}/{}", name, pattern))
            .chain(store_exclude);

        Ok(CommandCapture::new(&self.tar)
            .args(["--zstd", "-cf"])
            .destination_arg()
            .args(excludes)
            .arg("-C")
            .arg(parent)
            .arg(name))
    }
}

impl CaptureSource for ConfigTree {
    fn id(&self) -> &str {
        &self.source.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::ConfigTree
    }

    fn relative_path(&self) -> String {
        config_tree_path(&self.source.id)
    }

    fn capture(&self, destination: &Path) -> BackupResult<()> {
        self.command()?
            .run(&self.source.id, destination, self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use tempfile::TempDir;

    fn rendered(cmd: &CommandCapture) -> Vec<String> {
        cmd.render(Path::new("/stage/out"))
            .into_iter()
            .map(|arg: OsString| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_database_dump_command() {
        let dump = DatabaseDump::new(
            DatabaseSource {
                id: "kimai".into(),
                container: "kimai-db".into(),
                required: true,
            },
            "docker",
            None,
        );

        let args = rendered(&dump.command());
        assert_eq!(&args[..3], ["docker", "exec", "kimai-db"]);
        assert!(args[5].starts_with("mysqldump"));
        assert_eq!(dump.relative_path(), "databases/kimai.sql");
        assert_eq!(dump.kind(), SourceKind::Database);
    }

    #[test]
    fn test_volume_snapshot_command() {
        let snapshot = VolumeSnapshot::new(
            VolumeSource {
                id: "redis_data".into(),
                volume: "stack_redis_data".into(),
            },
            "docker",
            "busybox",
            None,
        );

        assert_eq!(
            rendered(&snapshot.command()),
            [
                "docker",
                "run",
                "--rm",
                "-vstack_redis_data:/volume:ro",
                "busybox",
                "tar",
                "czf",
                "-",
                "-C",
                "/volume",
                "."
            ]
        );
        assert_eq!(snapshot.relative_path(), "volumes/redis_data.tar.gz");
    }

    #[test]
    fn test_secrets_command() {
        let secrets = SecretsDirectory::new(
            SecretsSource {
                id: "files_encryption".into(),
                container: "nextcloud".into(),
                parent_dir: "/var/www/html/data".into(),
                directory: "files_encryption".into(),
            },
            "docker",
            None,
        );

        let args = rendered(&secrets.command());
        assert_eq!(args[2], "nextcloud");
        assert_eq!(&args[args.len() - 2..], ["/var/www/html/data", "files_encryption"]);
        assert_eq!(secrets.relative_path(), "files_encryption.tar.gz");
    }

    #[test]
    fn test_config_tree_command() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("deploy");
        std::fs::create_dir(&root).unwrap();

        let tree = ConfigTree::new(
            ConfigTreeSource {
                id: "repo".into(),
                root: root.clone(),
                excludes: vec!["backups".into()],
            },
            "tar",
            None,
        );

        let args = rendered(&tree.command().unwrap());
        let parent = root.canonicalize().unwrap().parent().unwrap().to_path_buf();
        assert_eq!(
            args,
            [
                "tar".to_string(),
                "--zstd".into(),
                "-cf".into(),
                "/stage/out".into(),
                "--exclude=deploy/backups".into(),
                "-C".into(),
                parent.to_string_lossy().into_owned(),
                "deploy".into(),
            ]
        );
        assert_eq!(tree.relative_path(), "repo.tar.zst");
    }

    fn tree_at(root: PathBuf) -> ConfigTree {
        ConfigTree::new(
            ConfigTreeSource {
                id: "repo".into(),
                root,
                excludes: Vec::new(),
            },
            "tar",
            None,
        )
    }

    #[test]
    fn test_store_inside_tree_is_excluded() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("deploy");
        let store = root.join("state").join("backups");
        std::fs::create_dir_all(&store).unwrap();

        let args = rendered(&tree_at(root).excluding(&store).command().unwrap());

        assert!(args.contains(&"--exclude=deploy/state/backups".to_string()));
    }

    #[test]
    fn test_store_outside_tree_adds_no_exclude() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("deploy");
        let store = temp.path().join("backups");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&store).unwrap();

        let args = rendered(&tree_at(root).excluding(&store).command().unwrap());

        assert!(!args.iter().any(|arg| arg.starts_with("--exclude")));
    }

    #[test]
    fn test_tree_within_store_is_refused() {
        let temp = TempDir::new().unwrap();
        let store = temp.path().join("backups");
        std::fs::create_dir_all(store.join("nested")).unwrap();

        for root in [store.clone(), store.join("nested")] {
            let err = tree_at(root).excluding(&store).command().unwrap_err();
            assert!(err.is_capture());
            assert!(err.to_string().contains("inside the archive store"));
        }
    }

    #[test]
    fn test_config_tree_missing_root_is_capture_error() {
        let tree = ConfigTree::new(
            ConfigTreeSource {
                id: "repo".into(),
                root: PathBuf::from("/nonexistent/tierback/tree"),
                excludes: Vec::new(),
            },
            "tar",
            None,
        );

        let temp = TempDir::new().unwrap();
        let err = tree.capture(&temp.path().join("repo.tar.zst")).unwrap_err();
        assert!(err.is_capture());
    }
}
