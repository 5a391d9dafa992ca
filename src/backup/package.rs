//! zstd-compressed tar packaging
//!
//! Packages are written to a hidden `.<name>.partial` sibling of their final
//! path, synced, and renamed into place, so an archive name in the store
//! always refers to a complete package.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use super::manifest::{relative_name, MANIFEST_FILE};
use crate::error::{BackupError, BackupResult};
use crate::interrupt;

/// Hidden in-progress path for a package
pub fn partial_package_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}.partial", name))
}

/// Package a staged tree into `destination`
///
/// The manifest becomes the first entry; everything else follows in sorted
/// order. Fails without touching `destination` if it already exists.
pub fn package_tree(staged: &Path, destination: &Path, level: i32) -> BackupResult<()> {
    if destination.exists() {
        return Err(BackupError::Store(format!(
            "{} already exists",
            destination.display()
        )));
    }

    let partial = partial_package_path(destination);
    if let Err(err) = write_package(staged, &partial, level) {
        let _ = fs::remove_file(&partial);
        return Err(err);
    }

    fs::rename(&partial, destination).map_err(|e| {
        let _ = fs::remove_file(&partial);
        BackupError::Store(format!(
            "Failed to move package to {}: {}",
            destination.display(),
            e
        ))
    })?;

    sync_parent(destination);
    Ok(())
}

fn write_package(staged: &Path, partial: &Path, level: i32) -> BackupResult<()> {
    let store_err = |context: &str, e: io::Error| {
        BackupError::Store(format!("{} {}: {}", context, partial.display(), e))
    };

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(partial)
        .map_err(|e| store_err("Failed to create", e))?;

    let encoder = zstd::stream::write::Encoder::new(BufWriter::new(file), level)
        .map_err(|e| store_err("Failed to start compressor for", e))?;
    let mut builder = tar::Builder::new(encoder);

    builder
        .append_path_with_name(staged.join(MANIFEST_FILE), MANIFEST_FILE)
        .map_err(|e| store_err("Failed to add manifest to", e))?;

    for entry in WalkDir::new(staged).min_depth(1).sort_by_file_name() {
        if interrupt::requested() {
            return Err(BackupError::Store("packaging interrupted".into()));
        }

        let entry =
            entry.map_err(|e| BackupError::Io(format!("Failed to walk staged tree: {}", e)))?;
        let name = relative_name(staged, entry.path())?;
        if name == MANIFEST_FILE {
            continue;
        }

        let file_type = entry.file_type();
        let appended = if file_type.is_dir() {
            builder.append_dir(&name, entry.path())
        } else if file_type.is_file() {
            builder.append_path_with_name(entry.path(), &name)
        } else {
            debug!(entry = %name, "skipping non-regular staged entry");
            continue;
        };
        appended.map_err(|e| store_err("Failed to add entry to", e))?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| store_err("Failed to finish tar stream in", e))?;
    let writer = encoder
        .finish()
        .map_err(|e| store_err("Failed to finish compression in", e))?;
    let file = writer
        .into_inner()
        .map_err(|e| store_err("Failed to flush", e.into_error()))?;
    file.sync_all().map_err(|e| store_err("Failed to sync", e))?;

    Ok(())
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}

/// Everything read from a package in one pass
#[derive(Debug, Default)]
pub struct PackageListing {
    /// Entry path (without any leading `./`) to its size
    pub entries: BTreeMap<String, u64>,
    /// Raw manifest bytes, if the package has one
    pub manifest: Option<Vec<u8>>,
}

/// Walk every entry of a package
///
/// Reading the whole stream surfaces truncation and corruption as errors;
/// only the manifest's contents are kept in memory.
pub fn read_package(path: &Path) -> io::Result<PackageListing> {
    let file = File::open(path)?;
    let decoder = zstd::stream::read::Decoder::new(file)?;
    let mut archive = tar::Archive::new(decoder);
    let mut listing = PackageListing::default();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw = entry.path()?.to_string_lossy().into_owned();
        let name = raw.trim_start_matches("./").trim_end_matches('/').to_string();
        let size = entry.header().size()?;

        if name == MANIFEST_FILE {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            listing.manifest = Some(bytes);
        }

        if !name.is_empty() && name != "." {
            listing.entries.insert(name, size);
        }
    }

    Ok(listing)
}
