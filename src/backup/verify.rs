//! Archive integrity verification
//!
//! An archive verifies when it decompresses and unpacks end to end, carries a
//! parseable manifest, the manifest lists every required item, and each entry
//! the manifest recorded a size for has that size in the package. Payload
//! bytes are not hashed.

use std::path::{Path, PathBuf};

use tracing::info;

use super::manifest::Manifest;
use super::package::read_package;
use crate::config::Settings;
use crate::error::{BackupError, BackupResult};

/// Outcome of a successful verification
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub path: PathBuf,
    pub manifest: Manifest,
    /// Number of entries in the package
    pub entry_count: usize,
}

/// Checks archives against their manifests
#[derive(Debug, Clone)]
pub struct IntegrityVerifier {
    required: Vec<String>,
}

impl IntegrityVerifier {
    /// Create a verifier requiring the given manifest paths
    pub fn new(required: Vec<String>) -> Self {
        Self { required }
    }

    /// Require the primary database dumps and the secrets capture
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.required_items())
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Verify one archive
    ///
    /// Never modifies the archive or the store.
    pub fn verify(&self, path: &Path) -> BackupResult<VerificationReport> {
        let fail = |reason: String, missing: Vec<String>| BackupError::Verification {
            path: path.to_path_buf(),
            reason,
            missing,
        };

        if !path.is_file() {
            return Err(fail("archive does not exist".into(), Vec::new()));
        }

        let listing = read_package(path)
            .map_err(|e| fail(format!("archive is not a readable package: {}", e), Vec::new()))?;

        let raw = listing
            .manifest
            .as_deref()
            .ok_or_else(|| fail("archive has no manifest".into(), Vec::new()))?;
        let manifest = Manifest::from_slice(raw)
            .map_err(|e| fail(format!("manifest is unreadable: {}", e), Vec::new()))?;

        let missing = manifest.missing(&self.required);
        if !missing.is_empty() {
            return Err(fail("required items missing from manifest".into(), missing));
        }

        let mismatched: Vec<String> = manifest
            .sizes
            .iter()
            .filter_map(|(file, expected)| match listing.entries.get(file) {
                None => Some(format!("{} (absent from package)", file)),
                Some(actual) if actual != expected => Some(format!(
                    "{} ({} bytes, manifest says {})",
                    file, actual, expected
                )),
                Some(_) => None,
            })
            .collect();
        if !mismatched.is_empty() {
            return Err(fail(
                "package contents do not match manifest".into(),
                mismatched,
            ));
        }

        info!(archive = %path.display(), files = manifest.files.len(), "archive verified");

        Ok(VerificationReport {
            path: path.to_path_buf(),
            entry_count: listing.entries.len(),
            manifest,
        })
    }
}
