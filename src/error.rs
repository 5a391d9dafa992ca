//! Custom error types for tierback
//!
//! This module defines the error hierarchy for the backup lifecycle using
//! thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for tierback operations
#[derive(Error, Debug)]
pub enum BackupError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// A capture source failed to produce its output
    #[error("Capture of '{source_id}' failed: {reason}{}", format_diagnostics(.diagnostics))]
    Capture {
        source_id: String,
        reason: String,
        diagnostics: String,
    },

    /// Writing into the archive store failed (disk full, permissions, ...)
    #[error("Store error: {0}")]
    Store(String),

    /// An archive failed integrity verification
    #[error("Backup {} failed verification: {reason}{}", .path.display(), format_missing(.missing))]
    Verification {
        path: PathBuf,
        reason: String,
        missing: Vec<String>,
    },

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Another process holds the store lock
    #[error("Archive store is locked: {0}")]
    Locked(String),
}

fn format_diagnostics(diagnostics: &str) -> String {
    let trimmed = diagnostics.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n{}", trimmed)
    }
}

fn format_missing(missing: &[String]) -> String {
    if missing.is_empty() {
        String::new()
    } else {
        format!(" (missing items: {})", missing.join(", "))
    }
}

impl BackupError {
    /// Create a capture error without diagnostic output
    pub fn capture(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Capture {
            source_id: source_id.into(),
            reason: reason.into(),
            diagnostics: String::new(),
        }
    }

    /// Create a "not found" error for archives
    pub fn archive_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a capture error
    pub fn is_capture(&self) -> bool {
        matches!(self, Self::Capture { .. })
    }

    /// Check if this is a verification error
    pub fn is_verification(&self) -> bool {
        matches!(self, Self::Verification { .. })
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for tierback operations
pub type BackupResult<T> = Result<T, BackupError>;
