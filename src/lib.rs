//! tierback - tiered backups for the Art Institut container stack
//!
//! Captures database dumps, volume snapshots, the Nextcloud encryption keys
//! and the deployment's configuration tree into one compressed archive per
//! run, prunes old archives with a tiered retention policy, and verifies
//! archives against their embedded manifest.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration and path management
//! - `error`: Custom error types
//! - `naming`: Archive filenames and the clock
//! - `capture`: Capture sources (database, volume, secrets, config tree)
//! - `backup`: Staging, packaging, retention, verification and the store
//! - `cli`: Command handlers for the `tierback` binary
//! - `interrupt`: SIGINT/SIGTERM handling for long captures
//!
//! # Example
//!
//! ```rust,ignore
//! use tierback::config::{BackupPaths, Settings};
//!
//! let paths = BackupPaths::new()?;
//! let settings = Settings::load_or_default(&paths.settings_file())?;
//! ```

pub mod backup;
pub mod capture;
pub mod cli;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod naming;

pub use error::BackupError;
