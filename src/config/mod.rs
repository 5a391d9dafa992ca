//! Configuration module for tierback
//!
//! This module provides configuration management including:
//! - Base directory resolution
//! - Settings persistence (capture sources, naming, retention tiers)

pub mod paths;
pub mod settings;

pub use paths::BackupPaths;
pub use settings::Settings;
