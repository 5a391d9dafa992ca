//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with the backup manager.

pub mod backup;

pub use backup::{format_duration, format_size, handle_check, handle_list, handle_run};
