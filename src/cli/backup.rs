//! Backup CLI commands
//!
//! Implements the `run`, `list` and `check` commands on top of the
//! backup manager.

use chrono::Utc;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::backup::{Archive, BackupManager};
use crate::error::BackupResult;

/// One row of the archive table
#[derive(Tabled)]
struct ArchiveRow {
    #[tabled(rename = "Archive")]
    name: String,
    #[tabled(rename = "Captured (UTC)")]
    captured: String,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "Size")]
    size: String,
}

impl ArchiveRow {
    fn new(archive: &Archive, now: chrono::DateTime<Utc>) -> Self {
        Self {
            name: archive.file_name.clone(),
            captured: archive.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            age: format_duration(archive.age(now)),
            size: format_size(archive.size_bytes),
        }
    }
}

/// Capture a new archive and apply retention
pub fn handle_run(manager: &BackupManager) -> BackupResult<()> {
    let report = manager.run()?;

    println!("Created: {}", report.created.path.display());
    for path in &report.removed {
        println!("Removed old backup: {}", path.display());
    }

    Ok(())
}

/// Show store capacity and the archives it holds
pub fn handle_list(manager: &BackupManager) -> BackupResult<()> {
    let store = manager.store();
    store.ensure_exists()?;

    let archives = store.list()?;
    let used: u64 = archives.iter().map(|a| a.size_bytes).sum();
    let capacity = store.capacity()?;

    println!("=== Backup Storage ===");
    println!("- path: {}", store.root().display());
    println!("- total: {}", format_size(capacity.total));
    println!("- available: {}", format_size(capacity.free));
    println!("- used by backups: {}", format_size(used));

    if archives.is_empty() {
        println!();
        println!("No backups present.");
        return Ok(());
    }

    let now = Utc::now();
    let rows: Vec<ArchiveRow> = archives.iter().map(|a| ArchiveRow::new(a, now)).collect();

    println!();
    println!("=== Stored Archives ===");
    println!("{}", Table::new(rows).with(Style::psql()));
    println!();
    println!("Total: {} archive(s)", archives.len());

    Ok(())
}

/// Verify one archive, or the newest one when no identifier is given
///
/// The identifier may be a path, a filename inside the store, or `latest`.
pub fn handle_check(manager: &BackupManager, file: Option<&str>) -> BackupResult<()> {
    let path = manager.store().resolve(file.unwrap_or("latest"))?;
    let report = manager.verify(&path)?;

    let name = report
        .path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| report.path.display().to_string());
    println!("Backup {} verified", name);

    Ok(())
}

/// Format a duration as `1d 2h 3m 4s`, dropping zero components
pub fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds();
    let sign = if total_seconds < 0 { "-" } else { "" };
    let total_seconds = total_seconds.unsigned_abs();

    let days = total_seconds / 86_400;
    let hours = total_seconds % 86_400 / 3_600;
    let minutes = total_seconds % 3_600 / 60;
    let seconds = total_seconds % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{}s", seconds));
    }

    format!("{}{}", sign, parts.join(" "))
}

/// Format a byte count with binary units
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(0)), "0s");
        assert_eq!(format_duration(Duration::seconds(59)), "59s");
        assert_eq!(format_duration(Duration::seconds(3600)), "1h");
        assert_eq!(
            format_duration(Duration::seconds(86_400 + 2 * 3600 + 3 * 60 + 4)),
            "1d 2h 3m 4s"
        );
        assert_eq!(format_duration(Duration::seconds(-90)), "-1m 30s");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1.0 KiB");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }
}
