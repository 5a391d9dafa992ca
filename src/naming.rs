//! Archive naming and clock abstraction
//!
//! Archives are named `<prefix>-<YYYYMMDDTHHMMSSZ>.<ext>`. The timestamp token
//! sorts lexicographically in time order and is parsed back out of filenames
//! by the archive store; any name that does not round-trip is not an archive.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};

/// strftime pattern for the timestamp token embedded in archive names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Source of the current time
pub trait Clock {
    /// Current instant in UTC
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a fixed instant (useful for testing)
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Format a timestamp token, truncating to whole seconds
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.trunc_subsecs(0).format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp token produced by [`format_timestamp`]
pub fn parse_timestamp(token: &str) -> Option<DateTime<Utc>> {
    // chrono accepts space-padded and short fields, so pin the exact shape first
    let shape_ok = token.len() == 16
        && token.bytes().enumerate().all(|(idx, b)| match idx {
            8 => b == b'T',
            15 => b == b'Z',
            _ => b.is_ascii_digit(),
        });
    if !shape_ok {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(token, TIMESTAMP_FORMAT).ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Naming scheme for archives in one store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveNaming {
    prefix: String,
    extension: String,
}

impl ArchiveNaming {
    /// Create a naming scheme from a prefix and an extension (without the leading dot)
    pub fn new(prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Build the archive filename for a timestamp
    pub fn file_name(&self, timestamp: DateTime<Utc>) -> String {
        format!(
            "{}-{}.{}",
            self.prefix,
            format_timestamp(timestamp),
            self.extension
        )
    }

    /// Recover the timestamp from an archive filename
    ///
    /// Returns `None` for anything that is not exactly
    /// `<prefix>-<timestamp>.<ext>`.
    pub fn parse(&self, file_name: &str) -> Option<DateTime<Utc>> {
        let stem = file_name.strip_suffix(&self.extension)?.strip_suffix('.')?;
        let token = stem.strip_prefix(&self.prefix)?.strip_prefix('-')?;
        parse_timestamp(token)
    }
}
