//! Tiered retention for the archive store
//!
//! Each archive is classified into the first tier whose age limit it
//! satisfies. Within a tier, time is cut into fixed-width buckets counted from
//! the Unix epoch and only the newest archive of each `(tier, bucket)` pair
//! survives. Deciding is pure; the caller performs the deletions.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::store::Archive;
use crate::error::{BackupError, BackupResult};

/// One tier of the retention policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionRule {
    /// Oldest age this tier admits; `None` for the catch-all tier
    pub age_limit: Option<Duration>,
    /// Width of the buckets survivors are selected in
    pub bucket_width: Duration,
}

impl RetentionRule {
    pub fn bounded(age_limit: Duration, bucket_width: Duration) -> Self {
        Self {
            age_limit: Some(age_limit),
            bucket_width,
        }
    }

    pub fn unbounded(bucket_width: Duration) -> Self {
        Self {
            age_limit: None,
            bucket_width,
        }
    }

    /// Whether an archive of this age belongs to the tier
    fn admits(&self, age: chrono::Duration) -> bool {
        match self.age_limit {
            None => true,
            // Limits beyond chrono's range can't be exceeded
            Some(limit) => chrono::Duration::from_std(limit).map_or(true, |limit| age <= limit),
        }
    }

    /// Index of the bucket a timestamp falls into
    pub fn bucket_key(&self, timestamp: DateTime<Utc>) -> i64 {
        let width = i64::try_from(self.bucket_width.as_secs()).unwrap_or(i64::MAX);
        timestamp.timestamp().div_euclid(width)
    }
}

/// Partition of the store into archives to keep and archives to delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionDecision {
    /// Bucket survivors, newest first
    pub keep: Vec<Archive>,
    /// Everything else, newest first
    pub remove: Vec<Archive>,
}

impl RetentionDecision {
    pub fn is_empty(&self) -> bool {
        self.keep.is_empty() && self.remove.is_empty()
    }
}

/// Ordered retention tiers, tightest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    rules: Vec<RetentionRule>,
}

impl Default for RetentionPolicy {
    /// 15-minute buckets for 2 hours, 30-minute buckets for a day, daily for
    /// two weeks, every 5 days for a month, then every 30 days forever.
    fn default() -> Self {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        const DAY: u64 = 24 * HOUR;
        let secs = Duration::from_secs;

        Self {
            rules: vec![
                RetentionRule::bounded(secs(2 * HOUR), secs(15 * MINUTE)),
                RetentionRule::bounded(secs(DAY), secs(30 * MINUTE)),
                RetentionRule::bounded(secs(14 * DAY), secs(DAY)),
                RetentionRule::bounded(secs(30 * DAY), secs(5 * DAY)),
                RetentionRule::unbounded(secs(30 * DAY)),
            ],
        }
    }
}

impl RetentionPolicy {
    /// Create a policy, validating the tier list
    ///
    /// Tiers must be ordered by strictly increasing age limit, every bucket
    /// must be at least one second wide, and exactly the last tier must be
    /// unbounded.
    pub fn new(rules: Vec<RetentionRule>) -> BackupResult<Self> {
        let Some(last) = rules.last() else {
            return Err(BackupError::Config(
                "retention policy needs at least one tier".into(),
            ));
        };

        if last.age_limit.is_some() {
            return Err(BackupError::Config(
                "the last retention tier must have no age limit".into(),
            ));
        }

        for (idx, rule) in rules.iter().enumerate() {
            if rule.bucket_width.as_secs() == 0 {
                return Err(BackupError::Config(format!(
                    "retention tier {} has a bucket narrower than one second",
                    idx + 1
                )));
            }
        }

        let limits: Vec<Duration> = rules[..rules.len() - 1]
            .iter()
            .map(|rule| {
                rule.age_limit.ok_or_else(|| {
                    BackupError::Config("only the last retention tier may be unbounded".into())
                })
            })
            .collect::<BackupResult<_>>()?;

        if limits.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(BackupError::Config(
                "retention tiers must have strictly increasing age limits".into(),
            ));
        }

        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[RetentionRule] {
        &self.rules
    }

    /// Index of the tier an archive of this age belongs to
    pub fn classify(&self, age: chrono::Duration) -> usize {
        self.rules
            .iter()
            .position(|rule| rule.admits(age))
            .unwrap_or(self.rules.len() - 1)
    }

    /// Decide which archives survive at `now`
    ///
    /// The newest archive of every `(tier, bucket)` pair is kept and every
    /// other archive is marked for removal. The input order is irrelevant.
    pub fn decide(&self, archives: &[Archive], now: DateTime<Utc>) -> RetentionDecision {
        let mut ordered: Vec<&Archive> = archives.iter().collect();
        ordered.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.path.cmp(&b.path))
        });

        let mut occupied: HashSet<(usize, i64)> = HashSet::new();
        let mut decision = RetentionDecision::default();

        for archive in ordered {
            let tier = self.classify(now - archive.timestamp);
            let key = (tier, self.rules[tier].bucket_key(archive.timestamp));

            if occupied.insert(key) {
                decision.keep.push(archive.clone());
            } else {
                decision.remove.push(archive.clone());
            }
        }

        decision
    }
}
