//! On-disk record of probe sends awaiting observation.
//!
//! The round-trip probe runs as two scheduled halves, so the sends one run
//! makes must survive until a later run observes them. Each journal line
//! holds fractional epoch seconds and a correlation token separated by one
//! space; the format is append-friendly and survives partial writes, since
//! unparseable lines are skipped rather than fatal.

use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{ProbeError, Result};

/// Default outstanding age, in minutes, past which a record is a warning.
pub const DEFAULT_WARNING_MINUTES: u64 = 30;

/// Default outstanding age, in minutes, past which a record is critical.
pub const DEFAULT_CRITICAL_MINUTES: u64 = 60;

/// One journaled send: when it left and the token identifying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    /// Send time
    pub sent_at: DateTime<Utc>,
    /// Correlation token carried in the message identity header
    pub token: String,
}

impl JournalRecord {
    /// Create a record for a send made at `sent_at`
    pub fn new(sent_at: DateTime<Utc>, token: impl Into<String>) -> Self {
        Self { sent_at, token: token.into() }
    }

    /// Age of the record at `now`, zero if the clock went backwards
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.sent_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Age band of an outstanding record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeBand {
    /// Younger than the warning threshold
    Fresh,
    /// Older than the warning threshold but not yet critical
    Warning,
    /// Older than the critical threshold
    Critical,
}

/// Warning and critical age thresholds for outstanding records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgeThresholds {
    /// Age past which an outstanding record is worth a warning
    pub warning: Duration,
    /// Age past which an outstanding record is critical
    pub critical: Duration,
}

impl AgeThresholds {
    /// Create thresholds from explicit durations
    #[must_use]
    pub const fn new(warning: Duration, critical: Duration) -> Self {
        Self { warning, critical }
    }

    /// Create thresholds from minutes
    #[must_use]
    pub const fn minutes(warning: u64, critical: u64) -> Self {
        Self::new(Duration::from_secs(warning * 60), Duration::from_secs(critical * 60))
    }

    /// Band for a record of the given age. The critical threshold is
    /// checked first so it cannot be shadowed by the warning one.
    #[must_use]
    pub fn classify(&self, age: Duration) -> AgeBand {
        if age > self.critical {
            AgeBand::Critical
        } else if age > self.warning {
            AgeBand::Warning
        } else {
            AgeBand::Fresh
        }
    }
}

impl Default for AgeThresholds {
    fn default() -> Self {
        Self::minutes(DEFAULT_WARNING_MINUTES, DEFAULT_CRITICAL_MINUTES)
    }
}

/// Line-oriented journal file shared by the two round-trip probe halves.
#[derive(Debug, Clone)]
pub struct DeliveryJournal {
    path: PathBuf,
}

impl DeliveryJournal {
    /// Journal backed by the file at `path`; the file is created on first
    /// append
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record.
    ///
    /// # Errors
    /// Returns [`ProbeError::Journal`] when the file cannot be opened or
    /// written.
    pub fn append(&self, record: &JournalRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| ProbeError::journal(&self.path, source))?;
        writeln!(file, "{}", Self::format_line(record))
            .map_err(|source| ProbeError::journal(&self.path, source))?;
        debug!(path = %self.path.display(), token = %record.token, "journaled send");
        Ok(())
    }

    /// Load every parseable record, oldest line first.
    ///
    /// A missing file is an empty journal, not an error: the first probe
    /// run has nothing to observe yet.
    ///
    /// # Errors
    /// Returns [`ProbeError::Journal`] on any other read failure.
    pub fn load(&self) -> Result<Vec<JournalRecord>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new());
            },
            Err(source) => return Err(ProbeError::journal(&self.path, source)),
        };

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| ProbeError::journal(&self.path, source))?;
            if line.trim().is_empty() {
                continue;
            }
            match Self::parse_line(&line) {
                Some(record) => records.push(record),
                None => warn!(path = %self.path.display(), %line, "skipping malformed journal line"),
            }
        }
        Ok(records)
    }

    /// Replace the journal contents with exactly `records`.
    ///
    /// # Errors
    /// Returns [`ProbeError::Journal`] when the file cannot be rewritten.
    pub fn rewrite(&self, records: &[JournalRecord]) -> Result<()> {
        let mut file =
            File::create(&self.path).map_err(|source| ProbeError::journal(&self.path, source))?;
        for record in records {
            writeln!(file, "{}", Self::format_line(record))
                .map_err(|source| ProbeError::journal(&self.path, source))?;
        }
        debug!(path = %self.path.display(), kept = records.len(), "journal rewritten");
        Ok(())
    }

    fn format_line(record: &JournalRecord) -> String {
        let epoch = record.sent_at.timestamp_micros() as f64 / 1e6;
        format!("{epoch:.6} {}", record.token)
    }

    fn parse_line(line: &str) -> Option<JournalRecord> {
        let mut fields = line.split_whitespace();
        let epoch: f64 = fields.next()?.parse().ok()?;
        let token = fields.next()?;
        if fields.next().is_some() {
            return None;
        }
        let sent_at = DateTime::from_timestamp_micros((epoch * 1e6).round() as i64)?;
        Some(JournalRecord::new(sent_at, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn record(epoch_secs: i64, token: &str) -> JournalRecord {
        JournalRecord::new(DateTime::from_timestamp(epoch_secs, 0).unwrap(), token)
    }

    #[test]
    fn append_then_load_preserves_order_and_timestamps() -> TestResult {
        let dir = tempdir()?;
        let journal = DeliveryJournal::new(dir.path().join("probe.journal"));

        let first = JournalRecord::new(
            DateTime::from_timestamp_micros(1_700_000_000_123_456).unwrap(),
            "tok-a",
        );
        let second = record(1_700_000_100, "tok-b");
        journal.append(&first)?;
        journal.append(&second)?;

        let loaded = journal.load()?;
        assert_eq!(loaded, vec![first, second]);
        Ok(())
    }

    #[test]
    fn missing_file_loads_as_empty() -> TestResult {
        let dir = tempdir()?;
        let journal = DeliveryJournal::new(dir.path().join("absent.journal"));
        assert!(journal.load()?.is_empty());
        Ok(())
    }

    #[test]
    fn malformed_lines_are_skipped() -> TestResult {
        let dir = tempdir()?;
        let path = dir.path().join("probe.journal");
        std::fs::write(
            &path,
            "1700000000.000000 tok-good\nnot-a-number tok-bad\n1700000001.000000\n\n1700000002.000000 tok-also-good\n",
        )?;

        let journal = DeliveryJournal::new(&path);
        let loaded = journal.load()?;
        let tokens: Vec<&str> = loaded.iter().map(|r| r.token.as_str()).collect();
        assert_eq!(tokens, vec!["tok-good", "tok-also-good"]);
        Ok(())
    }

    #[test]
    fn rewrite_replaces_contents() -> TestResult {
        let dir = tempdir()?;
        let journal = DeliveryJournal::new(dir.path().join("probe.journal"));
        journal.append(&record(1_700_000_000, "tok-a"))?;
        journal.append(&record(1_700_000_001, "tok-b"))?;

        journal.rewrite(&[record(1_700_000_001, "tok-b")])?;
        let loaded = journal.load()?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].token, "tok-b");

        journal.rewrite(&[])?;
        assert!(journal.load()?.is_empty());
        Ok(())
    }

    #[test]
    fn age_classification_checks_critical_before_warning() {
        let thresholds = AgeThresholds::minutes(30, 60);
        assert_eq!(thresholds.classify(Duration::from_secs(10 * 60)), AgeBand::Fresh);
        assert_eq!(thresholds.classify(Duration::from_secs(45 * 60)), AgeBand::Warning);
        // Older than both thresholds must land in the critical band.
        assert_eq!(thresholds.classify(Duration::from_secs(90 * 60)), AgeBand::Critical);
    }

    #[test]
    fn record_age_saturates_at_zero() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let from_the_future = JournalRecord::new(now + chrono::Duration::seconds(30), "tok");
        assert_eq!(from_the_future.age(now), Duration::ZERO);
        assert_eq!(record(1_699_999_940, "tok").age(now), Duration::from_secs(60));
    }
}
