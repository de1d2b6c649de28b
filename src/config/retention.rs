//! Log retention configuration.
//!
//! Controls which directory is swept, when log files get compressed into
//! per-day archives, and when those archives are purged.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! source_directory = "/var/log/myapp"
//! archive_after_days = 7
//! delete_after_days = 30
//! valid_extensions = [".log", ".txt"]
//! interval_hours = 24
//! age_basis = "created"
//! cycle_timeout_secs = 3600
//! ```

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use super::Section;
use crate::retention::RetentionPolicy;

/// Log retention configuration.
///
/// Every field has a default, so an empty `[retention]` table (or no
/// table at all) yields a working daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Directory scanned for log files. Only its direct children are
    /// considered; subdirectories are never visited.
    /// Default: `/var/log/logwarden` (`C:\Logs` on Windows)
    #[serde(default = "default_source_directory")]
    pub source_directory: PathBuf,

    /// Age in days at which a log file becomes eligible for archiving.
    /// The boundary is inclusive.
    /// Default: 7
    #[serde(default = "default_archive_after_days")]
    pub archive_after_days: u32,

    /// Age in days after which an archive is deleted.
    /// The boundary is exclusive: an archive exactly this old is kept.
    /// Default: 30
    #[serde(default = "default_delete_after_days")]
    pub delete_after_days: u32,

    /// File name suffixes (case-insensitive) that identify log files.
    /// Default: `[".log", ".txt"]`
    #[serde(default = "default_valid_extensions")]
    pub valid_extensions: Vec<String>,

    /// How often to run a retention cycle (in hours).
    /// Default: 24 (once per day)
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,

    /// Which filesystem timestamp defines a file's age and calendar day.
    /// Default: `created`
    #[serde(default)]
    pub age_basis: AgeBasis,

    /// Report a cycle that runs longer than this many seconds.
    /// Blocking filesystem work cannot be interrupted, so an overrunning
    /// cycle keeps the next triggers from starting until it finishes.
    /// Default: none
    #[serde(default)]
    pub cycle_timeout_secs: Option<u64>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            source_directory: default_source_directory(),
            archive_after_days: default_archive_after_days(),
            delete_after_days: default_delete_after_days(),
            valid_extensions: default_valid_extensions(),
            interval_hours: default_interval_hours(),
            age_basis: AgeBasis::default(),
            cycle_timeout_secs: None,
        }
    }
}

#[cfg(windows)]
fn default_source_directory() -> PathBuf {
    PathBuf::from(r"C:\Logs")
}

#[cfg(not(windows))]
fn default_source_directory() -> PathBuf {
    PathBuf::from("/var/log/logwarden")
}

fn default_archive_after_days() -> u32 {
    7
}

fn default_delete_after_days() -> u32 {
    30
}

fn default_valid_extensions() -> Vec<String> {
    vec![".log".to_string(), ".txt".to_string()]
}

/// One year. Larger intervals are treated as misconfiguration.
const MAX_INTERVAL_HOURS: u64 = 24 * 365;
const SECS_PER_HOUR: u64 = 3600;

fn default_interval_hours() -> u64 {
    24
}

/// Timestamp used to compute a file's age.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum AgeBasis {
    /// File creation (birth) time. Falls back to the modification time on
    /// filesystems that do not record it.
    #[default]
    Created,
    /// Last modification time.
    Modified,
}

const FIELDS: &[&str] = &[
    "source_directory",
    "archive_after_days",
    "delete_after_days",
    "valid_extensions",
    "interval_hours",
    "age_basis",
    "cycle_timeout_secs",
];

impl RetentionConfig {
    /// Resolve the section field by field, substituting the default for
    /// any field that is missing or malformed.
    pub(crate) fn resolve(mut section: Section<'_>) -> Self {
        let mut config = Self {
            source_directory: section.field("source_directory", default_source_directory),
            archive_after_days: section.field("archive_after_days", default_archive_after_days),
            delete_after_days: section.field("delete_after_days", default_delete_after_days),
            valid_extensions: section.field("valid_extensions", default_valid_extensions),
            interval_hours: section.field("interval_hours", default_interval_hours),
            age_basis: section.field("age_basis", AgeBasis::default),
            cycle_timeout_secs: section.optional_field("cycle_timeout_secs"),
        };
        section.reject_unknown(FIELDS);
        for fix in config.sanitize() {
            section.report(fix);
        }
        config
    }

    /// Replace values that parse but cannot work. Returns one message per
    /// substitution made.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut fixes = Vec::new();

        if self.source_directory.as_os_str().is_empty() {
            self.source_directory = default_source_directory();
            fixes.push(format!(
                "source_directory is empty, using {}",
                self.source_directory.display()
            ));
        }

        if self.interval_hours == 0 {
            self.interval_hours = default_interval_hours();
            fixes.push("interval_hours must be positive, using 24".to_string());
        } else if self.interval_hours > MAX_INTERVAL_HOURS {
            fixes.push(format!(
                "interval_hours {} exceeds {MAX_INTERVAL_HOURS}, using 24",
                self.interval_hours
            ));
            self.interval_hours = default_interval_hours();
        }

        let before = self.valid_extensions.len();
        self.valid_extensions = self
            .valid_extensions
            .iter()
            .map(|ext| ext.trim().to_string())
            .filter(|ext| !ext.is_empty())
            .collect();
        if self.valid_extensions.len() != before {
            fixes.push(format!(
                "dropped {} empty entries from valid_extensions",
                before - self.valid_extensions.len()
            ));
        }

        if self.cycle_timeout_secs == Some(0) {
            self.cycle_timeout_secs = None;
            fixes.push("cycle_timeout_secs = 0 disables the watchdog".to_string());
        }

        fixes
    }

    /// Settings that are legal but probably not what the operator meant.
    pub fn advisories(&self) -> Vec<String> {
        let mut notes = Vec::new();
        if self.delete_after_days < self.archive_after_days {
            notes.push(format!(
                "delete_after_days ({}) is shorter than archive_after_days ({}); \
                 archives may be purged soon after they are written",
                self.delete_after_days, self.archive_after_days
            ));
        }
        if self.valid_extensions.is_empty() {
            notes.push("valid_extensions is empty; no file will ever be archived".to_string());
        }
        notes
    }

    /// Build the immutable policy consumed by a retention cycle.
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(
            self.archive_after_days,
            self.delete_after_days,
            &self.valid_extensions,
        )
    }

    /// Get the interval as a Duration.
    pub fn interval(&self) -> Duration {
        let hours = match self.interval_hours {
            1..=MAX_INTERVAL_HOURS => self.interval_hours,
            _ => default_interval_hours(),
        };
        Duration::from_secs(hours * SECS_PER_HOUR)
    }

    /// Get the cycle watchdog timeout, if configured.
    pub fn cycle_timeout(&self) -> Option<Duration> {
        self.cycle_timeout_secs.map(Duration::from_secs)
    }
}
