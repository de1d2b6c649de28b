//! Retention policy and the eligibility filter.

use chrono::{DateTime, TimeZone};

use super::{
    archive::{is_archive_name, is_staging_name},
    scan::LogFile,
};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Immutable thresholds for one retention cycle.
///
/// `delete_after_days` is expected to be at least `archive_after_days`, but
/// that ordering is not enforced here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    archive_after_days: u32,
    delete_after_days: u32,
    /// Lowercased suffixes.
    valid_extensions: Vec<String>,
}

impl RetentionPolicy {
    pub fn new(
        archive_after_days: u32,
        delete_after_days: u32,
        valid_extensions: &[impl AsRef<str>],
    ) -> Self {
        Self {
            archive_after_days,
            delete_after_days,
            valid_extensions: valid_extensions
                .iter()
                .map(|ext| ext.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn archive_after_days(&self) -> u32 {
        self.archive_after_days
    }

    pub fn delete_after_days(&self) -> u32 {
        self.delete_after_days
    }

    pub fn valid_extensions(&self) -> &[String] {
        &self.valid_extensions
    }

    /// Whether `file` should be archived as of `now`.
    pub fn is_eligible<Tz: TimeZone>(&self, file: &LogFile, now: &DateTime<Tz>) -> bool {
        is_eligible(file, now, self.archive_after_days, &self.valid_extensions)
    }
}

/// Age of `then` as of `now`, in fractional days. Negative when `then` is
/// in the future.
pub fn age_in_days<Tz: TimeZone, Tz2: TimeZone>(then: &DateTime<Tz>, now: &DateTime<Tz2>) -> f64 {
    let elapsed = now.clone().fixed_offset() - then.clone().fixed_offset();
    elapsed.num_milliseconds() as f64 / MILLIS_PER_DAY
}

/// Case-insensitive suffix match of the file name against any extension.
pub fn has_valid_extension(file_name: &str, valid_extensions: &[impl AsRef<str>]) -> bool {
    let name = file_name.to_lowercase();
    valid_extensions
        .iter()
        .any(|ext| !ext.as_ref().is_empty() && name.ends_with(&ext.as_ref().to_lowercase()))
}

/// A file is eligible once it is at least `archive_after_days` old
/// (inclusive, fractional days) and its name ends with a valid extension.
///
/// Archive containers and staging files are never eligible, whatever the
/// extension list says.
pub fn is_eligible<Tz: TimeZone>(
    file: &LogFile,
    now: &DateTime<Tz>,
    archive_after_days: u32,
    valid_extensions: &[impl AsRef<str>],
) -> bool {
    if is_archive_name(&file.file_name) || is_staging_name(&file.file_name) {
        return false;
    }

    age_in_days(&file.timestamp, now) >= f64::from(archive_after_days)
        && has_valid_extension(&file.file_name, valid_extensions)
}
