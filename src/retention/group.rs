//! Partitioning of eligible files into per-day groups.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::scan::LogFile;

/// Eligible files sharing one local calendar date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayGroup {
    pub date: NaiveDate,
    /// Ordered by path.
    pub files: Vec<LogFile>,
}

/// Group files by the local calendar date of their timestamp.
///
/// Groups come out in ascending date order and members in path order, so
/// the result does not depend on the order files were listed in.
pub fn group_by_day(files: impl IntoIterator<Item = LogFile>) -> Vec<DayGroup> {
    let mut days: BTreeMap<NaiveDate, Vec<LogFile>> = BTreeMap::new();
    for file in files {
        days.entry(file.timestamp.date_naive())
            .or_default()
            .push(file);
    }

    days.into_iter()
        .map(|(date, mut files)| {
            files.sort_by(|a, b| a.path.cmp(&b.path));
            DayGroup { date, files }
        })
        .collect()
}
