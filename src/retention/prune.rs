//! Expiry of old archive containers.

use std::{io, path::PathBuf};

use chrono::{DateTime, TimeZone};

use super::{error::RetentionError, policy::age_in_days, scan::ArchiveFile};

/// Results from one pruning pass.
#[derive(Debug, Default)]
pub struct PruneOutcome {
    /// Archives that were removed.
    pub deleted: Vec<PathBuf>,
    /// Archives that should have been removed but could not be.
    pub errors: Vec<RetentionError>,
}

/// An archive expires once it is strictly older than `delete_after_days`.
/// One that is exactly that old is kept for another cycle.
pub fn is_expired<Tz: TimeZone, Tz2: TimeZone>(
    timestamp: &DateTime<Tz>,
    now: &DateTime<Tz2>,
    delete_after_days: u32,
) -> bool {
    age_in_days(timestamp, now) > f64::from(delete_after_days)
}

pub fn select_expired<'a, Tz: TimeZone>(
    archives: &'a [ArchiveFile],
    now: &DateTime<Tz>,
    delete_after_days: u32,
) -> impl Iterator<Item = &'a ArchiveFile> {
    let now = now.clone();
    archives
        .iter()
        .filter(move |archive| is_expired(&archive.timestamp, &now, delete_after_days))
}

/// Delete every expired archive in `archives`.
///
/// A failed deletion is logged and recorded; the remaining archives are
/// still processed. An archive that vanished before it could be deleted is
/// not an error.
pub fn prune<Tz: TimeZone>(
    archives: &[ArchiveFile],
    now: &DateTime<Tz>,
    delete_after_days: u32,
) -> PruneOutcome {
    let mut outcome = PruneOutcome::default();

    for archive in select_expired(archives, now, delete_after_days) {
        match std::fs::remove_file(&archive.path) {
            Ok(()) => {
                tracing::info!(
                    archive = %archive.path.display(),
                    date = %archive.date,
                    "Deleted expired archive"
                );
                outcome.deleted.push(archive.path.clone());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(archive = %archive.path.display(), "Expired archive already gone");
            }
            Err(source) => {
                let err = RetentionError::Delete {
                    path: archive.path.clone(),
                    source,
                };
                tracing::error!(error = %err, "Failed to delete expired archive");
                outcome.errors.push(err);
            }
        }
    }

    outcome
}
