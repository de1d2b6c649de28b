//! Log retention: archiving aged log files and purging old archives.
//!
//! Each retention cycle:
//! 1. Lists the regular files directly inside the source directory
//! 2. Selects those old enough with a matching extension
//! 3. Groups them by the calendar day of their timestamp
//! 4. Writes each group into a `Logs_YYYYMMDD.zip` archive and deletes the
//!    sources once their entries are verified
//! 5. Deletes archives older than the configured limit
//!
//! Cycles are triggered by [`RetentionScheduler`], one at a time.

mod archive;
mod cycle;
mod error;
mod group;
mod policy;
mod prune;
mod scan;
mod worker;

pub use archive::{
    ARCHIVE_EXTENSION, ARCHIVE_PREFIX, Archive, ArchiveWrite, ArchiveWriter, archive_file_name,
    is_archive_name, is_staging_name, parse_archive_name,
};
pub use cycle::{CycleFailure, CyclePhase, CycleReport, RetentionCycle};
pub use error::{RetentionError, RetentionResult, WriteError};
pub use group::{DayGroup, group_by_day};
pub use policy::{RetentionPolicy, age_in_days, has_valid_extension, is_eligible};
pub use prune::{PruneOutcome, is_expired, prune, select_expired};
pub use scan::{ArchiveFile, LogFile, file_timestamp, list_archives, scan_directory};
pub use worker::{
    CycleGate, DEFAULT_SHUTDOWN_GRACE, RetentionScheduler, RetentionTask, SchedulerStats,
    start_retention_worker,
};
