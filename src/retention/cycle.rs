//! One retention cycle: scan, archive, prune.
//!
//! A cycle never returns an error. Failures are logged as they happen and
//! collected into the [`CycleReport`], tagged with the phase they happened
//! in. A failed scan ends the cycle early; a failed group or file does not.

use std::{fmt, path::PathBuf, time::Instant};

use chrono::{DateTime, Local};

use super::{
    archive::{ArchiveWrite, ArchiveWriter, is_staging_name},
    error::{RetentionError, WriteError},
    group::group_by_day,
    policy::{RetentionPolicy, age_in_days},
    prune::prune,
    scan::{LogFile, list_archives, scan_directory},
};
use crate::{
    config::{AgeBasis, RetentionConfig},
    observability::metrics,
};

/// Staging files younger than this may belong to a write still in flight
/// from another process.
const STALE_STAGING_HOURS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Scanning,
    Archiving,
    Pruning,
}

impl CyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Scanning => "scanning",
            CyclePhase::Archiving => "archiving",
            CyclePhase::Pruning => "pruning",
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure recorded during a cycle.
#[derive(Debug)]
pub struct CycleFailure {
    pub phase: CyclePhase,
    pub error: RetentionError,
}

/// Results from a single retention cycle.
#[derive(Debug)]
pub struct CycleReport {
    /// Reference time the cycle measured ages against.
    pub started_at: DateTime<Local>,
    /// Archives committed this cycle.
    pub archives_written: Vec<PathBuf>,
    /// Source files moved into an archive and removed.
    pub files_archived: Vec<PathBuf>,
    /// Eligible files that vanished before they could be archived.
    pub files_skipped: Vec<PathBuf>,
    /// Expired archives removed.
    pub archives_pruned: Vec<PathBuf>,
    pub errors: Vec<CycleFailure>,
}

impl CycleReport {
    pub fn new(started_at: DateTime<Local>) -> Self {
        Self {
            started_at,
            archives_written: Vec::new(),
            files_archived: Vec::new(),
            files_skipped: Vec::new(),
            archives_pruned: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Whether the cycle ended early because the directory could not be
    /// listed.
    pub fn scan_failed(&self) -> bool {
        self.errors.iter().any(|failure| {
            failure.phase == CyclePhase::Scanning
                && matches!(failure.error, RetentionError::Scan { .. })
        })
    }

    /// Check if the cycle changed anything on disk.
    pub fn has_changes(&self) -> bool {
        !self.archives_written.is_empty()
            || !self.files_archived.is_empty()
            || !self.archives_pruned.is_empty()
    }
}

/// Runs retention cycles over one directory.
#[derive(Debug, Clone)]
pub struct RetentionCycle {
    directory: PathBuf,
    policy: RetentionPolicy,
    age_basis: AgeBasis,
}

impl RetentionCycle {
    pub fn new(config: &RetentionConfig) -> Self {
        Self {
            directory: config.source_directory.clone(),
            policy: config.policy(),
            age_basis: config.age_basis,
        }
    }

    /// Run a cycle against the current time.
    pub fn run(&self) -> CycleReport {
        self.run_at(Local::now())
    }

    /// Run a cycle, measuring every age against `now`.
    pub fn run_at(&self, now: DateTime<Local>) -> CycleReport {
        let mut run = CycleRun::new(now);
        metrics::record_cycle_started();
        tracing::info!(
            directory = %self.directory.display(),
            archive_after_days = self.policy.archive_after_days(),
            delete_after_days = self.policy.delete_after_days(),
            "Starting retention cycle"
        );

        run.enter(CyclePhase::Scanning);
        let files = match scan_directory(&self.directory, self.age_basis) {
            Ok(files) => files,
            Err(e) => {
                run.fail(e);
                return run.finish();
            }
        };
        self.remove_stale_staging(&files, &mut run);

        let eligible: Vec<LogFile> = files
            .into_iter()
            .filter(|file| self.policy.is_eligible(file, &now))
            .collect();
        tracing::debug!(eligible = eligible.len(), "Scan complete");

        run.enter(CyclePhase::Archiving);
        let writer = ArchiveWriter::new(&self.directory);
        for group in group_by_day(eligible) {
            run.record_group(writer.write(&group));
        }

        run.enter(CyclePhase::Pruning);
        match list_archives(&self.directory, self.age_basis) {
            Ok(archives) => {
                let outcome = prune(&archives, &now, self.policy.delete_after_days());
                metrics::record_archives_pruned(outcome.deleted.len() as u64);
                run.report.archives_pruned.extend(outcome.deleted);
                for error in outcome.errors {
                    run.fail(error);
                }
            }
            Err(e) => run.fail(e),
        }

        run.finish()
    }

    /// Remove staging files left behind by a write that never committed.
    fn remove_stale_staging(&self, files: &[LogFile], run: &mut CycleRun) {
        let cutoff = STALE_STAGING_HOURS as f64 / 24.0;
        let now = run.now;
        let stale = files.iter().filter(|file| {
            is_staging_name(&file.file_name) && age_in_days(&file.timestamp, &now) >= cutoff
        });

        for file in stale {
            match std::fs::remove_file(&file.path) {
                Ok(()) => {
                    tracing::warn!(path = %file.path.display(), "Removed leftover archive staging file");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => run.fail(RetentionError::Delete {
                    path: file.path.clone(),
                    source,
                }),
            }
        }
    }
}

/// In-progress state of one cycle.
struct CycleRun {
    now: DateTime<Local>,
    phase: CyclePhase,
    started: Instant,
    report: CycleReport,
}

impl CycleRun {
    fn new(now: DateTime<Local>) -> Self {
        Self {
            now,
            phase: CyclePhase::Idle,
            started: Instant::now(),
            report: CycleReport::new(now),
        }
    }

    fn enter(&mut self, phase: CyclePhase) {
        tracing::debug!(from = %self.phase, to = %phase, "Retention cycle phase");
        self.phase = phase;
    }

    fn fail(&mut self, error: impl Into<RetentionError>) {
        let error = error.into();
        tracing::error!(phase = %self.phase, error = %error, "Retention cycle error");
        metrics::record_cycle_error(self.phase.as_str());
        self.report.errors.push(CycleFailure {
            phase: self.phase,
            error,
        });
    }

    /// Record one group's result. An interrupted group still contributes
    /// the files it committed before the failure.
    fn record_group(&mut self, result: Result<ArchiveWrite, WriteError>) {
        match result {
            Ok(write) => self.record_write(write),
            Err(WriteError::Interrupted {
                failed,
                source,
                completed,
            }) => {
                self.record_write(*completed);
                self.fail(WriteError::ReadSource {
                    path: failed,
                    source,
                });
            }
            Err(e) => self.fail(e),
        }
    }

    fn record_write(&mut self, write: ArchiveWrite) {
        if let Some(archive) = &write.archive {
            metrics::record_archive_written(write.archived.len() as u64);
            tracing::info!(
                archive = %archive.path.display(),
                date = %write.date,
                files = write.archived.len(),
                entries = archive.entries.len(),
                "Archive written"
            );
            self.report.archives_written.push(archive.path.clone());
        }
        self.report.files_archived.extend(write.archived);
        self.report.files_skipped.extend(write.skipped);
        for error in write.file_errors {
            self.fail(error);
        }
    }

    fn finish(mut self) -> CycleReport {
        self.enter(CyclePhase::Idle);
        let elapsed = self.started.elapsed();
        let report = self.report;
        metrics::record_cycle_finished(elapsed.as_secs_f64(), report.has_errors());

        if report.has_changes() || report.has_errors() {
            tracing::info!(
                archives_written = report.archives_written.len(),
                files_archived = report.files_archived.len(),
                files_skipped = report.files_skipped.len(),
                archives_pruned = report.archives_pruned.len(),
                errors = report.errors.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Retention cycle complete"
            );
        } else {
            tracing::debug!("Retention cycle complete, nothing to do");
        }
        report
    }
}
