//! End-to-end retention cycle tests.
//!
//! Each test builds a scratch source directory through [`RetentionHarness`],
//! back-dates files by setting their modification time, and runs full
//! cycles against a fixed reference time.

use std::{
    collections::BTreeSet,
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
    time::SystemTime,
};

use chrono::{DateTime, Duration, Local, TimeZone};
use rstest::rstest;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

use crate::{
    config::{AgeBasis, DaemonConfig, RetentionConfig},
    retention::{CyclePhase, CycleReport, RetentionCycle, RetentionError, start_retention_worker},
};

// =============================================================================
// Harness
// =============================================================================

struct RetentionHarness {
    dir: TempDir,
    now: DateTime<Local>,
    config: RetentionConfig,
}

impl RetentionHarness {
    /// Reference time is 2024-01-11 12:00 local.
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let now = Local
            .with_ymd_and_hms(2024, 1, 11, 12, 0, 0)
            .earliest()
            .unwrap();
        let config = RetentionConfig {
            source_directory: dir.path().to_path_buf(),
            archive_after_days: 7,
            delete_after_days: 30,
            age_basis: AgeBasis::Modified,
            ..Default::default()
        };
        Self { dir, now, config }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Create `name` with a timestamp `age` before the reference time.
    fn file_aged(&self, name: &str, age: Duration) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, format!("contents of {name}\n")).unwrap();
        set_age(&path, self.now - age);
        path
    }

    fn run(&self) -> CycleReport {
        RetentionCycle::new(&self.config).run_at(self.now)
    }

    fn listing(&self) -> BTreeSet<String> {
        fs::read_dir(self.dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }
}

fn set_age(path: &Path, timestamp: DateTime<Local>) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::from(timestamp))
        .unwrap();
}

fn archive_entries(path: &Path) -> BTreeSet<String> {
    let archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    archive.file_names().map(str::to_string).collect()
}

fn entry_text(path: &Path, entry: &str) -> String {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut text = String::new();
    archive
        .by_name(entry)
        .unwrap()
        .read_to_string(&mut text)
        .unwrap();
    text
}

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// Archiving
// =============================================================================

#[test]
fn test_old_file_archived_new_file_untouched() {
    let h = RetentionHarness::new();
    let old = h.file_aged("app_2024-01-01.log", Duration::days(10));
    let recent = h.file_aged("app_2024-01-10.log", Duration::days(1));

    let report = h.run();

    assert!(!report.has_errors(), "{:?}", report.errors);
    let archive = h.path("Logs_20240101.zip");
    assert_eq!(report.archives_written, vec![archive.clone()]);
    assert_eq!(report.files_archived, vec![old.clone()]);
    assert_eq!(archive_entries(&archive), names(&["app_2024-01-01.log"]));
    assert_eq!(
        entry_text(&archive, "app_2024-01-01.log"),
        "contents of app_2024-01-01.log\n"
    );
    assert!(!old.exists());
    assert!(recent.exists());
    assert_eq!(
        h.listing(),
        names(&["Logs_20240101.zip", "app_2024-01-10.log"])
    );
}

#[test]
fn test_files_from_same_day_share_one_archive() {
    let h = RetentionHarness::new();
    h.file_aged("api.log", Duration::days(10));
    h.file_aged("worker.txt", Duration::days(10) + Duration::hours(1));
    h.file_aged("notes.md", Duration::days(10));

    let report = h.run();

    assert_eq!(report.archives_written.len(), 1);
    assert_eq!(
        archive_entries(&h.path("Logs_20240101.zip")),
        names(&["api.log", "worker.txt"])
    );
    assert!(h.path("notes.md").exists());
}

#[test]
fn test_later_cycle_merges_into_existing_archive() {
    let mut h = RetentionHarness::new();
    h.file_aged("first.log", Duration::days(10));
    h.run();

    // A straggler from the same day shows up before the next cycle.
    h.file_aged("second.log", Duration::days(10));
    h.now += Duration::hours(1);
    let report = h.run();

    assert!(!report.has_errors(), "{:?}", report.errors);
    assert_eq!(
        archive_entries(&h.path("Logs_20240101.zip")),
        names(&["first.log", "second.log"])
    );
}

#[test]
fn test_second_cycle_with_nothing_new_is_idle() {
    let h = RetentionHarness::new();
    h.file_aged("app.log", Duration::days(10));
    h.file_aged("fresh.log", Duration::hours(2));

    let first = h.run();
    assert!(first.has_changes());
    let after_first = h.listing();

    let second = h.run();
    assert!(!second.has_errors(), "{:?}", second.errors);
    assert!(!second.has_changes());
    assert_eq!(h.listing(), after_first);
}

#[test]
fn test_archives_are_not_rearchived() {
    let mut h = RetentionHarness::new();
    h.config.valid_extensions = vec![".log".to_string(), ".zip".to_string()];
    h.file_aged("app.log", Duration::days(10));
    h.run();
    set_age(&h.path("Logs_20240101.zip"), h.now - Duration::days(9));

    let report = h.run();

    assert!(!report.has_changes());
    assert_eq!(h.listing(), names(&["Logs_20240101.zip"]));
}

// =============================================================================
// Pruning
// =============================================================================

#[rstest]
#[case::thirty_one_days(31, false)]
#[case::twenty_nine_days(29, true)]
#[case::exactly_thirty_days(30, true)]
fn test_archive_pruning_boundary(#[case] age_days: i64, #[case] kept: bool) {
    let h = RetentionHarness::new();
    let archive = h.file_aged("Logs_20231201.zip", Duration::days(age_days));

    let report = h.run();

    assert!(!report.has_errors(), "{:?}", report.errors);
    assert_eq!(archive.exists(), kept);
    assert_eq!(report.archives_pruned.is_empty(), kept);
}

#[test]
fn test_only_archive_names_are_pruned() {
    let h = RetentionHarness::new();
    h.file_aged("Logs_20231201.zip", Duration::days(31));
    h.file_aged("backup.zip", Duration::days(90));
    h.file_aged("Logs_20231399.zip", Duration::days(90));

    h.run();

    assert_eq!(h.listing(), names(&["Logs_20231399.zip", "backup.zip"]));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_missing_directory_reports_scan_error() {
    let mut h = RetentionHarness::new();
    h.config.source_directory = h.path("does-not-exist");

    let report = h.run();

    assert!(report.scan_failed());
    assert!(matches!(
        report.errors[0].error,
        RetentionError::Scan { .. }
    ));
    assert!(!report.has_changes());
}

#[test]
fn test_failed_group_is_isolated() {
    let h = RetentionHarness::new();
    // 2024-01-01 has an unreadable archive; 2024-01-02 does not.
    fs::write(h.path("Logs_20240101.zip"), b"not a zip").unwrap();
    let blocked = h.file_aged("blocked.log", Duration::days(10));
    let fine = h.file_aged("fine.log", Duration::days(9));
    let expired = h.file_aged("Logs_20231130.zip", Duration::days(42));

    let report = h.run();

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].phase, CyclePhase::Archiving);
    assert!(blocked.exists());
    assert!(!fine.exists());
    assert_eq!(
        archive_entries(&h.path("Logs_20240102.zip")),
        names(&["fine.log"])
    );
    assert_eq!(fs::read(h.path("Logs_20240101.zip")).unwrap(), b"not a zip");
    assert!(!expired.exists());
}

// =============================================================================
// Wiring
// =============================================================================

#[test]
fn test_cycle_from_loaded_config() {
    let h = RetentionHarness::new();
    let config_path = h.path("logwarden.toml");
    let source = h.path("logs");
    fs::create_dir(&source).unwrap();
    fs::write(
        &config_path,
        format!(
            "[retention]\nsource_directory = {:?}\narchive_after_days = 3\nage_basis = \"modified\"\n",
            source.display().to_string()
        ),
    )
    .unwrap();
    let log = source.join("svc.log");
    fs::write(&log, "svc").unwrap();
    set_age(&log, h.now - Duration::days(4));

    let loaded = DaemonConfig::load(&config_path);
    assert!(loaded.warnings.is_empty(), "{:?}", loaded.warnings);
    let report = RetentionCycle::new(&loaded.config.retention).run_at(h.now);

    assert_eq!(report.files_archived, vec![log]);
}

#[tokio::test]
async fn test_worker_runs_first_cycle_and_stops() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("old.log");
    fs::write(&log, "old").unwrap();
    set_age(&log, Local::now() - Duration::days(10));
    let config = RetentionConfig {
        source_directory: dir.path().to_path_buf(),
        age_basis: AgeBasis::Modified,
        ..Default::default()
    };

    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(start_retention_worker(config, shutdown.clone()));

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while log.exists() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    shutdown.cancel();

    let stats = worker.await.unwrap();
    assert_eq!(stats.cycles_started, 1);
    assert_eq!(stats.triggers_skipped, 0);
}
