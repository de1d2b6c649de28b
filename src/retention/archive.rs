//! Per-day archive containers.
//!
//! A day group is written to `Logs_YYYYMMDD.zip` in the source directory.
//! The container is assembled in a hidden staging file next to its final
//! path and renamed into place only once complete, so a reader never sees a
//! half-written archive.
//!
//! If the archive for that day already exists, its entries are carried over
//! into the new container (merge). An entry whose name matches a newly added
//! file is replaced by it (last write wins).
//!
//! Source files are deleted one by one after the commit, each only once the
//! committed container has been reopened and shown to hold an entry of the
//! same name and size.

use std::{
    collections::{HashMap, HashSet},
    fs::{File, Metadata},
    io::{self, Read, Seek, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

use chrono::{DateTime, Datelike, Local, NaiveDate, Timelike};
use zip::{
    CompressionMethod, ZipArchive, ZipWriter, result::ZipError, write::SimpleFileOptions,
};

use super::{
    error::{RetentionError, WriteError},
    group::DayGroup,
    scan::LogFile,
};

pub const ARCHIVE_PREFIX: &str = "Logs_";
pub const ARCHIVE_EXTENSION: &str = ".zip";

const STAGING_PREFIX: &str = ".logwarden-";
const STAGING_SUFFIX: &str = ".partial";

const COPY_BUFFER_BYTES: usize = 64 * 1024;
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// Deterministic archive name for a day, e.g. `Logs_20240101.zip`.
pub fn archive_file_name(date: NaiveDate) -> String {
    format!(
        "{ARCHIVE_PREFIX}{}{ARCHIVE_EXTENSION}",
        date.format("%Y%m%d")
    )
}

/// Inverse of [`archive_file_name`]. The extension is matched
/// case-insensitively; the date must be a real calendar date.
pub fn parse_archive_name(name: &str) -> Option<NaiveDate> {
    let rest = name.strip_prefix(ARCHIVE_PREFIX)?;
    if rest.len() != 8 + ARCHIVE_EXTENSION.len() || !rest.is_char_boundary(8) {
        return None;
    }
    let (digits, extension) = rest.split_at(8);
    if !extension.eq_ignore_ascii_case(ARCHIVE_EXTENSION)
        || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
}

pub fn is_archive_name(name: &str) -> bool {
    parse_archive_name(name).is_some()
}

/// Whether `name` is a staging file left by an archive write.
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX) && name.ends_with(STAGING_SUFFIX)
}

/// A committed archive container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub path: PathBuf,
    pub date: NaiveDate,
    pub created: DateTime<Local>,
    /// Every entry in the container, sorted.
    pub entries: Vec<String>,
}

/// What happened to one day group.
#[derive(Debug)]
pub struct ArchiveWrite {
    pub date: NaiveDate,
    /// The committed container; `None` when nothing could be added.
    pub archive: Option<Archive>,
    /// Sources that were verified in the archive and removed.
    pub archived: Vec<PathBuf>,
    /// Sources that disappeared before they could be read.
    pub skipped: Vec<PathBuf>,
    /// Per-file problems after the commit. The files concerned were kept.
    pub file_errors: Vec<RetentionError>,
}

impl ArchiveWrite {
    fn nothing_added(date: NaiveDate, skipped: Vec<PathBuf>) -> Self {
        Self {
            date,
            archive: None,
            archived: Vec::new(),
            skipped,
            file_errors: Vec::new(),
        }
    }
}

struct AddedEntry {
    file: LogFile,
    bytes: u64,
}

enum EntryError {
    Vanished,
    Source(io::Error),
    Archive(ZipError),
}

/// Writes day groups into archive containers inside one directory.
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    directory: PathBuf,
}

impl ArchiveWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn target_path(&self, date: NaiveDate) -> PathBuf {
        self.directory.join(archive_file_name(date))
    }

    /// Archive a day group.
    ///
    /// Files are added in group order. A source that vanished since the
    /// scan is skipped. Any other read failure stops the group: files
    /// already added are committed and removed, the rest stay untouched, and
    /// [`WriteError::Interrupted`] reports both halves.
    pub fn write(&self, group: &DayGroup) -> Result<ArchiveWrite, WriteError> {
        let target = self.target_path(group.date);

        // Refuse to merge into a container we cannot read back.
        let mut existing = open_existing(&target)?;

        let mut staged = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(&self.directory)
            .map_err(|source| WriteError::Stage {
                path: target.clone(),
                source,
            })?;

        let mut added = Vec::new();
        let mut skipped = Vec::new();
        let mut stopped: Option<(PathBuf, io::Error)> = None;
        {
            let mut zip = ZipWriter::new(staged.as_file_mut());

            for file in &group.files {
                match append_entry(&mut zip, file) {
                    Ok(bytes) => {
                        tracing::info!(
                            file = %file.path.display(),
                            archive = %target.display(),
                            bytes,
                            "Added log file to archive"
                        );
                        added.push(AddedEntry {
                            file: file.clone(),
                            bytes,
                        });
                    }
                    Err(EntryError::Vanished) => {
                        tracing::warn!(
                            file = %file.path.display(),
                            "Log file vanished before it could be archived, skipping"
                        );
                        skipped.push(file.path.clone());
                    }
                    Err(EntryError::Source(source)) => {
                        stopped = Some((file.path.clone(), source));
                        break;
                    }
                    Err(EntryError::Archive(source)) => {
                        return Err(WriteError::Zip {
                            path: target,
                            source,
                        });
                    }
                }
            }

            if added.is_empty() {
                // The staging file is dropped; an existing archive stays as it was.
                return match stopped {
                    Some((path, source)) => Err(WriteError::ReadSource { path, source }),
                    None => Ok(ArchiveWrite::nothing_added(group.date, skipped)),
                };
            }

            if let Some(existing) = existing.as_mut() {
                let replaced: HashSet<&str> =
                    added.iter().map(|e| e.file.file_name.as_str()).collect();
                carry_over(existing, &mut zip, &replaced).map_err(|source| WriteError::Zip {
                    path: target.clone(),
                    source,
                })?;
            }

            zip.finish().map_err(|source| WriteError::Zip {
                path: target.clone(),
                source,
            })?;
        }
        drop(existing);

        staged
            .as_file()
            .sync_all()
            .map_err(|source| WriteError::Commit {
                path: target.clone(),
                source,
            })?;
        staged
            .persist(&target)
            .map_err(|e| WriteError::Commit {
                path: target.clone(),
                source: e.error,
            })?;
        // The rename must be durable before any source is unlinked.
        sync_directory(&self.directory).map_err(|source| WriteError::Commit {
            path: target.clone(),
            source,
        })?;

        let outcome = settle(&target, group.date, added, skipped);

        match stopped {
            Some((failed, source)) => Err(WriteError::Interrupted {
                failed,
                source,
                completed: Box::new(outcome),
            }),
            None => Ok(outcome),
        }
    }
}

/// Flush directory metadata, so a rename inside it survives a crash.
#[cfg(unix)]
fn sync_directory(directory: &Path) -> io::Result<()> {
    File::open(directory)?.sync_all()
}

#[cfg(not(unix))]
fn sync_directory(_directory: &Path) -> io::Result<()> {
    Ok(())
}

fn open_existing(target: &Path) -> Result<Option<ZipArchive<File>>, WriteError> {
    let file = match File::open(target) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(WriteError::ExistingArchive {
                path: target.to_path_buf(),
                source: ZipError::Io(source),
            });
        }
    };
    ZipArchive::new(file)
        .map(Some)
        .map_err(|source| WriteError::ExistingArchive {
            path: target.to_path_buf(),
            source,
        })
}

fn entry_options(metadata: &Metadata) -> SimpleFileOptions {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(metadata.len() >= ZIP64_THRESHOLD);
    match metadata.modified().ok().and_then(zip_timestamp) {
        Some(modified) => options.last_modified_time(modified),
        None => options,
    }
}

fn zip_timestamp(time: SystemTime) -> Option<zip::DateTime> {
    let local = DateTime::<Local>::from(time);
    zip::DateTime::from_date_and_time(
        u16::try_from(local.year()).ok()?,
        u8::try_from(local.month()).ok()?,
        u8::try_from(local.day()).ok()?,
        u8::try_from(local.hour()).ok()?,
        u8::try_from(local.minute()).ok()?,
        u8::try_from(local.second()).ok()?,
    )
    .ok()
}

/// Stream one source file into a new entry. Returns the bytes copied.
fn append_entry<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    file: &LogFile,
) -> Result<u64, EntryError> {
    let mut source = match File::open(&file.path) {
        Ok(source) => source,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(EntryError::Vanished),
        Err(e) => return Err(EntryError::Source(e)),
    };
    let metadata = source.metadata().map_err(EntryError::Source)?;

    zip.start_file(file.file_name.as_str(), entry_options(&metadata))
        .map_err(EntryError::Archive)?;

    let mut buffer = vec![0u8; COPY_BUFFER_BYTES];
    let mut copied = 0u64;
    loop {
        let read = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Drop the partial entry so the container stays consistent.
                zip.abort_file().map_err(EntryError::Archive)?;
                return Err(EntryError::Source(e));
            }
        };
        zip.write_all(&buffer[..read])
            .map_err(|e| EntryError::Archive(ZipError::Io(e)))?;
        copied += read as u64;
    }

    Ok(copied)
}

/// Copy entries of the existing archive that are not being replaced.
fn carry_over<W: Write + Seek>(
    existing: &mut ZipArchive<File>,
    zip: &mut ZipWriter<W>,
    replaced: &HashSet<&str>,
) -> Result<(), ZipError> {
    for index in 0..existing.len() {
        let entry = existing.by_index_raw(index)?;
        if replaced.contains(entry.name()) {
            continue;
        }
        zip.raw_copy_file(entry)?;
    }
    Ok(())
}

fn read_entry_sizes(path: &Path) -> Result<HashMap<String, u64>, ZipError> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let mut sizes = HashMap::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        sizes.insert(entry.name().to_string(), entry.size());
    }
    Ok(sizes)
}

fn container_timestamp(path: &Path) -> DateTime<Local> {
    std::fs::metadata(path)
        .and_then(|m| m.created().or_else(|_| m.modified()))
        .map(DateTime::<Local>::from)
        .unwrap_or_else(|_| Local::now())
}

/// Verify every added entry against the committed container and remove the
/// sources that check out.
fn settle(
    target: &Path,
    date: NaiveDate,
    added: Vec<AddedEntry>,
    skipped: Vec<PathBuf>,
) -> ArchiveWrite {
    let sizes = match read_entry_sizes(target) {
        Ok(sizes) => sizes,
        Err(e) => {
            tracing::error!(
                archive = %target.display(),
                error = %e,
                "Committed archive could not be read back; keeping all sources"
            );
            HashMap::new()
        }
    };

    let mut entries: Vec<String> = sizes.keys().cloned().collect();
    entries.sort();

    let mut archived = Vec::new();
    let mut file_errors = Vec::new();
    for entry in added {
        if sizes.get(&entry.file.file_name) != Some(&entry.bytes) {
            file_errors.push(RetentionError::Write(WriteError::Verify {
                archive: target.to_path_buf(),
                entry: entry.file.file_name.clone(),
            }));
            continue;
        }
        match remove_source(&entry.file.path, entry.bytes) {
            Ok(()) => {
                tracing::info!(
                    file = %entry.file.path.display(),
                    archive = %target.display(),
                    "Deleted archived log file"
                );
                archived.push(entry.file.path);
            }
            Err(e) => file_errors.push(e),
        }
    }

    ArchiveWrite {
        date,
        archive: Some(Archive {
            path: target.to_path_buf(),
            date,
            created: container_timestamp(target),
            entries,
        }),
        archived,
        skipped,
        file_errors,
    }
}

/// Delete a source whose contents were archived, unless it has grown or
/// shrunk since it was read. A source that is already gone counts as
/// removed.
fn remove_source(path: &Path, archived: u64) -> Result<(), RetentionError> {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.len() != archived => {
            return Err(RetentionError::SourceChanged {
                path: path.to_path_buf(),
                archived,
                current: metadata.len(),
            });
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(RetentionError::Delete {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RetentionError::Delete {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, fs};

    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn source(dir: &TempDir, name: &str, contents: &str) -> LogFile {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        LogFile::new(path, Local::now())
    }

    fn group(mut files: Vec<LogFile>) -> DayGroup {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        DayGroup { date: day(), files }
    }

    fn read_archive(path: &Path) -> BTreeMap<String, String> {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut contents = BTreeMap::new();
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index).unwrap();
            let mut text = String::new();
            entry.read_to_string(&mut text).unwrap();
            contents.insert(entry.name().to_string(), text);
        }
        contents
    }

    fn write_existing(path: &Path, entries: &[(&str, &str)]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, contents) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn leftover_staging(dir: &TempDir) -> Vec<String> {
        fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| is_staging_name(name))
            .collect()
    }

    #[rstest]
    #[case::plain("Logs_20240101.zip", Some((2024, 1, 1)))]
    #[case::upper_extension("Logs_20241231.ZIP", Some((2024, 12, 31)))]
    #[case::impossible_date("Logs_20240230.zip", None)]
    #[case::short_date("Logs_2024011.zip", None)]
    #[case::wrong_prefix("logs_20240101.zip", None)]
    #[case::wrong_extension("Logs_20240101.tar", None)]
    #[case::trailing_text("Logs_20240101.zip.bak", None)]
    fn test_parse_archive_name(#[case] name: &str, #[case] expected: Option<(i32, u32, u32)>) {
        let expected = expected.map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap());
        assert_eq!(parse_archive_name(name), expected);
    }

    #[test]
    fn test_archive_file_name_is_date_stamped() {
        assert_eq!(archive_file_name(day()), "Logs_20240101.zip");
        assert!(is_archive_name(&archive_file_name(day())));
    }

    #[test]
    fn test_write_archives_group_and_removes_sources() {
        let dir = TempDir::new().unwrap();
        let a = source(&dir, "a.log", "alpha");
        let b = source(&dir, "b.txt", "bravo");
        let writer = ArchiveWriter::new(dir.path());

        let outcome = writer.write(&group(vec![a.clone(), b.clone()])).unwrap();

        let archive = outcome.archive.unwrap();
        assert_eq!(archive.path, dir.path().join("Logs_20240101.zip"));
        assert_eq!(archive.entries, vec!["a.log", "b.txt"]);
        assert_eq!(outcome.archived, vec![a.path.clone(), b.path.clone()]);
        assert!(outcome.file_errors.is_empty());

        assert_eq!(
            read_archive(&archive.path),
            BTreeMap::from([
                ("a.log".to_string(), "alpha".to_string()),
                ("b.txt".to_string(), "bravo".to_string()),
            ])
        );
        assert!(!a.path.exists());
        assert!(!b.path.exists());
        assert!(leftover_staging(&dir).is_empty());
    }

    #[test]
    fn test_write_merges_into_existing_archive() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("Logs_20240101.zip");
        write_existing(&target, &[("earlier.log", "from last run")]);
        let later = source(&dir, "later.log", "from this run");

        let outcome = ArchiveWriter::new(dir.path())
            .write(&group(vec![later]))
            .unwrap();

        assert_eq!(
            outcome.archive.unwrap().entries,
            vec!["earlier.log", "later.log"]
        );
        assert_eq!(
            read_archive(&target),
            BTreeMap::from([
                ("earlier.log".to_string(), "from last run".to_string()),
                ("later.log".to_string(), "from this run".to_string()),
            ])
        );
    }

    #[test]
    fn test_same_entry_name_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("Logs_20240101.zip");
        write_existing(&target, &[("app.log", "old contents")]);
        let app = source(&dir, "app.log", "new contents");

        ArchiveWriter::new(dir.path())
            .write(&group(vec![app]))
            .unwrap();

        assert_eq!(
            read_archive(&target),
            BTreeMap::from([("app.log".to_string(), "new contents".to_string())])
        );
    }

    #[test]
    fn test_unreadable_existing_archive_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("Logs_20240101.zip");
        fs::write(&target, b"definitely not a zip").unwrap();
        let app = source(&dir, "app.log", "keep me");

        let err = ArchiveWriter::new(dir.path())
            .write(&group(vec![app.clone()]))
            .unwrap_err();

        assert!(matches!(err, WriteError::ExistingArchive { .. }));
        assert_eq!(fs::read(&target).unwrap(), b"definitely not a zip");
        assert_eq!(fs::read_to_string(&app.path).unwrap(), "keep me");
        assert!(leftover_staging(&dir).is_empty());
    }

    #[test]
    fn test_vanished_source_is_skipped() {
        let dir = TempDir::new().unwrap();
        let present = source(&dir, "present.log", "here");
        let gone = LogFile::new(dir.path().join("gone.log"), Local::now());

        let outcome = ArchiveWriter::new(dir.path())
            .write(&group(vec![present.clone(), gone.clone()]))
            .unwrap();

        assert_eq!(outcome.archived, vec![present.path]);
        assert_eq!(outcome.skipped, vec![gone.path]);
        assert_eq!(outcome.archive.unwrap().entries, vec!["present.log"]);
    }

    #[test]
    fn test_nothing_added_creates_no_archive() {
        let dir = TempDir::new().unwrap();
        let gone = LogFile::new(dir.path().join("gone.log"), Local::now());

        let outcome = ArchiveWriter::new(dir.path())
            .write(&group(vec![gone]))
            .unwrap();

        assert!(outcome.archive.is_none());
        assert_eq!(outcome.skipped.len(), 1);
        assert!(!dir.path().join("Logs_20240101.zip").exists());
        assert!(leftover_staging(&dir).is_empty());
    }

    #[test]
    fn test_read_failure_mid_group_commits_earlier_files_only() {
        let dir = TempDir::new().unwrap();
        let first = source(&dir, "a.log", "first");
        // A directory cannot be read as a file.
        let broken_path = dir.path().join("b.log");
        fs::create_dir(&broken_path).unwrap();
        let broken = LogFile::new(broken_path.clone(), Local::now());
        let last = source(&dir, "c.log", "last");

        let err = ArchiveWriter::new(dir.path())
            .write(&group(vec![first.clone(), broken, last.clone()]))
            .unwrap_err();

        let WriteError::Interrupted {
            failed, completed, ..
        } = err
        else {
            panic!("expected an interrupted write, got {err:?}");
        };
        assert_eq!(failed, broken_path);
        assert_eq!(completed.archived, vec![first.path.clone()]);

        let target = dir.path().join("Logs_20240101.zip");
        assert_eq!(
            read_archive(&target),
            BTreeMap::from([("a.log".to_string(), "first".to_string())])
        );
        assert!(!first.path.exists());
        assert_eq!(fs::read_to_string(&last.path).unwrap(), "last");
        assert!(leftover_staging(&dir).is_empty());
    }

    #[test]
    fn test_read_failure_on_first_file_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let broken_path = dir.path().join("a.log");
        fs::create_dir(&broken_path).unwrap();
        let later = source(&dir, "b.log", "untouched");

        let err = ArchiveWriter::new(dir.path())
            .write(&group(vec![
                LogFile::new(broken_path, Local::now()),
                later.clone(),
            ]))
            .unwrap_err();

        assert!(matches!(err, WriteError::ReadSource { .. }));
        assert!(!dir.path().join("Logs_20240101.zip").exists());
        assert!(later.path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_sync_directory() {
        let dir = TempDir::new().unwrap();
        assert!(sync_directory(dir.path()).is_ok());
        assert!(sync_directory(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_changed_source_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("busy.log");
        fs::write(&path, "12345").unwrap();

        let err = remove_source(&path, 3).unwrap_err();

        assert!(matches!(
            err,
            RetentionError::SourceChanged {
                archived: 3,
                current: 5,
                ..
            }
        ));
        assert!(path.exists());
        assert!(remove_source(&path, 5).is_ok());
        assert!(!path.exists());
        assert!(remove_source(&path, 5).is_ok());
    }
}
