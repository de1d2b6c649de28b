//! Directory listing for a retention cycle.
//!
//! Only the direct children of the source directory are listed. Anything
//! that is not a regular file (directories, symlinks, sockets) is ignored,
//! as is any entry that disappears while it is being inspected.

use std::{
    fs::Metadata,
    io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use chrono::{DateTime, Local, NaiveDate};

use super::{
    archive::parse_archive_name,
    error::{RetentionError, RetentionResult},
};
use crate::config::AgeBasis;

/// A regular file in the source directory, as observed by one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub path: PathBuf,
    /// Base name, used as the archive entry name.
    pub file_name: String,
    /// Timestamp the file's age is measured from.
    pub timestamp: DateTime<Local>,
}

impl LogFile {
    pub fn new(path: PathBuf, timestamp: DateTime<Local>) -> Self {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            file_name,
            timestamp,
        }
    }
}

/// An archive container found in the source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    pub path: PathBuf,
    /// Day the archive was named after.
    pub date: NaiveDate,
    /// The container's own timestamp, never that of an entry inside it.
    pub timestamp: DateTime<Local>,
}

/// Pick the timestamp the configured basis asks for.
///
/// Creation time is not recorded by every filesystem; when it is missing
/// the modification time stands in.
pub fn file_timestamp(metadata: &Metadata, basis: AgeBasis) -> io::Result<SystemTime> {
    match basis {
        AgeBasis::Created => metadata.created().or_else(|_| metadata.modified()),
        AgeBasis::Modified => metadata.modified(),
    }
}

/// List every regular file directly inside `directory`.
pub fn scan_directory(directory: &Path, basis: AgeBasis) -> RetentionResult<Vec<LogFile>> {
    let entries = std::fs::read_dir(directory).map_err(|source| RetentionError::Scan {
        path: directory.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| RetentionError::Scan {
            path: directory.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        // symlink_metadata so links are skipped rather than followed
        let metadata = match std::fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping entry that vanished during scan");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        match file_timestamp(&metadata, basis) {
            Ok(timestamp) => files.push(LogFile::new(path, DateTime::<Local>::from(timestamp))),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping file without a usable timestamp");
            }
        }
    }

    Ok(files)
}

/// List the archive containers directly inside `directory`.
pub fn list_archives(directory: &Path, basis: AgeBasis) -> RetentionResult<Vec<ArchiveFile>> {
    let archives = scan_directory(directory, basis)?
        .into_iter()
        .filter_map(|file| {
            let date = parse_archive_name(&file.file_name)?;
            Some(ArchiveFile {
                path: file.path,
                date,
                timestamp: file.timestamp,
            })
        })
        .collect();
    Ok(archives)
}
