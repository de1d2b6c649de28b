use std::path::PathBuf;

use thiserror::Error;

use super::archive::ArchiveWrite;

/// Failures surfaced by a retention cycle. None of them escape the cycle;
/// they are logged and collected into its report.
#[derive(Debug, Error)]
pub enum RetentionError {
    /// The source directory could not be listed. Fatal to the cycle only.
    #[error("Failed to scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A day group could not be archived. Other groups still run.
    #[error(transparent)]
    Write(#[from] WriteError),

    /// A single file could not be deleted. Processing continues.
    #[error("Failed to delete {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A source file changed after its contents were archived, so it was
    /// kept. The next cycle archives the newer contents.
    #[error("{path} changed while being archived ({archived} bytes archived, {current} on disk)")]
    SourceChanged {
        path: PathBuf,
        archived: u64,
        current: u64,
    },
}

/// Failures while building or committing a day's archive.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Failed to stage archive {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read source file {path}: {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive already on disk cannot be read, so it is left alone
    /// rather than merged into.
    #[error("Existing archive {path} is unreadable: {source}")]
    ExistingArchive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to write archive {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to commit archive {path}: {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The committed archive does not hold the entry exactly as read, so
    /// the source file is kept.
    #[error("Archive {archive} does not hold a verified copy of {entry}")]
    Verify { archive: PathBuf, entry: String },

    /// Reading a source failed after earlier files were added. The earlier
    /// files were committed and their sources removed; `failed` and the
    /// files after it were left untouched.
    #[error("Archiving stopped at {failed}: {source}")]
    Interrupted {
        failed: PathBuf,
        #[source]
        source: std::io::Error,
        completed: Box<ArchiveWrite>,
    },
}

pub type RetentionResult<T> = Result<T, RetentionError>;
