use std::path::PathBuf;

use thiserror::Error;

/// Fatal archive errors. Recoverable read failures use the archive's sticky
/// error flag instead.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("bulk data is not resident and has no source archive")]
    BulkDataUnavailable,

    #[error("archive error flag set at offset {offset}")]
    Corrupt { offset: u64 },
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
