use crate::table::NameId;

/// Errors from name table operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NameError {
    /// The handle does not refer to a live entry.
    #[error("name handle {0} is not in the table")]
    NotFound(NameId),

    /// Permanent names are registered once and never removed.
    #[error("name {0:?} is permanent and cannot be deleted")]
    Permanent(String),

    /// The text exceeds the maximum name length.
    #[error("name of {len} bytes exceeds maximum of {max}")]
    TooLong { len: usize, max: usize },
}

/// Result alias for name table operations.
pub type NameResult<T> = Result<T, NameError>;
