use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("package index {0} does not refer to an export")]
    NotAnExport(i32),

    #[error("package index {0} does not refer to an import")]
    NotAnImport(i32),
}
