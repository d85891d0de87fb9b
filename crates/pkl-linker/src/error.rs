use std::fmt;

use thiserror::Error;

use pkl_archive::ArchiveError;
use pkl_names::NameError;
use pkl_types::FileVersion;

use crate::loader::LoaderId;
use crate::object::ObjectHandle;

/// One import that could not be bound to a providing object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnresolvedImport {
    /// Zero-based import table position.
    pub index: usize,
    /// Dotted path of the import, outermost first.
    pub path: String,
    /// `ClassPackage.ClassName` of the import.
    pub class: String,
    pub reason: String,
}

impl fmt::Display for UnresolvedImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "import {} {} ({}): {}",
            self.index, self.path, self.class, self.reason
        )
    }
}

fn list_failures(failures: &[UnresolvedImport]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from loading and saving packages.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("not a package: bad file tag {tag:#010x}")]
    BadMagic { tag: u32 },

    #[error("unsupported package version {0}")]
    UnsupportedVersion(FileVersion),

    #[error("package summary of {package} is truncated or corrupt")]
    TruncatedSummary { package: String },

    #[error("package table of {package} is corrupt: {reason}")]
    CorruptTable { package: String, reason: String },

    #[error("package not found: {0}")]
    PackageNotFound(String),

    #[error("package {package} has {} unresolved imports: {}", failures.len(), list_failures(failures))]
    UnresolvedImports {
        package: String,
        failures: Vec<UnresolvedImport>,
    },

    #[error("loader {0} has been detached")]
    LoaderDetached(LoaderId),

    #[error("invalid object handle {0}")]
    InvalidObject(ObjectHandle),

    #[error("codec for {class} failed: {reason}")]
    Codec { class: String, reason: String },

    #[error("compression error: {0}")]
    Compression(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<LinkError>,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Name(#[from] NameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Wrap with a call-context string.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error beneath any context wrappers.
    pub fn root(&self) -> &LinkError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(index: usize, path: &str) -> UnresolvedImport {
        UnresolvedImport {
            index,
            path: path.into(),
            class: "Core.Class".into(),
            reason: "package not found".into(),
        }
    }

    #[test]
    fn unresolved_imports_lists_every_failure() {
        let err = LinkError::UnresolvedImports {
            package: "Game".into(),
            failures: vec![failure(0, "Engine"), failure(1, "Engine.Actor")],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 unresolved imports"));
        assert!(msg.contains("import 0 Engine"));
        assert!(msg.contains("import 1 Engine.Actor"));
    }

    #[test]
    fn context_wraps_and_root_unwraps() {
        let err = LinkError::PackageNotFound("Engine".into()).context("loading Game");
        assert_eq!(err.to_string(), "loading Game: package not found: Engine");
        assert!(matches!(err.root(), LinkError::PackageNotFound(_)));
    }

    #[test]
    fn bad_magic_formats_tag() {
        let err = LinkError::BadMagic { tag: 0x1234 };
        assert_eq!(err.to_string(), "not a package: bad file tag 0x00001234");
    }
}
