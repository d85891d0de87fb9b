//! Foundation types for the package linker.
//!
//! Every other `pkl-*` crate depends on `pkl-types`. The types here are the
//! vocabulary shared by the on-disk format, the loader, the writer and the
//! network object map.
//!
//! # Key Types
//!
//! - [`PackageIndex`]: signed reference into a package's export or import table
//! - [`PackageGuid`]: 16-byte globally unique package identifier
//! - [`ObjectFlags`], [`PackageFlags`], [`ExportFlags`]: persisted flag words
//! - [`FileVersion`]: packed `(format, licensee)` version word

pub mod error;
pub mod flags;
pub mod guid;
pub mod index;
pub mod version;

pub use error::TypeError;
pub use flags::{ExportFlags, ObjectFlags, PackageFlags};
pub use guid::PackageGuid;
pub use index::PackageIndex;
pub use version::{
    FileVersion, VER_COMPRESSION, VER_COOK_TABLES, VER_CURRENT, VER_MIN_SUPPORTED,
    VER_NET_OBJECT_COUNTS,
};
