//! Package linker: loads and saves packages of named, typed objects.
//!
//! A package file carries a summary, a name table, an import table, an
//! export table and one payload per export. Loading rehydrates it lazily:
//! opening reads the tables and verifies imports, object shells are created
//! on first reference, and fields are deserialized on first preload. Shells
//! are registered before their fields are read, which is what makes cyclic
//! graphs loadable.
//!
//! # Architecture
//!
//! - [`PackageSummary`]: file header, generations, compression chunk table
//! - [`ObjectImport`] / [`ObjectExport`]: table records using signed
//!   [`PackageIndex`](pkl_types::PackageIndex) references
//! - [`PackageLoader`]: per-file table state and export hash
//! - [`LinkerContext`]: object arena, loader registry, import verification,
//!   load batches and preload
//! - [`PackageWriter`]: dense numbering of a package for saving
//! - [`Serializable`] / [`CodecRegistry`]: per-class field codecs

pub mod codec;
pub mod compression;
pub mod config;
pub mod context;
pub mod error;
pub mod hash;
pub mod loader;
pub mod object;
mod payload;
pub mod summary;
pub mod table;
mod verify;
pub mod writer;

pub use codec::{CodecRegistry, FieldReader, FieldWriter, RawCodec, Serializable, TaggedPropertyCodec};
pub use compression::{COMPRESS_NONE, COMPRESS_ZSTD};
pub use config::{LinkerConfig, LoadOptions, SaveOptions, MAX_CREATE_DEPTH};
pub use context::{Intrinsics, LinkerContext, SharedContext};
pub use error::{LinkError, LinkResult, UnresolvedImport};
pub use hash::{hash_key, ExportHash, EXPORT_HASH_BUCKETS};
pub use loader::{LoaderId, LoaderState, PackageLoader};
pub use object::{FieldData, LinkerSlot, Object, ObjectArena, ObjectHandle, Property, PropertyValue};
pub use summary::{CompressedChunk, Generation, PackageSummary, PACKAGE_FILE_TAG};
pub use table::{ImportResolution, ObjectExport, ObjectImport};
pub use writer::PackageWriter;
