//! Byte-stream archives for the package linker.
//!
//! An archive is a seekable stream with a direction (loading or saving), a
//! persistent/transient flag and a sticky error flag. Readers never fail on
//! a short read: they set the error flag, zero-fill the destination and log
//! once, so a single corrupt field cannot abort an otherwise salvageable
//! load. Callers inspect [`Archive::is_error`] to decide what to keep.
//!
//! # Architecture
//!
//! - [`ArchiveReader`] / [`ArchiveWriter`]: typed primitives over raw I/O
//! - [`MemoryReader`] / [`MemoryWriter`]: `Vec<u8>` backed, used for
//!   inflated compressed packages and for building files before writing
//! - [`FileReader`] / [`FileWriter`]: buffered `std::fs::File` streams
//! - [`BulkData`] / [`BulkDataRegistry`]: payloads whose bytes stay on disk
//!   until first access
//! - [`PackageFileSystem`]: open-for-read / open-for-write / size

pub mod archive;
pub mod bulk;
pub mod compact;
pub mod error;
pub mod file;
pub mod fs;
pub mod memory;

pub use archive::{Archive, ArchiveReader, ArchiveState, ArchiveWriter, ByteOrder};
pub use bulk::{BulkData, BulkDataRegistry};
pub use error::{ArchiveError, ArchiveResult};
pub use file::{FileReader, FileWriter};
pub use fs::{DiskFileSystem, MemoryFileSystem, PackageFileSystem};
pub use memory::{MemoryReader, MemoryWriter};
