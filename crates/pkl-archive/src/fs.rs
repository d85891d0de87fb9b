use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::archive::{Archive, ArchiveReader, ArchiveState, ArchiveWriter};
use crate::error::{ArchiveError, ArchiveResult};
use crate::file::{FileReader, FileWriter};
use crate::memory::{MemoryReader, MemoryWriter};

/// File-system surface the linker depends on.
pub trait PackageFileSystem: Send + Sync {
    /// Open a file for reading.
    fn open_read(&self, path: &Path) -> ArchiveResult<Box<dyn ArchiveReader + Send>>;

    /// Create (or truncate) a file for writing. Bytes are durable once
    /// [`ArchiveWriter::finish`] returns.
    fn open_write(&self, path: &Path) -> ArchiveResult<Box<dyn ArchiveWriter + Send>>;

    /// File size in bytes.
    fn size(&self, path: &Path) -> ArchiveResult<u64>;

    fn exists(&self, path: &Path) -> bool {
        self.size(path).is_ok()
    }
}

/// The host file system.
#[derive(Clone, Debug, Default)]
pub struct DiskFileSystem;

impl DiskFileSystem {
    pub fn new() -> Self {
        Self
    }
}

impl PackageFileSystem for DiskFileSystem {
    fn open_read(&self, path: &Path) -> ArchiveResult<Box<dyn ArchiveReader + Send>> {
        Ok(Box::new(FileReader::open(path)?))
    }

    fn open_write(&self, path: &Path) -> ArchiveResult<Box<dyn ArchiveWriter + Send>> {
        Ok(Box::new(FileWriter::create(path)?))
    }

    fn size(&self, path: &Path) -> ArchiveResult<u64> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(ArchiveError::NotFound(path.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ArchiveError::NotFound(path.to_path_buf()))
            }
            Err(e) => Err(ArchiveError::Io(e)),
        }
    }
}

type FileMap = Arc<RwLock<HashMap<PathBuf, Vec<u8>>>>;

/// In-memory file system for tests and embedding.
#[derive(Clone, Default)]
pub struct MemoryFileSystem {
    files: FileMap,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a file.
    pub fn insert(&self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
        self.files
            .write()
            .expect("lock poisoned")
            .insert(path.into(), bytes);
    }

    /// A copy of a file's bytes.
    pub fn get(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.read().expect("lock poisoned").get(path).cloned()
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.files
            .write()
            .expect("lock poisoned")
            .remove(path)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.files.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PackageFileSystem for MemoryFileSystem {
    fn open_read(&self, path: &Path) -> ArchiveResult<Box<dyn ArchiveReader + Send>> {
        let bytes = self
            .get(path)
            .ok_or_else(|| ArchiveError::NotFound(path.to_path_buf()))?;
        Ok(Box::new(MemoryReader::new(bytes)))
    }

    fn open_write(&self, path: &Path) -> ArchiveResult<Box<dyn ArchiveWriter + Send>> {
        Ok(Box::new(MemoryFileWriter {
            path: path.to_path_buf(),
            files: Arc::clone(&self.files),
            inner: MemoryWriter::new(),
        }))
    }

    fn size(&self, path: &Path) -> ArchiveResult<u64> {
        self.files
            .read()
            .expect("lock poisoned")
            .get(path)
            .map(|b| b.len() as u64)
            .ok_or_else(|| ArchiveError::NotFound(path.to_path_buf()))
    }
}

impl std::fmt::Debug for MemoryFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFileSystem")
            .field("file_count", &self.len())
            .finish()
    }
}

/// Buffers writes and publishes them to the owning map on `finish`.
struct MemoryFileWriter {
    path: PathBuf,
    files: FileMap,
    inner: MemoryWriter,
}

impl Archive for MemoryFileWriter {
    fn state(&self) -> &ArchiveState {
        self.inner.state()
    }

    fn state_mut(&mut self) -> &mut ArchiveState {
        self.inner.state_mut()
    }

    fn tell(&self) -> u64 {
        self.inner.tell()
    }

    fn total_size(&self) -> u64 {
        self.inner.total_size()
    }

    fn seek(&mut self, offset: u64) {
        self.inner.seek(offset);
    }
}

impl ArchiveWriter for MemoryFileWriter {
    fn write_raw(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_raw(buf)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.files
            .write()
            .expect("lock poisoned")
            .insert(self.path.clone(), self.inner.bytes().to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_fs_write_is_visible_after_finish() {
        let fs = MemoryFileSystem::new();
        let path = Path::new("Engine.pkg");
        let mut w = fs.open_write(path).unwrap();
        w.write_i32(5);
        assert!(!fs.exists(path), "not published before finish");
        w.finish().unwrap();
        assert_eq!(fs.size(path).unwrap(), 4);

        let mut r = fs.open_read(path).unwrap();
        assert_eq!(r.read_i32(), 5);
    }

    #[test]
    fn memory_fs_missing_file() {
        let fs = MemoryFileSystem::new();
        assert!(matches!(
            fs.open_read(Path::new("nope")).err().unwrap(),
            ArchiveError::NotFound(_)
        ));
        assert!(!fs.exists(Path::new("nope")));
    }

    #[test]
    fn memory_fs_clones_share_files() {
        let fs = MemoryFileSystem::new();
        let other = fs.clone();
        fs.insert("a.pkg", vec![1, 2, 3]);
        assert_eq!(other.get(Path::new("a.pkg")), Some(vec![1, 2, 3]));
        assert!(other.remove(Path::new("a.pkg")));
        assert!(fs.is_empty());
    }

    #[test]
    fn disk_fs_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Disk.pkg");
        let fs = DiskFileSystem::new();

        let mut w = fs.open_write(&path).unwrap();
        w.write_string("payload");
        w.finish().unwrap();
        drop(w);

        assert!(fs.exists(&path));
        assert_eq!(fs.size(&path).unwrap(), 12);
        let mut r = fs.open_read(&path).unwrap();
        assert_eq!(r.read_string(), "payload");
    }

    #[test]
    fn disk_fs_directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DiskFileSystem::new();
        assert!(!fs.exists(dir.path()));
    }
}
