use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::archive::{Archive, ArchiveReader, ArchiveState, ArchiveWriter};
use crate::error::{ArchiveError, ArchiveResult};

/// Loading archive over a buffered file handle.
///
/// Owns exactly one open handle, released on drop.
pub struct FileReader {
    path: PathBuf,
    reader: BufReader<File>,
    pos: u64,
    size: u64,
    state: ArchiveState,
}

impl FileReader {
    pub fn open(path: &Path) -> ArchiveResult<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ArchiveError::NotFound(path.to_path_buf()),
            _ => ArchiveError::Io(e),
        })?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            pos: 0,
            size,
            state: ArchiveState::loading(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Archive for FileReader {
    fn state(&self) -> &ArchiveState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ArchiveState {
        &mut self.state
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn total_size(&self) -> u64 {
        self.size
    }

    fn seek(&mut self, offset: u64) {
        if offset > self.size {
            self.set_error(&format!("seek to {offset} beyond end {}", self.size));
            return;
        }
        if offset == self.pos {
            return;
        }
        match self.reader.seek(SeekFrom::Start(offset)) {
            Ok(_) => self.pos = offset,
            Err(e) => self.set_error(&format!("seek failed: {e}")),
        }
    }
}

impl ArchiveReader for FileReader {
    fn read_raw(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.reader.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }
}

impl std::fmt::Debug for FileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReader")
            .field("path", &self.path)
            .field("pos", &self.pos)
            .field("size", &self.size)
            .finish()
    }
}

/// Saving archive over a buffered file handle.
pub struct FileWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    pos: u64,
    size: u64,
    state: ArchiveState,
}

impl FileWriter {
    /// Create (or truncate) the file at `path`, creating parent directories.
    pub fn create(path: &Path) -> ArchiveResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            pos: 0,
            size: 0,
            state: ArchiveState::saving(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Archive for FileWriter {
    fn state(&self) -> &ArchiveState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ArchiveState {
        &mut self.state
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn total_size(&self) -> u64 {
        self.size
    }

    fn seek(&mut self, offset: u64) {
        match self.writer.seek(SeekFrom::Start(offset)) {
            Ok(_) => self.pos = offset,
            Err(e) => self.set_error(&format!("seek failed: {e}")),
        }
    }
}

impl ArchiveWriter for FileWriter {
    fn write_raw(&mut self, buf: &[u8]) -> io::Result<()> {
        self.writer.write_all(buf)?;
        self.pos += buf.len() as u64;
        self.size = self.size.max(self.pos);
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }
}

impl std::fmt::Debug for FileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWriter")
            .field("path", &self.path)
            .field("pos", &self.pos)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.bin");

        let mut w = FileWriter::create(&path).unwrap();
        w.write_string("Engine");
        w.write_u64(0xDEAD_BEEF);
        w.finish().unwrap();
        drop(w);

        let mut r = FileReader::open(&path).unwrap();
        assert_eq!(r.read_string(), "Engine");
        assert_eq!(r.read_u64(), 0xDEAD_BEEF);
        assert!(r.at_end());
        assert!(!r.is_error());
    }

    #[test]
    fn writer_seek_back_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patch.bin");

        let mut w = FileWriter::create(&path).unwrap();
        w.write_i32(0);
        w.write_i32(2);
        w.seek(0);
        w.write_i32(1);
        w.seek(8);
        w.finish().unwrap();
        drop(w);

        let mut r = FileReader::open(&path).unwrap();
        assert_eq!(r.read_i32(), 1);
        assert_eq!(r.read_i32(), 2);
    }

    #[test]
    fn open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileReader::open(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound(_)));
    }

    #[test]
    fn short_file_read_sets_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, [1u8, 2]).unwrap();
        let mut r = FileReader::open(&path).unwrap();
        assert_eq!(r.read_u32(), 0);
        assert!(r.is_error());
    }
}
