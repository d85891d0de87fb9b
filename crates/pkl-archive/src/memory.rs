use std::io;

use crate::archive::{Archive, ArchiveReader, ArchiveState, ArchiveWriter};

/// Loading archive over an owned byte buffer.
#[derive(Debug)]
pub struct MemoryReader {
    data: Vec<u8>,
    pos: usize,
    state: ArchiveState,
}

impl MemoryReader {
    /// A persistent little-endian reader over `data`.
    pub fn new(data: Vec<u8>) -> Self {
        Self::with_state(data, ArchiveState::loading())
    }

    pub fn with_state(data: Vec<u8>, state: ArchiveState) -> Self {
        Self {
            data,
            pos: 0,
            state,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Archive for MemoryReader {
    fn state(&self) -> &ArchiveState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ArchiveState {
        &mut self.state
    }

    fn tell(&self) -> u64 {
        self.pos as u64
    }

    fn total_size(&self) -> u64 {
        self.data.len() as u64
    }

    fn seek(&mut self, offset: u64) {
        if offset > self.data.len() as u64 {
            self.set_error(&format!("seek to {offset} beyond end {}", self.data.len()));
            self.pos = self.data.len();
        } else {
            self.pos = offset as usize;
        }
    }
}

impl ArchiveReader for MemoryReader {
    fn read_raw(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let end = self.pos + buf.len();
        if end > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("need {} bytes at {}, have {}", buf.len(), self.pos, self.data.len()),
            ));
        }
        buf.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(())
    }
}

/// Saving archive into a growable byte buffer.
///
/// Seeking backwards and writing overwrites in place, which is how table
/// offsets are patched once they are known.
#[derive(Debug)]
pub struct MemoryWriter {
    data: Vec<u8>,
    pos: usize,
    state: ArchiveState,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::with_state(ArchiveState::saving())
    }

    pub fn with_state(state: ArchiveState) -> Self {
        Self {
            data: Vec::new(),
            pos: 0,
            state,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl Default for MemoryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Archive for MemoryWriter {
    fn state(&self) -> &ArchiveState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ArchiveState {
        &mut self.state
    }

    fn tell(&self) -> u64 {
        self.pos as u64
    }

    fn total_size(&self) -> u64 {
        self.data.len() as u64
    }

    fn seek(&mut self, offset: u64) {
        let offset = offset as usize;
        if offset > self.data.len() {
            self.data.resize(offset, 0);
        }
        self.pos = offset;
    }
}

impl ArchiveWriter for MemoryWriter {
    fn write_raw(&mut self, buf: &[u8]) -> io::Result<()> {
        let end = self.pos + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_tracks_offset() {
        let mut r = MemoryReader::new(vec![1, 2, 3, 4, 5]);
        assert_eq!(r.total_size(), 5);
        assert_eq!(r.read_u8(), 1);
        assert_eq!(r.tell(), 1);
        r.seek(4);
        assert_eq!(r.read_u8(), 5);
        assert!(r.at_end());
        assert!(r.is_loading());
    }

    #[test]
    fn reader_seek_past_end_sets_error() {
        let mut r = MemoryReader::new(vec![0; 4]);
        r.seek(10);
        assert!(r.is_error());
        assert_eq!(r.tell(), 4);
    }

    #[test]
    fn writer_patches_in_place() {
        let mut w = MemoryWriter::new();
        w.write_i32(0);
        w.write_i32(7);
        let end = w.tell();
        w.seek(0);
        w.write_i32(42);
        w.seek(end);
        assert!(w.is_saving());
        let mut r = MemoryReader::new(w.into_bytes());
        assert_eq!(r.read_i32(), 42);
        assert_eq!(r.read_i32(), 7);
    }

    #[test]
    fn writer_seek_forward_zero_pads() {
        let mut w = MemoryWriter::new();
        w.seek(3);
        w.write_u8(9);
        assert_eq!(w.bytes(), &[0, 0, 0, 9]);
    }
}
