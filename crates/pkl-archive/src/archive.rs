use std::io;

use pkl_types::FileVersion;

use crate::compact;

/// Default cap on length-prefixed strings, in characters.
pub const DEFAULT_MAX_STRING_LEN: usize = 64 * 1024;

/// Byte order of persisted data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Byte order of the host.
    pub const fn native() -> Self {
        if cfg!(target_endian = "little") {
            Self::Little
        } else {
            Self::Big
        }
    }
}

/// State shared by every archive implementation.
#[derive(Clone, Debug)]
pub struct ArchiveState {
    loading: bool,
    /// Persistent archives (files, network) carry data in `byte_order`;
    /// transient archives carry host order.
    persistent: bool,
    byte_order: ByteOrder,
    version: FileVersion,
    error: bool,
    max_string_len: usize,
}

impl ArchiveState {
    pub fn loading() -> Self {
        Self::new(true)
    }

    pub fn saving() -> Self {
        Self::new(false)
    }

    fn new(loading: bool) -> Self {
        Self {
            loading,
            persistent: true,
            byte_order: ByteOrder::Little,
            version: FileVersion::current(),
            error: false,
            max_string_len: DEFAULT_MAX_STRING_LEN,
        }
    }

    #[must_use]
    pub fn transient(mut self) -> Self {
        self.persistent = false;
        self
    }

    #[must_use]
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    #[must_use]
    pub fn with_max_string_len(mut self, max: usize) -> Self {
        self.max_string_len = max;
        self
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Switch the file byte order mid-stream, after sniffing a swapped tag.
    pub fn set_byte_order(&mut self, order: ByteOrder) {
        self.byte_order = order;
    }

    /// `true` when primitives must be byte-swapped on the way through.
    pub fn needs_swap(&self) -> bool {
        self.persistent && self.byte_order != ByteOrder::native()
    }

    /// Swap `bytes` into (or out of) host order when required.
    pub fn normalize(&self, bytes: &mut [u8]) {
        if self.needs_swap() {
            bytes.reverse();
        }
    }
}

/// Common surface of readers and writers.
pub trait Archive {
    fn state(&self) -> &ArchiveState;
    fn state_mut(&mut self) -> &mut ArchiveState;

    /// Current stream offset.
    fn tell(&self) -> u64;

    /// Total stream size in bytes.
    fn total_size(&self) -> u64;

    /// Move the stream offset. Seeking past the end of a reader sets the
    /// error flag.
    fn seek(&mut self, offset: u64);

    fn is_loading(&self) -> bool {
        self.state().loading
    }

    fn is_saving(&self) -> bool {
        !self.state().loading
    }

    fn is_persistent(&self) -> bool {
        self.state().persistent
    }

    fn version(&self) -> FileVersion {
        self.state().version
    }

    /// Record the version subsequent reads are interpreted against.
    fn set_version(&mut self, version: FileVersion) {
        self.state_mut().version = version;
    }

    fn is_error(&self) -> bool {
        self.state().error
    }

    /// Raise the sticky error flag. Only the first failure is logged.
    fn set_error(&mut self, reason: &str) {
        if !self.state().error {
            tracing::warn!(offset = self.tell(), reason, "archive error");
        }
        self.state_mut().error = true;
    }

    fn clear_error(&mut self) {
        self.state_mut().error = false;
    }

    fn at_end(&self) -> bool {
        self.tell() >= self.total_size()
    }
}

macro_rules! read_primitive {
    ($(#[$meta:meta])* $fn:ident, $ty:ty) => {
        $(#[$meta])*
        fn $fn(&mut self) -> $ty {
            let mut bytes = [0u8; std::mem::size_of::<$ty>()];
            self.read_bytes(&mut bytes);
            self.state().normalize(&mut bytes);
            <$ty>::from_ne_bytes(bytes)
        }
    };
}

macro_rules! write_primitive {
    ($fn:ident, $ty:ty) => {
        fn $fn(&mut self, value: $ty) {
            let mut bytes = value.to_ne_bytes();
            self.state().normalize(&mut bytes);
            self.write_bytes(&bytes);
        }
    };
}

/// A loading archive.
pub trait ArchiveReader: Archive {
    /// Fill `buf` from the stream. Implementations return an error on a
    /// short read; they never see calls once the error flag is set.
    fn read_raw(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Fill `buf`, zero-filling instead when the archive is in error.
    fn read_bytes(&mut self, buf: &mut [u8]) {
        if buf.is_empty() {
            return;
        }
        if self.is_error() {
            buf.fill(0);
            return;
        }
        if let Err(e) = self.read_raw(buf) {
            buf.fill(0);
            self.set_error(&format!("short read of {} bytes: {e}", buf.len()));
        }
    }

    /// Read `len` bytes, refusing lengths beyond the end of the stream.
    fn read_vec(&mut self, len: usize) -> Vec<u8> {
        let remaining = self.total_size().saturating_sub(self.tell());
        if len as u64 > remaining {
            self.set_error(&format!("length {len} exceeds remaining {remaining} bytes"));
            return Vec::new();
        }
        let mut buf = vec![0u8; len];
        self.read_bytes(&mut buf);
        buf
    }

    read_primitive!(read_u8, u8);
    read_primitive!(read_u16, u16);
    read_primitive!(read_i16, i16);
    read_primitive!(read_u32, u32);
    read_primitive!(read_i32, i32);
    read_primitive!(read_u64, u64);
    read_primitive!(read_i64, i64);
    read_primitive!(read_f32, f32);
    read_primitive!(read_f64, f64);

    fn read_bool(&mut self) -> bool {
        self.read_u8() != 0
    }

    /// 16 raw bytes, never byte-swapped.
    fn read_guid(&mut self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        self.read_bytes(&mut bytes);
        bytes
    }

    /// Unsigned compact index.
    fn read_compact_u64(&mut self) -> u64 {
        match compact::read_u64(self) {
            Some(value) => value,
            None => {
                self.set_error("malformed compact index");
                0
            }
        }
    }

    fn read_compact_u32(&mut self) -> u32 {
        let value = self.read_compact_u64();
        match u32::try_from(value) {
            Ok(v) => v,
            Err(_) => {
                self.set_error("compact index exceeds 32 bits");
                0
            }
        }
    }

    /// Length-prefixed string: positive length for single-byte text,
    /// negative for UTF-16LE, both counting a trailing NUL.
    fn read_string(&mut self) -> String {
        let len = self.read_i32();
        if len == 0 || self.is_error() {
            return String::new();
        }
        let count = len.unsigned_abs() as usize;
        if count > self.state().max_string_len {
            self.set_error(&format!("string length {count} exceeds limit"));
            return String::new();
        }
        if len > 0 {
            let mut bytes = self.read_vec(count);
            if bytes.pop() != Some(0) {
                self.set_error("string is not NUL terminated");
            }
            match String::from_utf8(bytes) {
                Ok(s) => s,
                // Single-byte text that is not UTF-8 is Latin-1.
                Err(e) => e.into_bytes().into_iter().map(char::from).collect(),
            }
        } else {
            let raw = self.read_vec(count * 2);
            let mut units: Vec<u16> = raw
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            if units.pop() != Some(0) {
                self.set_error("string is not NUL terminated");
            }
            String::from_utf16_lossy(&units)
        }
    }
}

/// A saving archive.
pub trait ArchiveWriter: Archive {
    fn write_raw(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Flush buffered bytes to the destination.
    fn finish(&mut self) -> io::Result<()>;

    fn write_bytes(&mut self, buf: &[u8]) {
        if self.is_error() || buf.is_empty() {
            return;
        }
        if let Err(e) = self.write_raw(buf) {
            self.set_error(&format!("write of {} bytes failed: {e}", buf.len()));
        }
    }

    fn write_u8(&mut self, value: u8) {
        self.write_bytes(&[value]);
    }

    write_primitive!(write_u16, u16);
    write_primitive!(write_i16, i16);
    write_primitive!(write_u32, u32);
    write_primitive!(write_i32, i32);
    write_primitive!(write_u64, u64);
    write_primitive!(write_i64, i64);
    write_primitive!(write_f32, f32);
    write_primitive!(write_f64, f64);

    fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    fn write_guid(&mut self, guid: &[u8; 16]) {
        self.write_bytes(guid);
    }

    fn write_compact_u64(&mut self, value: u64) {
        let mut buf = Vec::with_capacity(10);
        compact::encode_u64(&mut buf, value);
        self.write_bytes(&buf);
    }

    fn write_compact_u32(&mut self, value: u32) {
        self.write_compact_u64(value as u64);
    }

    /// ASCII text is written single-byte; anything else as UTF-16LE.
    fn write_string(&mut self, value: &str) {
        if value.is_empty() {
            self.write_i32(0);
        } else if value.is_ascii() {
            self.write_i32(value.len() as i32 + 1);
            self.write_bytes(value.as_bytes());
            self.write_u8(0);
        } else {
            let units: Vec<u16> = value.encode_utf16().collect();
            self.write_i32(-(units.len() as i32 + 1));
            let mut bytes = Vec::with_capacity((units.len() + 1) * 2);
            for unit in units.iter().chain(std::iter::once(&0)) {
                bytes.extend_from_slice(&unit.to_le_bytes());
            }
            self.write_bytes(&bytes);
        }
    }
}
