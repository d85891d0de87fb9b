use std::fmt;

use serde::{Deserialize, Serialize};

/// Oldest format version this build can read.
pub const VER_MIN_SUPPORTED: u16 = 1;
/// Export records carry per-generation net object counts; generations carry
/// a net object count.
pub const VER_NET_OBJECT_COUNTS: u16 = 2;
/// Summary carries compression flags and the compressed chunk table.
pub const VER_COMPRESSION: u16 = 3;
/// Summary carries the package source word, the additional-packages-to-cook
/// list and the texture allocation table.
pub const VER_COOK_TABLES: u16 = 4;
/// Version written by this build.
pub const VER_CURRENT: u16 = VER_COOK_TABLES;

/// Packed file version: low 16 bits are the format version, high 16 bits the
/// licensee (variant) version.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileVersion {
    pub format: u16,
    pub licensee: u16,
}

impl FileVersion {
    pub const fn new(format: u16, licensee: u16) -> Self {
        Self { format, licensee }
    }

    /// The version written by this build.
    pub const fn current() -> Self {
        Self::new(VER_CURRENT, 0)
    }

    pub const fn from_packed(packed: i32) -> Self {
        let bits = packed as u32;
        Self {
            format: (bits & 0xFFFF) as u16,
            licensee: (bits >> 16) as u16,
        }
    }

    pub const fn packed(self) -> i32 {
        ((self.licensee as u32) << 16 | self.format as u32) as i32
    }

    /// `true` when the format version is at least `version`.
    pub const fn at_least(self, version: u16) -> bool {
        self.format >= version
    }

    pub const fn is_supported(self) -> bool {
        self.format >= VER_MIN_SUPPORTED && self.format <= VER_CURRENT
    }
}

impl Default for FileVersion {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Debug for FileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileVersion({}/{})", self.format, self.licensee)
    }
}

impl fmt::Display for FileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.format, self.licensee)
    }
}
