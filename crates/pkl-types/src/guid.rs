use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Globally unique identifier of a package.
///
/// Stored in the summary of every package and echoed by each export that is
/// itself a package. The network object map keys remote generation reports
/// by this value, so two peers agree on "the same package" even when the
/// file names differ.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageGuid(uuid::Uuid);

impl PackageGuid {
    /// Generate a fresh random GUID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// The all-zero GUID. Represents "no package".
    pub const fn null() -> Self {
        Self(uuid::Uuid::nil())
    }

    pub fn is_null(&self) -> bool {
        self.0.is_nil()
    }

    /// Build from the 16 raw bytes stored on disk.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    /// The 16 raw bytes as stored on disk.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Parse from 32 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 16 {
            return Err(TypeError::InvalidLength {
                expected: 16,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Self::from_bytes(arr))
    }
}

impl Default for PackageGuid {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for PackageGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PackageGuid({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for PackageGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
