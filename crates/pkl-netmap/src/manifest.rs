//! Generation manifest exchanged when a connection opens.
//!
//! Each side sends the per-package counts of its newest generation. The
//! receiver records them with [`PackageMap::apply_remote_manifest`] and
//! recomputes, after which both ends number the shared prefix identically.
//!
//! [`PackageMap::apply_remote_manifest`]: crate::PackageMap::apply_remote_manifest

use serde::{Deserialize, Serialize};

use pkl_linker::Generation;
use pkl_types::PackageGuid;

use crate::error::{NetMapError, NetMapResult};

/// Largest manifest accepted from a peer.
pub const MAX_MANIFEST_SIZE: usize = 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifestEntry {
    pub name: String,
    pub guid: PackageGuid,
    /// Number of generations the sender's file records.
    pub generation: u32,
    pub export_count: i32,
    pub name_count: i32,
    pub net_object_count: i32,
}

impl PackageManifestEntry {
    pub fn counts(&self) -> Generation {
        Generation {
            export_count: self.export_count,
            name_count: self.name_count,
            net_object_count: self.net_object_count,
        }
    }
}

pub fn encode_manifest(entries: &[PackageManifestEntry]) -> NetMapResult<Vec<u8>> {
    let bytes = bincode::serialize(entries).map_err(|e| NetMapError::Serialization(e.to_string()))?;
    if bytes.len() > MAX_MANIFEST_SIZE {
        return Err(NetMapError::Serialization(format!(
            "manifest is {} bytes (max {MAX_MANIFEST_SIZE})",
            bytes.len()
        )));
    }
    Ok(bytes)
}

pub fn decode_manifest(data: &[u8]) -> NetMapResult<Vec<PackageManifestEntry>> {
    if data.len() > MAX_MANIFEST_SIZE {
        return Err(NetMapError::Deserialization(format!(
            "manifest is {} bytes (max {MAX_MANIFEST_SIZE})",
            data.len()
        )));
    }
    bincode::deserialize(data).map_err(|e| NetMapError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, exports: i32) -> PackageManifestEntry {
        PackageManifestEntry {
            name: name.into(),
            guid: PackageGuid::new(),
            generation: 3,
            export_count: exports,
            name_count: 12,
            net_object_count: exports,
        }
    }

    #[test]
    fn manifest_survives_the_wire() {
        let sent = vec![entry("Level", 4), entry("Props", 9)];
        let bytes = encode_manifest(&sent).unwrap();
        assert_eq!(decode_manifest(&bytes).unwrap(), sent);
    }

    #[test]
    fn truncated_manifest_is_rejected() {
        let bytes = encode_manifest(&[entry("Level", 4)]).unwrap();
        let err = decode_manifest(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, NetMapError::Deserialization(_)));
    }

    #[test]
    fn counts_view() {
        let e = entry("Props", 9);
        assert_eq!(
            e.counts(),
            Generation {
                export_count: 9,
                name_count: 12,
                net_object_count: 9
            }
        );
    }
}
