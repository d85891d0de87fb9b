//! Package summary: the fixed header at offset zero of every package.

use serde::{Deserialize, Serialize};

use pkl_archive::{Archive, ArchiveReader, ArchiveWriter, ByteOrder};
use pkl_types::{
    FileVersion, PackageFlags, PackageGuid, VER_COMPRESSION, VER_COOK_TABLES,
    VER_NET_OBJECT_COUNTS,
};

use crate::error::{LinkError, LinkResult};

/// Magic tag at offset zero.
pub const PACKAGE_FILE_TAG: u32 = 0x9E2A_83C1;

/// Counts recorded at one historical save.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Generation {
    pub export_count: i32,
    pub name_count: i32,
    pub net_object_count: i32,
}

/// One compressed span of the file body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompressedChunk {
    pub uncompressed_offset: i32,
    pub uncompressed_size: i32,
    pub compressed_offset: i32,
    pub compressed_size: i32,
}

impl CompressedChunk {
    const SERIALIZED_LEN: u64 = 16;

    fn read(ar: &mut dyn ArchiveReader) -> Self {
        Self {
            uncompressed_offset: ar.read_i32(),
            uncompressed_size: ar.read_i32(),
            compressed_offset: ar.read_i32(),
            compressed_size: ar.read_i32(),
        }
    }

    fn write(&self, ar: &mut dyn ArchiveWriter) {
        ar.write_i32(self.uncompressed_offset);
        ar.write_i32(self.uncompressed_size);
        ar.write_i32(self.compressed_offset);
        ar.write_i32(self.compressed_size);
    }
}

/// Texture pool preallocation hint carried by cooked packages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextureAllocation {
    pub size_x: i32,
    pub size_y: i32,
    pub num_mips: i32,
    pub format: u32,
    pub create_flags: u32,
    /// Zero-based export positions sharing this allocation shape.
    pub export_indices: Vec<i32>,
}

impl TextureAllocation {
    fn read(ar: &mut dyn ArchiveReader) -> Self {
        let size_x = ar.read_i32();
        let size_y = ar.read_i32();
        let num_mips = ar.read_i32();
        let format = ar.read_u32();
        let create_flags = ar.read_u32();
        let count = read_count(ar, 4);
        let export_indices = (0..count).map(|_| ar.read_i32()).collect();
        Self {
            size_x,
            size_y,
            num_mips,
            format,
            create_flags,
            export_indices,
        }
    }

    fn write(&self, ar: &mut dyn ArchiveWriter) {
        ar.write_i32(self.size_x);
        ar.write_i32(self.size_y);
        ar.write_i32(self.num_mips);
        ar.write_u32(self.format);
        ar.write_u32(self.create_flags);
        ar.write_i32(self.export_indices.len() as i32);
        for &index in &self.export_indices {
            ar.write_i32(index);
        }
    }
}

/// Read an `i32` element count, rejecting negatives and counts that cannot
/// fit in the rest of the stream at `min_element_len` bytes each.
pub(crate) fn read_count(ar: &mut dyn ArchiveReader, min_element_len: u64) -> usize {
    let count = ar.read_i32();
    if count < 0 {
        ar.set_error(&format!("negative element count {count}"));
        return 0;
    }
    let remaining = ar.total_size().saturating_sub(ar.tell());
    if count as u64 * min_element_len.max(1) > remaining {
        ar.set_error(&format!("element count {count} exceeds remaining {remaining} bytes"));
        return 0;
    }
    count as usize
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageSummary {
    pub version: FileVersion,
    /// Offset of the first export payload; everything before it is tables.
    pub header_size: i32,
    pub folder_name: String,
    pub package_flags: PackageFlags,
    pub name_count: i32,
    pub name_offset: i32,
    pub export_count: i32,
    pub export_offset: i32,
    pub import_count: i32,
    pub import_offset: i32,
    pub depends_offset: i32,
    pub guid: PackageGuid,
    /// Oldest first; the last entry describes the save that wrote the file.
    pub generations: Vec<Generation>,
    pub engine_version: i32,
    pub cooked_content_version: i32,
    pub compression_flags: u32,
    pub compressed_chunks: Vec<CompressedChunk>,
    pub package_source: u32,
    pub additional_packages_to_cook: Vec<String>,
    pub texture_allocations: Vec<TextureAllocation>,
}

impl Default for PackageSummary {
    fn default() -> Self {
        Self {
            version: FileVersion::current(),
            header_size: 0,
            folder_name: String::new(),
            package_flags: PackageFlags::empty(),
            name_count: 0,
            name_offset: 0,
            export_count: 0,
            export_offset: 0,
            import_count: 0,
            import_offset: 0,
            depends_offset: 0,
            guid: PackageGuid::null(),
            generations: Vec::new(),
            engine_version: 0,
            cooked_content_version: 0,
            compression_flags: 0,
            compressed_chunks: Vec::new(),
            package_source: 0,
            additional_packages_to_cook: Vec::new(),
            texture_allocations: Vec::new(),
        }
    }
}

impl PackageSummary {
    /// Read the summary and adopt its version (and, for a byte-swapped tag,
    /// its byte order) as the archive's own.
    ///
    /// A bad tag, an unsupported version, or a summary that runs past the
    /// end of the stream are fatal.
    pub fn read(ar: &mut dyn ArchiveReader, package: &str) -> LinkResult<Self> {
        let tag = ar.read_u32();
        if ar.is_error() {
            return Err(LinkError::TruncatedSummary {
                package: package.to_string(),
            });
        }
        if tag != PACKAGE_FILE_TAG {
            if tag.swap_bytes() != PACKAGE_FILE_TAG {
                return Err(LinkError::BadMagic { tag });
            }
            let swapped = match ar.state().byte_order() {
                ByteOrder::Little => ByteOrder::Big,
                ByteOrder::Big => ByteOrder::Little,
            };
            tracing::debug!(package, ?swapped, "byte-swapped package tag");
            ar.state_mut().set_byte_order(swapped);
        }

        let version = FileVersion::from_packed(ar.read_i32());
        if ar.is_error() {
            return Err(LinkError::TruncatedSummary {
                package: package.to_string(),
            });
        }
        if !version.is_supported() {
            return Err(LinkError::UnsupportedVersion(version));
        }
        ar.set_version(version);

        let mut summary = Self {
            version,
            header_size: ar.read_i32(),
            folder_name: ar.read_string(),
            package_flags: PackageFlags::from_bits(ar.read_u32()),
            name_count: ar.read_i32(),
            name_offset: ar.read_i32(),
            export_count: ar.read_i32(),
            export_offset: ar.read_i32(),
            import_count: ar.read_i32(),
            import_offset: ar.read_i32(),
            depends_offset: ar.read_i32(),
            guid: PackageGuid::from_bytes(ar.read_guid()),
            ..Self::default()
        };

        let with_net_counts = version.at_least(VER_NET_OBJECT_COUNTS);
        let count = read_count(ar, if with_net_counts { 12 } else { 8 });
        summary.generations = (0..count)
            .map(|_| {
                let export_count = ar.read_i32();
                let name_count = ar.read_i32();
                let net_object_count = if with_net_counts {
                    ar.read_i32()
                } else {
                    export_count
                };
                Generation {
                    export_count,
                    name_count,
                    net_object_count,
                }
            })
            .collect();

        summary.engine_version = ar.read_i32();
        summary.cooked_content_version = ar.read_i32();

        if version.at_least(VER_COMPRESSION) {
            summary.compression_flags = ar.read_u32();
            let count = read_count(ar, CompressedChunk::SERIALIZED_LEN);
            summary.compressed_chunks = (0..count).map(|_| CompressedChunk::read(ar)).collect();
        }

        summary.package_source = ar.read_u32();

        if version.at_least(VER_COOK_TABLES) {
            let count = read_count(ar, 4);
            summary.additional_packages_to_cook = (0..count).map(|_| ar.read_string()).collect();
            let count = read_count(ar, 24);
            summary.texture_allocations = (0..count).map(|_| TextureAllocation::read(ar)).collect();
        }

        let negative = [
            summary.name_count,
            summary.name_offset,
            summary.export_count,
            summary.export_offset,
            summary.import_count,
            summary.import_offset,
            summary.depends_offset,
            summary.header_size,
        ]
        .iter()
        .any(|&v| v < 0);
        if negative {
            ar.set_error("negative table count or offset in summary");
        }
        if ar.is_error() {
            return Err(LinkError::TruncatedSummary {
                package: package.to_string(),
            });
        }
        Ok(summary)
    }

    /// Write the summary in `self.version`'s layout.
    pub fn write(&self, ar: &mut dyn ArchiveWriter) {
        let version = self.version;
        ar.set_version(version);
        ar.write_u32(PACKAGE_FILE_TAG);
        ar.write_i32(version.packed());
        ar.write_i32(self.header_size);
        ar.write_string(&self.folder_name);
        ar.write_u32(self.package_flags.bits());
        ar.write_i32(self.name_count);
        ar.write_i32(self.name_offset);
        ar.write_i32(self.export_count);
        ar.write_i32(self.export_offset);
        ar.write_i32(self.import_count);
        ar.write_i32(self.import_offset);
        ar.write_i32(self.depends_offset);
        ar.write_guid(self.guid.as_bytes());

        let with_net_counts = version.at_least(VER_NET_OBJECT_COUNTS);
        ar.write_i32(self.generations.len() as i32);
        for generation in &self.generations {
            ar.write_i32(generation.export_count);
            ar.write_i32(generation.name_count);
            if with_net_counts {
                ar.write_i32(generation.net_object_count);
            }
        }

        ar.write_i32(self.engine_version);
        ar.write_i32(self.cooked_content_version);

        if version.at_least(VER_COMPRESSION) {
            ar.write_u32(self.compression_flags);
            ar.write_i32(self.compressed_chunks.len() as i32);
            for chunk in &self.compressed_chunks {
                chunk.write(ar);
            }
        }

        ar.write_u32(self.package_source);

        if version.at_least(VER_COOK_TABLES) {
            ar.write_i32(self.additional_packages_to_cook.len() as i32);
            for package in &self.additional_packages_to_cook {
                ar.write_string(package);
            }
            ar.write_i32(self.texture_allocations.len() as i32);
            for allocation in &self.texture_allocations {
                allocation.write(ar);
            }
        }
    }

    /// The generation written by the most recent save.
    pub fn latest_generation(&self) -> Generation {
        self.generations.last().copied().unwrap_or(Generation {
            export_count: self.export_count,
            name_count: self.name_count,
            net_object_count: self.export_count,
        })
    }

    pub fn is_compressed(&self) -> bool {
        !self.compressed_chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkl_archive::{ArchiveState, MemoryReader, MemoryWriter};

    fn sample() -> PackageSummary {
        PackageSummary {
            header_size: 512,
            folder_name: "Maps".into(),
            package_flags: PackageFlags::ALLOW_DOWNLOAD | PackageFlags::COOKED,
            name_count: 10,
            name_offset: 200,
            export_count: 3,
            export_offset: 300,
            import_count: 2,
            import_offset: 250,
            depends_offset: 400,
            guid: PackageGuid::new(),
            generations: vec![
                Generation {
                    export_count: 2,
                    name_count: 8,
                    net_object_count: 2,
                },
                Generation {
                    export_count: 3,
                    name_count: 10,
                    net_object_count: 3,
                },
            ],
            engine_version: 42,
            cooked_content_version: 7,
            package_source: 0xABCD,
            additional_packages_to_cook: vec!["Extra".into()],
            texture_allocations: vec![TextureAllocation {
                size_x: 256,
                size_y: 256,
                num_mips: 9,
                format: 3,
                create_flags: 1,
                export_indices: vec![0, 2],
            }],
            ..PackageSummary::default()
        }
    }

    fn encode(summary: &PackageSummary) -> Vec<u8> {
        let mut w = MemoryWriter::new();
        summary.write(&mut w);
        w.into_bytes()
    }

    #[test]
    fn current_version_roundtrip() {
        let summary = sample();
        let mut r = MemoryReader::new(encode(&summary));
        let back = PackageSummary::read(&mut r, "Test").unwrap();
        assert_eq!(back, summary);
        assert!(r.at_end());
        assert_eq!(r.version(), FileVersion::current());
    }

    #[test]
    fn tag_layout() {
        let bytes = encode(&sample());
        assert_eq!(&bytes[0..4], &[0xC1, 0x83, 0x2A, 0x9E]);
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut bytes = encode(&sample());
        bytes[0] = 0;
        let err = PackageSummary::read(&mut MemoryReader::new(bytes), "Test").unwrap_err();
        assert!(matches!(err, LinkError::BadMagic { .. }));
    }

    #[test]
    fn truncated_summary_is_fatal() {
        let bytes = encode(&sample());
        for len in [2, 10, bytes.len() / 2, bytes.len() - 1] {
            let err = PackageSummary::read(&mut MemoryReader::new(bytes[..len].to_vec()), "Test")
                .unwrap_err();
            assert!(
                matches!(err, LinkError::TruncatedSummary { .. }),
                "len {len}: {err}"
            );
        }
    }

    #[test]
    fn newer_format_is_unsupported() {
        let mut summary = sample();
        summary.version = FileVersion::new(pkl_types::VER_CURRENT + 1, 0);
        let err = PackageSummary::read(&mut MemoryReader::new(encode(&summary)), "Test")
            .unwrap_err();
        assert!(matches!(err, LinkError::UnsupportedVersion(_)));
    }

    #[test]
    fn oldest_format_defaults_gated_fields() {
        let mut summary = sample();
        summary.version = FileVersion::new(pkl_types::VER_MIN_SUPPORTED, 3);
        let mut r = MemoryReader::new(encode(&summary));
        let back = PackageSummary::read(&mut r, "Test").unwrap();
        assert!(r.at_end());
        assert_eq!(back.version.licensee, 3);
        assert!(back.additional_packages_to_cook.is_empty());
        assert!(back.texture_allocations.is_empty());
        assert_eq!(back.compression_flags, 0);
        // Net counts were not recorded; they default to the export count.
        assert_eq!(back.generations[0].net_object_count, 2);
        assert_eq!(back.generations[1].net_object_count, 3);
    }

    #[test]
    fn byte_swapped_file_is_detected() {
        let summary = sample();
        let mut w = MemoryWriter::with_state(ArchiveState::saving().with_byte_order(ByteOrder::Big));
        summary.write(&mut w);
        let mut r = MemoryReader::new(w.into_bytes());
        let back = PackageSummary::read(&mut r, "Test").unwrap();
        assert_eq!(back.export_count, 3);
        assert_eq!(back.generations, summary.generations);
        assert_eq!(r.state().byte_order(), ByteOrder::Big);
    }

    #[test]
    fn latest_generation_falls_back_to_counts() {
        let summary = PackageSummary {
            export_count: 4,
            name_count: 9,
            ..PackageSummary::default()
        };
        assert_eq!(
            summary.latest_generation(),
            Generation {
                export_count: 4,
                name_count: 9,
                net_object_count: 4
            }
        );
        assert_eq!(sample().latest_generation().export_count, 3);
    }
}
