//! Name, import and export table records.

use pkl_archive::{Archive, ArchiveReader, ArchiveWriter};
use pkl_names::{Name, NameId};
use pkl_types::{
    ExportFlags, ObjectFlags, PackageFlags, PackageGuid, PackageIndex, VER_NET_OBJECT_COUNTS,
};

use crate::loader::LoaderId;
use crate::object::ObjectHandle;
use crate::summary::read_count;

/// Read a `(localNameIndex, number)` pair through a package-local name map.
///
/// Indices outside the visible map set the archive error flag and read as
/// the `None` name.
pub fn read_name_ref(ar: &mut dyn ArchiveReader, name_map: &[NameId]) -> Name {
    let index = ar.read_i32();
    let number = ar.read_i32();
    match usize::try_from(index).ok().and_then(|i| name_map.get(i)) {
        Some(&id) => Name { id, number },
        None => {
            ar.set_error(&format!(
                "name index {index} out of range ({} names)",
                name_map.len()
            ));
            Name::NONE
        }
    }
}

pub fn write_name_ref(ar: &mut dyn ArchiveWriter, local_index: i32, number: i32) {
    ar.write_i32(local_index);
    ar.write_i32(number);
}

/// Maps a global name handle to its local name-table position on save.
pub type NameIndexFn<'a> = &'a dyn Fn(NameId) -> i32;

/// How an import was bound during verification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImportResolution {
    /// Not yet verified.
    #[default]
    Pending,
    /// A top-level package provided by a loader.
    Package { loader: LoaderId },
    /// An export inside a providing loader.
    Export { loader: LoaderId, index: usize },
    /// An object that already exists in memory, such as an intrinsic.
    Native(ObjectHandle),
    /// Permanently unresolved; reads back as null.
    Unresolved,
}

impl ImportResolution {
    pub fn is_resolved(self) -> bool {
        !matches!(self, Self::Pending | Self::Unresolved)
    }
}

/// An object this package depends on but does not own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectImport {
    pub class_package: Name,
    pub class_name: Name,
    pub outer_index: PackageIndex,
    pub object_name: Name,
    /// Load-time binding, never persisted.
    pub resolution: ImportResolution,
    pub(crate) object: Option<ObjectHandle>,
}

impl ObjectImport {
    pub fn new(class_package: Name, class_name: Name, outer_index: PackageIndex, object_name: Name) -> Self {
        Self {
            class_package,
            class_name,
            outer_index,
            object_name,
            resolution: ImportResolution::Pending,
            object: None,
        }
    }

    pub fn read(ar: &mut dyn ArchiveReader, name_map: &[NameId]) -> Self {
        let class_package = read_name_ref(ar, name_map);
        let class_name = read_name_ref(ar, name_map);
        let outer_index = PackageIndex::from_raw(ar.read_i32());
        let object_name = read_name_ref(ar, name_map);
        Self::new(class_package, class_name, outer_index, object_name)
    }

    pub fn write(&self, ar: &mut dyn ArchiveWriter, names: NameIndexFn<'_>) {
        write_name_ref(ar, names(self.class_package.id), self.class_package.number);
        write_name_ref(ar, names(self.class_name.id), self.class_name.number);
        ar.write_i32(self.outer_index.raw());
        write_name_ref(ar, names(self.object_name.id), self.object_name.number);
    }

    /// Object materialized for this import, if any.
    pub fn object(&self) -> Option<ObjectHandle> {
        self.object
    }
}

/// An object owned and fully described by this package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectExport {
    pub class_index: PackageIndex,
    pub super_index: PackageIndex,
    pub outer_index: PackageIndex,
    pub object_name: Name,
    pub archetype_index: PackageIndex,
    pub object_flags: ObjectFlags,
    pub serial_size: i32,
    pub serial_offset: i32,
    pub export_flags: ExportFlags,
    /// Net-addressable objects under this export, one entry per generation.
    pub generation_net_object_counts: Vec<i32>,
    pub package_guid: PackageGuid,
    pub package_flags: PackageFlags,
    pub(crate) object: Option<ObjectHandle>,
}

impl Default for ObjectExport {
    fn default() -> Self {
        Self {
            class_index: PackageIndex::NULL,
            super_index: PackageIndex::NULL,
            outer_index: PackageIndex::NULL,
            object_name: Name::NONE,
            archetype_index: PackageIndex::NULL,
            object_flags: ObjectFlags::empty(),
            serial_size: 0,
            serial_offset: 0,
            export_flags: ExportFlags::empty(),
            generation_net_object_counts: Vec::new(),
            package_guid: PackageGuid::null(),
            package_flags: PackageFlags::empty(),
            object: None,
        }
    }
}

impl ObjectExport {
    pub fn read(ar: &mut dyn ArchiveReader, name_map: &[NameId]) -> Self {
        let class_index = PackageIndex::from_raw(ar.read_i32());
        let super_index = PackageIndex::from_raw(ar.read_i32());
        let outer_index = PackageIndex::from_raw(ar.read_i32());
        let object_name = read_name_ref(ar, name_map);
        let archetype_index = PackageIndex::from_raw(ar.read_i32());
        let object_flags = ObjectFlags::from_bits(ar.read_u64());
        let serial_size = ar.read_i32();
        let serial_offset = ar.read_i32();
        let export_flags = ExportFlags::from_bits(ar.read_u32());
        let generation_net_object_counts = if ar.version().at_least(VER_NET_OBJECT_COUNTS) {
            let count = read_count(ar, 4);
            (0..count).map(|_| ar.read_i32()).collect()
        } else {
            Vec::new()
        };
        let package_guid = PackageGuid::from_bytes(ar.read_guid());
        let package_flags = PackageFlags::from_bits(ar.read_u32());
        Self {
            class_index,
            super_index,
            outer_index,
            object_name,
            archetype_index,
            object_flags,
            serial_size,
            serial_offset,
            export_flags,
            generation_net_object_counts,
            package_guid,
            package_flags,
            object: None,
        }
    }

    pub fn write(&self, ar: &mut dyn ArchiveWriter, names: NameIndexFn<'_>) {
        ar.write_i32(self.class_index.raw());
        ar.write_i32(self.super_index.raw());
        ar.write_i32(self.outer_index.raw());
        write_name_ref(ar, names(self.object_name.id), self.object_name.number);
        ar.write_i32(self.archetype_index.raw());
        ar.write_u64(self.object_flags.bits());
        ar.write_i32(self.serial_size);
        ar.write_i32(self.serial_offset);
        ar.write_u32(self.export_flags.bits());
        if ar.version().at_least(VER_NET_OBJECT_COUNTS) {
            ar.write_i32(self.generation_net_object_counts.len() as i32);
            for &count in &self.generation_net_object_counts {
                ar.write_i32(count);
            }
        }
        ar.write_guid(self.package_guid.as_bytes());
        ar.write_u32(self.package_flags.bits());
    }

    /// Object materialized for this export, if any.
    pub fn object(&self) -> Option<ObjectHandle> {
        self.object
    }

    /// Payload span as `(offset, size)`, or `None` when the record is empty
    /// or negative.
    pub fn payload_span(&self) -> Option<(u64, u64)> {
        if self.serial_size <= 0 || self.serial_offset < 0 {
            return None;
        }
        Some((self.serial_offset as u64, self.serial_size as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkl_archive::{MemoryReader, MemoryWriter};
    use pkl_names::reserved;
    use pkl_types::FileVersion;

    fn name_map() -> Vec<NameId> {
        vec![reserved::NONE, reserved::CORE, reserved::CLASS, reserved::PACKAGE]
    }

    fn local(id: NameId) -> i32 {
        name_map().iter().position(|&n| n == id).map_or(-1, |p| p as i32)
    }

    #[test]
    fn import_roundtrip() {
        let import = ObjectImport::new(
            Name::new(reserved::CORE),
            Name::new(reserved::PACKAGE),
            PackageIndex::NULL,
            Name::numbered(reserved::CLASS, 2),
        );
        let mut w = MemoryWriter::new();
        import.write(&mut w, &local);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 28);

        let mut r = MemoryReader::new(bytes);
        let back = ObjectImport::read(&mut r, &name_map());
        assert_eq!(back, import);
        assert_eq!(back.resolution, ImportResolution::Pending);
        assert!(!r.is_error());
    }

    #[test]
    fn export_roundtrip_with_net_counts() {
        let export = ObjectExport {
            class_index: PackageIndex::from_import(0),
            outer_index: PackageIndex::from_export(0),
            object_name: Name::new(reserved::PACKAGE),
            object_flags: ObjectFlags::PUBLIC | ObjectFlags::STANDALONE,
            serial_size: 12,
            serial_offset: 400,
            generation_net_object_counts: vec![1, 3],
            package_guid: PackageGuid::new(),
            ..ObjectExport::default()
        };
        let mut w = MemoryWriter::new();
        export.write(&mut w, &local);
        let mut r = MemoryReader::new(w.into_bytes());
        let back = ObjectExport::read(&mut r, &name_map());
        assert_eq!(back, export);
        assert_eq!(back.payload_span(), Some((400, 12)));
        assert!(r.at_end());
    }

    #[test]
    fn old_format_export_has_no_net_counts() {
        let export = ObjectExport {
            object_name: Name::new(reserved::CORE),
            generation_net_object_counts: vec![5],
            ..ObjectExport::default()
        };
        let old = FileVersion::new(pkl_types::VER_MIN_SUPPORTED, 0);
        let mut w = MemoryWriter::new();
        w.set_version(old);
        export.write(&mut w, &local);
        let mut r = MemoryReader::new(w.into_bytes());
        r.set_version(old);
        let back = ObjectExport::read(&mut r, &name_map());
        assert!(back.generation_net_object_counts.is_empty());
        assert!(r.at_end());
    }

    #[test]
    fn name_ref_out_of_range_sets_error() {
        let mut w = MemoryWriter::new();
        write_name_ref(&mut w, 9, 0);
        let mut r = MemoryReader::new(w.into_bytes());
        assert_eq!(read_name_ref(&mut r, &name_map()), Name::NONE);
        assert!(r.is_error());
    }

    #[test]
    fn empty_payload_has_no_span() {
        assert_eq!(ObjectExport::default().payload_span(), None);
    }
}
