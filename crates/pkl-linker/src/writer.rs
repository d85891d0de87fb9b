//! Package writer.
//!
//! Saving numbers everything reachable from a package densely: objects
//! inside the package become exports `1..=N`, objects outside it become
//! imports, and every name used becomes a slot in the local name table. The
//! same signed-index convention the loader reads is used for every
//! reference.

use std::collections::HashMap;
use std::path::Path;

use pkl_archive::{Archive, ArchiveState, ArchiveWriter, BulkData, MemoryWriter};
use pkl_names::{reserved, Name, NameId};
use pkl_types::{FileVersion, ObjectFlags, PackageGuid, PackageIndex, VER_CURRENT};

use crate::codec::FieldWriter;
use crate::compression::{self, COMPRESS_NONE, COMPRESS_ZSTD};
use crate::config::SaveOptions;
use crate::context::LinkerContext;
use crate::error::{LinkError, LinkResult};
use crate::object::{Object, ObjectHandle};
use crate::summary::{CompressedChunk, Generation, PackageSummary};
use crate::table::{write_name_ref, ObjectExport, ObjectImport};

/// Dense numbering of one save.
#[derive(Debug, Default)]
struct SaveTables {
    package: Option<ObjectHandle>,
    exports: Vec<ObjectHandle>,
    export_index: HashMap<ObjectHandle, usize>,
    imports: Vec<ObjectImport>,
    import_index: HashMap<ObjectHandle, usize>,
    names: Vec<NameId>,
    name_index: HashMap<NameId, i32>,
}

impl SaveTables {
    fn add_name(&mut self, id: NameId) {
        if !self.name_index.contains_key(&id) {
            self.name_index.insert(id, self.names.len() as i32);
            self.names.push(id);
        }
    }

    fn name_slot(&self, id: NameId) -> i32 {
        self.name_index.get(&id).copied().unwrap_or(0)
    }

    fn index_of(&self, object: Option<ObjectHandle>) -> PackageIndex {
        let Some(object) = object else {
            return PackageIndex::NULL;
        };
        if Some(object) == self.package {
            return PackageIndex::NULL;
        }
        if let Some(&i) = self.export_index.get(&object) {
            return PackageIndex::from_export(i);
        }
        if let Some(&i) = self.import_index.get(&object) {
            return PackageIndex::from_import(i);
        }
        PackageIndex::NULL
    }
}

/// Gathers the names and object references a codec emits, discarding bytes.
struct ReferenceCollector {
    sink: MemoryWriter,
    names: Vec<Name>,
    objects: Vec<ObjectHandle>,
}

impl ReferenceCollector {
    fn new() -> Self {
        Self {
            sink: MemoryWriter::with_state(ArchiveState::saving().transient()),
            names: Vec::new(),
            objects: Vec::new(),
        }
    }
}

impl FieldWriter for ReferenceCollector {
    fn archive(&mut self) -> &mut dyn ArchiveWriter {
        &mut self.sink
    }

    fn write_name(&mut self, name: Name) {
        self.names.push(name);
        self.sink.write_i64(0);
    }

    fn write_object(&mut self, object: Option<ObjectHandle>) {
        self.objects.extend(object);
        self.sink.write_i32(0);
    }

    fn write_bulk(&mut self, bulk: &BulkData) -> LinkResult<()> {
        Ok(bulk.write(&mut self.sink)?)
    }
}

/// Writes payloads against finished tables.
struct PayloadWriter<'a> {
    ar: &'a mut MemoryWriter,
    tables: &'a SaveTables,
}

impl FieldWriter for PayloadWriter<'_> {
    fn archive(&mut self) -> &mut dyn ArchiveWriter {
        &mut *self.ar
    }

    fn write_name(&mut self, name: Name) {
        write_name_ref(&mut *self.ar, self.tables.name_slot(name.id), name.number);
    }

    fn write_object(&mut self, object: Option<ObjectHandle>) {
        self.ar.write_i32(self.tables.index_of(object).raw());
    }

    fn write_bulk(&mut self, bulk: &BulkData) -> LinkResult<()> {
        Ok(bulk.write(&mut *self.ar)?)
    }
}

/// One save of one package.
pub struct PackageWriter<'a> {
    ctx: &'a LinkerContext,
    tables: SaveTables,
    records: Vec<ObjectExport>,
}

impl<'a> PackageWriter<'a> {
    /// Number every export, import and name reachable from `package`.
    pub fn new(ctx: &'a LinkerContext, package: ObjectHandle) -> LinkResult<Self> {
        ctx.objects.get(package).ok_or(LinkError::InvalidObject(package))?;
        let mut writer = Self {
            ctx,
            tables: SaveTables {
                package: Some(package),
                ..SaveTables::default()
            },
            records: Vec::new(),
        };
        writer.tables.add_name(reserved::NONE);
        writer.seed_from_loader(package);
        writer.collect_exports(package);
        writer.collect_references()?;
        writer.build_records();
        tracing::debug!(
            package = %ctx.object_path(package),
            exports = writer.tables.exports.len(),
            imports = writer.tables.imports.len(),
            names = writer.tables.names.len(),
            "save tables built"
        );
        Ok(writer)
    }

    pub fn export_count(&self) -> usize {
        self.tables.exports.len()
    }

    pub fn import_count(&self) -> usize {
        self.tables.imports.len()
    }

    pub fn name_count(&self) -> usize {
        self.tables.names.len()
    }

    /// Objects in export order.
    pub fn exports(&self) -> &[ObjectHandle] {
        &self.tables.exports
    }

    pub fn imports(&self) -> &[ObjectImport] {
        &self.tables.imports
    }

    fn object(&self, handle: ObjectHandle) -> LinkResult<&'a Object> {
        self.ctx.objects.get(handle).ok_or(LinkError::InvalidObject(handle))
    }

    /// Keep the numbering of the file the package was loaded from, so each
    /// save extends the previous generation instead of reshuffling it.
    fn seed_from_loader(&mut self, package: ObjectHandle) {
        let ctx = self.ctx;
        let Some(loader) = ctx
            .objects
            .get(package)
            .and_then(|p| ctx.by_package.get(&p.name))
            .and_then(|&id| ctx.loader(id).ok())
            .filter(|l| l.package == package)
        else {
            return;
        };
        for &id in &loader.name_map {
            self.tables.add_name(id);
        }
        for handle in loader.exports.iter().filter_map(|e| e.object) {
            if self.is_saved(handle, package) {
                self.push_export(handle);
            }
        }
    }

    fn is_saved(&self, handle: ObjectHandle, package: ObjectHandle) -> bool {
        self.ctx.objects.is_in(handle, package)
            && self.ctx.objects.get(handle).is_some_and(|o| {
                !o.flags
                    .intersects(ObjectFlags::TRANSIENT | ObjectFlags::CLASS_DEFAULT)
            })
    }

    fn push_export(&mut self, handle: ObjectHandle) {
        if self.tables.export_index.contains_key(&handle) {
            return;
        }
        if let Some(object) = self.ctx.objects.get(handle) {
            self.tables.export_index.insert(handle, self.tables.exports.len());
            self.tables.exports.push(handle);
            self.tables.add_name(object.name.id);
        }
    }

    /// Preorder walk of the package's subtree, so outers precede inners.
    fn collect_exports(&mut self, package: ObjectHandle) {
        let ctx = self.ctx;
        let objects = &ctx.objects;
        let mut stack: Vec<ObjectHandle> = objects.children(Some(package)).iter().rev().copied().collect();
        while let Some(handle) = stack.pop() {
            if !self.is_saved(handle, package) {
                continue;
            }
            self.push_export(handle);
            stack.extend(objects.children(Some(handle)).iter().rev());
        }
    }

    fn collect_references(&mut self) -> LinkResult<()> {
        let intrinsic_class = self.ctx.intrinsics.class;
        for i in 0..self.tables.exports.len() {
            let handle = self.tables.exports[i];
            let object = self.object(handle)?;
            let mut refs = Vec::new();
            refs.extend(object.class.filter(|&c| c != intrinsic_class));
            refs.extend(object.super_struct);
            refs.extend(object.archetype.filter(|&a| !self.is_class_default(a)));

            let mut collector = ReferenceCollector::new();
            self.ctx
                .codec_for(object.class)
                .save(object, &mut collector)?;
            for name in &collector.names {
                self.tables.add_name(name.id);
            }
            refs.extend(collector.objects);

            for reference in refs {
                self.add_reference(reference)?;
            }
        }
        Ok(())
    }

    fn is_class_default(&self, handle: ObjectHandle) -> bool {
        self.ctx
            .objects
            .get(handle)
            .is_some_and(|o| o.flags.contains(ObjectFlags::CLASS_DEFAULT))
    }

    fn add_reference(&mut self, handle: ObjectHandle) -> LinkResult<()> {
        if Some(handle) == self.tables.package || self.tables.export_index.contains_key(&handle) {
            return Ok(());
        }
        let Some(package) = self.tables.package else {
            return Ok(());
        };
        if self.ctx.objects.is_in(handle, package) {
            tracing::warn!(
                object = %self.ctx.object_path(handle),
                "reference to an object that is not saved; writing null"
            );
            return Ok(());
        }
        self.add_import(handle).map(|_| ())
    }

    /// Append an import for `handle`, outers first.
    fn add_import(&mut self, handle: ObjectHandle) -> LinkResult<usize> {
        if let Some(&i) = self.tables.import_index.get(&handle) {
            return Ok(i);
        }
        let object = self.object(handle)?;
        let outer_index = match object.outer {
            Some(outer) => PackageIndex::from_import(self.add_import(outer)?),
            None => PackageIndex::NULL,
        };

        let (class_package, class_name) = match object.class {
            Some(class) => {
                let class_name = self.object(class)?.name;
                let top = self.ctx.objects.outermost(class);
                (self.object(top)?.name, class_name)
            }
            None => (Name::new(reserved::CORE), Name::new(reserved::CLASS)),
        };
        for name in [class_package, class_name, object.name] {
            self.tables.add_name(name.id);
        }

        let index = self.tables.imports.len();
        self.tables
            .imports
            .push(ObjectImport::new(class_package, class_name, outer_index, object.name));
        self.tables.import_index.insert(handle, index);
        Ok(index)
    }

    /// Export records with every field but the payload span filled in.
    fn build_records(&mut self) {
        let ctx = self.ctx;
        let intrinsic_class = ctx.intrinsics.class;
        let records = self
            .tables
            .exports
            .iter()
            .filter_map(|&handle| {
                let object = ctx.objects.get(handle)?;
                let previous = object
                    .linker
                    .and_then(|slot| Some((ctx.loader(slot.loader).ok()?, slot.export)))
                    .filter(|(loader, _)| Some(loader.package) == self.tables.package)
                    .and_then(|(loader, export)| loader.exports.get(export));

                let mut counts = previous
                    .map(|p| p.generation_net_object_counts.clone())
                    .unwrap_or_default();
                counts.push(self.net_object_count(handle));

                let class_index = match object.class {
                    Some(class) if class == intrinsic_class => PackageIndex::NULL,
                    class => self.tables.index_of(class),
                };
                let archetype_index = match object.archetype {
                    Some(a) if self.is_class_default(a) => PackageIndex::NULL,
                    archetype => self.tables.index_of(archetype),
                };
                Some(ObjectExport {
                    class_index,
                    super_index: self.tables.index_of(object.super_struct),
                    outer_index: self.tables.index_of(object.outer),
                    object_name: object.name,
                    archetype_index,
                    object_flags: object.flags.without(ObjectFlags::RUNTIME_MASK),
                    export_flags: previous.map(|p| p.export_flags).unwrap_or_default(),
                    generation_net_object_counts: counts,
                    package_guid: object.guid,
                    package_flags: object.package_flags,
                    ..ObjectExport::default()
                })
            })
            .collect();
        self.records = records;
    }

    /// The export itself plus every saved object below it.
    fn net_object_count(&self, handle: ObjectHandle) -> i32 {
        let below = self
            .tables
            .exports
            .iter()
            .filter(|&&e| e != handle && self.ctx.objects.is_in(e, handle))
            .count();
        1 + below as i32
    }

    fn build_summary(&self, options: &SaveOptions) -> PackageSummary {
        let package = self.tables.package.and_then(|p| self.ctx.objects.get(p));
        let loaded = package
            .and_then(|p| self.ctx.by_package.get(&p.name))
            .and_then(|&id| self.ctx.loader(id).ok())
            .filter(|l| Some(l.package) == self.tables.package)
            .map(|l| &l.summary);

        let guid = options
            .guid
            .or_else(|| loaded.map(|s| s.guid).filter(|g| !g.is_null()))
            .or_else(|| package.map(|p| p.guid).filter(|g| !g.is_null()))
            .unwrap_or_else(PackageGuid::new);

        let export_count = self.tables.exports.len() as i32;
        let mut generations = loaded.map(|s| s.generations.clone()).unwrap_or_default();
        generations.push(Generation {
            export_count,
            name_count: self.tables.names.len() as i32,
            net_object_count: export_count,
        });

        let mut package_flags = options.package_flags;
        if let Some(package) = package {
            package_flags |= package.package_flags;
        }

        PackageSummary {
            version: FileVersion::new(VER_CURRENT, options.licensee_version),
            folder_name: options.folder_name.clone(),
            package_flags,
            name_count: self.tables.names.len() as i32,
            export_count,
            import_count: self.tables.imports.len() as i32,
            guid,
            generations,
            engine_version: options.engine_version,
            cooked_content_version: options.cooked_content_version,
            ..PackageSummary::default()
        }
    }

    /// Serialize the whole file.
    pub fn write(mut self, options: &SaveOptions) -> LinkResult<(Vec<u8>, PackageSummary)> {
        let mut summary = self.build_summary(options);
        let (image, summary_end) = self.write_image(&mut summary, 0)?;
        if !options.compress {
            return Ok((image, summary));
        }

        let chunk_size = self.ctx.config.compression_chunk_size;
        let body_len = image.len() - summary_end as usize;
        let reserved = compression::chunk_count(body_len, chunk_size);
        let (image, summary_end) = self.write_image(&mut summary, reserved)?;

        let (compressed, chunks) =
            compression::compress_body(&image[summary_end as usize..], summary_end, chunk_size)?;
        if chunks.len() != reserved {
            return Err(LinkError::Compression(format!(
                "expected {reserved} chunks, produced {}",
                chunks.len()
            )));
        }
        summary.compression_flags = COMPRESS_ZSTD;
        summary.compressed_chunks = chunks;

        let mut header = MemoryWriter::new();
        summary.write(&mut header);
        if header.tell() != summary_end {
            return Err(LinkError::Compression("summary size changed after compression".into()));
        }
        let mut file = header.into_bytes();
        file.extend_from_slice(&compressed);
        tracing::debug!(
            uncompressed = image.len(),
            compressed = file.len(),
            "package compressed"
        );
        Ok((file, summary))
    }

    /// Lay out summary, tables and payloads. `reserved_chunks` placeholder
    /// chunk entries are written so the summary has its final size.
    fn write_image(&mut self, summary: &mut PackageSummary, reserved_chunks: usize) -> LinkResult<(Vec<u8>, u64)> {
        summary.compression_flags = COMPRESS_NONE;
        summary.compressed_chunks = vec![CompressedChunk::default(); reserved_chunks];
        let mut w = MemoryWriter::new();
        summary.write(&mut w);
        let summary_end = w.tell();

        let names = &self.ctx.names;
        summary.name_offset = w.tell() as i32;
        for &id in &self.tables.names {
            w.write_string(&names.text_or_invalid(id));
            w.write_u64(names.flags(id).unwrap_or(0));
        }

        let tables = &self.tables;
        let slot = |id: NameId| tables.name_slot(id);
        summary.import_offset = w.tell() as i32;
        for import in &tables.imports {
            import.write(&mut w, &slot);
        }

        summary.export_offset = w.tell() as i32;
        for record in &self.records {
            record.write(&mut w, &slot);
        }

        summary.depends_offset = w.tell() as i32;
        for record in &self.records {
            let depends: Vec<PackageIndex> = [
                record.class_index,
                record.super_index,
                record.outer_index,
                record.archetype_index,
            ]
            .into_iter()
            .filter(|i| !i.is_null())
            .collect();
            w.write_i32(depends.len() as i32);
            for index in depends {
                w.write_i32(index.raw());
            }
        }

        summary.header_size = w.tell() as i32;
        for (i, &handle) in tables.exports.iter().enumerate() {
            let object = self.ctx.objects.get(handle).ok_or(LinkError::InvalidObject(handle))?;
            let offset = w.tell();
            {
                let mut payload = PayloadWriter { ar: &mut w, tables };
                self.ctx
                    .codec_for(object.class)
                    .save(object, &mut payload)
                    .map_err(|e| e.context(format!("saving {}", self.ctx.object_path(handle))))?;
            }
            self.records[i].serial_offset = offset as i32;
            self.records[i].serial_size = (w.tell() - offset) as i32;
        }
        let end = w.tell();

        w.seek(summary.export_offset as u64);
        for record in &self.records {
            record.write(&mut w, &slot);
        }
        w.seek(0);
        summary.write(&mut w);
        if w.tell() != summary_end {
            return Err(LinkError::CorruptTable {
                package: summary.folder_name.clone(),
                reason: "summary size changed between passes".into(),
            });
        }
        w.seek(end);
        if w.is_error() {
            return Err(LinkError::CorruptTable {
                package: summary.folder_name.clone(),
                reason: "write failed".into(),
            });
        }
        Ok((w.into_bytes(), summary_end))
    }
}

impl LinkerContext {
    /// Save `package` to `path` through the file system, returning the
    /// summary that was written.
    pub fn save_package(
        &mut self,
        package: ObjectHandle,
        path: &Path,
        options: &SaveOptions,
    ) -> LinkResult<PackageSummary> {
        let (bytes, summary) = self.save_package_to_bytes(package, options)?;
        let mut out = self.fs.open_write(path)?;
        out.write_bytes(&bytes);
        out.finish()?;
        if out.is_error() {
            let short = std::io::Error::other(format!("short write to {}", path.display()));
            return Err(short.into());
        }
        tracing::info!(
            path = %path.display(),
            bytes = bytes.len(),
            exports = summary.export_count,
            "package saved"
        );
        Ok(summary)
    }

    /// Save `package` into memory.
    pub fn save_package_to_bytes(
        &mut self,
        package: ObjectHandle,
        options: &SaveOptions,
    ) -> LinkResult<(Vec<u8>, PackageSummary)> {
        self.prepare_save(package)?;
        PackageWriter::new(self, package)?.write(options)
    }

    /// Materialize everything a save of `package` reads: every export its
    /// own loader still holds, every shell below it, and every deferred bulk
    /// payload.
    fn prepare_save(&mut self, package: ObjectHandle) -> LinkResult<()> {
        let name = self.objects.get(package).ok_or(LinkError::InvalidObject(package))?.name;
        if let Some(&id) = self.by_package.get(&name) {
            if self.loader(id)?.package == package {
                self.load_all_exports(id)?;
            }
        }
        let shells: Vec<ObjectHandle> = self
            .objects
            .handles()
            .filter(|&h| self.objects.is_in(h, package))
            .filter(|&h| self.objects.get(h).is_some_and(Object::needs_load))
            .collect();
        for handle in shells {
            self.preload(handle)?;
        }
        for loader in self.loaders.iter_mut().flatten() {
            if let Some(ar) = loader.archive.as_deref_mut() {
                loader.bulk.force_all(ar)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkerConfig;
    use crate::object::PropertyValue;
    use pkl_archive::{MemoryFileSystem, MemoryReader};
    use std::sync::Arc;

    fn context() -> LinkerContext {
        LinkerContext::new(
            Arc::new(pkl_names::NameTable::new()),
            Arc::new(MemoryFileSystem::new()),
            LinkerConfig::default(),
        )
    }

    // -----------------------------------------------------------------------
    // Numbering
    // -----------------------------------------------------------------------

    #[test]
    fn exports_are_numbered_outer_first() {
        let mut ctx = context();
        let object_class = ctx.intrinsics().object;
        let pkg = ctx.create_package("Level").unwrap();
        let a = ctx.create_object(object_class, pkg, "A", ObjectFlags::PUBLIC).unwrap();
        let b = ctx.create_object(object_class, a, "B", ObjectFlags::PUBLIC).unwrap();
        let c = ctx.create_object(object_class, pkg, "C", ObjectFlags::PUBLIC).unwrap();

        let writer = PackageWriter::new(&ctx, pkg).unwrap();
        assert_eq!(writer.exports(), &[a, b, c]);
        assert_eq!(writer.records[1].outer_index, PackageIndex::from_export(0));
        assert_eq!(writer.records[0].outer_index, PackageIndex::NULL);
        assert_eq!(writer.records[0].generation_net_object_counts, vec![2]);
    }

    #[test]
    fn outside_references_become_imports_outer_first() {
        let mut ctx = context();
        let object_class = ctx.intrinsics().object;
        let pkg = ctx.create_package("Level").unwrap();
        ctx.create_object(object_class, pkg, "Thing", ObjectFlags::PUBLIC).unwrap();

        let writer = PackageWriter::new(&ctx, pkg).unwrap();
        // Core, then Core.Object.
        assert_eq!(writer.import_count(), 2);
        let core = &writer.imports()[0];
        assert_eq!(core.object_name, Name::new(reserved::CORE));
        assert_eq!(core.class_name, Name::new(reserved::PACKAGE));
        assert_eq!(core.outer_index, PackageIndex::NULL);
        let object = &writer.imports()[1];
        assert_eq!(object.outer_index, PackageIndex::from_import(0));
        assert_eq!(object.class_name, Name::new(reserved::CLASS));
        assert_eq!(writer.records[0].class_index, PackageIndex::from_import(1));
    }

    #[test]
    fn transient_and_class_default_objects_are_skipped() {
        let mut ctx = context();
        let object_class = ctx.intrinsics().object;
        let pkg = ctx.create_package("Level").unwrap();
        let class = ctx.create_class(pkg, "Lamp", None).unwrap();
        ctx.class_default_object(class).unwrap();
        ctx.create_object(object_class, pkg, "Scratch", ObjectFlags::TRANSIENT).unwrap();

        let writer = PackageWriter::new(&ctx, pkg).unwrap();
        assert_eq!(writer.exports(), &[class]);
        assert_eq!(writer.records[0].class_index, PackageIndex::NULL);
        assert_eq!(writer.records[0].archetype_index, PackageIndex::NULL);
    }

    #[test]
    fn property_names_enter_the_name_table() {
        let mut ctx = context();
        let object_class = ctx.intrinsics().object;
        let pkg = ctx.create_package("Level").unwrap();
        let thing = ctx.create_object(object_class, pkg, "Thing", ObjectFlags::PUBLIC).unwrap();
        let speed = ctx.name("Speed").unwrap();
        ctx.objects_mut()
            .get_mut(thing)
            .unwrap()
            .fields
            .set_property(speed, PropertyValue::Float(2.5));

        let writer = PackageWriter::new(&ctx, pkg).unwrap();
        assert_eq!(writer.tables.names[0], reserved::NONE);
        assert!(writer.tables.name_index.contains_key(&speed.id));
    }

    // -----------------------------------------------------------------------
    // Layout
    // -----------------------------------------------------------------------

    #[test]
    fn summary_offsets_are_consistent() {
        let mut ctx = context();
        let object_class = ctx.intrinsics().object;
        let pkg = ctx.create_package("Level").unwrap();
        ctx.create_object(object_class, pkg, "Thing", ObjectFlags::PUBLIC).unwrap();

        let (bytes, summary) = ctx.save_package_to_bytes(pkg, &SaveOptions::default()).unwrap();
        assert!(summary.name_offset < summary.import_offset);
        assert!(summary.import_offset < summary.export_offset);
        assert!(summary.export_offset < summary.depends_offset);
        assert!(summary.depends_offset <= summary.header_size);
        assert!((summary.header_size as usize) < bytes.len());
        assert_eq!(summary.generations.len(), 1);

        let mut r = MemoryReader::new(bytes);
        let back = PackageSummary::read(&mut r, "Level").unwrap();
        assert_eq!(back, summary);
    }

    #[test]
    fn existing_guid_is_kept() {
        let mut ctx = context();
        let pkg = ctx.create_package("Level").unwrap();
        let guid = ctx.objects().get(pkg).unwrap().guid;
        let (_, summary) = ctx.save_package_to_bytes(pkg, &SaveOptions::default()).unwrap();
        assert_eq!(summary.guid, guid);

        let forced = PackageGuid::new();
        let options = SaveOptions {
            guid: Some(forced),
            ..SaveOptions::default()
        };
        let (_, summary) = ctx.save_package_to_bytes(pkg, &options).unwrap();
        assert_eq!(summary.guid, forced);
    }

    #[test]
    fn compressed_file_is_smaller_for_repetitive_payloads() {
        let mut ctx = context();
        let object_class = ctx.intrinsics().object;
        let pkg = ctx.create_package("Level").unwrap();
        let blob = ctx.name("Blob").unwrap();
        for i in 0..8 {
            let h = ctx.create_object(object_class, pkg, &format!("Chunk_{i}"), ObjectFlags::PUBLIC).unwrap();
            ctx.objects_mut()
                .get_mut(h)
                .unwrap()
                .fields
                .set_property(blob, PropertyValue::Bytes(vec![0xAB; 4096]));
        }
        let (plain, _) = ctx.save_package_to_bytes(pkg, &SaveOptions::default()).unwrap();
        let (packed, summary) = ctx
            .save_package_to_bytes(pkg, &SaveOptions::default().compressed(true))
            .unwrap();
        assert!(summary.is_compressed());
        assert!(!summary.compressed_chunks.is_empty());
        assert!(packed.len() < plain.len());
    }
}
