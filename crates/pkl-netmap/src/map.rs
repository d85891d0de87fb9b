//! Connection-wide numbering of package exports and names.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use pkl_linker::{Generation, ImportResolution, LinkerContext, LoaderId, ObjectHandle, PackageLoader};
use pkl_names::NameId;
use pkl_types::PackageGuid;

use crate::class_cache::{ClassNetCache, ReplicationLayout, StaticLayout};
use crate::error::{NetMapError, NetMapResult};
use crate::manifest::PackageManifestEntry;

/// One source package and the blocks of net index space it owns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageMapEntry {
    pub loader: LoaderId,
    pub package: String,
    pub guid: PackageGuid,
    pub generation: u32,
    /// Counts visible through the local loader.
    pub local: Generation,
    /// Counts the peer reported, if it did.
    pub remote: Option<Generation>,
    pub object_base: u32,
    pub object_count: u32,
    pub name_base: u32,
    pub name_count: u32,
}

impl PackageMapEntry {
    fn new(loader: &PackageLoader) -> Self {
        Self {
            loader: loader.id(),
            package: loader.name().to_string(),
            guid: loader.guid(),
            generation: loader.summary().generations.len() as u32,
            local: local_generation(loader),
            remote: None,
            object_base: 0,
            object_count: 0,
            name_base: 0,
            name_count: 0,
        }
    }

    fn contains_object(&self, index: u32) -> bool {
        index >= self.object_base && index - self.object_base < self.object_count
    }
}

fn local_generation(loader: &PackageLoader) -> Generation {
    let exports = loader.visible_export_count() as i32;
    Generation {
        export_count: exports,
        name_count: loader.visible_name_count() as i32,
        net_object_count: loader.summary().latest_generation().net_object_count.min(exports),
    }
}

fn block_size(local: i32, remote: Option<i32>) -> u32 {
    let size = remote.map_or(local, |r| local.min(r));
    size.max(0) as u32
}

/// Maps loader-local exports and names onto flat indices shared by both
/// ends of a connection.
///
/// Sources are added with [`add_source`](Self::add_source) and then
/// [`compute`](Self::compute) lays out one contiguous object block and one
/// name block per source, in insertion order. Index conversion is only
/// meaningful after `compute`.
pub struct PackageMap {
    entries: Vec<PackageMapEntry>,
    by_loader: HashMap<LoaderId, usize>,
    remote: HashMap<PackageGuid, Generation>,
    names: Vec<NameId>,
    name_indices: HashMap<NameId, u32>,
    object_total: u32,
    computed: bool,
    layout: Arc<dyn ReplicationLayout>,
    class_caches: HashMap<ObjectHandle, Arc<ClassNetCache>>,
}

impl PackageMap {
    pub fn new(layout: Arc<dyn ReplicationLayout>) -> Self {
        Self {
            entries: Vec::new(),
            by_loader: HashMap::new(),
            remote: HashMap::new(),
            names: Vec::new(),
            name_indices: HashMap::new(),
            object_total: 0,
            computed: false,
            layout,
            class_caches: HashMap::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Sources
    // -----------------------------------------------------------------------

    /// Append loader `id`, then every package it imports at top level that
    /// resolved to another loader. Sources already present are skipped.
    pub fn add_source(&mut self, ctx: &LinkerContext, id: LoaderId) -> NetMapResult<()> {
        if self.by_loader.contains_key(&id) {
            return Ok(());
        }
        let loader = ctx.loader(id)?;
        self.by_loader.insert(id, self.entries.len());
        self.entries.push(PackageMapEntry::new(loader));
        self.computed = false;
        tracing::debug!(package = %loader.name(), loader = %id, "net source added");

        let providers: Vec<LoaderId> = loader
            .imports()
            .iter()
            .filter(|import| import.outer_index.is_null())
            .filter_map(|import| match import.resolution {
                ImportResolution::Package { loader } => Some(loader),
                _ => None,
            })
            .collect();
        for provider in providers {
            if let Err(e) = self.add_source(ctx, provider) {
                tracing::warn!(package = %loader.name(), provider = %provider, error = %e, "imported package skipped");
            }
        }
        Ok(())
    }

    pub fn entries(&self) -> &[PackageMapEntry] {
        &self.entries
    }

    pub fn entry(&self, id: LoaderId) -> Option<&PackageMapEntry> {
        self.by_loader.get(&id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, id: LoaderId) -> bool {
        self.by_loader.contains_key(&id)
    }

    // -----------------------------------------------------------------------
    // Layout
    // -----------------------------------------------------------------------

    /// Assign every source its object and name blocks.
    ///
    /// A block holds the local count, or the peer's count for that package
    /// when the peer reported a smaller one.
    pub fn compute(&mut self, ctx: &LinkerContext) -> NetMapResult<()> {
        let mut object_base = 0u32;
        let mut name_base = 0u32;
        self.computed = false;
        self.names.clear();
        self.name_indices.clear();

        for entry in &mut self.entries {
            let loader = ctx.loader(entry.loader)?;
            entry.local = local_generation(loader);
            entry.remote = self.remote.get(&entry.guid).copied();

            let objects = block_size(entry.local.export_count, entry.remote.map(|r| r.export_count));
            let names = block_size(entry.local.name_count, entry.remote.map(|r| r.name_count));
            entry.object_base = object_base;
            entry.object_count = objects;
            entry.name_base = name_base;
            entry.name_count = names;

            let visible = loader.visible_name_map();
            for (i, &name) in visible.iter().take(names as usize).enumerate() {
                self.names.push(name);
                self.name_indices.entry(name).or_insert(name_base + i as u32);
            }
            // Keep the name block dense even if the map is shorter.
            entry.name_count = names.min(visible.len() as u32);

            object_base += objects;
            name_base += entry.name_count;
            if entry.remote.is_some_and(|r| r.export_count < entry.local.export_count) {
                tracing::debug!(
                    package = %entry.package,
                    local = entry.local.export_count,
                    remote = objects,
                    "object block clamped to remote generation"
                );
            }
        }

        self.object_total = object_base;
        self.computed = true;
        tracing::debug!(sources = self.entries.len(), objects = object_base, names = name_base, "package map computed");
        Ok(())
    }

    pub fn is_computed(&self) -> bool {
        self.computed
    }

    /// Total object indices handed out by the last `compute`.
    pub fn object_count(&self) -> u32 {
        self.object_total
    }

    pub fn name_count(&self) -> u32 {
        self.names.len() as u32
    }

    // -----------------------------------------------------------------------
    // Index conversion
    // -----------------------------------------------------------------------

    /// Net index of an object loaded from one of the sources. Objects with
    /// no loader, or outside the shared prefix, have none.
    pub fn object_to_index(&self, ctx: &LinkerContext, object: ObjectHandle) -> Option<u32> {
        if !self.computed {
            return None;
        }
        let slot = ctx.objects().get(object)?.linker?;
        let entry = self.entry(slot.loader)?;
        let export = u32::try_from(slot.export).ok()?;
        (export < entry.object_count).then(|| entry.object_base + export)
    }

    /// Object for net `index`, created and preloaded on demand.
    pub fn index_to_object(&self, ctx: &mut LinkerContext, index: u32) -> NetMapResult<Option<ObjectHandle>> {
        if !self.computed {
            return Err(NetMapError::NotComputed);
        }
        let entry = self
            .entries
            .iter()
            .find(|e| e.contains_object(index))
            .ok_or(NetMapError::IndexOutOfRange {
                index,
                max: self.object_total,
            })?;
        let export = (index - entry.object_base) as usize;

        ctx.begin_load();
        let created = ctx.create_export(entry.loader, export);
        let flushed = ctx.end_load();
        let object = created?;
        flushed?;
        Ok(object)
    }

    pub fn name_to_index(&self, name: NameId) -> Option<u32> {
        self.name_indices.get(&name).copied()
    }

    pub fn index_to_name(&self, index: u32) -> Option<NameId> {
        self.names.get(index as usize).copied()
    }

    // -----------------------------------------------------------------------
    // Generation negotiation
    // -----------------------------------------------------------------------

    /// Counts of every source's newest generation, for the peer.
    pub fn manifest(&self) -> Vec<PackageManifestEntry> {
        self.entries
            .iter()
            .map(|e| PackageManifestEntry {
                name: e.package.clone(),
                guid: e.guid,
                generation: e.generation,
                export_count: e.local.export_count,
                name_count: e.local.name_count,
                net_object_count: e.local.net_object_count,
            })
            .collect()
    }

    /// Record the peer's counts, keyed by package guid. Returns how many
    /// entries matched a source. Takes effect at the next `compute`.
    pub fn apply_remote_manifest(&mut self, manifest: &[PackageManifestEntry]) -> usize {
        let mut matched = 0;
        for remote in manifest {
            if self.entries.iter().any(|e| e.guid == remote.guid) {
                matched += 1;
            } else {
                tracing::debug!(package = %remote.name, guid = %remote.guid, "peer package has no local source");
            }
            self.remote.insert(remote.guid, remote.counts());
        }
        self.computed = false;
        matched
    }

    // -----------------------------------------------------------------------
    // Class caches
    // -----------------------------------------------------------------------

    /// Replicated field cache of `class`, built on first request. The same
    /// cache is returned for the life of the map.
    pub fn class_cache(&mut self, ctx: &LinkerContext, class: ObjectHandle) -> NetMapResult<Arc<ClassNetCache>> {
        let mut visiting = Vec::new();
        self.build_class_cache(ctx, class, &mut visiting)
    }

    fn build_class_cache(
        &mut self,
        ctx: &LinkerContext,
        class: ObjectHandle,
        visiting: &mut Vec<ObjectHandle>,
    ) -> NetMapResult<Arc<ClassNetCache>> {
        if let Some(cache) = self.class_caches.get(&class) {
            return Ok(cache.clone());
        }
        if visiting.contains(&class) {
            return Err(NetMapError::CyclicClass(class));
        }
        let object = ctx.objects().get(class).ok_or(NetMapError::UnknownClass(class))?;
        visiting.push(class);
        let super_cache = match object.super_struct {
            Some(sup) => Some(self.build_class_cache(ctx, sup, visiting)?),
            None => None,
        };
        visiting.pop();

        let declared = self.layout.declared_fields(ctx, class);
        let cache = Arc::new(ClassNetCache::build(class, super_cache, declared));
        tracing::debug!(class = %ctx.object_path(class), fields = cache.len(), "class net cache built");
        self.class_caches.insert(class, cache.clone());
        Ok(cache)
    }
}

impl Default for PackageMap {
    fn default() -> Self {
        Self::new(Arc::new(StaticLayout::new()))
    }
}

impl fmt::Debug for PackageMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageMap")
            .field("entries", &self.entries)
            .field("objects", &self.object_total)
            .field("names", &self.names.len())
            .field("computed", &self.computed)
            .field("class_caches", &self.class_caches.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use pkl_archive::MemoryFileSystem;
    use pkl_linker::{LinkerConfig, LoadOptions, SaveOptions};
    use pkl_names::{reserved, NameTable};
    use pkl_types::ObjectFlags;

    use crate::class_cache::ReplicatedField;

    fn context(fs: &Arc<MemoryFileSystem>) -> LinkerContext {
        LinkerContext::new(Arc::new(NameTable::new()), fs.clone(), LinkerConfig::default())
    }

    /// `Level.Thing` importing `Props.Crate`; `Props` also holds `Barrel`.
    fn seed(fs: &Arc<MemoryFileSystem>) {
        let mut ctx = context(fs);
        let class = ctx.intrinsics().object;
        let props = ctx.create_package("Props").unwrap();
        let crate_ = ctx.create_object(class, props, "Crate", ObjectFlags::PUBLIC).unwrap();
        ctx.create_object(class, props, "Barrel", ObjectFlags::PUBLIC).unwrap();
        let level = ctx.create_package("Level").unwrap();
        let thing = ctx.create_object(class, level, "Thing", ObjectFlags::PUBLIC).unwrap();
        let field = ctx.name("Target").unwrap();
        ctx.objects_mut()
            .get_mut(thing)
            .unwrap()
            .fields
            .set_property(field, pkl_linker::PropertyValue::Object(Some(crate_)));
        let options = SaveOptions::default();
        ctx.save_package(props, Path::new("./Props.pkg"), &options).unwrap();
        ctx.save_package(level, Path::new("./Level.pkg"), &options).unwrap();
    }

    fn opened() -> (LinkerContext, LoaderId) {
        let fs = Arc::new(MemoryFileSystem::new());
        seed(&fs);
        let mut ctx = context(&fs);
        let level = ctx.open_package("Level", &LoadOptions::default()).unwrap();
        (ctx, level)
    }

    // -----------------------------------------------------------------------
    // Sources and layout
    // -----------------------------------------------------------------------

    #[test]
    fn imported_packages_follow_their_importer() {
        let (ctx, level) = opened();
        let mut map = PackageMap::default();
        map.add_source(&ctx, level).unwrap();
        map.add_source(&ctx, level).unwrap();

        let packages: Vec<_> = map.entries().iter().map(|e| e.package.as_str()).collect();
        assert_eq!(packages, ["Level", "Props"]);
    }

    #[test]
    fn blocks_are_contiguous() {
        let (ctx, level) = opened();
        let mut map = PackageMap::default();
        map.add_source(&ctx, level).unwrap();
        map.compute(&ctx).unwrap();

        let level_entry = &map.entries()[0];
        let props_entry = &map.entries()[1];
        assert_eq!((level_entry.object_base, level_entry.object_count), (0, 1));
        assert_eq!((props_entry.object_base, props_entry.object_count), (1, 2));
        assert_eq!(props_entry.name_base, level_entry.name_count);
        assert_eq!(map.object_count(), 3);
        assert_eq!(map.name_count(), level_entry.name_count + props_entry.name_count);
    }

    #[test]
    fn object_index_roundtrip() {
        let (mut ctx, level) = opened();
        let mut map = PackageMap::default();
        map.add_source(&ctx, level).unwrap();
        map.compute(&ctx).unwrap();

        for index in 0..map.object_count() {
            let object = map.index_to_object(&mut ctx, index).unwrap().unwrap();
            assert_eq!(map.object_to_index(&ctx, object), Some(index));
        }
        let barrel = map.index_to_object(&mut ctx, 2).unwrap().unwrap();
        assert_eq!(ctx.object_path(barrel), "Props.Barrel");
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let (mut ctx, level) = opened();
        let mut map = PackageMap::default();
        map.add_source(&ctx, level).unwrap();
        assert!(matches!(map.index_to_object(&mut ctx, 0), Err(NetMapError::NotComputed)));

        map.compute(&ctx).unwrap();
        let err = map.index_to_object(&mut ctx, 3).unwrap_err();
        assert!(matches!(err, NetMapError::IndexOutOfRange { index: 3, max: 3 }));
    }

    #[test]
    fn objects_without_a_loader_have_no_index() {
        let (mut ctx, level) = opened();
        let mut map = PackageMap::default();
        map.add_source(&ctx, level).unwrap();
        map.compute(&ctx).unwrap();
        let scratch = ctx.create_package("Scratch").unwrap();
        assert_eq!(map.object_to_index(&ctx, scratch), None);
    }

    #[test]
    fn names_are_numbered_first_occurrence() {
        let (ctx, level) = opened();
        let mut map = PackageMap::default();
        map.add_source(&ctx, level).unwrap();
        map.compute(&ctx).unwrap();

        assert_eq!(map.name_to_index(reserved::NONE), Some(0));
        let barrel = ctx.names().find("Barrel").unwrap();
        let index = map.name_to_index(barrel).unwrap();
        assert!(index >= map.entries()[1].name_base);
        assert_eq!(map.index_to_name(index), Some(barrel));
    }

    // -----------------------------------------------------------------------
    // Generation negotiation
    // -----------------------------------------------------------------------

    #[test]
    fn smaller_remote_generation_clamps_blocks() {
        let (mut ctx, level) = opened();
        let mut map = PackageMap::default();
        map.add_source(&ctx, level).unwrap();
        map.compute(&ctx).unwrap();

        let mut remote = map.manifest();
        assert_eq!(remote[1].export_count, 2);
        remote[1].export_count = 1;
        remote[1].name_count = 3;
        let bytes = crate::encode_manifest(&remote).unwrap();
        let remote = crate::decode_manifest(&bytes).unwrap();

        assert_eq!(map.apply_remote_manifest(&remote), 2);
        assert!(!map.is_computed());
        map.compute(&ctx).unwrap();

        let props = &map.entries()[1];
        assert_eq!(props.object_count, 1);
        assert_eq!(props.name_count, 3);
        assert_eq!(props.remote.map(|r| r.export_count), Some(1));
        assert_eq!(map.object_count(), 2);
        assert!(map.index_to_object(&mut ctx, 2).is_err());
    }

    #[test]
    fn larger_remote_generation_keeps_local_counts() {
        let (ctx, level) = opened();
        let mut map = PackageMap::default();
        map.add_source(&ctx, level).unwrap();
        let mut remote = map.manifest();
        remote[0].export_count = 50;
        map.apply_remote_manifest(&remote);
        map.compute(&ctx).unwrap();
        assert_eq!(map.entries()[0].object_count, 1);
    }

    #[test]
    fn unknown_remote_packages_do_not_match() {
        let (ctx, level) = opened();
        let mut map = PackageMap::default();
        map.add_source(&ctx, level).unwrap();
        let stranger = PackageManifestEntry {
            name: "Elsewhere".into(),
            guid: PackageGuid::new(),
            generation: 1,
            export_count: 1,
            name_count: 1,
            net_object_count: 1,
        };
        assert_eq!(map.apply_remote_manifest(&[stranger]), 0);
    }

    // -----------------------------------------------------------------------
    // Class caches
    // -----------------------------------------------------------------------

    #[test]
    fn class_cache_is_built_once() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut ctx = context(&fs);
        let game = ctx.create_package("Game").unwrap();
        let pawn = ctx.create_class(game, "Pawn", None).unwrap();
        let hero = ctx.create_class(game, "Hero", Some(pawn)).unwrap();

        let layout = StaticLayout::new()
            .with("Pawn", vec![ReplicatedField::new("Location"), ReplicatedField::new("Health").when("bOwner")])
            .with("Hero", vec![ReplicatedField::new("Mana").when("bOwner")]);
        let mut map = PackageMap::new(Arc::new(layout));

        let first = map.class_cache(&ctx, hero).unwrap();
        let again = map.class_cache(&ctx, hero).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(first.field_index("Mana"), Some(2));
        assert_eq!(first.groups()[0].fields, vec![1, 2]);

        let base = map.class_cache(&ctx, pawn).unwrap();
        assert!(Arc::ptr_eq(first.super_cache().unwrap(), &base));
    }

    #[test]
    fn unknown_class_is_an_error() {
        let fs = Arc::new(MemoryFileSystem::new());
        let ctx = context(&fs);
        let mut map = PackageMap::default();
        let missing = ObjectHandle::from_index(9_999);
        assert!(matches!(map.class_cache(&ctx, missing), Err(NetMapError::UnknownClass(_))));
    }
}
