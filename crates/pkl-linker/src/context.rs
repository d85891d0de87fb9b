//! Process-scoped linker state.
//!
//! A [`LinkerContext`] owns the object arena, every open [`PackageLoader`]
//! and the codec registry, and is injected wherever loading or saving
//! happens. All operations take `&mut self`; share one across threads as a
//! [`SharedContext`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use pkl_archive::{BulkData, PackageFileSystem};
use pkl_names::{reserved, FindName, Name, NameTable};
use pkl_types::{ExportFlags, ObjectFlags, PackageIndex};

use crate::codec::{CodecRegistry, Serializable};
use crate::config::{LinkerConfig, LoadOptions};
use crate::error::{LinkError, LinkResult};
use crate::loader::{LoaderId, LoaderState, PackageLoader};
use crate::object::{LinkerSlot, ObjectArena, ObjectHandle};
use crate::payload::PayloadReader;
use crate::summary::PackageSummary;
use crate::table::ImportResolution;

/// The single coarse lock around a context shared between threads.
pub type SharedContext = Arc<Mutex<LinkerContext>>;

/// Native objects seeded into every context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Intrinsics {
    /// The `Core` package.
    pub core: ObjectHandle,
    /// `Core.Class`, the class of every type descriptor.
    pub class: ObjectHandle,
    /// `Core.Package`, the class of every package object.
    pub package: ObjectHandle,
    /// `Core.Object`, the root of the class hierarchy.
    pub object: ObjectHandle,
}

#[derive(Debug, Default)]
struct LoadBatch {
    depth: u32,
    create_depth: u32,
    pending: VecDeque<ObjectHandle>,
    post_load: Vec<ObjectHandle>,
}

pub struct LinkerContext {
    pub(crate) names: Arc<NameTable>,
    pub(crate) objects: ObjectArena,
    pub(crate) loaders: Vec<Option<PackageLoader>>,
    pub(crate) by_package: HashMap<Name, LoaderId>,
    pub(crate) codecs: CodecRegistry,
    pub(crate) bound_types: HashMap<ObjectHandle, Arc<dyn Serializable>>,
    pub(crate) defaults: HashMap<ObjectHandle, ObjectHandle>,
    pub(crate) fs: Arc<dyn PackageFileSystem>,
    pub(crate) config: LinkerConfig,
    pub(crate) intrinsics: Intrinsics,
    pub(crate) verifying: HashSet<(LoaderId, usize)>,
    batch: LoadBatch,
}

impl LinkerContext {
    pub fn new(names: Arc<NameTable>, fs: Arc<dyn PackageFileSystem>, config: LinkerConfig) -> Self {
        let mut objects = ObjectArena::new();
        let intrinsics = seed_intrinsics(&mut objects);
        Self {
            names,
            objects,
            loaders: Vec::new(),
            by_package: HashMap::new(),
            codecs: CodecRegistry::new(),
            bound_types: HashMap::new(),
            defaults: HashMap::new(),
            fs,
            config,
            intrinsics,
            verifying: HashSet::new(),
            batch: LoadBatch::default(),
        }
    }

    /// Wrap in the coarse lock.
    pub fn into_shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }

    pub fn names(&self) -> &Arc<NameTable> {
        &self.names
    }

    pub fn objects(&self) -> &ObjectArena {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectArena {
        &mut self.objects
    }

    pub fn config(&self) -> &LinkerConfig {
        &self.config
    }

    pub fn file_system(&self) -> &Arc<dyn PackageFileSystem> {
        &self.fs
    }

    pub fn intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Register a codec for instances of every class named `class_name`.
    pub fn register_codec(&mut self, class_name: &str, codec: Arc<dyn Serializable>) -> LinkResult<()> {
        let id = self.names.add(class_name)?;
        self.codecs.register(id, codec);
        self.bound_types.clear();
        Ok(())
    }

    pub(crate) fn codec_for(&self, class: Option<ObjectHandle>) -> Arc<dyn Serializable> {
        match class.and_then(|c| self.bound_types.get(&c)) {
            Some(codec) => Arc::clone(codec),
            None => self.codecs.resolve(&self.objects, class),
        }
    }

    /// Intern `text`, splitting a trailing `_N` into the name number.
    pub fn name(&self, text: &str) -> LinkResult<Name> {
        Ok(Name::parse(&self.names, text, FindName::Add)?.unwrap_or(Name::NONE))
    }

    pub fn object_path(&self, handle: ObjectHandle) -> String {
        self.objects.path_name(handle, &self.names)
    }

    // -----------------------------------------------------------------------
    // Building graphs in memory
    // -----------------------------------------------------------------------

    /// Find or create the top-level package object `name`.
    pub fn create_package(&mut self, name: &str) -> LinkResult<ObjectHandle> {
        let name = self.name(name)?;
        Ok(find_or_create_package(&mut self.objects, &self.intrinsics, name, None))
    }

    /// Allocate a new object from scratch, seeded from its class default.
    pub fn create_object(
        &mut self,
        class: ObjectHandle,
        outer: ObjectHandle,
        name: &str,
        flags: ObjectFlags,
    ) -> LinkResult<ObjectHandle> {
        let name = self.name(name)?;
        let template = self.class_default_object(class)?;
        let flags = flags.without(ObjectFlags::RUNTIME_MASK);
        Ok(self.objects.allocate(Some(class), Some(outer), name, flags, Some(template)))
    }

    /// Allocate a type descriptor deriving from `super_class`.
    pub fn create_class(
        &mut self,
        outer: ObjectHandle,
        name: &str,
        super_class: Option<ObjectHandle>,
    ) -> LinkResult<ObjectHandle> {
        let name = self.name(name)?;
        let flags = ObjectFlags::PUBLIC | ObjectFlags::STANDALONE;
        let class = self.objects.allocate(Some(self.intrinsics.class), Some(outer), name, flags, None);
        if let Some(object) = self.objects.get_mut(class) {
            object.super_struct = super_class.or(Some(self.intrinsics.object));
        }
        Ok(class)
    }

    /// The `Default__<Class>` object for `class`, created on first use.
    /// Its fields are seeded from the super class's default.
    pub fn class_default_object(&mut self, class: ObjectHandle) -> LinkResult<ObjectHandle> {
        if let Some(&cdo) = self.defaults.get(&class) {
            return Ok(cdo);
        }
        // Walk up to the first class that already has a default.
        let mut chain = vec![class];
        let mut seen = HashSet::from([class]);
        let mut current = self.objects.get(class).ok_or(LinkError::InvalidObject(class))?.super_struct;
        while let Some(sup) = current {
            if self.defaults.contains_key(&sup) || !seen.insert(sup) {
                break;
            }
            chain.push(sup);
            current = self.objects.get(sup).and_then(|o| o.super_struct);
        }

        let mut template = current.and_then(|sup| self.defaults.get(&sup).copied());
        for &c in chain.iter().rev() {
            let object = self.objects.get(c).ok_or(LinkError::InvalidObject(c))?;
            let (outer, class_name) = (object.outer, object.name);
            let text = format!("Default__{}", self.names.text_or_invalid(class_name.id));
            let name = Name {
                id: self.names.add(&text)?,
                number: class_name.number,
            };
            let flags = ObjectFlags::CLASS_DEFAULT | ObjectFlags::PUBLIC;
            let cdo = self.objects.allocate(Some(c), outer, name, flags, template);
            self.defaults.insert(c, cdo);
            template = Some(cdo);
        }
        self.defaults.get(&class).copied().ok_or(LinkError::InvalidObject(class))
    }

    // -----------------------------------------------------------------------
    // Loader registry
    // -----------------------------------------------------------------------

    pub fn loader(&self, id: LoaderId) -> LinkResult<&PackageLoader> {
        self.loaders
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(LinkError::LoaderDetached(id))
    }

    pub(crate) fn loader_mut(&mut self, id: LoaderId) -> LinkResult<&mut PackageLoader> {
        self.loaders
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(LinkError::LoaderDetached(id))
    }

    /// Loader registered for a package name.
    pub fn find_loader(&self, package: &str) -> Option<LoaderId> {
        let name = Name::parse(&self.names, package, FindName::Find).ok().flatten()?;
        self.by_package.get(&name).copied()
    }

    pub fn loader_ids(&self) -> Vec<LoaderId> {
        self.loaders
            .iter()
            .filter_map(|l| l.as_ref().map(PackageLoader::id))
            .collect()
    }

    /// Locate a package file along the search paths.
    pub fn find_package_file(&self, package: &str) -> Option<PathBuf> {
        self.config
            .candidate_paths(package)
            .into_iter()
            .find(|path| self.fs.exists(path))
    }

    /// Open (or return the already open) loader for `package`, searching
    /// the configured paths.
    pub fn open_package(&mut self, package: &str, options: &LoadOptions) -> LinkResult<LoaderId> {
        if let Some(id) = self.find_loader(package) {
            return Ok(id);
        }
        let path = self
            .find_package_file(package)
            .ok_or_else(|| LinkError::PackageNotFound(package.to_string()))?;
        self.open_loader(&path, package, options)
    }

    /// Open the package file at `path`; the package is named after the file
    /// stem.
    pub fn open_package_at(&mut self, path: &Path, options: &LoadOptions) -> LinkResult<LoaderId> {
        let package = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| LinkError::PackageNotFound(path.display().to_string()))?
            .to_string();
        if let Some(id) = self.find_loader(&package) {
            return Ok(id);
        }
        self.open_loader(path, &package, options)
    }

    pub(crate) fn open_loader(
        &mut self,
        path: &Path,
        package: &str,
        options: &LoadOptions,
    ) -> LinkResult<LoaderId> {
        let archive = self.fs.open_read(path)?;
        let id = LoaderId::from_index(self.loaders.len() as u32);
        let objects = &mut self.objects;
        let intrinsics = &self.intrinsics;
        let loader = PackageLoader::open(
            id,
            package,
            path,
            archive,
            &self.names,
            options.clone(),
            self.config.max_string_len,
            |name, summary| find_or_create_package(objects, intrinsics, name, Some(summary)),
        )
        .map_err(|e| e.context(format!("opening {}", path.display())))?;

        let package_name = loader.package_name;
        self.loaders.push(Some(loader));
        self.by_package.insert(package_name, id);
        tracing::info!(package, loader = %id, "package opened");

        if !options.defer_verify {
            if let Err(e) = self.verify_imports(id) {
                self.discard_loader(id);
                return Err(e);
            }
        }
        self.loader_mut(id)?.advance(LoaderState::Ready);
        Ok(id)
    }

    /// Drop a loader that failed to open, leaving no registry entry behind.
    fn discard_loader(&mut self, id: LoaderId) {
        if let Some(loader) = self.loaders.get_mut(id.index()).and_then(Option::take) {
            self.by_package.remove(&loader.package_name);
            self.unbind_provider(id);
            tracing::debug!(package = %loader.name, "discarded loader");
        }
    }

    /// Reset every import that was bound into `provider`.
    fn unbind_provider(&mut self, provider: LoaderId) {
        for loader in self.loaders.iter_mut().flatten() {
            for import in &mut loader.imports {
                let bound = match import.resolution {
                    ImportResolution::Package { loader } | ImportResolution::Export { loader, .. } => {
                        loader == provider
                    }
                    _ => false,
                };
                if bound {
                    import.resolution = ImportResolution::Pending;
                }
            }
        }
    }

    /// Tear down one loader: force its deferred bulk data, release its
    /// stream and clear the back-links of the objects it produced. The
    /// objects themselves stay alive.
    pub fn detach_loader(&mut self, id: LoaderId) -> LinkResult<()> {
        let mut loader = self
            .loaders
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(LinkError::LoaderDetached(id))?;
        loader.detach();
        for export in &loader.exports {
            if let Some(object) = export.object.and_then(|h| self.objects.get_mut(h)) {
                object.linker = None;
                object.flags.remove(ObjectFlags::NEED_LOAD);
            }
        }
        self.by_package.remove(&loader.package_name);
        self.unbind_provider(id);
        tracing::info!(package = %loader.name, "loader detached");
        Ok(())
    }

    /// Detach every loader.
    pub fn reset(&mut self) {
        for id in self.loader_ids() {
            if let Err(e) = self.detach_loader(id) {
                tracing::warn!(loader = %id, error = %e, "detach failed during reset");
            }
        }
        self.batch = LoadBatch::default();
        self.verifying.clear();
    }

    /// Make a deferred bulk payload resident by reading it from its owning
    /// loader's stream.
    pub fn load_bulk_data(&mut self, bulk: &BulkData) -> LinkResult<Vec<u8>> {
        if let Some(bytes) = bulk.bytes() {
            return Ok(bytes);
        }
        let owner = bulk
            .owner()
            .ok_or(pkl_archive::ArchiveError::BulkDataUnavailable)?;
        let loader = self.loader_mut(LoaderId::from_index(owner))?;
        let ar = loader
            .archive
            .as_deref_mut()
            .ok_or(pkl_archive::ArchiveError::BulkDataUnavailable)?;
        bulk.make_resident(ar)?;
        Ok(bulk.bytes().unwrap_or_default())
    }

    // -----------------------------------------------------------------------
    // Load batches
    // -----------------------------------------------------------------------

    pub fn begin_load(&mut self) {
        self.batch.depth += 1;
    }

    /// Close a batch. Closing the outermost batch preloads every object
    /// created during it, then runs post-load hooks once per object.
    pub fn end_load(&mut self) -> LinkResult<()> {
        match self.batch.depth {
            0 => {
                tracing::warn!("end_load without begin_load");
                return Ok(());
            }
            1 => {}
            _ => {
                self.batch.depth -= 1;
                return Ok(());
            }
        }

        // Depth stays at one while draining so that objects created by
        // payload reads are queued too.
        let mut result = Ok(());
        while let Some(handle) = self.batch.pending.pop_front() {
            if let Err(e) = self.preload_object(handle) {
                result = Err(e);
                break;
            }
        }
        self.batch.depth = 0;
        let post_load = std::mem::take(&mut self.batch.post_load);
        if let Err(e) = result {
            self.batch.pending.clear();
            return Err(e);
        }
        for handle in post_load {
            self.run_post_load(handle);
        }
        Ok(())
    }

    pub fn in_load(&self) -> bool {
        self.batch.depth > 0
    }

    fn batched<T>(&mut self, f: impl FnOnce(&mut Self) -> LinkResult<T>) -> LinkResult<T> {
        self.begin_load();
        let result = f(self);
        let flushed = self.end_load();
        let value = result?;
        flushed?;
        Ok(value)
    }

    /// Open a package and materialize every visible export.
    pub fn load_package(&mut self, package: &str, options: &LoadOptions) -> LinkResult<LoaderId> {
        self.batched(|ctx| {
            let id = ctx.open_package(package, options)?;
            ctx.create_all_exports(id)?;
            Ok(id)
        })
    }

    /// Load the object at dotted `path` inside `package`.
    pub fn load_object(
        &mut self,
        package: &str,
        path: &str,
        options: &LoadOptions,
    ) -> LinkResult<Option<ObjectHandle>> {
        self.batched(|ctx| {
            let id = ctx.open_package(package, options)?;
            match ctx.find_export_by_path(id, path) {
                Some(index) => ctx.create_export(id, index),
                None => {
                    tracing::warn!(package, path, "no export at path");
                    Ok(None)
                }
            }
        })
    }

    /// Materialize and preload every visible export of an open loader.
    pub fn load_all_exports(&mut self, id: LoaderId) -> LinkResult<()> {
        self.batched(|ctx| ctx.create_all_exports(id))
    }

    fn create_all_exports(&mut self, id: LoaderId) -> LinkResult<()> {
        let count = self.loader(id)?.visible_exports;
        for index in 0..count {
            self.create_export(id, index)?;
        }
        Ok(())
    }

    /// Export index at dotted `path`, matching names only.
    pub fn find_export_by_path(&self, id: LoaderId, path: &str) -> Option<usize> {
        let loader = self.loader(id).ok()?;
        let mut outer = PackageIndex::NULL;
        let mut found = None;
        for part in path.split('.') {
            let name = Name::parse(&self.names, part, FindName::Find).ok().flatten()?;
            let index = loader.exports[..loader.visible_exports]
                .iter()
                .position(|e| e.object_name == name && e.outer_index == outer)?;
            outer = PackageIndex::from_export(index);
            found = Some(index);
        }
        found
    }

    // -----------------------------------------------------------------------
    // Index resolution
    // -----------------------------------------------------------------------

    /// Resolve a signed package index inside loader `id`.
    ///
    /// Null is `None`. An index outside the visible tables sets the archive
    /// error flag, logs, and also reads as `None`.
    pub fn index_to_object(&mut self, id: LoaderId, index: PackageIndex) -> LinkResult<Option<ObjectHandle>> {
        if index.is_null() {
            return Ok(None);
        }
        let loader = self.loader(id)?;
        let (export_count, import_count) = (loader.visible_exports, loader.imports.len());
        if let Ok(i) = index.to_export() {
            if i < export_count {
                return self.create_export(id, i);
            }
        } else if let Ok(i) = index.to_import() {
            if i < import_count {
                return self.create_import(id, i);
            }
        }
        let reason = format!(
            "{index:?} out of range ({export_count} exports, {import_count} imports)"
        );
        self.loader_mut(id)?.flag_error(&reason);
        Ok(None)
    }

    /// Create (but do not preload) the object for export `index`.
    pub fn create_export(&mut self, id: LoaderId, index: usize) -> LinkResult<Option<ObjectHandle>> {
        let loader = self.loader(id)?;
        if index >= loader.visible_exports {
            return Ok(None);
        }
        if let Some(handle) = loader.exports[index].object {
            return Ok(Some(handle));
        }
        let limit = self.config.max_create_depth;
        if self.batch.create_depth >= limit {
            let reason = format!("export {index} nested deeper than {limit}");
            self.loader_mut(id)?.flag_error(&reason);
            return Ok(None);
        }
        self.batch.create_depth += 1;
        let result = self.create_export_inner(id, index);
        self.batch.create_depth -= 1;
        result
    }

    fn create_export_inner(&mut self, id: LoaderId, index: usize) -> LinkResult<Option<ObjectHandle>> {
        let loader = self.loader(id)?;
        let export = loader.exports[index].clone();
        let package = loader.package;
        let package_name = loader.name.clone();

        let class = if export.class_index.is_null() {
            Some(self.intrinsics.class)
        } else {
            self.index_to_object(id, export.class_index)?
        };
        let Some(class) = class else {
            tracing::warn!(package = %package_name, export = index, "class of export not found");
            return Ok(None);
        };
        if self.objects.get(class).is_some_and(|c| c.needs_load()) {
            self.preload_object(class)?;
        }

        let outer = if !export.outer_index.is_null() {
            match self.index_to_object(id, export.outer_index)? {
                Some(outer) => Some(outer),
                None => {
                    tracing::warn!(package = %package_name, export = index, "outer of export not found");
                    return Ok(None);
                }
            }
        } else if export.export_flags.contains(ExportFlags::FORCED_EXPORT) {
            None
        } else {
            Some(package)
        };

        // Resolving the outer can create this export through a cycle.
        if let Some(handle) = self.loader(id)?.exports[index].object {
            return Ok(Some(handle));
        }

        let default = if class == self.intrinsics.class {
            None
        } else {
            Some(self.class_default_object(class)?)
        };
        let (archetype, template) = if export.archetype_index.is_null() {
            (None, default)
        } else {
            match self.index_to_object(id, export.archetype_index)? {
                Some(archetype) => {
                    if self.objects.get(archetype).is_some_and(|a| a.needs_load()) {
                        self.preload_object(archetype)?;
                    }
                    (Some(archetype), Some(archetype))
                }
                None => {
                    tracing::warn!(
                        package = %package_name,
                        export = index,
                        "archetype not found, using class default"
                    );
                    (default, default)
                }
            }
        };

        if let Some(handle) = self.loader(id)?.exports[index].object {
            return Ok(Some(handle));
        }

        let flags = export.object_flags.without(ObjectFlags::RUNTIME_MASK) | ObjectFlags::NEED_LOAD;
        let handle = self
            .objects
            .allocate(Some(class), outer, export.object_name, flags, template);
        if let Some(object) = self.objects.get_mut(handle) {
            object.archetype = archetype;
            object.linker = Some(LinkerSlot { loader: id, export: index });
            object.guid = export.package_guid;
            object.package_flags = export.package_flags;
        }
        self.loader_mut(id)?.exports[index].object = Some(handle);

        if !export.super_index.is_null() {
            let super_struct = self.index_to_object(id, export.super_index)?;
            if let Some(object) = self.objects.get_mut(handle) {
                object.super_struct = super_struct;
            }
        }

        if class == self.intrinsics.class {
            let codec = self.codecs.resolve(&self.objects, Some(handle));
            self.bound_types.insert(handle, codec);
            if let Some(object) = self.objects.get_mut(handle) {
                object.flags.insert(ObjectFlags::BOUND_TYPE);
            }
        }

        if self.batch.depth > 0 {
            self.batch.pending.push_back(handle);
        }
        tracing::debug!(package = %package_name, export = index, object = %handle, "export created");
        Ok(Some(handle))
    }

    /// Create the object for import `index`, verifying it first when the
    /// loader deferred verification.
    pub fn create_import(&mut self, id: LoaderId, index: usize) -> LinkResult<Option<ObjectHandle>> {
        let loader = self.loader(id)?;
        let Some(import) = loader.imports.get(index) else {
            return Ok(None);
        };
        if let Some(handle) = import.object {
            return Ok(Some(handle));
        }
        let (resolution, forgiving) = (import.resolution, loader.options.forgiving);

        let resolution = match resolution {
            // A memoized failure is reported again in strict mode.
            ImportResolution::Pending | ImportResolution::Unresolved => match self.verify_import(id, index) {
                Ok(resolution) => resolution,
                Err(failure) => {
                    if forgiving {
                        if resolution == ImportResolution::Pending {
                            tracing::warn!(loader = %id, %failure, "import unresolved, using null");
                        }
                        return Ok(None);
                    }
                    return Err(LinkError::UnresolvedImports {
                        package: self.loader(id)?.name.clone(),
                        failures: vec![failure],
                    });
                }
            },
            resolution => resolution,
        };

        let handle = match resolution {
            ImportResolution::Package { loader } => Some(self.loader(loader)?.package),
            ImportResolution::Export { loader, index } => self.create_export(loader, index)?,
            ImportResolution::Native(handle) => Some(handle),
            ImportResolution::Unresolved | ImportResolution::Pending => None,
        };
        if let Some(handle) = handle {
            self.loader_mut(id)?.imports[index].object = Some(handle);
        }
        Ok(handle)
    }

    // -----------------------------------------------------------------------
    // Preload
    // -----------------------------------------------------------------------

    /// Deserialize an object's fields if it is still a shell. Objects the
    /// payload references are created and preloaded in the same batch.
    pub fn preload(&mut self, handle: ObjectHandle) -> LinkResult<()> {
        self.batched(|ctx| ctx.preload_object(handle))
    }

    pub(crate) fn preload_object(&mut self, handle: ObjectHandle) -> LinkResult<()> {
        let object = self.objects.get_mut(handle).ok_or(LinkError::InvalidObject(handle))?;
        if !object.needs_load() {
            return Ok(());
        }
        // Cleared up front so references back to this object do not recurse.
        object.flags.remove(ObjectFlags::NEED_LOAD);
        let (slot, class, super_struct) = (object.linker, object.class, object.super_struct);
        let Some(slot) = slot else {
            return Ok(());
        };
        if let Some(object) = self.objects.get_mut(handle) {
            object.flags.insert(ObjectFlags::NEED_POST_LOAD);
        }

        if let Some(sup) = super_struct {
            self.preload_object(sup)?;
        }
        if let Some(class) = class.filter(|&c| c != handle) {
            self.preload_object(class)?;
        }
        let codec = self.codec_for(class);

        let loader = self.loader_mut(slot.loader)?;
        let span = loader.exports.get(slot.export).and_then(|e| e.payload_span());
        let Some((offset, size)) = span else {
            self.schedule_post_load(handle);
            return Ok(());
        };
        let Some(ar) = loader.archive.as_deref_mut() else {
            tracing::warn!(package = %loader.name, export = slot.export, "payload of detached loader");
            self.schedule_post_load(handle);
            return Ok(());
        };
        let saved = ar.tell();
        ar.seek(offset);

        let loaded = {
            let mut reader = PayloadReader::new(self, slot.loader, handle, size);
            codec.load(&mut reader)
        };

        let loader = self.loader_mut(slot.loader)?;
        loader.payload_loads += 1;
        if let Some(ar) = loader.archive.as_deref_mut() {
            let consumed = ar.tell().saturating_sub(offset);
            if consumed > size {
                tracing::warn!(
                    package = %loader.name,
                    export = slot.export,
                    declared = size,
                    consumed,
                    "payload overran its declared size"
                );
            }
            ar.seek(saved);
        }

        let fields = loaded.map_err(|e| e.context(format!("loading export {}", slot.export)))?;
        if let Some(object) = self.objects.get_mut(handle) {
            object.fields.merge(fields);
        }
        self.schedule_post_load(handle);
        Ok(())
    }

    fn schedule_post_load(&mut self, handle: ObjectHandle) {
        if self.batch.depth > 0 {
            self.batch.post_load.push(handle);
        } else {
            self.run_post_load(handle);
        }
    }

    fn run_post_load(&mut self, handle: ObjectHandle) {
        let class = self.objects.get(handle).and_then(|o| o.class);
        let codec = self.codec_for(class);
        if let Some(object) = self.objects.get_mut(handle) {
            if object.flags.contains(ObjectFlags::NEED_POST_LOAD) {
                object.flags.remove(ObjectFlags::NEED_POST_LOAD);
                codec.post_load(object);
            }
        }
    }
}

impl std::fmt::Debug for LinkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkerContext")
            .field("objects", &self.objects.len())
            .field("loaders", &self.loader_ids().len())
            .field("batch_depth", &self.batch.depth)
            .finish()
    }
}

fn seed_intrinsics(objects: &mut ObjectArena) -> Intrinsics {
    let native = ObjectFlags::NATIVE | ObjectFlags::PUBLIC | ObjectFlags::STANDALONE;
    let core = objects.allocate(None, None, Name::new(reserved::CORE), native, None);
    let class = objects.allocate(None, Some(core), Name::new(reserved::CLASS), native, None);
    let package = objects.allocate(Some(class), Some(core), Name::new(reserved::PACKAGE), native, None);
    let object = objects.allocate(Some(class), Some(core), Name::new(reserved::OBJECT), native, None);
    if let Some(o) = objects.get_mut(class) {
        o.class = Some(class);
        o.super_struct = Some(object);
    }
    if let Some(o) = objects.get_mut(package) {
        o.super_struct = Some(object);
    }
    if let Some(o) = objects.get_mut(core) {
        o.class = Some(package);
    }
    Intrinsics {
        core,
        class,
        package,
        object,
    }
}

fn find_or_create_package(
    objects: &mut ObjectArena,
    intrinsics: &Intrinsics,
    name: Name,
    summary: Option<&PackageSummary>,
) -> ObjectHandle {
    let existing = objects
        .find_all(None, name)
        .iter()
        .copied()
        .find(|&h| objects.get(h).is_some_and(|o| o.class == Some(intrinsics.package)));
    let handle = existing.unwrap_or_else(|| {
        let flags = ObjectFlags::PUBLIC | ObjectFlags::STANDALONE;
        objects.allocate(Some(intrinsics.package), None, name, flags, None)
    });
    if let Some(object) = objects.get_mut(handle) {
        match summary {
            Some(summary) => {
                object.guid = summary.guid;
                object.package_flags = summary.package_flags;
            }
            None if object.guid.is_null() => object.guid = pkl_types::PackageGuid::new(),
            None => {}
        }
    }
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkl_archive::MemoryFileSystem;

    fn context() -> LinkerContext {
        LinkerContext::new(
            Arc::new(NameTable::new()),
            Arc::new(MemoryFileSystem::new()),
            LinkerConfig::default(),
        )
    }

    #[test]
    fn intrinsics_form_core() {
        let ctx = context();
        let i = ctx.intrinsics();
        assert_eq!(ctx.object_path(i.class), "Core.Class");
        assert_eq!(ctx.object_path(i.object), "Core.Object");
        let class = ctx.objects().get(i.class).unwrap();
        assert_eq!(class.class, Some(i.class));
        assert_eq!(ctx.objects().get(i.core).unwrap().class, Some(i.package));
    }

    #[test]
    fn create_package_is_idempotent() {
        let mut ctx = context();
        let a = ctx.create_package("Game").unwrap();
        let b = ctx.create_package("game").unwrap();
        assert_eq!(a, b);
        assert!(!ctx.objects().get(a).unwrap().guid.is_null());
    }

    #[test]
    fn class_default_objects_chain_through_supers() {
        let mut ctx = context();
        let pkg = ctx.create_package("Engine").unwrap();
        let base = ctx.create_class(pkg, "Actor", None).unwrap();
        let derived = ctx.create_class(pkg, "Pawn", Some(base)).unwrap();
        let health = ctx.name("Health").unwrap();

        let base_cdo = ctx.class_default_object(base).unwrap();
        ctx.objects_mut()
            .get_mut(base_cdo)
            .unwrap()
            .fields
            .set_property(health, crate::PropertyValue::Int(100));

        let derived_cdo = ctx.class_default_object(derived).unwrap();
        assert_eq!(ctx.object_path(derived_cdo), "Engine.Default__Pawn");
        assert_eq!(
            ctx.objects().get(derived_cdo).unwrap().fields.property(health),
            Some(&crate::PropertyValue::Int(100))
        );
        assert_eq!(ctx.class_default_object(derived).unwrap(), derived_cdo);
        assert!(ctx
            .objects()
            .get(derived_cdo)
            .unwrap()
            .flags
            .contains(ObjectFlags::CLASS_DEFAULT));
    }

    #[test]
    fn create_object_copies_class_defaults() {
        let mut ctx = context();
        let pkg = ctx.create_package("Game").unwrap();
        let class = ctx.create_class(pkg, "Door", None).unwrap();
        let open = ctx.name("Open").unwrap();
        let cdo = ctx.class_default_object(class).unwrap();
        ctx.objects_mut()
            .get_mut(cdo)
            .unwrap()
            .fields
            .set_property(open, crate::PropertyValue::Bool(true));

        let door = ctx.create_object(class, pkg, "Door_3", ObjectFlags::PUBLIC).unwrap();
        let object = ctx.objects().get(door).unwrap();
        assert_eq!(object.name.suffix(), Some(3));
        assert_eq!(object.fields.property(open), Some(&crate::PropertyValue::Bool(true)));
        assert!(!object.needs_load());
    }

    #[test]
    fn missing_package_is_not_found() {
        let mut ctx = context();
        let err = ctx.open_package("Nowhere", &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, LinkError::PackageNotFound(_)));
        assert!(ctx.loader_ids().is_empty());
    }

    #[test]
    fn unbalanced_end_load_is_harmless() {
        let mut ctx = context();
        ctx.end_load().unwrap();
        ctx.begin_load();
        ctx.begin_load();
        assert!(ctx.in_load());
        ctx.end_load().unwrap();
        assert!(ctx.in_load());
        ctx.end_load().unwrap();
        assert!(!ctx.in_load());
    }

    #[test]
    fn shared_context_locks() {
        let shared = context().into_shared();
        let pkg = shared.lock().unwrap().create_package("Shared").unwrap();
        let clone = Arc::clone(&shared);
        let path = std::thread::spawn(move || clone.lock().unwrap().object_path(pkg))
            .join()
            .unwrap();
        assert_eq!(path, "Shared");
    }
}
