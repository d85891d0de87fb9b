//! Package loader: the read side of one package file.
//!
//! A loader walks a fixed sequence of states. Everything up to
//! [`LoaderState::HashBuilt`] happens in [`PackageLoader::open`]; import
//! verification and on-demand object creation need the whole
//! [`LinkerContext`](crate::LinkerContext) and live there.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use pkl_archive::{Archive, ArchiveReader, BulkDataRegistry, MemoryReader};
use pkl_names::{reserved, FindName, Name, NameId, NameTable};
use pkl_types::{PackageGuid, PackageIndex};

use crate::compression;
use crate::config::LoadOptions;
use crate::error::{LinkError, LinkResult};
use crate::hash::{hash_key, ExportHash};
use crate::object::ObjectHandle;
use crate::summary::{read_count, PackageSummary};
use crate::table::{ObjectExport, ObjectImport};

/// Registry slot of an open loader.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderId(u32);

impl LoaderId {
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for LoaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoaderId({})", self.0)
    }
}

impl fmt::Display for LoaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Loader lifecycle, in order. States are never revisited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoaderState {
    Opened,
    SummaryRead,
    NamesRead,
    ImportsRead,
    ExportsRead,
    HashBuilt,
    Verified,
    Ready,
}

pub struct PackageLoader {
    pub(crate) id: LoaderId,
    pub(crate) name: String,
    pub(crate) package_name: Name,
    pub(crate) path: PathBuf,
    pub(crate) package: ObjectHandle,
    pub(crate) summary: PackageSummary,
    pub(crate) name_map: Vec<NameId>,
    pub(crate) imports: Vec<ObjectImport>,
    pub(crate) exports: Vec<ObjectExport>,
    pub(crate) export_hash: ExportHash,
    pub(crate) hash_links: Vec<Option<usize>>,
    pub(crate) depends: Option<Vec<Vec<PackageIndex>>>,
    /// `None` once detached.
    pub(crate) archive: Option<Box<dyn ArchiveReader + Send>>,
    pub(crate) bulk: BulkDataRegistry,
    pub(crate) state: LoaderState,
    pub(crate) options: LoadOptions,
    pub(crate) import_failures: HashMap<usize, String>,
    pub(crate) visible_names: usize,
    pub(crate) visible_exports: usize,
    pub(crate) payload_loads: usize,
}

impl PackageLoader {
    /// Read the summary and all three tables, then build the export hash.
    ///
    /// `make_package` is called once the tables are known good and returns
    /// the package object the exports will live under.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn open(
        id: LoaderId,
        name: &str,
        path: &Path,
        mut archive: Box<dyn ArchiveReader + Send>,
        names: &NameTable,
        options: LoadOptions,
        max_string_len: usize,
        make_package: impl FnOnce(Name, &PackageSummary) -> ObjectHandle,
    ) -> LinkResult<Self> {
        let state = archive.state().clone().with_max_string_len(max_string_len);
        *archive.state_mut() = state;
        let package_name = Name::parse(names, name, FindName::Add)?.unwrap_or(Name::NONE);

        let summary = PackageSummary::read(&mut *archive, name)?;
        let archive = if summary.is_compressed() {
            let summary_end = archive.tell();
            let image = compression::inflate(&mut *archive, summary_end, &summary.compressed_chunks)?;
            let mut inflated = MemoryReader::with_state(image, archive.state().clone());
            inflated.seek(summary_end);
            tracing::debug!(package = name, chunks = summary.compressed_chunks.len(), "inflated package");
            Box::new(inflated) as Box<dyn ArchiveReader + Send>
        } else {
            archive
        };

        let mut loader = Self {
            id,
            name: name.to_string(),
            package_name,
            path: path.to_path_buf(),
            package: ObjectHandle::from_index(0),
            summary,
            name_map: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            export_hash: ExportHash::default(),
            hash_links: Vec::new(),
            depends: None,
            archive: Some(archive),
            bulk: BulkDataRegistry::new(id.0),
            state: LoaderState::SummaryRead,
            options,
            import_failures: HashMap::new(),
            visible_names: 0,
            visible_exports: 0,
            payload_loads: 0,
        };
        loader.read_names(names)?;
        loader.read_imports()?;
        loader.read_exports()?;
        loader.apply_generation_limit();
        loader.package = make_package(package_name, &loader.summary);
        loader.build_hash();
        tracing::debug!(
            package = name,
            names = loader.name_map.len(),
            imports = loader.imports.len(),
            exports = loader.exports.len(),
            "package tables read"
        );
        Ok(loader)
    }

    fn archive_mut(&mut self) -> LinkResult<&mut (dyn ArchiveReader + Send)> {
        match self.archive.as_deref_mut() {
            Some(ar) => Ok(ar),
            None => Err(LinkError::LoaderDetached(self.id)),
        }
    }

    fn corrupt(&self, reason: &str) -> LinkError {
        LinkError::CorruptTable {
            package: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn advance(&mut self, next: LoaderState) {
        debug_assert!(next > self.state, "{:?} -> {:?}", self.state, next);
        if next > self.state {
            tracing::debug!(package = %self.name, from = ?self.state, to = ?next, "loader state");
            self.state = next;
        }
    }

    fn read_names(&mut self, names: &NameTable) -> LinkResult<()> {
        let (offset, count) = (self.summary.name_offset, self.summary.name_count);
        let ar = self.archive_mut()?;
        ar.seek(offset as u64);
        let remaining = ar.total_size().saturating_sub(ar.tell());
        // Shortest entry: empty string plus flags.
        if count as u64 * 12 > remaining {
            ar.set_error("name count exceeds file size");
        }
        let mut map = Vec::with_capacity(if ar.is_error() { 0 } else { count as usize });
        if !ar.is_error() {
            for _ in 0..count {
                let text = ar.read_string();
                let flags = ar.read_u64();
                if ar.is_error() {
                    break;
                }
                match names.intern_with_flags(&text, flags, FindName::Add) {
                    Ok(id) => map.push(id.unwrap_or(reserved::NONE)),
                    Err(e) => {
                        ar.set_error(&e.to_string());
                        break;
                    }
                }
            }
        }
        if ar.is_error() {
            return Err(self.corrupt("name table"));
        }
        self.name_map = map;
        self.advance(LoaderState::NamesRead);
        Ok(())
    }

    fn read_imports(&mut self) -> LinkResult<()> {
        let (offset, count) = (self.summary.import_offset, self.summary.import_count);
        let mut imports = Vec::new();
        {
            let names = std::mem::take(&mut self.name_map);
            let ar = match self.archive.as_deref_mut() {
                Some(ar) => ar,
                None => return Err(LinkError::LoaderDetached(self.id)),
            };
            ar.seek(offset as u64);
            if count as u64 * 28 > ar.total_size().saturating_sub(ar.tell()) {
                ar.set_error("import count exceeds file size");
            } else {
                imports.reserve(count as usize);
                for _ in 0..count {
                    imports.push(ObjectImport::read(ar, &names));
                }
            }
            self.name_map = names;
        }
        if self.archive.as_ref().is_some_and(|ar| ar.is_error()) {
            return Err(self.corrupt("import table"));
        }
        self.imports = imports;
        self.advance(LoaderState::ImportsRead);
        Ok(())
    }

    fn read_exports(&mut self) -> LinkResult<()> {
        let (offset, count) = (self.summary.export_offset, self.summary.export_count);
        let mut exports = Vec::new();
        {
            let names = std::mem::take(&mut self.name_map);
            let ar = match self.archive.as_deref_mut() {
                Some(ar) => ar,
                None => return Err(LinkError::LoaderDetached(self.id)),
            };
            ar.seek(offset as u64);
            if count as u64 * 64 > ar.total_size().saturating_sub(ar.tell()) {
                ar.set_error("export count exceeds file size");
            } else {
                exports.reserve(count as usize);
                for _ in 0..count {
                    exports.push(ObjectExport::read(ar, &names));
                }
            }
            self.name_map = names;
        }
        if self.archive.as_ref().is_some_and(|ar| ar.is_error()) {
            return Err(self.corrupt("export table"));
        }
        self.exports = exports;
        self.advance(LoaderState::ExportsRead);
        Ok(())
    }

    /// Clamp the visible counts to a remote peer's older generation.
    fn apply_generation_limit(&mut self) {
        self.visible_names = self.name_map.len();
        self.visible_exports = self.exports.len();
        if let Some(remote) = self.options.remote_generation {
            let names = usize::try_from(remote.name_count).unwrap_or(0);
            let exports = usize::try_from(remote.export_count).unwrap_or(0);
            self.visible_names = self.visible_names.min(names);
            self.visible_exports = self.visible_exports.min(exports);
            if self.visible_exports < self.exports.len() || self.visible_names < self.name_map.len() {
                tracing::info!(
                    package = %self.name,
                    exports = self.visible_exports,
                    names = self.visible_names,
                    "restricted to remote generation"
                );
            }
        }
    }

    fn build_hash(&mut self) {
        let keys: Vec<(usize, usize)> = (0..self.exports.len())
            .map(|i| {
                let (class, package) = self.export_class(i);
                (i, hash_key(self.exports[i].object_name, class, package))
            })
            .collect();
        self.hash_links = vec![None; self.exports.len()];
        self.export_hash = ExportHash::build(keys.into_iter(), &mut self.hash_links);
        self.advance(LoaderState::HashBuilt);
    }

    /// `(class name, class package name)` of an export.
    pub fn export_class(&self, index: usize) -> (NameId, NameId) {
        let Some(export) = self.exports.get(index) else {
            return (reserved::NONE, reserved::NONE);
        };
        let class = export.class_index;
        if class.is_null() {
            return (reserved::CLASS, reserved::CORE);
        }
        if let Ok(i) = class.to_import() {
            return match self.imports.get(i) {
                Some(import) => (import.object_name.id, self.import_package(i)),
                None => (reserved::NONE, reserved::NONE),
            };
        }
        match class.to_export().ok().and_then(|i| self.exports.get(i)) {
            Some(class_export) => (class_export.object_name.id, self.package_name.id),
            None => (reserved::NONE, reserved::NONE),
        }
    }

    /// Name of the top-level package an import lives in.
    pub fn import_package(&self, index: usize) -> NameId {
        let mut current = index;
        for _ in 0..=self.imports.len() {
            let Some(import) = self.imports.get(current) else {
                break;
            };
            match import.outer_index.to_import() {
                Ok(outer) => current = outer,
                Err(_) if import.outer_index.is_null() => return import.object_name.id,
                // Outer is one of our exports.
                Err(_) => return self.package_name.id,
            }
        }
        reserved::NONE
    }

    /// Dotted path of an import, outermost first.
    pub fn import_path(&self, index: usize, names: &NameTable) -> String {
        let mut parts = Vec::new();
        let mut current = Some(index);
        while let Some(i) = current {
            let Some(import) = self.imports.get(i) else {
                break;
            };
            parts.push(import.object_name.to_text(names));
            if parts.len() > self.imports.len() {
                break;
            }
            current = import.outer_index.to_import().ok();
        }
        parts.reverse();
        parts.join(".")
    }

    /// Dotted path of an export within this package, outermost first.
    pub fn export_path(&self, index: usize, names: &NameTable) -> String {
        let mut parts = Vec::new();
        let mut current = Some(index);
        while let Some(i) = current {
            let Some(export) = self.exports.get(i) else {
                break;
            };
            parts.push(export.object_name.to_text(names));
            if parts.len() > self.exports.len() {
                break;
            }
            current = export.outer_index.to_export().ok();
        }
        parts.reverse();
        parts.join(".")
    }

    /// Read the depends map: for each export, the indices it needs created
    /// first. An absent map reads as empty lists.
    pub fn load_depends_map(&mut self) -> LinkResult<&[Vec<PackageIndex>]> {
        if self.depends.is_none() {
            let offset = self.summary.depends_offset;
            let export_count = self.exports.len();
            let ar = self.archive_mut()?;
            let mut depends = vec![Vec::new(); export_count];
            if offset > 0 {
                let saved = ar.tell();
                ar.seek(offset as u64);
                for entry in depends.iter_mut() {
                    let count = read_count(ar, 4);
                    *entry = (0..count).map(|_| PackageIndex::from_raw(ar.read_i32())).collect();
                }
                ar.seek(saved);
                if ar.is_error() {
                    return Err(self.corrupt("depends map"));
                }
            }
            self.depends = Some(depends);
        }
        Ok(self.depends.as_deref().unwrap_or(&[]))
    }

    /// Force every deferred bulk payload, then release the stream.
    pub(crate) fn detach(&mut self) -> usize {
        let forced = match self.archive.as_deref_mut() {
            Some(ar) => match self.bulk.force_all(ar) {
                Ok(forced) => forced,
                Err(e) => {
                    tracing::warn!(package = %self.name, error = %e, "failed to force bulk data");
                    self.bulk.abandon();
                    0
                }
            },
            None => 0,
        };
        self.archive = None;
        tracing::debug!(package = %self.name, forced, "loader detached");
        forced
    }

    pub fn id(&self) -> LoaderId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn package_name(&self) -> Name {
        self.package_name
    }

    /// The package object exports without an outer live under.
    pub fn package(&self) -> ObjectHandle {
        self.package
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn summary(&self) -> &PackageSummary {
        &self.summary
    }

    pub fn guid(&self) -> PackageGuid {
        self.summary.guid
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Local name index → global handle, for every name in the file.
    pub fn name_map(&self) -> &[NameId] {
        &self.name_map
    }

    /// The name map restricted to the visible generation.
    pub fn visible_name_map(&self) -> &[NameId] {
        &self.name_map[..self.visible_names]
    }

    pub fn imports(&self) -> &[ObjectImport] {
        &self.imports
    }

    pub fn exports(&self) -> &[ObjectExport] {
        &self.exports
    }

    pub fn visible_export_count(&self) -> usize {
        self.visible_exports
    }

    pub fn visible_name_count(&self) -> usize {
        self.visible_names
    }

    /// Why an import failed verification, if it did.
    pub fn import_failure(&self, index: usize) -> Option<&str> {
        self.import_failures.get(&index).map(String::as_str)
    }

    /// Payloads deserialized so far.
    pub fn payload_loads(&self) -> usize {
        self.payload_loads
    }

    pub fn pending_bulk_data(&self) -> usize {
        self.bulk.pending()
    }

    pub fn is_detached(&self) -> bool {
        self.archive.is_none()
    }

    /// The archive error flag.
    pub fn is_error(&self) -> bool {
        self.archive.as_ref().is_some_and(|ar| ar.is_error())
    }

    pub(crate) fn flag_error(&mut self, reason: &str) {
        match self.archive.as_deref_mut() {
            Some(ar) => ar.set_error(reason),
            None => tracing::warn!(package = %self.name, reason, "error on detached loader"),
        }
    }
}

/// Dropping a loader that still owns its stream detaches it first, so no
/// deferred bulk payload outlives the stream it would be read from.
impl Drop for PackageLoader {
    fn drop(&mut self) {
        if self.archive.is_some() {
            self.detach();
        }
    }
}

impl fmt::Debug for PackageLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageLoader")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("names", &self.name_map.len())
            .field("imports", &self.imports.len())
            .field("exports", &self.exports.len())
            .field("detached", &self.archive.is_none())
            .finish()
    }
}
