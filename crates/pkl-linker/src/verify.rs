//! Import verification: binding each import of a loader to a providing
//! package, export or in-memory object.

use pkl_names::{Name, NameId};
use pkl_types::{PackageFlags, PackageIndex};

use crate::context::LinkerContext;
use crate::error::{LinkError, LinkResult, UnresolvedImport};
use crate::hash::hash_key;
use crate::loader::{LoaderId, LoaderState};
use crate::table::{ImportResolution, ObjectImport};

impl LinkerContext {
    /// Verify every import of loader `id`.
    ///
    /// All imports are attempted; failures are collected rather than
    /// stopping at the first. In forgiving mode they are logged and the
    /// affected imports read back as null, otherwise the whole set is
    /// returned as [`LinkError::UnresolvedImports`].
    pub fn verify_imports(&mut self, id: LoaderId) -> LinkResult<()> {
        let count = self.loader(id)?.imports.len();
        let mut failures = Vec::new();
        for index in 0..count {
            if let Err(failure) = self.verify_import(id, index) {
                failures.push(failure);
            }
        }

        let loader = self.loader_mut(id)?;
        // A deferred loader is already past verification.
        if loader.state < LoaderState::Verified {
            loader.advance(LoaderState::Verified);
        }
        if failures.is_empty() {
            tracing::debug!(package = %loader.name, imports = count, "imports verified");
            return Ok(());
        }
        if loader.options.forgiving {
            for failure in &failures {
                tracing::warn!(package = %loader.name, %failure, "unresolved import");
            }
            return Ok(());
        }
        Err(LinkError::UnresolvedImports {
            package: loader.name.clone(),
            failures,
        })
    }

    /// Bind import `index` of loader `id`, memoizing the outcome.
    pub fn verify_import(&mut self, id: LoaderId, index: usize) -> Result<ImportResolution, UnresolvedImport> {
        let Ok(loader) = self.loader(id) else {
            return Err(UnresolvedImport {
                index,
                path: String::new(),
                class: String::new(),
                reason: format!("loader {id} has been detached"),
            });
        };
        let Some(import) = loader.imports.get(index).cloned() else {
            return Err(UnresolvedImport {
                index,
                path: String::new(),
                class: String::new(),
                reason: format!("no import {index}"),
            });
        };

        match import.resolution {
            ImportResolution::Pending => {}
            ImportResolution::Unresolved => {
                let reason = loader
                    .import_failure(index)
                    .unwrap_or("unresolved")
                    .to_string();
                return Err(self.failure(id, index, &import, reason));
            }
            resolved => return Ok(resolved),
        }

        if !self.verifying.insert((id, index)) {
            return Err(self.failure(id, index, &import, "import is its own outer".into()));
        }
        let result = self.resolve_import(id, &import);
        self.verifying.remove(&(id, index));

        // The loader may have been discarded by a nested failed open.
        let Ok(loader) = self.loader_mut(id) else {
            return Err(UnresolvedImport {
                index,
                path: String::new(),
                class: String::new(),
                reason: format!("loader {id} has been detached"),
            });
        };
        match result {
            Ok(resolution) => {
                loader.imports[index].resolution = resolution;
                Ok(resolution)
            }
            Err(reason) => {
                loader.imports[index].resolution = ImportResolution::Unresolved;
                loader.import_failures.insert(index, reason.clone());
                Err(self.failure(id, index, &import, reason))
            }
        }
    }

    fn failure(&self, id: LoaderId, index: usize, import: &ObjectImport, reason: String) -> UnresolvedImport {
        let path = self
            .loader(id)
            .map(|l| l.import_path(index, &self.names))
            .unwrap_or_default();
        let class = format!(
            "{}.{}",
            import.class_package.to_text(&self.names),
            import.class_name.to_text(&self.names)
        );
        UnresolvedImport {
            index,
            path,
            class,
            reason,
        }
    }

    fn resolve_import(&mut self, id: LoaderId, import: &ObjectImport) -> Result<ImportResolution, String> {
        if import.outer_index.is_null() {
            return self.resolve_top_level(id, import.object_name);
        }
        let Ok(outer) = import.outer_index.to_import() else {
            return Err(format!("outer {:?} is not an import", import.outer_index));
        };
        let outer = self
            .verify_import(id, outer)
            .map_err(|f| format!("outer {} unresolved", f.path))?;

        let (class_name, class_package) = (import.class_name.id, import.class_package.id);
        let name = import.object_name;
        let found = match outer {
            ImportResolution::Package { loader: provider } => {
                let asset_container = self
                    .loader(provider)
                    .is_ok_and(|p| p.summary.package_flags.contains(PackageFlags::ASSET_CONTAINER));
                let index = if asset_container {
                    self.find_top_level_export(provider, class_name, name)
                } else {
                    self.find_export_index(provider, class_name, class_package, name, PackageIndex::NULL)
                };
                index.map(|index| ImportResolution::Export { loader: provider, index })
            }
            ImportResolution::Export { loader: provider, index: outer } => self
                .find_export_index(provider, class_name, class_package, name, PackageIndex::from_export(outer))
                .map(|index| ImportResolution::Export { loader: provider, index }),
            ImportResolution::Native(outer) => self
                .objects
                .find_all(Some(outer), name)
                .iter()
                .copied()
                .find(|&h| self.class_name_of(h) == Some(class_name))
                .map(ImportResolution::Native),
            ImportResolution::Pending | ImportResolution::Unresolved => None,
        };
        found.ok_or_else(|| {
            format!(
                "no {} named {} in its outer",
                self.names.text_or_invalid(class_name),
                name.to_text(&self.names)
            )
        })
    }

    /// A top-level import names a package: an open loader, an object already
    /// in memory, or a package file on the search path.
    fn resolve_top_level(&mut self, id: LoaderId, name: Name) -> Result<ImportResolution, String> {
        if let Some(&provider) = self.by_package.get(&name) {
            return Ok(ImportResolution::Package { loader: provider });
        }
        if let Some(native) = self.objects.find(None, name) {
            return Ok(ImportResolution::Native(native));
        }
        let package = name.to_text(&self.names);
        let Some(path) = self.find_package_file(&package) else {
            return Err(format!("package {package} not found"));
        };
        let options = self.loader(id).map_err(|e| e.to_string())?.options.clone();
        tracing::debug!(package = %package, importer = %id, "opening providing package");
        match self.open_loader(&path, &package, &options) {
            Ok(provider) => Ok(ImportResolution::Package { loader: provider }),
            Err(e) => Err(format!("package {package} failed to open: {e}")),
        }
    }

    fn class_name_of(&self, object: crate::object::ObjectHandle) -> Option<NameId> {
        let class = self.objects.get(object)?.class?;
        Some(self.objects.get(class)?.name.id)
    }

    /// Find a visible export by name, class and outer using the export hash.
    pub fn find_export_index(
        &self,
        provider: LoaderId,
        class_name: NameId,
        class_package: NameId,
        name: Name,
        outer: PackageIndex,
    ) -> Option<usize> {
        let loader = self.loader(provider).ok()?;
        let bucket = hash_key(name, class_name, class_package);
        loader
            .export_hash
            .chain(bucket, &loader.hash_links)
            .filter(|&i| i < loader.visible_exports)
            .find(|&i| {
                let export = &loader.exports[i];
                export.object_name == name
                    && export.outer_index == outer
                    && loader.export_class(i) == (class_name, class_package)
            })
    }

    /// Linear scan of the top-level exports of an asset container, matching
    /// object name and class name only.
    fn find_top_level_export(&self, provider: LoaderId, class_name: NameId, name: Name) -> Option<usize> {
        let loader = self.loader(provider).ok()?;
        (0..loader.visible_exports).find(|&i| {
            let export = &loader.exports[i];
            export.outer_index.is_null() && export.object_name == name && loader.export_class(i).0 == class_name
        })
    }
}
