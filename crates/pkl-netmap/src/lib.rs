//! Network object map for package exports.
//!
//! Two processes that opened the same packages agree on a flat numbering
//! of their exports and names, so an object reference crosses the wire as
//! one integer. Each source package owns a contiguous block of that space.
//! When the peer's copy of a package is from an older save generation, the
//! block shrinks to the older counts: exports and names are only ever
//! appended by a save, so the shorter prefix is the same on both ends.
//!
//! # Architecture
//!
//! - [`PackageMap`]: ordered sources, block layout, index conversion
//! - [`PackageManifestEntry`]: per-package counts exchanged with the peer
//! - [`ClassNetCache`] / [`ReplicationLayout`]: stable replicated field
//!   numbering per class

pub mod class_cache;
pub mod error;
pub mod manifest;
pub mod map;

pub use class_cache::{ClassNetCache, ConditionGroup, FieldNetEntry, ReplicatedField, ReplicationLayout, StaticLayout};
pub use error::{NetMapError, NetMapResult};
pub use manifest::{decode_manifest, encode_manifest, PackageManifestEntry, MAX_MANIFEST_SIZE};
pub use map::{PackageMap, PackageMapEntry};

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;

    use pkl_archive::MemoryFileSystem;
    use pkl_linker::{
        LinkerConfig, LinkerContext, LoadOptions, LoaderId, ObjectHandle, SaveOptions,
    };
    use pkl_names::NameTable;
    use pkl_types::ObjectFlags;

    fn context(fs: &Arc<MemoryFileSystem>) -> LinkerContext {
        LinkerContext::new(Arc::new(NameTable::new()), fs.clone(), LinkerConfig::default())
    }

    fn add(ctx: &mut LinkerContext, outer: ObjectHandle, name: &str) -> ObjectHandle {
        let class = ctx.intrinsics().object;
        ctx.create_object(class, outer, name, ObjectFlags::PUBLIC).unwrap()
    }

    fn open(fs: &Arc<MemoryFileSystem>, options: &LoadOptions) -> (LinkerContext, LoaderId) {
        let mut ctx = context(fs);
        let id = ctx.open_package("Map", options).unwrap();
        (ctx, id)
    }

    /// Saves `Map` twice: first with `Door`, then with `Door` and `Window`.
    /// Returns the bytes of both generations.
    fn two_generations() -> (Vec<u8>, Vec<u8>) {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut ctx = context(&fs);
        let map = ctx.create_package("Map").unwrap();
        add(&mut ctx, map, "Door");
        let path = Path::new("./Map.pkg");
        ctx.save_package(map, path, &SaveOptions::default()).unwrap();
        let old = fs.get(path).unwrap();

        let mut ctx = context(&fs);
        let id = ctx.load_package("Map", &LoadOptions::default()).unwrap();
        let map = ctx.loader(id).unwrap().package();
        add(&mut ctx, map, "Window");
        let new = ctx.save_package_to_bytes(map, &SaveOptions::default()).unwrap().0;
        (old, new)
    }

    #[test]
    fn peers_on_different_generations_agree_on_the_shared_prefix() {
        let (old, new) = two_generations();

        let old_fs = Arc::new(MemoryFileSystem::new());
        old_fs.insert("./Map.pkg", old);
        let new_fs = Arc::new(MemoryFileSystem::new());
        new_fs.insert("./Map.pkg", new);

        let (mut old_ctx, old_id) = open(&old_fs, &LoadOptions::default());
        let (mut new_ctx, new_id) = open(&new_fs, &LoadOptions::default());
        let mut old_map = PackageMap::default();
        let mut new_map = PackageMap::default();
        old_map.add_source(&old_ctx, old_id).unwrap();
        new_map.add_source(&new_ctx, new_id).unwrap();

        // Manifests cross the wire in both directions.
        let to_new = encode_manifest(&old_map.manifest()).unwrap();
        let to_old = encode_manifest(&new_map.manifest()).unwrap();
        assert_eq!(new_map.apply_remote_manifest(&decode_manifest(&to_new).unwrap()), 1);
        assert_eq!(old_map.apply_remote_manifest(&decode_manifest(&to_old).unwrap()), 1);
        old_map.compute(&old_ctx).unwrap();
        new_map.compute(&new_ctx).unwrap();

        assert_eq!(old_map.object_count(), 1);
        assert_eq!(new_map.object_count(), 1);

        let old_door = old_map.index_to_object(&mut old_ctx, 0).unwrap().unwrap();
        let new_door = new_map.index_to_object(&mut new_ctx, 0).unwrap().unwrap();
        assert_eq!(old_ctx.object_path(old_door), "Map.Door");
        assert_eq!(new_ctx.object_path(new_door), "Map.Door");

        // The newer export is outside the shared numbering.
        let window = new_ctx.load_object("Map", "Window", &LoadOptions::default()).unwrap().unwrap();
        assert_eq!(new_map.object_to_index(&new_ctx, window), None);
    }

    #[test]
    fn loader_remote_generation_and_manifest_agree() {
        let (old, new) = two_generations();
        let old_fs = Arc::new(MemoryFileSystem::new());
        old_fs.insert("./Map.pkg", old);
        let (old_ctx, old_id) = open(&old_fs, &LoadOptions::default());
        let old_counts = old_ctx.loader(old_id).unwrap().summary().latest_generation();

        let new_fs = Arc::new(MemoryFileSystem::new());
        new_fs.insert("./Map.pkg", new);
        let clamped = LoadOptions::default().with_remote_generation(old_counts);
        let (new_ctx, new_id) = open(&new_fs, &clamped);

        let mut map = PackageMap::default();
        map.add_source(&new_ctx, new_id).unwrap();
        map.compute(&new_ctx).unwrap();
        assert_eq!(map.object_count(), old_counts.export_count as u32);
        assert_eq!(map.name_count(), old_counts.name_count as u32);
    }
}
