//! Payload reader handed to codecs while an export is preloaded.

use pkl_archive::{Archive, ArchiveReader, ArchiveState, BulkData, MemoryReader};
use pkl_names::Name;
use pkl_types::PackageIndex;

use crate::codec::FieldReader;
use crate::context::LinkerContext;
use crate::error::LinkResult;
use crate::loader::LoaderId;
use crate::object::ObjectHandle;
use crate::table::read_name_ref;

/// Reads one export payload from its loader's stream. Object references are
/// resolved through the loader's tables, which may create further exports.
pub(crate) struct PayloadReader<'a> {
    ctx: &'a mut LinkerContext,
    loader: LoaderId,
    object: ObjectHandle,
    size: u64,
    /// Stands in for a stream that went away mid-payload; always in error.
    detached: MemoryReader,
}

impl<'a> PayloadReader<'a> {
    pub(crate) fn new(ctx: &'a mut LinkerContext, loader: LoaderId, object: ObjectHandle, size: u64) -> Self {
        let mut detached = MemoryReader::with_state(Vec::new(), ArchiveState::loading());
        detached.set_error("loader stream is gone");
        Self {
            ctx,
            loader,
            object,
            size,
            detached,
        }
    }
}

impl FieldReader for PayloadReader<'_> {
    fn archive(&mut self) -> &mut dyn ArchiveReader {
        let stream = self
            .ctx
            .loaders
            .get_mut(self.loader.index())
            .and_then(Option::as_mut)
            .and_then(|l| l.archive.as_deref_mut());
        match stream {
            Some(ar) => ar,
            None => &mut self.detached,
        }
    }

    fn read_name(&mut self) -> Name {
        let Ok(loader) = self.ctx.loader_mut(self.loader) else {
            return Name::NONE;
        };
        let visible = loader.visible_names.min(loader.name_map.len());
        match loader.archive.as_deref_mut() {
            Some(ar) => read_name_ref(ar, &loader.name_map[..visible]),
            None => Name::NONE,
        }
    }

    fn read_object(&mut self) -> LinkResult<Option<ObjectHandle>> {
        let index = PackageIndex::from_raw(self.archive().read_i32());
        self.ctx.index_to_object(self.loader, index)
    }

    fn read_bulk(&mut self) -> BulkData {
        let Ok(loader) = self.ctx.loader_mut(self.loader) else {
            return BulkData::read(&mut self.detached, None);
        };
        match loader.archive.as_deref_mut() {
            Some(ar) => BulkData::read(ar, Some(&mut loader.bulk)),
            None => BulkData::read(&mut self.detached, None),
        }
    }

    fn object(&self) -> ObjectHandle {
        self.object
    }

    fn payload_size(&self) -> u64 {
        self.size
    }
}
