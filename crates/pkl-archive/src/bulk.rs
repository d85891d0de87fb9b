//! Deferred bulk payloads.
//!
//! Large homogeneous arrays are serialized inline but may be skipped on
//! load: a lazily-loaded [`BulkData`] remembers where its bytes live and is
//! attached to the owning loader's [`BulkDataRegistry`]. The bytes are read
//! on first access, or forced by [`BulkDataRegistry::force_all`] before the
//! source stream is closed.
//!
//! On-disk layout:
//! ```text
//! flags:u32  elementCount:compact  elementSize:compact
//! sizeOnDisk:i32  payloadOffset:i32  payload[sizeOnDisk]
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use crate::archive::{ArchiveReader, ArchiveWriter};
use crate::error::{ArchiveError, ArchiveResult};

/// Serialized flag: the payload may be deferred on load.
pub const BULK_LAZY_LOAD: u32 = 1 << 0;

#[derive(Debug)]
enum BulkState {
    Resident(Vec<u8>),
    Deferred { owner: u32, offset: u64, size: u64 },
    /// Deferred, but the source went away before the bytes were forced.
    Lost,
}

#[derive(Debug)]
struct BulkInner {
    element_count: u64,
    element_size: u64,
    lazy: bool,
    state: BulkState,
}

/// A homogeneous array payload that can stay on disk until needed.
///
/// Clones share the same storage: forcing one makes every clone resident.
#[derive(Clone)]
pub struct BulkData {
    inner: Arc<Mutex<BulkInner>>,
}

impl BulkData {
    /// Resident bulk data, always loaded inline.
    pub fn new(element_size: u64, bytes: Vec<u8>) -> Self {
        Self::build(element_size, bytes, false)
    }

    /// Resident bulk data marked for deferred loading once saved.
    pub fn new_lazy(element_size: u64, bytes: Vec<u8>) -> Self {
        Self::build(element_size, bytes, true)
    }

    fn build(element_size: u64, bytes: Vec<u8>, lazy: bool) -> Self {
        let element_size = element_size.max(1);
        Self {
            inner: Arc::new(Mutex::new(BulkInner {
                element_count: bytes.len() as u64 / element_size,
                element_size,
                lazy,
                state: BulkState::Resident(bytes),
            })),
        }
    }

    pub fn element_count(&self) -> u64 {
        self.inner.lock().expect("lock poisoned").element_count
    }

    pub fn element_size(&self) -> u64 {
        self.inner.lock().expect("lock poisoned").element_size
    }

    pub fn is_lazy(&self) -> bool {
        self.inner.lock().expect("lock poisoned").lazy
    }

    pub fn is_resident(&self) -> bool {
        matches!(
            self.inner.lock().expect("lock poisoned").state,
            BulkState::Resident(_)
        )
    }

    /// Registry owner of a deferred payload.
    pub fn owner(&self) -> Option<u32> {
        match self.inner.lock().expect("lock poisoned").state {
            BulkState::Deferred { owner, .. } => Some(owner),
            _ => None,
        }
    }

    /// The bytes, if resident.
    pub fn bytes(&self) -> Option<Vec<u8>> {
        match &self.inner.lock().expect("lock poisoned").state {
            BulkState::Resident(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }

    /// Load a deferred payload from `source`. No-op when already resident.
    pub fn make_resident(&self, source: &mut dyn ArchiveReader) -> ArchiveResult<()> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let (offset, size) = match inner.state {
            BulkState::Resident(_) => return Ok(()),
            BulkState::Lost => return Err(ArchiveError::BulkDataUnavailable),
            BulkState::Deferred { offset, size, .. } => (offset, size),
        };
        let saved = source.tell();
        source.seek(offset);
        let bytes = source.read_vec(size as usize);
        source.seek(saved);
        if source.is_error() {
            return Err(ArchiveError::Corrupt { offset });
        }
        inner.state = BulkState::Resident(bytes);
        Ok(())
    }

    /// Read from a loading archive. Lazy payloads are skipped and attached
    /// to `registry` when one is provided; otherwise they load inline.
    pub fn read(ar: &mut dyn ArchiveReader, registry: Option<&mut BulkDataRegistry>) -> Self {
        let flags = ar.read_u32();
        let element_count = ar.read_compact_u64();
        let element_size = ar.read_compact_u64().max(1);
        let size = ar.read_i32().max(0) as u64;
        let offset = ar.read_i32().max(0) as u64;
        let lazy = flags & BULK_LAZY_LOAD != 0;
        let owner = registry.as_ref().map(|r| r.owner);

        let state = match owner {
            Some(owner) if lazy && !ar.is_error() => {
                if offset + size > ar.total_size() {
                    ar.set_error("bulk payload extends beyond archive");
                    BulkState::Resident(Vec::new())
                } else {
                    ar.seek(offset + size);
                    BulkState::Deferred {
                        owner,
                        offset,
                        size,
                    }
                }
            }
            _ => BulkState::Resident(ar.read_vec(size as usize)),
        };
        let deferred = matches!(state, BulkState::Deferred { .. });

        let bulk = Self {
            inner: Arc::new(Mutex::new(BulkInner {
                element_count,
                element_size,
                lazy,
                state,
            })),
        };
        if let (Some(registry), true) = (registry, deferred) {
            registry.attached.push(bulk.downgrade());
        }
        bulk
    }

    /// Write to a saving archive. The payload must be resident.
    pub fn write(&self, ar: &mut dyn ArchiveWriter) -> ArchiveResult<()> {
        let inner = self.inner.lock().expect("lock poisoned");
        let BulkState::Resident(bytes) = &inner.state else {
            return Err(ArchiveError::BulkDataUnavailable);
        };
        ar.write_u32(if inner.lazy { BULK_LAZY_LOAD } else { 0 });
        ar.write_compact_u64(inner.element_count);
        ar.write_compact_u64(inner.element_size);
        ar.write_i32(bytes.len() as i32);
        let payload_offset = ar.tell() + 4;
        ar.write_i32(payload_offset as i32);
        ar.write_bytes(bytes);
        Ok(())
    }

    fn mark_lost(&self) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if matches!(inner.state, BulkState::Deferred { .. }) {
            inner.state = BulkState::Lost;
        }
    }

    fn downgrade(&self) -> Weak<Mutex<BulkInner>> {
        Arc::downgrade(&self.inner)
    }
}

impl PartialEq for BulkData {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.element_size() == other.element_size()
                && self.bytes().is_some()
                && self.bytes() == other.bytes())
    }
}

impl fmt::Debug for BulkData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().expect("lock poisoned");
        let state = match inner.state {
            BulkState::Resident(ref b) => format!("resident({} bytes)", b.len()),
            BulkState::Deferred { offset, size, .. } => format!("deferred({size}@{offset})"),
            BulkState::Lost => "lost".to_string(),
        };
        f.debug_struct("BulkData")
            .field("element_count", &inner.element_count)
            .field("state", &state)
            .finish()
    }
}

/// Deferred payloads attached to one source archive.
#[derive(Debug)]
pub struct BulkDataRegistry {
    owner: u32,
    attached: Vec<Weak<Mutex<BulkInner>>>,
}

impl BulkDataRegistry {
    pub fn new(owner: u32) -> Self {
        Self {
            owner,
            attached: Vec::new(),
        }
    }

    pub fn owner(&self) -> u32 {
        self.owner
    }

    /// Number of attached payloads still deferred and alive.
    pub fn pending(&self) -> usize {
        self.attached
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|inner| {
                matches!(
                    inner.lock().expect("lock poisoned").state,
                    BulkState::Deferred { .. }
                )
            })
            .count()
    }

    /// Read every still-deferred payload from `source`, then detach all.
    ///
    /// A payload that fails to load is marked lost and the rest are still
    /// forced; the first failure is returned.
    pub fn force_all(&mut self, source: &mut dyn ArchiveReader) -> ArchiveResult<usize> {
        let mut forced = 0;
        let mut first_error = None;
        for weak in std::mem::take(&mut self.attached) {
            let Some(inner) = weak.upgrade() else {
                continue;
            };
            let bulk = BulkData { inner };
            if bulk.is_resident() {
                continue;
            }
            match bulk.make_resident(source) {
                Ok(()) => forced += 1,
                Err(e) => {
                    bulk.mark_lost();
                    first_error.get_or_insert(e);
                }
            }
        }
        if forced > 0 {
            tracing::debug!(owner = self.owner, forced, "forced deferred bulk data");
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(forced),
        }
    }

    /// Drop every attachment without loading. Payloads still deferred can
    /// no longer be loaded.
    pub fn abandon(&mut self) {
        for weak in self.attached.drain(..) {
            if let Some(inner) = weak.upgrade() {
                BulkData { inner }.mark_lost();
            }
        }
    }
}
