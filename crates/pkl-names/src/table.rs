use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{NameError, NameResult};
use crate::reserved::RESERVED;

/// Longest accepted name, in bytes.
pub const MAX_NAME_LEN: usize = 1024;

/// Number of hash buckets. Must be a power of two.
const HASH_BUCKETS: usize = 4096;

/// Handle to an interned name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NameId(u32);

impl NameId {
    /// The `None` name. Also what empty text interns to.
    pub const NONE: Self = Self(0);

    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameId({})", self.0)
    }
}

impl fmt::Display for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lookup mode for [`NameTable::intern`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FindName {
    /// Return the existing handle or nothing.
    Find,
    /// Return the existing handle or allocate a new slot.
    Add,
    /// As `Add`, and mark the entry as never collectible.
    AddPermanent,
}

/// A live slot in the table.
#[derive(Clone, Debug)]
pub struct NameEntry {
    /// Canonical spelling (the first one interned).
    pub text: String,
    /// Flags accumulated from every package that declared this name.
    pub flags: u64,
    pub permanent: bool,
    hash_next: Option<NameId>,
}

struct Inner {
    entries: Vec<Option<NameEntry>>,
    buckets: Vec<Option<NameId>>,
    free: Vec<NameId>,
    live: usize,
}

/// Case-insensitive intern table.
///
/// Shared across every loader and writer of a process. Internally guarded by
/// an `RwLock`, so an `Arc<NameTable>` can be handed to several owners.
pub struct NameTable {
    inner: RwLock<Inner>,
}

fn hash_text(text: &str) -> usize {
    // FNV-1a over the ASCII-lowercased bytes.
    let mut hash: u32 = 0x811c_9dc5;
    for byte in text.bytes() {
        hash ^= byte.to_ascii_lowercase() as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash as usize & (HASH_BUCKETS - 1)
}

impl Inner {
    fn find(&self, text: &str, bucket: usize) -> Option<NameId> {
        let mut cursor = self.buckets[bucket];
        while let Some(id) = cursor {
            let entry = self.entries[id.index()].as_ref()?;
            if entry.text.eq_ignore_ascii_case(text) {
                return Some(id);
            }
            cursor = entry.hash_next;
        }
        None
    }

    fn insert(&mut self, text: &str, flags: u64, permanent: bool, bucket: usize) -> NameId {
        let entry = NameEntry {
            text: text.to_string(),
            flags,
            permanent,
            hash_next: self.buckets[bucket],
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.entries[id.index()] = Some(entry);
                id
            }
            None => {
                let id = NameId(self.entries.len() as u32);
                self.entries.push(Some(entry));
                id
            }
        };
        self.buckets[bucket] = Some(id);
        self.live += 1;
        id
    }
}

impl NameTable {
    /// Create a table seeded with the reserved names.
    pub fn new() -> Self {
        let mut inner = Inner {
            entries: Vec::with_capacity(RESERVED.len()),
            buckets: vec![None; HASH_BUCKETS],
            free: Vec::new(),
            live: 0,
        };
        for (expected, text) in RESERVED {
            let id = inner.insert(text, 0, true, hash_text(text));
            debug_assert_eq!(id, *expected);
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Intern `text` under the given mode.
    ///
    /// Empty text always maps to [`NameId::NONE`]. In [`FindName::Find`] mode
    /// an absent name returns `Ok(None)`; the other modes always return a
    /// handle.
    pub fn intern(&self, text: &str, mode: FindName) -> NameResult<Option<NameId>> {
        self.intern_with_flags(text, 0, mode)
    }

    /// As [`intern`](Self::intern), OR-ing `flags` into the entry's flags word.
    pub fn intern_with_flags(
        &self,
        text: &str,
        flags: u64,
        mode: FindName,
    ) -> NameResult<Option<NameId>> {
        if text.is_empty() {
            return Ok(Some(NameId::NONE));
        }
        if text.len() > MAX_NAME_LEN {
            return Err(NameError::TooLong {
                len: text.len(),
                max: MAX_NAME_LEN,
            });
        }
        let bucket = hash_text(text);

        if let Some(id) = self.inner.read().expect("lock poisoned").find(text, bucket) {
            if flags == 0 && mode != FindName::AddPermanent {
                return Ok(Some(id));
            }
        }

        let mut inner = self.inner.write().expect("lock poisoned");
        // Re-check under the write lock: another writer may have added it.
        if let Some(id) = inner.find(text, bucket) {
            if mode != FindName::Find || flags != 0 {
                if let Some(entry) = inner.entries[id.index()].as_mut() {
                    entry.flags |= flags;
                    if mode == FindName::AddPermanent {
                        entry.permanent = true;
                    }
                }
            }
            return Ok(Some(id));
        }
        match mode {
            FindName::Find => Ok(None),
            FindName::Add => Ok(Some(inner.insert(text, flags, false, bucket))),
            FindName::AddPermanent => Ok(Some(inner.insert(text, flags, true, bucket))),
        }
    }

    /// Look up without adding.
    pub fn find(&self, text: &str) -> Option<NameId> {
        self.intern(text, FindName::Find).ok().flatten()
    }

    /// Look up, adding a collectible entry when absent.
    pub fn add(&self, text: &str) -> NameResult<NameId> {
        self.intern(text, FindName::Add)
            .map(|id| id.unwrap_or(NameId::NONE))
    }

    /// Look up, adding a permanent entry when absent.
    pub fn add_permanent(&self, text: &str) -> NameResult<NameId> {
        self.intern(text, FindName::AddPermanent)
            .map(|id| id.unwrap_or(NameId::NONE))
    }

    /// Remove a collectible entry and recycle its slot.
    pub fn delete(&self, id: NameId) -> NameResult<()> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let entry = match inner.entries.get(id.index()) {
            Some(Some(entry)) => entry,
            _ => return Err(NameError::NotFound(id)),
        };
        if entry.permanent {
            return Err(NameError::Permanent(entry.text.clone()));
        }
        let bucket = hash_text(&entry.text);
        let next = entry.hash_next;

        // Unlink from the bucket chain.
        if inner.buckets[bucket] == Some(id) {
            inner.buckets[bucket] = next;
        } else {
            let mut cursor = inner.buckets[bucket];
            while let Some(current) = cursor {
                let link = inner.entries[current.index()]
                    .as_ref()
                    .and_then(|e| e.hash_next);
                if link == Some(id) {
                    if let Some(prev) = inner.entries[current.index()].as_mut() {
                        prev.hash_next = next;
                    }
                    break;
                }
                cursor = link;
            }
        }

        inner.entries[id.index()] = None;
        inner.free.push(id);
        inner.live -= 1;
        tracing::debug!(name = id.index(), "name deleted");
        Ok(())
    }

    /// Canonical text of a live entry.
    pub fn text(&self, id: NameId) -> Option<String> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .entries
            .get(id.index())
            .and_then(|e| e.as_ref())
            .map(|e| e.text.clone())
    }

    /// Canonical text, or `"<invalid>"` for a dead handle.
    pub fn text_or_invalid(&self, id: NameId) -> String {
        self.text(id).unwrap_or_else(|| "<invalid>".to_string())
    }

    pub fn flags(&self, id: NameId) -> Option<u64> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .entries
            .get(id.index())
            .and_then(|e| e.as_ref())
            .map(|e| e.flags)
    }

    pub fn is_permanent(&self, id: NameId) -> bool {
        let inner = self.inner.read().expect("lock poisoned");
        matches!(inner.entries.get(id.index()), Some(Some(e)) if e.permanent)
    }

    pub fn contains(&self, id: NameId) -> bool {
        let inner = self.inner.read().expect("lock poisoned");
        matches!(inner.entries.get(id.index()), Some(Some(_)))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NameTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameTable")
            .field("live", &self.len())
            .finish()
    }
}
