//! Fixed-size hash over a package's exports.
//!
//! Keyed by `(object name, class name, class package name)`. Every export
//! carries a chain link to the next export in its bucket, so a lookup walks a
//! short list and compares handles.

use pkl_names::{Name, NameId};

pub const EXPORT_HASH_BUCKETS: usize = 256;

/// Bucket of an `(object, class, package)` triple.
pub fn hash_key(object: Name, class: NameId, package: NameId) -> usize {
    let value = (object.id.index() as u64)
        .wrapping_add(object.number as u64)
        .wrapping_add(7u64.wrapping_mul(class.index() as u64))
        .wrapping_add(31u64.wrapping_mul(package.index() as u64));
    (value as usize) & (EXPORT_HASH_BUCKETS - 1)
}

#[derive(Clone, Debug)]
pub struct ExportHash {
    buckets: Vec<Option<usize>>,
}

impl Default for ExportHash {
    fn default() -> Self {
        Self {
            buckets: vec![None; EXPORT_HASH_BUCKETS],
        }
    }
}

impl ExportHash {
    /// Build from `(export index, bucket)` pairs, threading chain links
    /// through `links`. Chains list exports in ascending index order.
    pub fn build(keys: impl DoubleEndedIterator<Item = (usize, usize)>, links: &mut [Option<usize>]) -> Self {
        let mut hash = Self::default();
        for (index, bucket) in keys.rev() {
            links[index] = hash.buckets[bucket];
            hash.buckets[bucket] = Some(index);
        }
        hash
    }

    /// Head of the chain for `bucket`.
    pub fn head(&self, bucket: usize) -> Option<usize> {
        self.buckets[bucket & (EXPORT_HASH_BUCKETS - 1)]
    }

    /// Export indices in `bucket`, following `links`.
    pub fn chain<'a>(&self, bucket: usize, links: &'a [Option<usize>]) -> Chain<'a> {
        Chain {
            next: self.head(bucket),
            links,
        }
    }

    /// Number of non-empty buckets.
    pub fn occupied(&self) -> usize {
        self.buckets.iter().filter(|b| b.is_some()).count()
    }
}

pub struct Chain<'a> {
    next: Option<usize>,
    links: &'a [Option<usize>],
}

impl Iterator for Chain<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.next?;
        self.next = self.links.get(current).copied().flatten();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkl_names::reserved;

    #[test]
    fn key_is_bounded_and_number_matters() {
        let a = hash_key(Name::new(reserved::OBJECT), reserved::CLASS, reserved::CORE);
        let b = hash_key(Name::numbered(reserved::OBJECT, 0), reserved::CLASS, reserved::CORE);
        assert!(a < EXPORT_HASH_BUCKETS);
        assert_ne!(a, b);
    }

    #[test]
    fn chain_lists_ascending_indices() {
        let keys = vec![(0, 5), (1, 9), (2, 5), (3, 5)];
        let mut links = vec![None; 4];
        let hash = ExportHash::build(keys.into_iter(), &mut links);
        assert_eq!(hash.chain(5, &links).collect::<Vec<_>>(), vec![0, 2, 3]);
        assert_eq!(hash.chain(9, &links).collect::<Vec<_>>(), vec![1]);
        assert_eq!(hash.chain(6, &links).count(), 0);
        assert_eq!(hash.occupied(), 2);
    }
}
