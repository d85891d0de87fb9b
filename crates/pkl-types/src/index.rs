use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Signed reference into a package's object tables.
///
/// The same convention is used for type, super, outer and archetype
/// references in both the export and import tables, and for object
/// references inside serialized payloads:
///
/// - `0`: no object
/// - `N > 0`: the `N`th export of this package (1-based)
/// - `N < 0`: the `-N`th import of this package (1-based)
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageIndex(i32);

impl PackageIndex {
    /// The null reference.
    pub const NULL: Self = Self(0);

    /// Wrap a raw on-disk value.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Reference to the export at zero-based table position `index`.
    pub fn from_export(index: usize) -> Self {
        Self(index as i32 + 1)
    }

    /// Reference to the import at zero-based table position `index`.
    pub fn from_import(index: usize) -> Self {
        Self(-(index as i32) - 1)
    }

    /// The raw on-disk value.
    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub const fn is_export(self) -> bool {
        self.0 > 0
    }

    pub const fn is_import(self) -> bool {
        self.0 < 0
    }

    /// Zero-based export table position.
    pub fn to_export(self) -> Result<usize, TypeError> {
        if self.is_export() {
            Ok((self.0 - 1) as usize)
        } else {
            Err(TypeError::NotAnExport(self.0))
        }
    }

    /// Zero-based import table position.
    pub fn to_import(self) -> Result<usize, TypeError> {
        if self.is_import() {
            Ok((-(self.0 as i64) - 1) as usize)
        } else {
            Err(TypeError::NotAnImport(self.0))
        }
    }
}

impl fmt::Debug for PackageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => write!(f, "PackageIndex(null)"),
            n if n > 0 => write!(f, "PackageIndex(export {})", n - 1),
            n => write!(f, "PackageIndex(import {})", -(n as i64) - 1),
        }
    }
}

impl fmt::Display for PackageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for PackageIndex {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

impl From<PackageIndex> for i32 {
    fn from(index: PackageIndex) -> Self {
        index.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn null_is_zero() {
        assert!(PackageIndex::NULL.is_null());
        assert!(!PackageIndex::NULL.is_export());
        assert!(!PackageIndex::NULL.is_import());
        assert_eq!(PackageIndex::default(), PackageIndex::NULL);
    }

    #[test]
    fn export_indices_are_one_based() {
        let idx = PackageIndex::from_export(0);
        assert_eq!(idx.raw(), 1);
        assert_eq!(idx.to_export().unwrap(), 0);
        assert!(idx.to_import().is_err());
    }

    #[test]
    fn import_indices_are_negative() {
        let idx = PackageIndex::from_import(0);
        assert_eq!(idx.raw(), -1);
        assert_eq!(idx.to_import().unwrap(), 0);
        assert_eq!(PackageIndex::from_raw(-5).to_import().unwrap(), 4);
        assert!(idx.to_export().is_err());
    }

    #[test]
    fn null_converts_to_neither() {
        assert_eq!(
            PackageIndex::NULL.to_export().unwrap_err(),
            TypeError::NotAnExport(0)
        );
        assert_eq!(
            PackageIndex::NULL.to_import().unwrap_err(),
            TypeError::NotAnImport(0)
        );
    }

    #[test]
    fn debug_names_the_table() {
        assert_eq!(format!("{:?}", PackageIndex::from_raw(3)), "PackageIndex(export 2)");
        assert_eq!(format!("{:?}", PackageIndex::from_raw(-1)), "PackageIndex(import 0)");
    }

    #[test]
    fn min_value_import_does_not_overflow() {
        let idx = PackageIndex::from_raw(i32::MIN);
        assert_eq!(idx.to_import().unwrap(), i32::MAX as usize);
    }

    proptest! {
        #[test]
        fn export_position_roundtrips(pos in 0usize..1_000_000) {
            prop_assert_eq!(PackageIndex::from_export(pos).to_export().unwrap(), pos);
        }

        #[test]
        fn import_position_roundtrips(pos in 0usize..1_000_000) {
            prop_assert_eq!(PackageIndex::from_import(pos).to_import().unwrap(), pos);
        }
    }
}
