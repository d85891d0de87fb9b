//! Persisted flag words.
//!
//! Each word is a transparent newtype over its on-disk integer. Unknown bits
//! are preserved on a load/save cycle.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

macro_rules! flag_word {
    ($(#[$meta:meta])* $name:ident($repr:ty)) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name($repr);

        impl $name {
            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn from_bits(bits: $repr) -> Self {
                Self(bits)
            }

            pub const fn bits(self) -> $repr {
                self.0
            }

            /// `true` when every bit of `other` is set.
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// `true` when any bit of `other` is set.
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            #[must_use]
            pub const fn without(self, other: Self) -> Self {
                Self(self.0 & !other.0)
            }
        }

        impl BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl BitAnd for $name {
            type Output = Self;
            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }
    };
}

flag_word!(
    /// Per-object flags. Stored as `objectFlags:u64` in export records.
    ObjectFlags(u64)
);

impl ObjectFlags {
    pub const PUBLIC: Self = Self(1 << 0);
    pub const STANDALONE: Self = Self(1 << 1);
    /// Object is compiled in rather than loaded from a package.
    pub const NATIVE: Self = Self(1 << 2);
    /// Object is never saved.
    pub const TRANSIENT: Self = Self(1 << 3);
    /// Object is the default instance of its class.
    pub const CLASS_DEFAULT: Self = Self(1 << 4);
    pub const ARCHETYPE: Self = Self(1 << 5);
    /// Shell created, fields not yet deserialized.
    pub const NEED_LOAD: Self = Self(1 << 8);
    /// Fields deserialized, post-load hook pending.
    pub const NEED_POST_LOAD: Self = Self(1 << 9);
    /// The object is a type descriptor bound for use as a class.
    pub const BOUND_TYPE: Self = Self(1 << 10);

    /// Bits that only have meaning in memory and are stripped on save.
    pub const RUNTIME_MASK: Self =
        Self(Self::NEED_LOAD.0 | Self::NEED_POST_LOAD.0 | Self::BOUND_TYPE.0);
}

flag_word!(
    /// Package-level flags. Stored in the summary and in forced exports.
    PackageFlags(u32)
);

impl PackageFlags {
    pub const ALLOW_DOWNLOAD: Self = Self(1 << 0);
    pub const CLIENT_OPTIONAL: Self = Self(1 << 1);
    pub const SERVER_SIDE_ONLY: Self = Self(1 << 2);
    pub const COOKED: Self = Self(1 << 3);
    /// The package only contains top-level assets; imports into it take the
    /// direct asset resolution path.
    pub const ASSET_CONTAINER: Self = Self(1 << 4);
    pub const CONTAINS_SCRIPT: Self = Self(1 << 5);
}

flag_word!(
    /// Per-export flags (`exportFlags:u32`).
    ExportFlags(u32)
);

impl ExportFlags {
    /// The export is a package nested inside this file.
    pub const FORCED_EXPORT: Self = Self(1 << 0);
    pub const NOT_FOR_CLIENT: Self = Self(1 << 1);
    pub const NOT_FOR_SERVER: Self = Self(1 << 2);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_and_intersects() {
        let flags = ObjectFlags::PUBLIC | ObjectFlags::NEED_LOAD;
        assert!(flags.contains(ObjectFlags::PUBLIC));
        assert!(flags.contains(ObjectFlags::PUBLIC | ObjectFlags::NEED_LOAD));
        assert!(!flags.contains(ObjectFlags::PUBLIC | ObjectFlags::NATIVE));
        assert!(flags.intersects(ObjectFlags::PUBLIC | ObjectFlags::NATIVE));
        assert!(!flags.intersects(ObjectFlags::NATIVE));
    }

    #[test]
    fn insert_and_remove() {
        let mut flags = ObjectFlags::empty();
        assert!(flags.is_empty());
        flags.insert(ObjectFlags::NEED_LOAD);
        assert!(flags.contains(ObjectFlags::NEED_LOAD));
        flags.remove(ObjectFlags::NEED_LOAD);
        assert!(flags.is_empty());
    }

    #[test]
    fn runtime_mask_strips_load_state() {
        let flags = ObjectFlags::PUBLIC | ObjectFlags::NEED_LOAD | ObjectFlags::NEED_POST_LOAD;
        assert_eq!(flags.without(ObjectFlags::RUNTIME_MASK), ObjectFlags::PUBLIC);
    }

    #[test]
    fn unknown_bits_survive() {
        let raw = 0x8000_0000_0000_0001u64;
        assert_eq!(ObjectFlags::from_bits(raw).bits(), raw);
    }

    #[test]
    fn debug_is_hex() {
        assert_eq!(format!("{:?}", PackageFlags::COOKED), "PackageFlags(0x8)");
    }
}
