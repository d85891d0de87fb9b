//! Name interning for the package linker.
//!
//! Every identifier that appears in a package (object names, class names,
//! package names, property names) is interned once into a [`NameTable`] and
//! handled afterwards as a small integer [`NameId`]. Handle equality is the
//! only comparison the rest of the system needs.
//!
//! # Design Rules
//!
//! 1. Lookup is case-insensitive; the first spelling interned is canonical.
//! 2. A fixed block of [`reserved`] names occupies the lowest handles and is
//!    never removed.
//! 3. Deleted slots are recycled through a free list.
//! 4. Numbered names (`Base_N`) are a view ([`Name`]) over a base handle and
//!    never occupy their own table slot.

pub mod error;
pub mod name;
pub mod reserved;
pub mod table;

pub use error::{NameError, NameResult};
pub use name::{split_number, Name, NAME_NO_NUMBER};
pub use table::{FindName, NameEntry, NameId, NameTable, MAX_NAME_LEN};
