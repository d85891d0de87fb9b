use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::NameResult;
use crate::table::{FindName, NameId, NameTable};

/// Stored number meaning "no numeric suffix".
pub const NAME_NO_NUMBER: i32 = 0;

/// A base name handle plus an optional numeric suffix.
///
/// `number == 0` means no suffix; otherwise the display form is
/// `Base_{number - 1}`, so `Foo_0` is distinct from `Foo`. This is how
/// siblings sharing an outer get unique names without each suffixed form
/// taking a table slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Name {
    pub id: NameId,
    pub number: i32,
}

impl Name {
    pub const NONE: Self = Self {
        id: NameId::NONE,
        number: NAME_NO_NUMBER,
    };

    pub const fn new(id: NameId) -> Self {
        Self {
            id,
            number: NAME_NO_NUMBER,
        }
    }

    /// The name `Base_{suffix}`.
    pub const fn numbered(id: NameId, suffix: i32) -> Self {
        Self {
            id,
            number: suffix + 1,
        }
    }

    pub const fn is_none(self) -> bool {
        self.id.is_none() && self.number == NAME_NO_NUMBER
    }

    /// The displayed suffix, if any.
    pub const fn suffix(self) -> Option<i32> {
        if self.number == NAME_NO_NUMBER {
            None
        } else {
            Some(self.number - 1)
        }
    }

    /// Same base, no suffix.
    pub const fn base(self) -> Self {
        Self::new(self.id)
    }

    /// Intern `text`, splitting a trailing `_N` into the number.
    pub fn parse(table: &NameTable, text: &str, mode: FindName) -> NameResult<Option<Self>> {
        let (base, number) = split_number(text);
        Ok(table.intern(base, mode)?.map(|id| Self { id, number }))
    }

    /// Display form, resolving the base through `table`.
    pub fn to_text(self, table: &NameTable) -> String {
        let base = table.text_or_invalid(self.id);
        match self.suffix() {
            Some(suffix) => format!("{base}_{suffix}"),
            None => base,
        }
    }
}

impl Default for Name {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<NameId> for Name {
    fn from(id: NameId) -> Self {
        Self::new(id)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.suffix() {
            Some(suffix) => write!(f, "Name({}_{})", self.id.index(), suffix),
            None => write!(f, "Name({})", self.id.index()),
        }
    }
}

/// Split `Base_N` into `("Base", N + 1)`.
///
/// Only a suffix made of digits without a leading zero (except `0` itself)
/// is split off, and only when the base is non-empty. Anything else is
/// returned whole with [`NAME_NO_NUMBER`].
pub fn split_number(text: &str) -> (&str, i32) {
    let Some(pos) = text.rfind('_') else {
        return (text, NAME_NO_NUMBER);
    };
    let (base, digits) = (&text[..pos], &text[pos + 1..]);
    if base.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return (text, NAME_NO_NUMBER);
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return (text, NAME_NO_NUMBER);
    }
    match digits.parse::<i32>() {
        Ok(n) if n < i32::MAX => (base, n + 1),
        _ => (text, NAME_NO_NUMBER),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_plain_name() {
        assert_eq!(split_number("Actor"), ("Actor", NAME_NO_NUMBER));
    }

    #[test]
    fn split_numbered_name() {
        assert_eq!(split_number("Actor_0"), ("Actor", 1));
        assert_eq!(split_number("Actor_12"), ("Actor", 13));
        assert_eq!(split_number("My_Actor_3"), ("My_Actor", 4));
    }

    #[test]
    fn split_rejects_leading_zero_and_junk() {
        assert_eq!(split_number("Actor_01"), ("Actor_01", NAME_NO_NUMBER));
        assert_eq!(split_number("Actor_"), ("Actor_", NAME_NO_NUMBER));
        assert_eq!(split_number("_5"), ("_5", NAME_NO_NUMBER));
        assert_eq!(split_number("Actor_5a"), ("Actor_5a", NAME_NO_NUMBER));
        assert_eq!(
            split_number("Actor_99999999999"),
            ("Actor_99999999999", NAME_NO_NUMBER)
        );
    }

    #[test]
    fn parse_and_display_roundtrip() {
        let table = NameTable::new();
        let name = Name::parse(&table, "Light_7", FindName::Add).unwrap().unwrap();
        assert_eq!(name.suffix(), Some(7));
        assert_eq!(table.text(name.id).unwrap(), "Light");
        assert_eq!(name.to_text(&table), "Light_7");
    }

    #[test]
    fn numbered_forms_share_one_slot() {
        let table = NameTable::new();
        let before = table.len();
        let a = Name::parse(&table, "Mesh_1", FindName::Add).unwrap().unwrap();
        let b = Name::parse(&table, "Mesh_2", FindName::Add).unwrap().unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a, b);
        assert_eq!(table.len(), before + 1);
    }

    #[test]
    fn suffix_zero_differs_from_no_suffix() {
        let table = NameTable::new();
        let id = table.add("Item").unwrap();
        assert_ne!(Name::new(id), Name::numbered(id, 0));
        assert_eq!(Name::numbered(id, 0).to_text(&table), "Item_0");
        assert_eq!(Name::numbered(id, 0).base(), Name::new(id));
    }

    #[test]
    fn parse_find_only_misses() {
        let table = NameTable::new();
        assert!(Name::parse(&table, "Ghost_3", FindName::Find).unwrap().is_none());
    }

    #[test]
    fn none_name() {
        assert!(Name::NONE.is_none());
        assert!(!Name::numbered(NameId::NONE, 0).is_none());
    }
}
