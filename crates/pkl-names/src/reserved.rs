//! Names registered at table construction with fixed handles.

use crate::table::NameId;

macro_rules! reserved_names {
    ($($index:literal => $ident:ident = $text:literal,)*) => {
        $(
            #[doc = concat!("`", $text, "`")]
            pub const $ident: NameId = NameId::from_index($index);
        )*

        /// Every reserved name in handle order.
        pub const RESERVED: &[(NameId, &str)] = &[$(($ident, $text),)*];
    };
}

reserved_names! {
    0 => NONE = "None",
    1 => CORE = "Core",
    2 => CLASS = "Class",
    3 => PACKAGE = "Package",
    4 => OBJECT = "Object",
    5 => DEFAULT_PREFIX = "Default__",
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_dense_from_zero() {
        for (pos, (id, _)) in RESERVED.iter().enumerate() {
            assert_eq!(id.index(), pos);
        }
    }

    #[test]
    fn none_is_handle_zero() {
        assert_eq!(NONE, NameId::NONE);
    }
}
