//! Arena of live objects.
//!
//! Objects are addressed by [`ObjectHandle`] and never freed by the linker,
//! so references between them (including cycles) are plain handles.

use std::collections::HashMap;
use std::fmt;

use pkl_archive::BulkData;
use pkl_names::{Name, NameTable};
use pkl_types::{ObjectFlags, PackageFlags, PackageGuid};

use crate::loader::LoaderId;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(u32);

impl ObjectHandle {
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle({})", self.0)
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Back-link from an object to the export record that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LinkerSlot {
    pub loader: LoaderId,
    pub export: usize,
}

/// A single tagged property value.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Int(i32),
    Float(f32),
    Bool(bool),
    Name(Name),
    Str(String),
    Object(Option<ObjectHandle>),
    Bytes(Vec<u8>),
    Bulk(BulkData),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    pub name: Name,
    pub value: PropertyValue,
}

/// Reflected field data of an object.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum FieldData {
    #[default]
    Empty,
    /// Opaque payload bytes.
    Raw(Vec<u8>),
    /// Tagged properties in serialization order.
    Properties(Vec<Property>),
}

impl FieldData {
    pub fn property(&self, name: Name) -> Option<&PropertyValue> {
        match self {
            Self::Properties(props) => props.iter().find(|p| p.name == name).map(|p| &p.value),
            _ => None,
        }
    }

    /// Replace the value of `name`, appending when absent. Non-property data
    /// is discarded.
    pub fn set_property(&mut self, name: Name, value: PropertyValue) {
        if !matches!(self, Self::Properties(_)) {
            *self = Self::Properties(Vec::new());
        }
        if let Self::Properties(props) = self {
            match props.iter_mut().find(|p| p.name == name) {
                Some(existing) => existing.value = value,
                None => props.push(Property { name, value }),
            }
        }
    }

    /// Overlay freshly loaded data on defaults copied from a template.
    pub fn merge(&mut self, loaded: FieldData) {
        match loaded {
            FieldData::Empty => {}
            FieldData::Properties(props) if matches!(self, Self::Properties(_)) => {
                for prop in props {
                    self.set_property(prop.name, prop.value);
                }
            }
            other => *self = other,
        }
    }

    /// Object references held by property values.
    pub fn references(&self) -> Vec<ObjectHandle> {
        match self {
            Self::Properties(props) => props
                .iter()
                .filter_map(|p| match p.value {
                    PropertyValue::Object(h) => h,
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Object {
    pub name: Name,
    pub class: Option<ObjectHandle>,
    pub outer: Option<ObjectHandle>,
    pub archetype: Option<ObjectHandle>,
    /// Parent type, for objects that are themselves types.
    pub super_struct: Option<ObjectHandle>,
    pub flags: ObjectFlags,
    /// Meaningful for package objects only.
    pub package_flags: PackageFlags,
    pub guid: PackageGuid,
    pub linker: Option<LinkerSlot>,
    pub fields: FieldData,
}

impl Object {
    pub fn needs_load(&self) -> bool {
        self.flags.contains(ObjectFlags::NEED_LOAD)
    }
}

#[derive(Debug, Default)]
pub struct ObjectArena {
    objects: Vec<Object>,
    by_name: HashMap<(Option<ObjectHandle>, Name), Vec<ObjectHandle>>,
    children: HashMap<Option<ObjectHandle>, Vec<ObjectHandle>>,
}

impl ObjectArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate and default-initialize an object, seeding its fields from
    /// `template` when given.
    pub fn allocate(
        &mut self,
        class: Option<ObjectHandle>,
        outer: Option<ObjectHandle>,
        name: Name,
        flags: ObjectFlags,
        template: Option<ObjectHandle>,
    ) -> ObjectHandle {
        let fields = template
            .and_then(|t| self.get(t))
            .map(|t| t.fields.clone())
            .unwrap_or_default();
        let handle = ObjectHandle(self.objects.len() as u32);
        self.objects.push(Object {
            name,
            class,
            outer,
            archetype: None,
            super_struct: None,
            flags,
            package_flags: PackageFlags::empty(),
            guid: PackageGuid::null(),
            linker: None,
            fields,
        });
        self.by_name.entry((outer, name)).or_default().push(handle);
        self.children.entry(outer).or_default().push(handle);
        handle
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&Object> {
        self.objects.get(handle.index())
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut Object> {
        self.objects.get_mut(handle.index())
    }

    /// First object named `name` directly inside `outer`.
    pub fn find(&self, outer: Option<ObjectHandle>, name: Name) -> Option<ObjectHandle> {
        self.find_all(outer, name).first().copied()
    }

    pub fn find_all(&self, outer: Option<ObjectHandle>, name: Name) -> &[ObjectHandle] {
        self.by_name
            .get(&(outer, name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Direct children of `outer` in allocation order.
    pub fn children(&self, outer: Option<ObjectHandle>) -> &[ObjectHandle] {
        self.children.get(&outer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The top of `handle`'s outer chain.
    pub fn outermost(&self, handle: ObjectHandle) -> ObjectHandle {
        let mut current = handle;
        while let Some(outer) = self.get(current).and_then(|o| o.outer) {
            current = outer;
        }
        current
    }

    /// `true` when `ancestor` is on `handle`'s outer chain.
    pub fn is_in(&self, handle: ObjectHandle, ancestor: ObjectHandle) -> bool {
        let mut current = self.get(handle).and_then(|o| o.outer);
        while let Some(h) = current {
            if h == ancestor {
                return true;
            }
            current = self.get(h).and_then(|o| o.outer);
        }
        false
    }

    /// Dotted path, outermost first.
    pub fn path_name(&self, handle: ObjectHandle, names: &NameTable) -> String {
        let mut parts = Vec::new();
        let mut current = Some(handle);
        while let Some(h) = current {
            match self.get(h) {
                Some(object) => {
                    parts.push(object.name.to_text(names));
                    current = object.outer;
                }
                None => {
                    parts.push("<invalid>".to_string());
                    break;
                }
            }
        }
        parts.reverse();
        parts.join(".")
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = ObjectHandle> + '_ {
        (0..self.objects.len() as u32).map(ObjectHandle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkl_names::reserved;

    #[test]
    fn allocate_and_find() {
        let names = NameTable::new();
        let mut arena = ObjectArena::new();
        let core = arena.allocate(None, None, Name::new(reserved::CORE), ObjectFlags::NATIVE, None);
        let class = arena.allocate(None, Some(core), Name::new(reserved::CLASS), ObjectFlags::NATIVE, None);

        assert_eq!(arena.find(None, Name::new(reserved::CORE)), Some(core));
        assert_eq!(arena.find(Some(core), Name::new(reserved::CLASS)), Some(class));
        assert_eq!(arena.find(None, Name::new(reserved::CLASS)), None);
        assert_eq!(arena.children(Some(core)), &[class]);
        assert_eq!(arena.outermost(class), core);
        assert!(arena.is_in(class, core));
        assert!(!arena.is_in(core, class));
        assert_eq!(arena.path_name(class, &names), "Core.Class");
    }

    #[test]
    fn same_name_under_different_outers() {
        let names = NameTable::new();
        let mesh = Name::new(names.add("Mesh").unwrap());
        let mut arena = ObjectArena::new();
        let a = arena.allocate(None, None, Name::new(names.add("A").unwrap()), ObjectFlags::empty(), None);
        let b = arena.allocate(None, None, Name::new(names.add("B").unwrap()), ObjectFlags::empty(), None);
        let in_a = arena.allocate(None, Some(a), mesh, ObjectFlags::empty(), None);
        let in_b = arena.allocate(None, Some(b), mesh, ObjectFlags::empty(), None);
        assert_ne!(in_a, in_b);
        assert_eq!(arena.find(Some(a), mesh), Some(in_a));
        assert_eq!(arena.find(Some(b), mesh), Some(in_b));
    }

    #[test]
    fn template_fields_are_copied() {
        let mut arena = ObjectArena::new();
        let mut fields = FieldData::Empty;
        fields.set_property(Name::new(reserved::OBJECT), PropertyValue::Int(3));
        let template = arena.allocate(None, None, Name::new(reserved::DEFAULT_PREFIX), ObjectFlags::CLASS_DEFAULT, None);
        arena.get_mut(template).unwrap().fields = fields.clone();

        let obj = arena.allocate(None, None, Name::new(reserved::OBJECT), ObjectFlags::empty(), Some(template));
        assert_eq!(arena.get(obj).unwrap().fields, fields);
    }

    // -----------------------------------------------------------------------
    // FieldData
    // -----------------------------------------------------------------------

    #[test]
    fn merge_overlays_loaded_properties() {
        let x = Name::new(reserved::CLASS);
        let y = Name::new(reserved::PACKAGE);
        let mut defaults = FieldData::Empty;
        defaults.set_property(x, PropertyValue::Int(1));
        defaults.set_property(y, PropertyValue::Bool(false));

        let mut loaded = FieldData::Empty;
        loaded.set_property(y, PropertyValue::Bool(true));
        defaults.merge(loaded);

        assert_eq!(defaults.property(x), Some(&PropertyValue::Int(1)));
        assert_eq!(defaults.property(y), Some(&PropertyValue::Bool(true)));
    }

    #[test]
    fn merge_replaces_raw_and_ignores_empty() {
        let mut data = FieldData::Raw(vec![1, 2]);
        data.merge(FieldData::Empty);
        assert_eq!(data, FieldData::Raw(vec![1, 2]));
        data.merge(FieldData::Raw(vec![3]));
        assert_eq!(data, FieldData::Raw(vec![3]));
    }

    #[test]
    fn references_lists_object_values() {
        let mut data = FieldData::Empty;
        data.set_property(Name::new(reserved::CLASS), PropertyValue::Object(Some(ObjectHandle(4))));
        data.set_property(Name::new(reserved::PACKAGE), PropertyValue::Object(None));
        data.set_property(Name::new(reserved::OBJECT), PropertyValue::Int(0));
        assert_eq!(data.references(), vec![ObjectHandle(4)]);
    }
}
