//! Per-type field serialization.
//!
//! A [`Serializable`] turns an object's payload into [`FieldData`] and back.
//! Codecs are registered by class name in a [`CodecRegistry`]; a class
//! without its own codec inherits the nearest one up its super chain, and
//! [`TaggedPropertyCodec`] is the fallback.
//!
//! Codecs never see package-local indices: names and object references go
//! through [`FieldReader`] / [`FieldWriter`], which map them to and from the
//! package's tables.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use pkl_archive::{compact, Archive, ArchiveReader, ArchiveWriter, BulkData};
use pkl_names::{Name, NameId};

use crate::error::LinkResult;
use crate::object::{FieldData, Object, ObjectArena, ObjectHandle, Property, PropertyValue};

/// Load-side view of one export payload.
pub trait FieldReader {
    fn archive(&mut self) -> &mut dyn ArchiveReader;

    /// A `(localNameIndex, number)` pair.
    fn read_name(&mut self) -> Name;

    /// A signed package index, resolved to an object. May create (but not
    /// preload) the referenced object.
    fn read_object(&mut self) -> LinkResult<Option<ObjectHandle>>;

    /// A bulk payload, deferred when marked lazy.
    fn read_bulk(&mut self) -> BulkData;

    /// The object being loaded.
    fn object(&self) -> ObjectHandle;

    /// Declared payload size in bytes.
    fn payload_size(&self) -> u64;
}

/// Save-side view of one export payload.
pub trait FieldWriter {
    fn archive(&mut self) -> &mut dyn ArchiveWriter;
    fn write_name(&mut self, name: Name);
    fn write_object(&mut self, object: Option<ObjectHandle>);
    fn write_bulk(&mut self, bulk: &BulkData) -> LinkResult<()>;
}

/// Field codec for one class of objects.
pub trait Serializable: Send + Sync {
    fn load(&self, fields: &mut dyn FieldReader) -> LinkResult<FieldData>;

    fn save(&self, object: &Object, fields: &mut dyn FieldWriter) -> LinkResult<()>;

    /// Runs once per object after the load batch that read it has drained.
    fn post_load(&self, _object: &mut Object) {}
}

// ---------------------------------------------------------------------------
// Tagged properties
// ---------------------------------------------------------------------------

pub const KIND_INT: u8 = 0;
pub const KIND_FLOAT: u8 = 1;
pub const KIND_BOOL: u8 = 2;
pub const KIND_NAME: u8 = 3;
pub const KIND_STR: u8 = 4;
pub const KIND_OBJECT: u8 = 5;
pub const KIND_BYTES: u8 = 6;
pub const KIND_BULK: u8 = 7;

fn kind_of(value: &PropertyValue) -> u8 {
    match value {
        PropertyValue::Int(_) => KIND_INT,
        PropertyValue::Float(_) => KIND_FLOAT,
        PropertyValue::Bool(_) => KIND_BOOL,
        PropertyValue::Name(_) => KIND_NAME,
        PropertyValue::Str(_) => KIND_STR,
        PropertyValue::Object(_) => KIND_OBJECT,
        PropertyValue::Bytes(_) => KIND_BYTES,
        PropertyValue::Bulk(_) => KIND_BULK,
    }
}

fn string_size(value: &str) -> u64 {
    if value.is_empty() {
        4
    } else if value.is_ascii() {
        4 + value.len() as u64 + 1
    } else {
        4 + 2 * (value.encode_utf16().count() as u64 + 1)
    }
}

/// Serialized size of a value, excluding its tag.
fn value_size(value: &PropertyValue) -> u64 {
    match value {
        PropertyValue::Int(_) | PropertyValue::Float(_) | PropertyValue::Object(_) => 4,
        PropertyValue::Bool(_) => 1,
        PropertyValue::Name(_) => 8,
        PropertyValue::Str(s) => string_size(s),
        PropertyValue::Bytes(b) => compact::encoded_len(b.len() as u64) as u64 + b.len() as u64,
        PropertyValue::Bulk(bulk) => {
            let len = bulk.bytes().map_or(0, |b| b.len() as u64);
            4 + compact::encoded_len(bulk.element_count()) as u64
                + compact::encoded_len(bulk.element_size()) as u64
                + 8
                + len
        }
    }
}

/// `(name, kind:u8, size:compact, value)` tags terminated by `None`.
#[derive(Debug, Default)]
pub struct TaggedPropertyCodec;

impl TaggedPropertyCodec {
    fn read_value(kind: u8, fields: &mut dyn FieldReader) -> LinkResult<Option<PropertyValue>> {
        let value = match kind {
            KIND_INT => PropertyValue::Int(fields.archive().read_i32()),
            KIND_FLOAT => PropertyValue::Float(fields.archive().read_f32()),
            KIND_BOOL => PropertyValue::Bool(fields.archive().read_bool()),
            KIND_NAME => PropertyValue::Name(fields.read_name()),
            KIND_STR => PropertyValue::Str(fields.archive().read_string()),
            KIND_OBJECT => PropertyValue::Object(fields.read_object()?),
            KIND_BYTES => {
                let ar = fields.archive();
                let len = ar.read_compact_u64() as usize;
                PropertyValue::Bytes(ar.read_vec(len))
            }
            KIND_BULK => PropertyValue::Bulk(fields.read_bulk()),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

impl Serializable for TaggedPropertyCodec {
    fn load(&self, fields: &mut dyn FieldReader) -> LinkResult<FieldData> {
        let mut props = Vec::new();
        loop {
            let name = fields.read_name();
            if name.is_none() || fields.archive().is_error() {
                break;
            }
            let ar = fields.archive();
            let kind = ar.read_u8();
            let size = ar.read_compact_u64();
            let start = ar.tell();
            let end = start.saturating_add(size);
            if ar.is_error() || end > ar.total_size() {
                ar.set_error(&format!("property size {size} runs past end of archive"));
                break;
            }

            match Self::read_value(kind, fields)? {
                Some(value) => props.push(Property { name, value }),
                None => {
                    tracing::debug!(kind, size, "skipping property of unknown kind");
                }
            }

            let ar = fields.archive();
            if ar.tell() != end {
                if ar.tell() > end {
                    tracing::warn!(
                        kind,
                        declared = size,
                        consumed = ar.tell() - start,
                        "property overran its declared size"
                    );
                }
                ar.seek(end);
            }
        }
        Ok(FieldData::Properties(props))
    }

    fn save(&self, object: &Object, fields: &mut dyn FieldWriter) -> LinkResult<()> {
        if let FieldData::Properties(props) = &object.fields {
            for prop in props {
                fields.write_name(prop.name);
                let ar = fields.archive();
                ar.write_u8(kind_of(&prop.value));
                ar.write_compact_u64(value_size(&prop.value));
                match &prop.value {
                    PropertyValue::Int(v) => fields.archive().write_i32(*v),
                    PropertyValue::Float(v) => fields.archive().write_f32(*v),
                    PropertyValue::Bool(v) => fields.archive().write_bool(*v),
                    PropertyValue::Name(n) => fields.write_name(*n),
                    PropertyValue::Str(s) => fields.archive().write_string(s),
                    PropertyValue::Object(h) => fields.write_object(*h),
                    PropertyValue::Bytes(b) => {
                        let ar = fields.archive();
                        ar.write_compact_u64(b.len() as u64);
                        ar.write_bytes(b);
                    }
                    PropertyValue::Bulk(bulk) => fields.write_bulk(bulk)?,
                }
            }
        }
        fields.write_name(Name::NONE);
        Ok(())
    }
}

/// Keeps the payload verbatim.
#[derive(Debug, Default)]
pub struct RawCodec;

impl Serializable for RawCodec {
    fn load(&self, fields: &mut dyn FieldReader) -> LinkResult<FieldData> {
        let size = fields.payload_size() as usize;
        Ok(FieldData::Raw(fields.archive().read_vec(size)))
    }

    fn save(&self, object: &Object, fields: &mut dyn FieldWriter) -> LinkResult<()> {
        if let FieldData::Raw(bytes) = &object.fields {
            fields.archive().write_bytes(bytes);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Class-name keyed codec lookup.
#[derive(Clone)]
pub struct CodecRegistry {
    by_class: HashMap<NameId, Arc<dyn Serializable>>,
    fallback: Arc<dyn Serializable>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self {
            by_class: HashMap::new(),
            fallback: Arc::new(TaggedPropertyCodec),
        }
    }

    pub fn register(&mut self, class_name: NameId, codec: Arc<dyn Serializable>) {
        self.by_class.insert(class_name, codec);
    }

    pub fn set_fallback(&mut self, codec: Arc<dyn Serializable>) {
        self.fallback = codec;
    }

    pub fn get(&self, class_name: NameId) -> Option<Arc<dyn Serializable>> {
        self.by_class.get(&class_name).cloned()
    }

    /// Codec for instances of `class`: the first registered codec found
    /// walking `class` and its super chain, else the fallback.
    pub fn resolve(&self, objects: &ObjectArena, class: Option<ObjectHandle>) -> Arc<dyn Serializable> {
        let mut current = class;
        let mut steps = 0;
        while let Some(handle) = current {
            let Some(object) = objects.get(handle) else {
                break;
            };
            if let Some(codec) = self.by_class.get(&object.name.id) {
                return Arc::clone(codec);
            }
            steps += 1;
            if steps > objects.len() {
                tracing::warn!(class = %handle, "cycle in super chain");
                break;
            }
            current = object.super_struct;
        }
        Arc::clone(&self.fallback)
    }

    pub fn len(&self) -> usize {
        self.by_class.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_class.is_empty()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("registered", &self.by_class.len())
            .finish()
    }
}
