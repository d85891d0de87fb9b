//! Per-class replicated field ordering.
//!
//! A [`ClassNetCache`] lists every replicated field of a class, inherited
//! fields first, and numbers them densely. The numbers go on the wire, so a
//! cache never changes once built.

use std::collections::HashMap;
use std::sync::Arc;

use pkl_linker::{LinkerContext, ObjectHandle};

/// One replicated field as declared by a class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicatedField {
    pub name: String,
    /// Fields naming the same condition are replicated together.
    pub condition: Option<String>,
}

impl ReplicatedField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            condition: None,
        }
    }

    #[must_use]
    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// Source of replicated field declarations.
pub trait ReplicationLayout: Send + Sync {
    /// Fields declared by `class` itself, in declaration order. Inherited
    /// fields are not included.
    fn declared_fields(&self, ctx: &LinkerContext, class: ObjectHandle) -> Vec<ReplicatedField>;
}

/// Layout declared up front, keyed by class name.
#[derive(Clone, Debug, Default)]
pub struct StaticLayout {
    classes: HashMap<String, Vec<ReplicatedField>>,
}

impl StaticLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the replicated fields of the class named `class`, replacing
    /// any earlier declaration.
    pub fn declare(&mut self, class: &str, fields: Vec<ReplicatedField>) {
        self.classes.insert(class.to_ascii_lowercase(), fields);
    }

    #[must_use]
    pub fn with(mut self, class: &str, fields: Vec<ReplicatedField>) -> Self {
        self.declare(class, fields);
        self
    }
}

impl ReplicationLayout for StaticLayout {
    fn declared_fields(&self, ctx: &LinkerContext, class: ObjectHandle) -> Vec<ReplicatedField> {
        let Some(object) = ctx.objects().get(class) else {
            return Vec::new();
        };
        let name = ctx.names().text_or_invalid(object.name.id).to_ascii_lowercase();
        self.classes.get(&name).cloned().unwrap_or_default()
    }
}

/// A replicated field with its connection-wide position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldNetEntry {
    pub name: String,
    pub index: u32,
    /// Class that declared the field.
    pub owner: ObjectHandle,
    pub group: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConditionGroup {
    pub condition: String,
    /// Field indices, ascending.
    pub fields: Vec<u32>,
}

#[derive(Debug)]
pub struct ClassNetCache {
    class: ObjectHandle,
    super_cache: Option<Arc<ClassNetCache>>,
    fields: Vec<FieldNetEntry>,
    groups: Vec<ConditionGroup>,
    by_name: HashMap<String, u32>,
}

impl ClassNetCache {
    pub(crate) fn build(
        class: ObjectHandle,
        super_cache: Option<Arc<ClassNetCache>>,
        declared: Vec<ReplicatedField>,
    ) -> Self {
        let (mut fields, mut groups, mut by_name) = match &super_cache {
            Some(sup) => (sup.fields.clone(), sup.groups.clone(), sup.by_name.clone()),
            None => (Vec::new(), Vec::new(), HashMap::new()),
        };

        for field in declared {
            let key = field.name.to_ascii_lowercase();
            if by_name.contains_key(&key) {
                tracing::warn!(class = %class, field = %field.name, "replicated field declared twice, keeping the first");
                continue;
            }
            let index = fields.len() as u32;
            let group = field.condition.map(|condition| {
                let position = groups
                    .iter()
                    .position(|g: &ConditionGroup| g.condition.eq_ignore_ascii_case(&condition));
                let position = position.unwrap_or_else(|| {
                    groups.push(ConditionGroup {
                        condition,
                        fields: Vec::new(),
                    });
                    groups.len() - 1
                });
                groups[position].fields.push(index);
                position
            });
            by_name.insert(key, index);
            fields.push(FieldNetEntry {
                name: field.name,
                index,
                owner: class,
                group,
            });
        }

        Self {
            class,
            super_cache,
            fields,
            groups,
            by_name,
        }
    }

    pub fn class(&self) -> ObjectHandle {
        self.class
    }

    pub fn super_cache(&self) -> Option<&Arc<ClassNetCache>> {
        self.super_cache.as_ref()
    }

    /// Every replicated field, inherited ones first.
    pub fn fields(&self) -> &[FieldNetEntry] {
        &self.fields
    }

    pub fn field(&self, index: u32) -> Option<&FieldNetEntry> {
        self.fields.get(index as usize)
    }

    /// Case-insensitive lookup by field name.
    pub fn field_index(&self, name: &str) -> Option<u32> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn groups(&self) -> &[ConditionGroup] {
        &self.groups
    }

    /// The condition group a field belongs to, if any.
    pub fn group_of(&self, index: u32) -> Option<&ConditionGroup> {
        self.field(index)?.group.and_then(|g| self.groups.get(g))
    }

    /// Number of fields declared by ancestors.
    pub fn inherited_count(&self) -> usize {
        self.super_cache.as_ref().map_or(0, |s| s.len())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(i: u32) -> ObjectHandle {
        ObjectHandle::from_index(i)
    }

    #[test]
    fn inherited_fields_come_first() {
        let base = Arc::new(ClassNetCache::build(
            handle(1),
            None,
            vec![ReplicatedField::new("Location"), ReplicatedField::new("Rotation")],
        ));
        let derived = ClassNetCache::build(handle(2), Some(base.clone()), vec![ReplicatedField::new("Health")]);

        let names: Vec<_> = derived.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["Location", "Rotation", "Health"]);
        assert_eq!(derived.inherited_count(), 2);
        assert_eq!(derived.field(0).unwrap().owner, handle(1));
        assert_eq!(derived.field(2).unwrap().owner, handle(2));
        // The ancestor cache is untouched.
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn fields_sharing_a_condition_share_a_group() {
        let cache = ClassNetCache::build(
            handle(1),
            None,
            vec![
                ReplicatedField::new("Health").when("bOwnerOnly"),
                ReplicatedField::new("Location"),
                ReplicatedField::new("Ammo").when("bOwnerOnly"),
                ReplicatedField::new("Team").when("bInitial"),
            ],
        );
        assert_eq!(cache.groups().len(), 2);
        assert_eq!(cache.groups()[0].fields, vec![0, 2]);
        assert_eq!(cache.group_of(3).unwrap().condition, "bInitial");
        assert!(cache.group_of(1).is_none());
    }

    #[test]
    fn subclass_joins_inherited_group() {
        let base = Arc::new(ClassNetCache::build(
            handle(1),
            None,
            vec![ReplicatedField::new("Health").when("bOwnerOnly")],
        ));
        let derived = ClassNetCache::build(handle(2), Some(base), vec![ReplicatedField::new("Shield").when("BOWNERONLY")]);
        assert_eq!(derived.groups().len(), 1);
        assert_eq!(derived.groups()[0].fields, vec![0, 1]);
    }

    #[test]
    fn duplicate_field_keeps_first_position() {
        let cache = ClassNetCache::build(
            handle(1),
            None,
            vec![ReplicatedField::new("Health"), ReplicatedField::new("health")],
        );
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.field_index("HEALTH"), Some(0));
        assert_eq!(cache.field_index("Armor"), None);
    }
}
