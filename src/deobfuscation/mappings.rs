//! Accumulated rename mappings.
//!
//! Passes and callers that recover names record them here. The store is concurrent and
//! *first-writer-wins*: once a class, field or method has a mapping, later attempts to rename
//! it are ignored and reported as such, which makes repeated recording idempotent no matter
//! which worker gets there first.

use dashmap::{mapref::entry::Entry, DashMap};

use crate::assembly::{MemberRef, MethodKey};

/// Concurrent class, field and method rename mappings.
#[derive(Debug, Default)]
pub struct RenameMappings {
    classes: DashMap<String, String>,
    fields: DashMap<MemberRef, String>,
    methods: DashMap<MethodKey, String>,
}

/// Inserts `value` unless `key` already has a mapping. Returns `true` if inserted.
fn insert_first<K: Eq + std::hash::Hash>(map: &DashMap<K, String>, key: K, value: String) -> bool {
    match map.entry(key) {
        Entry::Occupied(_) => false,
        Entry::Vacant(slot) => {
            slot.insert(value);
            true
        }
    }
}

impl RenameMappings {
    /// Creates an empty mapping set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps the class `from` to `to`. Returns `false` if `from` was already mapped.
    pub fn add_class_rename(&self, from: impl Into<String>, to: impl Into<String>) -> bool {
        insert_first(&self.classes, from.into(), to.into())
    }

    /// Maps the field `owner.name:desc` to `to`. Returns `false` if it was already mapped.
    pub fn add_field_rename(&self, owner: &str, name: &str, desc: &str, to: impl Into<String>) -> bool {
        insert_first(&self.fields, MemberRef::new(owner, name, desc), to.into())
    }

    /// Maps the method `owner.name desc` to `to`. Returns `false` if it was already mapped.
    pub fn add_method_rename(&self, owner: &str, name: &str, desc: &str, to: impl Into<String>) -> bool {
        insert_first(&self.methods, MethodKey::new(owner, name, desc), to.into())
    }

    /// The new name of a class.
    #[must_use]
    pub fn class_name(&self, class: &str) -> Option<String> {
        self.classes.get(class).map(|e| e.value().clone())
    }

    /// The new name of a field.
    #[must_use]
    pub fn field_name(&self, owner: &str, name: &str, desc: &str) -> Option<String> {
        self.fields
            .get(&MemberRef::new(owner, name, desc))
            .map(|e| e.value().clone())
    }

    /// The new name of a method.
    #[must_use]
    pub fn method_name(&self, key: &MethodKey) -> Option<String> {
        self.methods.get(key).map(|e| e.value().clone())
    }

    /// Total number of mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len() + self.fields.len() + self.methods.len()
    }

    /// Returns `true` if nothing has been mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Class mappings sorted by original name.
    #[must_use]
    pub fn classes(&self) -> Vec<(String, String)> {
        let mut out: Vec<_> = self
            .classes
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        out.sort();
        out
    }
}
