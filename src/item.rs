//! Runtime item wrapper and the class-or-item parameter type.

use std::collections::HashMap;
use std::sync::Arc;

use crate::meta::ClassMeta;
use crate::value::{Record, Value};

/// A business object materialized from a stored record.
///
/// An Item owns its raw data and its enrichment maps for the duration of one
/// repository call; it shares its [`ClassMeta`] with the registry. Items are
/// never cached across calls; every read or write result wraps a fresh row.
#[derive(Debug, Clone)]
pub struct Item {
    id: String,
    base: Record,
    class: Arc<ClassMeta>,
    references: HashMap<String, Item>,
    collections: HashMap<String, Vec<Item>>,
}

impl Item {
    /// Build an item over a raw record. Both enrichment maps are created
    /// up front (empty) and only ever filled by the enrichment engine.
    pub fn new(id: String, base: Record, class: Arc<ClassMeta>) -> Self {
        Self {
            id,
            base,
            class,
            references: HashMap::new(),
            collections: HashMap::new(),
        }
    }

    /// The item's identity key as formed by the key provider.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn class_meta(&self) -> &Arc<ClassMeta> {
        &self.class
    }

    /// Raw stored value of a property, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.base.get(name)
    }

    /// The raw property map.
    pub fn base(&self) -> &Record {
        &self.base
    }

    /// Enriched single object behind a REFERENCE property. Absent when the
    /// property was not enriched or its target row did not exist.
    pub fn reference(&self, name: &str) -> Option<&Item> {
        self.references.get(name)
    }

    /// Enriched members of a COLLECTION property. Absent when the property
    /// was not enriched at all.
    pub fn collection(&self, name: &str) -> Option<&[Item]> {
        self.collections.get(name).map(Vec::as_slice)
    }

    pub(crate) fn set_reference(&mut self, name: &str, item: Item) {
        self.references.insert(name.to_string(), item);
    }

    pub(crate) fn set_collection(&mut self, name: &str, items: Vec<Item>) {
        self.collections.insert(name.to_string(), items);
    }
}

/// How a caller addresses a class on read operations: by name, or through an
/// existing item (which also narrows the result to that item's identity).
#[derive(Debug, Clone, Copy)]
pub enum ClassRef<'a> {
    Name(&'a str),
    Item(&'a Item),
}

impl<'a> From<&'a str> for ClassRef<'a> {
    fn from(name: &'a str) -> Self {
        ClassRef::Name(name)
    }
}

impl<'a> From<&'a Item> for ClassRef<'a> {
    fn from(item: &'a Item) -> Self {
        ClassRef::Item(item)
    }
}

/// A page of items from a list operation, optionally carrying the unpaged
/// total when `count_total` was requested.
#[derive(Debug, Clone, Default)]
pub struct ItemList {
    pub items: Vec<Item>,
    pub total: Option<u64>,
}

impl IntoIterator for ItemList {
    type Item = Item;
    type IntoIter = std::vec::IntoIter<Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
