//! The class metamodel consumed by the repository.
//!
//! Class and property metadata are long-lived, shared, and read-only from
//! the engine's point of view; the repository receives them through the
//! [`MetaRegistry`] trait and never mutates them. [`StaticMetaRegistry`]
//! is a ready-made registry over a fixed set of classes.

mod registry;

pub use registry::StaticMetaRegistry;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Declared type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyType {
    String,
    Text,
    Int,
    Real,
    Decimal,
    Boolean,
    DateTime,
    Guid,
    Set,
    Reference,
    Collection,
}

/// Metadata for a single property of a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyMeta {
    /// Property (attribute) name.
    pub name: String,
    /// Declared type.
    pub property_type: PropertyType,
    /// Target class name for REFERENCE properties.
    pub ref_class: Option<String>,
    /// Target item class name for COLLECTION properties.
    pub items_class: Option<String>,
    /// One-to-many: property on the target class holding this item's id.
    pub back_ref: Option<String>,
    /// Many-to-many: mirror collection property on the target class.
    pub back_coll: Option<String>,
    /// Whether the collection is resolved during enrichment.
    pub eager_loading: bool,
    /// Whether the value is generated on create.
    pub autoassigned: bool,
    /// Default applied on create when no value is supplied.
    pub default_value: Option<Value>,
}

impl PropertyMeta {
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            ref_class: None,
            items_class: None,
            back_ref: None,
            back_coll: None,
            eager_loading: false,
            autoassigned: false,
            default_value: None,
        }
    }

    /// Shorthand for a REFERENCE property targeting `class_name`.
    pub fn reference(name: impl Into<String>, class_name: impl Into<String>) -> Self {
        let mut pm = Self::new(name, PropertyType::Reference);
        pm.ref_class = Some(class_name.into());
        pm
    }

    /// Shorthand for a COLLECTION property of `items_class` items.
    pub fn collection(name: impl Into<String>, items_class: impl Into<String>) -> Self {
        let mut pm = Self::new(name, PropertyType::Collection);
        pm.items_class = Some(items_class.into());
        pm
    }

    pub fn back_ref(mut self, field: impl Into<String>) -> Self {
        self.back_ref = Some(field.into());
        self
    }

    pub fn back_coll(mut self, field: impl Into<String>) -> Self {
        self.back_coll = Some(field.into());
        self
    }

    pub fn eager(mut self) -> Self {
        self.eager_loading = true;
        self
    }

    pub fn autoassigned(mut self) -> Self {
        self.autoassigned = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// Metadata for a class of items.
///
/// Classes form single-inheritance chains via `ancestor`; all instances of a
/// chain share the root class's physical store and are discriminated by the
/// stored `_class` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMeta {
    name: String,
    namespace: Option<String>,
    version: String,
    ancestor: Option<Arc<ClassMeta>>,
    properties: Vec<PropertyMeta>,
    key_properties: Vec<String>,
}

impl ClassMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            version: "1".to_string(),
            ancestor: None,
            properties: Vec::new(),
            key_properties: Vec::new(),
        }
    }

    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn ancestor(mut self, ancestor: Arc<ClassMeta>) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    pub fn property(mut self, pm: PropertyMeta) -> Self {
        self.properties.push(pm);
        self
    }

    /// Declare the key property names. Order matters for composite keys.
    pub fn keys(mut self, names: &[&str]) -> Self {
        self.key_properties = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn get_version(&self) -> &str {
        &self.version
    }

    pub fn get_ancestor(&self) -> Option<&Arc<ClassMeta>> {
        self.ancestor.as_ref()
    }

    /// Canonical name: `namespace.name`, or the bare name when there is no
    /// namespace. This is the value stored in `_class`.
    pub fn canonical_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}.{}", self.name),
            None => self.name.clone(),
        }
    }

    /// The ultimate base of the inheritance chain. Polymorphic storage and
    /// discriminator filtering always target the root's physical store.
    pub fn root(&self) -> &ClassMeta {
        match &self.ancestor {
            Some(parent) => parent.root(),
            None => self,
        }
    }

    /// Ordered property metadata, own properties only.
    ///
    /// Inherited properties are expected to be repeated on descendants by the
    /// metamodel author (the registry serves fully materialized classes).
    pub fn properties(&self) -> &[PropertyMeta] {
        &self.properties
    }

    pub fn property_meta(&self, name: &str) -> Option<&PropertyMeta> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn key_properties(&self) -> &[String] {
        &self.key_properties
    }

    /// First (primary) key property name.
    pub fn key_property(&self) -> Option<&str> {
        self.key_properties.first().map(String::as_str)
    }

    /// Whether `other` appears in this class's ancestor chain.
    pub fn descends_from(&self, other: &ClassMeta) -> bool {
        let mut current = self.ancestor.as_deref();
        while let Some(cm) = current {
            if cm.name == other.name && cm.namespace == other.namespace {
                return true;
            }
            current = cm.ancestor.as_deref();
        }
        false
    }
}

/// Read-only registry of class metadata.
///
/// Implementations must tolerate concurrent reads without locking visible to
/// callers; the repository holds the registry behind an `Arc` and queries it
/// on every operation.
pub trait MetaRegistry: Send + Sync {
    /// Look up a class by name, optionally pinned to a version/namespace.
    fn get_meta(
        &self,
        name: &str,
        version: Option<&str>,
        namespace: Option<&str>,
    ) -> Option<Arc<ClassMeta>>;

    /// List registered descendants of a class (same namespace/version
    /// lineage). `include_self` adds the class itself to the result.
    fn list_meta(
        &self,
        name: &str,
        version: Option<&str>,
        include_self: bool,
        namespace: Option<&str>,
    ) -> Vec<Arc<ClassMeta>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_walks_ancestor_chain() {
        let base = Arc::new(ClassMeta::new("Order").keys(&["id"]));
        let mid = Arc::new(ClassMeta::new("RushOrder").ancestor(base.clone()));
        let leaf = ClassMeta::new("SameDayOrder").ancestor(mid.clone());

        assert_eq!(leaf.root().get_name(), "Order");
        assert_eq!(base.root().get_name(), "Order");
        assert!(leaf.descends_from(&base));
        assert!(leaf.descends_from(&mid));
        assert!(!base.descends_from(&leaf));
    }

    #[test]
    fn test_canonical_name_with_namespace() {
        let cm = ClassMeta::new("Order").namespace("sales");
        assert_eq!(cm.canonical_name(), "sales.Order");
        assert_eq!(ClassMeta::new("Order").canonical_name(), "Order");
    }

    #[test]
    fn test_property_builders() {
        let pm = PropertyMeta::collection("employees", "Employee")
            .back_ref("dept_id")
            .eager();
        assert_eq!(pm.property_type, PropertyType::Collection);
        assert_eq!(pm.items_class.as_deref(), Some("Employee"));
        assert_eq!(pm.back_ref.as_deref(), Some("dept_id"));
        assert!(pm.eager_loading);
        assert!(!pm.autoassigned);
    }
}
