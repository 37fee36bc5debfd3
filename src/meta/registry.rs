//! In-memory metadata registry over a fixed class set.

use std::sync::Arc;

use super::{ClassMeta, MetaRegistry};

/// A [`MetaRegistry`] serving a fixed, fully-built set of classes.
///
/// Suitable for tests and for applications whose metamodel is assembled at
/// startup. Lookups are plain scans over an immutable vector, so concurrent
/// reads need no locking.
#[derive(Debug, Default)]
pub struct StaticMetaRegistry {
    classes: Vec<Arc<ClassMeta>>,
}

impl StaticMetaRegistry {
    pub fn new(classes: Vec<Arc<ClassMeta>>) -> Self {
        Self { classes }
    }

    /// Register a class, returning the shared handle for use as an ancestor
    /// of later registrations.
    pub fn register(&mut self, cm: ClassMeta) -> Arc<ClassMeta> {
        let cm = Arc::new(cm);
        self.classes.push(cm.clone());
        cm
    }

    fn matches(cm: &ClassMeta, name: &str, version: Option<&str>, namespace: Option<&str>) -> bool {
        // Callers may address a class by bare or canonical name.
        let name_ok = cm.get_name() == name || cm.canonical_name() == name;
        let version_ok = version.is_none_or(|v| cm.get_version() == v);
        let ns_ok = namespace.is_none() || cm.get_namespace() == namespace;
        name_ok && version_ok && ns_ok
    }
}

impl MetaRegistry for StaticMetaRegistry {
    fn get_meta(
        &self,
        name: &str,
        version: Option<&str>,
        namespace: Option<&str>,
    ) -> Option<Arc<ClassMeta>> {
        self.classes
            .iter()
            .find(|cm| Self::matches(cm, name, version, namespace))
            .cloned()
    }

    fn list_meta(
        &self,
        name: &str,
        version: Option<&str>,
        include_self: bool,
        namespace: Option<&str>,
    ) -> Vec<Arc<ClassMeta>> {
        let Some(target) = self.get_meta(name, version, namespace) else {
            return Vec::new();
        };
        let mut result = Vec::new();
        if include_self {
            result.push(target.clone());
        }
        for cm in &self.classes {
            if cm.descends_from(&target) {
                result.push(cm.clone());
            }
        }
        result
    }
}
