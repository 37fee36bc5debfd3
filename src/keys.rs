//! Identity key formation and parsing.
//!
//! The repository never interprets identifiers itself; it delegates to a
//! [`KeyProvider`] to turn rows into string keys and keys back into
//! backend-native lookup conditions. [`MetaKeyProvider`] is the standard
//! implementation over the class metamodel's declared key properties.

use std::sync::Arc;

use crate::cast::cast_value;
use crate::error::{DataError, Result};
use crate::meta::MetaRegistry;
use crate::value::{Record, Value};

/// Separator between components of a composite key.
const KEY_SEPARATOR: char = '|';

/// Forms and parses item identity keys.
pub trait KeyProvider: Send + Sync {
    /// Form the string key of a stored row, or `None` when key fields are
    /// missing from the row.
    fn form_key(&self, class_name: &str, row: &Record, namespace: Option<&str>) -> Option<String>;

    /// Turn a string key into backend lookup conditions, casting each
    /// component to its declared property type.
    fn key_to_conditions(
        &self,
        class_name: &str,
        id: &str,
        namespace: Option<&str>,
    ) -> Result<Record>;

    /// Extract the natural-key conditions from an update set (used by
    /// upsert when the caller supplies no id).
    fn key_data(&self, class_name: &str, data: &Record, namespace: Option<&str>) -> Record;
}

/// [`KeyProvider`] driven by the metamodel's key property declarations.
pub struct MetaKeyProvider {
    registry: Arc<dyn MetaRegistry>,
}

impl MetaKeyProvider {
    pub fn new(registry: Arc<dyn MetaRegistry>) -> Self {
        Self { registry }
    }
}

impl KeyProvider for MetaKeyProvider {
    fn form_key(&self, class_name: &str, row: &Record, namespace: Option<&str>) -> Option<String> {
        let cm = self.registry.get_meta(class_name, None, namespace)?;
        let mut parts = Vec::with_capacity(cm.key_properties().len());
        for name in cm.key_properties() {
            parts.push(row.get(name)?.as_key()?);
        }
        if parts.is_empty() {
            return None;
        }
        Some(parts.join(&KEY_SEPARATOR.to_string()))
    }

    fn key_to_conditions(
        &self,
        class_name: &str,
        id: &str,
        namespace: Option<&str>,
    ) -> Result<Record> {
        let cm = self
            .registry
            .get_meta(class_name, None, namespace)
            .ok_or_else(|| DataError::ClassNotFound(class_name.to_string()))?;
        let key_props = cm.key_properties();
        if key_props.is_empty() {
            return Err(DataError::validation(format!(
                "class {class_name} declares no key properties"
            )));
        }

        let parts: Vec<&str> = if key_props.len() == 1 {
            vec![id]
        } else {
            id.split(KEY_SEPARATOR).collect()
        };
        if parts.len() != key_props.len() {
            return Err(DataError::validation(format!(
                "identifier '{id}' does not match the {} key properties of {class_name}",
                key_props.len()
            )));
        }

        let mut conditions = Record::new();
        for (name, raw) in key_props.iter().zip(parts) {
            let pm = cm.property_meta(name).ok_or_else(|| {
                DataError::validation(format!("key property {name} is not declared on {class_name}"))
            })?;
            let value = cast_value(
                Value::String(raw.to_string()),
                pm,
                namespace,
                self.registry.as_ref(),
            )?;
            conditions.insert(name.clone(), value);
        }
        Ok(conditions)
    }

    fn key_data(&self, class_name: &str, data: &Record, namespace: Option<&str>) -> Record {
        let Some(cm) = self.registry.get_meta(class_name, None, namespace) else {
            return Record::new();
        };
        cm.key_properties()
            .iter()
            .filter_map(|name| data.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }
}
