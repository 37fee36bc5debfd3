//! Dynamic values stored in item property maps.
//!
//! Backends are schema-less: a stored record is a flat map of property name
//! to [`Value`]. The enum deliberately stays close to what JSON can carry,
//! with a typed `DateTime` variant on top so casted temporal values survive
//! round trips without re-parsing.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw record as the backend stores it: property name to value.
///
/// Ordered map so debug output and natural-key derivation are deterministic.
pub type Record = BTreeMap<String, Value>;

/// A dynamically-typed property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    String(String),
    DateTime(DateTime<Utc>),
    Array(Vec<Value>),
}

impl Value {
    /// Whether this is the explicit null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Render the value as a lookup-key string, if it is scalar.
    ///
    /// Item identifiers are strings (see `KeyProvider`), while the raw
    /// foreign-key value in a record may be an integer or a string. Both
    /// sides are compared through this canonical form when indexing batch
    /// results by id.
    pub fn as_key(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Real(f) => Some(f.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::DateTime(dt) => Some(dt.to_rfc3339()),
            Value::Null | Value::Array(_) => None,
        }
    }

    /// Borrow the string content, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the array content, if any.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// JavaScript-style truthiness, used by BOOLEAN casting.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Real(f) => *f != 0.0 && !f.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::DateTime(_) | Value::Array(_) => true,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::String(s) => write!(f, "{s}"),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Real(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Real(f) => serde_json::Value::from(f),
            Value::String(s) => serde_json::Value::String(s),
            Value::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
        }
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = crate::error::DataError;

    /// JSON scalars and arrays map directly; nested objects are rejected
    /// because records are flat maps.
    fn try_from(v: serde_json::Value) -> Result<Self, Self::Error> {
        match v {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else {
                    Ok(Value::Real(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(s)),
            serde_json::Value::Array(items) => Ok(Value::Array(
                items.into_iter().map(Value::try_from).collect::<Result<_, _>>()?,
            )),
            serde_json::Value::Object(_) => Err(crate::error::DataError::validation(
                "nested objects are not valid record values",
            )),
        }
    }
}

/// Build a [`Record`] from a JSON object. Convenience for callers and tests.
pub fn record_from_json(json: serde_json::Value) -> crate::error::Result<Record> {
    match json {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| Ok((k, Value::try_from(v)?)))
            .collect(),
        _ => Err(crate::error::DataError::validation(
            "expected a JSON object for a record",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_form_matches_across_scalar_types() {
        assert_eq!(Value::Int(42).as_key().as_deref(), Some("42"));
        assert_eq!(Value::String("42".into()).as_key().as_deref(), Some("42"));
        assert_eq!(Value::Null.as_key(), None);
        assert_eq!(Value::Array(vec![]).as_key(), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Real(0.0).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        // Non-empty strings are truthy, including "0" and "false".
        assert!(Value::String("0".into()).is_truthy());
        assert!(Value::String("false".into()).is_truthy());
        assert!(Value::Array(vec![]).is_truthy());
    }

    #[test]
    fn test_record_from_json_rejects_nested_objects() {
        let err = record_from_json(serde_json::json!({"a": {"b": 1}}));
        assert!(err.is_err());
    }

    #[test]
    fn test_record_from_json_scalars() {
        let rec = record_from_json(serde_json::json!({
            "name": "ion",
            "age": 7,
            "tags": ["a", "b"]
        }))
        .unwrap();
        assert_eq!(rec.get("name"), Some(&Value::String("ion".into())));
        assert_eq!(rec.get("age"), Some(&Value::Int(7)));
        assert_eq!(
            rec.get("tags"),
            Some(&Value::Array(vec!["a".into(), "b".into()]))
        );
    }
}
