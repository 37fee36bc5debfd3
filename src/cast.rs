//! Value casting against declared property types.
//!
//! Raw input (user data, defaults, stored rows) is coerced to the declared
//! property type before it reaches the backend. Reference values are always
//! the target key's scalar form, never a nested object, so REFERENCE casting
//! recurses with the target class's key property.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::{DataError, Result};
use crate::meta::{MetaRegistry, PropertyMeta, PropertyType};
use crate::value::Value;

/// Cast `value` according to the property's declared type.
///
/// `Null` passes through unchanged for every type except BOOLEAN, where it
/// coerces to `false` like any other falsy value. Unrecognized combinations
/// pass through unchanged. Failures are [`DataError::Validation`].
pub fn cast_value(
    value: Value,
    pm: &PropertyMeta,
    namespace: Option<&str>,
    registry: &dyn MetaRegistry,
) -> Result<Value> {
    if pm.property_type == PropertyType::Reference {
        return cast_reference(value, pm, namespace, registry);
    }

    if value.is_null() && pm.property_type != PropertyType::Boolean {
        return Ok(value);
    }

    match pm.property_type {
        PropertyType::String | PropertyType::Text => Ok(value),
        PropertyType::Boolean => Ok(Value::Bool(cast_boolean(&value))),
        PropertyType::DateTime => cast_datetime(value, &pm.name),
        PropertyType::Int | PropertyType::Set => cast_int(value, &pm.name),
        PropertyType::Real | PropertyType::Decimal => cast_real(value, &pm.name),
        // GUID, COLLECTION and anything else pass through unchanged.
        _ => Ok(value),
    }
}

fn cast_reference(
    value: Value,
    pm: &PropertyMeta,
    namespace: Option<&str>,
    registry: &dyn MetaRegistry,
) -> Result<Value> {
    let Some(ref_class) = pm.ref_class.as_deref() else {
        return Ok(value);
    };
    let refc = registry
        .get_meta(ref_class, None, namespace)
        .ok_or_else(|| DataError::ClassNotFound(ref_class.to_string()))?;
    match refc.key_property().and_then(|k| refc.property_meta(k)) {
        Some(key_pm) => cast_value(value, key_pm, namespace, registry),
        None => Ok(value),
    }
}

/// The literal string "false" is false; everything else follows truthiness.
/// Note the consequence: the strings "0" and "FALSE" are true.
fn cast_boolean(value: &Value) -> bool {
    match value {
        Value::String(s) if s == "false" => false,
        other => other.is_truthy(),
    }
}

fn cast_datetime(value: Value, name: &str) -> Result<Value> {
    match value {
        Value::DateTime(_) => Ok(value),
        Value::Int(secs) => DateTime::<Utc>::from_timestamp(secs, 0)
            .map(Value::DateTime)
            .ok_or_else(|| {
                DataError::validation(format!("{name}: {secs} is out of range for a timestamp"))
            }),
        Value::String(ref s) => parse_datetime(s)
            .map(Value::DateTime)
            .ok_or_else(|| DataError::validation(format!("{name}: cannot parse '{s}' as a datetime"))),
        other => Err(DataError::validation(format!(
            "{name}: cannot cast {other:?} to a datetime"
        ))),
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

fn cast_int(value: Value, name: &str) -> Result<Value> {
    match value {
        Value::Int(_) => Ok(value),
        Value::Real(f) => Ok(Value::Int(f as i64)),
        Value::String(ref s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| DataError::validation(format!("{name}: cannot parse '{s}' as an integer"))),
        other => Err(DataError::validation(format!(
            "{name}: cannot cast {other:?} to an integer"
        ))),
    }
}

fn cast_real(value: Value, name: &str) -> Result<Value> {
    match value {
        Value::Real(_) => Ok(value),
        Value::Int(i) => Ok(Value::Real(i as f64)),
        Value::String(ref s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Real)
            .map_err(|_| DataError::validation(format!("{name}: cannot parse '{s}' as a number"))),
        other => Err(DataError::validation(format!(
            "{name}: cannot cast {other:?} to a number"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{ClassMeta, StaticMetaRegistry};
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn registry() -> StaticMetaRegistry {
        let mut reg = StaticMetaRegistry::default();
        reg.register(
            ClassMeta::new("Customer")
                .property(PropertyMeta::new("num", PropertyType::Int))
                .keys(&["num"]),
        );
        reg
    }

    fn pm(t: PropertyType) -> PropertyMeta {
        PropertyMeta::new("p", t)
    }

    #[test]
    fn test_boolean_false_string_quirk() {
        let reg = registry();
        let cast = |v: Value| cast_value(v, &pm(PropertyType::Boolean), None, &reg).unwrap();

        assert_eq!(cast(Value::String("false".into())), Value::Bool(false));
        // Truthiness, not parsing: "0", "FALSE" and any non-empty string are true.
        assert_eq!(cast(Value::String("0".into())), Value::Bool(true));
        assert_eq!(cast(Value::String("FALSE".into())), Value::Bool(true));
        assert_eq!(cast(Value::Int(0)), Value::Bool(false));
        assert_eq!(cast(Value::Int(3)), Value::Bool(true));
        assert_eq!(cast(Value::Null), Value::Bool(false));
    }

    #[test]
    fn test_reference_casts_with_target_key_type() {
        let reg = registry();
        let pm = PropertyMeta::reference("customer", "Customer");
        let out = cast_value(Value::String("42".into()), &pm, None, &reg).unwrap();
        assert_eq!(out, Value::Int(42));

        let err = cast_value(Value::String("abc".into()), &pm, None, &reg).unwrap_err();
        assert_matches!(err, DataError::Validation(_));
    }

    #[test]
    fn test_reference_to_unknown_class() {
        let reg = registry();
        let pm = PropertyMeta::reference("owner", "Nowhere");
        let err = cast_value(Value::Int(1), &pm, None, &reg).unwrap_err();
        assert_matches!(err, DataError::ClassNotFound(name) if name == "Nowhere");
    }

    #[test]
    fn test_datetime_parsing_forms() {
        let reg = registry();
        let cast = |v: Value| cast_value(v, &pm(PropertyType::DateTime), None, &reg);

        let expected = Utc.with_ymd_and_hms(2020, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(
            cast(Value::String("2020-05-01T12:30:00Z".into())).unwrap(),
            Value::DateTime(expected)
        );
        assert_eq!(
            cast(Value::String("2020-05-01T12:30:00".into())).unwrap(),
            Value::DateTime(expected)
        );
        assert_eq!(
            cast(Value::String("2020-05-01".into())).unwrap(),
            Value::DateTime(Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            cast(Value::Int(0)).unwrap(),
            Value::DateTime(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap())
        );
        assert_matches!(
            cast(Value::String("not a date".into())),
            Err(DataError::Validation(_))
        );
    }

    #[test]
    fn test_numeric_casts() {
        let reg = registry();
        assert_eq!(
            cast_value(Value::String(" 12 ".into()), &pm(PropertyType::Int), None, &reg).unwrap(),
            Value::Int(12)
        );
        assert_eq!(
            cast_value(Value::Real(3.9), &pm(PropertyType::Int), None, &reg).unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            cast_value(Value::String("2.5".into()), &pm(PropertyType::Decimal), None, &reg)
                .unwrap(),
            Value::Real(2.5)
        );
        // Strict string parsing: no JS-style "12abc" prefixes.
        assert_matches!(
            cast_value(Value::String("12abc".into()), &pm(PropertyType::Int), None, &reg),
            Err(DataError::Validation(_))
        );
    }

    #[test]
    fn test_null_and_string_passthrough() {
        let reg = registry();
        assert_eq!(
            cast_value(Value::Null, &pm(PropertyType::String), None, &reg).unwrap(),
            Value::Null
        );
        assert_eq!(
            cast_value(Value::Null, &pm(PropertyType::Int), None, &reg).unwrap(),
            Value::Null
        );
        assert_eq!(
            cast_value(Value::Int(5), &pm(PropertyType::Guid), None, &reg).unwrap(),
            Value::Int(5)
        );
    }
}
