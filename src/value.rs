//! Typed document values
//!
//! Raw store documents are decoded into [`FieldValue`] as soon as they are
//! read, so nothing past the store boundary handles untyped JSON. Extended
//! JSON wrappers (`$oid`, `$date`, `$numberLong`, ...) are unwrapped here.

use crate::config::DataType;
use crate::formats;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A decoded document: field name to value, in key order
pub type Document = BTreeMap<String, FieldValue>;

/// Date rendering used for every exported date cell
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Identifier of a document in some collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefId(pub String);

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One field value inside a document
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    String(String),
    Number(f64),
    Boolean(bool),
    Date(DateTime<Utc>),
    Reference(RefId),
    Object(Document),
    Array(Vec<FieldValue>),
}

impl FieldValue {
    /// Decode a JSON value, unwrapping extended JSON markers
    pub fn from_json(value: &Value) -> FieldValue {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Boolean(*b),
            Value::Number(n) => n.as_f64().map(FieldValue::Number).unwrap_or(FieldValue::Null),
            Value::String(s) => FieldValue::String(s.clone()),
            Value::Array(items) => FieldValue::Array(items.iter().map(FieldValue::from_json).collect()),
            Value::Object(map) => {
                if let Some(special) = decode_extended(map) {
                    return special;
                }
                FieldValue::Object(document_from_map(map))
            }
        }
    }

    /// Null, blank, the literal string "null", or an empty array
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::String(s) => {
                let trimmed = s.trim();
                trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null")
            }
            FieldValue::Array(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Storage kind of this value, before any string-shape refinement
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            FieldValue::Null => None,
            FieldValue::String(_) => Some(DataType::String),
            FieldValue::Number(_) => Some(DataType::Number),
            FieldValue::Boolean(_) => Some(DataType::Boolean),
            FieldValue::Date(_) => Some(DataType::Date),
            FieldValue::Reference(_) => Some(DataType::Reference),
            FieldValue::Object(_) => Some(DataType::Object),
            FieldValue::Array(_) => Some(DataType::Array),
        }
    }

    /// Key used for identifier and foreign-key lookups
    ///
    /// Object ids and plain strings with the same text produce the same key.
    pub fn key_string(&self) -> Option<String> {
        match self {
            FieldValue::String(s) if !s.is_empty() => Some(s.clone()),
            FieldValue::Reference(id) => Some(id.0.clone()),
            FieldValue::Number(n) => Some(format_number(*n)),
            FieldValue::Boolean(b) => Some(b.to_string()),
            FieldValue::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
            _ => None,
        }
    }

    /// Cell text for this value
    pub fn render(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::String(s) => s.clone(),
            FieldValue::Number(n) => format_number(*n),
            FieldValue::Boolean(b) => b.to_string(),
            FieldValue::Date(d) => d.format(DATE_FORMAT).to_string(),
            FieldValue::Reference(id) => id.0.clone(),
            FieldValue::Object(_) | FieldValue::Array(_) => self.to_json().to_string(),
        }
    }

    /// Numeric view, parsing numeric strings
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    /// Date view, parsing ISO date strings
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Date(d) => Some(*d),
            FieldValue::String(s) => formats::parse_datetime(s),
            _ => None,
        }
    }

    /// Re-encode as plain JSON
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Number(n) => {
                if is_integral(*n) {
                    Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null)
                }
            }
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
            FieldValue::Reference(id) => Value::String(id.0.clone()),
            FieldValue::Object(doc) => Value::Object(
                doc.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            FieldValue::Array(items) => Value::Array(items.iter().map(FieldValue::to_json).collect()),
        }
    }
}

/// Decode a top-level JSON document; `None` when the value is not an object
pub fn document_from_json(value: &Value) -> Option<Document> {
    value.as_object().map(document_from_map)
}

fn document_from_map(map: &Map<String, Value>) -> Document {
    map.iter()
        .map(|(key, value)| (key.clone(), FieldValue::from_json(value)))
        .collect()
}

/// Identifier key of a document (`_id`)
pub fn document_id(doc: &Document) -> Option<String> {
    doc.get("_id").and_then(FieldValue::key_string)
}

/// Follow a dotted path through nested objects
///
/// Arrays are not traversed; callers that fan out over arrays walk segments
/// themselves.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a FieldValue> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        match current {
            FieldValue::Object(inner) => current = inner.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

fn decode_extended(map: &Map<String, Value>) -> Option<FieldValue> {
    if map.len() != 1 {
        return None;
    }
    let (key, inner) = map.iter().next()?;
    match key.as_str() {
        "$oid" => inner.as_str().map(|s| FieldValue::Reference(RefId(s.to_string()))),
        "$date" => decode_date(inner).map(FieldValue::Date),
        "$numberLong" | "$numberInt" | "$numberDouble" | "$numberDecimal" => inner
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .or_else(|| inner.as_f64())
            .map(FieldValue::Number),
        _ => None,
    }
}

fn decode_date(inner: &Value) -> Option<DateTime<Utc>> {
    match inner {
        Value::String(s) => formats::parse_datetime(s),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::Object(map) => map
            .get("$numberLong")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn is_integral(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15
}

/// Render a number, dropping the fractional part of whole numbers
pub fn format_number(n: f64) -> String {
    if is_integral(n) {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extended_json_decoding() {
        let doc = document_from_json(&json!({
            "_id": {"$oid": "5f1d7c2e9b1e8a3d4c5b6a79"},
            "createdAt": {"$date": "2024-01-15T10:30:00Z"},
            "legacyDate": {"$date": {"$numberLong": "0"}},
            "views": {"$numberLong": "42"},
            "nested": {"a": 1}
        }))
        .unwrap();

        assert_eq!(
            doc["_id"],
            FieldValue::Reference(RefId("5f1d7c2e9b1e8a3d4c5b6a79".to_string()))
        );
        assert_eq!(doc["createdAt"].render(), "2024-01-15 10:30:00");
        assert_eq!(doc["legacyDate"].render(), "1970-01-01 00:00:00");
        assert_eq!(doc["views"], FieldValue::Number(42.0));
        assert!(matches!(doc["nested"], FieldValue::Object(_)));
        assert_eq!(document_id(&doc).as_deref(), Some("5f1d7c2e9b1e8a3d4c5b6a79"));
    }

    #[test]
    fn test_empty_values() {
        assert!(FieldValue::Null.is_empty());
        assert!(FieldValue::String("  ".to_string()).is_empty());
        assert!(FieldValue::String("NULL".to_string()).is_empty());
        assert!(FieldValue::Array(vec![]).is_empty());
        assert!(!FieldValue::Number(0.0).is_empty());
        assert!(!FieldValue::Boolean(false).is_empty());
    }

    #[test]
    fn test_render_numbers() {
        assert_eq!(FieldValue::Number(3.0).render(), "3");
        assert_eq!(FieldValue::Number(2.5).render(), "2.5");
        assert_eq!(FieldValue::Number(-7.0).render(), "-7");
    }

    #[test]
    fn test_lookup_nested_path() {
        let doc = document_from_json(&json!({
            "realmData": {"ownerAgent": {"fullName": "Ada"}},
            "tags": ["x"]
        }))
        .unwrap();

        assert_eq!(
            lookup(&doc, "realmData.ownerAgent.fullName"),
            Some(&FieldValue::String("Ada".to_string()))
        );
        assert_eq!(lookup(&doc, "realmData.missing"), None);
        assert_eq!(lookup(&doc, "tags.0"), None);
    }

    #[test]
    fn test_object_render_is_compact_json() {
        let value = FieldValue::from_json(&json!({"b": 2, "a": "x"}));
        assert_eq!(value.render(), r#"{"a":"x","b":2}"#);
    }
}
