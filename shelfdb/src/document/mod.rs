// Document values: ids, references and dotted-path access

pub mod builder;

use crate::error::{Result, ShelfError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub use builder::{BuildMode, DocumentBuilder, PendingWrite};

/// A stored document: an ordered field map that always carries an `id`.
pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "id";
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const REF_COLLECTION: &str = "collection";
pub const REF_ID: &str = "$ref";

/// Identifier of a document within its collection's id space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocId {
    Int(u64),
    Str(String),
}

impl DocId {
    /// Read an id from a JSON value; only positive integers and non-empty strings qualify.
    pub fn from_value(value: &Value) -> Option<DocId> {
        match value {
            Value::Number(n) => n.as_u64().filter(|n| *n > 0).map(DocId::Int),
            Value::String(s) if !s.is_empty() => Some(DocId::Str(s.clone())),
            _ => None,
        }
    }

    /// Accepts a raw id or an object carrying an `id` field.
    pub fn from_id_or_object(value: &Value) -> Option<DocId> {
        match value {
            Value::Object(map) => map.get(ID_FIELD).and_then(DocId::from_value),
            other => DocId::from_value(other),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DocId::Int(n) => Value::from(*n),
            DocId::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocId::Int(n) => write!(f, "{n}"),
            DocId::Str(s) => f.write_str(s),
        }
    }
}

impl From<u64> for DocId {
    fn from(n: u64) -> Self {
        DocId::Int(n)
    }
}

impl From<&str> for DocId {
    fn from(s: &str) -> Self {
        DocId::Str(s.to_string())
    }
}

/// The id of a stored document.
pub fn document_id(doc: &Document) -> Result<DocId> {
    doc.get(ID_FIELD)
        .and_then(DocId::from_value)
        .ok_or_else(|| ShelfError::validation(ID_FIELD, "document has no valid id"))
}

/// Build the `{collection, $ref}` value stored in reference fields.
pub fn reference(collection: &str, id: &DocId) -> Value {
    let mut map = Map::new();
    map.insert(REF_COLLECTION.into(), Value::String(collection.to_string()));
    map.insert(REF_ID.into(), id.to_value());
    Value::Object(map)
}

/// The `$ref` id of a reference value, if the value is one.
pub fn reference_id(value: &Value) -> Option<DocId> {
    value.as_object()?.get(REF_ID).and_then(DocId::from_value)
}

/// Look up a dotted path. Array elements are addressed by index, and `length`
/// yields the size of an array or string that has no such key.
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<std::borrow::Cow<'a, Value>> {
    use std::borrow::Cow;

    let mut current = Cow::Borrowed(doc);
    for segment in path.split('.') {
        let next = match current {
            Cow::Borrowed(value) => match value {
                Value::Object(map) => map.get(segment).map(Cow::Borrowed),
                Value::Array(items) => match segment.parse::<usize>() {
                    Ok(index) => items.get(index).map(Cow::Borrowed),
                    Err(_) if segment == "length" => Some(Cow::Owned(Value::from(items.len()))),
                    Err(_) => None,
                },
                Value::String(s) if segment == "length" => {
                    Some(Cow::Owned(Value::from(s.chars().count())))
                }
                _ => None,
            },
            // Only a computed length can be owned, and nothing lies below a number.
            Cow::Owned(_) => None,
        };
        current = next?;
    }
    Some(current)
}

/// Structural equality that treats `1` and `1.0` as the same number.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map_or(false, |y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Describe the JSON type of a value for error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_doc_id_from_value() {
        assert_eq!(DocId::from_value(&json!(3)), Some(DocId::Int(3)));
        assert_eq!(DocId::from_value(&json!("ab12")), Some(DocId::Str("ab12".into())));
        assert_eq!(DocId::from_value(&json!(0)), None);
        assert_eq!(DocId::from_value(&json!(-2)), None);
        assert_eq!(DocId::from_value(&json!(1.5)), None);
        assert_eq!(DocId::from_id_or_object(&json!({ "id": 9 })), Some(DocId::Int(9)));
    }

    #[test]
    fn test_doc_id_serializes_untagged() {
        assert_eq!(serde_json::to_value(DocId::Int(4)).unwrap(), json!(4));
        assert_eq!(serde_json::to_value(DocId::from("x")).unwrap(), json!("x"));
    }

    #[test]
    fn test_get_path() {
        let doc = json!({
            "name": "Tom",
            "address": { "city": "Oslo" },
            "tags": [10, 20, 30],
            "length": 5,
        });
        assert_eq!(get_path(&doc, "address.city").unwrap().as_ref(), &json!("Oslo"));
        assert_eq!(get_path(&doc, "tags.1").unwrap().as_ref(), &json!(20));
        assert_eq!(get_path(&doc, "tags.length").unwrap().as_ref(), &json!(3));
        assert_eq!(get_path(&doc, "name.length").unwrap().as_ref(), &json!(3));
        // A real key wins over the pseudo field.
        assert_eq!(get_path(&doc, "length").unwrap().as_ref(), &json!(5));
        assert!(get_path(&doc, "address.zip").is_none());
        assert!(get_path(&doc, "tags.length.x").is_none());
    }

    #[test]
    fn test_values_equal_normalizes_numbers() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!({ "a": [1, 2] }), &json!({ "a": [1.0, 2] })));
        assert!(!values_equal(&json!({ "a": 1 }), &json!({ "a": 1, "b": 2 })));
    }

    #[test]
    fn test_reference_helpers() {
        let value = reference("groups", &DocId::Int(1));
        assert_eq!(value, json!({ "collection": "groups", "$ref": 1 }));
        assert_eq!(reference_id(&value), Some(DocId::Int(1)));
    }
}
