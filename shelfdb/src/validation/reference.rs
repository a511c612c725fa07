use super::id::IdAllocator;
use crate::document::{reference, type_name, REF_COLLECTION, REF_ID};
use crate::error::{Result, ShelfError};
use serde_json::Value;

/// Whether a value is meant as a reference (an object carrying `$ref`).
pub fn is_reference_shape(value: &Value) -> bool {
    value
        .as_object()
        .map_or(false, |map| map.contains_key(REF_ID))
}

/// Validate a `{collection, $ref}` value against the target collection's id space.
///
/// The object must hold exactly those two keys, name the declared collection, and
/// point at an id that exists (or was claimed earlier in the same operation).
pub fn validate_reference(field: &str, value: &Value, target: &IdAllocator) -> Result<Value> {
    let map = value.as_object().ok_or_else(|| {
        ShelfError::type_error(
            field,
            format!("expected a reference object, got {}", type_name(value)),
        )
    })?;

    let shaped = map.len() == 2 && map.contains_key(REF_COLLECTION) && map.contains_key(REF_ID);
    if !shaped {
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        return Err(ShelfError::type_error(
            field,
            format!(
                "a reference must be exactly {{collection, $ref}}, got keys [{}]",
                keys.join(", ")
            ),
        ));
    }

    match map.get(REF_COLLECTION).and_then(Value::as_str) {
        Some(collection) if collection == target.collection() => {}
        Some(collection) => {
            return Err(ShelfError::validation(
                field,
                format!(
                    "reference points at '{collection}', expected '{}'",
                    target.collection()
                ),
            ))
        }
        None => {
            return Err(ShelfError::type_error(
                field,
                "reference 'collection' must be a collection name",
            ))
        }
    }

    let ref_field = format!("{field}.{REF_ID}");
    let id = target.validate(&ref_field, &map[REF_ID], true)?;
    Ok(reference(target.collection(), &id))
}
