//! Mutations of one array field of a stored document.
//!
//! Each operation takes the current elements and returns the new ones according
//! to the field's element kind. The result is then re-validated by the document
//! builder as an ordinary update of that field, so element types, references and
//! embedded documents go through the same checks as a direct write.

pub mod matcher;

pub use matcher::{ArrayMatcher, ElementTransform};

use crate::document::builder::collapse_duplicates;
use crate::document::{reference, reference_id, type_name, values_equal, DocId, Document, ID_FIELD};
use crate::error::{Result, ShelfError};
use crate::query::{Expr, Literal, Operator};
use crate::schema::{ArrayEmbed, IdKind, SchemaNode, SchemaTree};
use crate::validation::IdAllocators;
use matcher::{check_operator, matching_indexes};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// The element kind of the array field at `path`.
pub fn array_field<'t>(tree: &'t SchemaTree, path: &str) -> Result<&'t ArrayEmbed> {
    match tree.fields.resolve(path) {
        Some(SchemaNode::Array { embed, .. }) => Ok(embed),
        Some(_) => Err(ShelfError::type_error(path, "is not an array field")),
        None => Err(ShelfError::validation(path, "is not declared in the schema")),
    }
}

/// Elements currently stored at `path`; a missing or `null` field reads as empty.
pub fn current_items(doc: &Document, path: &str) -> Result<Vec<Value>> {
    let mut segments = path.split('.').peekable();
    let mut object = doc;
    while let Some(segment) = segments.next() {
        let value = object.get(segment);
        if segments.peek().is_none() {
            return match value {
                None | Some(Value::Null) => Ok(Vec::new()),
                Some(Value::Array(items)) => Ok(items.clone()),
                Some(other) => Err(ShelfError::type_error(
                    path,
                    format!("expected an array, got {}", type_name(other)),
                )),
            };
        }
        match value {
            Some(Value::Object(inner)) => object = inner,
            _ => return Ok(Vec::new()),
        }
    }
    Ok(Vec::new())
}

/// The update patch that writes `items` to the dotted `path`.
pub fn patch_for(path: &str, items: Vec<Value>) -> Value {
    path.rsplit('.').fold(Value::Array(items), |value, segment| {
        let mut map = Map::new();
        map.insert(segment.to_string(), value);
        Value::Object(map)
    })
}

/// Append `values`. Reference lists drop duplicates; document lists overwrite an
/// element with the same id and require explicit ids to exist.
pub fn insert_into(
    ids: &mut IdAllocators<'_>,
    path: &str,
    embed: &ArrayEmbed,
    current: Vec<Value>,
    values: Vec<Value>,
) -> Result<Vec<Value>> {
    let offset = current.len();
    let mut items = current;
    match embed {
        ArrayEmbed::RefList { collection, .. } => {
            items.extend(values.into_iter().map(|value| as_reference(collection, value)));
            Ok(collapse_duplicates(items, reference_id))
        }
        ArrayEmbed::DocList { collection } => {
            let allocator = ids.get(collection)?;
            for (i, value) in values.iter().enumerate() {
                let item_path = format!("{path}.{}", offset + i);
                let Value::Object(input) = value else {
                    return Err(ShelfError::type_error(
                        item_path,
                        format!("expected a '{collection}' document, got {}", type_name(value)),
                    ));
                };
                match input.get(ID_FIELD) {
                    None | Some(Value::Null) => {}
                    Some(id) => {
                        allocator.validate(&format!("{item_path}.{ID_FIELD}"), id, true)?;
                    }
                }
            }
            items.extend(values);
            Ok(collapse_duplicates(items, DocId::from_id_or_object))
        }
        _ => {
            items.extend(values);
            Ok(items)
        }
    }
}

/// Remove the elements identified by `values`. Ids that are not present are ignored.
pub fn remove_from(embed: &ArrayEmbed, current: Vec<Value>, values: &[Value]) -> Vec<Value> {
    let mut items = current;
    match embed {
        ArrayEmbed::RefList { .. } => {
            let ids = id_set(values);
            items.retain(|item| reference_id(item).map_or(true, |id| !ids.contains(&id)));
        }
        ArrayEmbed::DocList { .. } => {
            let ids = id_set(values);
            items.retain(|item| DocId::from_id_or_object(item).map_or(true, |id| !ids.contains(&id)));
        }
        ArrayEmbed::ObjectList { .. } => {
            items.retain(|item| !values.iter().any(|value| object_matches(item, value)));
        }
        _ => items.retain(|item| !values.iter().any(|value| values_equal(item, value))),
    }
    items
}

/// Rewrite the elements selected by `matcher` with `updates`.
pub fn update_array(
    path: &str,
    embed: &ArrayEmbed,
    current: Vec<Value>,
    matcher: &ArrayMatcher,
    updates: Vec<Value>,
) -> Result<Vec<Value>> {
    let expr = match matcher {
        ArrayMatcher::Custom(transform) => return Ok(transform(current)),
        ArrayMatcher::Expression(expr) => {
            check_operator(expr.op)?;
            Some(expr)
        }
        ArrayMatcher::SinglePath { .. } => None,
    };

    let mut items = current;
    let changed = match (embed, matcher, expr) {
        (ArrayEmbed::RefList { collection, id_kind }, _, Some(expr))
            if expr.addresses_item() && expr.op == Operator::StrictEq =>
        {
            let target = literal_id(path, *id_kind, &expr.literal)?;
            let replacement = as_reference(collection, single(path, updates)?);
            let index = items
                .iter()
                .position(|item| reference_id(item).as_ref() == Some(&target))
                .ok_or_else(|| ShelfError::not_found(collection, &target))?;
            items[index] = replacement;
            items = collapse_duplicates(items, reference_id);
            1
        }
        (ArrayEmbed::RefList { .. }, _, _) => {
            return Err(ShelfError::Query(format!(
                "the reference list '{path}' can only be updated with '$item === <id>'"
            )))
        }
        (ArrayEmbed::DocList { collection }, ArrayMatcher::SinglePath { key }, _) => {
            if key != ID_FIELD {
                return Err(ShelfError::Query(format!(
                    "elements of '{path}' are matched by '{ID_FIELD}', not '{key}'"
                )));
            }
            let updates = objects(path, updates)?;
            for (i, update) in updates.iter().enumerate() {
                if update.get(ID_FIELD).and_then(DocId::from_value).is_none() {
                    return Err(ShelfError::validation(
                        format!("{path}.{i}"),
                        format!("update object has no '{ID_FIELD}'"),
                    ));
                }
            }
            // Applied in order, so a repeated id in the batch ends with its last update.
            for update in &updates {
                let id = update.get(ID_FIELD).and_then(DocId::from_value);
                let index = items
                    .iter()
                    .position(|item| DocId::from_id_or_object(item) == id)
                    .ok_or_else(|| {
                        ShelfError::not_found(collection, id.map(|id| id.to_string()).unwrap_or_default())
                    })?;
                merge(&mut items[index], update);
            }
            updates.len()
        }
        (ArrayEmbed::DocList { .. }, _, Some(expr)) => {
            if expr.addresses_item() {
                return Err(ShelfError::Query(format!(
                    "'$item' cannot match the documents of '{path}'"
                )));
            }
            if expr.path == ID_FIELD {
                return Err(ShelfError::Query(format!(
                    "match the documents of '{path}' by '{ID_FIELD}' with a single-path key"
                )));
            }
            let update = single_object(path, updates)?;
            if update.is_empty() {
                return Err(ShelfError::validation(path, "update object is empty"));
            }
            if update.contains_key(ID_FIELD) {
                return Err(ShelfError::validation(
                    format!("{path}.{ID_FIELD}"),
                    "the id of a matched document cannot change",
                ));
            }
            merge_matches(&mut items, expr, &update)
        }
        (ArrayEmbed::ObjectList { fields }, ArrayMatcher::SinglePath { key }, _) => {
            if !fields.contains(key) {
                return Err(ShelfError::Query(format!(
                    "'{key}' is not a declared field of the elements of '{path}'"
                )));
            }
            let updates = objects(path, updates)?;
            for (i, update) in updates.iter().enumerate() {
                let Some(wanted) = update.get(key) else {
                    return Err(ShelfError::validation(
                        format!("{path}.{i}"),
                        format!("update object has no '{key}'"),
                    ));
                };
                let matched: Vec<usize> = items
                    .iter()
                    .enumerate()
                    .filter(|(_, item)| item.get(key).map_or(false, |v| values_equal(v, wanted)))
                    .map(|(index, _)| index)
                    .collect();
                if matched.is_empty() {
                    return Err(ShelfError::not_found(path, display_value(wanted)));
                }
                for index in matched {
                    merge(&mut items[index], update);
                }
            }
            updates.len()
        }
        (ArrayEmbed::ObjectList { .. }, _, Some(expr)) => {
            if expr.addresses_item() {
                return Err(ShelfError::Query(format!(
                    "'$item' cannot match the objects of '{path}'; compare one of their fields"
                )));
            }
            let update = single_object(path, updates)?;
            merge_matches(&mut items, expr, &update)
        }
        (embed, ArrayMatcher::SinglePath { key }, _) => {
            return Err(ShelfError::Query(format!(
                "'{path}' is a {}; match its elements with '$item' instead of '{key}'",
                embed.describe()
            )))
        }
        (embed, _, Some(expr)) => {
            let scalar_elements = !matches!(embed, ArrayEmbed::Empty);
            if scalar_elements && !expr.addresses_item() {
                return Err(ShelfError::Query(format!(
                    "'{path}' is a {}; match its elements with '$item'",
                    embed.describe()
                )));
            }
            let replacement = single(path, updates)?;
            let indexes = matching_indexes(expr, &items);
            for &index in &indexes {
                items[index] = replacement.clone();
            }
            indexes.len()
        }
        (_, _, None) => 0,
    };
    log::debug!("updated {changed} element(s) of '{path}'");
    Ok(items)
}

/// Raw ids and `{id}` objects become references; anything else is left for the builder.
fn as_reference(collection: &str, value: Value) -> Value {
    if reference_id(&value).is_some() {
        return value;
    }
    match DocId::from_id_or_object(&value) {
        Some(id) if !value.is_object() || value.as_object().map_or(false, |m| m.len() == 1) => {
            reference(collection, &id)
        }
        _ => value,
    }
}

fn id_set(values: &[Value]) -> HashSet<DocId> {
    values
        .iter()
        .filter_map(|value| reference_id(value).or_else(|| DocId::from_id_or_object(value)))
        .collect()
}

/// A scalar matches by `id`, a single-key object by that key, any other object by deep equality.
fn object_matches(item: &Value, wanted: &Value) -> bool {
    match wanted {
        Value::Object(map) if map.len() == 1 => map
            .iter()
            .all(|(key, value)| item.get(key).map_or(false, |v| values_equal(v, value))),
        Value::Object(_) => values_equal(item, wanted),
        scalar => item.get(ID_FIELD).map_or(false, |id| values_equal(id, scalar)),
    }
}

/// Read the literal of `$item === <literal>` as an id of the list's id kind.
fn literal_id(path: &str, id_kind: IdKind, literal: &Literal) -> Result<DocId> {
    let id = match (id_kind, literal) {
        (IdKind::Incr, Literal::Number(n)) if *n > 0.0 && n.fract() == 0.0 => {
            Some(DocId::Int(*n as u64))
        }
        (IdKind::Incr, Literal::Text(text)) => {
            text.parse::<u64>().ok().filter(|n| *n > 0).map(DocId::Int)
        }
        (IdKind::Uid, Literal::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => {
            Some(DocId::Str((*n as u64).to_string()))
        }
        (IdKind::Uid, Literal::Text(text)) if !text.is_empty() => Some(DocId::Str(text.clone())),
        _ => None,
    };
    id.ok_or_else(|| ShelfError::Query(format!("'{path}' elements must be matched by an id")))
}

fn single(path: &str, updates: Vec<Value>) -> Result<Value> {
    let count = updates.len();
    let mut updates = updates.into_iter();
    match (updates.next(), count) {
        (Some(value), 1) => Ok(value),
        _ => Err(ShelfError::Query(format!(
            "updating '{path}' takes exactly one replacement, got {count}"
        ))),
    }
}

fn single_object(path: &str, updates: Vec<Value>) -> Result<Map<String, Value>> {
    match single(path, updates)? {
        Value::Object(map) => Ok(map),
        other => Err(ShelfError::type_error(
            path,
            format!("expected an update object, got {}", type_name(&other)),
        )),
    }
}

fn objects(path: &str, updates: Vec<Value>) -> Result<Vec<Map<String, Value>>> {
    updates
        .into_iter()
        .enumerate()
        .map(|(i, update)| match update {
            Value::Object(map) => Ok(map),
            other => Err(ShelfError::type_error(
                format!("{path}.{i}"),
                format!("expected an update object, got {}", type_name(&other)),
            )),
        })
        .collect()
}

fn merge_matches(items: &mut [Value], expr: &Expr, update: &Map<String, Value>) -> usize {
    let indexes = matching_indexes(expr, items);
    for &index in &indexes {
        merge(&mut items[index], update);
    }
    indexes.len()
}

fn merge(item: &mut Value, update: &Map<String, Value>) {
    match item {
        Value::Object(target) => {
            for (key, value) in update {
                target.insert(key.clone(), value.clone());
            }
        }
        other => *other = Value::Object(update.clone()),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
