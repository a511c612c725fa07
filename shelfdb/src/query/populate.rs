use crate::document::{reference_id, Document};
use crate::error::{Result, ShelfError};
use crate::schema::{ArrayEmbed, Fields, SchemaNode, SchemaRegistry, SchemaTree};
use crate::store::StoreBackend;
use serde_json::Value;

/// One step of a resolved populate path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Hop<'a> {
    /// Descend into an object.
    Into,
    /// Descend into every element of an array.
    IntoEach,
    /// Replace a reference by its target document.
    Ref(&'a str),
    /// Replace every reference of a list.
    RefList(&'a str),
}

/// Check a populate path against the schema and return its hops.
fn plan<'a>(
    registry: &'a SchemaRegistry,
    tree: &'a SchemaTree,
    path: &str,
) -> Result<Vec<(String, Hop<'a>)>> {
    let not_a_ref = || ShelfError::Query(format!("'{path}' does not address a reference field"));

    let segments: Vec<&str> = path.split('.').collect();
    let mut fields: &'a Fields = &tree.fields;
    let mut hops = Vec::with_capacity(segments.len());

    for (index, segment) in segments.iter().enumerate() {
        let last = index + 1 == segments.len();
        let node = fields.get(segment).ok_or_else(not_a_ref)?;
        let hop = match (node, last) {
            (SchemaNode::Ref { collection, .. }, true) => Hop::Ref(collection),
            (
                SchemaNode::Array {
                    embed: ArrayEmbed::RefList { collection, .. },
                    ..
                },
                true,
            ) => Hop::RefList(collection),
            (SchemaNode::NestedObject { fields: nested }, false) => {
                fields = nested;
                Hop::Into
            }
            (SchemaNode::EmbeddedDocument { collection, .. }, false) => {
                fields = &registry.tree(collection)?.fields;
                Hop::Into
            }
            (
                SchemaNode::Array {
                    embed: ArrayEmbed::ObjectList { fields: nested },
                    ..
                },
                false,
            ) => {
                fields = nested;
                Hop::IntoEach
            }
            (
                SchemaNode::Array {
                    embed: ArrayEmbed::DocList { collection },
                    ..
                },
                false,
            ) => {
                fields = &registry.tree(collection)?.fields;
                Hop::IntoEach
            }
            _ => return Err(not_a_ref()),
        };
        hops.push((segment.to_string(), hop));
    }
    Ok(hops)
}

/// Replace the references addressed by `paths` with the documents they point at.
/// A reference whose target is gone becomes `null`.
pub fn populate(
    registry: &SchemaRegistry,
    store: &dyn StoreBackend,
    tree: &SchemaTree,
    documents: &mut [Document],
    paths: &[String],
) -> Result<()> {
    for path in paths {
        let hops = plan(registry, tree, path)?;
        for doc in documents.iter_mut() {
            apply(store, &hops, doc)?;
        }
        log::debug!("populated '{path}' on {} documents", documents.len());
    }
    Ok(())
}

fn apply(store: &dyn StoreBackend, hops: &[(String, Hop<'_>)], object: &mut Document) -> Result<()> {
    let Some(((segment, hop), rest)) = hops.split_first() else {
        return Ok(());
    };
    let Some(slot) = object.get_mut(segment) else {
        return Ok(());
    };

    match hop {
        Hop::Ref(collection) => resolve(store, collection, slot),
        Hop::RefList(collection) => {
            if let Value::Array(items) = slot {
                for item in items.iter_mut() {
                    resolve(store, collection, item)?;
                }
            }
            Ok(())
        }
        Hop::Into => match slot {
            Value::Object(inner) => apply(store, rest, inner),
            _ => Ok(()),
        },
        Hop::IntoEach => {
            if let Value::Array(items) = slot {
                for item in items.iter_mut() {
                    if let Value::Object(inner) = item {
                        apply(store, rest, inner)?;
                    }
                }
            }
            Ok(())
        }
    }
}

fn resolve(store: &dyn StoreBackend, collection: &str, slot: &mut Value) -> Result<()> {
    if let Some(id) = reference_id(slot) {
        *slot = match store.fetch_by_id(collection, &id)? {
            Some(doc) => Value::Object(doc),
            None => {
                log::warn!("dangling reference to {collection}/{id}");
                Value::Null
            }
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema_str;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SCHEMA: &str = r#"
collections:
  users:
    fields:
      name: String
      group: { $ref: groups }
      friends: [{ $ref: users }]
      meta:
        mentor: { $ref: users }
      slots: [{ owner: { $ref: users } }]
  groups:
    fields:
      title: String
"#;

    fn doc(value: Value) -> Document {
        value.as_object().unwrap().clone()
    }

    fn fixture() -> (SchemaRegistry, MemoryStore) {
        let registry = parse_schema_str(SCHEMA).unwrap();
        let store = MemoryStore::default();
        store
            .persist("groups", vec![doc(json!({ "id": 1, "title": "G1" }))])
            .unwrap();
        store
            .persist(
                "users",
                vec![
                    doc(json!({ "id": 1, "name": "Ann" })),
                    doc(json!({ "id": 2, "name": "Bob" })),
                ],
            )
            .unwrap();
        (registry, store)
    }

    fn populated(path: &str, input: Value) -> Result<Document> {
        let (registry, store) = fixture();
        let tree = registry.tree("users").unwrap();
        let mut docs = vec![doc(input)];
        populate(&registry, &store, tree, &mut docs, &[path.to_string()])?;
        Ok(docs.remove(0))
    }

    #[test]
    fn test_populate_single_reference() {
        let out = populated("group", json!({ "id": 3, "group": { "collection": "groups", "$ref": 1 } })).unwrap();
        assert_eq!(out["group"], json!({ "id": 1, "title": "G1" }));
    }

    #[test]
    fn test_populate_reference_list_and_missing_target() {
        let out = populated(
            "friends",
            json!({ "id": 3, "friends": [
                { "collection": "users", "$ref": 2 },
                { "collection": "users", "$ref": 9 },
            ] }),
        )
        .unwrap();
        assert_eq!(out["friends"], json!([{ "id": 2, "name": "Bob" }, null]));
    }

    #[test]
    fn test_populate_nested_and_inside_arrays() {
        let out = populated(
            "meta.mentor",
            json!({ "id": 3, "meta": { "mentor": { "collection": "users", "$ref": 1 } } }),
        )
        .unwrap();
        assert_eq!(out["meta"]["mentor"]["name"], json!("Ann"));

        let out = populated(
            "slots.owner",
            json!({ "id": 3, "slots": [{ "owner": { "collection": "users", "$ref": 2 } }] }),
        )
        .unwrap();
        assert_eq!(out["slots"][0]["owner"]["name"], json!("Bob"));
    }

    #[test]
    fn test_populate_rejects_non_reference_paths() {
        let err = populated("name", json!({ "id": 3 })).unwrap_err();
        assert_eq!(err.to_string(), "Query error: 'name' does not address a reference field");
        assert!(populated("nothing", json!({ "id": 3 })).is_err());
    }
}
