use super::{
    document_id, reference, reference_id, type_name, DocId, Document, CREATED_AT, ID_FIELD,
    UPDATED_AT,
};
use crate::error::{Result, ShelfError};
use crate::schema::{ArrayEmbed, Fields, SchemaNode, SchemaTree};
use crate::store::document_max;
use crate::validation::{
    format_date, is_reference_shape, validate_array_rules, validate_reference, validate_scalar,
    IdAllocators,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Insert,
    Update,
}

/// A sub-document created or changed while building its parent. The caller
/// persists these to their own collection before the parent.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub collection: String,
    pub document: Document,
}

/// The document a field belongs to.
struct Parent {
    collection: String,
    id: DocId,
}

#[derive(Clone, Copy)]
struct Scope<'s> {
    strict: bool,
    owner: &'s Parent,
    /// Back-reference target for `Ref` fields at this level.
    inject: Option<&'s Parent>,
    /// Directly under the document root.
    top: bool,
}

impl<'s> Scope<'s> {
    fn nested(self) -> Self {
        Scope {
            inject: if self.top { self.inject } else { None },
            top: false,
            ..self
        }
    }

    fn element(self) -> Self {
        Scope {
            inject: None,
            top: false,
            ..self
        }
    }
}

/// Casts raw input into stored documents following the compiled schema trees.
///
/// One builder serves one operation: ids generated or claimed along the way live in
/// the shared [`IdAllocators`], and embedded sub-documents accumulate as
/// [`PendingWrite`]s until the caller persists them.
pub struct DocumentBuilder<'a, 'b> {
    ids: &'b mut IdAllocators<'a>,
    now: DateTime<Utc>,
    pending: Vec<PendingWrite>,
}

impl<'a, 'b> DocumentBuilder<'a, 'b> {
    pub fn new(ids: &'b mut IdAllocators<'a>, now: DateTime<Utc>) -> Self {
        DocumentBuilder {
            ids,
            now,
            pending: Vec::new(),
        }
    }

    /// Build a document from raw input. `Update` looks up the stored document by the
    /// input's `id` and applies the remaining fields as a patch.
    pub fn build(&mut self, collection: &str, raw: &Value, mode: BuildMode) -> Result<Document> {
        match mode {
            BuildMode::Insert => self.build_insert(collection, raw),
            BuildMode::Update => {
                let patch = expect_object(collection, raw)?;
                let id_value = patch
                    .get(ID_FIELD)
                    .ok_or_else(|| ShelfError::validation(ID_FIELD, "is required to update a document"))?;
                let id = self.ids.get(collection)?.cast(ID_FIELD, id_value)?;
                let existing = self.lookup(collection, &id)?;
                self.update_document("", collection, &existing, patch)
            }
        }
    }

    pub fn build_insert(&mut self, collection: &str, raw: &Value) -> Result<Document> {
        let input = expect_object(collection, raw)?;
        self.insert_document("", collection, input, None)
    }

    pub fn build_update(
        &mut self,
        collection: &str,
        existing: &Document,
        patch: &Value,
    ) -> Result<Document> {
        let patch = expect_object(collection, patch)?;
        self.update_document("", collection, existing, patch)
    }

    pub fn pending(&self) -> &[PendingWrite] {
        &self.pending
    }

    pub fn into_pending(self) -> Vec<PendingWrite> {
        self.pending
    }

    fn tree(&self, collection: &str) -> Result<&'a SchemaTree> {
        self.ids.registry().tree(collection)
    }

    fn insert_document(
        &mut self,
        prefix: &str,
        collection: &str,
        input: &Map<String, Value>,
        inject: Option<&Parent>,
    ) -> Result<Document> {
        let tree = self.tree(collection)?;
        let allocator = self.ids.get(collection)?;
        let id = match input.get(ID_FIELD) {
            None | Some(Value::Null) => allocator.generate()?,
            Some(value) => allocator.claim(&join(prefix, ID_FIELD), value)?,
        };

        let owner = Parent {
            collection: collection.to_string(),
            id: id.clone(),
        };
        let scope = Scope {
            strict: tree.settings.strict,
            owner: &owner,
            inject,
            top: true,
        };

        let mut doc = Document::new();
        doc.insert(ID_FIELD.into(), id.to_value());
        let fields = self.build_fields(prefix, &tree.fields, input, scope, &managed_keys(tree))?;
        doc.extend(fields);

        let now = format_date(&self.now);
        if tree.settings.timestamps.created_at {
            doc.insert(CREATED_AT.into(), Value::String(now.clone()));
        }
        if tree.settings.timestamps.updated_at {
            doc.insert(UPDATED_AT.into(), Value::String(now));
        }

        self.check_size(collection, &doc)?;
        log::debug!("built new '{collection}' document {id}");
        Ok(doc)
    }

    fn update_document(
        &mut self,
        prefix: &str,
        collection: &str,
        existing: &Document,
        patch: &Map<String, Value>,
    ) -> Result<Document> {
        let tree = self.tree(collection)?;
        let id = document_id(existing)?;
        if let Some(value) = patch.get(ID_FIELD) {
            let id_path = join(prefix, ID_FIELD);
            if value.is_null() {
                return Err(ShelfError::validation(id_path, "cannot be null"));
            }
            if DocId::from_value(value).as_ref() != Some(&id) {
                return Err(ShelfError::validation(
                    id_path,
                    format!("is immutable, cannot change {id} to {value}"),
                ));
            }
        }

        let owner = Parent {
            collection: collection.to_string(),
            id,
        };
        let scope = Scope {
            strict: tree.settings.strict,
            owner: &owner,
            inject: None,
            top: true,
        };

        let mut doc = existing.clone();
        self.merge_fields(prefix, &tree.fields, &mut doc, patch, scope, &managed_keys(tree))?;
        if tree.settings.timestamps.updated_at {
            doc.insert(UPDATED_AT.into(), Value::String(format_date(&self.now)));
        }

        let doc = order_fields(tree, &doc);
        self.check_size(collection, &doc)?;
        Ok(doc)
    }

    /// Build every declared field of one level, then handle undeclared input keys.
    fn build_fields(
        &mut self,
        prefix: &str,
        fields: &'a Fields,
        input: &Map<String, Value>,
        scope: Scope<'_>,
        reserved: &[&str],
    ) -> Result<Map<String, Value>> {
        let mut out = Map::new();

        for (name, node) in fields.iter() {
            if node.id_kind().is_some() {
                continue;
            }
            let path = join(prefix, name);

            let injected;
            let mut value = input.get(name);
            if let (None, Some(parent), SchemaNode::Ref { collection, .. }) =
                (value, scope.inject, node)
            {
                if *collection == parent.collection {
                    injected = reference(&parent.collection, &parent.id);
                    value = Some(&injected);
                }
            }

            if let Some(built) = self.build_value(&path, node, value, scope)? {
                out.insert(name.to_string(), built);
            }
        }

        for (key, value) in input {
            if fields.contains(key) || reserved.contains(&key.as_str()) {
                continue;
            }
            if scope.strict {
                return Err(ShelfError::validation(
                    join(prefix, key),
                    "is not declared in the schema",
                ));
            }
            out.insert(key.clone(), value.clone());
        }
        Ok(out)
    }

    /// Apply a patch onto stored values. Nested objects merge leaf by leaf.
    fn merge_fields(
        &mut self,
        prefix: &str,
        fields: &'a Fields,
        target: &mut Map<String, Value>,
        patch: &Map<String, Value>,
        scope: Scope<'_>,
        reserved: &[&str],
    ) -> Result<()> {
        for (key, value) in patch {
            if reserved.contains(&key.as_str()) {
                continue;
            }
            let path = join(prefix, key);
            match fields.get(key) {
                Some(SchemaNode::NestedObject { fields: nested }) => {
                    let Value::Object(nested_patch) = value else {
                        return Err(ShelfError::type_error(
                            path,
                            format!("expected an object, got {}", type_name(value)),
                        ));
                    };
                    let entry = target
                        .entry(key.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !entry.is_object() {
                        *entry = Value::Object(Map::new());
                    }
                    if let Value::Object(stored) = entry {
                        self.merge_fields(&path, nested, stored, nested_patch, scope.nested(), &[])?;
                    }
                }
                Some(node) if node.id_kind().is_some() => {}
                Some(node) => match self.build_value(&path, node, Some(value), scope)? {
                    Some(built) => {
                        target.insert(key.clone(), built);
                    }
                    None => {
                        target.remove(key);
                    }
                },
                None if scope.strict => {
                    return Err(ShelfError::validation(path, "is not declared in the schema"));
                }
                None => {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    /// Dispatch one value on its schema node. `None` means the field is left out.
    fn build_value(
        &mut self,
        path: &str,
        node: &'a SchemaNode,
        value: Option<&Value>,
        scope: Scope<'_>,
    ) -> Result<Option<Value>> {
        match node {
            SchemaNode::Scalar { kind, rules } => validate_scalar(path, *kind, rules, value),
            SchemaNode::IncrId { .. } | SchemaNode::UidId { .. } => Ok(value.cloned()),
            SchemaNode::Ref {
                collection,
                required,
                ..
            } => match value {
                None => absent(path, *required),
                Some(Value::Null) => null_for(path, *required),
                Some(value) => self.build_reference(path, collection, value).map(Some),
            },
            SchemaNode::EmbeddedDocument {
                collection,
                required,
            } => match value {
                None => absent(path, *required),
                Some(Value::Null) => null_for(path, *required),
                Some(Value::Object(input)) => {
                    let doc = self.embed_document(path, collection, input, Some(scope.owner))?;
                    Ok(Some(Value::Object(doc)))
                }
                Some(other) => Err(ShelfError::type_error(
                    path,
                    format!(
                        "expected an object for an embedded '{collection}' document, got {}",
                        type_name(other)
                    ),
                )),
            },
            SchemaNode::Array { embed, rules } => {
                let items = match value {
                    None => match &rules.default {
                        Some(default) => default,
                        None if rules.required => {
                            return Err(ShelfError::validation(path, "is required"))
                        }
                        None => return Ok(None),
                    },
                    Some(Value::Null) => return Ok(Some(Value::Array(Vec::new()))),
                    Some(value) => value,
                };
                let Value::Array(items) = items else {
                    return Err(ShelfError::type_error(
                        path,
                        format!("expected an array, got {}", type_name(items)),
                    ));
                };
                let built = self.build_array(path, embed, items, scope)?;
                validate_array_rules(path, rules, &built)?;
                Ok(Some(Value::Array(built)))
            }
            SchemaNode::NestedObject { fields } => {
                let empty = Map::new();
                let input = match value {
                    None | Some(Value::Null) => &empty,
                    Some(Value::Object(input)) => input,
                    Some(other) => {
                        return Err(ShelfError::type_error(
                            path,
                            format!("expected an object, got {}", type_name(other)),
                        ))
                    }
                };
                let built = self.build_fields(path, fields, input, scope.nested(), &[])?;
                if built.is_empty() && value.map_or(true, Value::is_null) {
                    Ok(None)
                } else {
                    Ok(Some(Value::Object(built)))
                }
            }
        }
    }

    fn build_array(
        &mut self,
        path: &str,
        embed: &'a ArrayEmbed,
        items: &[Value],
        scope: Scope<'_>,
    ) -> Result<Vec<Value>> {
        match embed {
            ArrayEmbed::Empty => Ok(items.to_vec()),
            ArrayEmbed::ScalarList { kind, rules } => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    validate_scalar(&index_path(path, i), *kind, rules, Some(item))
                        .map(|cast| cast.unwrap_or(Value::Null))
                })
                .collect(),
            ArrayEmbed::RefList { collection, .. } => {
                let mut refs = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    refs.push(self.build_reference(&index_path(path, i), collection, item)?);
                }
                Ok(collapse_duplicates(refs, reference_id))
            }
            ArrayEmbed::DocList { collection } => {
                let mut docs = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let item_path = index_path(path, i);
                    let Value::Object(input) = item else {
                        return Err(ShelfError::type_error(
                            item_path,
                            format!("expected a '{collection}' document, got {}", type_name(item)),
                        ));
                    };
                    let doc = self.embed_document(&item_path, collection, input, Some(scope.owner))?;
                    docs.push(Value::Object(doc));
                }
                Ok(collapse_duplicates(docs, DocId::from_id_or_object))
            }
            ArrayEmbed::ObjectList { fields } => {
                let mut objects = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let item_path = index_path(path, i);
                    let Value::Object(input) = item else {
                        return Err(ShelfError::type_error(
                            item_path,
                            format!("expected an object, got {}", type_name(item)),
                        ));
                    };
                    let built = self.build_fields(&item_path, fields, input, scope.element(), &[])?;
                    objects.push(Value::Object(built));
                }
                Ok(objects)
            }
            ArrayEmbed::ArrayOfArray { inner } => {
                let mut rows = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let item_path = index_path(path, i);
                    let Value::Array(row) = item else {
                        return Err(ShelfError::type_error(
                            item_path,
                            format!("expected an array, got {}", type_name(item)),
                        ));
                    };
                    rows.push(Value::Array(self.build_array(&item_path, inner, row, scope)?));
                }
                Ok(rows)
            }
        }
    }

    /// A `{collection, $ref}` value is checked as is; any other object creates (or
    /// attaches) a document in the target collection and references it.
    fn build_reference(&mut self, path: &str, collection: &str, value: &Value) -> Result<Value> {
        if is_reference_shape(value) {
            let target = self.ids.get(collection)?;
            return validate_reference(path, value, target);
        }
        match value {
            Value::Object(input) => {
                let doc = self.embed_document(path, collection, input, None)?;
                Ok(reference(collection, &document_id(&doc)?))
            }
            other => Err(ShelfError::type_error(
                path,
                format!(
                    "expected a reference or an object to create a '{collection}' document, got {}",
                    type_name(other)
                ),
            )),
        }
    }

    /// Create a sub-document, or attach the stored one when the input names an existing id.
    fn embed_document(
        &mut self,
        path: &str,
        collection: &str,
        input: &Map<String, Value>,
        inject: Option<&Parent>,
    ) -> Result<Document> {
        if let Some(id_value) = input.get(ID_FIELD).filter(|v| !v.is_null()) {
            let allocator = self.ids.get(collection)?;
            let id = allocator.cast(&join(path, ID_FIELD), id_value)?;
            if allocator.contains(&id) {
                let stored = self.lookup(collection, &id)?;
                let unchanged = input
                    .iter()
                    .all(|(key, value)| stored.get(key) == Some(value));
                if unchanged {
                    return Ok(stored);
                }
                let doc = self.update_document(path, collection, &stored, input)?;
                self.pending.push(PendingWrite {
                    collection: collection.to_string(),
                    document: doc.clone(),
                });
                return Ok(doc);
            }
        }

        let doc = self.insert_document(path, collection, input, inject)?;
        self.pending.push(PendingWrite {
            collection: collection.to_string(),
            document: doc.clone(),
        });
        Ok(doc)
    }

    /// Latest version of a document: written earlier in this operation, else stored.
    fn lookup(&self, collection: &str, id: &DocId) -> Result<Document> {
        let written = self.pending.iter().rev().find(|write| {
            write.collection == collection && document_id(&write.document).ok().as_ref() == Some(id)
        });
        if let Some(write) = written {
            return Ok(write.document.clone());
        }
        self.ids
            .store()
            .fetch_by_id(collection, id)?
            .ok_or_else(|| ShelfError::not_found(collection, id))
    }

    fn check_size(&mut self, collection: &str, doc: &Document) -> Result<()> {
        let shard_max = self.ids.get(collection)?.shard_max();
        let limit = document_max(shard_max);
        let size = serde_json::to_vec(doc)?.len();
        if size > limit {
            return Err(ShelfError::Capacity(format!(
                "document size {size} bytes exceeds the {limit} bytes a shard of {shard_max} bytes can hold"
            )));
        }
        Ok(())
    }
}

fn expect_object<'v>(collection: &str, value: &'v Value) -> Result<&'v Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        ShelfError::type_error(
            collection,
            format!("expected a document object, got {}", type_name(value)),
        )
    })
}

fn absent(path: &str, required: bool) -> Result<Option<Value>> {
    if required {
        Err(ShelfError::validation(path, "is required"))
    } else {
        Ok(None)
    }
}

fn null_for(path: &str, required: bool) -> Result<Option<Value>> {
    if required {
        Err(ShelfError::validation(path, "is required"))
    } else {
        Ok(Some(Value::Null))
    }
}

/// Keys the builder maintains itself at the top level of a document.
fn managed_keys(tree: &SchemaTree) -> Vec<&'static str> {
    let mut keys = vec![ID_FIELD];
    if tree.settings.timestamps.created_at {
        keys.push(CREATED_AT);
    }
    if tree.settings.timestamps.updated_at {
        keys.push(UPDATED_AT);
    }
    keys
}

/// `id`, declared fields in schema order, pass-through fields, then timestamps.
pub(crate) fn order_fields(tree: &SchemaTree, doc: &Document) -> Document {
    let mut ordered = Document::new();
    for (name, _) in tree.fields.iter() {
        if let Some(value) = doc.get(name) {
            ordered.insert(name.to_string(), value.clone());
        }
    }
    for (key, value) in doc {
        if !tree.fields.contains(key) && key != CREATED_AT && key != UPDATED_AT {
            ordered.insert(key.clone(), value.clone());
        }
    }
    for key in [CREATED_AT, UPDATED_AT] {
        if let Some(value) = doc.get(key) {
            ordered.insert(key.to_string(), value.clone());
        }
    }
    ordered
}

/// Collapse items sharing an id: the first position is kept, holding the last value.
pub(crate) fn collapse_duplicates(
    items: Vec<Value>,
    key: impl Fn(&Value) -> Option<DocId>,
) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    let mut seen: HashMap<DocId, usize> = HashMap::new();
    for item in items {
        match key(&item) {
            Some(id) => match seen.get(&id) {
                Some(&index) => out[index] = item,
                None => {
                    seen.insert(id, out.len());
                    out.push(item);
                }
            },
            None => out.push(item),
        }
    }
    out
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn index_path(path: &str, index: usize) -> String {
    format!("{path}.{index}")
}
