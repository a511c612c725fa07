use crate::array::{self, ArrayMatcher};
use crate::document::{document_id, DocId, Document, DocumentBuilder, PendingWrite};
use crate::error::{Result, ShelfError};
use crate::query::{populate, Query};
use crate::schema::{parse_schema, ArrayEmbed, IdKind, SchemaRegistry, SchemaTree};
use crate::store::{FileStore, StoreBackend};
use crate::validation::IdAllocators;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::path::Path;

pub const SCHEMA_FILE: &str = "schema.yaml";

/// The main entry point: a compiled schema bound to a store backend.
pub struct Database {
    registry: SchemaRegistry,
    store: Box<dyn StoreBackend>,
}

impl Database {
    /// Open a data directory: parses `schema.yaml` and opens the sharded file store
    /// that lives next to it.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let root = dir.as_ref();
        let schema_path = root.join(SCHEMA_FILE);
        if !schema_path.exists() {
            return Err(ShelfError::schema(
                SCHEMA_FILE,
                format!("not found in {}", root.display()),
            ));
        }
        let registry = parse_schema(&schema_path)?;
        let store = FileStore::open(root, registry.config().shard_max_bytes)?;
        log::info!(
            "opened database at {} ({} collections)",
            root.display(),
            registry.collections().count()
        );
        Ok(Database::new(registry, store))
    }

    pub fn new(registry: SchemaRegistry, store: impl StoreBackend + 'static) -> Self {
        Database {
            registry,
            store: Box::new(store),
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn StoreBackend {
        self.store.as_ref()
    }

    /// Get a handle to a registered collection.
    pub fn collection(&self, name: &str) -> Result<Collection<'_>> {
        let tree = self.registry.tree(name)?;
        Ok(Collection {
            db: self,
            name: name.to_string(),
            tree,
        })
    }

    /// Document counts and id counters per collection.
    pub fn status(&self) -> Result<Value> {
        let mut names: Vec<&str> = self.registry.collections().collect();
        names.sort_unstable();

        let mut collections = Map::new();
        for name in names {
            let state = self.store.store_state(name)?;
            let kind = match self.registry.tree(name)?.id_kind() {
                IdKind::Incr => "$incr",
                IdKind::Uid => "$uid",
            };
            collections.insert(
                name.to_string(),
                json!({ "count": state.ids.len(), "id_kind": kind, "id_count": state.id_count }),
            );
        }
        Ok(json!({
            "shard_max_bytes": self.registry.config().shard_max_bytes,
            "collections": collections,
        }))
    }
}

/// A handle to one collection of a [`Database`].
pub struct Collection<'a> {
    db: &'a Database,
    name: String,
    tree: &'a SchemaTree,
}

impl<'a> Collection<'a> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read an id given as text (command line, URLs) in this collection's id kind.
    pub fn parse_id(&self, text: &str) -> Result<DocId> {
        match self.tree.id_kind() {
            IdKind::Incr => text
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|n| *n > 0)
                .map(DocId::Int)
                .ok_or_else(|| {
                    ShelfError::type_error("id", format!("expected a positive integer id, got '{text}'"))
                }),
            IdKind::Uid => Ok(DocId::Str(text.to_string())),
        }
    }

    /// Insert one document. Sub-documents created along the way are persisted first.
    pub fn insert(&self, raw: &Value) -> Result<Document> {
        let mut ids = self.allocators();
        self.insert_with(&mut ids, raw)
    }

    /// Insert documents one at a time with a shared id counter. The first failure
    /// aborts the batch; documents inserted before it stay persisted.
    pub fn insert_many(&self, raws: &[Value]) -> Result<Vec<Document>> {
        let mut ids = self.allocators();
        let mut inserted = Vec::with_capacity(raws.len());
        for raw in raws {
            inserted.push(self.insert_with(&mut ids, raw)?);
        }
        Ok(inserted)
    }

    pub fn find(&self, query: &Query) -> Result<Vec<Document>> {
        let documents = self.db.store.fetch_all(&self.name)?;
        let mut results = query.apply(documents)?;
        if !query.populate_paths().is_empty() {
            populate(
                &self.db.registry,
                self.db.store.as_ref(),
                self.tree,
                &mut results,
                query.populate_paths(),
            )?;
        }
        log::debug!("query on '{}' returned {} documents", self.name, results.len());
        Ok(results)
    }

    pub fn find_one(&self, query: &Query) -> Result<Option<Document>> {
        Ok(self.find(query)?.into_iter().next())
    }

    pub fn find_by_id(&self, id: impl Into<DocId>) -> Result<Document> {
        let id = id.into();
        self.db
            .store
            .fetch_by_id(&self.name, &id)?
            .ok_or_else(|| ShelfError::not_found(&self.name, &id))
    }

    /// Number of documents passing the query's filters.
    pub fn count(&self, query: &Query) -> Result<usize> {
        query.check()?;
        let documents = self.db.store.fetch_all(&self.name)?;
        Ok(documents.iter().filter(|doc| query.matches(doc)).count())
    }

    /// Apply `patch` to a stored document. Only the fields present are validated.
    pub fn update_by_id(&self, id: impl Into<DocId>, patch: &Value) -> Result<Document> {
        let existing = self.find_by_id(id)?;
        let mut ids = self.allocators();
        self.update_with(&mut ids, &existing, patch)
    }

    /// Apply `patch` to every document passing the query's filters, in storage order.
    pub fn update_many(&self, query: &Query, patch: &Value) -> Result<Vec<Document>> {
        query.check()?;
        let matches: Vec<Document> = self
            .db
            .store
            .fetch_all(&self.name)?
            .into_iter()
            .filter(|doc| query.matches(doc))
            .collect();
        let mut ids = self.allocators();
        let mut updated = Vec::with_capacity(matches.len());
        for existing in &matches {
            updated.push(self.update_with(&mut ids, existing, patch)?);
        }
        Ok(updated)
    }

    /// Remove one document. References to it elsewhere are left as they are.
    pub fn delete_by_id(&self, id: impl Into<DocId>) -> Result<()> {
        let id = id.into();
        match self.db.store.remove(&self.name, std::slice::from_ref(&id))? {
            0 => Err(ShelfError::not_found(&self.name, &id)),
            _ => {
                log::debug!("deleted {}/{id}", self.name);
                Ok(())
            }
        }
    }

    /// Remove every document passing the query's filters, returning how many went.
    pub fn delete_many(&self, query: &Query) -> Result<usize> {
        query.check()?;
        let ids: Vec<DocId> = self
            .db
            .store
            .fetch_all(&self.name)?
            .iter()
            .filter(|doc| query.matches(doc))
            .filter_map(|doc| document_id(doc).ok())
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let removed = self.db.store.remove(&self.name, &ids)?;
        log::debug!("deleted {removed} documents from '{}'", self.name);
        Ok(removed)
    }

    /// Append to the array at `path` of one document.
    pub fn insert_into(&self, id: impl Into<DocId>, path: &str, values: Vec<Value>) -> Result<Document> {
        self.mutate_array(id.into(), path, |ids, embed, current| {
            array::insert_into(ids, path, embed, current, values)
        })
    }

    /// Remove elements from the array at `path` of one document.
    pub fn remove_from(&self, id: impl Into<DocId>, path: &str, values: &[Value]) -> Result<Document> {
        self.mutate_array(id.into(), path, |_, embed, current| {
            Ok(array::remove_from(embed, current, values))
        })
    }

    /// Rewrite the elements selected by `matcher` in the array at `path` of one document.
    pub fn update_array(
        &self,
        id: impl Into<DocId>,
        path: &str,
        matcher: &ArrayMatcher,
        updates: Vec<Value>,
    ) -> Result<Document> {
        self.mutate_array(id.into(), path, |_, embed, current| {
            array::update_array(path, embed, current, matcher, updates)
        })
    }

    fn mutate_array(
        &self,
        id: DocId,
        path: &str,
        op: impl FnOnce(&mut IdAllocators<'a>, &'a ArrayEmbed, Vec<Value>) -> Result<Vec<Value>>,
    ) -> Result<Document> {
        let embed = array::array_field(self.tree, path)?;
        let existing = self.find_by_id(id)?;
        let current = array::current_items(&existing, path)?;
        let mut ids = self.allocators();
        let items = op(&mut ids, embed, current)?;
        self.update_with(&mut ids, &existing, &array::patch_for(path, items))
    }

    fn allocators(&self) -> IdAllocators<'a> {
        IdAllocators::new(&self.db.registry, self.db.store.as_ref())
    }

    fn insert_with(&self, ids: &mut IdAllocators<'a>, raw: &Value) -> Result<Document> {
        let mut builder = DocumentBuilder::new(ids, Utc::now());
        let document = builder.build_insert(&self.name, raw)?;
        let pending = builder.into_pending();
        self.commit(ids, pending, document.clone())?;
        log::debug!("inserted into '{}': {:?}", self.name, document.get("id"));
        Ok(document)
    }

    fn update_with(&self, ids: &mut IdAllocators<'a>, existing: &Document, patch: &Value) -> Result<Document> {
        let mut builder = DocumentBuilder::new(ids, Utc::now());
        let document = builder.build_update(&self.name, existing, patch)?;
        let pending = builder.into_pending();
        self.commit(ids, pending, document.clone())?;
        Ok(document)
    }

    /// Record id counters that moved, then persist sub-documents grouped by
    /// collection, then the document itself. Stored ids never run ahead of their
    /// counter, even when a later write fails.
    fn commit(&self, ids: &mut IdAllocators<'a>, pending: Vec<PendingWrite>, document: Document) -> Result<()> {
        ids.record_counters()?;
        let mut groups: Vec<(String, Vec<Document>)> = Vec::new();
        for write in pending {
            match groups.iter_mut().find(|(name, _)| *name == write.collection) {
                Some((_, docs)) => docs.push(write.document),
                None => groups.push((write.collection, vec![write.document])),
            }
        }
        for (collection, documents) in groups {
            log::debug!("persisting {} embedded documents into '{collection}'", documents.len());
            self.db.store.persist(&collection, documents)?;
        }
        self.db.store.persist(&self.name, vec![document])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema_str;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    const SCHEMA: &str = r#"
collections:
  users:
    fields:
      name: { type: String, required: true }
      age: Number
      group: { $ref: groups }
      tags: [Number]
  groups:
    fields:
      title: String
"#;

    fn database() -> Database {
        Database::new(parse_schema_str(SCHEMA).unwrap(), MemoryStore::default())
    }

    #[test]
    fn test_unknown_collection() {
        let db = database();
        assert!(matches!(
            db.collection("nope").err(),
            Some(ShelfError::UnknownCollection(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_insert_persists_created_references() {
        let db = database();
        let users = db.collection("users").unwrap();
        let user = users
            .insert(&json!({ "name": "Tom", "group": { "title": "G1" } }))
            .unwrap();
        assert_eq!(user["id"], json!(1));
        assert_eq!(user["group"], json!({ "collection": "groups", "$ref": 1 }));

        let group = db.collection("groups").unwrap().find_by_id(1u64).unwrap();
        assert_eq!(group["title"], json!("G1"));
        assert_eq!(db.store().store_state("groups").unwrap().id_count, 1);
        assert_eq!(db.store().store_state("users").unwrap().id_count, 1);
    }

    /// Refuses every write to one collection.
    struct ReadOnlyCollection {
        inner: MemoryStore,
        collection: &'static str,
    }

    impl StoreBackend for ReadOnlyCollection {
        fn store_state(&self, collection: &str) -> Result<crate::store::StoreState> {
            self.inner.store_state(collection)
        }

        fn fetch_by_id(&self, collection: &str, id: &DocId) -> Result<Option<Document>> {
            self.inner.fetch_by_id(collection, id)
        }

        fn fetch_all(&self, collection: &str) -> Result<Vec<Document>> {
            self.inner.fetch_all(collection)
        }

        fn persist(&self, collection: &str, documents: Vec<Document>) -> Result<()> {
            if collection == self.collection {
                return Err(ShelfError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only",
                )));
            }
            self.inner.persist(collection, documents)
        }

        fn remove(&self, collection: &str, ids: &[DocId]) -> Result<usize> {
            self.inner.remove(collection, ids)
        }

        fn record_id_count(&self, collection: &str, count: u64) -> Result<()> {
            self.inner.record_id_count(collection, count)
        }
    }

    #[test]
    fn test_failed_write_keeps_counters_ahead_of_stored_ids() {
        let store = ReadOnlyCollection {
            inner: MemoryStore::default(),
            collection: "users",
        };
        let db = Database::new(parse_schema_str(SCHEMA).unwrap(), store);
        let users = db.collection("users").unwrap();
        let err = users
            .insert(&json!({ "name": "Tom", "group": { "title": "G1" } }))
            .unwrap_err();
        assert!(matches!(err, ShelfError::Io(_)));
        assert_eq!(db.store().store_state("groups").unwrap().id_count, 1);

        let groups = db.collection("groups").unwrap();
        let group = groups.insert(&json!({ "title": "G2" })).unwrap();
        assert_eq!(group["id"], json!(2));
    }

    #[test]
    fn test_insert_many_aborts_on_first_failure() {
        let db = database();
        let users = db.collection("users").unwrap();
        let err = users
            .insert_many(&[json!({ "name": "a" }), json!({ "age": 3 }), json!({ "name": "c" })])
            .unwrap_err();
        assert!(matches!(err, ShelfError::Validation { .. }));
        assert_eq!(users.count(&Query::new()).unwrap(), 1);
    }

    #[test]
    fn test_update_and_delete() {
        let db = database();
        let users = db.collection("users").unwrap();
        users
            .insert_many(&[
                json!({ "name": "a", "age": 1 }),
                json!({ "name": "b", "age": 2 }),
                json!({ "name": "c", "age": 3 }),
            ])
            .unwrap();

        let updated = users.update_by_id(2u64, &json!({ "age": 20 })).unwrap();
        assert_eq!(updated["name"], json!("b"));
        assert_eq!(updated["age"], json!(20));

        let bumped = users.update_many(&Query::new().filter("age < 5"), &json!({ "age": 5 })).unwrap();
        assert_eq!(bumped.len(), 2);
        assert_eq!(users.count(&Query::new().filter("age = 5")).unwrap(), 2);

        users.delete_by_id(1u64).unwrap();
        assert!(matches!(users.delete_by_id(1u64).unwrap_err(), ShelfError::NotFound { .. }));
        assert_eq!(users.delete_many(&Query::new().filter("age = 5")).unwrap(), 1);
        assert_eq!(users.count(&Query::new()).unwrap(), 1);
        assert!(users.find_by_id(9u64).is_err());
    }

    #[test]
    fn test_array_operations_go_through_validation() {
        let db = database();
        let users = db.collection("users").unwrap();
        users.insert(&json!({ "name": "a", "tags": [1] })).unwrap();

        let doc = users.insert_into(1u64, "tags", vec![json!(2)]).unwrap();
        assert_eq!(doc["tags"], json!([1, 2]));
        assert!(users.insert_into(1u64, "tags", vec![json!("x")]).is_err());

        let doc = users.remove_from(1u64, "tags", &[json!(1)]).unwrap();
        assert_eq!(doc["tags"], json!([2]));

        let matcher = ArrayMatcher::parse("$item = 2").unwrap();
        let doc = users.update_array(1u64, "tags", &matcher, vec![json!(3)]).unwrap();
        assert_eq!(doc["tags"], json!([3]));
        assert_eq!(users.find_by_id(1u64).unwrap()["tags"], json!([3]));
    }

    #[test]
    fn test_parse_id_and_status() {
        let db = database();
        let users = db.collection("users").unwrap();
        assert_eq!(users.parse_id("12").unwrap(), DocId::Int(12));
        assert!(users.parse_id("abc").is_err());
        assert!(users.parse_id("0").is_err());

        users.insert(&json!({ "name": "a" })).unwrap();
        let status = db.status().unwrap();
        assert_eq!(status["collections"]["users"]["count"], json!(1));
        assert_eq!(status["collections"]["groups"]["count"], json!(0));
        assert_eq!(status["collections"]["users"]["id_kind"], json!("$incr"));
    }
}
