use crate::document::{type_name, DocId};
use crate::error::{Result, ShelfError};
use crate::schema::{IdKind, SchemaNode, SchemaRegistry, SchemaTree, MAX_SAFE_ID};
use crate::store::{StoreBackend, StoreState};
use serde_json::Value;
use std::collections::HashMap;

/// Preferred length of a generated `$uid`, clamped into the declared bounds.
const UID_LENGTH: usize = 21;
const UID_ATTEMPTS: usize = 8;

/// Id space of one collection for the duration of an operation.
///
/// Seeded from the store's state, then updated as ids are generated or claimed so
/// later documents of the same batch see them.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    collection: String,
    kind: IdKind,
    max: u64,
    min_len: usize,
    max_len: usize,
    count: u64,
    initial_count: u64,
    ids: std::collections::HashSet<DocId>,
    shard_max: usize,
}

impl IdAllocator {
    pub fn new(tree: &SchemaTree, state: StoreState) -> Self {
        let (max, min_len, max_len) = match tree.id_node() {
            SchemaNode::IncrId { max } => (*max, 0, 0),
            SchemaNode::UidId { min_len, max_len } => (MAX_SAFE_ID, *min_len, *max_len),
            _ => (MAX_SAFE_ID, 0, 0),
        };
        IdAllocator {
            collection: tree.collection.clone(),
            kind: tree.id_kind(),
            max,
            min_len,
            max_len,
            count: state.id_count,
            initial_count: state.id_count,
            ids: state.ids,
            shard_max: state.shard_max,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn kind(&self) -> IdKind {
        self.kind
    }

    /// Last auto-increment value handed out.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn shard_max(&self) -> usize {
        self.shard_max
    }

    pub fn contains(&self, id: &DocId) -> bool {
        self.ids.contains(id)
    }

    /// Produce a fresh id and reserve it.
    pub fn generate(&mut self) -> Result<DocId> {
        match self.kind {
            IdKind::Incr => {
                let next = self.count + 1;
                if next > self.max {
                    return Err(ShelfError::Capacity(format!(
                        "id space of '{}' is exhausted (max {})",
                        self.collection, self.max
                    )));
                }
                let id = DocId::Int(next);
                if self.ids.contains(&id) {
                    return Err(ShelfError::validation(
                        "id",
                        format!("generated id {next} is already in use in '{}'", self.collection),
                    ));
                }
                self.count = next;
                self.ids.insert(id.clone());
                Ok(id)
            }
            IdKind::Uid => {
                let length = UID_LENGTH.clamp(self.min_len, self.max_len);
                for _ in 0..UID_ATTEMPTS {
                    let id = DocId::Str(nanoid::nanoid!(length));
                    if self.ids.insert(id.clone()) {
                        return Ok(id);
                    }
                }
                Err(ShelfError::validation(
                    "id",
                    format!("could not generate an unused id for '{}'", self.collection),
                ))
            }
        }
    }

    /// Check an id value against this id space.
    ///
    /// With `exists` set the id must already be present (a reference target); without
    /// it the id must be free (an explicit id on insert).
    pub fn validate(&self, field: &str, value: &Value, exists: bool) -> Result<DocId> {
        let id = self.cast(field, value)?;
        match (exists, self.ids.contains(&id)) {
            (true, false) => Err(ShelfError::not_found(&self.collection, &id)),
            (false, true) => Err(ShelfError::validation(
                field,
                format!("duplicate id {id} in '{}'", self.collection),
            )),
            _ => Ok(id),
        }
    }

    /// Reserve an explicitly supplied id. For `$incr` the counter is raised to it.
    pub fn claim(&mut self, field: &str, value: &Value) -> Result<DocId> {
        let id = self.validate(field, value, false)?;
        if let DocId::Int(n) = id {
            self.count = self.count.max(n);
        }
        self.ids.insert(id.clone());
        Ok(id)
    }

    /// Shape and range check only.
    pub fn cast(&self, field: &str, value: &Value) -> Result<DocId> {
        match self.kind {
            IdKind::Incr => {
                let n = value.as_u64().filter(|n| *n > 0).ok_or_else(|| {
                    ShelfError::type_error(
                        field,
                        format!("expected a positive integer id, got {}", describe(value)),
                    )
                })?;
                if n > self.max {
                    return Err(ShelfError::validation(
                        field,
                        format!("id {n} exceeds the maximum of {}", self.max),
                    ));
                }
                Ok(DocId::Int(n))
            }
            IdKind::Uid => {
                let text = value.as_str().ok_or_else(|| {
                    ShelfError::type_error(
                        field,
                        format!("expected a string id, got {}", describe(value)),
                    )
                })?;
                let length = text.chars().count();
                if length < self.min_len || length > self.max_len {
                    return Err(ShelfError::validation(
                        field,
                        format!(
                            "id length must be within {}..={}, got {length}",
                            self.min_len, self.max_len
                        ),
                    ));
                }
                Ok(DocId::Str(text.to_string()))
            }
        }
    }

    fn counter_changed(&self) -> bool {
        self.kind == IdKind::Incr && self.count != self.initial_count
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{s}'"),
        other => type_name(other).to_string(),
    }
}

/// Lazily loaded id spaces of every collection an operation touches.
pub struct IdAllocators<'a> {
    registry: &'a SchemaRegistry,
    store: &'a dyn StoreBackend,
    allocators: HashMap<String, IdAllocator>,
}

impl<'a> IdAllocators<'a> {
    pub fn new(registry: &'a SchemaRegistry, store: &'a dyn StoreBackend) -> Self {
        IdAllocators {
            registry,
            store,
            allocators: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &'a SchemaRegistry {
        self.registry
    }

    pub fn store(&self) -> &'a dyn StoreBackend {
        self.store
    }

    pub fn get(&mut self, collection: &str) -> Result<&mut IdAllocator> {
        if !self.allocators.contains_key(collection) {
            let tree = self.registry.tree(collection)?;
            let state = self.store.store_state(collection)?;
            log::debug!(
                "loaded id space of '{collection}': {} ids, counter {}",
                state.ids.len(),
                state.id_count
            );
            self.allocators
                .insert(collection.to_string(), IdAllocator::new(tree, state));
        }
        self.allocators
            .get_mut(collection)
            .ok_or_else(|| ShelfError::UnknownCollection(collection.to_string()))
    }

    /// Auto-increment counters that moved during the operation.
    pub fn changed_counters(&self) -> Vec<(String, u64)> {
        let mut changed: Vec<(String, u64)> = self
            .allocators
            .values()
            .filter(|alloc| alloc.counter_changed())
            .map(|alloc| (alloc.collection.clone(), alloc.count))
            .collect();
        changed.sort();
        changed
    }

    /// Write moved counters back to the store.
    pub fn record_counters(&mut self) -> Result<()> {
        for (collection, count) in self.changed_counters() {
            self.store.record_id_count(&collection, count)?;
            if let Some(alloc) = self.allocators.get_mut(&collection) {
                alloc.initial_count = count;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema_str;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn tree(id_decl: &str) -> SchemaTree {
        let registry = parse_schema_str(&format!(
            "collections:\n  items:\n    fields:\n      id: {id_decl}\n      name: String\n"
        ))
        .unwrap();
        registry.tree("items").unwrap().clone()
    }

    fn state(count: u64, ids: &[u64]) -> StoreState {
        StoreState {
            id_count: count,
            ids: ids.iter().copied().map(DocId::Int).collect(),
            shard_max: 1024,
        }
    }

    #[test]
    fn test_incr_generates_sequentially() {
        let mut alloc = IdAllocator::new(&tree("$incr"), state(0, &[]));
        assert_eq!(alloc.generate().unwrap(), DocId::Int(1));
        assert_eq!(alloc.generate().unwrap(), DocId::Int(2));
        assert_eq!(alloc.count(), 2);
    }

    #[test]
    fn test_incr_rejects_past_max() {
        let mut alloc = IdAllocator::new(&tree("{ type: $incr, max: 2 }"), state(2, &[1, 2]));
        assert!(matches!(alloc.generate().unwrap_err(), ShelfError::Capacity(_)));
    }

    #[test]
    fn test_incr_rejects_generated_duplicate() {
        let mut alloc = IdAllocator::new(&tree("$incr"), state(0, &[1]));
        let err = alloc.generate().unwrap_err();
        assert!(err.to_string().contains("already in use"));
    }

    #[test]
    fn test_claim_raises_counter() {
        let mut alloc = IdAllocator::new(&tree("$incr"), state(3, &[1, 2, 3]));
        assert_eq!(alloc.claim("id", &json!(10)).unwrap(), DocId::Int(10));
        assert_eq!(alloc.generate().unwrap(), DocId::Int(11));
        assert!(alloc.claim("id", &json!(10)).is_err());
        assert!(matches!(
            alloc.claim("id", &json!(0)).unwrap_err(),
            ShelfError::Type { .. }
        ));
    }

    #[test]
    fn test_validate_modes() {
        let alloc = IdAllocator::new(&tree("$incr"), state(2, &[1, 2]));
        assert!(alloc.validate("ref", &json!(2), true).is_ok());
        assert!(matches!(
            alloc.validate("ref", &json!(5), true).unwrap_err(),
            ShelfError::NotFound { .. }
        ));
        assert!(alloc.validate("id", &json!(5), false).is_ok());
        assert!(alloc.validate("id", &json!(2), false).is_err());
    }

    #[test]
    fn test_uid_generation_respects_bounds() {
        let mut alloc = IdAllocator::new(
            &tree("{ type: $uid, minLength: 8, maxLength: 10 }"),
            StoreState::default(),
        );
        match alloc.generate().unwrap() {
            DocId::Str(id) => assert_eq!(id.len(), 10),
            other => panic!("unexpected id {other:?}"),
        }
        assert!(alloc.claim("id", &json!("short")).is_err());
        assert!(alloc.claim("id", &json!("justright")).is_ok());
        assert!(alloc.cast("id", &json!(4)).is_err());
    }

    #[test]
    fn test_allocators_record_moved_counters() {
        let registry = parse_schema_str(
            "collections:\n  a:\n    fields:\n      n: Number\n  b:\n    fields:\n      n: Number\n",
        )
        .unwrap();
        let store = MemoryStore::default();
        let mut ids = IdAllocators::new(&registry, &store);
        ids.get("a").unwrap().generate().unwrap();
        ids.get("b").unwrap();
        assert_eq!(ids.changed_counters(), vec![("a".to_string(), 1)]);

        ids.record_counters().unwrap();
        assert!(ids.changed_counters().is_empty());
        assert_eq!(store.store_state("a").unwrap().id_count, 1);
        assert!(ids.get("missing").is_err());
    }
}
