use super::{upsert, StoreBackend, StoreState};
use crate::document::{document_id, DocId, Document};
use crate::error::{Result, ShelfError};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryCollection {
    documents: Vec<Document>,
    id_count: u64,
}

/// In-memory store, used by tests and by callers that do not need durability.
#[derive(Debug)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
    shard_max: usize,
}

impl MemoryStore {
    pub fn new(shard_max: usize) -> Self {
        MemoryStore {
            collections: RwLock::new(HashMap::new()),
            shard_max,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new(crate::schema::DatabaseConfig::default().shard_max_bytes)
    }
}

fn poisoned<T>(_: T) -> ShelfError {
    ShelfError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "memory store lock poisoned",
    ))
}

impl StoreBackend for MemoryStore {
    fn store_state(&self, collection: &str) -> Result<StoreState> {
        let collections = self.collections.read().map_err(poisoned)?;
        let mut state = StoreState {
            shard_max: self.shard_max,
            ..StoreState::default()
        };
        if let Some(col) = collections.get(collection) {
            state.id_count = col.id_count;
            for doc in &col.documents {
                state.ids.insert(document_id(doc)?);
            }
        }
        Ok(state)
    }

    fn fetch_by_id(&self, collection: &str, id: &DocId) -> Result<Option<Document>> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections.get(collection).and_then(|col| {
            col.documents
                .iter()
                .find(|doc| document_id(doc).ok().as_ref() == Some(id))
                .cloned()
        }))
    }

    fn fetch_all(&self, collection: &str) -> Result<Vec<Document>> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections
            .get(collection)
            .map(|col| col.documents.clone())
            .unwrap_or_default())
    }

    fn persist(&self, collection: &str, documents: Vec<Document>) -> Result<()> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let col = collections.entry(collection.to_string()).or_default();
        upsert(&mut col.documents, documents);
        Ok(())
    }

    fn remove(&self, collection: &str, ids: &[DocId]) -> Result<usize> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let Some(col) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = col.documents.len();
        col.documents
            .retain(|doc| !document_id(doc).map_or(false, |id| ids.contains(&id)));
        Ok(before - col.documents.len())
    }

    fn record_id_count(&self, collection: &str, count: u64) -> Result<()> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        collections.entry(collection.to_string()).or_default().id_count = count;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_roundtrip_state() {
        let store = MemoryStore::new(512);
        store
            .persist(
                "users",
                vec![json!({ "id": 1, "name": "a" }).as_object().unwrap().clone()],
            )
            .unwrap();
        store.record_id_count("users", 1).unwrap();

        let state = store.store_state("users").unwrap();
        assert_eq!(state.id_count, 1);
        assert!(state.ids.contains(&DocId::Int(1)));
        assert_eq!(state.shard_max, 512);

        let doc = store.fetch_by_id("users", &DocId::Int(1)).unwrap().unwrap();
        assert_eq!(doc["name"], "a");
        assert_eq!(store.remove("users", &[DocId::Int(1), DocId::Int(5)]).unwrap(), 1);
        assert!(store.fetch_all("users").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_collection_is_empty() {
        let store = MemoryStore::default();
        assert_eq!(store.store_state("nothing").unwrap().id_count, 0);
        assert!(store.fetch_by_id("nothing", &DocId::Int(1)).unwrap().is_none());
    }
}
