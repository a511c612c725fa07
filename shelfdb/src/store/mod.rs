//! The physical store behind the document engine.
//!
//! The engine only ever talks to storage through [`StoreBackend`]: it reads id-space
//! facts and documents, and hands back whole documents to persist. Shard placement,
//! file naming and counters on disk are the backend's business.

pub mod file;
pub mod memory;

use crate::document::{DocId, Document};
use crate::error::Result;
use std::collections::HashSet;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Snapshot of a collection's id space and capacity at call time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreState {
    /// Last value handed out by the auto-increment counter.
    pub id_count: u64,
    /// Every id currently stored.
    pub ids: HashSet<DocId>,
    /// Largest serialized size, in bytes, of a single shard. See [`document_max`].
    pub shard_max: usize,
}

pub trait StoreBackend: Send + Sync {
    fn store_state(&self, collection: &str) -> Result<StoreState>;

    fn fetch_by_id(&self, collection: &str, id: &DocId) -> Result<Option<Document>>;

    /// All documents of a collection, in storage order.
    fn fetch_all(&self, collection: &str) -> Result<Vec<Document>>;

    /// Upsert documents by id: existing ids are replaced in place, new ones appended.
    fn persist(&self, collection: &str, documents: Vec<Document>) -> Result<()>;

    /// Remove documents by id, returning how many were present.
    fn remove(&self, collection: &str, ids: &[DocId]) -> Result<usize>;

    fn record_id_count(&self, collection: &str, count: u64) -> Result<()>;
}

/// Bytes a shard spends on its enclosing `[` and `]`.
pub const SHARD_FRAMING: usize = 2;

/// Largest serialized document a shard of `shard_max` bytes can hold.
pub fn document_max(shard_max: usize) -> usize {
    shard_max.saturating_sub(SHARD_FRAMING)
}

/// Merge `documents` into `existing` by id, keeping storage order.
pub(crate) fn upsert(existing: &mut Vec<Document>, documents: Vec<Document>) {
    for doc in documents {
        let id = doc.get(crate::document::ID_FIELD).cloned();
        match existing
            .iter_mut()
            .find(|stored| id.is_some() && stored.get(crate::document::ID_FIELD) == id.as_ref())
        {
            Some(stored) => *stored = doc,
            None => existing.push(doc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_upsert_replaces_and_appends() {
        let mut existing = vec![doc(json!({ "id": 1, "v": "a" })), doc(json!({ "id": 2, "v": "b" }))];
        upsert(
            &mut existing,
            vec![doc(json!({ "id": 2, "v": "B" })), doc(json!({ "id": 3, "v": "c" }))],
        );
        let values: Vec<_> = existing.iter().map(|d| d["v"].clone()).collect();
        assert_eq!(values, vec![json!("a"), json!("B"), json!("c")]);
    }
}
