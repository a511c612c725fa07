use super::{document_max, upsert, StoreBackend, StoreState};
use crate::document::{document_id, DocId, Document};
use crate::error::{Result, ShelfError};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

const META_FILE: &str = "_meta.json";

/// Per-collection metadata kept next to the shards.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionMeta {
    #[serde(default)]
    id_count: u64,
}

/// Sharded JSON file store.
///
/// Every collection lives in `<root>/<collection>/` as a run of shard files
/// (`shard-0000.json`, `shard-0001.json`, ...). Each shard is a JSON array whose
/// serialized size stays under `shard_max` bytes. Writes rewrite the whole set, one
/// shard at a time, through a temp file in the same directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    shard_max: usize,
}

impl FileStore {
    pub fn open(root: &Path, shard_max: usize) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        log::info!("opened file store at {} (shard max {shard_max} bytes)", root.display());
        Ok(FileStore {
            root: root.to_path_buf(),
            shard_max,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(collection)
    }

    fn shard_paths(&self, collection: &str) -> Result<Vec<PathBuf>> {
        let dir = self.collection_dir(collection);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let pattern = format!("{}/shard-*.json", dir.display());
        let mut paths: Vec<PathBuf> = glob::glob(&pattern)?.filter_map(|r| r.ok()).collect();
        paths.sort();
        Ok(paths)
    }

    fn read_documents(&self, collection: &str) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        for path in self.shard_paths(collection)? {
            let content = std::fs::read_to_string(&path)?;
            let shard: Vec<Document> = serde_json::from_str(&content)?;
            documents.extend(shard);
        }
        Ok(documents)
    }

    fn write_documents(&self, collection: &str, documents: &[Document]) -> Result<()> {
        let dir = self.collection_dir(collection);
        std::fs::create_dir_all(&dir)?;

        let shards = pack_shards(documents, self.shard_max)?;
        for (index, shard) in shards.iter().enumerate() {
            write_atomic(&dir, &shard_name(index), shard)?;
        }

        // Drop shards left over from a larger previous layout.
        for path in self.shard_paths(collection)? {
            let keep = (0..shards.len()).any(|index| path.ends_with(shard_name(index)));
            if !keep {
                std::fs::remove_file(&path)?;
            }
        }

        log::debug!(
            "wrote {} documents to '{collection}' in {} shard(s)",
            documents.len(),
            shards.len()
        );
        Ok(())
    }

    fn read_meta(&self, collection: &str) -> Result<CollectionMeta> {
        let path = self.collection_dir(collection).join(META_FILE);
        if !path.exists() {
            return Ok(CollectionMeta::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

fn shard_name(index: usize) -> String {
    format!("shard-{index:04}.json")
}

/// Greedily fill shards in storage order so no shard exceeds `shard_max` bytes.
fn pack_shards(documents: &[Document], shard_max: usize) -> Result<Vec<Vec<u8>>> {
    let mut shards = Vec::new();
    let mut current: Vec<u8> = Vec::new();

    for doc in documents {
        let encoded = serde_json::to_vec(doc)?;
        if encoded.len() > document_max(shard_max) {
            return Err(ShelfError::Capacity(format!(
                "document of {} bytes does not fit in a shard of {shard_max} bytes",
                encoded.len()
            )));
        }
        // Current contents, a separating comma, the document and the closing bracket.
        if !current.is_empty() && current.len() + 1 + encoded.len() + 1 > shard_max {
            current.push(b']');
            shards.push(std::mem::take(&mut current));
        }
        if current.is_empty() {
            current.push(b'[');
        } else {
            current.push(b',');
        }
        current.extend_from_slice(&encoded);
    }

    if !current.is_empty() {
        current.push(b']');
        shards.push(current);
    }
    Ok(shards)
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(dir.join(name)).map_err(|e| e.error)?;
    Ok(())
}

impl StoreBackend for FileStore {
    fn store_state(&self, collection: &str) -> Result<StoreState> {
        let mut state = StoreState {
            id_count: self.read_meta(collection)?.id_count,
            shard_max: self.shard_max,
            ..StoreState::default()
        };
        for doc in self.read_documents(collection)? {
            state.ids.insert(document_id(&doc)?);
        }
        Ok(state)
    }

    fn fetch_by_id(&self, collection: &str, id: &DocId) -> Result<Option<Document>> {
        Ok(self
            .read_documents(collection)?
            .into_iter()
            .find(|doc| document_id(doc).ok().as_ref() == Some(id)))
    }

    fn fetch_all(&self, collection: &str) -> Result<Vec<Document>> {
        self.read_documents(collection)
    }

    fn persist(&self, collection: &str, documents: Vec<Document>) -> Result<()> {
        let mut existing = self.read_documents(collection)?;
        upsert(&mut existing, documents);
        self.write_documents(collection, &existing)
    }

    fn remove(&self, collection: &str, ids: &[DocId]) -> Result<usize> {
        let mut existing = self.read_documents(collection)?;
        let before = existing.len();
        existing.retain(|doc| !document_id(doc).map_or(false, |id| ids.contains(&id)));
        let removed = before - existing.len();
        if removed > 0 {
            self.write_documents(collection, &existing)?;
        }
        Ok(removed)
    }

    fn record_id_count(&self, collection: &str, count: u64) -> Result<()> {
        let dir = self.collection_dir(collection);
        std::fs::create_dir_all(&dir)?;
        let meta = CollectionMeta { id_count: count };
        write_atomic(&dir, META_FILE, &serde_json::to_vec_pretty(&meta)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SHARD_FRAMING;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(id: u64, body: &str) -> Document {
        json!({ "id": id, "body": body }).as_object().unwrap().clone()
    }

    #[test]
    fn test_persist_and_read_back() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path(), 4096).unwrap();

        store.persist("notes", vec![doc(1, "a"), doc(2, "b")]).unwrap();
        store.persist("notes", vec![doc(2, "B")]).unwrap();

        let all = store.fetch_all("notes").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1]["body"], "B");
        assert!(tmp.path().join("notes/shard-0000.json").exists());
    }

    #[test]
    fn test_documents_spread_over_shards() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path(), 64).unwrap();

        let docs: Vec<Document> = (1..=6).map(|i| doc(i, "some body text")).collect();
        store.persist("notes", docs).unwrap();

        let shards = store.shard_paths("notes").unwrap();
        assert!(shards.len() > 1);
        for path in &shards {
            assert!(std::fs::metadata(path).unwrap().len() <= 64);
        }
        assert_eq!(store.fetch_all("notes").unwrap().len(), 6);

        // Shrinking the set removes surplus shards.
        let ids: Vec<DocId> = (2..=6).map(DocId::Int).collect();
        assert_eq!(store.remove("notes", &ids).unwrap(), 5);
        assert_eq!(store.shard_paths("notes").unwrap().len(), 1);
    }

    #[test]
    fn test_oversized_document_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path(), 16).unwrap();
        let err = store
            .persist("notes", vec![doc(1, "far too long for this shard")])
            .unwrap_err();
        assert!(matches!(err, ShelfError::Capacity(_)));
    }

    #[test]
    fn test_document_at_the_limit_fits_in_one_shard() {
        let tmp = TempDir::new().unwrap();
        let fits = doc(1, &"x".repeat(10));
        let size = serde_json::to_vec(&fits).unwrap().len();
        let store = FileStore::open(tmp.path(), size + SHARD_FRAMING).unwrap();

        store.persist("notes", vec![fits]).unwrap();
        let shard = &store.shard_paths("notes").unwrap()[0];
        assert_eq!(std::fs::metadata(shard).unwrap().len() as usize, size + SHARD_FRAMING);

        let err = store.persist("notes", vec![doc(2, &"x".repeat(11))]).unwrap_err();
        assert!(matches!(err, ShelfError::Capacity(_)));
    }

    #[test]
    fn test_meta_counter() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::open(tmp.path(), 4096).unwrap();
        assert_eq!(store.store_state("notes").unwrap().id_count, 0);

        store.record_id_count("notes", 12).unwrap();
        let state = store.store_state("notes").unwrap();
        assert_eq!(state.id_count, 12);
        assert_eq!(state.shard_max, 4096);
    }
}
