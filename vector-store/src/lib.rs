//! ANN vector index over L2-normalized embeddings, with a payload side
//! table for filtered search.

mod error;
mod index;
mod payload;
mod persist;

pub use error::VectorStoreError;
pub use index::{HnswVectorStore, DEFAULT_FETCH_FACTOR};
pub use payload::VectorPayload;
pub use persist::{load, save};

use chunk_model::{ChunkId, Filter};

/// Behavior `nexus-service` and `hybrid-retriever` need from the ANN index.
pub trait VectorStore: Send + Sync {
    fn upsert(&self, chunk_id: ChunkId, vector: Vec<f32>, payload: VectorPayload) -> Result<(), VectorStoreError>;
    fn delete(&self, chunk_ids: &[ChunkId]) -> Result<usize, VectorStoreError>;
    fn search(&self, vector: &[f32], k: usize, filter: &Filter) -> Result<Vec<(ChunkId, f32)>, VectorStoreError>;
    fn count(&self) -> usize;
    /// Owned rather than borrowed: the store's internals live behind an
    /// `RwLock`, so there is no `&str` to hand back without holding the guard.
    fn embedding_model_id(&self) -> Option<String>;
    /// Retrieves the (normalized) vector stored for `chunk_id`, if any.
    /// `find_related` uses this to turn a known chunk into a query vector
    /// without re-embedding its text.
    fn get_vector(&self, chunk_id: &ChunkId) -> Option<Vec<f32>>;
    /// Every chunk id currently live in the store, used by the startup
    /// orphan scan.
    fn chunk_ids(&self) -> std::collections::BTreeSet<ChunkId>;
    /// Records (or validates against) the embedder that produced every
    /// vector in this store. Called once by the ingestion pipeline before
    /// the first upsert.
    fn bind_embedding_model(&self, embedding_model_id: &str) -> Result<(), VectorStoreError>;
}

impl VectorStore for HnswVectorStore {
    fn upsert(&self, chunk_id: ChunkId, vector: Vec<f32>, payload: VectorPayload) -> Result<(), VectorStoreError> {
        HnswVectorStore::upsert(self, chunk_id, vector, payload)
    }

    fn delete(&self, chunk_ids: &[ChunkId]) -> Result<usize, VectorStoreError> {
        HnswVectorStore::delete(self, chunk_ids)
    }

    fn search(&self, vector: &[f32], k: usize, filter: &Filter) -> Result<Vec<(ChunkId, f32)>, VectorStoreError> {
        HnswVectorStore::search(self, vector, k, filter)
    }

    fn count(&self) -> usize {
        HnswVectorStore::count(self)
    }

    fn embedding_model_id(&self) -> Option<String> {
        HnswVectorStore::embedding_model_id(self)
    }

    fn get_vector(&self, chunk_id: &ChunkId) -> Option<Vec<f32>> {
        HnswVectorStore::get_vector(self, chunk_id)
    }

    fn chunk_ids(&self) -> std::collections::BTreeSet<ChunkId> {
        HnswVectorStore::chunk_ids(self)
    }

    fn bind_embedding_model(&self, embedding_model_id: &str) -> Result<(), VectorStoreError> {
        HnswVectorStore::bind_embedding_model(self, embedding_model_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;
    use chunk_model::{parse, DocumentId, SourceId, SourceKind};

    fn payload(source: &str, doc: &str, tags: &[&str]) -> VectorPayload {
        VectorPayload {
            source_id: SourceId::from(source),
            document_id: DocumentId::from(doc),
            tags: tags.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            kind: SourceKind::Directory,
            indexed_at: Utc::now(),
            section_path_prefix: "Intro".to_string(),
        }
    }

    #[test]
    fn search_returns_nearest_by_cosine() {
        let store = HnswVectorStore::new();
        store
            .upsert(ChunkId::from("a"), vec![1.0, 0.0, 0.0], payload("s1", "d1", &[]))
            .unwrap();
        store
            .upsert(ChunkId::from("b"), vec![0.0, 1.0, 0.0], payload("s1", "d1", &[]))
            .unwrap();
        store
            .upsert(ChunkId::from("c"), vec![0.9, 0.1, 0.0], payload("s1", "d1", &[]))
            .unwrap();

        let results = store
            .search(&[1.0, 0.0, 0.0], 2, &Filter::empty())
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, ChunkId::from("a"));
    }

    #[test]
    fn search_respects_filter() {
        let store = HnswVectorStore::new();
        store
            .upsert(ChunkId::from("a"), vec![1.0, 0.0], payload("s1", "d1", &["keep"]))
            .unwrap();
        store
            .upsert(ChunkId::from("b"), vec![1.0, 0.0], payload("s1", "d1", &["drop"]))
            .unwrap();

        let filter = parse("tag:keep").unwrap();
        let results = store.search(&[1.0, 0.0], 5, &filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, ChunkId::from("a"));
    }

    #[test]
    fn delete_removes_from_results() {
        let store = HnswVectorStore::new();
        store
            .upsert(ChunkId::from("a"), vec![1.0, 0.0], payload("s1", "d1", &[]))
            .unwrap();
        assert_eq!(store.count(), 1);
        let removed = store.delete(&[ChunkId::from("a")]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count(), 0);
        let results = store.search(&[1.0, 0.0], 5, &Filter::empty()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn upsert_overwrites_existing_chunk() {
        let store = HnswVectorStore::new();
        store
            .upsert(ChunkId::from("a"), vec![1.0, 0.0], payload("s1", "d1", &["v1"]))
            .unwrap();
        store
            .upsert(ChunkId::from("a"), vec![0.0, 1.0], payload("s1", "d1", &["v2"]))
            .unwrap();
        assert_eq!(store.count(), 1);
        let results = store.search(&[0.0, 1.0], 5, &Filter::empty()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, ChunkId::from("a"));
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.bin");

        let store = HnswVectorStore::new();
        store
            .upsert(ChunkId::from("a"), vec![1.0, 0.0, 0.0], payload("s1", "d1", &["x"]))
            .unwrap();
        store.bind_embedding_model("model-v1").unwrap();
        persist::save(&store, &path).unwrap();

        let restored = HnswVectorStore::new();
        persist::load(&restored, &path).unwrap();
        assert_eq!(restored.count(), 1);
        assert_eq!(restored.embedding_model_id().as_deref(), Some("model-v1"));
        let results = restored
            .search(&[1.0, 0.0, 0.0], 1, &Filter::empty())
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, ChunkId::from("a"));
    }

    #[test]
    fn get_vector_returns_normalized_stored_vector() {
        let store = HnswVectorStore::new();
        store
            .upsert(ChunkId::from("a"), vec![3.0, 4.0], payload("s1", "d1", &[]))
            .unwrap();
        let vector = store.get_vector(&ChunkId::from("a")).unwrap();
        assert!((vector[0] - 0.6).abs() < 1e-6);
        assert!((vector[1] - 0.8).abs() < 1e-6);
        assert!(store.get_vector(&ChunkId::from("missing")).is_none());
    }

    #[test]
    fn bind_embedding_model_detects_mismatch() {
        let store = HnswVectorStore::new();
        store.bind_embedding_model("model-a").unwrap();
        let err = store.bind_embedding_model("model-b").unwrap_err();
        assert!(matches!(err, VectorStoreError::ModelMismatch { .. }));
    }
}
