use std::collections::{HashMap, HashSet};

use hnsw_rs::prelude::*;
use parking_lot::RwLock;

use chunk_model::{ChunkId, Filter};

use crate::error::VectorStoreError;
use crate::payload::VectorPayload;

const DEFAULT_MAX_NB_CONNECTION: usize = 24;
const DEFAULT_MAX_ELEMENTS: usize = 1_000_000;
const DEFAULT_MAX_LAYER: usize = 16;
const DEFAULT_EF_CONSTRUCTION: usize = 200;
const DEFAULT_EF_SEARCH: usize = 64;

/// Over-fetch multiplier applied before filtering.
pub const DEFAULT_FETCH_FACTOR: usize = 10;

/// Everything that changes together on a write: the graph itself plus the
/// side tables that give `ChunkId` identity to its opaque internal ids.
///
/// `hnsw_rs` graphs only grow — there is no node removal — so a delete or a
/// re-upsert of an existing id tombstones the old internal id rather than
/// reclaiming it. A background compaction that rebuilds the graph from the
/// live payload set would reclaim that space; not needed at this scale.
struct Inner {
    hnsw: Hnsw<f32, DistDot>,
    next_id: usize,
    id_to_chunk: Vec<Option<ChunkId>>,
    chunk_to_id: HashMap<ChunkId, usize>,
    payloads: HashMap<ChunkId, VectorPayload>,
    vectors: HashMap<ChunkId, Vec<f32>>,
    dim: Option<usize>,
    embedding_model_id: Option<String>,
}

impl Inner {
    fn new() -> Self {
        Self {
            hnsw: Hnsw::new(
                DEFAULT_MAX_NB_CONNECTION,
                DEFAULT_MAX_ELEMENTS,
                DEFAULT_MAX_LAYER,
                DEFAULT_EF_CONSTRUCTION,
                DistDot {},
            ),
            next_id: 0,
            id_to_chunk: Vec::new(),
            chunk_to_id: HashMap::new(),
            payloads: HashMap::new(),
            vectors: HashMap::new(),
            dim: None,
            embedding_model_id: None,
        }
    }

    fn tombstone(&mut self, chunk_id: &ChunkId) {
        if let Some(old_id) = self.chunk_to_id.remove(chunk_id) {
            if let Some(slot) = self.id_to_chunk.get_mut(old_id) {
                *slot = None;
            }
        }
        self.payloads.remove(chunk_id);
        self.vectors.remove(chunk_id);
    }
}

/// ANN index over normalized embedding vectors, backed by `hnsw_rs` with a
/// payload side-table for post-hoc filtering.
pub struct HnswVectorStore {
    inner: RwLock<Inner>,
}

impl Default for HnswVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HnswVectorStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::new()),
        }
    }

    fn normalize(vector: &mut [f32]) {
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in vector.iter_mut() {
                *x /= norm;
            }
        }
    }

    pub fn upsert(
        &self,
        chunk_id: ChunkId,
        mut vector: Vec<f32>,
        payload: VectorPayload,
    ) -> Result<(), VectorStoreError> {
        Self::normalize(&mut vector);
        let mut inner = self.inner.write();

        match inner.dim {
            None => inner.dim = Some(vector.len()),
            Some(dim) if dim != vector.len() => {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: dim,
                    actual: vector.len(),
                })
            }
            Some(_) => {}
        }

        if inner.chunk_to_id.contains_key(&chunk_id) {
            inner.tombstone(&chunk_id);
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.hnsw.insert((vector.as_slice(), id));
        if inner.id_to_chunk.len() <= id {
            inner.id_to_chunk.resize(id + 1, None);
        }
        inner.id_to_chunk[id] = Some(chunk_id.clone());
        inner.chunk_to_id.insert(chunk_id.clone(), id);
        inner.vectors.insert(chunk_id.clone(), vector);
        inner.payloads.insert(chunk_id, payload);
        Ok(())
    }

    pub fn delete(&self, chunk_ids: &[ChunkId]) -> Result<usize, VectorStoreError> {
        let mut inner = self.inner.write();
        let mut removed = 0;
        for chunk_id in chunk_ids {
            if inner.chunk_to_id.contains_key(chunk_id) {
                inner.tombstone(chunk_id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: &Filter,
    ) -> Result<Vec<(ChunkId, f32)>, VectorStoreError> {
        let inner = self.inner.read();
        if inner.next_id == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let mut query = vector.to_vec();
        Self::normalize(&mut query);

        let mut fetched = k.saturating_mul(DEFAULT_FETCH_FACTOR).max(k);
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        loop {
            let neighbours = inner
                .hnsw
                .search(query.as_slice(), fetched, DEFAULT_EF_SEARCH);
            out.clear();
            seen.clear();
            for n in &neighbours {
                let Some(Some(chunk_id)) = inner.id_to_chunk.get(n.d_id) else {
                    continue;
                };
                if !seen.insert(chunk_id.clone()) {
                    continue;
                }
                let Some(payload) = inner.payloads.get(chunk_id) else {
                    continue;
                };
                if !filter.is_empty() && !payload.matches(filter) {
                    continue;
                }
                // hnsw_rs's DistDot returns a distance; for unit vectors
                // cosine similarity is `1.0 - distance`.
                out.push((chunk_id.clone(), 1.0 - n.distance));
                if out.len() >= k {
                    break;
                }
            }

            if out.len() >= k || neighbours.len() < fetched || fetched >= inner.next_id {
                break;
            }
            fetched = (fetched * 2).min(inner.next_id);
        }

        out.truncate(k);
        Ok(out)
    }

    pub fn count(&self) -> usize {
        self.inner.read().chunk_to_id.len()
    }

    pub fn embedding_model_id(&self) -> Option<String> {
        self.inner.read().embedding_model_id.clone()
    }

    pub fn get_vector(&self, chunk_id: &ChunkId) -> Option<Vec<f32>> {
        self.inner.read().vectors.get(chunk_id).cloned()
    }

    /// Every chunk id currently live in the store, for the startup
    /// orphan-consistency scan against the metadata store.
    pub fn chunk_ids(&self) -> std::collections::BTreeSet<ChunkId> {
        self.inner.read().chunk_to_id.keys().cloned().collect()
    }

    /// Record (or validate against) the embedder that produced every vector
    /// in this store.
    pub fn bind_embedding_model(&self, embedding_model_id: &str) -> Result<(), VectorStoreError> {
        let mut inner = self.inner.write();
        match &inner.embedding_model_id {
            None => {
                inner.embedding_model_id = Some(embedding_model_id.to_string());
                Ok(())
            }
            Some(existing) if existing == embedding_model_id => Ok(()),
            Some(existing) => Err(VectorStoreError::ModelMismatch {
                expected: existing.clone(),
                actual: embedding_model_id.to_string(),
            }),
        }
    }

    pub(crate) fn snapshot_entries(
        &self,
    ) -> (Option<usize>, Option<String>, Vec<(ChunkId, Vec<f32>, VectorPayload)>) {
        let inner = self.inner.read();
        let mut entries = Vec::new();
        for chunk_id in inner.chunk_to_id.keys() {
            if let (Some(payload), Some(vector)) =
                (inner.payloads.get(chunk_id), inner.vectors.get(chunk_id))
            {
                entries.push((chunk_id.clone(), vector.clone(), payload.clone()));
            }
        }
        (inner.dim, inner.embedding_model_id.clone(), entries)
    }

    pub(crate) fn restore_entries(
        &self,
        dim: Option<usize>,
        embedding_model_id: Option<String>,
        entries: Vec<(ChunkId, Vec<f32>, VectorPayload)>,
    ) {
        let mut inner = self.inner.write();
        *inner = Inner::new();
        inner.dim = dim;
        inner.embedding_model_id = embedding_model_id;
        for (chunk_id, vector, payload) in entries {
            let id = inner.next_id;
            inner.next_id += 1;
            inner.hnsw.insert((vector.as_slice(), id));
            if inner.id_to_chunk.len() <= id {
                inner.id_to_chunk.resize(id + 1, None);
            }
            inner.id_to_chunk[id] = Some(chunk_id.clone());
            inner.chunk_to_id.insert(chunk_id.clone(), id);
            inner.vectors.insert(chunk_id.clone(), vector);
            inner.payloads.insert(chunk_id, payload);
        }
    }
}
