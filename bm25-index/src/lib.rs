//! Sparse BM25 posting-list index over the set of live chunks.
//!
//! Kept as a dedicated hand-rolled inverted index rather than delegated to
//! SQLite FTS5 or Tantivy because a `k1`/`b`-tunable scoring formula and
//! exact on-disk layout are first-class requirements, not an afterthought
//! bolted onto someone else's ranking function.

mod error;
mod index;
pub mod persist;
mod tokenize;

pub use error::Bm25Error;
pub use index::{Bm25Params, PostingListIndex};
pub use tokenize::Tokenizer;

use std::path::Path;

use chunk_model::ChunkId;

/// Behavior `hybrid-retriever` and `nexus-service` need from the sparse
/// index. `PostingListIndex` is the only implementation; the trait exists
/// so callers depend on behavior rather than the concrete posting-list
/// representation, mirroring `vector-store::VectorStore`.
pub trait Bm25Index: Send + Sync {
    fn add(&self, chunk_id: ChunkId, tokens: &[String]);
    fn remove(&self, chunk_id: &ChunkId);
    fn search(&self, query_tokens: &[String], k: usize, filter: &dyn Fn(&ChunkId) -> bool) -> Vec<(ChunkId, f32)>;
    fn doc_count(&self) -> usize;
    fn term_count(&self) -> usize;
    fn avg_doc_length(&self) -> f32;
    fn chunk_ids(&self) -> std::collections::BTreeSet<ChunkId>;
}

impl Bm25Index for PostingListIndex {
    fn add(&self, chunk_id: ChunkId, tokens: &[String]) {
        PostingListIndex::add(self, chunk_id, tokens)
    }

    fn remove(&self, chunk_id: &ChunkId) {
        PostingListIndex::remove(self, chunk_id)
    }

    fn search(&self, query_tokens: &[String], k: usize, filter: &dyn Fn(&ChunkId) -> bool) -> Vec<(ChunkId, f32)> {
        PostingListIndex::search(self, query_tokens, k, filter)
    }

    fn doc_count(&self) -> usize {
        PostingListIndex::doc_count(self)
    }

    fn term_count(&self) -> usize {
        PostingListIndex::term_count(self)
    }

    fn avg_doc_length(&self) -> f32 {
        PostingListIndex::avg_doc_length(self)
    }

    fn chunk_ids(&self) -> std::collections::BTreeSet<ChunkId> {
        PostingListIndex::chunk_ids(self)
    }
}

/// Persists `index` under `dir` (`index.bin` + `lengths.bin`).
pub fn persist(index: &PostingListIndex, dir: &Path) -> Result<(), Bm25Error> {
    persist::save(index, dir)
}

/// Loads a snapshot written by [`persist`] into `index`, replacing its
/// contents. Returns [`Bm25Error::VersionMismatch`] on an incompatible
/// on-disk version; callers should rebuild from the metadata store in
/// that case rather than treat it as fatal.
pub fn load(index: &PostingListIndex, dir: &Path) -> Result<(), Bm25Error> {
    persist::load(index, dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trait_object_delegates_to_inherent_methods() {
        let index: Box<dyn Bm25Index> = Box::new(PostingListIndex::default());
        index.add(ChunkId::from("a"), &["hello".to_string(), "world".to_string()]);
        assert_eq!(index.doc_count(), 1);
        let results = index.search(&["hello".to_string()], 10, &|_| true);
        assert_eq!(results.len(), 1);
    }
}
