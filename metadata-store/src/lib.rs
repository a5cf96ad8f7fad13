//! Durable metadata store: sources, documents, and chunks.
//!
//! The store is the system's source of truth for chunk identity. The
//! vector store and BM25 index are derived, rebuildable projections over
//! the chunk ids this crate persists; `audit_orphans` is how a caller
//! checks that the three stay in sync after a crash or partial failure.

mod error;
mod schema;
mod store;

pub use error::MetadataError;
pub use store::{OrphanReport, SqliteMetadataStore};

use std::collections::BTreeSet;

use chunk_model::{Chunk, ChunkDiff, ChunkId, DocumentId, Filter, NewDocument, NewSource, NexusStats, Source, UpsertOutcome};

/// Operations the rest of the system needs from the metadata store.
///
/// `SqliteMetadataStore` is the only implementation today; the trait exists
/// so `nexus-service` depends on behavior, not on `rusqlite` directly, and
/// so tests can swap in an in-memory fake if the sqlite round-trip isn't
/// what's under test.
pub trait MetadataStore: Send + Sync {
    fn upsert_source(&self, new: NewSource) -> Result<Source, MetadataError>;
    fn delete_source(&self, source_id: &chunk_model::SourceId) -> Result<usize, MetadataError>;
    fn list_sources(&self) -> Result<Vec<Source>, MetadataError>;
    fn get_source(&self, source_id: &chunk_model::SourceId) -> Result<Option<Source>, MetadataError>;

    fn upsert_document(&self, new: NewDocument) -> Result<(DocumentId, UpsertOutcome), MetadataError>;
    fn delete_document(&self, document_id: &DocumentId) -> Result<usize, MetadataError>;
    fn get_document(&self, document_id: &DocumentId) -> Result<Option<chunk_model::Document>, MetadataError>;

    fn replace_chunks(&self, document_id: &DocumentId, new_chunks: Vec<Chunk>) -> Result<ChunkDiff, MetadataError>;
    fn get_chunks_for_document(&self, document_id: &DocumentId) -> Result<Vec<Chunk>, MetadataError>;
    fn get_chunk(&self, chunk_id: &ChunkId) -> Result<Option<Chunk>, MetadataError>;
    fn get_chunks_by_ids(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>, MetadataError>;
    fn list_chunk_ids(&self) -> Result<BTreeSet<ChunkId>, MetadataError>;
    fn list_chunks(&self, filter: &Filter) -> Result<Vec<Chunk>, MetadataError>;
    fn chunk_count_for_document(&self, document_id: &DocumentId) -> Result<usize, MetadataError>;

    fn stats(&self) -> Result<NexusStats, MetadataError>;
    fn audit_orphans(
        &self,
        vector_ids: &BTreeSet<ChunkId>,
        bm25_ids: &BTreeSet<ChunkId>,
    ) -> Result<OrphanReport, MetadataError>;
}

impl MetadataStore for SqliteMetadataStore {
    fn upsert_source(&self, new: NewSource) -> Result<Source, MetadataError> {
        SqliteMetadataStore::upsert_source(self, new)
    }

    fn delete_source(&self, source_id: &chunk_model::SourceId) -> Result<usize, MetadataError> {
        SqliteMetadataStore::delete_source(self, source_id)
    }

    fn list_sources(&self) -> Result<Vec<Source>, MetadataError> {
        SqliteMetadataStore::list_sources(self)
    }

    fn get_source(&self, source_id: &chunk_model::SourceId) -> Result<Option<Source>, MetadataError> {
        SqliteMetadataStore::get_source(self, source_id)
    }

    fn upsert_document(&self, new: NewDocument) -> Result<(DocumentId, UpsertOutcome), MetadataError> {
        SqliteMetadataStore::upsert_document(self, new)
    }

    fn delete_document(&self, document_id: &DocumentId) -> Result<usize, MetadataError> {
        SqliteMetadataStore::delete_document(self, document_id)
    }

    fn get_document(&self, document_id: &DocumentId) -> Result<Option<chunk_model::Document>, MetadataError> {
        SqliteMetadataStore::get_document(self, document_id)
    }

    fn replace_chunks(&self, document_id: &DocumentId, new_chunks: Vec<Chunk>) -> Result<ChunkDiff, MetadataError> {
        SqliteMetadataStore::replace_chunks(self, document_id, new_chunks)
    }

    fn get_chunks_for_document(&self, document_id: &DocumentId) -> Result<Vec<Chunk>, MetadataError> {
        SqliteMetadataStore::get_chunks_for_document(self, document_id)
    }

    fn get_chunk(&self, chunk_id: &ChunkId) -> Result<Option<Chunk>, MetadataError> {
        SqliteMetadataStore::get_chunk(self, chunk_id)
    }

    fn get_chunks_by_ids(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>, MetadataError> {
        SqliteMetadataStore::get_chunks_by_ids(self, ids)
    }

    fn list_chunk_ids(&self) -> Result<BTreeSet<ChunkId>, MetadataError> {
        SqliteMetadataStore::list_chunk_ids(self)
    }

    fn list_chunks(&self, filter: &Filter) -> Result<Vec<Chunk>, MetadataError> {
        SqliteMetadataStore::list_chunks(self, filter)
    }

    fn chunk_count_for_document(&self, document_id: &DocumentId) -> Result<usize, MetadataError> {
        SqliteMetadataStore::chunk_count_for_document(self, document_id)
    }

    fn stats(&self) -> Result<NexusStats, MetadataError> {
        SqliteMetadataStore::stats(self)
    }

    fn audit_orphans(
        &self,
        vector_ids: &BTreeSet<ChunkId>,
        bm25_ids: &BTreeSet<ChunkId>,
    ) -> Result<OrphanReport, MetadataError> {
        SqliteMetadataStore::audit_orphans(self, vector_ids, bm25_ids)
    }
}
