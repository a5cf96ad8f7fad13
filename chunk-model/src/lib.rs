//! Shared domain types used across the Nexus retrieval core's crates:
//! ids, the Source/Document/Chunk/Embedding data model, the filter
//! grammar, configuration, and the cross-cutting error/loader shapes.

pub mod config;
pub mod errors;
pub mod filter;
pub mod ids;
pub mod loader;
pub mod types;

pub use config::{ChunkingConfig, ConfigError, EmbeddingConfig, IngestConfig, NexusConfig, RetrievalConfig};
pub use errors::CorpusError;
pub use filter::{parse, Filter, FilterClause, FilterParseError};
pub use ids::{derive_chunk_id, ChunkId, ContentHash, DocumentId, SourceId};
pub use loader::{DocumentLoader, LoadedDocument};
pub use types::{
    Chunk, ChunkDiff, Document, Embedding, NewDocument, NewSource, NexusStats, PostingEntry,
    SearchDiagnostics, SearchResult, Source, SourceKind, UpsertOutcome,
};

