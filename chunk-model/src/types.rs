use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChunkId, ContentHash, DocumentId, SourceId};

/// The kind of content origin a [`Source`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Directory,
    File,
    Api,
    AdHoc,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Directory => "directory",
            SourceKind::File => "file",
            SourceKind::Api => "api",
            SourceKind::AdHoc => "ad-hoc",
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "directory" => Ok(SourceKind::Directory),
            "file" => Ok(SourceKind::File),
            "api" => Ok(SourceKind::Api),
            "ad-hoc" | "adhoc" => Ok(SourceKind::AdHoc),
            other => Err(format!("unknown source kind `{other}`")),
        }
    }
}

/// A registered content origin. Owns zero or more [`Document`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub source_id: SourceId,
    pub kind: SourceKind,
    pub root: String,
    pub created_at: DateTime<Utc>,
    pub last_scan_at: Option<DateTime<Utc>>,
}

/// Fields needed to register or re-scan a [`Source`].
#[derive(Debug, Clone)]
pub struct NewSource {
    pub kind: SourceKind,
    pub root: String,
}

/// One original unit of content (a markdown file, a PDF, an ingested blob).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: DocumentId,
    pub source_id: SourceId,
    pub uri: String,
    pub title: Option<String>,
    pub content_hash: ContentHash,
    pub byte_size: u64,
    pub mtime: DateTime<Utc>,
    pub tags: BTreeSet<String>,
    pub frontmatter: BTreeMap<String, serde_json::Value>,
}

/// Fields needed to upsert a [`Document`]; `document_id` is assigned by the
/// metadata store on first insert and is stable across re-ingests of the
/// same `(source_id, uri)` pair.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub source_id: SourceId,
    pub uri: String,
    pub title: Option<String>,
    pub content_hash: ContentHash,
    pub byte_size: u64,
    pub mtime: DateTime<Utc>,
    pub tags: BTreeSet<String>,
    pub frontmatter: BTreeMap<String, serde_json::Value>,
}

/// Result of [`crate::MetadataStore::upsert_document`] style operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Unchanged,
    Updated,
    Created,
}

/// The smallest retrievable unit: a contiguous slice of a document's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub ordinal: u32,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    pub section_path: Vec<String>,
    pub token_count: u32,
    pub embedding_version: u32,
    pub indexed_at: DateTime<Utc>,
}

/// Result of diffing an old chunk set against a newly-chunked document.
#[derive(Debug, Clone, Default)]
pub struct ChunkDiff {
    pub added: Vec<Chunk>,
    pub removed: Vec<ChunkId>,
    pub kept: Vec<ChunkId>,
}

/// A fixed-dimension dense vector tied to the chunk that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub chunk_id: ChunkId,
    pub vector: Vec<f32>,
    pub embedding_model_id: String,
    pub embedding_version: u32,
}

/// One `(term, chunk_id, term_frequency)` posting in the BM25 index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingEntry {
    pub term: String,
    pub chunk_id: ChunkId,
    pub term_frequency: u32,
}

/// Per-stage diagnostics attached to a [`SearchResult`] for observability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchDiagnostics {
    pub dense_rank: Option<u32>,
    pub sparse_rank: Option<u32>,
    pub rerank_score: Option<f32>,
    pub rerank_used: bool,
}

/// A ranked hit returned from the hybrid retriever. Transient, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub text: String,
    pub document_id: DocumentId,
    pub uri: String,
    pub section_path: Vec<String>,
    pub char_start: usize,
    pub char_end: usize,
    pub diagnostics: SearchDiagnostics,
}

/// Aggregate counters returned by `stats()`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NexusStats {
    pub documents: usize,
    pub chunks: usize,
    pub vectors: usize,
    pub bm25_terms: usize,
    pub index_size_bytes: u64,
}
