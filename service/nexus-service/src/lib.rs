//! `nexus-service` wires the six core crates (metadata store, vector
//! store, BM25 index, embedder, reranker, chunker) into the ingestion
//! pipeline and hybrid retriever, and exposes exactly the external
//! interfaces the out-of-scope collaborators (CLI, MCP adapter, watcher)
//! call: `ingest_document`, `delete_document`, `add_source`,
//! `list_sources`, `search`, `find_related`, `stats`.
//!
//! Startup here does the work the teacher's module-level singletons used
//! to do implicitly: open the metadata store, load the vector and BM25
//! snapshots from disk (falling back to a from-metadata rebuild on a
//! version mismatch or missing snapshot), then run the orphan scan that
//! keeps the three stores' chunk-id sets in agreement before the first
//! query or ingest is served.

mod error;
mod ingest;

pub use error::ServiceError;
pub use ingest::{DeleteOutcome, IngestOutcome, IngestionPipeline};

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use bm25_index::{Bm25Index, Bm25Params, PostingListIndex};
use chunk_model::{DocumentId, Filter, NexusConfig, NexusStats, Source, SourceId, SourceKind};
use embedding_provider::Embedder;
use hybrid_retriever::{HybridRetriever, SearchOptions};
use metadata_store::{MetadataStore, SqliteMetadataStore};
use reranker::Reranker;
use vector_store::{HnswVectorStore, VectorPayload, VectorStore};

/// Everything returned from [`NexusService::ingest_document`].
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document_id: DocumentId,
    pub added: usize,
    pub removed: usize,
    pub kept: usize,
}

/// The assembled retrieval core: owns the three stores, the embedder and
/// optional reranker, and the ingestion/query orchestrators built on top
/// of them. One `NexusService` per `config.root`.
pub struct NexusService {
    config: NexusConfig,
    metadata: Arc<dyn MetadataStore>,
    /// Kept as the concrete type (rather than only `Arc<dyn VectorStore>`)
    /// because snapshotting to disk is a capability of `HnswVectorStore`
    /// specifically, not part of the trait `hybrid-retriever`/`ingest`
    /// depend on.
    vectors: Arc<HnswVectorStore>,
    bm25: Arc<PostingListIndex>,
    pipeline: IngestionPipeline,
    retriever: HybridRetriever,
}

impl NexusService {
    /// Opens (creating if absent) the persistent state layout under
    /// `config.root`: `metadata.db`, `vectors/`, `bm25/`. Runs the
    /// startup orphan scan described in §4.1's failure semantics before
    /// returning, so every `NexusService` handle starts from a
    /// three-way-consistent state.
    pub fn open(
        config: NexusConfig,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> Result<Self, ServiceError> {
        config.validate().map_err(ServiceError::Config)?;

        fs::create_dir_all(&config.root)?;
        let vectors_dir = config.root.join("vectors");
        let bm25_dir = config.root.join("bm25");
        fs::create_dir_all(&vectors_dir)?;
        fs::create_dir_all(&bm25_dir)?;

        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteMetadataStore::open(&config.root.join("metadata.db"))?);

        let vectors = Arc::new(HnswVectorStore::new());
        let vectors_path = vectors_dir.join("vectors.bin");
        if vectors_path.exists() {
            if let Err(err) = vector_store::load(&vectors, &vectors_path) {
                warn!(error = %err, "vector store snapshot failed to load; rebuilding dense index from metadata");
                rebuild_vectors_from_metadata(&metadata, &vectors, embedder.as_ref())?;
            }
        }

        let bm25_params = Bm25Params {
            k1: config.retrieval.bm25_k1,
            b: config.retrieval.bm25_b,
        };
        let bm25 = Arc::new(PostingListIndex::new(bm25_params));
        if bm25_dir.join("index.bin").exists() {
            if let Err(err) = bm25_index::load(&bm25, &bm25_dir) {
                warn!(error = %err, "BM25 snapshot version mismatch or corrupt; rebuilding from metadata store");
                rebuild_bm25_from_metadata(&metadata, &bm25)?;
            } else {
                let live = metadata.stats()?.chunks;
                if bm25.doc_count() != live {
                    warn!(
                        on_disk = bm25.doc_count(),
                        live, "BM25 doc_count disagrees with metadata store; rebuilding"
                    );
                    rebuild_bm25_from_metadata(&metadata, &bm25)?;
                }
            }
        }

        heal_orphans(
            metadata.as_ref(),
            vectors.as_ref() as &dyn VectorStore,
            bm25.as_ref() as &dyn Bm25Index,
            embedder.as_ref(),
        )?;

        let vectors_dyn: Arc<dyn VectorStore> = vectors.clone();
        let bm25_dyn: Arc<dyn Bm25Index> = bm25.clone();

        let pipeline = IngestionPipeline::new(
            metadata.clone(),
            vectors_dyn.clone(),
            bm25_dyn.clone(),
            embedder.clone(),
            config.chunking.clone(),
            config.embedding.clone(),
            config.ingest.worker_threads,
        );
        let retriever = HybridRetriever::new(metadata.clone(), vectors_dyn, bm25_dyn, embedder, reranker);

        Ok(Self {
            config,
            metadata,
            vectors,
            bm25,
            pipeline,
            retriever,
        })
    }

    // ---- Ingestion API (§6) -------------------------------------------

    pub async fn ingest_document(
        &self,
        source_id: SourceId,
        uri: String,
        content_bytes: Vec<u8>,
        tags: BTreeSet<String>,
        frontmatter: BTreeMap<String, serde_json::Value>,
    ) -> Result<IngestReport, ServiceError> {
        let (document_id, outcome) = self
            .pipeline
            .ingest_document(source_id, uri, content_bytes, tags, frontmatter)
            .await?;
        Ok(IngestReport {
            document_id,
            added: outcome.added,
            removed: outcome.removed,
            kept: outcome.kept,
        })
    }

    pub async fn delete_document(&self, document_id: DocumentId) -> Result<DeleteOutcome, ServiceError> {
        self.pipeline.delete_document(document_id).await
    }

    pub fn add_source(&self, kind: SourceKind, root: String) -> Result<SourceId, ServiceError> {
        self.pipeline.add_source(kind, root)
    }

    pub fn list_sources(&self) -> Result<Vec<Source>, ServiceError> {
        self.pipeline.list_sources()
    }

    // ---- Query API (§6) -------------------------------------------------

    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &Filter,
        options: &SearchOptions,
    ) -> Result<Vec<chunk_model::SearchResult>, ServiceError> {
        Ok(self.retriever.search(query, limit, filters, options).await?)
    }

    pub async fn find_related(
        &self,
        chunk_id: &chunk_model::ChunkId,
        limit: usize,
    ) -> Result<Vec<chunk_model::SearchResult>, ServiceError> {
        Ok(self.retriever.find_related(chunk_id, limit).await?)
    }

    pub fn stats(&self) -> Result<NexusStats, ServiceError> {
        let mut stats = self.metadata.stats()?;
        stats.vectors = self.vectors.count();
        stats.bm25_terms = self.bm25.term_count();
        stats.index_size_bytes = self.on_disk_size();
        Ok(stats)
    }

    /// Sum of the bytes the three stores currently occupy under
    /// `config.root`, used for `stats().index_size_bytes`. Best-effort:
    /// missing files (nothing persisted yet) contribute zero rather than
    /// erroring.
    fn on_disk_size(&self) -> u64 {
        let mut total = 0u64;
        for path in [
            self.config.root.join("metadata.db"),
            self.config.root.join("vectors").join("vectors.bin"),
            self.config.root.join("bm25").join("index.bin"),
            self.config.root.join("bm25").join("lengths.bin"),
        ] {
            if let Ok(meta) = fs::metadata(&path) {
                total += meta.len();
            }
        }
        total
    }

    /// The default [`SearchOptions`] derived from this service's
    /// `retrieval` config, for callers that don't override per query.
    pub fn default_search_options(&self) -> SearchOptions {
        SearchOptions::from(&self.config.retrieval)
    }

    /// Flushes the vector store and BM25 index to disk under
    /// `config.root`. The metadata store is durable on every write
    /// (fsynced per document commit); only the two derived indexes need
    /// an explicit snapshot point, typically called on clean shutdown.
    pub fn persist(&self) -> Result<(), ServiceError> {
        let vectors_path = self.config.root.join("vectors").join("vectors.bin");
        vector_store::save(&self.vectors, &vectors_path)?;
        let bm25_dir = self.config.root.join("bm25");
        bm25_index::persist(&self.bm25, &bm25_dir)?;
        Ok(())
    }

    pub fn root(&self) -> &std::path::Path {
        &self.config.root
    }
}

/// Re-derives the BM25 dictionary and posting lists from the metadata
/// store's live chunk text, used when the on-disk snapshot is missing,
/// version-mismatched, or its `doc_count` disagrees with the metadata
/// store (§4.5's persistence contract).
fn rebuild_bm25_from_metadata(
    metadata: &Arc<dyn MetadataStore>,
    bm25: &Arc<PostingListIndex>,
) -> Result<(), ServiceError> {
    let tokenizer = bm25_index::Tokenizer::default();
    let chunk_ids = metadata.list_chunk_ids()?;
    if chunk_ids.is_empty() {
        return Ok(());
    }
    let ids: Vec<_> = chunk_ids.into_iter().collect();
    let chunks = metadata.get_chunks_by_ids(&ids)?;
    for chunk in chunks {
        let tokens = tokenizer.tokenize(&chunk.text);
        bm25.add(chunk.chunk_id, &tokens);
    }
    info!(rebuilt = ids.len(), "BM25 index rebuilt from metadata store");
    Ok(())
}

/// Re-derives the dense index by re-embedding every live chunk's stored
/// text. More expensive than the BM25 rebuild (it re-runs the embedder)
/// but uses the same principle: the metadata store holds enough
/// (`Chunk::text`, the owning `Document`) to regenerate a derived index
/// without touching the original source files.
fn rebuild_vectors_from_metadata(
    metadata: &Arc<dyn MetadataStore>,
    vectors: &Arc<HnswVectorStore>,
    embedder: &dyn Embedder,
) -> Result<(), ServiceError> {
    let chunk_ids = metadata.list_chunk_ids()?;
    if chunk_ids.is_empty() {
        return Ok(());
    }
    vectors.bind_embedding_model(&embedder.info().embedding_model_id)?;
    let ids: Vec<_> = chunk_ids.into_iter().collect();
    let chunks = metadata.get_chunks_by_ids(&ids)?;
    let mut documents: std::collections::HashMap<DocumentId, chunk_model::Document> = std::collections::HashMap::new();
    for chunk in chunks {
        let document = match documents.get(&chunk.document_id) {
            Some(d) => d.clone(),
            None => {
                let Some(d) = metadata.get_document(&chunk.document_id)? else {
                    continue;
                };
                documents.insert(chunk.document_id.clone(), d.clone());
                d
            }
        };
        let kind = metadata
            .get_source(&document.source_id)?
            .map(|s| s.kind)
            .unwrap_or(SourceKind::AdHoc);
        let vector = embedder.embed(&chunk.text)?;
        let payload = VectorPayload {
            source_id: document.source_id.clone(),
            document_id: chunk.document_id.clone(),
            tags: document.tags.clone(),
            kind,
            indexed_at: chunk.indexed_at,
            section_path_prefix: chunk.section_path.join("/"),
        };
        vectors.upsert(chunk.chunk_id, vector, payload)?;
    }
    info!("vector store rebuilt from metadata store");
    Ok(())
}

/// Startup orphan scan (§4.1, §7 `ConsistencyError`): compares the live
/// chunk-id set each index reports against the metadata store, the
/// source of truth. Ids present in an index but absent from metadata are
/// dropped from that index; ids present in metadata but missing from an
/// index are backfilled from the chunk's stored text rather than treated
/// as data loss, since metadata already holds everything needed to
/// reproduce a derived index entry.
fn heal_orphans(
    metadata: &dyn MetadataStore,
    vectors: &dyn VectorStore,
    bm25: &dyn Bm25Index,
    embedder: &dyn Embedder,
) -> Result<(), ServiceError> {
    let vector_ids = vectors.chunk_ids();
    let bm25_ids = bm25.chunk_ids();
    let report = metadata.audit_orphans(&vector_ids, &bm25_ids)?;
    if report.is_clean() {
        return Ok(());
    }
    warn!(
        vector_only = report.vector_only.len(),
        bm25_only = report.bm25_only.len(),
        metadata_only = report.metadata_only.len(),
        "startup orphan scan found a three-store discrepancy; repairing"
    );

    if !report.vector_only.is_empty() {
        let ids: Vec<_> = report.vector_only.into_iter().collect();
        vectors.delete(&ids)?;
    }
    for id in &report.bm25_only {
        bm25.remove(id);
    }

    let tokenizer = bm25_index::Tokenizer::default();
    for id in &report.metadata_only {
        let Some(chunk) = metadata.get_chunk(id)? else {
            continue;
        };
        if !vector_ids.contains(id) {
            if let Some(document) = metadata.get_document(&chunk.document_id)? {
                if let Ok(vector) = embedder.embed(&chunk.text) {
                    let kind = metadata
                        .get_source(&document.source_id)?
                        .map(|s| s.kind)
                        .unwrap_or(SourceKind::AdHoc);
                    let payload = VectorPayload {
                        source_id: document.source_id.clone(),
                        document_id: chunk.document_id.clone(),
                        tags: document.tags.clone(),
                        kind,
                        indexed_at: chunk.indexed_at,
                        section_path_prefix: chunk.section_path.join("/"),
                    };
                    let _ = vectors.upsert(chunk.chunk_id.clone(), vector, payload);
                }
            }
        }
        if !bm25_ids.contains(id) {
            let tokens = tokenizer.tokenize(&chunk.text);
            bm25.add(chunk.chunk_id.clone(), &tokens);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunk_model::{ChunkingConfig, EmbeddingConfig, RetrievalConfig, IngestConfig};
    use embedding_provider::{DeterministicEmbedder, DeterministicEmbedderConfig};
    use tempfile::tempdir;

    fn test_config(root: PathBuf) -> NexusConfig {
        NexusConfig {
            root,
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            ingest: IngestConfig {
                worker_threads: 2,
                ..IngestConfig::default()
            },
        }
    }

    #[tokio::test]
    async fn idempotent_ingest_is_zero_cost_on_the_second_call() {
        let dir = tempdir().unwrap();
        let embedder = Arc::new(DeterministicEmbedder::new(DeterministicEmbedderConfig::default()).unwrap());
        let service = NexusService::open(test_config(dir.path().to_path_buf()), embedder, None).unwrap();

        let source_id = service.add_source(SourceKind::File, "corpus".to_string()).unwrap();
        let bytes = b"# Title\n\nSome text about supervised learning and models.\n".to_vec();

        let first = service
            .ingest_document(source_id.clone(), "ml.md".to_string(), bytes.clone(), BTreeSet::new(), BTreeMap::new())
            .await
            .unwrap();
        assert!(first.added > 0);
        assert_eq!(first.removed, 0);

        let second = service
            .ingest_document(source_id, "ml.md".to_string(), bytes, BTreeSet::new(), BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.removed, 0);
        assert_eq!(second.kept, first.added);
    }

    #[tokio::test]
    async fn search_finds_ingested_content() {
        let dir = tempdir().unwrap();
        let embedder = Arc::new(DeterministicEmbedder::new(DeterministicEmbedderConfig::default()).unwrap());
        let service = NexusService::open(test_config(dir.path().to_path_buf()), embedder, None).unwrap();

        let source_id = service.add_source(SourceKind::File, "corpus".to_string()).unwrap();
        let bytes = b"# Intro\n\nRust is a systems programming language focused on safety.\n".to_vec();
        service
            .ingest_document(source_id, "rust.md".to_string(), bytes, BTreeSet::new(), BTreeMap::new())
            .await
            .unwrap();

        let options = SearchOptions {
            use_rerank: false,
            ..service.default_search_options()
        };
        let results = service
            .search("systems programming language", 5, &Filter::empty(), &options)
            .await
            .unwrap();
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn delete_document_removes_it_from_stats() {
        let dir = tempdir().unwrap();
        let embedder = Arc::new(DeterministicEmbedder::new(DeterministicEmbedderConfig::default()).unwrap());
        let service = NexusService::open(test_config(dir.path().to_path_buf()), embedder, None).unwrap();

        let source_id = service.add_source(SourceKind::File, "corpus".to_string()).unwrap();
        let bytes = b"# A\n\nOne paragraph of content for deletion testing.\n".to_vec();
        let report = service
            .ingest_document(source_id, "del.md".to_string(), bytes, BTreeSet::new(), BTreeMap::new())
            .await
            .unwrap();

        let before = service.stats().unwrap();
        assert_eq!(before.chunks, report.added);

        service.delete_document(report.document_id).await.unwrap();
        let after = service.stats().unwrap();
        assert_eq!(after.chunks, 0);
        assert_eq!(after.vectors, 0);
    }
}
