//! The ingestion pipeline: change detection, chunking, batched embedding,
//! and the dual-index (vector + BM25) critical section that keeps the
//! metadata store, vector store, and BM25 index in agreement for one
//! document at a time.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{instrument, warn};

use bm25_index::{Bm25Index, Tokenizer};
use chunk_model::{
    Chunk, ChunkId, ChunkingConfig, ContentHash, DocumentId, EmbeddingConfig, NewDocument,
    NewSource, Source, SourceId, SourceKind,
};
use embedding_provider::Embedder;
use metadata_store::MetadataStore;
use vector_store::{VectorPayload, VectorStore};

use crate::error::{join_err, ServiceError};

/// Result of [`IngestionPipeline::ingest_document`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOutcome {
    pub added: usize,
    pub removed: usize,
    pub kept: usize,
}

/// Result of [`IngestionPipeline::delete_document`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOutcome {
    pub removed: usize,
}

/// The sole writer to the vector store and BM25 index. Every mutating call
/// goes through here so index mutations are always serialized per
/// document, per the single-writer discipline the rest of the system
/// assumes.
pub struct IngestionPipeline {
    metadata: Arc<dyn MetadataStore>,
    vectors: Arc<dyn VectorStore>,
    bm25: Arc<dyn Bm25Index>,
    embedder: Arc<dyn Embedder>,
    tokenizer: Tokenizer,
    chunking: ChunkingConfig,
    embedding: EmbeddingConfig,
    /// One lock per `(source_id, uri)` pair, so concurrent ingests of
    /// different documents never wait on each other while still
    /// serializing writes to the same document.
    document_locks: std::sync::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    /// Bounds how many documents are embedding/indexing at once, mirroring
    /// the bounded worker pool a watcher would submit into.
    ingest_permits: Arc<tokio::sync::Semaphore>,
}

impl IngestionPipeline {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        vectors: Arc<dyn VectorStore>,
        bm25: Arc<dyn Bm25Index>,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkingConfig,
        embedding: EmbeddingConfig,
        worker_threads: usize,
    ) -> Self {
        Self {
            metadata,
            vectors,
            bm25,
            embedder,
            tokenizer: Tokenizer::default(),
            chunking,
            embedding,
            document_locks: std::sync::Mutex::new(HashMap::new()),
            ingest_permits: Arc::new(tokio::sync::Semaphore::new(worker_threads.max(1))),
        }
    }

    pub fn add_source(&self, kind: SourceKind, root: String) -> Result<SourceId, ServiceError> {
        let source = self.metadata.upsert_source(NewSource { kind, root })?;
        Ok(source.source_id)
    }

    pub fn list_sources(&self) -> Result<Vec<Source>, ServiceError> {
        Ok(self.metadata.list_sources()?)
    }

    /// Runs the full change-detect → chunk → embed → critical-section
    /// algorithm for one document. Concurrent calls for *different*
    /// documents proceed in parallel, bounded by the worker-pool permit;
    /// calls for the *same* `(source_id, uri)` serialize on that
    /// document's lock.
    #[instrument(skip(self, content_bytes, tags, frontmatter), fields(uri = %uri))]
    pub async fn ingest_document(
        &self,
        source_id: SourceId,
        uri: String,
        content_bytes: Vec<u8>,
        tags: BTreeSet<String>,
        frontmatter: BTreeMap<String, serde_json::Value>,
    ) -> Result<(DocumentId, IngestOutcome), ServiceError> {
        let _permit = self
            .ingest_permits
            .clone()
            .acquire_owned()
            .await
            .expect("ingest semaphore is never closed");

        let lock_key = document_lock_key(&source_id, &uri);
        let doc_lock = self.lock_for(&lock_key);
        let _guard = doc_lock.lock().await;

        let content_hash = ContentHash::of(&content_bytes);
        let byte_size = content_bytes.len() as u64;
        let new_document = NewDocument {
            source_id: source_id.clone(),
            uri: uri.clone(),
            title: None,
            content_hash,
            byte_size,
            mtime: Utc::now(),
            tags: tags.clone(),
            frontmatter,
        };

        let metadata = self.metadata.clone();
        let (document_id, outcome) = tokio::task::spawn_blocking(move || metadata.upsert_document(new_document))
            .await
            .map_err(join_err)??;

        if outcome == chunk_model::UpsertOutcome::Unchanged {
            let kept = {
                let metadata = self.metadata.clone();
                let document_id = document_id.clone();
                tokio::task::spawn_blocking(move || metadata.chunk_count_for_document(&document_id))
                    .await
                    .map_err(join_err)??
            };
            return Ok((
                document_id,
                IngestOutcome {
                    added: 0,
                    removed: 0,
                    kept,
                },
            ));
        }

        let old_chunks = {
            let metadata = self.metadata.clone();
            let document_id = document_id.clone();
            tokio::task::spawn_blocking(move || metadata.get_chunks_for_document(&document_id))
                .await
                .map_err(join_err)??
        };
        let old_ids: BTreeSet<ChunkId> = old_chunks.iter().map(|c| c.chunk_id.clone()).collect();
        let old_by_id: HashMap<ChunkId, Chunk> =
            old_chunks.into_iter().map(|c| (c.chunk_id.clone(), c)).collect();

        let target_tokens = self.chunking.target_tokens;
        let overlap_tokens = self.chunking.overlap_tokens;
        let new_chunks = {
            let document_id = document_id.clone();
            let uri = uri.clone();
            tokio::task::spawn_blocking(move || {
                file_chunker::chunk_bytes(&document_id, &uri, &content_bytes, target_tokens, overlap_tokens)
            })
            .await
            .map_err(join_err)??
        };
        let new_ids: BTreeSet<ChunkId> = new_chunks.iter().map(|c| c.chunk_id.clone()).collect();

        let added_chunks: Vec<Chunk> = new_chunks
            .iter()
            .filter(|c| !old_ids.contains(&c.chunk_id))
            .cloned()
            .collect();
        let removed_ids: Vec<ChunkId> = old_ids.difference(&new_ids).cloned().collect();
        let removed_chunks: Vec<Chunk> = removed_ids
            .iter()
            .filter_map(|id| old_by_id.get(id).cloned())
            .collect();

        let added_vectors = self.embed_batches(&added_chunks).await?;

        let source = {
            let metadata = self.metadata.clone();
            let source_id = source_id.clone();
            tokio::task::spawn_blocking(move || metadata.get_source(&source_id))
                .await
                .map_err(join_err)??
        };
        let kind = source.map(|s| s.kind).unwrap_or(SourceKind::AdHoc);

        if let Err(err) = self.run_critical_section(&added_chunks, &added_vectors, &removed_ids, kind, &source_id, &tags).await {
            warn!(error = %err, "ingest critical section failed; restoring removed chunks' vectors/postings");
            self.restore_removed(&removed_chunks, kind, &source_id, &tags).await;
            return Err(ServiceError::IngestRolledBack {
                document_id: document_id.to_string(),
                cause: err.to_string(),
            });
        }

        let metadata = self.metadata.clone();
        let document_id_for_replace = document_id.clone();
        let diff = tokio::task::spawn_blocking(move || metadata.replace_chunks(&document_id_for_replace, new_chunks))
            .await
            .map_err(join_err)??;

        Ok((
            document_id,
            IngestOutcome {
                added: diff.added.len(),
                removed: diff.removed.len(),
                kept: diff.kept.len(),
            },
        ))
    }

    pub async fn delete_document(&self, document_id: DocumentId) -> Result<DeleteOutcome, ServiceError> {
        // `document_id` is a deterministic hash of `(source_id, uri)`, the
        // same pair `ingest_document` locks on, so recover it here rather
        // than locking on `document_id` itself — otherwise a concurrent
        // ingest and delete of the same document take different mutexes
        // and never serialize (§4.7, §5 ordering guarantee 2).
        let metadata = self.metadata.clone();
        let lookup_id = document_id.clone();
        let document = tokio::task::spawn_blocking(move || metadata.get_document(&lookup_id))
            .await
            .map_err(join_err)??;
        let Some(document) = document else {
            return Ok(DeleteOutcome { removed: 0 });
        };

        let lock_key = document_lock_key(&document.source_id, &document.uri);
        let doc_lock = self.lock_for(&lock_key);
        let _guard = doc_lock.lock().await;

        let metadata = self.metadata.clone();
        let chunks = {
            let document_id = document_id.clone();
            tokio::task::spawn_blocking(move || metadata.get_chunks_for_document(&document_id))
                .await
                .map_err(join_err)??
        };
        let ids: Vec<ChunkId> = chunks.iter().map(|c| c.chunk_id.clone()).collect();

        self.vectors.delete(&ids)?;
        for id in &ids {
            self.bm25.remove(id);
        }

        let metadata = self.metadata.clone();
        let removed = tokio::task::spawn_blocking(move || metadata.delete_document(&document_id))
            .await
            .map_err(join_err)??;

        Ok(DeleteOutcome { removed })
    }

    /// `vectors.delete(removed)`, `bm25.remove(removed)`, then
    /// `vectors.upsert(added)` and `bm25.add(added)`. Metadata is committed
    /// by the caller afterward, last, per the single-writer ordering.
    async fn run_critical_section(
        &self,
        added_chunks: &[Chunk],
        added_vectors: &[Vec<f32>],
        removed_ids: &[ChunkId],
        kind: SourceKind,
        source_id: &SourceId,
        tags: &BTreeSet<String>,
    ) -> Result<(), ServiceError> {
        self.vectors.delete(removed_ids)?;
        for id in removed_ids {
            self.bm25.remove(id);
        }

        let model_id = self.embedder.info().embedding_model_id.clone();
        self.vectors.bind_embedding_model(&model_id)?;

        let mut upserted = Vec::with_capacity(added_chunks.len());
        for (chunk, vector) in added_chunks.iter().zip(added_vectors.iter()) {
            let payload = build_payload(source_id.clone(), chunk, kind, tags.clone());
            if let Err(err) = self.vectors.upsert(chunk.chunk_id.clone(), vector.clone(), payload) {
                // Undo the vectors we did manage to add this round before
                // surfacing the error to the caller's rollback path.
                let _ = self.vectors.delete(&upserted);
                return Err(ServiceError::Vector(err));
            }
            upserted.push(chunk.chunk_id.clone());
        }

        for chunk in added_chunks {
            let tokens = self.tokenizer.tokenize(&chunk.text);
            self.bm25.add(chunk.chunk_id.clone(), &tokens);
        }

        Ok(())
    }

    /// Best-effort repair after a failed critical section: the chunks that
    /// were about to be dropped are still in the metadata store (it was
    /// never committed), so put their vectors and postings back.
    async fn restore_removed(
        &self,
        removed_chunks: &[Chunk],
        kind: SourceKind,
        source_id: &SourceId,
        tags: &BTreeSet<String>,
    ) {
        if removed_chunks.is_empty() {
            return;
        }
        let vectors = match self.embed_batches(removed_chunks).await {
            Ok(v) => v,
            Err(err) => {
                warn!(error = %err, "failed to re-embed removed chunks during rollback; orphan scan will repair on next startup");
                return;
            }
        };
        for (chunk, vector) in removed_chunks.iter().zip(vectors.iter()) {
            let payload = build_payload(source_id.clone(), chunk, kind, tags.clone());
            if let Err(err) = self.vectors.upsert(chunk.chunk_id.clone(), vector.clone(), payload) {
                warn!(error = %err, "failed to restore a removed chunk's vector during rollback");
            }
            let tokens = self.tokenizer.tokenize(&chunk.text);
            self.bm25.add(chunk.chunk_id.clone(), &tokens);
        }
    }

    async fn embed_batches(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let batch_size = self.embedding.batch_size.max(1);
        let mut out = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size) {
            let embedder = self.embedder.clone();
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = tokio::task::spawn_blocking(move || {
                let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                embedder.embed_batch(&refs)
            })
            .await
            .map_err(join_err)??;
            out.extend(vectors);
        }
        Ok(out)
    }

    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.document_locks.lock().unwrap();
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// The document-lock key both `ingest_document` and `delete_document` must
/// agree on: `document_id` is derived from exactly this `(source_id, uri)`
/// pair, so locking on the pair directly lets `ingest_document` take the
/// lock before the document row (and its id) exists yet.
fn document_lock_key(source_id: &SourceId, uri: &str) -> String {
    format!("{}\u{1F}{}", source_id.as_str(), uri)
}

fn build_payload(source_id: SourceId, chunk: &Chunk, kind: SourceKind, tags: BTreeSet<String>) -> VectorPayload {
    VectorPayload {
        source_id,
        document_id: chunk.document_id.clone(),
        tags,
        kind,
        indexed_at: chunk.indexed_at,
        section_path_prefix: chunk.section_path.join("/"),
    }
}
