//! Query orchestration: dense + sparse retrieval, RRF fusion, optional
//! cross-encoder reranking, and metadata-filtered search.
//!
//! This is the one crate in the workspace where the ambient async stack
//! is load-bearing rather than decorative: dense and sparse retrieval run
//! in parallel per query, and rerank specifically (not dense/sparse) is
//! the cancellable stage at a query deadline. `tokio` is used for exactly
//! those two properties — `tokio::join!` for the parallel retrieval and
//! `tokio::time::timeout` around the rerank call — with every call into
//! the (synchronous) index/embedder/metadata crates wrapped in
//! `spawn_blocking` so they don't block the async executor's threads.

mod error;
mod fusion;
mod query;

pub use error::RetrieverError;
pub use fusion::{reciprocal_rank_fusion, FusedHit, DEFAULT_RRF_K};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{instrument, warn};

use bm25_index::{Bm25Index, Tokenizer};
use chunk_model::{
    Chunk, ChunkId, Document, Filter, RetrievalConfig, SearchDiagnostics, SearchResult,
};
use embedding_provider::Embedder;
use metadata_store::MetadataStore;
use reranker::Reranker;
use vector_store::VectorStore;

/// Per-query deadline.
const DEFAULT_DEADLINE: Duration = Duration::from_millis(2000);
/// Rerank sub-budget; never exceeds whatever is left of the overall
/// deadline when rerank begins.
const DEFAULT_RERANK_BUDGET: Duration = Duration::from_millis(1500);

/// Tunable knobs for one [`HybridRetriever::search`] call.
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub use_rerank: bool,
    pub dense_k: usize,
    pub sparse_k: usize,
    pub rerank_k: usize,
    pub alpha: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            use_rerank: true,
            dense_k: 50,
            sparse_k: 50,
            rerank_k: 20,
            alpha: 0.5,
        }
    }
}

impl From<&RetrievalConfig> for SearchOptions {
    fn from(cfg: &RetrievalConfig) -> Self {
        Self {
            use_rerank: cfg.rerank_k > 0,
            dense_k: cfg.dense_k,
            sparse_k: cfg.sparse_k,
            rerank_k: cfg.rerank_k,
            alpha: cfg.alpha,
        }
    }
}

/// Orchestrates dense retrieval, sparse retrieval, RRF fusion, and
/// optional cross-encoder reranking into the ranked, hydrated results the
/// query API returns.
pub struct HybridRetriever {
    metadata: Arc<dyn MetadataStore>,
    vectors: Arc<dyn VectorStore>,
    bm25: Arc<dyn Bm25Index>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    tokenizer: Tokenizer,
    rrf_k: f32,
    deadline: Duration,
    rerank_budget: Duration,
}

impl HybridRetriever {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        vectors: Arc<dyn VectorStore>,
        bm25: Arc<dyn Bm25Index>,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> Self {
        Self {
            metadata,
            vectors,
            bm25,
            embedder,
            reranker,
            tokenizer: Tokenizer::default(),
            rrf_k: DEFAULT_RRF_K,
            deadline: DEFAULT_DEADLINE,
            rerank_budget: DEFAULT_RERANK_BUDGET,
        }
    }

    /// Overrides the tokenizer used for query-side BM25 term extraction.
    /// Must match whatever tokenizer the ingestion pipeline indexed with,
    /// or term matching silently degrades.
    pub fn with_tokenizer(mut self, tokenizer: Tokenizer) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Runs the full hybrid pipeline: query processing, parallel dense and
    /// sparse retrieval, RRF fusion, optional rerank, and hydration.
    #[instrument(skip(self, filters, options), fields(dense_k = options.dense_k, sparse_k = options.sparse_k))]
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filters: &Filter,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>, RetrieverError> {
        let start = Instant::now();

        // Step 1: query processing.
        let (query_text, effective_filter) = query::process(query, filters)?;
        let query_tokens = self.tokenizer.tokenize(&query_text);

        if let Some(store_model) = self.vectors.embedding_model_id() {
            let query_model = &self.embedder.info().embedding_model_id;
            if &store_model != query_model {
                return Err(RetrieverError::ModelMismatch {
                    query_model: query_model.clone(),
                    store_model,
                });
            }
        }

        // Resolve the filter to a concrete chunk-id allow-set once, shared
        // by the sparse post-filter (BM25 carries no payload of its own).
        let allowed_ids = self.resolve_filter(&effective_filter).await?;

        // Step 2: parallel dense + sparse retrieval.
        let embedder = self.embedder.clone();
        let text_for_embed = query_text.clone();
        let query_vector = tokio::task::spawn_blocking(move || embedder.embed_query(&text_for_embed))
            .await
            .map_err(join_err)??;

        let dense_fut = {
            let vectors = self.vectors.clone();
            let vector = query_vector.clone();
            let k = options.dense_k;
            let filter = effective_filter.clone();
            tokio::task::spawn_blocking(move || vectors.search(&vector, k, &filter))
        };
        let sparse_fut = {
            let bm25 = self.bm25.clone();
            let tokens = query_tokens.clone();
            let k = options.sparse_k;
            let allowed = allowed_ids.clone();
            tokio::task::spawn_blocking(move || {
                bm25.search(&tokens, k, &|id: &ChunkId| {
                    allowed.as_ref().map_or(true, |set| set.contains(id))
                })
            })
        };
        let (dense, sparse) = tokio::join!(dense_fut, sparse_fut);
        let dense = dense.map_err(join_err)??;
        let sparse = sparse.map_err(join_err)?;

        // Step 3: RRF fusion. Empty-result policy: never fabricate.
        let fused = reciprocal_rank_fusion(&dense, &sparse, options.alpha, self.rrf_k);
        if fused.is_empty() {
            return Ok(Vec::new());
        }

        let want_rerank = options.use_rerank && options.rerank_k > 0 && self.reranker.is_some();
        let candidate_count = if want_rerank { options.rerank_k } else { limit };
        let mut candidates: Vec<FusedHit> = fused.into_iter().take(candidate_count).collect();

        let hydrated = self.hydrate(&candidates.iter().map(|h| h.chunk_id.clone()).collect::<Vec<_>>()).await?;

        // Step 4: optional rerank, never allowed to hard-fail.
        let mut rerank_scores: HashMap<ChunkId, f32> = HashMap::new();
        let mut rerank_used = false;
        if want_rerank {
            let elapsed = start.elapsed();
            let remaining = self.deadline.saturating_sub(elapsed).min(self.rerank_budget);
            if remaining.is_zero() {
                warn!("query deadline exhausted before rerank stage; falling back to RRF order");
            } else {
                let passages: Vec<String> = candidates
                    .iter()
                    .map(|hit| {
                        hydrated
                            .get(&hit.chunk_id)
                            .map(|(chunk, _)| chunk.text.clone())
                            .unwrap_or_default()
                    })
                    .collect();
                let reranker = self.reranker.clone().unwrap();
                let query_owned = query_text.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    let refs: Vec<&str> = passages.iter().map(String::as_str).collect();
                    reranker.score(&query_owned, &refs)
                });
                match tokio::time::timeout(remaining, handle).await {
                    Ok(Ok(Ok(scores))) if scores.len() == candidates.len() => {
                        for (hit, score) in candidates.iter().zip(scores.into_iter()) {
                            rerank_scores.insert(hit.chunk_id.clone(), score);
                        }
                        rerank_used = true;
                    }
                    Ok(Ok(Ok(_))) => {
                        warn!("reranker returned a mismatched score count; falling back to RRF order");
                    }
                    Ok(Ok(Err(err))) => {
                        warn!(error = %err, "reranker failed; falling back to RRF order");
                    }
                    Ok(Err(join_error)) => {
                        warn!(error = %join_error, "reranker task panicked; falling back to RRF order");
                    }
                    Err(_) => {
                        warn!("reranker exceeded its time budget; falling back to RRF order");
                    }
                }
            }
        }

        if rerank_used {
            // Stable sort: equal rerank scores preserve incoming RRF order.
            candidates.sort_by(|a, b| {
                let sa = rerank_scores.get(&a.chunk_id).copied().unwrap_or(f32::MIN);
                let sb = rerank_scores.get(&b.chunk_id).copied().unwrap_or(f32::MIN);
                sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        candidates.truncate(limit);

        // Step 5: hydrate into SearchResults with diagnostics.
        let mut results = Vec::with_capacity(candidates.len());
        for hit in candidates {
            let Some((chunk, document)) = hydrated.get(&hit.chunk_id) else {
                continue;
            };
            let rerank_score = rerank_scores.get(&hit.chunk_id).copied();
            let score = rerank_score.unwrap_or(hit.rrf_score);
            results.push(SearchResult {
                chunk_id: hit.chunk_id.clone(),
                score,
                text: chunk.text.clone(),
                document_id: chunk.document_id.clone(),
                uri: document.uri.clone(),
                section_path: chunk.section_path.clone(),
                char_start: chunk.char_start,
                char_end: chunk.char_end,
                diagnostics: SearchDiagnostics {
                    dense_rank: hit.dense_rank,
                    sparse_rank: hit.sparse_rank,
                    rerank_score,
                    rerank_used,
                },
            });
        }
        Ok(results)
    }

    /// Dense-only near-neighbor search seeded by an existing chunk's own
    /// stored embedding, excluding the chunk itself.
    pub async fn find_related(
        &self,
        chunk_id: &ChunkId,
        limit: usize,
    ) -> Result<Vec<SearchResult>, RetrieverError> {
        let vectors = self.vectors.clone();
        let target = chunk_id.clone();
        let vector = tokio::task::spawn_blocking(move || vectors.get_vector(&target))
            .await
            .map_err(join_err)?;
        let Some(vector) = vector else {
            return Err(RetrieverError::ChunkNotFound(chunk_id.to_string()));
        };

        let vectors = self.vectors.clone();
        let search_vector = vector.clone();
        let fetch = limit + 1;
        let hits = tokio::task::spawn_blocking(move || vectors.search(&search_vector, fetch, &Filter::empty()))
            .await
            .map_err(join_err)??;

        let excluded = chunk_id.clone();
        let dense: Vec<(ChunkId, f32)> = hits.into_iter().filter(|(id, _)| id != &excluded).take(limit).collect();
        if dense.is_empty() {
            return Ok(Vec::new());
        }

        let hydrated = self.hydrate(&dense.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>()).await?;
        let mut results = Vec::with_capacity(dense.len());
        for (rank, (id, score)) in dense.into_iter().enumerate() {
            let Some((chunk, document)) = hydrated.get(&id) else {
                continue;
            };
            results.push(SearchResult {
                chunk_id: id,
                score,
                text: chunk.text.clone(),
                document_id: chunk.document_id.clone(),
                uri: document.uri.clone(),
                section_path: chunk.section_path.clone(),
                char_start: chunk.char_start,
                char_end: chunk.char_end,
                diagnostics: SearchDiagnostics {
                    dense_rank: Some(rank as u32 + 1),
                    sparse_rank: None,
                    rerank_score: None,
                    rerank_used: false,
                },
            });
        }
        Ok(results)
    }

    /// Resolves a filter to the concrete set of chunk ids it matches, used
    /// as BM25's post-filter predicate (the posting-list index carries no
    /// payload of its own, unlike the vector store). `None` means "no
    /// filter".
    async fn resolve_filter(&self, filter: &Filter) -> Result<Option<Arc<HashSet<ChunkId>>>, RetrieverError> {
        if filter.is_empty() {
            return Ok(None);
        }
        let metadata = self.metadata.clone();
        let filter = filter.clone();
        let chunks = tokio::task::spawn_blocking(move || metadata.list_chunks(&filter))
            .await
            .map_err(join_err)??;
        Ok(Some(Arc::new(chunks.into_iter().map(|c| c.chunk_id).collect())))
    }

    async fn hydrate(&self, ids: &[ChunkId]) -> Result<HashMap<ChunkId, (Chunk, Document)>, RetrieverError> {
        let metadata = self.metadata.clone();
        let ids = ids.to_vec();
        tokio::task::spawn_blocking(move || {
            let chunks = metadata.get_chunks_by_ids(&ids)?;
            let mut documents: HashMap<chunk_model::DocumentId, Document> = HashMap::new();
            let mut out = HashMap::with_capacity(chunks.len());
            for chunk in chunks {
                let document = match documents.get(&chunk.document_id) {
                    Some(doc) => doc.clone(),
                    None => {
                        let Some(doc) = metadata.get_document(&chunk.document_id)? else {
                            continue;
                        };
                        documents.insert(chunk.document_id.clone(), doc.clone());
                        doc
                    }
                };
                out.insert(chunk.chunk_id.clone(), (chunk, document));
            }
            Ok::<_, metadata_store::MetadataError>(out)
        })
        .await
        .map_err(join_err)?
        .map_err(RetrieverError::from)
    }
}

fn join_err(err: tokio::task::JoinError) -> RetrieverError {
    RetrieverError::TaskJoin(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bm25_index::PostingListIndex;
    use chunk_model::{derive_chunk_id, ContentHash, DocumentId, NewDocument, NewSource, SourceId, SourceKind};
    use embedding_provider::{DeterministicEmbedder, DeterministicEmbedderConfig};
    use metadata_store::SqliteMetadataStore;
    use reranker::{DeterministicReranker, FailingReranker, SlowReranker};
    use std::collections::BTreeMap;
    use std::collections::BTreeSet;
    use vector_store::{HnswVectorStore, VectorPayload};

    fn sample_chunk(document_id: &DocumentId, ordinal: u32, text: &str, section: &str) -> Chunk {
        Chunk {
            chunk_id: derive_chunk_id(document_id, ordinal, text),
            document_id: document_id.clone(),
            ordinal,
            text: text.to_string(),
            char_start: 0,
            char_end: text.len(),
            section_path: vec![section.to_string()],
            token_count: text.split_whitespace().count() as u32,
            embedding_version: 1,
            indexed_at: chrono::Utc::now(),
        }
    }

    struct Fixture {
        metadata: Arc<SqliteMetadataStore>,
        vectors: Arc<HnswVectorStore>,
        bm25: Arc<PostingListIndex>,
        embedder: Arc<DeterministicEmbedder>,
        tokenizer: Tokenizer,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                metadata: Arc::new(SqliteMetadataStore::open_in_memory().unwrap()),
                vectors: Arc::new(HnswVectorStore::new()),
                bm25: Arc::new(PostingListIndex::default()),
                embedder: Arc::new(DeterministicEmbedder::new(DeterministicEmbedderConfig::default()).unwrap()),
                tokenizer: Tokenizer::default(),
            }
        }

        fn index(&self, uri: &str, tags: &[&str], texts: &[(&str, &str)]) -> DocumentId {
            let source = self
                .metadata
                .upsert_source(NewSource { kind: SourceKind::File, root: uri.to_string() })
                .unwrap();
            let (doc_id, _) = self
                .metadata
                .upsert_document(NewDocument {
                    source_id: source.source_id,
                    uri: uri.to_string(),
                    title: None,
                    content_hash: ContentHash::of(uri.as_bytes()),
                    byte_size: 0,
                    mtime: chrono::Utc::now(),
                    tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
                    frontmatter: BTreeMap::new(),
                })
                .unwrap();

            let chunks: Vec<Chunk> = texts
                .iter()
                .enumerate()
                .map(|(i, (section, text))| sample_chunk(&doc_id, i as u32, text, section))
                .collect();
            self.metadata.replace_chunks(&doc_id, chunks.clone()).unwrap();

            for chunk in &chunks {
                let vector = self.embedder.embed(&chunk.text).unwrap();
                self.vectors
                    .upsert(
                        chunk.chunk_id.clone(),
                        vector,
                        VectorPayload {
                            source_id: SourceId::from(uri),
                            document_id: doc_id.clone(),
                            tags: tags.iter().map(|t| t.to_string()).collect(),
                            kind: SourceKind::File,
                            indexed_at: chunk.indexed_at,
                            section_path_prefix: chunk.section_path.join("/"),
                        },
                    )
                    .unwrap();
                let tokens = self.tokenizer.tokenize(&chunk.text);
                self.bm25.add(chunk.chunk_id.clone(), &tokens);
            }
            doc_id
        }

        fn retriever(&self) -> HybridRetriever {
            HybridRetriever::new(
                self.metadata.clone(),
                self.vectors.clone(),
                self.bm25.clone(),
                self.embedder.clone(),
                Some(Arc::new(DeterministicReranker::new("test-reranker"))),
            )
        }
    }

    #[tokio::test]
    async fn dense_only_search_for_exact_chunk_text_ranks_first() {
        let fx = Fixture::new();
        fx.index(
            "a.md",
            &["tutorial"],
            &[("Intro", "Rust makes systems programming safer without sacrificing speed.")],
        );
        let retriever = fx.retriever();
        let options = SearchOptions { use_rerank: false, ..Default::default() };
        let results = retriever
            .search(
                "Rust makes systems programming safer without sacrificing speed.",
                3,
                &Filter::empty(),
                &options,
            )
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].diagnostics.dense_rank, Some(1));
    }

    #[tokio::test]
    async fn empty_corpus_returns_no_results_never_errors() {
        let fx = Fixture::new();
        let retriever = fx.retriever();
        let results = retriever
            .search("anything at all", 5, &Filter::empty(), &SearchOptions::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn filter_isolation_only_returns_matching_tags() {
        let fx = Fixture::new();
        fx.index("a.md", &["tutorial"], &[("Intro", "neural networks are layered functions")]);
        fx.index("b.md", &["ai"], &[("Intro", "neural networks approximate gradients")]);
        let retriever = fx.retriever();
        let filter = chunk_model::parse("tag:tutorial").unwrap();
        let results = retriever
            .search("neural networks", 10, &filter, &SearchOptions::default())
            .await
            .unwrap();
        assert!(!results.is_empty());
        for r in &results {
            let doc = fx.metadata.get_document(&r.document_id).unwrap().unwrap();
            assert!(doc.tags.contains("tutorial"));
        }
    }

    #[tokio::test]
    async fn rejects_invalid_query_length() {
        let fx = Fixture::new();
        let retriever = fx.retriever();
        let err = retriever
            .search("", 5, &Filter::empty(), &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RetrieverError::EmptyOrOverlongQuery(_)));
    }

    #[tokio::test]
    async fn rerank_failure_falls_back_to_rrf_order_instead_of_erroring() {
        let fx = Fixture::new();
        fx.index("a.md", &[], &[("Intro", "the quick brown fox jumps over the lazy dog")]);
        let retriever = HybridRetriever::new(
            fx.metadata.clone(),
            fx.vectors.clone(),
            fx.bm25.clone(),
            fx.embedder.clone(),
            Some(Arc::new(FailingReranker)),
        );
        let results = retriever
            .search("quick fox", 5, &Filter::empty(), &SearchOptions::default())
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(!results[0].diagnostics.rerank_used);
    }

    #[tokio::test]
    async fn rerank_timeout_falls_back_to_rrf_order_without_erroring() {
        // A reranker that sleeps past the configured deadline must never
        // surface as a query error: the retriever returns the RRF-ordered
        // list with `rerank_used: false` (§4.6 step 4, §8 scenario 6).
        let fx = Fixture::new();
        fx.index("a.md", &[], &[("Intro", "the quick brown fox jumps over the lazy dog")]);
        let retriever = HybridRetriever::new(
            fx.metadata.clone(),
            fx.vectors.clone(),
            fx.bm25.clone(),
            fx.embedder.clone(),
            Some(Arc::new(SlowReranker::new(Duration::from_secs(3)))),
        )
        .with_deadline(Duration::from_secs(2));
        let results = retriever
            .search("quick fox", 5, &Filter::empty(), &SearchOptions::default())
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(!results[0].diagnostics.rerank_used);
        assert!(results[0].diagnostics.rerank_score.is_none());
    }

    #[tokio::test]
    async fn rerank_k_zero_makes_use_rerank_a_no_op() {
        let fx = Fixture::new();
        fx.index("a.md", &[], &[("Intro", "the quick brown fox jumps over the lazy dog")]);
        let retriever = fx.retriever();
        let with_rerank = SearchOptions { use_rerank: true, rerank_k: 0, ..Default::default() };
        let without_rerank = SearchOptions { use_rerank: false, rerank_k: 0, ..Default::default() };
        let a = retriever.search("quick fox", 5, &Filter::empty(), &with_rerank).await.unwrap();
        let b = retriever.search("quick fox", 5, &Filter::empty(), &without_rerank).await.unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.chunk_id, y.chunk_id);
        }
    }

    #[tokio::test]
    async fn find_related_excludes_the_seed_chunk() {
        let fx = Fixture::new();
        let doc_id = fx.index(
            "a.md",
            &[],
            &[("Intro", "alpha beta gamma"), ("Details", "alpha beta gamma delta")],
        );
        let chunks = fx.metadata.list_chunks(&Filter::empty()).unwrap();
        let seed = chunks.iter().find(|c| c.document_id == doc_id).unwrap().chunk_id.clone();
        let retriever = fx.retriever();
        let results = retriever.find_related(&seed, 5).await.unwrap();
        assert!(results.iter().all(|r| r.chunk_id != seed));
    }
}
