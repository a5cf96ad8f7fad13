use thiserror::Error;

/// Errors from the hybrid retriever's query pipeline. Rerank failures
/// never surface here — the retriever degrades to RRF order internally
/// instead rather than hard-failing a query over a reranker hiccup.
#[derive(Debug, Error)]
pub enum RetrieverError {
    #[error("query must be between 1 and 1000 characters, got {0}")]
    EmptyOrOverlongQuery(usize),
    #[error("malformed filter hint in query: {0}")]
    MalformedFilterHint(String),
    #[error(
        "embedding model mismatch: query embedder uses `{query_model}`, \
         vector store was built with `{store_model}`"
    )]
    ModelMismatch {
        query_model: String,
        store_model: String,
    },
    #[error("embedding failure: {0}")]
    Embedding(#[from] embedding_provider::EmbedderError),
    #[error("vector store error: {0}")]
    Vector(#[from] vector_store::VectorStoreError),
    #[error("metadata store error: {0}")]
    Metadata(#[from] metadata_store::MetadataError),
    #[error("chunk `{0}` not found")]
    ChunkNotFound(String),
    #[error("background task failed: {0}")]
    TaskJoin(String),
}
