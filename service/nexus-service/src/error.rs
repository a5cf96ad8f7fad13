use thiserror::Error;

/// Errors surfaced by the ingestion pipeline and the query façade it shares
/// with [`hybrid_retriever::HybridRetriever`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(#[from] chunk_model::ConfigError),
    #[error("metadata store error: {0}")]
    Metadata(#[from] metadata_store::MetadataError),
    #[error("vector store error: {0}")]
    Vector(#[from] vector_store::VectorStoreError),
    #[error("bm25 index error: {0}")]
    Bm25(#[from] bm25_index::Bm25Error),
    #[error("embedding error: {0}")]
    Embedding(#[from] embedding_provider::EmbedderError),
    #[error("chunking error: {0}")]
    Corpus(#[from] chunk_model::CorpusError),
    #[error("retrieval error: {0}")]
    Retrieval(#[from] hybrid_retriever::RetrieverError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("document `{0}` not found")]
    DocumentNotFound(String),
    #[error("background task failed: {0}")]
    TaskJoin(String),
    #[error(
        "ingest of document `{document_id}` failed during the index critical section and was \
         rolled back: {cause}"
    )]
    IngestRolledBack { document_id: String, cause: String },
}

pub(crate) fn join_err(err: tokio::task::JoinError) -> ServiceError {
    ServiceError::TaskJoin(err.to_string())
}
