//! Dense embedding for the retrieval core. The embedder is
//! loaded once at startup and is reentrant across the ingest worker pool
//! and concurrent queries; it never touches the network or the filesystem
//! after construction.
//!
//! Cross-encoder reranking lives in the sibling `reranker` crate: a
//! cross-encoder session is architecturally similar (an ONNX `Session`
//! behind a `Mutex`) but scores `(query, passage)` pairs rather than
//! pooling single texts, and the retriever must be able to depend on both
//! without either depending on the other.

pub mod config;
pub mod embedder;

pub use embedder::{
    DeterministicEmbedder, DeterministicEmbedderConfig, Embedder, EmbedderError, EmbedderInfo,
    OnnxHttpConfig, OnnxHttpEmbedder, OnnxStdIoConfig, OnnxStdIoEmbedder, ProviderKind,
};
