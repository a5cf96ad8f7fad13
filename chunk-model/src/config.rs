use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Immutable configuration for the retrieval core. Constructed once by an
/// external loader (out of scope) and passed by `Arc` to every component;
/// the core itself never reads environment variables or files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NexusConfig {
    pub root: PathBuf,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub ingest: IngestConfig,
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

fn default_root() -> PathBuf {
    dirs_home().join(".nexus")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_id: String,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: "local/default".to_string(),
            batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: 512,
            overlap_tokens: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub dense_k: usize,
    pub sparse_k: usize,
    pub rerank_k: usize,
    pub alpha: f32,
    pub bm25_k1: f32,
    pub bm25_b: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            dense_k: 50,
            sparse_k: 50,
            rerank_k: 20,
            alpha: 0.5,
            bm25_k1: 1.2,
            bm25_b: 0.75,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub debounce_ms: u64,
    pub queue_capacity: usize,
    pub worker_threads: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            queue_capacity: 1024,
            worker_threads: default_worker_threads(),
        }
    }
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("embedding.batch_size must be greater than zero")]
    ZeroBatchSize,
    #[error("chunking.target_tokens must be greater than zero")]
    ZeroTargetTokens,
    #[error("chunking.overlap_tokens ({overlap}) must be less than chunking.target_tokens ({target})")]
    OverlapTooLarge { overlap: usize, target: usize },
    #[error("retrieval.alpha must be within [0.0, 1.0], got {0}")]
    AlphaOutOfRange(f32),
    #[error("retrieval.bm25_b must be within [0.0, 1.0], got {0}")]
    Bm25BOutOfRange(f32),
    #[error("retrieval.dense_k and retrieval.sparse_k must be greater than zero")]
    ZeroCandidateK,
    #[error("ingest.queue_capacity must be greater than zero")]
    ZeroQueueCapacity,
    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),
}

impl NexusConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.chunking.target_tokens == 0 {
            return Err(ConfigError::ZeroTargetTokens);
        }
        if self.chunking.overlap_tokens >= self.chunking.target_tokens {
            return Err(ConfigError::OverlapTooLarge {
                overlap: self.chunking.overlap_tokens,
                target: self.chunking.target_tokens,
            });
        }
        if !(0.0..=1.0).contains(&self.retrieval.alpha) {
            return Err(ConfigError::AlphaOutOfRange(self.retrieval.alpha));
        }
        if !(0.0..=1.0).contains(&self.retrieval.bm25_b) {
            return Err(ConfigError::Bm25BOutOfRange(self.retrieval.bm25_b));
        }
        if self.retrieval.dense_k == 0 || self.retrieval.sparse_k == 0 {
            return Err(ConfigError::ZeroCandidateK);
        }
        if self.ingest.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(NexusConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_overlap_gte_target() {
        let mut cfg = NexusConfig::default();
        cfg.chunking.overlap_tokens = cfg.chunking.target_tokens;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::OverlapTooLarge {
                overlap: cfg.chunking.overlap_tokens,
                target: cfg.chunking.target_tokens
            })
        );
    }

    #[test]
    fn rejects_alpha_out_of_range() {
        let mut cfg = NexusConfig::default();
        cfg.retrieval.alpha = 1.5;
        assert_eq!(cfg.validate(), Err(ConfigError::AlphaOutOfRange(1.5)));
    }
}
