//! Cross-encoder reranking: scores `(query, passage)`
//! pairs jointly, more accurate but slower than the bi-encoder similarity
//! `vector-store`/`embedding-provider` compute. Architecturally this is
//! the same shape as `embedding-provider`'s ONNX session — a `Tokenizer`
//! plus a `Session` behind a `Mutex`, loaded once at startup — but the two
//! crates are siblings, not a dependency of one on the other, since
//! `hybrid-retriever` needs to hold both independently and a bi-encoder
//! model and a cross-encoder model are never interchangeable.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use ndarray::Array2;
use ort::{session::Session, value::Tensor, Error as OrtError};
use thiserror::Error;
use tokenizers::Tokenizer;

#[derive(Debug, Error)]
pub enum RerankError {
    #[error("invalid reranker configuration: {message}")]
    InvalidConfiguration { message: String },
    #[error("provider failure: {message}")]
    ProviderFailure { message: String },
}

/// Behavior `hybrid-retriever` needs from a cross-encoder.
///
/// Implementations must be cheap to call repeatedly and safe to wrap in
/// `tokio::time::timeout` by the caller — a reranker never blocks past
/// what its own model inference takes, and a timed-out call is simply
/// dropped by the caller, never retried here.
pub trait Reranker: Send + Sync {
    /// Score `query` against every passage, returning one calibrated
    /// relevance score per passage in input order.
    fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, RerankError>;
    fn model_id(&self) -> &str;
}

/// Configuration for a local ONNX cross-encoder driven through stdio.
#[derive(Debug, Clone)]
pub struct OnnxCrossEncoderConfig {
    pub model_path: PathBuf,
    pub runtime_library_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub max_input_length: usize,
    pub model_id: String,
}

static ORT_RUNTIME_PATH: OnceLock<PathBuf> = OnceLock::new();

/// ONNX-based cross-encoder: `(query, passage)` token pairs in, one logit
/// per pair out, squashed through a sigmoid into `[0, 1]`.
pub struct OnnxCrossEncoder {
    model_id: String,
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_input_length: usize,
}

impl OnnxCrossEncoder {
    pub fn new(config: OnnxCrossEncoderConfig) -> Result<Self, RerankError> {
        if config.max_input_length == 0 {
            return Err(RerankError::InvalidConfiguration {
                message: "max_input_length must be greater than zero".into(),
            });
        }

        let runtime_library_path =
            resolve_existing_path(&config.runtime_library_path, "ONNX Runtime shared library")?;
        ensure_ort_initialized(&runtime_library_path)?;

        let model_path = resolve_existing_path(&config.model_path, "ONNX model")?;
        let tokenizer_path = resolve_existing_path(&config.tokenizer_path, "tokenizer config")?;

        let session = Session::builder()
            .map_err(|err| map_ort_error("create session builder", err))?
            .commit_from_file(&model_path)
            .map_err(|err| map_ort_error("load ONNX model", err))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|err| {
            RerankError::ProviderFailure {
                message: format!("load tokenizer failed: {err}"),
            }
        })?;

        Ok(Self {
            model_id: config.model_id,
            session: Mutex::new(session),
            tokenizer,
            max_input_length: config.max_input_length,
        })
    }

    fn score_one(&self, query: &str, passage: &str) -> Result<f32, RerankError> {
        let encoding = self
            .tokenizer
            .encode((query, passage), true)
            .map_err(|err| RerankError::ProviderFailure {
                message: format!("tokenize pair failed: {err}"),
            })?;

        if encoding.len() > self.max_input_length {
            return Err(RerankError::ProviderFailure {
                message: format!(
                    "pair exceeds max_input_length of {} tokens (got {})",
                    self.max_input_length,
                    encoding.len()
                ),
            });
        }

        let seq_len = encoding.len();
        let mut input_ids = Array2::<i64>::zeros((1, seq_len));
        let mut attention_mask = Array2::<i64>::zeros((1, seq_len));
        let mut token_type_ids = Array2::<i64>::zeros((1, seq_len));
        for (col, ((&id, &mask), &ttype)) in encoding
            .get_ids()
            .iter()
            .zip(encoding.get_attention_mask())
            .zip(encoding.get_type_ids())
            .enumerate()
        {
            input_ids[(0, col)] = id as i64;
            attention_mask[(0, col)] = mask as i64;
            token_type_ids[(0, col)] = ttype as i64;
        }

        let input_ids = Tensor::from_array(input_ids).map_err(|err| map_ort_error("prepare input_ids", err))?;
        let attention_mask =
            Tensor::from_array(attention_mask).map_err(|err| map_ort_error("prepare attention_mask", err))?;
        let token_type_ids =
            Tensor::from_array(token_type_ids).map_err(|err| map_ort_error("prepare token_type_ids", err))?;

        let mut session = self.session.lock().unwrap();
        let outputs = session
            .run(ort::inputs![input_ids, attention_mask, token_type_ids])
            .map_err(|err| map_ort_error("execute ONNX session", err))?;

        let output = &outputs[0];
        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|err| map_ort_error("extract output tensor", err))?;
        let logit = *data.first().ok_or_else(|| RerankError::ProviderFailure {
            message: "reranker produced no output".into(),
        })?;

        Ok(sigmoid(logit))
    }
}

impl Reranker for OnnxCrossEncoder {
    fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, RerankError> {
        passages
            .iter()
            .map(|passage| self.score_one(query, passage))
            .collect()
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Hash-based pseudo cross-encoder: no model weights, bitwise reproducible
/// for a given `(query, passage, model_id)`. Stands in for
/// [`OnnxCrossEncoder`] in tests that exercise fusion/fallback logic rather
/// than the ONNX loading path itself, the same role `DeterministicEmbedder`
/// plays for `embedding-provider`.
#[derive(Debug, Clone)]
pub struct DeterministicReranker {
    model_id: String,
}

impl DeterministicReranker {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
        }
    }
}

impl Reranker for DeterministicReranker {
    fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>, RerankError> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        Ok(passages
            .iter()
            .map(|passage| {
                let mut hasher = DefaultHasher::new();
                self.model_id.hash(&mut hasher);
                query.hash(&mut hasher);
                passage.hash(&mut hasher);
                let hash = hasher.finish();
                (hash as f64 / u64::MAX as f64) as f32
            })
            .collect())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Reranker that always fails, used to exercise the retriever's mandatory
/// fall-back-to-RRF path without needing
/// a genuinely slow model.
#[derive(Debug, Clone, Default)]
pub struct FailingReranker;

impl Reranker for FailingReranker {
    fn score(&self, _query: &str, _passages: &[&str]) -> Result<Vec<f32>, RerankError> {
        Err(RerankError::ProviderFailure {
            message: "reranker unavailable".into(),
        })
    }

    fn model_id(&self) -> &str {
        "failing-reranker"
    }
}

/// Reranker that blocks for a fixed duration before scoring, used to
/// exercise the retriever's per-query deadline (§5): a caller wraps
/// `score` in `tokio::time::timeout` via `spawn_blocking`, so this type's
/// blocking `std::thread::sleep` is what a timeout actually races against.
#[derive(Debug, Clone)]
pub struct SlowReranker {
    delay: std::time::Duration,
}

impl SlowReranker {
    pub fn new(delay: std::time::Duration) -> Self {
        Self { delay }
    }
}

impl Reranker for SlowReranker {
    fn score(&self, _query: &str, passages: &[&str]) -> Result<Vec<f32>, RerankError> {
        std::thread::sleep(self.delay);
        Ok(vec![0.5; passages.len()])
    }

    fn model_id(&self) -> &str {
        "slow-reranker"
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn ensure_ort_initialized(runtime_library_path: &Path) -> Result<(), RerankError> {
    if let Some(existing) = ORT_RUNTIME_PATH.get() {
        if existing != runtime_library_path {
            return Err(RerankError::InvalidConfiguration {
                message: format!(
                    "ONNX Runtime already initialized with library `{}`; cannot reinitialize with `{}`",
                    existing.display(),
                    runtime_library_path.display()
                ),
            });
        }
    } else {
        let _ = ORT_RUNTIME_PATH.set(runtime_library_path.to_path_buf());
    }

    ort::init_from(runtime_library_path.to_string_lossy().to_string())
        .with_name("nexus-reranker")
        .commit()
        .map_err(|err| map_ort_error("initialize ONNX Runtime environment", err))?;

    Ok(())
}

fn resolve_existing_path(path: &Path, description: &str) -> Result<PathBuf, RerankError> {
    fs::metadata(path).map_err(|_| RerankError::InvalidConfiguration {
        message: format!("{description} `{}` does not exist", path.display()),
    })?;
    path.canonicalize().map_err(|err| RerankError::ProviderFailure {
        message: format!("failed to canonicalize {description} `{}`: {err}", path.display()),
    })
}

fn map_ort_error(context: &str, err: OrtError) -> RerankError {
    RerankError::ProviderFailure {
        message: format!("{context} failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_reranker_is_reproducible() {
        let reranker = DeterministicReranker::new("test-model");
        let a = reranker.score("what is rust", &["rust is a systems language", "bananas are yellow"]).unwrap();
        let b = reranker.score("what is rust", &["rust is a systems language", "bananas are yellow"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn failing_reranker_always_errs() {
        let reranker = FailingReranker;
        assert!(reranker.score("q", &["p"]).is_err());
    }
}
