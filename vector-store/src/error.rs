use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("embedding dimension mismatch: store has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding model mismatch: store was built with `{expected}`, got `{actual}`")]
    ModelMismatch { expected: String, actual: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}
