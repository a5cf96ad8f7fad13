use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("source `{0}` not found")]
    SourceNotFound(String),
    #[error("document `{0}` not found")]
    DocumentNotFound(String),
}
