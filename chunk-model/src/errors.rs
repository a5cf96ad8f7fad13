use thiserror::Error;

/// A single document failed to parse or chunk. Logged and skipped by the
/// ingestion pipeline; never fatal to a batch.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("failed to read `{uri}`: {message}")]
    Read { uri: String, message: String },
    #[error("failed to parse `{uri}`: {message}")]
    Parse { uri: String, message: String },
    #[error("unsupported content type for `{uri}`: {mime}")]
    UnsupportedType { uri: String, mime: String },
}
