use thiserror::Error;

#[derive(Debug, Error)]
pub enum Bm25Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt index file: {0}")]
    Corrupt(String),
    #[error("index file version {found} unsupported (expected {expected}); rebuild required")]
    VersionMismatch { expected: u32, found: u32 },
}
