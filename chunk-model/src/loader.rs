use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::errors::CorpusError;
use crate::types::Source;

/// One document's raw bytes plus the metadata a loader could cheaply
/// determine without parsing the content (frontmatter, mtime, tags).
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub uri: String,
    pub bytes: Vec<u8>,
    pub mtime: DateTime<Utc>,
    pub tags: BTreeSet<String>,
    pub frontmatter: BTreeMap<String, serde_json::Value>,
}

/// Capability for turning a [`Source`] into a stream of [`LoadedDocument`]s.
///
/// Implemented by the (out-of-scope) watcher/CLI collaborators, selected by
/// `source.kind`. The core's own `ingest_document` API takes raw bytes
/// directly and does not call this trait itself — it exists so those
/// collaborators share one capability shape instead of each inventing their
/// own.
pub trait DocumentLoader: Send + Sync {
    fn load(
        &self,
        source: &Source,
    ) -> Result<Box<dyn Iterator<Item = Result<LoadedDocument, CorpusError>>>, CorpusError>;
}
