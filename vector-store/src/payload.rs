use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use chunk_model::{DocumentId, SourceId, SourceKind};

/// Metadata carried alongside a vector, used to apply a [`chunk_model::Filter`]
/// without consulting the metadata store on every query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPayload {
    pub source_id: SourceId,
    pub document_id: DocumentId,
    pub tags: BTreeSet<String>,
    pub kind: SourceKind,
    pub indexed_at: DateTime<Utc>,
    pub section_path_prefix: String,
}

impl VectorPayload {
    pub fn matches(&self, filter: &chunk_model::Filter) -> bool {
        for source in filter.sources() {
            if source != &self.source_id {
                return false;
            }
        }
        for kind in filter.kinds() {
            if kind != self.kind {
                return false;
            }
        }
        for tag in filter.tags() {
            if !self.tags.contains(tag) {
                return false;
            }
        }
        if let Some(since) = filter.since() {
            if self.indexed_at < since {
                return false;
            }
        }
        // `path:<glob>` (§6 filter grammar) is implemented as a plain
        // prefix match, not general glob matching (no `*`/`**`/`?`
        // wildcards) — `section_path_prefix` is a `/`-joined heading
        // stack, so prefix semantics cover the common "under this
        // section" case without a glob engine dependency.
        for prefix in filter.path_prefixes() {
            if !self.section_path_prefix.starts_with(prefix) {
                return false;
            }
        }
        true
    }
}
