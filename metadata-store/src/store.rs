use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use chunk_model::{
    Chunk, ChunkDiff, ChunkId, ContentHash, Document, DocumentId, Filter, NewDocument, NewSource,
    NexusStats, Source, SourceId, SourceKind, UpsertOutcome,
};

use crate::error::MetadataError;
use crate::schema::SCHEMA;

/// Durable relational record of sources, documents, and chunks.
///
/// Backed by a single `rusqlite::Connection` behind a mutex: writes are
/// per-document transactions, and SQLite's own locking serializes
/// concurrent writers while readers use the same connection (a systems
/// crate fronting Postgres/MySQL would instead use a pool; a single bundled
/// SQLite file has no such need, matching the `rusqlite`
/// dependency choice).
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

fn document_id_for(source_id: &SourceId, uri: &str) -> DocumentId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(source_id.as_str().as_bytes());
    hasher.update(&[0x1F]);
    hasher.update(uri.as_bytes());
    DocumentId(hasher.finalize().to_hex().to_string())
}

fn source_id_for(kind: SourceKind, root: &str) -> SourceId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(&[0x1F]);
    hasher.update(root.as_bytes());
    SourceId(hasher.finalize().to_hex().to_string())
}

impl SqliteMetadataStore {
    pub fn open(path: &Path) -> Result<Self, MetadataError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).ok();
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, MetadataError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn upsert_source(&self, new: NewSource) -> Result<Source, MetadataError> {
        let conn = self.conn.lock().unwrap();
        let source_id = source_id_for(new.kind, &new.root);
        let now = Utc::now();
        conn.execute(
            "INSERT INTO sources (source_id, kind, root, created_at, last_scan_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(source_id) DO UPDATE SET last_scan_at = ?4",
            params![
                source_id.as_str(),
                new.kind.as_str(),
                new.root,
                now.to_rfc3339(),
            ],
        )?;
        self.get_source(&source_id)?
            .ok_or_else(|| MetadataError::SourceNotFound(source_id.to_string()))
    }

    pub fn get_source(&self, source_id: &SourceId) -> Result<Option<Source>, MetadataError> {
        let conn = self.conn.lock().unwrap();
        row_to_source(&conn, source_id)
    }

    pub fn delete_source(&self, source_id: &SourceId) -> Result<usize, MetadataError> {
        let conn = self.conn.lock().unwrap();
        let doc_ids: Vec<String> = conn
            .prepare("SELECT document_id FROM documents WHERE source_id = ?1")?
            .query_map(params![source_id.as_str()], |r| r.get(0))?
            .collect::<Result<_, _>>()?;
        let mut total = 0usize;
        for doc_id in &doc_ids {
            total += conn.execute("DELETE FROM chunks WHERE document_id = ?1", params![doc_id])?;
        }
        conn.execute(
            "DELETE FROM documents WHERE source_id = ?1",
            params![source_id.as_str()],
        )?;
        conn.execute(
            "DELETE FROM sources WHERE source_id = ?1",
            params![source_id.as_str()],
        )?;
        Ok(total)
    }

    pub fn list_sources(&self) -> Result<Vec<Source>, MetadataError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT source_id, kind, root, created_at, last_scan_at FROM sources ORDER BY source_id",
        )?;
        let rows = stmt
            .query_map([], |r| source_from_row(r))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Upsert a document, returning whether it was newly created, updated
    /// (content hash changed), or left unchanged.
    pub fn upsert_document(&self, new: NewDocument) -> Result<(DocumentId, UpsertOutcome), MetadataError> {
        let conn = self.conn.lock().unwrap();
        let document_id = document_id_for(&new.source_id, &new.uri);

        let existing_hash: Option<String> = conn
            .query_row(
                "SELECT content_hash FROM documents WHERE document_id = ?1",
                params![document_id.as_str()],
                |r| r.get(0),
            )
            .optional()?;

        let tags_json = serde_json::to_string(&new.tags)?;
        let frontmatter_json = serde_json::to_string(&new.frontmatter)?;

        let outcome = match existing_hash {
            None => {
                conn.execute(
                    "INSERT INTO documents
                     (document_id, source_id, uri, title, content_hash, byte_size, mtime, tags, frontmatter)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        document_id.as_str(),
                        new.source_id.as_str(),
                        new.uri,
                        new.title,
                        new.content_hash.0,
                        new.byte_size as i64,
                        new.mtime.to_rfc3339(),
                        tags_json,
                        frontmatter_json,
                    ],
                )?;
                UpsertOutcome::Created
            }
            Some(hash) if hash == new.content_hash.0 => UpsertOutcome::Unchanged,
            Some(_) => {
                conn.execute(
                    "UPDATE documents SET title = ?2, content_hash = ?3, byte_size = ?4,
                     mtime = ?5, tags = ?6, frontmatter = ?7 WHERE document_id = ?1",
                    params![
                        document_id.as_str(),
                        new.title,
                        new.content_hash.0,
                        new.byte_size as i64,
                        new.mtime.to_rfc3339(),
                        tags_json,
                        frontmatter_json,
                    ],
                )?;
                UpsertOutcome::Updated
            }
        };
        Ok((document_id, outcome))
    }

    pub fn delete_document(&self, document_id: &DocumentId) -> Result<usize, MetadataError> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id.as_str()],
        )?;
        conn.execute(
            "DELETE FROM documents WHERE document_id = ?1",
            params![document_id.as_str()],
        )?;
        Ok(removed)
    }

    /// Transactionally diff `new_chunks` against the document's current chunk
    /// set and persist the result.
    pub fn replace_chunks(
        &self,
        document_id: &DocumentId,
        new_chunks: Vec<Chunk>,
    ) -> Result<ChunkDiff, MetadataError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let old_ids: BTreeSet<ChunkId> = {
            let mut stmt =
                tx.prepare("SELECT chunk_id FROM chunks WHERE document_id = ?1")?;
            stmt.query_map(params![document_id.as_str()], |r| {
                Ok(ChunkId(r.get::<_, String>(0)?))
            })?
            .collect::<Result<_, _>>()?
        };
        let new_ids: BTreeSet<ChunkId> = new_chunks.iter().map(|c| c.chunk_id.clone()).collect();

        let removed: Vec<ChunkId> = old_ids.difference(&new_ids).cloned().collect();
        let added_ids: BTreeSet<ChunkId> = new_ids.difference(&old_ids).cloned().collect();
        let kept: Vec<ChunkId> = old_ids.intersection(&new_ids).cloned().collect();

        for chunk_id in &removed {
            tx.execute(
                "DELETE FROM chunks WHERE chunk_id = ?1",
                params![chunk_id.as_str()],
            )?;
        }

        let mut added = Vec::new();
        for chunk in new_chunks {
            if added_ids.contains(&chunk.chunk_id) {
                insert_chunk(&tx, &chunk)?;
                added.push(chunk);
            }
        }

        tx.commit()?;
        Ok(ChunkDiff {
            added,
            removed,
            kept,
        })
    }

    /// Count of chunks currently stored for `document_id`. Used by the
    /// ingestion pipeline's content-hash short-circuit to report `kept`
    /// without re-chunking or re-diffing an unchanged document.
    pub fn chunk_count_for_document(&self, document_id: &DocumentId) -> Result<usize, MetadataError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE document_id = ?1",
            params![document_id.as_str()],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    /// Chunks currently stored for `document_id`, in ordinal order. The
    /// ingestion pipeline reads this before re-chunking so it can diff the
    /// old chunk set against the new one and embed only what changed,
    /// ahead of the `replace_chunks` call that actually commits the diff.
    pub fn get_chunks_for_document(&self, document_id: &DocumentId) -> Result<Vec<Chunk>, MetadataError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT chunk_id, document_id, ordinal, text, char_start, char_end,
                    section_path, token_count, embedding_version, indexed_at
             FROM chunks WHERE document_id = ?1 ORDER BY ordinal",
        )?;
        let chunks = stmt
            .query_map(params![document_id.as_str()], chunk_from_row)?
            .collect::<Result<_, _>>()?;
        Ok(chunks)
    }

    pub fn get_document(&self, document_id: &DocumentId) -> Result<Option<Document>, MetadataError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT document_id, source_id, uri, title, content_hash, byte_size,
                    mtime, tags, frontmatter
             FROM documents WHERE document_id = ?1",
            params![document_id.as_str()],
            document_from_row,
        )
        .optional()
        .map_err(MetadataError::from)
    }

    pub fn get_chunk(&self, chunk_id: &ChunkId) -> Result<Option<Chunk>, MetadataError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT chunk_id, document_id, ordinal, text, char_start, char_end,
                    section_path, token_count, embedding_version, indexed_at
             FROM chunks WHERE chunk_id = ?1",
            params![chunk_id.as_str()],
            chunk_from_row,
        )
        .optional()
        .map_err(MetadataError::from)
    }

    pub fn get_chunks_by_ids(&self, ids: &[ChunkId]) -> Result<Vec<Chunk>, MetadataError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(c) = self.get_chunk(id)? {
                out.push(c);
            }
        }
        Ok(out)
    }

    pub fn list_chunk_ids(&self) -> Result<BTreeSet<ChunkId>, MetadataError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT chunk_id FROM chunks")?;
        let ids = stmt
            .query_map([], |r| Ok(ChunkId(r.get::<_, String>(0)?)))?
            .collect::<Result<_, _>>()?;
        Ok(ids)
    }

    /// List chunks matching `filter`, joined against their owning document.
    pub fn list_chunks(&self, filter: &Filter) -> Result<Vec<Chunk>, MetadataError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT c.chunk_id, c.document_id, c.ordinal, c.text, c.char_start, c.char_end,
                    c.section_path, c.token_count, c.embedding_version, c.indexed_at,
                    d.source_id, d.tags, s.kind
             FROM chunks c
             JOIN documents d ON c.document_id = d.document_id
             JOIN sources s ON d.source_id = s.source_id",
        )?;
        let rows = stmt.query_map([], |r| {
            let chunk = chunk_from_row(r)?;
            let source_id: String = r.get(10)?;
            let tags_json: String = r.get(11)?;
            let kind_str: String = r.get(12)?;
            Ok((chunk, source_id, tags_json, kind_str))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (chunk, source_id, tags_json, kind_str) = row?;
            let tags: BTreeSet<String> = serde_json::from_str(&tags_json).unwrap_or_default();
            let kind: SourceKind = kind_str.parse().unwrap_or(SourceKind::AdHoc);
            if filter_matches(filter, &chunk, &source_id, &tags, kind) {
                out.push(chunk);
            }
        }
        Ok(out)
    }

    pub fn stats(&self) -> Result<NexusStats, MetadataError> {
        let conn = self.conn.lock().unwrap();
        let documents: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
        let chunks: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        Ok(NexusStats {
            documents: documents as usize,
            chunks: chunks as usize,
            vectors: 0,
            bm25_terms: 0,
            index_size_bytes: 0,
        })
    }

    /// Compare the live chunk set against the vector/BM25 index id sets and
    /// report the three-way discrepancy.
    pub fn audit_orphans(
        &self,
        vector_ids: &BTreeSet<ChunkId>,
        bm25_ids: &BTreeSet<ChunkId>,
    ) -> Result<OrphanReport, MetadataError> {
        let live = self.list_chunk_ids()?;
        Ok(OrphanReport {
            vector_only: vector_ids.difference(&live).cloned().collect(),
            bm25_only: bm25_ids.difference(&live).cloned().collect(),
            metadata_only: live
                .difference(vector_ids)
                .chain(live.difference(bm25_ids))
                .cloned()
                .collect(),
        })
    }
}

/// Chunk ids present in one index but missing from the metadata store, or
/// vice versa; the metadata store is the source of truth.
#[derive(Debug, Clone, Default)]
pub struct OrphanReport {
    pub vector_only: BTreeSet<ChunkId>,
    pub bm25_only: BTreeSet<ChunkId>,
    pub metadata_only: BTreeSet<ChunkId>,
}

impl OrphanReport {
    pub fn is_clean(&self) -> bool {
        self.vector_only.is_empty() && self.bm25_only.is_empty() && self.metadata_only.is_empty()
    }
}

fn filter_matches(
    filter: &Filter,
    chunk: &Chunk,
    source_id: &str,
    tags: &BTreeSet<String>,
    kind: SourceKind,
) -> bool {
    for source in filter.sources() {
        if source.as_str() != source_id {
            return false;
        }
    }
    for wanted_kind in filter.kinds() {
        if wanted_kind != kind {
            return false;
        }
    }
    for tag in filter.tags() {
        if !tags.contains(tag) {
            return false;
        }
    }
    if let Some(since) = filter.since() {
        if chunk.indexed_at < since {
            return false;
        }
    }
    for prefix in filter.path_prefixes() {
        let joined = chunk.section_path.join("/");
        if !joined.starts_with(prefix) {
            return false;
        }
    }
    true
}

fn insert_chunk(tx: &rusqlite::Transaction, chunk: &Chunk) -> Result<(), MetadataError> {
    let section_path_json = serde_json::to_string(&chunk.section_path)?;
    tx.execute(
        "INSERT INTO chunks
         (chunk_id, document_id, ordinal, text, char_start, char_end, section_path,
          token_count, embedding_version, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            chunk.chunk_id.as_str(),
            chunk.document_id.as_str(),
            chunk.ordinal,
            chunk.text,
            chunk.char_start as i64,
            chunk.char_end as i64,
            section_path_json,
            chunk.token_count,
            chunk.embedding_version,
            chunk.indexed_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn chunk_from_row(r: &rusqlite::Row) -> rusqlite::Result<Chunk> {
    let section_path_json: String = r.get(6)?;
    let section_path: Vec<String> = serde_json::from_str(&section_path_json).unwrap_or_default();
    let indexed_at: String = r.get(9)?;
    Ok(Chunk {
        chunk_id: ChunkId(r.get(0)?),
        document_id: DocumentId(r.get(1)?),
        ordinal: r.get(2)?,
        text: r.get(3)?,
        char_start: r.get::<_, i64>(4)? as usize,
        char_end: r.get::<_, i64>(5)? as usize,
        section_path,
        token_count: r.get(7)?,
        embedding_version: r.get(8)?,
        indexed_at: parse_rfc3339(&indexed_at),
    })
}

fn document_from_row(r: &rusqlite::Row) -> rusqlite::Result<Document> {
    let tags_json: String = r.get(7)?;
    let tags: BTreeSet<String> = serde_json::from_str(&tags_json).unwrap_or_default();
    let frontmatter_json: String = r.get(8)?;
    let frontmatter = serde_json::from_str(&frontmatter_json).unwrap_or_default();
    let mtime: String = r.get(6)?;
    Ok(Document {
        document_id: DocumentId(r.get(0)?),
        source_id: SourceId(r.get(1)?),
        uri: r.get(2)?,
        title: r.get(3)?,
        content_hash: ContentHash(r.get(4)?),
        byte_size: r.get::<_, i64>(5)? as u64,
        mtime: parse_rfc3339(&mtime),
        tags,
        frontmatter,
    })
}

fn source_from_row(r: &rusqlite::Row) -> rusqlite::Result<Source> {
    source_from_fields(r)
}

fn source_from_fields(r: &rusqlite::Row) -> rusqlite::Result<Source> {
    let kind_str: String = r.get(1)?;
    let created_at: String = r.get(3)?;
    let last_scan_at: Option<String> = r.get(4)?;
    Ok(Source {
        source_id: SourceId(r.get(0)?),
        kind: kind_str.parse().unwrap_or(SourceKind::AdHoc),
        root: r.get(2)?,
        created_at: parse_rfc3339(&created_at),
        last_scan_at: last_scan_at.map(|s| parse_rfc3339(&s)),
    })
}

fn row_to_source(conn: &Connection, source_id: &SourceId) -> Result<Option<Source>, MetadataError> {
    conn.query_row(
        "SELECT source_id, kind, root, created_at, last_scan_at FROM sources WHERE source_id = ?1",
        params![source_id.as_str()],
        source_from_row,
    )
    .optional()
    .map_err(MetadataError::from)
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunk_model::{ContentHash, NewDocument, NewSource};
    use std::collections::BTreeMap;

    fn sample_chunk(document_id: &DocumentId, ordinal: u32, text: &str) -> Chunk {
        Chunk {
            chunk_id: chunk_model::derive_chunk_id(document_id, ordinal, text),
            document_id: document_id.clone(),
            ordinal,
            text: text.to_string(),
            char_start: 0,
            char_end: text.len(),
            section_path: vec!["Intro".to_string()],
            token_count: 2,
            embedding_version: 1,
            indexed_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_document_transitions() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let source = store
            .upsert_source(NewSource {
                kind: SourceKind::Directory,
                root: "/tmp/corpus".into(),
            })
            .unwrap();

        let new_doc = NewDocument {
            source_id: source.source_id.clone(),
            uri: "/tmp/corpus/a.md".into(),
            title: Some("A".into()),
            content_hash: ContentHash::of(b"hello"),
            byte_size: 5,
            mtime: Utc::now(),
            tags: BTreeSet::new(),
            frontmatter: BTreeMap::new(),
        };
        let (doc_id, outcome) = store.upsert_document(new_doc.clone()).unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);

        let (doc_id2, outcome2) = store.upsert_document(new_doc.clone()).unwrap();
        assert_eq!(doc_id, doc_id2);
        assert_eq!(outcome2, UpsertOutcome::Unchanged);

        let mut changed = new_doc;
        changed.content_hash = ContentHash::of(b"goodbye");
        let (_, outcome3) = store.upsert_document(changed).unwrap();
        assert_eq!(outcome3, UpsertOutcome::Updated);
    }

    #[test]
    fn replace_chunks_computes_diff() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let source = store
            .upsert_source(NewSource {
                kind: SourceKind::File,
                root: "/tmp/a.md".into(),
            })
            .unwrap();
        let (doc_id, _) = store
            .upsert_document(NewDocument {
                source_id: source.source_id,
                uri: "/tmp/a.md".into(),
                title: None,
                content_hash: ContentHash::of(b"v1"),
                byte_size: 2,
                mtime: Utc::now(),
                tags: BTreeSet::new(),
                frontmatter: BTreeMap::new(),
            })
            .unwrap();

        let c0 = sample_chunk(&doc_id, 0, "first chunk");
        let c1 = sample_chunk(&doc_id, 1, "second chunk");
        let diff1 = store
            .replace_chunks(&doc_id, vec![c0.clone(), c1.clone()])
            .unwrap();
        assert_eq!(diff1.added.len(), 2);
        assert_eq!(diff1.removed.len(), 0);

        let c2 = sample_chunk(&doc_id, 1, "second chunk edited");
        let diff2 = store
            .replace_chunks(&doc_id, vec![c0.clone(), c2.clone()])
            .unwrap();
        assert_eq!(diff2.added.len(), 1);
        assert_eq!(diff2.removed.len(), 1);
        assert_eq!(diff2.kept.len(), 1);
        assert_eq!(diff2.kept[0], c0.chunk_id);
    }

    #[test]
    fn idempotent_replace_is_zero_cost() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let source = store
            .upsert_source(NewSource {
                kind: SourceKind::File,
                root: "/tmp/b.md".into(),
            })
            .unwrap();
        let (doc_id, _) = store
            .upsert_document(NewDocument {
                source_id: source.source_id,
                uri: "/tmp/b.md".into(),
                title: None,
                content_hash: ContentHash::of(b"v1"),
                byte_size: 2,
                mtime: Utc::now(),
                tags: BTreeSet::new(),
                frontmatter: BTreeMap::new(),
            })
            .unwrap();
        let chunks = vec![sample_chunk(&doc_id, 0, "only chunk")];
        store.replace_chunks(&doc_id, chunks.clone()).unwrap();
        let diff = store.replace_chunks(&doc_id, chunks).unwrap();
        assert_eq!(diff.added.len(), 0);
        assert_eq!(diff.removed.len(), 0);
        assert_eq!(diff.kept.len(), 1);
    }

    #[test]
    fn chunk_count_for_document_tracks_replace_chunks() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let source = store
            .upsert_source(NewSource {
                kind: SourceKind::File,
                root: "/tmp/d.md".into(),
            })
            .unwrap();
        let (doc_id, _) = store
            .upsert_document(NewDocument {
                source_id: source.source_id,
                uri: "/tmp/d.md".into(),
                title: None,
                content_hash: ContentHash::of(b"v1"),
                byte_size: 2,
                mtime: Utc::now(),
                tags: BTreeSet::new(),
                frontmatter: BTreeMap::new(),
            })
            .unwrap();
        assert_eq!(store.chunk_count_for_document(&doc_id).unwrap(), 0);
        let chunks = vec![sample_chunk(&doc_id, 0, "a"), sample_chunk(&doc_id, 1, "b")];
        store.replace_chunks(&doc_id, chunks).unwrap();
        assert_eq!(store.chunk_count_for_document(&doc_id).unwrap(), 2);
    }

    #[test]
    fn audit_orphans_detects_discrepancy() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let source = store
            .upsert_source(NewSource {
                kind: SourceKind::File,
                root: "/tmp/c.md".into(),
            })
            .unwrap();
        let (doc_id, _) = store
            .upsert_document(NewDocument {
                source_id: source.source_id,
                uri: "/tmp/c.md".into(),
                title: None,
                content_hash: ContentHash::of(b"v1"),
                byte_size: 2,
                mtime: Utc::now(),
                tags: BTreeSet::new(),
                frontmatter: BTreeMap::new(),
            })
            .unwrap();
        let c0 = sample_chunk(&doc_id, 0, "live chunk");
        store.replace_chunks(&doc_id, vec![c0.clone()]).unwrap();

        let ghost = ChunkId("ghost".into());
        let vector_ids: BTreeSet<ChunkId> = [c0.chunk_id.clone(), ghost.clone()].into_iter().collect();
        let bm25_ids: BTreeSet<ChunkId> = [c0.chunk_id.clone()].into_iter().collect();
        let report = store.audit_orphans(&vector_ids, &bm25_ids).unwrap();
        assert!(report.vector_only.contains(&ghost));
        assert!(!report.is_clean());
    }
}
