pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    source_id     TEXT PRIMARY KEY,
    kind          TEXT NOT NULL,
    root          TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    last_scan_at  TEXT
);

CREATE TABLE IF NOT EXISTS documents (
    document_id   TEXT PRIMARY KEY,
    source_id     TEXT NOT NULL REFERENCES sources(source_id),
    uri           TEXT NOT NULL,
    title         TEXT,
    content_hash  TEXT NOT NULL,
    byte_size     INTEGER NOT NULL,
    mtime         TEXT NOT NULL,
    tags          TEXT NOT NULL DEFAULT '[]',
    frontmatter   TEXT NOT NULL DEFAULT '{}',
    UNIQUE(source_id, uri)
);

CREATE TABLE IF NOT EXISTS chunks (
    chunk_id          TEXT PRIMARY KEY,
    document_id       TEXT NOT NULL REFERENCES documents(document_id),
    ordinal           INTEGER NOT NULL,
    text              TEXT NOT NULL,
    char_start        INTEGER NOT NULL,
    char_end          INTEGER NOT NULL,
    section_path      TEXT NOT NULL DEFAULT '[]',
    token_count       INTEGER NOT NULL,
    embedding_version INTEGER NOT NULL,
    indexed_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id);
CREATE INDEX IF NOT EXISTS idx_documents_source_id ON documents(source_id);
"#;
