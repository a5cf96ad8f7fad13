//! Concrete [`DocumentLoader`] implementations, selected by [`SourceKind`].
//! These are collaborators for the out-of-scope watcher/CLI, not called
//! internally by the ingestion API, which already takes raw bytes directly.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use chunk_model::{CorpusError, DocumentLoader, LoadedDocument, Source};

/// Walks a root directory for `*.md` files, parsing a leading `---`
/// frontmatter block (if any) into `frontmatter`/`tags`.
pub struct MarkdownDirectoryLoader;

impl DocumentLoader for MarkdownDirectoryLoader {
    fn load(
        &self,
        source: &Source,
    ) -> Result<Box<dyn Iterator<Item = Result<LoadedDocument, CorpusError>>>, CorpusError> {
        let root = PathBuf::from(&source.root);
        let mut paths = Vec::new();
        for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|ext| ext.to_str()) == Some("md")
            {
                paths.push(entry.path().to_path_buf());
            }
        }
        Ok(Box::new(paths.into_iter().map(load_markdown_file)))
    }
}

/// Loads a single file (markdown or PDF, by extension). PDF bytes are
/// handed to `file-chunker`'s PDF reader at chunk time, not here — this
/// loader only reads bytes off disk.
pub struct FileLoader;

impl DocumentLoader for FileLoader {
    fn load(
        &self,
        source: &Source,
    ) -> Result<Box<dyn Iterator<Item = Result<LoadedDocument, CorpusError>>>, CorpusError> {
        let path = PathBuf::from(&source.root);
        Ok(Box::new(std::iter::once(load_markdown_file(path))))
    }
}

/// Wraps caller-supplied bytes directly; used by `ingest_document` calls
/// made without a backing watcher at all.
pub struct AdHocLoader {
    pub uri: String,
    pub bytes: Vec<u8>,
    pub tags: BTreeSet<String>,
}

impl DocumentLoader for AdHocLoader {
    fn load(
        &self,
        _source: &Source,
    ) -> Result<Box<dyn Iterator<Item = Result<LoadedDocument, CorpusError>>>, CorpusError> {
        let doc = LoadedDocument {
            uri: self.uri.clone(),
            bytes: self.bytes.clone(),
            mtime: Utc::now(),
            tags: self.tags.clone(),
            frontmatter: BTreeMap::new(),
        };
        Ok(Box::new(std::iter::once(Ok(doc))))
    }
}

fn load_markdown_file(path: PathBuf) -> Result<LoadedDocument, CorpusError> {
    let uri = path.to_string_lossy().to_string();
    let bytes = fs::read(&path).map_err(|err| CorpusError::Read {
        uri: uri.clone(),
        message: err.to_string(),
    })?;
    let mtime = file_mtime(&path).unwrap_or_else(Utc::now);

    let text = String::from_utf8_lossy(&bytes);
    let (frontmatter, tags) = parse_frontmatter(&text);

    Ok(LoadedDocument {
        uri,
        bytes,
        mtime,
        tags,
        frontmatter,
    })
}

fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Parses a leading `---\n...\n---` YAML-ish frontmatter block into a flat
/// `key: value` map, plus a `tags:` line split on commas. Not a full YAML
/// parser — frontmatter is a convenience the out-of-scope CLI/watcher use,
/// not a data format the retrieval core depends on for correctness.
fn parse_frontmatter(text: &str) -> (BTreeMap<String, serde_json::Value>, BTreeSet<String>) {
    let mut frontmatter = BTreeMap::new();
    let mut tags = BTreeSet::new();

    let mut lines = text.lines();
    let Some(first) = lines.next() else {
        return (frontmatter, tags);
    };
    if first.trim() != "---" {
        return (frontmatter, tags);
    }

    for line in lines {
        if line.trim() == "---" {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_string();
        let value = value.trim().trim_matches('"').to_string();

        if key == "tags" {
            let cleaned = value.trim_start_matches('[').trim_end_matches(']');
            for tag in cleaned.split(',') {
                let tag = tag.trim().trim_matches('"').trim();
                if !tag.is_empty() {
                    tags.insert(tag.to_string());
                }
            }
        } else {
            frontmatter.insert(key, serde_json::Value::String(value));
        }
    }

    (frontmatter, tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tags_and_flat_fields() {
        let text = "---\ntitle: My Note\ntags: [rust, notes]\n---\n\nbody text\n";
        let (frontmatter, tags) = parse_frontmatter(text);
        assert_eq!(
            frontmatter.get("title"),
            Some(&serde_json::Value::String("My Note".to_string()))
        );
        assert!(tags.contains("rust"));
        assert!(tags.contains("notes"));
    }

    #[test]
    fn missing_frontmatter_yields_empty() {
        let (frontmatter, tags) = parse_frontmatter("just a paragraph, no frontmatter.\n");
        assert!(frontmatter.is_empty());
        assert!(tags.is_empty());
    }
}
