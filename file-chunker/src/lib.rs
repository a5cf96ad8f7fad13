//! Structure-aware chunking: splits a document's text on
//! markdown structural boundaries, packs the resulting segments into
//! token-budgeted chunks with a sliding overlap, and assigns each chunk a
//! deterministic id. Markdown and plain text share one code path; PDF
//! bytes are first flattened to text (feature `pure-pdf`) and fed through
//! the same pipeline.

pub mod loader;
pub mod markdown;
pub mod pack;
pub mod segment;
pub mod tokens;

#[cfg(feature = "pure-pdf")]
pub mod pdf;

use chunk_model::{Chunk, CorpusError, DocumentId};

pub use loader::{AdHocLoader, FileLoader, MarkdownDirectoryLoader};
pub use segment::{Segment, SegmentKind};

/// Chunks markdown source text.
pub fn chunk_markdown(
    document_id: &DocumentId,
    text: &str,
    target_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let segments = markdown::segments(text);
    pack::pack_segments(document_id, text, &segments, target_tokens, overlap_tokens)
}

/// Chunks plain text with no markdown structure: the whole document is one
/// segment, so packing falls back to hard character-budget splitting for
/// anything larger than the oversize threshold.
pub fn chunk_plain_text(
    document_id: &DocumentId,
    text: &str,
    target_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let segment = Segment {
        char_start: 0,
        char_end: text.chars().count(),
        kind: SegmentKind::Paragraph,
        section_path: Vec::new(),
    };
    pack::pack_segments(document_id, text, &[segment], target_tokens, overlap_tokens)
}

/// Chunks raw bytes, dispatching on `uri`'s extension. Markdown (`.md`)
/// and plain text (anything else, best-effort UTF-8) go straight through;
/// `.pdf` is flattened to text first via [`pdf::extract_text`].
pub fn chunk_bytes(
    document_id: &DocumentId,
    uri: &str,
    bytes: &[u8],
    target_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<Chunk>, CorpusError> {
    let lowercase_uri = uri.to_ascii_lowercase();

    #[cfg(feature = "pure-pdf")]
    if lowercase_uri.ends_with(".pdf") {
        let text = pdf::extract_text(uri, bytes)?;
        return Ok(chunk_plain_text(document_id, &text, target_tokens, overlap_tokens));
    }

    #[cfg(not(feature = "pure-pdf"))]
    if lowercase_uri.ends_with(".pdf") {
        return Err(CorpusError::UnsupportedType {
            uri: uri.to_string(),
            mime: "application/pdf".to_string(),
        });
    }

    let text = String::from_utf8(bytes.to_vec()).map_err(|err| CorpusError::Parse {
        uri: uri.to_string(),
        message: format!("document is not valid UTF-8: {err}"),
    })?;

    if lowercase_uri.ends_with(".md") || lowercase_uri.ends_with(".markdown") {
        Ok(chunk_markdown(document_id, &text, target_tokens, overlap_tokens))
    } else {
        Ok(chunk_plain_text(document_id, &text, target_tokens, overlap_tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_id() -> DocumentId {
        DocumentId::from("doc-1")
    }

    #[test]
    fn markdown_chunks_cover_contiguous_ranges_from_zero() {
        let text = "# Title\n\nFirst paragraph.\n\nSecond paragraph.\n";
        let chunks = chunk_markdown(&doc_id(), text, 512, 50);
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].char_start, 0);
    }

    #[test]
    fn plain_text_dispatch_produces_one_chunk_for_short_input() {
        let chunks = chunk_bytes(&doc_id(), "notes/todo.txt", b"buy milk\nwalk dog\n", 512, 50).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn unsupported_binary_extension_without_pdf_support_errs() {
        #[cfg(not(feature = "pure-pdf"))]
        {
            let err = chunk_bytes(&doc_id(), "scan.pdf", b"%PDF-1.4 ...", 512, 50);
            assert!(err.is_err());
        }
    }

    #[test]
    fn non_utf8_bytes_yield_parse_error() {
        let invalid = vec![0xFF, 0xFE, 0xFD];
        let err = chunk_bytes(&doc_id(), "notes/bad.txt", &invalid, 512, 50);
        assert!(err.is_err());
    }
}
