use chrono::Utc;
use chunk_model::{derive_chunk_id, Chunk, DocumentId};

use crate::segment::{Segment, SegmentKind};
use crate::tokens::{approx_tokens, CHARS_PER_TOKEN};

/// Greedily packs segments into chunks of roughly `target_tokens`, then
/// slides each chunk's start back by `overlap_tokens` worth of characters
/// so consecutive chunks share a prefix.
///
/// Oversized segments (more than twice `target_tokens` on their own) are
/// split before packing: at a sentence boundary if one falls inside the
/// budget, otherwise at a hard character limit. Code fences and tables are
/// never split regardless of size — they are marked
/// indivisible, so a table bigger than `target_tokens` still becomes its
/// own single chunk.
pub fn pack_segments(
    document_id: &DocumentId,
    full_text: &str,
    segments: &[Segment],
    target_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let expanded = expand_oversized(full_text, segments, target_tokens);
    if expanded.is_empty() {
        return Vec::new();
    }

    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;
    let now = Utc::now();
    let mut chunks = Vec::new();
    let mut ordinal = 0u32;

    let mut group_start_idx = 0usize;
    let mut group_tokens = 0u32;

    let mut flush = |start_idx: usize, end_idx: usize, chunks: &mut Vec<Chunk>, ordinal: &mut u32| {
        if start_idx >= end_idx {
            return;
        }
        let original_char_start = expanded[start_idx].char_start;
        let char_end = expanded[end_idx - 1].char_end;

        let overlapped_start = if *ordinal == 0 {
            original_char_start
        } else {
            let prior_start = chunks.last().map(|c: &Chunk| c.char_start).unwrap_or(0);
            let candidate = original_char_start.saturating_sub(overlap_chars);
            // Reach back into the prior chunk's text for the overlap, but
            // never further back than the prior chunk's own start.
            candidate.max(prior_start)
        };
        let overlapped_start = overlapped_start.min(original_char_start);

        let section_path = expanded[start_idx].section_path.clone();
        let text = safe_slice(full_text, overlapped_start, char_end);
        let token_count = approx_tokens(&text);
        let chunk_id = derive_chunk_id(document_id, *ordinal, &text);

        chunks.push(Chunk {
            chunk_id,
            document_id: document_id.clone(),
            ordinal: *ordinal,
            text,
            char_start: overlapped_start,
            char_end,
            section_path,
            token_count,
            embedding_version: 0,
            indexed_at: now,
        });
        *ordinal += 1;
    };

    for (idx, segment) in expanded.iter().enumerate() {
        let seg_tokens = approx_tokens(&safe_slice(full_text, segment.char_start, segment.char_end));
        let would_overflow = group_tokens > 0 && group_tokens as usize + seg_tokens as usize > target_tokens;
        let must_flush_alone = segment.kind.is_structurally_indivisible() && group_tokens > 0;

        if would_overflow || must_flush_alone {
            flush(group_start_idx, idx, &mut chunks, &mut ordinal);
            group_start_idx = idx;
            group_tokens = 0;
        }

        group_tokens += seg_tokens;

        if segment.kind.is_structurally_indivisible() {
            flush(group_start_idx, idx + 1, &mut chunks, &mut ordinal);
            group_start_idx = idx + 1;
            group_tokens = 0;
        }
    }
    flush(group_start_idx, expanded.len(), &mut chunks, &mut ordinal);

    chunks
}

/// Splits any non-indivisible segment whose token count exceeds
/// `2 * target_tokens`, first at a sentence boundary within budget, falling
/// back to a hard character cut if no sentence boundary exists.
fn expand_oversized(full_text: &str, segments: &[Segment], target_tokens: usize) -> Vec<Segment> {
    let hard_limit_tokens = target_tokens * 2;
    let hard_limit_chars = hard_limit_tokens * CHARS_PER_TOKEN;
    let mut out = Vec::with_capacity(segments.len());

    for segment in segments {
        if segment.kind.is_structurally_indivisible() {
            out.push(segment.clone());
            continue;
        }
        let text = safe_slice(full_text, segment.char_start, segment.char_end);
        if approx_tokens(&text) <= hard_limit_tokens as u32 {
            out.push(segment.clone());
            continue;
        }
        out.extend(split_oversized(segment, &text, hard_limit_chars));
    }

    out
}

fn split_oversized(segment: &Segment, text: &str, hard_limit_chars: usize) -> Vec<Segment> {
    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut offset = 0usize;

    while offset < chars.len() {
        let remaining = chars.len() - offset;
        let take = remaining.min(hard_limit_chars);
        let mut cut = offset + take;

        if cut < chars.len() {
            if let Some(boundary) = find_sentence_boundary(&chars, offset, cut) {
                cut = boundary;
            }
        }
        if cut <= offset {
            cut = (offset + hard_limit_chars.max(1)).min(chars.len());
        }

        pieces.push(Segment {
            char_start: segment.char_start + offset,
            char_end: segment.char_start + cut,
            kind: SegmentKind::Paragraph,
            section_path: segment.section_path.clone(),
        });
        offset = cut;
    }

    pieces
}

/// Finds the rightmost sentence-ending punctuation (`.`, `?`, `!`) followed
/// by whitespace within `[search_start, search_end)`, scanning backward from
/// the budget limit so the piece stays as close to the budget as possible.
fn find_sentence_boundary(chars: &[char], search_start: usize, search_end: usize) -> Option<usize> {
    let mut i = search_end.min(chars.len());
    while i > search_start + 1 {
        i -= 1;
        let ch = chars[i - 1];
        if matches!(ch, '.' | '?' | '!') && chars.get(i).map(|c| c.is_whitespace()).unwrap_or(true) {
            return Some(i);
        }
    }
    None
}

fn safe_slice(text: &str, char_start: usize, char_end: usize) -> String {
    text.chars().skip(char_start).take(char_end.saturating_sub(char_start)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown;

    fn doc_id() -> DocumentId {
        DocumentId::from("doc-1")
    }

    #[test]
    fn packs_small_document_into_one_chunk() {
        let text = "# Title\n\nShort paragraph body.\n";
        let segments = markdown::segments(text);
        let chunks = pack_segments(&doc_id(), text, &segments, 512, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].char_start, 0);
    }

    #[test]
    fn chunk_ids_are_stable_across_rechunks() {
        let text = "# Title\n\nParagraph one.\n\nParagraph two.\n";
        let segments = markdown::segments(text);
        let a = pack_segments(&doc_id(), text, &segments, 512, 50);
        let b = pack_segments(&doc_id(), text, &segments, 512, 50);
        let ids_a: Vec<_> = a.iter().map(|c| c.chunk_id.clone()).collect();
        let ids_b: Vec<_> = b.iter().map(|c| c.chunk_id.clone()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn overlap_invariant_holds_across_consecutive_chunks() {
        let mut body = String::from("# Title\n\n");
        for i in 0..40 {
            body.push_str(&format!("Paragraph number {i} with a bit of filler text to add tokens. "));
            body.push_str("\n\n");
        }
        let segments = markdown::segments(&body);
        let chunks = pack_segments(&doc_id(), &body, &segments, 40, 10);
        assert!(chunks.len() > 1, "expected multiple chunks for a long document");
        for pair in chunks.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(
                a.char_end <= b.char_start + 10 * CHARS_PER_TOKEN,
                "chunk {} end {} should not exceed chunk {} start {} plus overlap budget",
                a.ordinal,
                a.char_end,
                b.ordinal,
                b.char_start
            );
            assert!(
                b.char_start < a.char_end,
                "chunk {} (start {}) should share a prefix with chunk {} (end {}), not merely abut it",
                b.ordinal,
                b.char_start,
                a.ordinal,
                a.char_end
            );
        }
    }

    #[test]
    fn ordinals_are_contiguous_from_zero() {
        let mut body = String::from("# Title\n\n");
        for i in 0..20 {
            body.push_str(&format!("Paragraph number {i}.\n\n"));
        }
        let segments = markdown::segments(&body);
        let chunks = pack_segments(&doc_id(), &body, &segments, 10, 2);
        for (idx, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, idx as u32);
        }
    }
}
