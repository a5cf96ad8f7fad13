//! Pure-Rust PDF text extraction via `lopdf`, behind the `pure-pdf` feature.
//! No external renderer or system PDF library is required; content streams
//! are decoded and their `Tj`/`TJ` text-showing operators are read back out
//! directly.

use lopdf::{Document, Object};

use chunk_model::CorpusError;

/// Extracts a plain-text rendition of `bytes`, one paragraph-separated
/// block per page, suitable for feeding back into [`crate::markdown::segments`].
pub fn extract_text(uri: &str, bytes: &[u8]) -> Result<String, CorpusError> {
    let doc = Document::load_mem(bytes).map_err(|err| CorpusError::Parse {
        uri: uri.to_string(),
        message: format!("lopdf failed to load PDF: {err}"),
    })?;

    let mut pages: Vec<(u32, String)> = doc
        .get_pages()
        .into_iter()
        .map(|(page_num, page_id)| (page_num, extract_page_text(&doc, page_id)))
        .collect();
    pages.sort_by_key(|(page_num, _)| *page_num);

    let text = pages
        .into_iter()
        .map(|(_, text)| text)
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    if text.trim().is_empty() {
        return Err(CorpusError::Parse {
            uri: uri.to_string(),
            message: "no extractable text found in PDF".to_string(),
        });
    }

    Ok(text)
}

fn extract_page_text(doc: &Document, page_id: (u32, u16)) -> String {
    let Ok(page) = doc.get_object(page_id) else {
        return String::new();
    };
    let Ok(page_dict) = page.as_dict() else {
        return String::new();
    };
    let Ok(contents) = page_dict.get(b"Contents") else {
        return String::new();
    };
    extract_content_text(doc, contents)
}

fn extract_content_text(doc: &Document, contents: &Object) -> String {
    match contents {
        Object::Reference(reference) => match doc.get_object(*reference) {
            Ok(obj) => extract_content_text(doc, &obj),
            Err(_) => String::new(),
        },
        Object::Array(items) => items
            .iter()
            .map(|item| extract_content_text(doc, item))
            .collect::<Vec<_>>()
            .join(""),
        Object::Stream(stream) => stream
            .decode_content()
            .ok()
            .map(|content| parse_content_stream_operators(&content.operations))
            .unwrap_or_default(),
        _ => String::new(),
    }
}

fn parse_content_stream_operators(operations: &[lopdf::content::Operation]) -> String {
    let mut out = String::new();
    for op in operations {
        match op.operator.as_str() {
            "Tj" => {
                if let Some(Object::String(bytes, _)) = op.operands.first() {
                    out.push_str(&String::from_utf8_lossy(bytes));
                    out.push(' ');
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = op.operands.first() {
                    for item in items {
                        if let Object::String(bytes, _) = item {
                            out.push_str(&String::from_utf8_lossy(bytes));
                        }
                    }
                    out.push(' ');
                }
            }
            "ET" => out.push('\n'),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_bytes() {
        let err = extract_text("doc.pdf", b"not a pdf");
        assert!(err.is_err());
    }
}
