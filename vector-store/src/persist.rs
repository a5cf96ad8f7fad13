use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use chunk_model::{ChunkId, DocumentId, SourceId, SourceKind};

use crate::error::VectorStoreError;
use crate::index::HnswVectorStore;
use crate::payload::VectorPayload;

const MAGIC: &[u8; 8] = b"NXVEC002";

fn write_u32(w: &mut impl Write, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_i64(w: &mut impl Write, v: i64) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_str(w: &mut impl Write, s: &str) -> std::io::Result<()> {
    write_u32(w, s.len() as u32)?;
    w.write_all(s.as_bytes())
}

fn read_u32(r: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i64(r: &mut impl Read) -> std::io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_string(r: &mut impl Read) -> std::io::Result<String> {
    let len = read_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Persist the live vector set to disk: write to a sibling temp file, then
/// rename over the target so readers never observe a half-written snapshot
/// (the same durability pattern the BM25 index uses for its own file).
pub fn save(store: &HnswVectorStore, path: &Path) -> Result<(), VectorStoreError> {
    let (dim, embedding_model_id, entries) = store.snapshot_entries();
    let tmp_path = path.with_extension("tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut w = BufWriter::new(file);
        w.write_all(MAGIC)?;
        write_u32(&mut w, dim.unwrap_or(0) as u32)?;
        write_str(&mut w, embedding_model_id.as_deref().unwrap_or(""))?;
        write_u32(&mut w, entries.len() as u32)?;
        for (chunk_id, vector, payload) in &entries {
            write_str(&mut w, chunk_id.as_str())?;
            write_str(&mut w, payload.source_id.as_str())?;
            write_str(&mut w, payload.document_id.as_str())?;
            write_str(&mut w, payload.kind.as_str())?;
            write_i64(&mut w, payload.indexed_at.timestamp())?;
            write_str(&mut w, &payload.section_path_prefix)?;
            write_u32(&mut w, payload.tags.len() as u32)?;
            for tag in &payload.tags {
                write_str(&mut w, tag)?;
            }
            write_u32(&mut w, vector.len() as u32)?;
            for x in vector {
                w.write_all(&x.to_le_bytes())?;
            }
        }
        w.flush()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load a snapshot written by [`save`] and rebuild the in-memory graph.
pub fn load(store: &HnswVectorStore, path: &Path) -> Result<(), VectorStoreError> {
    let file = File::open(path)?;
    let mut r = BufReader::new(file);

    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(VectorStoreError::Corrupt("bad magic".into()));
    }

    let dim = read_u32(&mut r)? as usize;
    let embedding_model_id = read_string(&mut r)?;
    let count = read_u32(&mut r)?;

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let chunk_id = ChunkId(read_string(&mut r)?);
        let source_id = SourceId(read_string(&mut r)?);
        let document_id = DocumentId(read_string(&mut r)?);
        let kind_str = read_string(&mut r)?;
        let kind: SourceKind = kind_str.parse().map_err(VectorStoreError::Corrupt)?;
        let indexed_at_secs = read_i64(&mut r)?;
        let indexed_at = chrono::DateTime::from_timestamp(indexed_at_secs, 0)
            .unwrap_or_else(chrono::Utc::now);
        let section_path_prefix = read_string(&mut r)?;
        let tag_count = read_u32(&mut r)?;
        let mut tags = std::collections::BTreeSet::new();
        for _ in 0..tag_count {
            tags.insert(read_string(&mut r)?);
        }
        let vec_len = read_u32(&mut r)? as usize;
        let mut vector = Vec::with_capacity(vec_len);
        for _ in 0..vec_len {
            let mut buf = [0u8; 4];
            r.read_exact(&mut buf)?;
            vector.push(f32::from_le_bytes(buf));
        }

        let payload = VectorPayload {
            source_id,
            document_id,
            tags,
            kind,
            indexed_at,
            section_path_prefix,
        };
        entries.push((chunk_id, vector, payload));
    }

    let dim = if dim == 0 { None } else { Some(dim) };
    let embedding_model_id = if embedding_model_id.is_empty() {
        None
    } else {
        Some(embedding_model_id)
    };
    store.restore_entries(dim, embedding_model_id, entries);
    Ok(())
}
