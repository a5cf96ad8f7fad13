use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use chunk_model::ChunkId;

use crate::error::Bm25Error;
use crate::index::PostingListIndex;

const MAGIC: &[u8; 8] = b"NXBM2501";
const FORMAT_VERSION: u32 = 1;

fn write_u32(w: &mut impl Write, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64(w: &mut impl Write, v: u64) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_f32(w: &mut impl Write, v: f32) -> std::io::Result<()> {
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

fn read_u64(r: &mut impl Read) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f32(r: &mut impl Read) -> std::io::Result<f32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

fn read_string(r: &mut impl Read) -> std::io::Result<String> {
    let len = read_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Serializes one posting-list entry as `(chunk_id, tf)`.
fn write_posting_entry(w: &mut impl Write, chunk_id: &ChunkId, tf: u32) -> std::io::Result<()> {
    write_str(w, chunk_id.as_str())?;
    write_u32(w, tf)
}

fn read_posting_entry(r: &mut impl Read) -> std::io::Result<(ChunkId, u32)> {
    let chunk_id = ChunkId(read_string(r)?);
    let tf = read_u32(r)?;
    Ok((chunk_id, tf))
}

/// Persists the index to `dir/index.bin` (dictionary + posting lists) and
/// `dir/lengths.bin` (parallel per-chunk length array), matching the
/// on-disk format exactly. Both files are written to a sibling temp path
/// and atomically renamed into place so a reader never observes a
/// half-written snapshot.
pub fn save(index: &PostingListIndex, dir: &Path) -> Result<(), Bm25Error> {
    std::fs::create_dir_all(dir)?;
    let (postings, lengths) = index.snapshot();
    let doc_count = lengths.len() as u32;
    let term_count = postings.len() as u32;
    let avg_doc_len = index.avg_doc_length();

    // Build the posting-lists blob first so the dictionary section can
    // record each term's byte offset and entry count into it.
    let mut posting_blob = Vec::new();
    let mut dictionary: Vec<(String, u32, u64, u32)> = Vec::with_capacity(postings.len());
    for (term, posting) in &postings {
        let offset = posting_blob.len() as u64;
        for (chunk_id, tf) in posting {
            write_posting_entry(&mut posting_blob, chunk_id, *tf).map_err(Bm25Error::Io)?;
        }
        dictionary.push((term.clone(), posting.len() as u32, offset, posting.len() as u32));
    }

    let index_path = dir.join("index.bin");
    let tmp_index_path = index_path.with_extension("bin.tmp");
    {
        let file = File::create(&tmp_index_path)?;
        let mut w = BufWriter::new(file);
        w.write_all(MAGIC)?;
        write_u32(&mut w, FORMAT_VERSION)?;
        write_u32(&mut w, doc_count)?;
        write_u32(&mut w, term_count)?;
        write_f32(&mut w, avg_doc_len)?;
        for (term, df, offset, posting_len) in &dictionary {
            write_str(&mut w, term)?;
            write_u32(&mut w, *df)?;
            write_u64(&mut w, *offset)?;
            write_u32(&mut w, *posting_len)?;
        }
        w.write_all(&posting_blob)?;
        w.flush()?;
    }
    std::fs::rename(&tmp_index_path, &index_path)?;

    let lengths_path = dir.join("lengths.bin");
    let tmp_lengths_path = lengths_path.with_extension("bin.tmp");
    {
        let file = File::create(&tmp_lengths_path)?;
        let mut w = BufWriter::new(file);
        write_u32(&mut w, lengths.len() as u32)?;
        for (chunk_id, length) in &lengths {
            write_str(&mut w, chunk_id.as_str())?;
            write_u32(&mut w, *length)?;
        }
        w.flush()?;
    }
    std::fs::rename(&tmp_lengths_path, &lengths_path)?;

    Ok(())
}

/// Loads a snapshot written by [`save`], rebuilding `avgdl` from the lengths
/// file rather than trusting the header's stored value. A version mismatch
/// returns [`Bm25Error::VersionMismatch`] rather than attempting to parse
/// an incompatible layout; the caller is expected to rebuild from the
/// metadata store and chunker instead.
pub fn load(index: &PostingListIndex, dir: &Path) -> Result<(), Bm25Error> {
    let index_path = dir.join("index.bin");
    let lengths_path = dir.join("lengths.bin");

    let file = File::open(&index_path)?;
    let mut r = BufReader::new(file);

    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(Bm25Error::Corrupt("bad magic in index.bin".into()));
    }
    let version = read_u32(&mut r)?;
    if version != FORMAT_VERSION {
        return Err(Bm25Error::VersionMismatch {
            expected: FORMAT_VERSION,
            found: version,
        });
    }
    let _doc_count = read_u32(&mut r)?;
    let term_count = read_u32(&mut r)?;
    let _avg_doc_len = read_f32(&mut r)?;

    struct DictEntry {
        term: String,
        offset: u64,
        posting_len: u32,
    }
    let mut dictionary = Vec::with_capacity(term_count as usize);
    for _ in 0..term_count {
        let term = read_string(&mut r)?;
        let _df = read_u32(&mut r)?;
        let offset = read_u64(&mut r)?;
        let posting_len = read_u32(&mut r)?;
        dictionary.push(DictEntry { term, offset, posting_len });
    }

    let mut posting_blob = Vec::new();
    r.read_to_end(&mut posting_blob)?;

    let mut postings: BTreeMap<String, BTreeMap<ChunkId, u32>> = BTreeMap::new();
    for entry in dictionary {
        let start = entry.offset as usize;
        if start > posting_blob.len() {
            return Err(Bm25Error::Corrupt(format!("posting offset out of range for term `{}`", entry.term)));
        }
        let mut cursor = &posting_blob[start..];
        let mut posting = BTreeMap::new();
        for _ in 0..entry.posting_len {
            let (chunk_id, tf) = read_posting_entry(&mut cursor)?;
            posting.insert(chunk_id, tf);
        }
        postings.insert(entry.term, posting);
    }

    let lengths_file = File::open(&lengths_path)?;
    let mut lr = BufReader::new(lengths_file);
    let length_count = read_u32(&mut lr)?;
    let mut lengths = BTreeMap::new();
    for _ in 0..length_count {
        let chunk_id = ChunkId(read_string(&mut lr)?);
        let length = read_u32(&mut lr)?;
        lengths.insert(chunk_id, length);
    }

    index.restore(postings, lengths);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ChunkId {
        ChunkId::from(s)
    }

    fn toks(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let index = PostingListIndex::default();
        index.add(id("a"), &toks(&["rust", "systems", "language"]));
        index.add(id("b"), &toks(&["python", "scripting", "language"]));

        save(&index, dir.path()).unwrap();

        let restored = PostingListIndex::default();
        load(&restored, dir.path()).unwrap();

        assert_eq!(restored.doc_count(), 2);
        assert_eq!(restored.avg_doc_length(), index.avg_doc_length());
        let results = restored.search(&toks(&["language"]), 10, &|_| true);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.bin"), b"not-an-index-file").unwrap();
        std::fs::write(dir.path().join("lengths.bin"), []).unwrap();
        let restored = PostingListIndex::default();
        let err = load(&restored, dir.path()).unwrap_err();
        assert!(matches!(err, Bm25Error::Corrupt(_)));
    }
}
