use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use chunk_model::ChunkId;

/// Tunable BM25 parameters (defaults `k1 = 1.2`, `b = 0.75`).
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// Everything that changes together on a write: posting lists, per-chunk
/// lengths, and the reverse index needed to remove a chunk in O(terms)
/// instead of scanning the whole dictionary.
#[derive(Default)]
struct Inner {
    postings: BTreeMap<String, BTreeMap<ChunkId, u32>>,
    lengths: BTreeMap<ChunkId, u32>,
    terms_by_chunk: HashMap<ChunkId, Vec<String>>,
    total_length: u64,
}

impl Inner {
    fn remove_locked(&mut self, chunk_id: &ChunkId) {
        if let Some(terms) = self.terms_by_chunk.remove(chunk_id) {
            for term in terms {
                if let Some(posting) = self.postings.get_mut(&term) {
                    posting.remove(chunk_id);
                    if posting.is_empty() {
                        // A term whose df reaches zero is dropped from the
                        // dictionary entirely.
                        self.postings.remove(&term);
                    }
                }
            }
        }
        if let Some(length) = self.lengths.remove(chunk_id) {
            self.total_length -= length as u64;
        }
    }
}

/// Classic BM25 posting-list index over the set of live chunks.
/// Tokenization happens once, by the caller via [`crate::Tokenizer`], so the
/// same term list is what gets indexed and what gets queried.
pub struct PostingListIndex {
    inner: RwLock<Inner>,
    params: Bm25Params,
}

impl Default for PostingListIndex {
    fn default() -> Self {
        Self::new(Bm25Params::default())
    }
}

impl PostingListIndex {
    pub fn new(params: Bm25Params) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            params,
        }
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    /// Index (or re-index) `chunk_id`'s tokens. Re-adding an already-present
    /// chunk first removes its prior postings, so `add` is also the upsert
    /// path the ingestion pipeline uses for changed chunks.
    pub fn add(&self, chunk_id: ChunkId, tokens: &[String]) {
        let mut inner = self.inner.write();
        if inner.lengths.contains_key(&chunk_id) {
            inner.remove_locked(&chunk_id);
        }

        let mut term_frequencies: BTreeMap<String, u32> = BTreeMap::new();
        for token in tokens {
            *term_frequencies.entry(token.clone()).or_insert(0) += 1;
        }

        let length = tokens.len() as u32;
        inner.total_length += length as u64;
        inner.lengths.insert(chunk_id.clone(), length);
        inner
            .terms_by_chunk
            .insert(chunk_id.clone(), term_frequencies.keys().cloned().collect());
        for (term, tf) in term_frequencies {
            inner.postings.entry(term).or_default().insert(chunk_id.clone(), tf);
        }
    }

    pub fn remove(&self, chunk_id: &ChunkId) {
        self.inner.write().remove_locked(chunk_id);
    }

    /// Scores every candidate chunk against `query_tokens`, applies `filter`
    /// to the full candidate set, then truncates to `k`, so a narrow filter
    /// never starves the result by being applied after truncation.
    pub fn search(
        &self,
        query_tokens: &[String],
        k: usize,
        filter: &dyn Fn(&ChunkId) -> bool,
    ) -> Vec<(ChunkId, f32)> {
        if k == 0 || query_tokens.is_empty() {
            return Vec::new();
        }

        let inner = self.inner.read();
        let doc_count = inner.lengths.len();
        if doc_count == 0 {
            return Vec::new();
        }
        let avgdl = inner.total_length as f32 / doc_count as f32;

        let mut unique_terms: Vec<&str> = query_tokens.iter().map(String::as_str).collect();
        unique_terms.sort_unstable();
        unique_terms.dedup();

        let mut scores: HashMap<ChunkId, f32> = HashMap::new();
        for term in unique_terms {
            let Some(posting) = inner.postings.get(term) else {
                continue;
            };
            let df = posting.len();
            let idf = idf(doc_count, df);
            for (chunk_id, &tf) in posting {
                let length = *inner.lengths.get(chunk_id).unwrap_or(&0) as f32;
                let denom = tf as f32 + self.params.k1 * (1.0 - self.params.b + self.params.b * length / avgdl);
                let contribution = idf * (tf as f32 * (self.params.k1 + 1.0)) / denom;
                *scores.entry(chunk_id.clone()).or_insert(0.0) += contribution;
            }
        }

        let mut ranked: Vec<(ChunkId, f32)> = scores.into_iter().filter(|(id, _)| filter(id)).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }

    pub fn doc_count(&self) -> usize {
        self.inner.read().lengths.len()
    }

    /// Every chunk id currently indexed, used by the startup orphan scan.
    pub fn chunk_ids(&self) -> std::collections::BTreeSet<ChunkId> {
        self.inner.read().lengths.keys().cloned().collect()
    }

    pub fn term_count(&self) -> usize {
        self.inner.read().postings.len()
    }

    pub fn avg_doc_length(&self) -> f32 {
        let inner = self.inner.read();
        if inner.lengths.is_empty() {
            0.0
        } else {
            inner.total_length as f32 / inner.lengths.len() as f32
        }
    }

    pub(crate) fn snapshot(&self) -> (BTreeMap<String, BTreeMap<ChunkId, u32>>, BTreeMap<ChunkId, u32>) {
        let inner = self.inner.read();
        (inner.postings.clone(), inner.lengths.clone())
    }

    pub(crate) fn restore(&self, postings: BTreeMap<String, BTreeMap<ChunkId, u32>>, lengths: BTreeMap<ChunkId, u32>) {
        let mut inner = self.inner.write();
        let mut terms_by_chunk: HashMap<ChunkId, Vec<String>> = HashMap::new();
        for (term, posting) in &postings {
            for chunk_id in posting.keys() {
                terms_by_chunk.entry(chunk_id.clone()).or_default().push(term.clone());
            }
        }
        let total_length = lengths.values().map(|&l| l as u64).sum();
        inner.postings = postings;
        inner.lengths = lengths;
        inner.terms_by_chunk = terms_by_chunk;
        inner.total_length = total_length;
    }
}

/// `idf(t) = ln((N − df + 0.5)/(df + 0.5) + 1)`.
fn idf(doc_count: usize, document_frequency: usize) -> f32 {
    let n = doc_count as f32;
    let df = document_frequency as f32;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
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
    fn search_ranks_by_term_frequency_and_idf() {
        let index = PostingListIndex::default();
        index.add(id("a"), &toks(&["rust", "rust", "rust", "systems"]));
        index.add(id("b"), &toks(&["rust", "web", "framework"]));
        index.add(id("c"), &toks(&["python", "scripting"]));

        let results = index.search(&toks(&["rust"]), 10, &|_| true);
        assert_eq!(results[0].0, id("a"));
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn remove_drops_term_when_df_reaches_zero() {
        let index = PostingListIndex::default();
        index.add(id("a"), &toks(&["unique", "term"]));
        assert_eq!(index.term_count(), 2);
        index.remove(&id("a"));
        assert_eq!(index.term_count(), 0);
        assert_eq!(index.doc_count(), 0);
    }

    #[test]
    fn readd_upserts_rather_than_duplicates() {
        let index = PostingListIndex::default();
        index.add(id("a"), &toks(&["old", "text"]));
        index.add(id("a"), &toks(&["new", "words"]));
        assert_eq!(index.doc_count(), 1);
        let results = index.search(&toks(&["old"]), 10, &|_| true);
        assert!(results.is_empty());
        let results = index.search(&toks(&["new"]), 10, &|_| true);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn filter_applies_before_truncation() {
        let index = PostingListIndex::default();
        for i in 0..5 {
            index.add(id(&format!("keep-{i}")), &toks(&["shared", "term"]));
        }
        index.add(id("drop-0"), &toks(&["shared", "term", "term", "term"]));

        let results = index.search(&toks(&["shared"]), 3, &|cid| cid.as_str().starts_with("keep"));
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|(id, _)| id.as_str().starts_with("keep")));
    }

    #[test]
    fn avg_doc_length_matches_mean_of_lengths() {
        let index = PostingListIndex::default();
        index.add(id("a"), &toks(&["one", "two"]));
        index.add(id("b"), &toks(&["one", "two", "three", "four"]));
        assert_eq!(index.avg_doc_length(), 3.0);
    }

    #[test]
    fn empty_query_or_empty_index_returns_nothing() {
        let index = PostingListIndex::default();
        assert!(index.search(&toks(&["anything"]), 10, &|_| true).is_empty());
        index.add(id("a"), &toks(&["word"]));
        assert!(index.search(&[], 10, &|_| true).is_empty());
    }
}
