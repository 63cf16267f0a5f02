//! Lexical inverted index with TF-IDF scoring.
//!
//! The index is rebuilt incrementally in memory and serialized as a single
//! bincode artifact at commit time; its offset, length, and checksum live in
//! the TOC manifest. Deleted frames keep their postings until the next full
//! rebuild, so queries must filter through the live frame set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::text::tokenize;
use crate::types::FrameId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub frame_id: FrameId,
    pub term_frequency: u32,
}

/// A scored candidate before tombstone and track filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredFrame {
    pub frame_id: FrameId,
    pub score: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LexIndex {
    postings: BTreeMap<String, Vec<Posting>>,
    doc_lengths: BTreeMap<FrameId, u32>,
    generation: u64,
}

impl LexIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn doc_count(&self) -> u64 {
        self.doc_lengths.len() as u64
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn bump_generation(&mut self) {
        self.generation += 1;
    }

    /// Index one frame's canonical text. Re-indexing an id replaces its
    /// previous postings.
    pub fn add_document(&mut self, frame_id: FrameId, text: &str) {
        if self.doc_lengths.contains_key(&frame_id) {
            self.remove_document(frame_id);
        }
        let terms = tokenize(text);
        if terms.is_empty() {
            return;
        }

        let mut frequencies: BTreeMap<&str, u32> = BTreeMap::new();
        for term in &terms {
            *frequencies.entry(term.as_str()).or_insert(0) += 1;
        }
        for (term, term_frequency) in frequencies {
            let list = self.postings.entry(term.to_owned()).or_default();
            let posting = Posting { frame_id, term_frequency };
            match list.binary_search_by_key(&frame_id, |p| p.frame_id) {
                Ok(index) => list[index] = posting,
                Err(index) => list.insert(index, posting),
            }
        }
        self.doc_lengths.insert(frame_id, terms.len() as u32);
    }

    pub fn remove_document(&mut self, frame_id: FrameId) {
        if self.doc_lengths.remove(&frame_id).is_none() {
            return;
        }
        self.postings.retain(|_, list| {
            if let Ok(index) = list.binary_search_by_key(&frame_id, |p| p.frame_id) {
                list.remove(index);
            }
            !list.is_empty()
        });
    }

    /// TF-IDF search over the indexed corpus. Candidates come back ordered by
    /// descending score, ties broken by ascending frame id, so results are
    /// deterministic across runs.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<ScoredFrame> {
        let terms = tokenize(query);
        if terms.is_empty() || self.doc_lengths.is_empty() {
            return Vec::new();
        }
        let corpus_size = self.doc_lengths.len() as f64;

        let mut scores: BTreeMap<FrameId, f64> = BTreeMap::new();
        for term in &terms {
            let Some(list) = self.postings.get(term.as_str()) else {
                continue;
            };
            let idf = (1.0 + corpus_size / list.len() as f64).ln();
            for posting in list {
                let doc_len = f64::from(
                    self.doc_lengths
                        .get(&posting.frame_id)
                        .copied()
                        .unwrap_or(1)
                        .max(1),
                );
                let tf = f64::from(posting.term_frequency) / doc_len;
                *scores.entry(posting.frame_id).or_insert(0.0) += tf * idf;
            }
        }

        let mut candidates: Vec<ScoredFrame> = scores
            .into_iter()
            .map(|(frame_id, score)| ScoredFrame {
                frame_id,
                score: score as f32,
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.frame_id.cmp(&b.frame_id))
        });
        candidates
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(self, crate::disk_config())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (index, _) = bincode::serde::decode_from_slice(bytes, crate::disk_config())?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> LexIndex {
        let mut index = LexIndex::new();
        index.add_document(0, "the quick brown fox jumps over the lazy dog");
        index.add_document(1, "a quick study of fox behavior in the wild");
        index.add_document(2, "lazy sunday afternoon with nothing to do");
        index
    }

    #[test]
    fn matches_are_ranked_by_relevance() {
        let index = sample_index();
        let hits = index.search("quick fox");
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|hit| hit.frame_id == 0 || hit.frame_id == 1));
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn ties_break_on_frame_id() {
        let mut index = LexIndex::new();
        index.add_document(5, "alpha beta");
        index.add_document(3, "alpha beta");
        let hits = index.search("alpha");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].frame_id, 3);
        assert_eq!(hits[1].frame_id, 5);
    }

    #[test]
    fn removed_document_stops_matching() {
        let mut index = sample_index();
        index.remove_document(0);
        let hits = index.search("lazy dog");
        assert!(hits.iter().all(|hit| hit.frame_id != 0));
        assert_eq!(index.doc_count(), 2);
    }

    #[test]
    fn reindex_replaces_postings() {
        let mut index = sample_index();
        index.add_document(0, "completely different content now");
        assert!(index.search("fox").iter().all(|hit| hit.frame_id == 1));
        assert_eq!(index.search("different")[0].frame_id, 0);
    }

    #[test]
    fn artifact_roundtrip() {
        let index = sample_index();
        let bytes = index.encode().expect("encode");
        let decoded = LexIndex::decode(&bytes).expect("decode");
        assert_eq!(decoded.doc_count(), 3);
        assert_eq!(
            decoded.search("fox").len(),
            index.search("fox").len()
        );
    }

    #[test]
    fn empty_query_returns_nothing() {
        let index = sample_index();
        assert!(index.search("").is_empty());
        assert!(index.search("   ").is_empty());
    }
}
