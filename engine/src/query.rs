use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::index::{idf, tf, Posting};
use crate::store::{IndexView, Storage};
use crate::tokenizer::TextNormalizer;
use crate::{DocId, Result};

/// A scored document. Ordered by score, then by doc id.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScoredDoc {
    pub score: f32,
    pub doc_id: DocId,
}

impl PartialEq for ScoredDoc {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredDoc {}

impl PartialOrd for ScoredDoc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredDoc {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score.total_cmp(&other.score).then(self.doc_id.cmp(&other.doc_id))
    }
}

/// The `k` best entries of `scores`, selected with a bounded min-heap.
/// The output is in heap order, not sorted.
pub fn top_k_docs(scores: &HashMap<DocId, f32>, k: usize) -> Vec<ScoredDoc> {
    let mut heap: BinaryHeap<Reverse<ScoredDoc>> = BinaryHeap::with_capacity(k + 1);
    for (&doc_id, &score) in scores {
        let candidate = Reverse(ScoredDoc { score, doc_id });
        if heap.len() < k {
            heap.push(candidate);
        } else if k > 0 {
            heap.push(candidate);
            heap.pop();
        }
    }
    heap.into_iter().map(|Reverse(d)| d).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryOutcome {
    /// Best documents first.
    pub ranked: Vec<ScoredDoc>,
    /// Distinct normalized terms that have postings, in query order.
    pub matched_terms: Vec<String>,
    /// Raw tokens found in the stopword set.
    pub stopwords: Vec<String>,
    /// Raw tokens whose normalized term is not in the index.
    pub unknown_terms: Vec<String>,
}

struct QueryTerm {
    term: String,
    count: u32,
    postings: Vec<Posting>,
}

/// Disjunctive log-tf/idf scoring over a [`Storage`].
pub struct QueryEngine<'a, S: Storage + ?Sized> {
    normalizer: &'a TextNormalizer,
    storage: &'a S,
}

impl<'a, S: Storage + ?Sized> QueryEngine<'a, S> {
    pub fn new(normalizer: &'a TextNormalizer, storage: &'a S) -> Self {
        Self { normalizer, storage }
    }

    /// Rank documents against `text`, keeping at most `k`, using `n` as the
    /// corpus size for idf.
    ///
    /// Scores are dot products divided by the document norm only; the query
    /// vector is not normalized. Every lookup reads the same snapshot.
    pub fn query(&self, text: &str, k: usize, n: u32) -> Result<QueryOutcome> {
        let view = self.storage.snapshot()?;
        self.query_in(view.as_ref(), text, k, n)
    }

    /// [`QueryEngine::query`] against a snapshot the caller already holds.
    pub fn query_in(&self, view: &dyn IndexView, text: &str, k: usize, n: u32) -> Result<QueryOutcome> {
        let text = text.trim();
        let mut outcome = QueryOutcome::default();
        if text.is_empty() {
            return Ok(outcome);
        }

        let mut terms: Vec<QueryTerm> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut unknown: HashSet<String> = HashSet::new();
        for token in self.normalizer.tokenize(text) {
            // raw token, case-sensitive; no early exit, a stopword still goes
            // through normalization
            if self.normalizer.is_stopword(&token) {
                outcome.stopwords.push(token.clone());
            }
            let Some(term) = self.normalizer.normalize(&token) else { continue };
            if let Some(&i) = positions.get(&term) {
                terms[i].count += 1;
                continue;
            }
            if unknown.contains(&term) {
                outcome.unknown_terms.push(token);
                continue;
            }
            match view.get_postings(&term)? {
                Some(postings) if !postings.is_empty() => {
                    positions.insert(term.clone(), terms.len());
                    terms.push(QueryTerm { term, count: 1, postings });
                }
                _ => {
                    unknown.insert(term);
                    outcome.unknown_terms.push(token);
                }
            }
        }

        let mut scores: HashMap<DocId, f32> = HashMap::new();
        for qt in &terms {
            let df = qt.postings.len() as u32;
            if df > n {
                tracing::warn!(term = %qt.term, df, n, "document frequency exceeds corpus size");
            }
            let wtq = tf(qt.count) * idf(n, df);
            for p in &qt.postings {
                *scores.entry(p.doc_id).or_insert(0.0) += wtq * p.weight;
            }
        }
        for (&doc_id, score) in scores.iter_mut() {
            *score /= view.get_doc_norm(doc_id)?;
        }

        let mut ranked = top_k_docs(&scores, k);
        ranked.sort_by(|a, b| b.cmp(a));
        tracing::debug!(query = text, terms = terms.len(), hits = scores.len(), returned = ranked.len(), "query evaluated");

        outcome.ranked = ranked;
        outcome.matched_terms = terms.into_iter().map(|qt| qt.term).collect();
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pairs: &[(DocId, f32)]) -> HashMap<DocId, f32> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn top_k_size_is_bounded() {
        let s = scores(&[(0, 0.5), (1, 0.9), (2, 0.1), (3, 0.7)]);
        assert_eq!(top_k_docs(&s, 0).len(), 0);
        assert_eq!(top_k_docs(&s, 2).len(), 2);
        assert_eq!(top_k_docs(&s, 10).len(), 4);
    }

    #[test]
    fn top_k_keeps_the_best() {
        let s = scores(&[(0, 0.5), (1, 0.9), (2, 0.1), (3, 0.7)]);
        let mut best = top_k_docs(&s, 2);
        best.sort_by(|a, b| b.cmp(a));
        assert_eq!(best.iter().map(|d| d.doc_id).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn ties_break_on_doc_id() {
        let s = scores(&[(4, 1.0), (9, 1.0), (2, 1.0)]);
        let mut best = top_k_docs(&s, 2);
        best.sort_by(|a, b| b.cmp(a));
        assert_eq!(best.iter().map(|d| d.doc_id).collect::<Vec<_>>(), vec![9, 4]);
    }
}
