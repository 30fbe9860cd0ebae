use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use time::OffsetDateTime;

use crate::store::Storage;
use crate::tokenizer::TextNormalizer;
use crate::{DocId, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub title: String,
    pub author: String,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub published_date: Option<OffsetDateTime>,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    pub weight: f32, // log tf
}

/// Log-dampened term frequency, `1 + log2(freq)`.
///
/// # Panics
/// When `freq == 0`: a term is only counted once it has been observed.
pub fn tf(freq: u32) -> f32 {
    assert!(freq > 0, "tf is undefined for a zero term frequency");
    1.0 + (freq as f32).log2()
}

/// Inverse document frequency, `log2(n / df)`.
///
/// # Panics
/// When `df == 0`: terms absent from the index must never reach idf.
pub fn idf(n: u32, df: u32) -> f32 {
    assert!(df > 0, "idf is undefined for a zero document frequency");
    (n as f32 / df as f32).log2()
}

/// Euclidean length of a document's tf-weight vector.
pub fn doc_vec_norm<I: IntoIterator<Item = f32>>(weights: I) -> f32 {
    weights.into_iter().map(|w| w * w).sum::<f32>().sqrt()
}

/// A complete index for one corpus version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuiltIndex {
    /// Postings per term, each list sorted by doc id.
    pub postings: BTreeMap<String, Vec<Posting>>,
    /// One entry per document, 0 for a document without terms.
    pub norms: BTreeMap<DocId, f32>,
    pub num_docs: u32,
}

impl BuiltIndex {
    pub fn stats(&self) -> BuildStats {
        BuildStats {
            num_docs: self.num_docs,
            num_terms: self.postings.len(),
            num_postings: self.postings.values().map(Vec::len).sum(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub num_docs: u32,
    pub num_terms: usize,
    pub num_postings: usize,
}

pub struct IndexBuilder<'a> {
    normalizer: &'a TextNormalizer,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(normalizer: &'a TextNormalizer) -> Self {
        Self { normalizer }
    }

    /// Raw frequency of every distinct term in the document's title and content.
    pub fn count_terms(&self, doc: &Document) -> BTreeMap<String, u32> {
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for term in self.normalizer.normalized_tokens(&doc.title, &doc.content) {
            *counts.entry(term).or_insert(0) += 1;
        }
        counts
    }

    /// Accepts owned or borrowed documents.
    pub fn build<I>(&self, documents: I) -> BuiltIndex
    where
        I: IntoIterator,
        I::Item: Borrow<Document>,
    {
        let mut acc = Accumulator::default();
        for doc in documents {
            let doc = doc.borrow();
            let counts = self.count_terms(doc);
            acc.add(doc.id, counts);
        }
        acc.finish()
    }

    /// Same output as [`IndexBuilder::build`]; term counting runs on the rayon
    /// pool and the merge into postings is serial.
    pub fn build_parallel(&self, documents: &[Document]) -> BuiltIndex {
        let counted: Vec<(DocId, BTreeMap<String, u32>)> = documents
            .par_iter()
            .map(|doc| (doc.id, self.count_terms(doc)))
            .collect();
        let mut acc = Accumulator::default();
        for (doc_id, counts) in counted {
            acc.add(doc_id, counts);
        }
        acc.finish()
    }

    /// Build and hand the whole index to `storage` in one replace.
    pub fn build_into<I, S>(&self, documents: I, storage: &S) -> Result<BuildStats>
    where
        I: IntoIterator,
        I::Item: Borrow<Document>,
        S: Storage + ?Sized,
    {
        let index = self.build(documents);
        let stats = index.stats();
        storage.replace_index(index)?;
        tracing::info!(num_docs = stats.num_docs, num_terms = stats.num_terms, num_postings = stats.num_postings, "index replaced");
        Ok(stats)
    }
}

#[derive(Default)]
struct Accumulator {
    postings: BTreeMap<String, Vec<Posting>>,
    norms: BTreeMap<DocId, f32>,
}

impl Accumulator {
    fn add(&mut self, doc_id: DocId, counts: BTreeMap<String, u32>) {
        if self.norms.contains_key(&doc_id) {
            tracing::warn!(doc_id, "duplicate document id, skipping");
            return;
        }
        let norm = doc_vec_norm(counts.values().map(|&f| tf(f)));
        for (term, freq) in counts {
            self.postings.entry(term).or_default().push(Posting { doc_id, weight: tf(freq) });
        }
        self.norms.insert(doc_id, norm);
    }

    fn finish(mut self) -> BuiltIndex {
        for plist in self.postings.values_mut() {
            plist.sort_by_key(|p| p.doc_id);
        }
        let num_docs = self.norms.len() as u32;
        tracing::debug!(num_docs, num_terms = self.postings.len(), "accumulated postings");
        BuiltIndex { postings: self.postings, norms: self.norms, num_docs }
    }
}
