use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::index::{BuiltIndex, Document, Posting};
use crate::{DocId, Error, Result};

/// Read access to one version of the index.
///
/// A view keeps answering from the version it was taken on, whatever replaces
/// happen after it.
pub trait IndexView: Send + Sync {
    /// `None` when the term is unknown to the index.
    fn get_postings(&self, term: &str) -> Result<Option<Vec<Posting>>>;

    fn get_doc_norm(&self, doc_id: DocId) -> Result<f32>;

    fn get_document(&self, doc_id: DocId) -> Result<Option<Document>>;

    /// Number of documents with a stored norm.
    fn corpus_size(&self) -> Result<u32>;
}

/// Persistence contract for postings, document norms and documents.
///
/// Every `replace_*` call swaps a whole collection: readers see either the old
/// version or the new one, never a mix.
pub trait Storage: Send + Sync {
    fn replace_postings(&self, postings: Vec<(String, Vec<Posting>)>) -> Result<()>;

    fn replace_doc_norms(&self, norms: Vec<(DocId, f32)>) -> Result<()>;

    fn replace_documents(&self, documents: Vec<Document>) -> Result<()>;

    /// Pin the current version of every collection.
    fn snapshot(&self) -> Result<Box<dyn IndexView>>;

    fn get_postings(&self, term: &str) -> Result<Option<Vec<Posting>>> {
        self.snapshot()?.get_postings(term)
    }

    fn get_doc_norm(&self, doc_id: DocId) -> Result<f32> {
        self.snapshot()?.get_doc_norm(doc_id)
    }

    fn get_document(&self, doc_id: DocId) -> Result<Option<Document>> {
        self.snapshot()?.get_document(doc_id)
    }

    fn corpus_size(&self) -> Result<u32> {
        self.snapshot()?.corpus_size()
    }

    /// Replace postings and norms. Stores able to flip both at once should
    /// override this.
    fn replace_index(&self, index: BuiltIndex) -> Result<()> {
        self.replace_postings(index.postings.into_iter().collect())?;
        self.replace_doc_norms(index.norms.into_iter().collect())
    }

    /// Replace documents, postings and norms together. Stores able to flip all
    /// three at once should override this.
    fn replace_corpus(&self, documents: Vec<Document>, index: BuiltIndex) -> Result<()> {
        check_corpus(&documents, &index)?;
        self.replace_documents(documents)?;
        self.replace_index(index)
    }
}

/// Every normed doc id must resolve to a stored document.
pub(crate) fn check_corpus(documents: &[Document], index: &BuiltIndex) -> Result<()> {
    let ids: HashSet<DocId> = documents.iter().map(|d| d.id).collect();
    match index.norms.keys().find(|id| !ids.contains(id)) {
        Some(id) => Err(Error::Corrupt(format!("document {id} is indexed but not in the corpus"))),
        None => Ok(()),
    }
}

#[derive(Default, Clone)]
struct Collections {
    postings: Arc<HashMap<String, Vec<Posting>>>,
    norms: Arc<HashMap<DocId, f32>>,
    documents: Arc<HashMap<DocId, Document>>,
}

impl IndexView for Collections {
    fn get_postings(&self, term: &str) -> Result<Option<Vec<Posting>>> {
        Ok(self.postings.get(term).cloned())
    }

    fn get_doc_norm(&self, doc_id: DocId) -> Result<f32> {
        self.norms.get(&doc_id).copied().ok_or(Error::MissingNorm(doc_id))
    }

    fn get_document(&self, doc_id: DocId) -> Result<Option<Document>> {
        Ok(self.documents.get(&doc_id).cloned())
    }

    fn corpus_size(&self) -> Result<u32> {
        Ok(self.norms.len() as u32)
    }
}

/// Hash maps behind a lock. Used in tests and for small corpora.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

impl Storage for MemoryStore {
    fn replace_postings(&self, postings: Vec<(String, Vec<Posting>)>) -> Result<()> {
        let map = Arc::new(postings.into_iter().collect());
        self.inner.write().postings = map;
        Ok(())
    }

    fn replace_doc_norms(&self, norms: Vec<(DocId, f32)>) -> Result<()> {
        let map = Arc::new(norms.into_iter().collect());
        self.inner.write().norms = map;
        Ok(())
    }

    fn replace_documents(&self, documents: Vec<Document>) -> Result<()> {
        let map = Arc::new(documents.into_iter().map(|d| (d.id, d)).collect());
        self.inner.write().documents = map;
        Ok(())
    }

    fn snapshot(&self) -> Result<Box<dyn IndexView>> {
        Ok(Box::new(self.inner.read().clone()))
    }

    fn replace_index(&self, index: BuiltIndex) -> Result<()> {
        let postings = Arc::new(index.postings.into_iter().collect());
        let norms = Arc::new(index.norms.into_iter().collect());
        let mut inner = self.inner.write();
        inner.postings = postings;
        inner.norms = norms;
        Ok(())
    }

    fn replace_corpus(&self, documents: Vec<Document>, index: BuiltIndex) -> Result<()> {
        check_corpus(&documents, &index)?;
        let next = Collections {
            postings: Arc::new(index.postings.into_iter().collect()),
            norms: Arc::new(index.norms.into_iter().collect()),
            documents: Arc::new(documents.into_iter().map(|d| (d.id, d)).collect()),
        };
        *self.inner.write() = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn doc(id: DocId, content: &str) -> Document {
        Document { id, title: String::new(), author: String::new(), published_date: None, content: content.into() }
    }

    fn index_of(term: &str, doc_id: DocId) -> BuiltIndex {
        BuiltIndex {
            postings: BTreeMap::from([(term.to_string(), vec![Posting { doc_id, weight: 1.0 }])]),
            norms: BTreeMap::from([(doc_id, 1.0)]),
            num_docs: 1,
        }
    }

    #[test]
    fn replace_drops_previous_version() {
        let store = MemoryStore::new();
        store.replace_postings(vec![("old".into(), vec![Posting { doc_id: 0, weight: 1.0 }])]).unwrap();
        store.replace_postings(vec![("new".into(), vec![Posting { doc_id: 1, weight: 2.0 }])]).unwrap();
        assert!(store.get_postings("old").unwrap().is_none());
        assert_eq!(store.get_postings("new").unwrap().unwrap().len(), 1);
    }

    #[test]
    fn missing_norm_is_an_error() {
        let store = MemoryStore::new();
        store.replace_doc_norms(vec![(0, 1.5)]).unwrap();
        assert_eq!(store.get_doc_norm(0).unwrap(), 1.5);
        assert!(matches!(store.get_doc_norm(7), Err(Error::MissingNorm(7))));
        assert_eq!(store.corpus_size().unwrap(), 1);
    }

    #[test]
    fn snapshot_outlives_a_replace() {
        let store = MemoryStore::new();
        store.replace_corpus(vec![doc(0, "old")], index_of("old", 0)).unwrap();
        let view = store.snapshot().unwrap();
        store.replace_corpus(vec![doc(5, "new")], index_of("new", 5)).unwrap();

        assert!(view.get_postings("old").unwrap().is_some());
        assert!(view.get_postings("new").unwrap().is_none());
        assert_eq!(view.get_doc_norm(0).unwrap(), 1.0);
        assert_eq!(view.get_document(0).unwrap().unwrap().content, "old");
        assert!(store.get_document(0).unwrap().is_none());
        assert_eq!(store.get_document(5).unwrap().unwrap().content, "new");
    }

    #[test]
    fn rejected_corpus_keeps_the_old_one_served() {
        let store = MemoryStore::new();
        store.replace_corpus(vec![doc(0, "old")], index_of("old", 0)).unwrap();

        // doc 3 has a norm but no document
        let err = store.replace_corpus(vec![doc(0, "new")], index_of("new", 3)).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
        assert_eq!(store.get_document(0).unwrap().unwrap().content, "old");
        assert!(store.get_postings("old").unwrap().is_some());
        assert!(store.get_postings("new").unwrap().is_none());
    }
}
