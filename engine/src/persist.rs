//! sled-backed [`Storage`].
//!
//! Each collection lives in a generation tree such as `postings.42`. A replace
//! stages new generations, flushes them, then rewrites the one `current`
//! record in the `meta` tree, which names the live tree of every collection.
//! Trees outside the current record are dropped before the next staging step,
//! unless a snapshot still holds them, so a build that fails half-way leaves
//! the previous index live and an open snapshot keeps its trees.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;

use crate::index::{BuiltIndex, Document, Posting};
use crate::store::{check_corpus, IndexView, Storage};
use crate::{DocId, Error, Result};

const POSTINGS: &str = "postings";
const NORMS: &str = "norms";
const DOCS: &str = "docs";
const COLLECTIONS: [&str; 3] = [POSTINGS, NORMS, DOCS];
const META_TREE: &str = "meta";
const META_KEY: &[u8] = b"index_meta";
const CURRENT_KEY: &[u8] = b"current";
const FORMAT_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub num_docs: u32,
    pub num_terms: usize,
    pub created_at: String,
    pub version: u32,
}

/// Tree names of one index version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GenerationNames {
    postings: Option<String>,
    norms: Option<String>,
    docs: Option<String>,
}

impl GenerationNames {
    fn iter(&self) -> impl Iterator<Item = &str> {
        [&self.postings, &self.norms, &self.docs].into_iter().flatten().map(String::as_str)
    }
}

/// The opened trees of one index version.
struct Generation {
    names: GenerationNames,
    postings: Option<sled::Tree>,
    norms: Option<sled::Tree>,
    docs: Option<sled::Tree>,
}

pub struct SledStore {
    db: sled::Db,
    meta: sled::Tree,
    current: RwLock<Arc<Generation>>,
    // replaced generations, dropped once no snapshot holds them
    retired: Mutex<Vec<Arc<Generation>>>,
    // serializes replaces so garbage collection never sees another writer's staged tree
    write_lock: Mutex<()>,
}

type Entries = Vec<(Vec<u8>, Vec<u8>)>;

fn doc_key(doc_id: DocId) -> [u8; 4] {
    doc_id.to_be_bytes()
}

fn open_generation(db: &sled::Db, names: GenerationNames) -> Result<Generation> {
    let open = |name: &Option<String>| -> Result<Option<sled::Tree>> {
        match name {
            Some(name) => Ok(Some(db.open_tree(name)?)),
            None => Ok(None),
        }
    };
    Ok(Generation { postings: open(&names.postings)?, norms: open(&names.norms)?, docs: open(&names.docs)?, names })
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// A store removed from disk when dropped.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let meta = db.open_tree(META_TREE)?;
        let names: GenerationNames = match meta.get(CURRENT_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => GenerationNames::default(),
        };
        let current = open_generation(&db, names)?;
        let store = Self {
            db,
            meta,
            current: RwLock::new(Arc::new(current)),
            retired: Mutex::new(Vec::new()),
            write_lock: Mutex::new(()),
        };
        store.collect_garbage()?;
        Ok(store)
    }

    /// Metadata written by the last successful [`Storage::replace_index`] or
    /// [`Storage::replace_corpus`].
    pub fn meta(&self) -> Result<Option<IndexMeta>> {
        match self.meta.get(META_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn current_names(&self) -> GenerationNames {
        self.current.read().names.clone()
    }

    fn collect_garbage(&self) -> Result<()> {
        let mut retired = self.retired.lock();
        retired.retain(|generation| Arc::strong_count(generation) > 1);
        let current = self.current.read().clone();
        let live: HashSet<&str> = retired
            .iter()
            .chain(std::iter::once(&current))
            .flat_map(|generation| generation.names.iter())
            .collect();
        for name in self.db.tree_names() {
            let name = String::from_utf8_lossy(&name).into_owned();
            let generation = COLLECTIONS.iter().any(|c| name.starts_with(&format!("{c}.")));
            if generation && !live.contains(name.as_str()) {
                self.db.drop_tree(&name)?;
                tracing::debug!(tree = %name, "dropped stale generation");
            }
        }
        Ok(())
    }

    fn stage(&self, collection: &str, entries: Entries) -> Result<String> {
        let name = format!("{collection}.{}", self.db.generate_id()?);
        let tree = self.db.open_tree(&name)?;
        let mut batch = sled::Batch::default();
        for (key, value) in entries {
            batch.insert(key, value);
        }
        tree.apply_batch(batch)?;
        tree.flush()?;
        Ok(name)
    }

    /// Make `names` the current version in one meta batch.
    fn publish(&self, names: GenerationNames, meta: Option<&IndexMeta>) -> Result<()> {
        let next = Arc::new(open_generation(&self.db, names)?);
        let mut batch = sled::Batch::default();
        batch.insert(CURRENT_KEY, serde_json::to_vec(&next.names)?);
        if let Some(meta) = meta {
            batch.insert(META_KEY, serde_json::to_vec(meta)?);
        }
        self.meta.apply_batch(batch)?;
        self.meta.flush()?;
        let previous = std::mem::replace(&mut *self.current.write(), next);
        self.retired.lock().push(previous);
        Ok(())
    }

    fn swap(&self, collection: &str, entries: Entries) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.collect_garbage()?;
        let mut names = self.current_names();
        let staged = Some(self.stage(collection, entries)?);
        match collection {
            POSTINGS => names.postings = staged,
            NORMS => names.norms = staged,
            _ => names.docs = staged,
        }
        self.publish(names, None)
    }
}

fn index_meta(index: &BuiltIndex) -> IndexMeta {
    IndexMeta {
        num_docs: index.num_docs,
        num_terms: index.postings.len(),
        created_at: time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| "".into()),
        version: FORMAT_VERSION,
    }
}

fn postings_entries(postings: Vec<(String, Vec<Posting>)>) -> Result<Entries> {
    postings
        .into_iter()
        .map(|(term, plist)| Ok((term.into_bytes(), bincode::serialize(&plist)?)))
        .collect()
}

fn norm_entries(norms: Vec<(DocId, f32)>) -> Result<Entries> {
    norms
        .into_iter()
        .map(|(doc_id, norm)| Ok((doc_key(doc_id).to_vec(), bincode::serialize(&norm)?)))
        .collect()
}

fn document_entries(documents: &[Document]) -> Result<Entries> {
    documents
        .iter()
        .map(|d| Ok((doc_key(d.id).to_vec(), bincode::serialize(d)?)))
        .collect()
}

/// A pinned [`Generation`].
struct SledView {
    generation: Arc<Generation>,
}

fn read<T: serde::de::DeserializeOwned>(tree: &Option<sled::Tree>, key: &[u8]) -> Result<Option<T>> {
    let Some(tree) = tree else { return Ok(None) };
    match tree.get(key)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

impl IndexView for SledView {
    fn get_postings(&self, term: &str) -> Result<Option<Vec<Posting>>> {
        read(&self.generation.postings, term.as_bytes())
    }

    fn get_doc_norm(&self, doc_id: DocId) -> Result<f32> {
        read(&self.generation.norms, &doc_key(doc_id))?.ok_or(Error::MissingNorm(doc_id))
    }

    fn get_document(&self, doc_id: DocId) -> Result<Option<Document>> {
        read(&self.generation.docs, &doc_key(doc_id))
    }

    fn corpus_size(&self) -> Result<u32> {
        match &self.generation.norms {
            Some(tree) => u32::try_from(tree.len()).map_err(|_| Error::Corrupt("norm count overflows u32".into())),
            None => Ok(0),
        }
    }
}

impl Storage for SledStore {
    fn replace_postings(&self, postings: Vec<(String, Vec<Posting>)>) -> Result<()> {
        self.swap(POSTINGS, postings_entries(postings)?)
    }

    fn replace_doc_norms(&self, norms: Vec<(DocId, f32)>) -> Result<()> {
        self.swap(NORMS, norm_entries(norms)?)
    }

    fn replace_documents(&self, documents: Vec<Document>) -> Result<()> {
        self.swap(DOCS, document_entries(&documents)?)
    }

    fn snapshot(&self) -> Result<Box<dyn IndexView>> {
        Ok(Box::new(SledView { generation: self.current.read().clone() }))
    }

    fn replace_index(&self, index: BuiltIndex) -> Result<()> {
        let meta = index_meta(&index);
        let postings = postings_entries(index.postings.into_iter().collect())?;
        let norms = norm_entries(index.norms.into_iter().collect())?;

        let _guard = self.write_lock.lock();
        self.collect_garbage()?;
        let mut names = self.current_names();
        names.postings = Some(self.stage(POSTINGS, postings)?);
        names.norms = Some(self.stage(NORMS, norms)?);
        self.publish(names, Some(&meta))?;
        tracing::info!(num_docs = meta.num_docs, num_terms = meta.num_terms, "published index generation");
        Ok(())
    }

    fn replace_corpus(&self, documents: Vec<Document>, index: BuiltIndex) -> Result<()> {
        check_corpus(&documents, &index)?;
        let meta = index_meta(&index);
        let docs = document_entries(&documents)?;
        let postings = postings_entries(index.postings.into_iter().collect())?;
        let norms = norm_entries(index.norms.into_iter().collect())?;

        let _guard = self.write_lock.lock();
        self.collect_garbage()?;
        let names = GenerationNames {
            docs: Some(self.stage(DOCS, docs)?),
            postings: Some(self.stage(POSTINGS, postings)?),
            norms: Some(self.stage(NORMS, norms)?),
        };
        self.publish(names, Some(&meta))?;
        tracing::info!(num_docs = meta.num_docs, num_terms = meta.num_terms, "published corpus generation");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn trees(store: &SledStore, collection: &str) -> usize {
        let prefix = format!("{collection}.");
        store.db.tree_names().into_iter().filter(|n| n.starts_with(prefix.as_bytes())).count()
    }

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
    fn empty_store_has_no_index() {
        let store = SledStore::temporary().unwrap();
        assert!(store.get_postings("anything").unwrap().is_none());
        assert!(store.get_document(0).unwrap().is_none());
        assert!(matches!(store.get_doc_norm(0), Err(Error::MissingNorm(0))));
        assert_eq!(store.corpus_size().unwrap(), 0);
        assert!(store.meta().unwrap().is_none());
    }

    #[test]
    fn only_current_and_previous_generations_remain() {
        let store = SledStore::temporary().unwrap();
        store.replace_doc_norms(vec![(0, 1.0)]).unwrap();
        store.replace_doc_norms(vec![(0, 2.0)]).unwrap();
        store.replace_doc_norms(vec![(0, 3.0)]).unwrap();
        assert_eq!(trees(&store, NORMS), 2);
        assert_eq!(store.get_doc_norm(0).unwrap(), 3.0);
    }

    #[test]
    fn held_snapshot_keeps_its_trees() {
        let store = SledStore::temporary().unwrap();
        store.replace_doc_norms(vec![(0, 1.0)]).unwrap();
        let view = store.snapshot().unwrap();
        for norm in [2.0, 3.0, 4.0] {
            store.replace_doc_norms(vec![(0, norm)]).unwrap();
        }
        assert_eq!(view.get_doc_norm(0).unwrap(), 1.0);
        assert_eq!(store.get_doc_norm(0).unwrap(), 4.0);

        drop(view);
        store.replace_doc_norms(vec![(0, 5.0)]).unwrap();
        assert_eq!(trees(&store, NORMS), 2);
    }

    #[test]
    fn corpus_flips_in_one_publish() {
        let store = SledStore::temporary().unwrap();
        store.replace_corpus(vec![doc(0, "old")], index_of("old", 0)).unwrap();
        let before = store.snapshot().unwrap();
        store.replace_corpus(vec![doc(0, "new")], index_of("new", 0)).unwrap();

        assert_eq!(before.get_document(0).unwrap().unwrap().content, "old");
        assert!(before.get_postings("old").unwrap().is_some());
        assert_eq!(store.get_document(0).unwrap().unwrap().content, "new");
        assert!(store.get_postings("old").unwrap().is_none());
        assert_eq!(store.meta().unwrap().unwrap().version, FORMAT_VERSION);
    }

    #[test]
    fn single_collection_replace_keeps_the_others() {
        let store = SledStore::temporary().unwrap();
        store.replace_corpus(vec![doc(0, "old")], index_of("old", 0)).unwrap();
        store.replace_documents(vec![doc(0, "edited")]).unwrap();
        assert_eq!(store.get_document(0).unwrap().unwrap().content, "edited");
        assert!(store.get_postings("old").unwrap().is_some());
        assert_eq!(store.get_doc_norm(0).unwrap(), 1.0);
    }

    #[test]
    fn rejected_corpus_writes_nothing() {
        let store = SledStore::temporary().unwrap();
        store.replace_corpus(vec![doc(0, "old")], index_of("old", 0)).unwrap();
        let err = store.replace_corpus(vec![doc(0, "new")], index_of("new", 9)).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
        assert_eq!(store.get_document(0).unwrap().unwrap().content, "old");
        assert_eq!(trees(&store, DOCS), 1);
    }

    #[test]
    fn interrupted_corpus_replace_serves_the_old_corpus() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledStore::open(dir.path()).unwrap();
            store.replace_corpus(vec![doc(0, "old")], index_of("old", 0)).unwrap();
            // stop after two of the three stages, before anything is published
            store.stage(DOCS, document_entries(&[doc(0, "new")]).unwrap()).unwrap();
            store.stage(POSTINGS, postings_entries(vec![("new".into(), vec![])]).unwrap()).unwrap();
            assert_eq!(store.get_document(0).unwrap().unwrap().content, "old");
            assert!(store.get_postings("new").unwrap().is_none());
            store.flush().unwrap();
        }

        let store = SledStore::open(dir.path()).unwrap();
        assert_eq!(store.get_document(0).unwrap().unwrap().content, "old");
        assert!(store.get_postings("old").unwrap().is_some());
        assert_eq!(store.get_doc_norm(0).unwrap(), 1.0);
        for collection in COLLECTIONS {
            assert_eq!(trees(&store, collection), 1, "{collection}");
        }
    }
}
