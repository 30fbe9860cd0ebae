//! Vector-space retrieval core: text normalization, log-tf/idf inverted index
//! construction and disjunctive top-K querying over a pluggable store.

pub mod config;
pub mod error;
pub mod index;
pub mod persist;
pub mod query;
pub mod store;
pub mod tokenizer;

pub use error::{Error, Result};
pub use index::{BuildStats, BuiltIndex, Document, IndexBuilder, Posting};
pub use query::{QueryEngine, QueryOutcome, ScoredDoc};
pub use store::{IndexView, MemoryStore, Storage};
pub use tokenizer::TextNormalizer;

pub type DocId = u32;
