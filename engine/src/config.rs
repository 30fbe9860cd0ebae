use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemmerKind {
    #[default]
    English,
    None,
}

/// Knobs shared by the indexer and the server. Every field has a default so a
/// partial JSON file is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Cap on ranked results per query (K).
    pub top_k: usize,
    /// Corpus size used for idf (N). Falls back to the store's document count.
    pub corpus_size: Option<u32>,
    /// Newline-separated stopword file; the built-in English list otherwise.
    pub stopwords: Option<PathBuf>,
    pub stemmer: StemmerKind,
    pub page_size: usize,
    pub truncate_length: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 100,
            corpus_size: None,
            stopwords: None,
            stemmer: StemmerKind::English,
            page_size: 10,
            truncate_length: 150,
        }
    }
}

impl SearchConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// `SearchConfig::load` when a path is given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}
