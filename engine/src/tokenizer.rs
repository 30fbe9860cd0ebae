use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use unicode_normalization::UnicodeNormalization;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::config::{SearchConfig, StemmerKind};
use crate::Result;

lazy_static! {
    // Words (with inner hyphens, apostrophes, and digit separators) or a run of punctuation.
    static ref RE: Regex =
        Regex::new(r"(?u)[\p{L}\p{M}\p{N}]+(?:[-.:'’][\p{L}\p{M}\p{N}]+)*|[^\p{L}\p{M}\p{N}\s]+")
            .expect("valid regex");
}

/// The classic English stopword list.
pub const ENGLISH_STOPWORDS: &[&str] = &[
    "i","me","my","myself","we","our","ours","ourselves","you","you're","you've","you'll","you'd",
    "your","yours","yourself","yourselves","he","him","his","himself","she","she's","her","hers",
    "herself","it","it's","its","itself","they","them","their","theirs","themselves","what","which",
    "who","whom","this","that","that'll","these","those","am","is","are","was","were","be","been",
    "being","have","has","had","having","do","does","did","doing","a","an","the","and","but","if",
    "or","because","as","until","while","of","at","by","for","with","about","against","between",
    "into","through","during","before","after","above","below","to","from","up","down","in","out",
    "on","off","over","under","again","further","then","once","here","there","when","where","why",
    "how","all","any","both","each","few","more","most","other","some","such","no","nor","not",
    "only","own","same","so","than","too","very","s","t","can","will","just","don","don't","should",
    "should've","now","d","ll","m","o","re","ve","y","ain","aren","aren't","couldn","couldn't",
    "didn","didn't","doesn","doesn't","hadn","hadn't","hasn","hasn't","haven","haven't","isn",
    "isn't","ma","mightn","mightn't","mustn","mustn't","needn","needn't","shan","shan't","shouldn",
    "shouldn't","wasn","wasn't","weren","weren't","won","won't","wouldn","wouldn't",
];

/// A stemming algorithm applied to already-cleaned, lowercased tokens.
pub trait Stem: Send + Sync {
    fn stem<'a>(&self, word: &'a str) -> Cow<'a, str>;
}

impl Stem for Stemmer {
    fn stem<'a>(&self, word: &'a str) -> Cow<'a, str> {
        Stemmer::stem(self, word)
    }
}

/// Leaves tokens untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStemmer;

impl Stem for NoStemmer {
    fn stem<'a>(&self, word: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(word)
    }
}

/// Maps raw text to index terms. Build one and share it by reference between
/// the index builder and the query engine so both sides normalize identically.
pub struct TextNormalizer {
    stopwords: HashSet<String>,
    stemmer: Box<dyn Stem>,
}

impl TextNormalizer {
    pub fn new<I, S>(stopwords: I, stemmer: Box<dyn Stem>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { stopwords: stopwords.into_iter().map(Into::into).collect(), stemmer }
    }

    /// English stopwords with the Snowball English stemmer.
    pub fn english() -> Self {
        Self::new(ENGLISH_STOPWORDS.iter().copied(), Box::new(Stemmer::create(Algorithm::English)))
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let stemmer: Box<dyn Stem> = match config.stemmer {
            StemmerKind::English => Box::new(Stemmer::create(Algorithm::English)),
            StemmerKind::None => Box::new(NoStemmer),
        };
        let normalizer = match &config.stopwords {
            Some(path) => Self::new(load_stopwords(path)?, stemmer),
            None => Self::new(ENGLISH_STOPWORDS.iter().copied(), stemmer),
        };
        Ok(normalizer)
    }

    pub fn is_stopword(&self, token: &str) -> bool {
        self.stopwords.contains(token)
    }

    /// Split text into raw tokens, in order and with duplicates.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let text = text.nfkc().collect::<String>();
        RE.find_iter(&text).map(|m| m.as_str().to_string()).collect()
    }

    /// Lowercase, drop stopwords, strip punctuation, stem. `None` means the token is discarded.
    pub fn normalize(&self, token: &str) -> Option<String> {
        let lowered = token.to_lowercase();
        if self.is_stopword(&lowered) {
            return None;
        }
        let chars: Vec<char> = lowered.chars().collect();
        let cleaned: String = chars
            .iter()
            .enumerate()
            .filter(|&(i, &c)| keep_char(&chars, i, c))
            .map(|(_, &c)| c)
            .collect();
        if cleaned.is_empty() {
            return None;
        }
        let stemmed = self.stemmer.stem(&cleaned).into_owned();
        if stemmed.is_empty() { None } else { Some(stemmed) }
    }

    /// Terms for a document's title and content. Duplicates are kept since
    /// term frequency is computed from this stream.
    pub fn normalized_tokens(&self, title: &str, content: &str) -> Vec<String> {
        let text = format!("{title} {content}");
        self.tokenize(&text).iter().filter_map(|t| self.normalize(t)).collect()
    }
}

impl Default for TextNormalizer {
    fn default() -> Self { Self::english() }
}

// '.' and ':' survive only between two digits ("3.14", "10:30").
fn keep_char(chars: &[char], i: usize, c: char) -> bool {
    if c.is_alphabetic() || c.is_numeric() || c == '-' {
        return true;
    }
    matches!(c, '.' | ':')
        && i > 0
        && i + 1 < chars.len()
        && chars[i - 1].is_numeric()
        && chars[i + 1].is_numeric()
}

/// One stopword per line; blank lines and `#` comments are ignored.
pub fn load_stopwords(path: &Path) -> Result<HashSet<String>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_lowercase)
        .collect())
}
