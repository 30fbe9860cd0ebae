use engine::tokenizer::{NoStemmer, TextNormalizer};

#[test]
fn it_normalizes_and_stems() {
    let n = TextNormalizer::english();
    let words = n.normalized_tokens("Running Runners", "RUN! The café's menu.");
    // Stemming to "run" should appear
    assert!(words.contains(&"run".to_string()));
    assert!(words.iter().any(|w| w.starts_with("caf")));
    assert!(!words.iter().any(|w| w.is_empty()));
}

#[test]
fn it_filters_stopwords() {
    let n = TextNormalizer::english();
    let words = n.normalized_tokens("", "The quick brown fox and the lazy dog");
    assert!(!words.contains(&"the".to_string()));
    assert!(!words.contains(&"and".to_string()));
    assert_eq!(words.len(), 5);
}

#[test]
fn index_and_query_side_agree() {
    let n = TextNormalizer::english();
    let doc_terms = n.normalized_tokens("Auto Insurance", "");
    let query_terms: Vec<String> = n.tokenize("auto INSURANCE").iter().filter_map(|t| n.normalize(t)).collect();
    assert_eq!(doc_terms, query_terms);
}

#[test]
fn numbers_keep_their_separators() {
    let n = TextNormalizer::new(Vec::<String>::new(), Box::new(NoStemmer));
    let words = n.normalized_tokens("", "Pi is 3.14, the meeting is at 10:30.");
    assert!(words.contains(&"3.14".to_string()));
    assert!(words.contains(&"10:30".to_string()));
}

#[test]
fn custom_stopwords_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stop.txt");
    std::fs::write(&path, "# comment\nFoo\n\nbar\n").unwrap();
    let stop = engine::tokenizer::load_stopwords(&path).unwrap();
    let n = TextNormalizer::new(stop, Box::new(NoStemmer));
    assert_eq!(n.normalized_tokens("foo", "bar baz"), vec!["baz"]);
}
