//! Washington Post style JSON-lines corpus reader.

use anyhow::{Context, Result};
use engine::index::Document;
use engine::DocId;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use walkdir::WalkDir;

lazy_static! {
    static ref TAG: Regex = Regex::new(r"<.*?>").expect("valid regex");
}

#[derive(Debug, Deserialize)]
struct InputContent {
    #[serde(rename = "type")]
    kind: Option<String>,
    content: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct InputDoc {
    title: Option<String>,
    author: Option<String>,
    /// Milliseconds since the epoch.
    published_date: Option<i64>,
    #[serde(default)]
    contents: Vec<Option<InputContent>>,
}

pub fn strip_html(raw: &str) -> String {
    TAG.replace_all(raw, "").into_owned()
}

fn to_document(id: DocId, doc: InputDoc) -> Document {
    let body = doc
        .contents
        .iter()
        .flatten()
        .filter(|c| c.kind.as_deref() == Some("sanitized_html"))
        .filter_map(|c| c.content.as_ref().and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let published_date = doc
        .published_date
        .and_then(|ms| OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000).ok());
    Document {
        id,
        title: doc.title.unwrap_or_default(),
        author: doc.author.unwrap_or_default(),
        published_date,
        content: strip_html(&body),
    }
}

/// `.jl`/`.jsonl` files under `input` in path order, or `input` itself when it is a file.
pub fn collect_files(input: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("jl" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    }
    files
}

/// Read every document, assigning dense ids in ingestion order starting at `next_id`.
pub fn read_jsonl(file: &Path, next_id: &mut DocId, out: &mut Vec<Document>) -> Result<()> {
    let f = File::open(file).with_context(|| format!("opening {}", file.display()))?;
    let reader = BufReader::new(f);
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: InputDoc = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: malformed document", file.display(), lineno + 1))?;
        out.push(to_document(*next_id, doc));
        *next_id += 1;
    }
    Ok(())
}

pub fn load_corpus(input: &Path) -> Result<Vec<Document>> {
    let files = collect_files(input);
    anyhow::ensure!(!files.is_empty(), "no .jl/.jsonl input under {}", input.display());
    let mut next_id: DocId = 0;
    let mut docs = Vec::new();
    for file in files {
        read_jsonl(&file, &mut next_id, &mut docs)?;
        tracing::debug!(file = %file.display(), total = docs.len(), "read corpus file");
    }
    Ok(docs)
}
