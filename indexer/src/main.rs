use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use engine::config::SearchConfig;
use engine::persist::SledStore;
use engine::{IndexBuilder, Storage, TextNormalizer};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::{fmt, EnvFilter};

mod corpus;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build the log-tf/idf inverted index for a corpus", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drop the stored index and rebuild it from a JSON-lines corpus
    Build {
        /// Input path (file or directory of .jl/.jsonl files)
        #[arg(long)]
        input: PathBuf,
        /// Index database directory
        #[arg(long, default_value = "./index")]
        db: PathBuf,
        /// JSON configuration file (stopwords, stemmer)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Count terms on all cores before the merge
        #[arg(long, default_value_t = false)]
        parallel: bool,
    },
    /// Print the metadata of the current index
    Stats {
        #[arg(long, default_value = "./index")]
        db: PathBuf,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, db, config, parallel } => build_index(&input, &db, config.as_deref(), parallel),
        Commands::Stats { db } => print_stats(&db),
    }
}

fn build_index(input: &Path, db: &Path, config: Option<&Path>, parallel: bool) -> Result<()> {
    let start = Instant::now();
    let config = SearchConfig::load_or_default(config).context("loading config")?;
    let normalizer = TextNormalizer::from_config(&config)?;

    let docs = corpus::load_corpus(input)?;
    tracing::info!(num_docs = docs.len(), "ingested documents");

    let builder = IndexBuilder::new(&normalizer);
    let index = if parallel { builder.build_parallel(&docs) } else { builder.build(&docs) };
    let stats = index.stats();

    let store = SledStore::open(db).with_context(|| format!("opening index at {}", db.display()))?;
    store.replace_corpus(docs, index)?;
    store.flush()?;

    tracing::info!(
        num_docs = stats.num_docs,
        num_terms = stats.num_terms,
        num_postings = stats.num_postings,
        elapsed_s = start.elapsed().as_secs_f64(),
        db = %db.display(),
        "index build complete"
    );
    Ok(())
}

fn print_stats(db: &Path) -> Result<()> {
    let store = SledStore::open(db)?;
    match store.meta()? {
        Some(meta) => println!("{}", serde_json::to_string_pretty(&meta)?),
        None => println!("no index built at {}", db.display()),
    }
    Ok(())
}
