//! # rfp
//!
//! Command-line front end for the `rfp-rag` pipeline.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rfp chunk` | Split the full-text corpus into a chunk table |
//! | `rfp index` | Embed a chunk table and rebuild the index behind an alias |
//! | `rfp search "<query>"` | Print the top-k chunks for a query |
//! | `rfp ask ["<question>"]` | Answer from retrieved context; interactive without a question |
//! | `rfp eval` | Hit@K, MRR@K and judge scores over labelled queries |
//!
//! Every command reads its defaults from the environment (and a `.env` file);
//! flags override individual values.

mod commands;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use rfp_rag::{RelevanceLevel, Settings};
use tracing_subscriber::EnvFilter;

pub use commands::EMPTY_QUESTION;

#[derive(Parser, Debug)]
#[command(
    name = "rfp",
    version,
    about = "Index, query and evaluate retrieval over procurement (RFP) documents"
)]
pub struct Cli {
    /// Environment file loaded before settings are read. A missing file is ignored.
    #[arg(long, global = true, default_value = ".env")]
    pub env_file: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Split the full-text corpus into a chunk table.
    Chunk {
        /// Corpus table (defaults to CORPUS_PATH).
        #[arg(long)]
        corpus: Option<PathBuf>,
        /// Output chunk table (defaults to DATA_DIR/data_list_chunks_{RAG_MODE}.csv).
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Embed a chunk table and load it into the vector store.
    Index {
        /// Chunk table (defaults to the table written by `rfp chunk`).
        #[arg(long)]
        chunks: Option<PathBuf>,
        /// Alias or collection to build (defaults to QDRANT_COLLECTION).
        #[arg(long)]
        collection: Option<String>,
        /// Recreate the collection in place instead of swapping an alias.
        #[arg(long)]
        in_place: bool,
        /// Keep the collection the alias pointed at before the swap.
        #[arg(long)]
        keep_previous: bool,
    },

    /// Print the chunks most similar to a query.
    Search {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
        #[arg(long)]
        collection: Option<String>,
    },

    /// Answer a question from retrieved context. Without a question, opens a prompt.
    Ask {
        question: Option<String>,
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Evaluate retrieval and answer quality over labelled queries.
    Eval(EvalArgs),
}

#[derive(Args, Debug, Clone)]
pub struct EvalArgs {
    /// Labelled query table (defaults to EVAL_PATH).
    #[arg(long)]
    pub queries: Option<PathBuf>,
    /// Cut-off K for Hit@K and MRR@K (defaults to EVAL_TOP_K).
    #[arg(short, long)]
    pub k: Option<usize>,
    /// Documents handed to the generator (defaults to RAG_TOP_K).
    #[arg(long)]
    pub rag_k: Option<usize>,
    #[arg(long, value_enum, default_value_t = Level::Project)]
    pub level: Level,
    /// Skip answer generation and judging.
    #[arg(long)]
    pub retrieval_only: bool,
    /// Generate answers but do not judge them.
    #[arg(long)]
    pub no_judge: bool,
    /// Abort on the first failed query.
    #[arg(long)]
    pub fail_fast: bool,
    /// Per-query result table (defaults to EVAL_OUT).
    #[arg(long)]
    pub out: Option<PathBuf>,
    /// Answer and judgement log (defaults to EVAL_JUDGMENTS_OUT).
    #[arg(long)]
    pub judgments_out: Option<PathBuf>,
}

/// Relevance granularity for `rfp eval`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Project,
    Document,
}

impl From<Level> for RelevanceLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Project => RelevanceLevel::Project,
            Level::Document => RelevanceLevel::Document,
        }
    }
}

/// Load `path` into the process environment, ignoring a missing file.
pub fn load_env_file(path: &Path) -> Result<()> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(anyhow::anyhow!("failed to load {}: {e}", path.display())),
    }
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

/// Run one parsed command against `settings`.
pub async fn run(command: Command, settings: &Settings) -> Result<()> {
    match command {
        Command::Chunk { corpus, out } => commands::chunk(settings, corpus, out),
        Command::Index { chunks, collection, in_place, keep_previous } => {
            commands::index(settings, chunks, collection, in_place, keep_previous).await
        }
        Command::Search { query, k, collection } => {
            commands::search(settings, &query, k, collection.as_deref()).await
        }
        Command::Ask { question, k } => commands::ask(settings, question, k).await,
        Command::Eval(args) => commands::eval(settings, &args).await,
    }
}
