//! `carekb`: ingest, verify, and query the patient-education index.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

use carekb_retrieval::document::{Language, Query};
use carekb_retrieval::embedding::{EmbeddingProvider, HashedNgramEmbedder};
use carekb_retrieval::index::IndexStore;
use carekb_retrieval::pipeline::Pipeline;
use carekb_retrieval::verify::{ChunkBounds, verify_snapshot};
use carekb_retrieval::{PipelineConfig, RetrievalStatus};

#[derive(Parser)]
#[command(name = "carekb", version, about = "Bilingual patient-education knowledge base")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a markdown content tree into the index.
    Ingest {
        /// Content root directory.
        root: PathBuf,
        /// Index snapshot path.
        #[arg(long, default_value = "index.json")]
        index: PathBuf,
        /// Drop and rebuild the index instead of upserting.
        #[arg(long)]
        reset: bool,
        /// Embedding backend.
        #[arg(long, value_enum, default_value_t = EmbedderKind::Hash)]
        embedder: EmbedderKind,
    },
    /// Check index integrity, reporting every violation.
    Verify {
        /// Index snapshot path.
        #[arg(long, default_value = "index.json")]
        index: PathBuf,
    },
    /// Query the index and print ranked, cited chunks.
    Query {
        /// The question text.
        text: String,
        /// Index snapshot path.
        #[arg(long, default_value = "index.json")]
        index: PathBuf,
        /// Preferred answer language, used as a ranking tie-break.
        #[arg(long, value_enum)]
        lang: Option<LangArg>,
        /// Number of results.
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        /// Embedding backend; must match the one the index was built with.
        #[arg(long, value_enum, default_value_t = EmbedderKind::Hash)]
        embedder: EmbedderKind,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    /// Deterministic local n-gram embedder; no network required.
    Hash,
    /// OpenAI-compatible embeddings API, configured via OPENAI_API_KEY.
    #[cfg(feature = "openai")]
    Openai,
}

impl EmbedderKind {
    fn build(self) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
        match self {
            EmbedderKind::Hash => Ok(Arc::new(HashedNgramEmbedder::default())),
            #[cfg(feature = "openai")]
            EmbedderKind::Openai => {
                let embedder = carekb_retrieval::openai::OpenAiEmbedder::from_env()
                    .context("failed to configure OpenAI embedder")?;
                Ok(Arc::new(embedder))
            }
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LangArg {
    En,
    #[value(name = "zh-hant", alias = "zh-Hant")]
    ZhHant,
}

impl From<LangArg> for Language {
    fn from(arg: LangArg) -> Self {
        match arg {
            LangArg::En => Language::En,
            LangArg::ZhHant => Language::ZhHant,
        }
    }
}

async fn open_pipeline(
    index: &Path,
    embedder: Arc<dyn EmbeddingProvider>,
    config: PipelineConfig,
) -> anyhow::Result<Pipeline> {
    let store = Arc::new(
        IndexStore::open(index, embedder.model_id(), embedder.dimensions())
            .await
            .with_context(|| format!("failed to open index at {}", index.display()))?,
    );
    Ok(Pipeline::builder().config(config).store(store).embedder(embedder).build()?)
}

async fn run_ingest(
    root: &Path,
    index: &Path,
    reset: bool,
    embedder: EmbedderKind,
) -> anyhow::Result<ExitCode> {
    let pipeline = open_pipeline(index, embedder.build()?, PipelineConfig::default()).await?;
    let summary = pipeline.ingest(root, reset).await?;

    println!(
        "ingested {} documents ({} chunks) into {}",
        summary.documents_loaded,
        summary.chunks_indexed,
        index.display()
    );
    if summary.empty_documents > 0 {
        println!("  {} documents produced no usable chunks", summary.empty_documents);
    }
    if summary.chunks_without_tokens > 0 {
        println!("  {} chunks dropped with no searchable tokens", summary.chunks_without_tokens);
    }
    if !summary.is_clean() {
        println!(
            "  {} files skipped, {} chunks failed embedding",
            summary.files_skipped, summary.chunks_failed_embedding
        );
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_verify(index: &Path) -> anyhow::Result<ExitCode> {
    let snapshot = IndexStore::load_snapshot(index)
        .await
        .with_context(|| format!("failed to read index at {}", index.display()))?;
    let violations = verify_snapshot(&snapshot, ChunkBounds::default());
    if violations.is_empty() {
        println!("index OK: {} entries, model {}", snapshot.entries.len(), snapshot.model_id);
        return Ok(ExitCode::SUCCESS);
    }
    println!("{} violations:", violations.len());
    for violation in &violations {
        println!("  {violation}");
    }
    Ok(ExitCode::FAILURE)
}

async fn run_query(
    text: &str,
    index: &Path,
    lang: Option<LangArg>,
    top_k: usize,
    embedder: EmbedderKind,
) -> anyhow::Result<ExitCode> {
    let pipeline = open_pipeline(index, embedder.build()?, PipelineConfig::default()).await?;
    let mut query = Query::new(text, top_k);
    if let Some(lang) = lang {
        query = query.with_language_hint(lang.into());
    }
    let result = pipeline.query(&query).await?;

    match result.status {
        RetrievalStatus::Full => {}
        RetrievalStatus::LexicalOnly => {
            println!("note: query embedding unavailable, results are lexical-only");
        }
        RetrievalStatus::Unreranked => {
            println!("note: reranker unavailable, results are in hybrid order");
        }
    }
    if result.results.is_empty() {
        println!("no results");
        return Ok(ExitCode::SUCCESS);
    }
    for (rank, scored) in result.results.iter().enumerate() {
        let chunk = &scored.chunk;
        let updated = chunk
            .last_updated
            .map(|d| d.to_string())
            .unwrap_or_else(|| "undated".to_string());
        println!(
            "{}. [{:.4}] {}  ({}, {}, {})",
            rank + 1,
            scored.score,
            chunk.id,
            chunk.category,
            if chunk.source.is_empty() { "unattributed" } else { &chunk.source },
            updated
        );
        for line in chunk.text.lines() {
            println!("   {line}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Ingest { root, index, reset, embedder } => {
            run_ingest(&root, &index, reset, embedder).await
        }
        Command::Verify { index } => run_verify(&index).await,
        Command::Query { text, index, lang, top_k, embedder } => {
            run_query(&text, &index, lang, top_k, embedder).await
        }
    }
}
