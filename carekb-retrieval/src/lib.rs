//! Retrieval pipeline for a bilingual patient-education knowledge base.
//!
//! Turns a tree of curated English and Traditional Chinese markdown
//! documents into a hybrid (vector + lexical) search index and answers
//! queries over it with ranked, cited chunks.
//!
//! The pipeline stages:
//!
//! 1. [`loader::DocumentLoader`] walks the content tree and yields
//!    [`document::SourceDocument`]s, splitting bundled related documents
//!    and skipping undecodable files.
//! 2. [`chunking::SectionChunker`] splits each document on its heading
//!    structure into bounded, overlap-annotated [`document::Chunk`]s,
//!    keeping question/answer pairs and bilingual line pairs intact.
//! 3. [`embedding::BatchingEmbedder`] embeds chunk text in concurrent
//!    batches with retry and a failure-rate cutoff, over any
//!    [`embedding::EmbeddingProvider`].
//! 4. [`index::IndexStore`] persists entries as a JSON snapshot and
//!    serves cosine and BM25 search over an atomically swapped
//!    in-memory generation.
//! 5. [`retriever::HybridRetriever`] merges both candidate pools by
//!    weighted reciprocal rank; a [`reranker::Reranker`] re-scores the
//!    pool before truncation to `top_k`.
//! 6. [`verify`] is the read-only integrity gate run before an index is
//!    trusted in production.
//!
//! [`pipeline::Pipeline`] wires the stages together behind a builder.
//!
//! ```no_run
//! use std::sync::Arc;
//! use carekb_retrieval::embedding::{EmbeddingProvider, HashedNgramEmbedder};
//! use carekb_retrieval::index::IndexStore;
//! use carekb_retrieval::pipeline::Pipeline;
//! use carekb_retrieval::document::Query;
//!
//! # async fn run() -> carekb_retrieval::error::Result<()> {
//! let embedder = Arc::new(HashedNgramEmbedder::default());
//! let store = Arc::new(
//!     IndexStore::open("index.json", embedder.model_id(), embedder.dimensions()).await?,
//! );
//! let pipeline = Pipeline::builder().store(store).embedder(embedder).build()?;
//!
//! pipeline.ingest("content".as_ref(), true).await?;
//! let result = pipeline.query(&Query::new("fasting before surgery", 5)).await?;
//! # Ok(())
//! # }
//! ```

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod index;
pub mod lexical;
pub mod loader;
#[cfg(feature = "openai")]
pub mod openai;
pub mod pipeline;
pub mod reranker;
pub mod retriever;
pub mod structure;
pub mod verify;

pub use config::PipelineConfig;
pub use document::{
    Chunk, Language, Query, RetrievalResult, RetrievalStatus, ScoredChunk, SourceDocument,
};
pub use error::{Result, RetrievalError};
pub use pipeline::{IngestSummary, Pipeline, PipelineBuilder};
