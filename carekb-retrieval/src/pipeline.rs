//! Pipeline orchestration: ingest (load → chunk → embed → store) and
//! query (retrieve → rerank → truncate).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::chunking::{Chunker, SectionChunker};
use crate::config::PipelineConfig;
use crate::document::{EmbeddingRecord, IndexEntry, Query, RetrievalResult, RetrievalStatus};
use crate::embedding::{BatchingEmbedder, EmbeddingProvider};
use crate::error::{Result, RetrievalError};
use crate::index::IndexStore;
use crate::lexical;
use crate::loader::DocumentLoader;
use crate::reranker::{Reranker, TermOverlapReranker};
use crate::retriever::HybridRetriever;

/// What an ingestion run did. Document- and chunk-level failures are
/// isolated and reported here rather than aborting the run.
#[derive(Debug, Default, Clone)]
pub struct IngestSummary {
    /// Source documents loaded (after related-document splitting).
    pub documents_loaded: usize,
    /// Files skipped because they could not be decoded.
    pub files_skipped: usize,
    /// Documents that produced zero usable chunks.
    pub empty_documents: usize,
    /// Chunks dropped because their text yields no searchable tokens.
    pub chunks_without_tokens: usize,
    /// Chunks written to the index.
    pub chunks_indexed: usize,
    /// Chunks excluded because embedding exhausted its retries.
    pub chunks_failed_embedding: usize,
}

impl IngestSummary {
    /// Whether the run completed without skips or exclusions.
    pub fn is_clean(&self) -> bool {
        self.files_skipped == 0 && self.chunks_failed_embedding == 0
    }
}

/// The retrieval pipeline.
///
/// Owns the index store handle and the embedding, chunking, and
/// reranking strategies. Construct one via [`Pipeline::builder()`].
pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<IndexStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Arc<dyn Chunker>,
    reranker: Arc<dyn Reranker>,
    retriever: HybridRetriever,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create a new [`PipelineBuilder`].
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// The pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The index store handle.
    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    /// Ingest the content tree at `content_root`.
    ///
    /// With `reset` the index is rebuilt from scratch and swapped in
    /// atomically; otherwise entries are upserted by chunk id. Skipped
    /// files and embedding-failed chunks are reported in the summary,
    /// not raised.
    pub async fn ingest(&self, content_root: &Path, reset: bool) -> Result<IngestSummary> {
        let output = DocumentLoader::new(content_root).load()?;
        let mut summary = IngestSummary {
            documents_loaded: output.documents.len(),
            files_skipped: output.skipped.len(),
            ..IngestSummary::default()
        };

        // Tokenize up front: a chunk no lexical query can ever match
        // (stop-word-only or symbol-only text) is dropped here so the
        // integrity gate never sees one.
        let mut chunks = Vec::new();
        for document in &output.documents {
            let document_chunks = self.chunker.chunk(document);
            if document_chunks.is_empty() {
                warn!(document.id = %document.id, "document produced no usable chunks");
                summary.empty_documents += 1;
                continue;
            }
            for chunk in document_chunks {
                let tokens = lexical::tokenize(&chunk.text);
                if tokens.is_empty() {
                    warn!(chunk.id = %chunk.id, "chunk has no searchable tokens, dropping");
                    summary.chunks_without_tokens += 1;
                    continue;
                }
                chunks.push((chunk, tokens));
            }
        }

        let texts: Vec<String> = chunks.iter().map(|(chunk, _)| chunk.text.clone()).collect();
        let embedder = BatchingEmbedder::new(Arc::clone(&self.embedder), &self.config);
        let outcome = embedder.embed_all(&texts).await;
        summary.chunks_failed_embedding = outcome.failed;

        let model_id = self.embedder.model_id().to_string();
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(outcome.vectors)
            .filter_map(|((chunk, tokens), vector)| {
                let vector = vector?;
                Some(IndexEntry {
                    chunk,
                    embedding: EmbeddingRecord { vector, model_id: model_id.clone() },
                    tokens,
                })
            })
            .collect();
        summary.chunks_indexed = entries.len();

        if reset {
            self.store.reset(entries).await?;
        } else {
            self.store.upsert(entries).await?;
        }

        info!(
            documents = summary.documents_loaded,
            skipped = summary.files_skipped,
            indexed = summary.chunks_indexed,
            failed = summary.chunks_failed_embedding,
            reset,
            "ingestion complete"
        );
        Ok(summary)
    }

    /// Answer a query with a ranked, bounded result list.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Timeout`] if the configured query
    /// timeout elapses; partially completed searches are discarded, not
    /// merged.
    pub async fn query(&self, query: &Query) -> Result<RetrievalResult> {
        let timeout = Duration::from_millis(self.config.query_timeout_ms);
        match tokio::time::timeout(timeout, self.execute(query)).await {
            Ok(result) => result,
            Err(_) => Err(RetrievalError::Timeout { timeout_ms: self.config.query_timeout_ms }),
        }
    }

    async fn execute(&self, query: &Query) -> Result<RetrievalResult> {
        let (candidates, mut status) = self.retriever.retrieve(query).await?;

        let results = match self.reranker.rerank(&query.text, candidates.clone()).await {
            Ok(reranked) => {
                // The reranker narrows, never introduces candidates.
                let known: std::collections::HashSet<&str> =
                    candidates.iter().map(|c| c.chunk.id.as_str()).collect();
                let mut results: Vec<_> = reranked
                    .into_iter()
                    .filter(|r| known.contains(r.chunk.id.as_str()))
                    .collect();
                results.truncate(query.top_k);
                results
            }
            Err(e) => {
                warn!(error = %e, "reranker unavailable, returning hybrid order");
                if status == RetrievalStatus::Full {
                    status = RetrievalStatus::Unreranked;
                }
                let mut results = candidates;
                results.truncate(query.top_k);
                results
            }
        };

        info!(
            query_len = query.text.len(),
            result_count = results.len(),
            status = ?status,
            "query complete"
        );
        Ok(RetrievalResult { results, status })
    }
}

/// Builder for constructing a [`Pipeline`].
///
/// The store and embedding provider are required; the chunker defaults
/// to [`SectionChunker`] and the reranker to [`TermOverlapReranker`].
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    store: Option<Arc<IndexStore>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    chunker: Option<Arc<dyn Chunker>>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl PipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the index store handle.
    pub fn store(mut self, store: Arc<IndexStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the embedding provider.
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Set the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the reranker.
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Build the [`Pipeline`], validating that required parts are set
    /// and that the embedder matches the store's embedding space.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Config`] if the store or embedder is
    /// missing, or if the embedder's model or dimensionality disagrees
    /// with what the store was opened for.
    pub fn build(self) -> Result<Pipeline> {
        let config = self.config.unwrap_or_default();
        let store = self
            .store
            .ok_or_else(|| RetrievalError::Config("store is required".to_string()))?;
        let embedder = self
            .embedder
            .ok_or_else(|| RetrievalError::Config("embedder is required".to_string()))?;

        if embedder.model_id() != store.model_id() {
            return Err(RetrievalError::Config(format!(
                "embedder model '{}' does not match store model '{}'",
                embedder.model_id(),
                store.model_id()
            )));
        }
        if embedder.dimensions() != store.dimensions() {
            return Err(RetrievalError::Config(format!(
                "embedder produces {} dimensions, store declares {}",
                embedder.dimensions(),
                store.dimensions()
            )));
        }

        let chunker = self
            .chunker
            .unwrap_or_else(|| Arc::new(SectionChunker::from_config(&config)));
        let reranker = self.reranker.unwrap_or_else(|| Arc::new(TermOverlapReranker));
        let retriever = HybridRetriever::new(Arc::clone(&store), Arc::clone(&embedder), &config);

        Ok(Pipeline { config, store, embedder, chunker, reranker, retriever })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashedNgramEmbedder;

    #[tokio::test]
    async fn build_requires_store_and_embedder() {
        let err = Pipeline::builder().build().unwrap_err();
        assert!(matches!(err, RetrievalError::Config(_)));

        let embedder = Arc::new(HashedNgramEmbedder::new(32));
        let err = Pipeline::builder().embedder(embedder).build().unwrap_err();
        assert!(matches!(err, RetrievalError::Config(_)));
    }

    #[tokio::test]
    async fn build_rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(HashedNgramEmbedder::new(32));
        let store = Arc::new(
            IndexStore::open(dir.path().join("index.json"), embedder.model_id(), 64)
                .await
                .unwrap(),
        );
        let err = Pipeline::builder().store(store).embedder(embedder).build().unwrap_err();
        assert!(matches!(err, RetrievalError::Config(_)));
    }
}
