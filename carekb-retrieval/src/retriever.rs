//! Hybrid retrieval: parallel lexical and vector search with a
//! rank-fusion merge.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::config::PipelineConfig;
use crate::document::{Query, RetrievalStatus, ScoredChunk};
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::index::IndexStore;

/// Runs vector and lexical search in parallel and merges the candidate
/// pools into one ranked list for the reranker.
pub struct HybridRetriever {
    store: Arc<IndexStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    vector_weight: f32,
    lexical_weight: f32,
    overfetch_factor: usize,
}

impl HybridRetriever {
    /// Create a retriever over `store` using `embedder` for queries.
    pub fn new(
        store: Arc<IndexStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            vector_weight: config.vector_weight,
            lexical_weight: config.lexical_weight,
            overfetch_factor: config.overfetch_factor,
        }
    }

    /// Retrieve the merged candidate list for `query`.
    ///
    /// Both searches over-fetch `overfetch_factor * top_k` candidates to
    /// give the merge enough material. If the query cannot be embedded,
    /// the retriever degrades to lexical-only results rather than
    /// failing the query; the returned status says so.
    pub async fn retrieve(&self, query: &Query) -> Result<(Vec<ScoredChunk>, RetrievalStatus)> {
        let pool_size = self.overfetch_factor * query.top_k;

        let query_vector = match self.embedder.embed(&query.text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(error = %e, "query embedding unavailable, degrading to lexical-only");
                None
            }
        };

        let (vector_pool, lexical_pool) = tokio::join!(
            async {
                match &query_vector {
                    Some(vector) => self.store.vector_search(vector, pool_size).await,
                    None => Vec::new(),
                }
            },
            self.store.lexical_search(&query.text, pool_size),
        );

        let status = if query_vector.is_none() {
            RetrievalStatus::LexicalOnly
        } else {
            RetrievalStatus::Full
        };

        let merged = merge_candidates(
            &vector_pool,
            &lexical_pool,
            self.vector_weight,
            self.lexical_weight,
            query.language_hint,
            pool_size,
        );
        Ok((merged, status))
    }
}

/// Merge the two candidate pools into one deduplicated ranking.
///
/// Candidates are unioned by chunk id; each pool contributes a
/// reciprocal-rank score `weight / (rank + 1)`, so a chunk appearing in
/// both pools combines a weighted sum of its normalized ranks. The
/// result depends only on the pool contents, never on which search
/// completed first.
///
/// Ties break in order: language tag matching the query hint, more
/// recent source `last_updated`, then chunk id.
pub fn merge_candidates(
    vector_pool: &[ScoredChunk],
    lexical_pool: &[ScoredChunk],
    vector_weight: f32,
    lexical_weight: f32,
    language_hint: Option<crate::document::Language>,
    limit: usize,
) -> Vec<ScoredChunk> {
    let mut combined: HashMap<&str, (f32, &ScoredChunk)> = HashMap::new();

    for (rank, candidate) in vector_pool.iter().enumerate() {
        let contribution = vector_weight / (rank as f32 + 1.0);
        combined
            .entry(candidate.chunk.id.as_str())
            .and_modify(|(score, _)| *score += contribution)
            .or_insert((contribution, candidate));
    }
    for (rank, candidate) in lexical_pool.iter().enumerate() {
        let contribution = lexical_weight / (rank as f32 + 1.0);
        combined
            .entry(candidate.chunk.id.as_str())
            .and_modify(|(score, _)| *score += contribution)
            .or_insert((contribution, candidate));
    }

    let mut merged: Vec<ScoredChunk> = combined
        .into_values()
        .map(|(score, candidate)| ScoredChunk { chunk: candidate.chunk.clone(), score })
        .collect();

    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let a_hit = language_hint.is_some_and(|hint| a.chunk.language == hint);
                let b_hit = language_hint.is_some_and(|hint| b.chunk.language == hint);
                b_hit.cmp(&a_hit)
            })
            .then_with(|| b.chunk.last_updated.cmp(&a.chunk.last_updated))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    merged.truncate(limit);
    merged
}
