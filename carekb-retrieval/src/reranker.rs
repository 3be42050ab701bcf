//! Reranking: a second, higher-precision scoring pass over the hybrid
//! retriever's candidate list.

use async_trait::async_trait;

use crate::document::ScoredChunk;
use crate::error::Result;
use crate::lexical;

/// A reranker that jointly re-scores (query, chunk) pairs.
///
/// A reranker narrows, never widens: the pipeline enforces that its
/// output is a subset of its input and at most `top_k` long. On failure
/// the pipeline falls back to the hybrid order rather than failing the
/// query.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Rerank candidates for the original query, returning them in a new
    /// order with updated scores.
    async fn rerank(&self, query: &str, candidates: Vec<ScoredChunk>)
    -> Result<Vec<ScoredChunk>>;
}

/// A no-op reranker that returns candidates unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReranker;

#[async_trait]
impl Reranker for NoOpReranker {
    async fn rerank(
        &self,
        _query: &str,
        candidates: Vec<ScoredChunk>,
    ) -> Result<Vec<ScoredChunk>> {
        Ok(candidates)
    }
}

/// A local cross-scoring reranker based on query-term coverage.
///
/// Scores each candidate by the fraction of query tokens (word tokens
/// and CJK bigrams alike) present in the chunk text, blended with a
/// small share of the incoming hybrid score for stability. A stand-in
/// for a cross-encoder model with the same contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermOverlapReranker;

#[async_trait]
impl Reranker for TermOverlapReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<ScoredChunk>,
    ) -> Result<Vec<ScoredChunk>> {
        let query_tokens = lexical::tokenize(query);
        if query_tokens.is_empty() {
            return Ok(candidates);
        }

        let mut rescored: Vec<ScoredChunk> = candidates
            .into_iter()
            .map(|candidate| {
                let chunk_tokens: std::collections::HashSet<String> =
                    lexical::tokenize(&candidate.chunk.text).into_iter().collect();
                let hits = query_tokens.iter().filter(|t| chunk_tokens.contains(*t)).count();
                let coverage = hits as f32 / query_tokens.len() as f32;
                ScoredChunk {
                    score: coverage + 0.05 * candidate.score,
                    chunk: candidate.chunk,
                }
            })
            .collect();
        rescored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        Ok(rescored)
    }
}
