//! Configuration for the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

/// Configuration parameters for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Minimum chunk size in characters. Chunks shorter than this after
    /// whitespace normalization are merged forward or discarded; a final
    /// short remainder of a unit is allowed to undershoot.
    pub min_chunk_chars: usize,
    /// Maximum chunk size in characters.
    pub max_chunk_chars: usize,
    /// Overlap between consecutive chunks of one oversize unit, in
    /// characters.
    pub chunk_overlap: usize,
    /// Number of final results returned to the caller.
    pub top_k: usize,
    /// Each of the vector and lexical searches over-fetches
    /// `overfetch_factor * top_k` candidates for the merge step.
    pub overfetch_factor: usize,
    /// Weight of the vector-search rank in the combined score.
    pub vector_weight: f32,
    /// Weight of the lexical-search rank in the combined score.
    pub lexical_weight: f32,
    /// Maximum number of texts per embedding request.
    pub max_batch_size: usize,
    /// Maximum number of embedding batches in flight concurrently.
    pub embed_concurrency: usize,
    /// Retries per embedding batch before its chunks are excluded.
    pub max_retries: usize,
    /// Initial delay for exponential backoff between retries, in
    /// milliseconds.
    pub initial_backoff_ms: u64,
    /// Once this fraction of completed batches has failed, remaining
    /// batches short-circuit without calling the backend.
    pub failure_rate_limit: f32,
    /// Query timeout in milliseconds.
    pub query_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_chunk_chars: 24,
            max_chunk_chars: 512,
            chunk_overlap: 64,
            top_k: 5,
            overfetch_factor: 4,
            vector_weight: 0.5,
            lexical_weight: 0.5,
            max_batch_size: 32,
            embed_concurrency: 4,
            max_retries: 3,
            initial_backoff_ms: 100,
            failure_rate_limit: 0.5,
            query_timeout_ms: 5_000,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for constructing a [`PipelineConfig`].
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }
}

/// Builder for constructing a validated [`PipelineConfig`].
#[derive(Debug, Clone, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the minimum chunk size in characters.
    pub fn min_chunk_chars(mut self, chars: usize) -> Self {
        self.config.min_chunk_chars = chars;
        self
    }

    /// Set the maximum chunk size in characters.
    pub fn max_chunk_chars(mut self, chars: usize) -> Self {
        self.config.max_chunk_chars = chars;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the number of final results returned per query.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the over-fetch multiplier for the candidate pools.
    pub fn overfetch_factor(mut self, factor: usize) -> Self {
        self.config.overfetch_factor = factor;
        self
    }

    /// Set the vector and lexical rank weights for the hybrid merge.
    pub fn weights(mut self, vector: f32, lexical: f32) -> Self {
        self.config.vector_weight = vector;
        self.config.lexical_weight = lexical;
        self
    }

    /// Set the maximum number of texts per embedding request.
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.config.max_batch_size = size;
        self
    }

    /// Set the number of embedding batches in flight concurrently.
    pub fn embed_concurrency(mut self, concurrency: usize) -> Self {
        self.config.embed_concurrency = concurrency;
        self
    }

    /// Set the retry limit per embedding batch.
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set the initial backoff delay in milliseconds.
    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.config.initial_backoff_ms = ms;
        self
    }

    /// Set the batch failure rate that trips the circuit breaker.
    pub fn failure_rate_limit(mut self, rate: f32) -> Self {
        self.config.failure_rate_limit = rate;
        self
    }

    /// Set the query timeout in milliseconds.
    pub fn query_timeout_ms(mut self, ms: u64) -> Self {
        self.config.query_timeout_ms = ms;
        self
    }

    /// Build the [`PipelineConfig`], validating that parameters are
    /// consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Config`] if:
    /// - `min_chunk_chars >= max_chunk_chars`
    /// - `chunk_overlap >= max_chunk_chars`
    /// - `top_k == 0` or `overfetch_factor == 0`
    /// - either weight is negative, or both weights are zero
    /// - `max_batch_size == 0` or `embed_concurrency == 0`
    pub fn build(self) -> Result<PipelineConfig> {
        let c = &self.config;
        if c.min_chunk_chars >= c.max_chunk_chars {
            return Err(RetrievalError::Config(format!(
                "min_chunk_chars ({}) must be less than max_chunk_chars ({})",
                c.min_chunk_chars, c.max_chunk_chars
            )));
        }
        if c.chunk_overlap >= c.max_chunk_chars {
            return Err(RetrievalError::Config(format!(
                "chunk_overlap ({}) must be less than max_chunk_chars ({})",
                c.chunk_overlap, c.max_chunk_chars
            )));
        }
        if c.top_k == 0 {
            return Err(RetrievalError::Config("top_k must be greater than zero".to_string()));
        }
        if c.overfetch_factor == 0 {
            return Err(RetrievalError::Config(
                "overfetch_factor must be greater than zero".to_string(),
            ));
        }
        if c.vector_weight < 0.0 || c.lexical_weight < 0.0 {
            return Err(RetrievalError::Config("weights must be non-negative".to_string()));
        }
        if c.vector_weight == 0.0 && c.lexical_weight == 0.0 {
            return Err(RetrievalError::Config(
                "at least one of vector_weight and lexical_weight must be positive".to_string(),
            ));
        }
        if c.max_batch_size == 0 {
            return Err(RetrievalError::Config(
                "max_batch_size must be greater than zero".to_string(),
            ));
        }
        if c.embed_concurrency == 0 {
            return Err(RetrievalError::Config(
                "embed_concurrency must be greater than zero".to_string(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PipelineConfig::builder().build().unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn rejects_overlap_at_least_chunk_size() {
        let err = PipelineConfig::builder()
            .max_chunk_chars(100)
            .chunk_overlap(100)
            .build()
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Config(_)));
    }

    #[test]
    fn rejects_zero_top_k() {
        let err = PipelineConfig::builder().top_k(0).build().unwrap_err();
        assert!(matches!(err, RetrievalError::Config(_)));
    }

    #[test]
    fn rejects_both_weights_zero() {
        let err = PipelineConfig::builder().weights(0.0, 0.0).build().unwrap_err();
        assert!(matches!(err, RetrievalError::Config(_)));
    }
}
