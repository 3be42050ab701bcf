//! Embedding providers and the batched, retrying embedding driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::Result;

/// A provider that generates vector embeddings from text.
///
/// Implementations wrap specific backends behind a unified async
/// interface and must be deterministic for a given model version: the
/// same text always maps to the same vector. English and Chinese text
/// embed into one shared space.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs.
    ///
    /// The default implementation calls [`embed`](EmbeddingProvider::embed)
    /// sequentially; backends with native batching should override it.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// The dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Identifier (with version) of the embedding model.
    fn model_id(&self) -> &str;
}

/// A deterministic local embedder using character n-gram feature hashing.
///
/// Character trigrams of the whitespace-normalized, lowercased text are
/// hashed into a fixed number of buckets and the resulting vector is
/// L2-normalized. Works on English and CJK text alike, which makes it
/// usable for offline development and tests; it is not a semantic model.
#[derive(Debug, Clone)]
pub struct HashedNgramEmbedder {
    dimensions: usize,
    model_id: String,
}

impl Default for HashedNgramEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl HashedNgramEmbedder {
    /// Create an embedder with the given number of buckets.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, model_id: format!("hashed-ngram-{dimensions}/1") }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        let chars: Vec<char> = normalized.chars().collect();
        let mut vector = vec![0.0f32; self.dimensions];
        if chars.is_empty() {
            return vector;
        }
        for window in chars.windows(3.min(chars.len())) {
            let mut hash = fnv1a(window);
            // Two buckets per trigram reduces collision damage.
            for _ in 0..2 {
                vector[(hash % self.dimensions as u64) as usize] += 1.0;
                hash = hash.wrapping_mul(0x100000001b3).wrapping_add(1);
            }
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

/// FNV-1a over the UTF-8 bytes of a char window. Stable across runs and
/// platforms, which keeps stored vectors comparable between ingestions.
fn fnv1a(chars: &[char]) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    let mut buf = [0u8; 4];
    for &c in chars {
        for b in c.encode_utf8(&mut buf).as_bytes() {
            hash ^= u64::from(*b);
            hash = hash.wrapping_mul(0x100000001b3);
        }
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for HashedNgramEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// The outcome of embedding one ingestion run's chunk texts.
pub struct EmbedOutcome {
    /// One vector per input text, `None` where the batch exhausted its
    /// retries and the chunk is excluded from the index.
    pub vectors: Vec<Option<Vec<f32>>>,
    /// Number of inputs that failed.
    pub failed: usize,
}

/// Drives a provider with bounded batches, bounded concurrency,
/// exponential-backoff retries, and a failure-rate circuit breaker.
///
/// Failures are isolated at batch granularity: a batch that exhausts its
/// retries marks only its own chunks as failed rather than aborting the
/// ingestion run. Once the failure rate across completed batches crosses
/// the configured limit, remaining batches short-circuit without calling
/// the backend, so a degraded upstream cannot stall the whole run.
pub struct BatchingEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    max_batch_size: usize,
    concurrency: usize,
    max_retries: usize,
    initial_backoff: Duration,
    failure_rate_limit: f32,
}

impl BatchingEmbedder {
    /// Create a driver over `provider` with limits from `config`.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            max_batch_size: config.max_batch_size,
            concurrency: config.embed_concurrency,
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            failure_rate_limit: config.failure_rate_limit,
        }
    }

    /// Embed all texts. Batches run concurrently with no ordering
    /// requirement among them; positions in the returned outcome line up
    /// with the input slice.
    pub async fn embed_all(&self, texts: &[String]) -> EmbedOutcome {
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        if texts.is_empty() {
            return EmbedOutcome { vectors, failed: 0 };
        }

        let batches: Vec<(usize, &[String])> = texts
            .chunks(self.max_batch_size)
            .enumerate()
            .map(|(i, batch)| (i * self.max_batch_size, batch))
            .collect();
        let total_batches = batches.len();

        // (completed, failed) across batches, read by the circuit breaker.
        let progress = Arc::new(std::sync::Mutex::new((0usize, 0usize)));

        let results: Vec<(usize, Option<Vec<Vec<f32>>>)> = futures::stream::iter(batches)
            .map(|(offset, batch)| {
                let progress = Arc::clone(&progress);
                async move {
                    let tripped = {
                        let (completed, failed) = *progress.lock().unwrap();
                        completed >= 4
                            && failed as f32 / completed as f32 > self.failure_rate_limit
                    };
                    let result = if tripped {
                        warn!(offset, "circuit breaker open, skipping embedding batch");
                        None
                    } else {
                        self.embed_batch_with_retry(batch).await
                    };
                    let mut guard = progress.lock().unwrap();
                    guard.0 += 1;
                    if result.is_none() {
                        guard.1 += 1;
                    }
                    (offset, result)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut failed = 0usize;
        for (offset, result) in results {
            match result {
                Some(batch_vectors) => {
                    for (i, vector) in batch_vectors.into_iter().enumerate() {
                        vectors[offset + i] = Some(vector);
                    }
                }
                None => {
                    let batch_len = self.max_batch_size.min(texts.len() - offset);
                    failed += batch_len;
                }
            }
        }
        debug!(total_batches, failed, "embedding pass complete");
        EmbedOutcome { vectors, failed }
    }

    /// Retry one batch with exponential backoff. `None` when retries are
    /// exhausted.
    async fn embed_batch_with_retry(&self, batch: &[String]) -> Option<Vec<Vec<f32>>> {
        let texts: Vec<&str> = batch.iter().map(String::as_str).collect();
        let mut delay = self.initial_backoff;
        for attempt in 0..=self.max_retries {
            match self.provider.embed_batch(&texts).await {
                Ok(vectors) if vectors.len() == texts.len() => return Some(vectors),
                Ok(vectors) => {
                    warn!(
                        expected = texts.len(),
                        got = vectors.len(),
                        "provider returned wrong batch size"
                    );
                    return None;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "embedding batch failed");
                    if attempt < self.max_retries {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::RetrievalError;

    #[tokio::test]
    async fn hashed_embedder_is_deterministic_and_normalized() {
        let embedder = HashedNgramEmbedder::new(64);
        let a = embedder.embed("fasting before the procedure").await.unwrap();
        let b = embedder.embed("fasting before the procedure").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn similar_texts_score_higher_than_unrelated() {
        let embedder = HashedNgramEmbedder::new(128);
        let query = embedder.embed("fasting before procedure").await.unwrap();
        let related = embedder.embed("fasting rules before your procedure").await.unwrap();
        let unrelated = embedder.embed("parking garage levels and fees").await.unwrap();
        let dot = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        assert!(dot(&query, &related) > dot(&query, &unrelated));
    }

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyEmbedder {
        inner: HashedNgramEmbedder,
        calls: AtomicUsize,
        failures: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(RetrievalError::Embedding {
                    provider: "flaky".to_string(),
                    message: "transient".to_string(),
                });
            }
            self.inner.embed(text).await
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        fn model_id(&self) -> &str {
            "flaky/1"
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig::builder()
            .max_batch_size(2)
            .embed_concurrency(2)
            .max_retries(2)
            .initial_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let provider = Arc::new(FlakyEmbedder {
            inner: HashedNgramEmbedder::new(32),
            calls: AtomicUsize::new(0),
            failures: 1,
        });
        let driver = BatchingEmbedder::new(provider, &fast_config());
        let texts = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let outcome = driver.embed_all(&texts).await;
        assert_eq!(outcome.failed, 0);
        assert!(outcome.vectors.iter().all(Option::is_some));
    }

    #[tokio::test]
    async fn exhausted_retries_exclude_only_that_batch() {
        // Every call fails: all chunks are excluded, none abort the run.
        struct AlwaysFails;
        #[async_trait]
        impl EmbeddingProvider for AlwaysFails {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Err(RetrievalError::Embedding {
                    provider: "down".to_string(),
                    message: "unavailable".to_string(),
                })
            }
            fn dimensions(&self) -> usize {
                32
            }
            fn model_id(&self) -> &str {
                "down/1"
            }
        }
        let driver = BatchingEmbedder::new(Arc::new(AlwaysFails), &fast_config());
        let texts: Vec<String> = (0..5).map(|i| format!("text {i}")).collect();
        let outcome = driver.embed_all(&texts).await;
        assert_eq!(outcome.failed, 5);
        assert!(outcome.vectors.iter().all(Option::is_none));
    }
}
