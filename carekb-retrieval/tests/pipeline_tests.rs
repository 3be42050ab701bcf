//! End-to-end pipeline tests over a real content tree and on-disk index.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use carekb_retrieval::document::{Chunk, Language, Query, RetrievalStatus, ScoredChunk};
use carekb_retrieval::embedding::{EmbeddingProvider, HashedNgramEmbedder};
use carekb_retrieval::error::{Result, RetrievalError};
use carekb_retrieval::index::IndexStore;
use carekb_retrieval::pipeline::Pipeline;
use carekb_retrieval::reranker::Reranker;
use carekb_retrieval::verify::{ChunkBounds, verify_index_file};
use carekb_retrieval::PipelineConfig;
use tempfile::TempDir;

fn write_content(root: &Path) {
    fs::create_dir_all(root.join("preoperative")).unwrap();
    fs::create_dir_all(root.join("logistics")).unwrap();
    fs::write(
        root.join("preoperative/fasting.md"),
        "---\nsource: IGT clinic\nlast_updated: 2024-05-10\n---\n\
         # Fasting Before Your Procedure\n\n\
         Do not eat solid food after midnight before the procedure.\n\
         手術前午夜後請勿進食固體食物。\n\n\
         ## Clear Fluids\n\n\
         Q: Can my child drink water?\n\
         A: Clear fluids are allowed until two hours before arrival.\n",
    )
    .unwrap();
    fs::write(
        root.join("logistics/parking.md"),
        "# Parking\n\nThe garage on Elm Street offers hourly and daily rates.\n",
    )
    .unwrap();
}

async fn build_pipeline(index_dir: &TempDir) -> (Pipeline, Arc<HashedNgramEmbedder>) {
    let embedder = Arc::new(HashedNgramEmbedder::new(64));
    let store = Arc::new(
        IndexStore::open(
            index_dir.path().join("index.json"),
            embedder.model_id(),
            embedder.dimensions(),
        )
        .await
        .unwrap(),
    );
    let pipeline = Pipeline::builder()
        .store(store)
        .embedder(Arc::clone(&embedder) as Arc<dyn EmbeddingProvider>)
        .build()
        .unwrap();
    (pipeline, embedder)
}

#[tokio::test]
async fn ingest_then_query_surfaces_the_relevant_document() {
    let content = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    write_content(content.path());

    let (pipeline, _) = build_pipeline(&index).await;
    let summary = pipeline.ingest(content.path(), true).await.unwrap();
    assert!(summary.is_clean());
    assert_eq!(summary.documents_loaded, 2);
    assert!(summary.chunks_indexed >= 2);

    let result = pipeline
        .query(&Query::new("fasting rules before the procedure", 3))
        .await
        .unwrap();
    assert_eq!(result.status, RetrievalStatus::Full);
    assert!(!result.results.is_empty());
    assert!(result.results.len() <= 3);
    let top = &result.results[0];
    assert!(top.chunk.document_id.contains("fasting"));
    assert_eq!(top.chunk.source, "IGT clinic");
    assert_eq!(top.chunk.category, "preoperative");
}

#[tokio::test]
async fn chinese_query_matches_bilingual_content() {
    let content = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    write_content(content.path());

    let (pipeline, _) = build_pipeline(&index).await;
    pipeline.ingest(content.path(), true).await.unwrap();

    let result = pipeline
        .query(&Query::new("手術前可以進食嗎", 3).with_language_hint(Language::ZhHant))
        .await
        .unwrap();
    assert!(!result.results.is_empty());
    assert!(result.results[0].chunk.document_id.contains("fasting"));
}

#[tokio::test]
async fn reingest_without_reset_is_idempotent() {
    let content = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    write_content(content.path());

    let (pipeline, _) = build_pipeline(&index).await;
    let first = pipeline.ingest(content.path(), false).await.unwrap();
    let count_after_first = pipeline.store().count().await;
    let second = pipeline.ingest(content.path(), false).await.unwrap();
    assert_eq!(first.chunks_indexed, second.chunks_indexed);
    assert_eq!(pipeline.store().count().await, count_after_first);
}

#[tokio::test]
async fn reset_over_empty_content_empties_the_index() {
    let content = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    write_content(content.path());

    let (pipeline, _) = build_pipeline(&index).await;
    pipeline.ingest(content.path(), true).await.unwrap();
    assert!(pipeline.store().count().await > 0);

    let empty = TempDir::new().unwrap();
    let summary = pipeline.ingest(empty.path(), true).await.unwrap();
    assert_eq!(summary.documents_loaded, 0);
    assert_eq!(pipeline.store().count().await, 0);

    let result = pipeline.query(&Query::new("fasting", 3)).await.unwrap();
    assert!(result.results.is_empty());
}

#[tokio::test]
async fn stop_word_only_content_is_dropped_and_still_verifies_clean() {
    let content = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    fs::write(content.path().join("note.md"), "the and of to is").unwrap();

    let (pipeline, _) = build_pipeline(&index).await;
    let summary = pipeline.ingest(content.path(), true).await.unwrap();
    assert!(summary.is_clean());
    assert_eq!(summary.chunks_indexed, 0);
    assert_eq!(summary.chunks_without_tokens, 1);

    let violations = verify_index_file(&index.path().join("index.json"), ChunkBounds::default())
        .await
        .unwrap();
    assert!(violations.is_empty());
}

#[tokio::test]
async fn verifier_reports_exactly_the_corrupted_entry() {
    let content = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    write_content(content.path());

    let (pipeline, _) = build_pipeline(&index).await;
    pipeline.ingest(content.path(), true).await.unwrap();

    let index_path = index.path().join("index.json");
    let violations = verify_index_file(&index_path, ChunkBounds::default()).await.unwrap();
    assert!(violations.is_empty());

    // Corrupt one entry's dimensionality in place.
    let mut snapshot = IndexStore::load_snapshot(&index_path).await.unwrap();
    snapshot.entries[0].embedding.vector.pop();
    let corrupted_id = snapshot.entries[0].chunk.id.clone();
    fs::write(&index_path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

    let violations = verify_index_file(&index_path, ChunkBounds::default()).await.unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].chunk_id, corrupted_id);
}

/// An embedder that can be taken down after ingestion.
struct GatedEmbedder {
    inner: HashedNgramEmbedder,
    down: AtomicBool,
}

#[async_trait]
impl EmbeddingProvider for GatedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(RetrievalError::Embedding {
                provider: "gated".to_string(),
                message: "backend offline".to_string(),
            });
        }
        self.inner.embed(text).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

#[tokio::test]
async fn query_degrades_to_lexical_only_when_embedder_is_down() {
    let content = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    write_content(content.path());

    let embedder = Arc::new(GatedEmbedder {
        inner: HashedNgramEmbedder::new(64),
        down: AtomicBool::new(false),
    });
    let store = Arc::new(
        IndexStore::open(
            index.path().join("index.json"),
            embedder.model_id(),
            embedder.dimensions(),
        )
        .await
        .unwrap(),
    );
    let pipeline = Pipeline::builder()
        .store(store)
        .embedder(Arc::clone(&embedder) as Arc<dyn EmbeddingProvider>)
        .build()
        .unwrap();
    pipeline.ingest(content.path(), true).await.unwrap();

    embedder.down.store(true, Ordering::SeqCst);
    let result = pipeline.query(&Query::new("parking garage rates", 3)).await.unwrap();
    assert_eq!(result.status, RetrievalStatus::LexicalOnly);
    assert!(!result.results.is_empty());
    assert!(result.results[0].chunk.document_id.contains("parking"));
}

/// A reranker that always fails, standing in for an unreachable service.
struct DownReranker;

#[async_trait]
impl Reranker for DownReranker {
    async fn rerank(&self, _query: &str, _candidates: Vec<ScoredChunk>) -> Result<Vec<ScoredChunk>> {
        Err(RetrievalError::RerankUnavailable {
            reranker: "down".to_string(),
            message: "connection refused".to_string(),
        })
    }
}

#[tokio::test]
async fn reranker_failure_falls_back_to_hybrid_order() {
    let content = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    write_content(content.path());

    let embedder = Arc::new(HashedNgramEmbedder::new(64));
    let store = Arc::new(
        IndexStore::open(
            index.path().join("index.json"),
            embedder.model_id(),
            embedder.dimensions(),
        )
        .await
        .unwrap(),
    );
    let pipeline = Pipeline::builder()
        .store(store)
        .embedder(embedder)
        .reranker(Arc::new(DownReranker))
        .build()
        .unwrap();
    pipeline.ingest(content.path(), true).await.unwrap();

    let result = pipeline.query(&Query::new("fasting before procedure", 3)).await.unwrap();
    assert_eq!(result.status, RetrievalStatus::Unreranked);
    assert!(!result.results.is_empty());
}

/// A reranker that fabricates a candidate the retriever never produced.
struct WideningReranker;

#[async_trait]
impl Reranker for WideningReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut candidates: Vec<ScoredChunk>,
    ) -> Result<Vec<ScoredChunk>> {
        candidates.insert(
            0,
            ScoredChunk {
                chunk: Chunk {
                    id: "fabricated".to_string(),
                    text: "not from the index".to_string(),
                    language: Language::En,
                    heading_path: Vec::new(),
                    ordinal: 0,
                    overlap: 0,
                    document_id: "nowhere".to_string(),
                    category: "general".to_string(),
                    source: String::new(),
                    last_updated: None,
                },
                score: 99.0,
            },
        );
        Ok(candidates)
    }
}

#[tokio::test]
async fn fabricated_rerank_candidates_are_dropped() {
    let content = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    write_content(content.path());

    let embedder = Arc::new(HashedNgramEmbedder::new(64));
    let store = Arc::new(
        IndexStore::open(
            index.path().join("index.json"),
            embedder.model_id(),
            embedder.dimensions(),
        )
        .await
        .unwrap(),
    );
    let pipeline = Pipeline::builder()
        .store(store)
        .embedder(embedder)
        .reranker(Arc::new(WideningReranker))
        .build()
        .unwrap();
    pipeline.ingest(content.path(), true).await.unwrap();

    let result = pipeline.query(&Query::new("fasting", 3)).await.unwrap();
    assert!(result.results.iter().all(|r| r.chunk.id != "fabricated"));
}

/// A reranker that stalls longer than the query timeout.
struct StalledReranker;

#[async_trait]
impl Reranker for StalledReranker {
    async fn rerank(&self, _query: &str, candidates: Vec<ScoredChunk>) -> Result<Vec<ScoredChunk>> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(candidates)
    }
}

#[tokio::test]
async fn slow_query_times_out_with_an_explicit_error() {
    let content = TempDir::new().unwrap();
    let index = TempDir::new().unwrap();
    write_content(content.path());

    let embedder = Arc::new(HashedNgramEmbedder::new(64));
    let store = Arc::new(
        IndexStore::open(
            index.path().join("index.json"),
            embedder.model_id(),
            embedder.dimensions(),
        )
        .await
        .unwrap(),
    );
    let config = PipelineConfig::builder().query_timeout_ms(50).build().unwrap();
    let pipeline = Pipeline::builder()
        .config(config)
        .store(store)
        .embedder(embedder)
        .reranker(Arc::new(StalledReranker))
        .build()
        .unwrap();
    pipeline.ingest(content.path(), true).await.unwrap();

    let err = pipeline.query(&Query::new("fasting", 3)).await.unwrap_err();
    assert!(matches!(err, RetrievalError::Timeout { timeout_ms: 50 }));
}
