//! The index store: persisted chunks with vectors and lexical tokens.
//!
//! The store is shared, long-lived state: an explicit handle with an
//! `open` / `reset` / `close` lifecycle rather than an implicit
//! singleton. All mutation goes through [`IndexStore::upsert`] and
//! [`IndexStore::reset`]; readers take an `Arc` snapshot of the current
//! generation, so a concurrent reset is observed as either the old
//! complete index or the new complete index, never a partial one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::document::{IndexEntry, ScoredChunk};
use crate::error::{Result, RetrievalError};
use crate::lexical::InvertedIndex;

/// The on-disk form of one index generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Embedding model shared by every entry in this generation.
    pub model_id: String,
    /// Dimensionality shared by every entry in this generation.
    pub dimensions: usize,
    /// The index entries.
    pub entries: Vec<IndexEntry>,
}

/// One complete, immutable index generation.
#[derive(Debug, Default, Clone)]
struct Generation {
    entries: Vec<IndexEntry>,
    slots: HashMap<String, u32>,
    lexical: InvertedIndex,
}

impl Generation {
    /// Build a generation from entries. Later duplicates of a chunk id
    /// replace earlier ones.
    fn from_entries(entries: Vec<IndexEntry>) -> Self {
        let mut generation = Generation::default();
        for entry in entries {
            generation.put(entry);
        }
        generation
    }

    fn put(&mut self, entry: IndexEntry) {
        match self.slots.get(&entry.chunk.id) {
            Some(&slot) => {
                self.lexical.remove(slot);
                self.lexical.add(slot, &entry.tokens);
                self.entries[slot as usize] = entry;
            }
            None => {
                let slot = self.entries.len() as u32;
                self.slots.insert(entry.chunk.id.clone(), slot);
                self.lexical.add(slot, &entry.tokens);
                self.entries.push(entry);
            }
        }
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// The index store handle.
///
/// Supports cosine vector search and BM25 lexical search over one
/// generation of entries, with idempotent upserts and an atomic
/// drop-and-rebuild reset. Each successful mutation persists a JSON
/// snapshot via temp-file-then-rename, so the on-disk index is always a
/// complete generation.
#[derive(Debug)]
pub struct IndexStore {
    path: PathBuf,
    model_id: String,
    dimensions: usize,
    current: RwLock<Arc<Generation>>,
}

impl IndexStore {
    /// Open the store at `path` for the given embedding model.
    ///
    /// Loads an existing snapshot if one is present.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Store`] if an existing snapshot was
    /// produced by a different model or dimensionality: vectors from
    /// incompatible spaces must never be mixed without re-embedding.
    pub async fn open(
        path: impl Into<PathBuf>,
        model_id: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self> {
        let path = path.into();
        let model_id = model_id.into();
        let generation = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let snapshot = Self::load_snapshot(&path).await?;
            if snapshot.model_id != model_id || snapshot.dimensions != dimensions {
                return Err(RetrievalError::Store(format!(
                    "index at {} was built with model '{}' ({} dims), requested '{}' ({} dims); \
                     re-ingest with --reset",
                    path.display(),
                    snapshot.model_id,
                    snapshot.dimensions,
                    model_id,
                    dimensions
                )));
            }
            Generation::from_entries(snapshot.entries)
        } else {
            Generation::default()
        };
        info!(path = %path.display(), entries = generation.entries.len(), "opened index store");
        Ok(Self { path, model_id, dimensions, current: RwLock::new(Arc::new(generation)) })
    }

    /// Read a snapshot file without constructing a store.
    ///
    /// Used by the verifier, which must see the raw entry list
    /// (duplicate chunk ids included) rather than the deduplicated
    /// generation.
    pub async fn load_snapshot(path: &Path) -> Result<Snapshot> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// The embedding model this store was opened for.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// The declared embedding dimensionality.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// The snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn validate(&self, entries: &[IndexEntry]) -> Result<()> {
        for entry in entries {
            if entry.embedding.model_id != self.model_id {
                return Err(RetrievalError::Store(format!(
                    "entry '{}' embedded with model '{}', store expects '{}'",
                    entry.chunk.id, entry.embedding.model_id, self.model_id
                )));
            }
            if entry.embedding.vector.len() != self.dimensions {
                return Err(RetrievalError::Store(format!(
                    "entry '{}' has {} dimensions, store expects {}",
                    entry.chunk.id,
                    entry.embedding.vector.len(),
                    self.dimensions
                )));
            }
        }
        Ok(())
    }

    /// Insert or replace entries by chunk id. Idempotent: upserting the
    /// same entry twice leaves the store unchanged.
    pub async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        self.validate(&entries)?;
        let mut current = self.current.write().await;
        let mut next = (**current).clone();
        for entry in entries {
            next.put(entry);
        }
        let next = Arc::new(next);
        self.persist(&next).await?;
        *current = next;
        Ok(())
    }

    /// Atomically replace the whole index with `entries`.
    ///
    /// The new generation is staged and persisted before it becomes
    /// visible; on failure the previous generation stays intact and
    /// queryable, in memory and on disk.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::ResetFailed`] if staging or persistence
    /// fails.
    pub async fn reset(&self, entries: Vec<IndexEntry>) -> Result<()> {
        self.validate(&entries)
            .map_err(|e| RetrievalError::ResetFailed(e.to_string()))?;
        let staged = Arc::new(Generation::from_entries(entries));
        let mut current = self.current.write().await;
        self.persist(&staged)
            .await
            .map_err(|e| RetrievalError::ResetFailed(e.to_string()))?;
        let previous = current.entries.len();
        *current = Arc::clone(&staged);
        info!(previous, entries = staged.entries.len(), "index reset complete");
        Ok(())
    }

    /// Persist a generation snapshot with temp-file-then-rename.
    async fn persist(&self, generation: &Generation) -> Result<()> {
        let snapshot = Snapshot {
            model_id: self.model_id.clone(),
            dimensions: self.dimensions,
            entries: generation.entries.clone(),
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Flush the current generation to disk and drop the handle.
    pub async fn close(self) -> Result<()> {
        let current = self.current.read().await.clone();
        self.persist(&current).await
    }

    /// Number of entries in the current generation.
    pub async fn count(&self) -> usize {
        self.current.read().await.entries.len()
    }

    /// Clone out all entries of the current generation.
    pub async fn entries(&self) -> Vec<IndexEntry> {
        self.current.read().await.entries.clone()
    }

    /// The `k` nearest entries to `vector` by cosine similarity.
    pub async fn vector_search(&self, vector: &[f32], k: usize) -> Vec<ScoredChunk> {
        let generation = self.current.read().await.clone();
        let mut scored: Vec<ScoredChunk> = generation
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(&entry.embedding.vector, vector),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        scored.truncate(k);
        scored
    }

    /// The `k` entries best matching `query` by BM25 lexical score.
    ///
    /// Entries with no matching term are not returned.
    pub async fn lexical_search(&self, query: &str, k: usize) -> Vec<ScoredChunk> {
        let generation = self.current.read().await.clone();
        generation
            .lexical
            .search(query, k)
            .into_iter()
            .map(|(slot, score)| ScoredChunk {
                chunk: generation.entries[slot as usize].chunk.clone(),
                score,
            })
            .collect()
    }
}
