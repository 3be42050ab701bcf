//! Index integrity verification: the pre-deployment gate.
//!
//! A standalone, read-only pass over a populated index snapshot. Ingested
//! chunks are not trusted in production until this check reports zero
//! violations.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::index::{IndexStore, Snapshot};

/// A single integrity violation, naming the offending chunk.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    /// The chunk id in violation.
    pub chunk_id: String,
    /// What is wrong with it.
    pub reason: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.chunk_id, self.reason)
    }
}

/// Bounds the verifier checks chunk text against.
#[derive(Debug, Clone, Copy)]
pub struct ChunkBounds {
    /// Maximum chunk length in characters.
    pub max_chars: usize,
}

impl Default for ChunkBounds {
    fn default() -> Self {
        Self { max_chars: crate::config::PipelineConfig::default().max_chunk_chars }
    }
}

/// Verify every entry of a snapshot. Does not mutate anything.
///
/// Checks, per entry:
/// - chunk text is non-empty and within the length bound
/// - embedding dimensionality matches the snapshot's declared
///   dimensionality
/// - embedding model matches the snapshot's declared model
/// - chunk token list is non-empty
/// - no duplicate chunk ids across the snapshot
///
/// The language tag is validated structurally when the snapshot is
/// deserialized: an unrecognized tag fails the load, which the CLI
/// reports as a failed verification.
pub fn verify_snapshot(snapshot: &Snapshot, bounds: ChunkBounds) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for entry in &snapshot.entries {
        let id = entry.chunk.id.as_str();
        if !seen.insert(id) {
            violations.push(Violation {
                chunk_id: id.to_string(),
                reason: "duplicate chunk id".to_string(),
            });
        }
        let chars = entry.chunk.text.chars().count();
        if entry.chunk.text.trim().is_empty() {
            violations.push(Violation {
                chunk_id: id.to_string(),
                reason: "chunk text is empty".to_string(),
            });
        } else if chars > bounds.max_chars {
            violations.push(Violation {
                chunk_id: id.to_string(),
                reason: format!("chunk text is {chars} chars, bound is {}", bounds.max_chars),
            });
        }
        let dims = entry.embedding.vector.len();
        if dims != snapshot.dimensions {
            violations.push(Violation {
                chunk_id: id.to_string(),
                reason: format!(
                    "embedding has {dims} dimensions, store declares {}",
                    snapshot.dimensions
                ),
            });
        }
        if entry.embedding.model_id != snapshot.model_id {
            violations.push(Violation {
                chunk_id: id.to_string(),
                reason: format!(
                    "embedded with model '{}', store declares '{}'",
                    entry.embedding.model_id, snapshot.model_id
                ),
            });
        }
        if entry.tokens.is_empty() {
            violations.push(Violation {
                chunk_id: id.to_string(),
                reason: "entry has no lexical tokens".to_string(),
            });
        }
    }
    violations
}

/// Load the snapshot at `path` and verify it.
pub async fn verify_index_file(path: &Path, bounds: ChunkBounds) -> Result<Vec<Violation>> {
    let snapshot = IndexStore::load_snapshot(path).await?;
    Ok(verify_snapshot(&snapshot, bounds))
}
