//! Data types for source documents, chunks, index entries, and results.

use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The language of a document or chunk.
///
/// The content base is bilingual: English, Traditional Chinese, or both
/// interleaved (the common pattern of an English passage followed by its
/// Chinese translation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    /// English.
    #[serde(rename = "en")]
    En,
    /// Traditional Chinese.
    #[serde(rename = "zh-Hant")]
    ZhHant,
    /// English and Chinese interleaved in the same span.
    #[serde(rename = "mixed")]
    Mixed,
}

impl Language {
    /// The canonical tag string for this language.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::ZhHant => "zh-Hant",
            Language::Mixed => "mixed",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source document produced by the loader.
///
/// One physical file may yield several `SourceDocument`s when it bundles
/// related documents behind an explicit separator. Immutable once loaded;
/// recreated on each ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDocument {
    /// Unique identifier: the path relative to the content root, with a
    /// `#n` suffix when the file contained multiple documents.
    pub id: String,
    /// The raw markdown text.
    pub text: String,
    /// Detected language of the whole document.
    pub language: Language,
    /// Category tag, e.g. `preoperative`, `postoperative`, `complications`.
    pub category: String,
    /// Source institution, from front matter when present.
    pub source: String,
    /// Last-updated date, from front matter when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<NaiveDate>,
    /// The file this document was loaded from.
    pub path: PathBuf,
}

/// A retrieval-sized span of text derived from one [`SourceDocument`].
///
/// Holds a back-reference to its document by id only; a chunk does not own
/// its document. Provenance fields are denormalized onto the chunk so the
/// index can serve citations without the document tree present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Stable identifier: `{document_id}::{ordinal:04}`. Stable across
    /// re-ingestion of unchanged content, which makes upserts idempotent.
    pub id: String,
    /// The text span. Raw document text: heading context lives in
    /// `heading_path`, never prepended here, so chunks concatenated in
    /// ordinal order (overlap prefixes removed) reconstruct the document.
    pub text: String,
    /// Language tag for this span.
    pub language: Language,
    /// Heading hierarchy above this span within the source document.
    pub heading_path: Vec<String>,
    /// Position of this chunk within its document.
    pub ordinal: usize,
    /// Byte length of the prefix of `text` repeated from the previous
    /// chunk for context continuity. Zero for the first chunk of a unit.
    pub overlap: usize,
    /// Id of the parent [`SourceDocument`].
    pub document_id: String,
    /// Category inherited from the document.
    pub category: String,
    /// Source institution inherited from the document.
    pub source: String,
    /// Last-updated date inherited from the document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<NaiveDate>,
}

/// A vector embedding owned by exactly one [`Chunk`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRecord {
    /// The fixed-dimension embedding vector.
    pub vector: Vec<f32>,
    /// Identifier of the model that produced the vector. All records in
    /// one index generation share the same model id and dimensionality.
    pub model_id: String,
}

/// The persisted unit of the index: a chunk, its embedding, and the
/// lexical tokens used for keyword search.
///
/// Created during ingestion; replaced wholesale on reset or upserted by
/// chunk id; never partially updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    /// The chunk.
    pub chunk: Chunk,
    /// The chunk's embedding.
    pub embedding: EmbeddingRecord,
    /// Lexical tokens of the chunk text.
    pub tokens: Vec<String>,
}

/// A user query. Ephemeral; never persisted by the pipeline.
#[derive(Debug, Clone)]
pub struct Query {
    /// The question text.
    pub text: String,
    /// Optional language hint used as a ranking tie-break.
    pub language_hint: Option<Language>,
    /// Number of results requested.
    pub top_k: usize,
}

impl Query {
    /// Create a query with no language hint.
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self { text: text.into(), language_hint: None, top_k }
    }

    /// Set the language hint.
    pub fn with_language_hint(mut self, hint: Language) -> Self {
        self.language_hint = Some(hint);
        self
    }
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The relevance score (higher is more relevant).
    pub score: f32,
}

/// How a query was answered.
///
/// Callers always learn when a result list is degraded; the pipeline
/// never returns a silently partial answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrievalStatus {
    /// Hybrid search and reranking both ran.
    Full,
    /// Query embedding was unavailable; results come from lexical search
    /// alone.
    LexicalOnly,
    /// The reranker was unavailable; results are in hybrid merge order.
    Unreranked,
}

/// The ordered, bounded answer to a [`Query`]. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Results ordered by descending relevance, at most `top_k` of them.
    pub results: Vec<ScoredChunk>,
    /// Whether and how the result list is degraded.
    pub status: RetrievalStatus,
}
