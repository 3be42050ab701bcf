//! Error types for the `carekb-retrieval` crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the retrieval pipeline.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// A source file could not be read or decoded. The loader skips the
    /// file and continues; the path is reported in the ingestion summary.
    #[error("Load error ({path}): {message}")]
    Load {
        /// The offending file.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the index store.
    #[error("Index store error: {0}")]
    Store(String),

    /// An index rebuild failed before the generation swap. The previously
    /// serving index remains intact and queryable.
    #[error("Index reset failed: {0}")]
    ResetFailed(String),

    /// A query exceeded the configured timeout.
    #[error("Retrieval timed out after {timeout_ms} ms")]
    Timeout {
        /// The configured timeout that was exceeded.
        timeout_ms: u64,
    },

    /// The reranking model was unavailable. The caller receives the
    /// hybrid order unmodified.
    #[error("Reranker unavailable ({reranker}): {message}")]
    RerankUnavailable {
        /// The reranker that produced the error.
        reranker: String,
        /// A description of the failure.
        message: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A convenience result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;
