//! Unified error type for the ingestion and retrieval pipeline.

use thiserror::Error;

/// All errors surfaced by pipeline operations.
///
/// Transient forge failures are NOT represented here: the forge client
/// returns `None` for those and collectors treat it as end-of-pagination
/// (see `forge::ForgeClient::request`).
#[derive(Error, Debug)]
pub enum ForagerError {
    /// I/O error (blob writes, index artifacts, query log)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Document store error
    #[error("Document store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Document (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Index artifact (de)serialization error (bincode)
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A vector index artifact is missing on disk
    #[error("Index not found for '{repo}/{index_name}'. Build one first:\n  forager build-index --repo {repo} --collections {index_name}")]
    IndexNotFound { repo: String, index_name: String },

    /// Query issued before any index was loaded
    #[error("Vector index not loaded. Call load_index() or build_index() first.")]
    IndexNotLoaded,

    /// Failed to load an index artifact from disk
    #[error("Failed to load index from {path}: {message}")]
    IndexLoad { path: String, message: String },

    /// Invalid build_index mode (collection count vs. global flag)
    #[error("Invalid index mode: {0}")]
    InvalidIndexMode(String),

    /// Unknown backend name passed to a factory
    #[error("Unknown {kind} backend: '{name}'")]
    UnknownBackend { kind: &'static str, name: String },

    /// Query recorder asked for a format it does not implement
    #[error("Unsupported query log format: '{0}' (only jsonl is supported)")]
    UnsupportedLogFormat(String),

    /// Mutually exclusive flags or other argument validation error
    #[error("{0}")]
    InvalidArgs(String),

    /// LLM backend failure while generating an answer
    #[error("LLM backend error: {0}")]
    Llm(String),
}
