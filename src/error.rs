//! Error kinds surfaced by the embedding and retrieval core.
//!
//! Orchestration code (ingest runs, CLI commands) works in `anyhow::Result`
//! and picks these up through `?`. The query path keeps them typed so the
//! HTTP boundary can map each kind to a status code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    /// Chunking or embedding was handed text with nothing in it.
    #[error("input text must not be empty")]
    EmptyInput,

    /// A vector's dimension disagrees with the index (usually a model mismatch).
    #[error("dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The query embedder is not the model the index was built with.
    #[error("model mismatch: index built with '{index_model}', embedder is '{embedder_model}'")]
    ModelMismatch {
        index_model: String,
        embedder_model: String,
    },

    /// Query-side chunk budget differs from the one used at ingest.
    #[error(
        "chunking mismatch: index built with max_tokens={index_max_tokens}, configured {configured_max_tokens}"
    )]
    ChunkingMismatch {
        index_max_tokens: usize,
        configured_max_tokens: usize,
    },

    /// A persisted artifact is missing, truncated, or not in the expected format.
    #[error("failed to load index artifacts: {0}")]
    IndexLoad(String),

    /// Metadata and index disagree on how many issues there are.
    #[error("artifact mismatch: metadata has {metadata} issues, index has {vectors} vectors")]
    ArtifactConsistency { metadata: usize, vectors: usize },

    /// The embedding backend failed.
    #[error("embedding failed: {0}")]
    Embedding(String),
}

impl DedupError {
    pub(crate) fn embedding(err: anyhow::Error) -> Self {
        DedupError::Embedding(format!("{:#}", err))
    }
}
