//! Embedding backends and pooled document embeddings.
//!
//! Defines the [`Embedder`] capability every backend implements, and the two
//! operations the rest of the pipeline uses:
//! - [`embed_one`]: embed a single string as-is.
//! - [`embed_pooled`]: chunk a long string with [`chunk_text`], embed every
//!   chunk, and average the chunk vectors per dimension.
//!
//! Backends:
//! - **`local`**: `LocalEmbedder`, ONNX models through fastembed
//!   (feature `local-embeddings`). No network after the first model download.
//! - **`openai`**: [`OpenAIEmbedder`], `POST /v1/embeddings` with retry.
//! - **`ollama`**: [`OllamaEmbedder`], `POST /api/embed` on a local Ollama.
//! - **`hash`**: [`HashEmbedder`], deterministic feature hashing; offline.
//!
//! Use [`create_embedder`] to build the backend named in the configuration.
//!
//! ```rust
//! # use issue_dedup::config::EmbeddingConfig;
//! # use issue_dedup::embedding::create_embedder;
//! let config = EmbeddingConfig {
//!     provider: "hash".to_string(),
//!     ..EmbeddingConfig::default()
//! };
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.dims(), 384);
//! ```

mod hash;
#[cfg(feature = "local-embeddings")]
mod local;
mod remote;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::chunk::chunk_text;
use crate::config::EmbeddingConfig;
use crate::error::DedupError;

pub use hash::{HashEmbedder, DEFAULT_HASH_DIMS};
#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;
pub use remote::{OllamaEmbedder, OpenAIEmbedder};

/// Model used by the `local` provider when `embedding.model` is unset.
pub const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";
/// Model used by the `ollama` provider when `embedding.model` is unset.
pub const DEFAULT_OLLAMA_MODEL: &str = "nomic-embed-text";

/// An embedding model: text in, fixed-dimension vector out.
///
/// Implementations must return exactly one vector per input text, in input
/// order, each of length [`dims`](Embedder::dims).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded with every index built from this embedder.
    fn model_name(&self) -> &str;
    /// Vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single text without chunking.
pub async fn embed_one(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, DedupError> {
    if text.trim().is_empty() {
        return Err(DedupError::EmptyInput);
    }
    let vectors = embed_checked(embedder, &[text.to_string()]).await?;
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| DedupError::Embedding("empty embedding response".to_string()))
}

/// Chunk `text`, embed each chunk and mean-pool the results.
///
/// Every chunk weighs the same regardless of its length. Text that yields no
/// chunks is rejected with [`DedupError::EmptyInput`] before the backend is
/// called.
pub async fn embed_pooled(
    embedder: &dyn Embedder,
    text: &str,
    max_tokens: usize,
) -> Result<Vec<f32>, DedupError> {
    let chunks = chunk_text(text, max_tokens);
    if chunks.is_empty() {
        return Err(DedupError::EmptyInput);
    }
    tracing::debug!(chunks = chunks.len(), "embedding pooled text");
    let vectors = embed_checked(embedder, &chunks).await?;
    Ok(mean_pool(&vectors))
}

/// Call the backend and verify vector count and dimension.
async fn embed_checked(
    embedder: &dyn Embedder,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, DedupError> {
    let vectors = embedder
        .embed(texts)
        .await
        .map_err(DedupError::embedding)?;

    if vectors.len() != texts.len() {
        return Err(DedupError::Embedding(format!(
            "expected {} vectors, backend returned {}",
            texts.len(),
            vectors.len()
        )));
    }

    let expected = embedder.dims();
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        return Err(DedupError::DimensionMismatch {
            expected,
            actual: bad.len(),
        });
    }

    Ok(vectors)
}

/// Per-dimension arithmetic mean of equally sized vectors.
///
/// Returns an empty vector for empty input.
pub fn mean_pool(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let mut sum = vec![0f32; first.len()];
    for v in vectors {
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    for x in &mut sum {
        *x /= n;
    }
    sum
}

/// Scale a vector to unit L2 norm. Near-zero vectors are returned unchanged.
pub fn normalize_l2(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Encode a float vector as little-endian `f32` bytes.
///
/// ```rust
/// use issue_dedup::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes. Trailing bytes that do not form a
/// whole `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Create the [`Embedder`] named by `config.provider`.
///
/// | Config Value | Backend |
/// |-------------|----------|
/// | `"local"` | `LocalEmbedder` (requires feature `local-embeddings`) |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"hash"` | [`HashEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!(
            "Local embedding provider requires building with --features local-embeddings"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// The model name the configured provider will report, without building it.
///
/// `None` only when the provider has no default and `embedding.model` is unset.
pub fn configured_model_name(config: &EmbeddingConfig) -> Option<String> {
    match config.provider.as_str() {
        "hash" => Some(HashEmbedder::model_name_for(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        )),
        "local" => Some(
            config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string()),
        ),
        "ollama" => Some(
            config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
        ),
        _ => config.model.clone(),
    }
}
