//! Deterministic feature-hashing embedder.
//!
//! Every lowercased alphanumeric token is hashed with SHA-256 into one of
//! `dims` buckets with a ±1 sign, and the bucket counts are L2-normalized.
//! Texts sharing words land close together; there is no notion of synonyms.
//! Needs no model files or network, which makes it the backend for smoke
//! tests and demos.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{normalize_l2, Embedder};

pub const DEFAULT_HASH_DIMS: usize = 384;

pub struct HashEmbedder {
    model_name: String,
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            model_name: Self::model_name_for(dims),
            dims,
        }
    }

    /// Model identifier for a hash embedder of `dims` dimensions.
    pub fn model_name_for(dims: usize) -> String {
        format!("feature-hash-{}", dims)
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dims];
        for token in tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        normalize_l2(v)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
