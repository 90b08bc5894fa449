//! Content-hash keyed embedding cache.
//!
//! Maps an issue id to the pooled embedding computed for it together with a
//! SHA-256 of the issue's `summary + description`. An entry is reused only
//! while that hash still matches, so any edit to either field forces a fresh
//! embedding on the next ingestion run.
//!
//! Entries are never evicted. Ids that disappear from the corpus leave stale
//! entries behind; they are never read.
//!
//! Persisted as a JSON object `{ "<id>": { "hash": "<hex>", "embedding": [..] } }`
//! with keys in sorted order, so identical content always serializes to
//! identical bytes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

use crate::models::Issue;

/// Hex SHA-256 of the raw concatenation `summary + description`.
pub fn identity_hash(issue: &Issue) -> String {
    let mut hasher = Sha256::new();
    hasher.update(issue.summary.as_bytes());
    hasher.update(issue.description.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingCache {
    entries: BTreeMap<String, CacheEntry>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a cache file. A missing file is an empty cache; an unreadable or
    /// malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read embedding cache: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse embedding cache: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write embedding cache: {}", path.display()))
    }

    /// The cached embedding for `issue`, if one exists and its content hash
    /// still matches. `None` means the caller must recompute.
    pub fn get(&self, issue: &Issue) -> Option<&[f32]> {
        let entry = self.entries.get(&issue.id)?;
        if entry.hash == identity_hash(issue) {
            Some(&entry.embedding)
        } else {
            None
        }
    }

    /// Store `embedding` for `issue` under its current hash, replacing any
    /// previous entry for the same id.
    pub fn put(&mut self, issue: &Issue, embedding: Vec<f32>) {
        self.entries.insert(
            issue.id.clone(),
            CacheEntry {
                hash: identity_hash(issue),
                embedding,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
