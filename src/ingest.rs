//! Ingestion pipeline orchestration.
//!
//! Coordinates a full rebuild: corpus → (cached or fresh) pooled embedding
//! per issue → embedding matrix → [`VectorIndex`] → atomic publication of
//! the artifact set. Runs against one artifact directory are serialized by
//! an [`IngestLock`].
//!
//! Cached embeddings are reused only when the previous set was built with
//! the same model, dimension and chunk budget; otherwise the cache starts
//! empty and every issue is re-embedded.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;

use crate::artifacts::{self, ArtifactPaths, ArtifactSet, IngestLock, Manifest};
use crate::cache::EmbeddingCache;
use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::index::VectorIndex;
use crate::models::{Issue, Metric};

/// Outcome of one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub issues: usize,
    pub cache_hits: usize,
    pub embedded: usize,
    pub model: String,
    pub dims: usize,
    pub metric: Metric,
}

/// CLI entry point: read a JSON corpus file, ingest it, print a summary.
pub async fn run_ingest(config: &Config, corpus_path: &Path) -> Result<()> {
    let corpus = load_corpus(corpus_path)?;
    let embedder = embedding::create_embedder(&config.embedding)?;
    let report = ingest(config, embedder.as_ref(), &corpus).await?;

    println!("ingest {}", corpus_path.display());
    println!("  issues: {}", report.issues);
    println!("  cache hits: {}", report.cache_hits);
    println!("  embedded: {}", report.embedded);
    println!("  model: {} ({} dims)", report.model, report.dims);
    println!("  metric: {}", report.metric);
    println!("  artifacts: {}", config.artifacts.dir.display());
    println!("ok");
    Ok(())
}

/// Read a JSON array of issues.
pub fn load_corpus(path: &Path) -> Result<Vec<Issue>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse corpus (expected a JSON array of issues): {}", path.display()))
}

/// Embed `corpus` and publish a fresh artifact set to `config.artifacts.dir`.
///
/// Row `i` of the matrix, position `i` of the index and `issues.json[i]`
/// all refer to `corpus[i]`.
pub async fn ingest(
    config: &Config,
    embedder: &dyn Embedder,
    corpus: &[Issue],
) -> Result<IngestReport> {
    let dir = &config.artifacts.dir;
    let _lock = IngestLock::acquire(dir)?;

    check_unique_ids(corpus)?;

    let paths = ArtifactPaths::new(dir);
    let max_tokens = config.chunking.max_tokens;
    let metric = config.index.metric;
    let model = embedder.model_name().to_string();
    let dims = embedder.dims();

    let mut cache = load_reusable_cache(&paths, &model, dims, max_tokens)?;

    tracing::info!(issues = corpus.len(), model = %model, %metric, "ingesting corpus");

    let mut matrix = Vec::with_capacity(corpus.len());
    let mut cache_hits = 0usize;
    let mut embedded = 0usize;

    for issue in corpus {
        if let Some(cached) = cache.get(issue) {
            matrix.push(cached.to_vec());
            cache_hits += 1;
            continue;
        }

        let vector = embedding::embed_pooled(embedder, &issue.combined_text(), max_tokens)
            .await
            .with_context(|| format!("Failed to embed issue {}", issue.id))?;
        tracing::debug!(id = %issue.id, "embedded issue");
        cache.put(issue, vector.clone());
        matrix.push(vector);
        embedded += 1;
    }

    let index = VectorIndex::build(&matrix, metric, &model, dims)?;
    let manifest = Manifest {
        model: model.clone(),
        dims,
        metric,
        max_tokens,
        count: corpus.len(),
        built_at: Utc::now(),
    };

    artifacts::publish(
        dir,
        &ArtifactSet {
            manifest: &manifest,
            index: &index,
            matrix: &matrix,
            metadata: corpus,
            cache: &cache,
        },
    )?;

    tracing::info!(cache_hits, embedded, "ingestion complete");

    Ok(IngestReport {
        issues: corpus.len(),
        cache_hits,
        embedded,
        model,
        dims,
        metric,
    })
}

fn check_unique_ids(corpus: &[Issue]) -> Result<()> {
    let mut seen = HashSet::with_capacity(corpus.len());
    for issue in corpus {
        if !seen.insert(issue.id.as_str()) {
            bail!("duplicate issue id in corpus: {}", issue.id);
        }
    }
    Ok(())
}

/// The previous run's cache, or an empty one when it was built with a
/// different model, dimension or chunk budget.
fn load_reusable_cache(
    paths: &ArtifactPaths,
    model: &str,
    dims: usize,
    max_tokens: usize,
) -> Result<EmbeddingCache> {
    let manifest_path = paths.manifest();
    if !manifest_path.exists() {
        return EmbeddingCache::load(&paths.cache());
    }

    let previous = artifacts::load_manifest(&manifest_path)?;
    if previous.model != model || previous.dims != dims || previous.max_tokens != max_tokens {
        tracing::warn!(
            previous_model = %previous.model,
            previous_dims = previous.dims,
            previous_max_tokens = previous.max_tokens,
            "embedding settings changed since last run, discarding cache"
        );
        return Ok(EmbeddingCache::new());
    }

    EmbeddingCache::load(&paths.cache())
}
