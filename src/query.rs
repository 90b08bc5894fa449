//! Duplicate lookup for incoming bug reports.
//!
//! [`QueryService`] is built once at startup from a published artifact set
//! and shared read-only between requests. Opening it fails fast when the
//! artifacts disagree with each other or with the configured embedder, so
//! a mismatched model never produces silently meaningless scores.
//!
//! # Scoring
//!
//! | Metric | Kept when | `similarity` |
//! |--------|-----------|--------------|
//! | `l2` | `distance < distance_threshold` | `1 - distance` |
//! | `inner_product` | `score > similarity_threshold` | `score` |
//!
//! Matches keep the index's best-first order.

use anyhow::Result;
use std::sync::Arc;

use crate::artifacts::{self, ArtifactPaths, Manifest};
use crate::config::{Config, RetrievalConfig};
use crate::embedding::{self, Embedder};
use crate::error::DedupError;
use crate::index::{Neighbor, VectorIndex};
use crate::models::{BugReport, Issue, Match, Metric};

pub struct QueryService {
    embedder: Arc<dyn Embedder>,
    index: VectorIndex,
    metadata: Vec<Issue>,
    max_tokens: usize,
    retrieval: RetrievalConfig,
}

impl QueryService {
    /// Load the artifact set in `config.artifacts.dir` and verify it can be
    /// served with `embedder`.
    pub fn open(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self, DedupError> {
        let paths = ArtifactPaths::new(&config.artifacts.dir);
        let manifest = artifacts::load_manifest(&paths.manifest())?;
        let index = VectorIndex::load(&paths.index())?;
        let metadata = artifacts::load_metadata(&paths.metadata())?;

        check_manifest(&manifest, &index)?;

        let service = Self::from_parts(
            index,
            metadata,
            embedder,
            config.chunking.max_tokens,
            config.retrieval.clone(),
        )?;

        if manifest.max_tokens != config.chunking.max_tokens {
            return Err(DedupError::ChunkingMismatch {
                index_max_tokens: manifest.max_tokens,
                configured_max_tokens: config.chunking.max_tokens,
            });
        }

        tracing::info!(
            issues = service.len(),
            model = %manifest.model,
            metric = %manifest.metric,
            "query service ready"
        );
        Ok(service)
    }

    /// Assemble a service from already loaded parts.
    pub fn from_parts(
        index: VectorIndex,
        metadata: Vec<Issue>,
        embedder: Arc<dyn Embedder>,
        max_tokens: usize,
        retrieval: RetrievalConfig,
    ) -> Result<Self, DedupError> {
        if metadata.len() != index.len() {
            return Err(DedupError::ArtifactConsistency {
                metadata: metadata.len(),
                vectors: index.len(),
            });
        }
        if embedder.model_name() != index.model_name() {
            return Err(DedupError::ModelMismatch {
                index_model: index.model_name().to_string(),
                embedder_model: embedder.model_name().to_string(),
            });
        }
        if embedder.dims() != index.dims() {
            return Err(DedupError::DimensionMismatch {
                expected: index.dims(),
                actual: embedder.dims(),
            });
        }

        Ok(Self {
            embedder,
            index,
            metadata,
            max_tokens,
            retrieval,
        })
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn metric(&self) -> Metric {
        self.index.metric()
    }

    /// Find likely duplicates of `report` using the configured `k`.
    pub async fn search(&self, report: &BugReport) -> Result<Vec<Match>, DedupError> {
        self.search_k(report, self.retrieval.k).await
    }

    /// Find likely duplicates of `report` among the `k` nearest issues.
    ///
    /// `k` is clamped to `[1, corpus size]`.
    pub async fn search_k(&self, report: &BugReport, k: usize) -> Result<Vec<Match>, DedupError> {
        let vector =
            embedding::embed_pooled(self.embedder.as_ref(), &report.combined_text(), self.max_tokens)
                .await?;

        let k = k.max(1).min(self.index.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let neighbors = self.index.search(&vector, k)?;
        let metric = self.index.metric();
        let matches = score_candidates(
            &neighbors,
            &self.metadata,
            metric,
            self.retrieval.threshold_for(metric),
        );

        tracing::debug!(
            candidates = neighbors.len(),
            matches = matches.len(),
            "search complete"
        );
        Ok(matches)
    }
}

/// The manifest must describe the index it was written with.
fn check_manifest(manifest: &Manifest, index: &VectorIndex) -> Result<(), DedupError> {
    if manifest.model != index.model_name()
        || manifest.dims != index.dims()
        || manifest.metric != index.metric()
        || manifest.count != index.len()
    {
        return Err(DedupError::IndexLoad(format!(
            "manifest ({} {}d {} n={}) does not describe index ({} {}d {} n={})",
            manifest.model,
            manifest.dims,
            manifest.metric,
            manifest.count,
            index.model_name(),
            index.dims(),
            index.metric(),
            index.len()
        )));
    }
    Ok(())
}

/// Whether a raw score counts as a duplicate candidate.
pub fn passes_threshold(metric: Metric, score: f32, threshold: f32) -> bool {
    match metric {
        Metric::L2 => score < threshold,
        Metric::InnerProduct => score > threshold,
    }
}

/// Map a raw score onto a higher-is-better similarity.
pub fn display_similarity(metric: Metric, score: f32) -> f32 {
    match metric {
        Metric::L2 => 1.0 - score,
        Metric::InnerProduct => score,
    }
}

/// Turn raw neighbors into thresholded matches, preserving order.
///
/// Positions outside `metadata` are skipped.
pub fn score_candidates(
    neighbors: &[Neighbor],
    metadata: &[Issue],
    metric: Metric,
    threshold: f32,
) -> Vec<Match> {
    neighbors
        .iter()
        .filter_map(|n| {
            let Some(issue) = metadata.get(n.position) else {
                tracing::warn!(position = n.position, "index position beyond metadata, skipping");
                return None;
            };
            if !passes_threshold(metric, n.score, threshold) {
                return None;
            }
            Some(Match {
                issue: issue.clone(),
                score: n.score,
                similarity: display_similarity(metric, n.score),
                metric,
            })
        })
        .collect()
}

/// CLI entry point: one-shot search, printed as text or JSON.
pub async fn run_search(
    config: &Config,
    summary: &str,
    description: &str,
    k: Option<usize>,
    json: bool,
) -> Result<()> {
    let embedder = embedding::create_embedder(&config.embedding)?;
    let service = QueryService::open(config, embedder)?;
    let report = BugReport {
        summary: summary.to_string(),
        description: description.to_string(),
    };
    let matches = service
        .search_k(&report, k.unwrap_or(config.retrieval.k))
        .await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "matches": matches }))?
        );
        return Ok(());
    }

    if matches.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, m) in matches.iter().enumerate() {
        println!(
            "{}. [{:.2}%] {}  {}",
            i + 1,
            m.similarity * 100.0,
            m.issue.id,
            m.issue.summary
        );
        println!("    {}: {:.4}", m.metric, m.score);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;

    fn issues(n: usize) -> Vec<Issue> {
        (0..n)
            .map(|i| Issue {
                id: format!("I-{}", i),
                summary: format!("summary {}", i),
                description: String::new(),
            })
            .collect()
    }

    #[test]
    fn test_threshold_direction() {
        assert!(passes_threshold(Metric::L2, 0.4, 1.0));
        assert!(!passes_threshold(Metric::L2, 1.0, 1.0));
        assert!(!passes_threshold(Metric::L2, 1.7, 1.0));
        assert!(passes_threshold(Metric::InnerProduct, 0.8, 0.5));
        assert!(!passes_threshold(Metric::InnerProduct, 0.5, 0.5));
        assert!(!passes_threshold(Metric::InnerProduct, 0.1, 0.5));
    }

    #[test]
    fn test_display_similarity() {
        assert!((display_similarity(Metric::L2, 0.25) - 0.75).abs() < 1e-6);
        assert_eq!(display_similarity(Metric::InnerProduct, 0.6), 0.6);
    }

    #[test]
    fn test_score_candidates_filters_and_keeps_order() {
        let meta = issues(3);
        let neighbors = vec![
            Neighbor { score: 0.9, position: 2 },
            Neighbor { score: 0.7, position: 0 },
            Neighbor { score: 0.3, position: 1 },
        ];
        let matches = score_candidates(&neighbors, &meta, Metric::InnerProduct, 0.5);
        let ids: Vec<&str> = matches.iter().map(|m| m.issue.id.as_str()).collect();
        assert_eq!(ids, vec!["I-2", "I-0"]);
    }

    #[test]
    fn test_score_candidates_skips_out_of_range_positions() {
        let meta = issues(1);
        let neighbors = vec![
            Neighbor { score: 0.1, position: 5 },
            Neighbor { score: 0.2, position: 0 },
        ];
        let matches = score_candidates(&neighbors, &meta, Metric::L2, 1.0);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].issue.id, "I-0");
        assert!((matches[0].similarity - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_from_parts_rejects_length_mismatch() {
        let embedder = Arc::new(HashEmbedder::new(4));
        let index = VectorIndex::build(
            &[vec![1.0, 0.0, 0.0, 0.0]],
            Metric::InnerProduct,
            embedder.model_name(),
            4,
        )
        .unwrap();
        let err = QueryService::from_parts(
            index,
            issues(2),
            embedder,
            200,
            RetrievalConfig::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            DedupError::ArtifactConsistency {
                metadata: 2,
                vectors: 1
            }
        ));
    }

    #[test]
    fn test_from_parts_rejects_other_model() {
        let index = VectorIndex::build(&[vec![1.0; 4]], Metric::L2, "all-minilm-l6-v2", 4).unwrap();
        let err = QueryService::from_parts(
            index,
            issues(1),
            Arc::new(HashEmbedder::new(4)),
            200,
            RetrievalConfig::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, DedupError::ModelMismatch { .. }));
    }

    #[tokio::test]
    async fn test_empty_corpus_returns_no_matches() {
        let embedder = Arc::new(HashEmbedder::new(8));
        let index =
            VectorIndex::build(&[], Metric::InnerProduct, embedder.model_name(), 8).unwrap();
        let service =
            QueryService::from_parts(index, Vec::new(), embedder, 200, RetrievalConfig::default())
                .unwrap();
        let report = BugReport {
            summary: "anything".into(),
            description: "at all".into(),
        };
        assert!(service.search(&report).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_report_rejected() {
        let embedder = Arc::new(HashEmbedder::new(8));
        let index =
            VectorIndex::build(&[vec![1.0; 8]], Metric::InnerProduct, embedder.model_name(), 8)
                .unwrap();
        let service =
            QueryService::from_parts(index, issues(1), embedder, 200, RetrievalConfig::default())
                .unwrap();
        let report = BugReport {
            summary: String::new(),
            description: " ".into(),
        };
        assert!(matches!(
            service.search(&report).await,
            Err(DedupError::EmptyInput)
        ));
    }
}
