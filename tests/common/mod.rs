#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use issue_dedup::config::Config;
use issue_dedup::embedding::Embedder;
use issue_dedup::models::{Issue, Metric};

pub const KEYWORD_MODEL: &str = "keyword-test";

/// Three-dimensional embedder with fixed vocabulary buckets:
/// `[account words, cart words, 1.0]`.
///
/// Deterministic and independent of any model weights, so rankings in tests
/// follow directly from the words in the text.
pub struct KeywordEmbedder;

impl KeywordEmbedder {
    fn embed_text(text: &str) -> Vec<f32> {
        let mut v = vec![0.0, 0.0, 1.0];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
        {
            if token.starts_with("log") || token.starts_with("auth") || token.starts_with("sign")
            {
                v[0] += 1.0;
            } else if token.starts_with("cart") {
                v[1] += 1.0;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        KEYWORD_MODEL
    }

    fn dims(&self) -> usize {
        3
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::embed_text(t)).collect())
    }
}

pub fn issue(id: &str, summary: &str, description: &str) -> Issue {
    Issue {
        id: id.to_string(),
        summary: summary.to_string(),
        description: description.to_string(),
    }
}

/// The two-issue corpus used by the end-to-end scenarios.
pub fn login_and_cart() -> Vec<Issue> {
    vec![
        issue("A", "Login fails", "cannot log in"),
        issue("B", "Cart broken", "cart count wrong"),
    ]
}

/// Default configuration with artifacts under `root/index` and thresholds
/// open wide enough that every neighbor is returned.
pub fn open_config(root: &Path, metric: Metric) -> Config {
    let mut config = Config::minimal(root.join("index"));
    config.index.metric = metric;
    config.retrieval.similarity_threshold = -1.0;
    config.retrieval.distance_threshold = 1000.0;
    config
}
