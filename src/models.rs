//! Core data models used throughout the dedup pipeline.
//!
//! These types represent the issue records that are ingested, the bug
//! reports that are queried, and the matches handed back to callers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An issue from the corpus. `id` is the stable identity used by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub summary: String,
    pub description: String,
}

impl Issue {
    /// Text that gets chunked and embedded: `summary + " " + description`.
    pub fn combined_text(&self) -> String {
        combine(&self.summary, &self.description)
    }
}

/// An incoming report to check for duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BugReport {
    pub summary: String,
    pub description: String,
}

impl BugReport {
    pub fn combined_text(&self) -> String {
        combine(&self.summary, &self.description)
    }
}

fn combine(summary: &str, description: &str) -> String {
    format!("{} {}", summary, description)
}

/// Scoring metric an index was built with.
///
/// The direction differs: L2 distances are better when lower, inner-product
/// similarities are better when higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Squared Euclidean distance over raw vectors.
    L2,
    /// Inner product over L2-normalized vectors (cosine similarity).
    #[default]
    InnerProduct,
}

impl Metric {
    /// Whether a higher raw score means a closer match.
    pub fn higher_is_better(self) -> bool {
        matches!(self, Metric::InnerProduct)
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            Metric::L2 => 0,
            Metric::InnerProduct => 1,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Metric::L2),
            1 => Some(Metric::InnerProduct),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::L2 => write!(f, "l2"),
            Metric::InnerProduct => write!(f, "inner_product"),
        }
    }
}

/// A corpus issue judged similar to a report.
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    pub issue: Issue,
    /// Raw index score: a distance for L2, a similarity for inner product.
    #[serde(rename = "similarity_or_distance")]
    pub score: f32,
    /// Higher-is-better similarity derived from `score`.
    pub similarity: f32,
    pub metric: Metric,
}
