//! # Issue Dedup
//!
//! Semantic duplicate detection for bug reports.
//!
//! An offline ingest step embeds a corpus of existing issues and publishes a
//! vector index next to the issue metadata. An online query step embeds an
//! incoming report the same way, finds its nearest neighbors, and returns
//! the ones that clear a similarity threshold.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │  Corpus    │──▶│ Chunk+Embed  │──▶│  Artifact set    │
//! │ issues.json│   │ (hash cache) │   │ index + metadata │
//! └────────────┘   └──────────────┘   └────────┬─────────┘
//!                                              │
//!                         ┌────────────────────┤
//!                         ▼                    ▼
//!                    ┌──────────┐        ┌──────────┐
//!                    │   CLI    │        │   HTTP   │
//!                    │ (dedup)  │        │ /search  │
//!                    └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dedup ingest --corpus data/sample_issues.json
//! dedup search --summary "Login fails" --description "Google sign-in crashes"
//! dedup serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Issues, reports, matches, metrics |
//! | [`error`] | Typed pipeline errors |
//! | [`chunk`] | Sentence-boundary chunking |
//! | [`cache`] | Content-hash embedding cache |
//! | [`embedding`] | Embedding backends and mean pooling |
//! | [`index`] | Exact nearest-neighbor index |
//! | [`artifacts`] | Artifact layout and atomic publication |
//! | [`ingest`] | Offline corpus ingest |
//! | [`query`] | Duplicate lookup |
//! | [`server`] | HTTP server |
//! | [`stats`] | Artifact health overview |

pub mod artifacts;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod models;
pub mod query;
pub mod server;
pub mod stats;
