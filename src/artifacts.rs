//! The persisted artifact set and how it is published.
//!
//! One ingestion run produces, inside `artifacts.dir`:
//!
//! | File | Contents |
//! |------|----------|
//! | `index.bin` | [`VectorIndex`] with metric, model and dims |
//! | `embeddings.bin` | N×D embedding matrix, row `i` ↔ `issues.json[i]` |
//! | `issues.json` | metadata: the corpus, in ingestion order |
//! | `embedding_cache.json` | [`EmbeddingCache`] carried to the next run |
//! | `manifest.json` | [`Manifest`]: what the set was built with |
//!
//! Index positions and metadata positions are only meaningful together, so
//! the set is never updated in place. [`publish`] writes every file into a
//! fresh staging directory and then swaps it in with directory renames; a
//! run that fails part way leaves the previous set untouched.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::cache::EmbeddingCache;
use crate::error::DedupError;
use crate::index::{write_matrix, VectorIndex};
use crate::models::{Issue, Metric};

pub const INDEX_FILE: &str = "index.bin";
pub const MATRIX_FILE: &str = "embeddings.bin";
pub const METADATA_FILE: &str = "issues.json";
pub const CACHE_FILE: &str = "embedding_cache.json";
pub const MANIFEST_FILE: &str = "manifest.json";

/// What an artifact set was built with. The query side compares this
/// against its own embedder and chunking settings before serving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub model: String,
    pub dims: usize,
    pub metric: Metric,
    pub max_tokens: usize,
    pub count: usize,
    pub built_at: DateTime<Utc>,
}

/// File locations inside an artifact directory.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    dir: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
    pub fn index(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }
    pub fn matrix(&self) -> PathBuf {
        self.dir.join(MATRIX_FILE)
    }
    pub fn metadata(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }
    pub fn cache(&self) -> PathBuf {
        self.dir.join(CACHE_FILE)
    }
    pub fn manifest(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }
}

pub fn load_manifest(path: &Path) -> Result<Manifest, DedupError> {
    let content = fs::read_to_string(path)
        .map_err(|e| DedupError::IndexLoad(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| DedupError::IndexLoad(format!("{}: {}", path.display(), e)))
}

pub fn load_metadata(path: &Path) -> Result<Vec<Issue>, DedupError> {
    let content = fs::read_to_string(path)
        .map_err(|e| DedupError::IndexLoad(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| DedupError::IndexLoad(format!("{}: {}", path.display(), e)))
}

/// Everything one ingestion run persists.
pub struct ArtifactSet<'a> {
    pub manifest: &'a Manifest,
    pub index: &'a VectorIndex,
    pub matrix: &'a [Vec<f32>],
    pub metadata: &'a [Issue],
    pub cache: &'a EmbeddingCache,
}

impl ArtifactSet<'_> {
    fn write_into(&self, dir: &Path) -> Result<()> {
        let paths = ArtifactPaths::new(dir);
        self.index.save(&paths.index())?;
        write_matrix(&paths.matrix(), self.index.dims(), self.matrix)?;
        fs::write(
            paths.metadata(),
            serde_json::to_string_pretty(self.metadata)?,
        )
        .context("Failed to write issue metadata")?;
        self.cache.save(&paths.cache())?;
        fs::write(
            paths.manifest(),
            serde_json::to_string_pretty(self.manifest)?,
        )
        .context("Failed to write manifest")?;
        Ok(())
    }
}

/// Write `set` to `dir`, replacing any previous set as a unit.
pub fn publish(dir: &Path, set: &ArtifactSet<'_>) -> Result<()> {
    let (parent, name) = split_dir(dir)?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(&parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let staging =
        StagingDir::create(parent.join(format!(".{}.staging-{}", name, Uuid::new_v4())))?;
    set.write_into(staging.path())?;

    if dir.exists() {
        let retired = parent.join(format!(".{}.old-{}", name, Uuid::new_v4()));
        fs::rename(dir, &retired)
            .with_context(|| format!("Failed to move aside {}", dir.display()))?;
        if let Err(e) = fs::rename(staging.path(), dir) {
            // Put the previous set back before reporting.
            let _ = fs::rename(&retired, dir);
            return Err(e).with_context(|| format!("Failed to publish {}", dir.display()));
        }
        staging.keep();
        if let Err(e) = fs::remove_dir_all(&retired) {
            tracing::warn!(path = %retired.display(), error = %e, "could not remove previous artifact set");
        }
    } else {
        fs::rename(staging.path(), dir)
            .with_context(|| format!("Failed to publish {}", dir.display()))?;
        staging.keep();
    }

    tracing::debug!(dir = %dir.display(), "artifact set published");
    Ok(())
}

/// A freshly created staging directory, removed on drop unless kept.
struct StagingDir {
    path: PathBuf,
    keep: bool,
}

impl StagingDir {
    fn create(path: PathBuf) -> Result<Self> {
        fs::create_dir(&path)
            .with_context(|| format!("Failed to create staging dir {}", path.display()))?;
        Ok(Self { path, keep: false })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// The directory has been renamed into place; leave it alone.
    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

fn split_dir(dir: &Path) -> Result<(PathBuf, String)> {
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "artifacts.dir must name a directory, got '{}'",
                dir.display()
            )
        })?
        .to_string();
    let parent = dir.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok((parent, name))
}

/// Exclusive marker for an ingestion run against one artifact directory.
///
/// Held for the lifetime of the value; the lock file is removed on drop.
pub struct IngestLock {
    path: PathBuf,
}

impl IngestLock {
    pub fn acquire(dir: &Path) -> Result<Self> {
        let (parent, name) = split_dir(dir)?;
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(&parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let path = parent.join(format!("{}.lock", name));

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => bail!(
                "another ingestion run holds {} (remove it if no run is in progress)",
                path.display()
            ),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", path.display()))
            }
        };
        writeln!(file, "{}", std::process::id())?;

        Ok(Self { path })
    }
}

impl Drop for IngestLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
