//! Artifact statistics and health overview.
//!
//! Summarizes what the current artifact set was built with and whether its
//! pieces still agree, so a broken or stale set is spotted before the
//! server is pointed at it. Used by `dedup stats`.

use anyhow::Result;
use std::path::Path;

use crate::artifacts::{self, ArtifactPaths};
use crate::cache::EmbeddingCache;
use crate::config::Config;
use crate::embedding::configured_model_name;
use crate::index::{read_matrix, VectorIndex};

/// Run the stats command: load every artifact and print a summary.
pub fn run_stats(config: &Config) -> Result<()> {
    let paths = ArtifactPaths::new(&config.artifacts.dir);

    println!("Issue Dedup — Artifact Stats");
    println!("============================");
    println!();
    println!("  Directory:   {}", paths.dir().display());

    if !paths.manifest().exists() {
        println!();
        println!("  No artifacts yet. Run `dedup ingest --corpus <file>` first.");
        return Ok(());
    }

    let manifest = artifacts::load_manifest(&paths.manifest())?;
    println!("  Built:       {}", manifest.built_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Model:       {} ({} dims)", manifest.model, manifest.dims);
    println!("  Metric:      {}", manifest.metric);
    println!("  Chunking:    max_tokens = {}", manifest.max_tokens);
    println!("  Issues:      {}", manifest.count);

    let cache = EmbeddingCache::load(&paths.cache())?;
    println!("  Cache:       {} entries", cache.len());
    println!();

    println!("  Files:");
    for path in [
        paths.index(),
        paths.matrix(),
        paths.metadata(),
        paths.cache(),
        paths.manifest(),
    ] {
        println!(
            "    {:<24} {}",
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            format_bytes(file_size(&path))
        );
    }
    println!();

    let problems = consistency_problems(&paths, manifest.count);
    if problems.is_empty() {
        println!("  Consistency: ok");
    } else {
        println!("  Consistency: {} problem(s)", problems.len());
        for p in &problems {
            println!("    - {}", p);
        }
    }

    if let Some(model) =
        configured_model_name(&config.embedding).filter(|m| *m != manifest.model)
    {
        println!();
        println!(
            "  Warning: configured embedding model '{}' differs from the index model.",
            model
        );
    }

    Ok(())
}

/// Human-readable list of disagreements between the artifacts.
pub fn consistency_problems(paths: &ArtifactPaths, expected: usize) -> Vec<String> {
    let mut problems = Vec::new();

    match VectorIndex::load(&paths.index()) {
        Ok(index) if index.len() != expected => problems.push(format!(
            "index has {} vectors, manifest says {}",
            index.len(),
            expected
        )),
        Ok(_) => {}
        Err(e) => problems.push(e.to_string()),
    }

    match artifacts::load_metadata(&paths.metadata()) {
        Ok(issues) if issues.len() != expected => problems.push(format!(
            "metadata has {} issues, manifest says {}",
            issues.len(),
            expected
        )),
        Ok(_) => {}
        Err(e) => problems.push(e.to_string()),
    }

    match read_matrix(&paths.matrix()) {
        Ok(rows) if rows.len() != expected => problems.push(format!(
            "embedding matrix has {} rows, manifest says {}",
            rows.len(),
            expected
        )),
        Ok(_) => {}
        Err(e) => problems.push(format!("{:#}", e)),
    }

    problems
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_missing_artifacts_reported() {
        let tmp = TempDir::new().unwrap();
        let paths = ArtifactPaths::new(tmp.path());
        let problems = consistency_problems(&paths, 0);
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn test_corrupt_matrix_header_is_reported() {
        let tmp = TempDir::new().unwrap();
        let paths = ArtifactPaths::new(tmp.path());
        let mut header = u32::MAX.to_le_bytes().to_vec();
        header.extend_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(paths.matrix(), header).unwrap();

        let problems = consistency_problems(&paths, 0);
        assert!(
            problems.iter().any(|p| p.contains("embedding matrix")),
            "problems: {:?}",
            problems
        );
    }
}
