//! Exact nearest-neighbor index over issue embeddings.
//!
//! Position `i` in the index is `corpus[i]`; there is no other link between
//! a vector and its issue. Search is brute force against every stored
//! vector, which is exact and fast enough for issue-tracker sized corpora.
//!
//! Two metrics are supported (see [`Metric`]):
//!
//! | Metric | Stored vectors | Score | Best |
//! |--------|----------------|-------|------|
//! | `l2` | raw | squared Euclidean distance | lowest |
//! | `inner_product` | L2-normalized | dot product (cosine) | highest |
//!
//! The metric, model name and dimension are part of the persisted file so
//! the query side can refuse an embedder that does not match.
//!
//! # File format
//!
//! ```text
//! "DDIX" | version u32 | metric u8 | model_len u32 | model utf-8
//!        | dims u32 | count u32 | count × dims f32
//! ```
//!
//! All integers and floats are little-endian.

use anyhow::{Context, Result};
use std::cmp::Ordering;
use std::path::Path;

use crate::embedding::{blob_to_vec, normalize_l2, vec_to_blob};
use crate::error::DedupError;
use crate::models::Metric;

const INDEX_MAGIC: &[u8; 4] = b"DDIX";
const INDEX_VERSION: u32 = 1;

/// One search hit: the raw score and the zero-based corpus position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub score: f32,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    metric: Metric,
    model: String,
    dims: usize,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Build an index from `vectors` in corpus order.
    ///
    /// Every vector must have `dims` entries. For [`Metric::InnerProduct`]
    /// the stored copies are L2-normalized.
    pub fn build(
        vectors: &[Vec<f32>],
        metric: Metric,
        model: &str,
        dims: usize,
    ) -> Result<Self, DedupError> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(DedupError::DimensionMismatch {
                expected: dims,
                actual: bad.len(),
            });
        }

        let vectors = vectors
            .iter()
            .map(|v| prepare(metric, v.clone()))
            .collect();

        Ok(Self {
            metric,
            model: model.to_string(),
            dims,
            vectors,
        })
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// The `k` closest vectors to `query`, best first.
    ///
    /// Returns `min(k, len())` neighbors with untransformed scores. Equal
    /// scores are ordered by position.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, DedupError> {
        if query.len() != self.dims {
            return Err(DedupError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }

        let query = prepare(self.metric, query.to_vec());
        let mut hits: Vec<Neighbor> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, v)| Neighbor {
                score: score(self.metric, &query, v),
                position,
            })
            .collect();

        let higher_is_better = self.metric.higher_is_better();
        hits.sort_by(|a, b| {
            let by_score = if higher_is_better {
                b.score.partial_cmp(&a.score)
            } else {
                a.score.partial_cmp(&b.score)
            };
            by_score
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.position.cmp(&b.position))
        });
        hits.truncate(k);
        Ok(hits)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let model = self.model.as_bytes();
        let mut bytes = Vec::with_capacity(21 + model.len() + self.len() * self.dims * 4);
        bytes.extend_from_slice(INDEX_MAGIC);
        bytes.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        bytes.push(self.metric.code());
        bytes.extend_from_slice(&(model.len() as u32).to_le_bytes());
        bytes.extend_from_slice(model);
        bytes.extend_from_slice(&(self.dims as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.vectors.len() as u32).to_le_bytes());
        for v in &self.vectors {
            bytes.extend_from_slice(&vec_to_blob(v));
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DedupError> {
        let mut r = ByteReader::new(bytes);

        if r.take(4)? != INDEX_MAGIC {
            return Err(load_err("not an index file (bad magic)"));
        }
        let version = r.u32()?;
        if version != INDEX_VERSION {
            return Err(load_err(format!("unsupported index version {}", version)));
        }
        let metric_code = r.take(1)?[0];
        let metric = Metric::from_code(metric_code)
            .ok_or_else(|| load_err(format!("unknown metric code {}", metric_code)))?;
        let model_len = r.u32()? as usize;
        let model = std::str::from_utf8(r.take(model_len)?)
            .map_err(|_| load_err("model name is not UTF-8"))?
            .to_string();
        let dims = r.u32()? as usize;
        let count = r.u32()? as usize;
        if dims == 0 && count > 0 {
            return Err(load_err("zero-dimensional index"));
        }

        let body = r.rest();
        let expected = count
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| load_err("vector block size overflows"))?;
        if body.len() != expected {
            return Err(load_err(format!(
                "vector block is {} bytes, expected {} ({} × {} f32)",
                body.len(),
                expected,
                count,
                dims
            )));
        }

        let vectors = if dims == 0 {
            Vec::new()
        } else {
            body.chunks_exact(dims * 4).map(blob_to_vec).collect()
        };

        Ok(Self {
            metric,
            model,
            dims,
            vectors,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes())
            .with_context(|| format!("Failed to write index: {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self, DedupError> {
        let bytes = std::fs::read(path)
            .map_err(|e| load_err(format!("{}: {}", path.display(), e)))?;
        Self::from_bytes(&bytes)
    }
}

fn prepare(metric: Metric, v: Vec<f32>) -> Vec<f32> {
    match metric {
        Metric::L2 => v,
        Metric::InnerProduct => normalize_l2(v),
    }
}

fn score(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
        Metric::InnerProduct => a.iter().zip(b).map(|(x, y)| x * y).sum(),
    }
}

fn load_err(msg: impl Into<String>) -> DedupError {
    DedupError::IndexLoad(msg.into())
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DedupError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| load_err("file is truncated"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, DedupError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        slice
    }
}

/// Write an N×D row-major embedding matrix: `rows u32 | dims u32 | f32...`.
pub fn write_matrix(path: &Path, dims: usize, rows: &[Vec<f32>]) -> Result<()> {
    let mut bytes = Vec::with_capacity(8 + rows.len() * dims * 4);
    bytes.extend_from_slice(&(rows.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&(dims as u32).to_le_bytes());
    for row in rows {
        anyhow::ensure!(
            row.len() == dims,
            "matrix row has {} values, expected {}",
            row.len(),
            dims
        );
        bytes.extend_from_slice(&vec_to_blob(row));
    }
    std::fs::write(path, bytes)
        .with_context(|| format!("Failed to write embedding matrix: {}", path.display()))
}

/// Read a matrix written by [`write_matrix`].
pub fn read_matrix(path: &Path) -> Result<Vec<Vec<f32>>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read embedding matrix: {}", path.display()))?;
    let mut r = ByteReader::new(&bytes);
    let rows = r.u32()? as usize;
    let dims = r.u32()? as usize;
    anyhow::ensure!(
        dims > 0 || rows == 0,
        "embedding matrix {} has {} rows of zero dimensions",
        path.display(),
        rows
    );
    let body = r.rest();
    let expected = rows
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| {
            anyhow::anyhow!(
                "embedding matrix {} header overflows: {} × {} f32",
                path.display(),
                rows,
                dims
            )
        })?;
    anyhow::ensure!(
        body.len() == expected,
        "embedding matrix {} is {} bytes, expected {} × {} f32",
        path.display(),
        body.len(),
        rows,
        dims
    );
    if dims == 0 {
        return Ok(Vec::new());
    }
    Ok(body.chunks_exact(dims * 4).map(blob_to_vec).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn corpus() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.9, 0.1, 0.0],
            vec![0.0, 0.0, 2.0],
        ]
    }

    #[test]
    fn test_inner_product_ranks_descending() {
        let index = VectorIndex::build(&corpus(), Metric::InnerProduct, "m", 3).unwrap();
        let hits = index.search(&[1.0, 0.0, 0.0], 3).unwrap();
        let positions: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(positions[0], 0);
        assert_eq!(positions[1], 2);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_inner_product_normalizes_both_sides() {
        let index = VectorIndex::build(&corpus(), Metric::InnerProduct, "m", 3).unwrap();
        // Unnormalized query, unnormalized stored vector [0, 0, 2].
        let hits = index.search(&[0.0, 0.0, 5.0], 1).unwrap();
        assert_eq!(hits[0].position, 3);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_ranks_ascending_with_squared_distance() {
        let index = VectorIndex::build(&corpus(), Metric::L2, "m", 3).unwrap();
        let hits = index.search(&[1.0, 0.0, 0.0], 4).unwrap();
        assert_eq!(hits[0].position, 0);
        assert_eq!(hits[0].score, 0.0);
        assert_eq!(hits[1].position, 2);
        // (1-0.9)^2 + (0-0.1)^2
        assert!((hits[1].score - 0.02).abs() < 1e-6);
        // (1-0)^2 + (0-0)^2 + (0-2)^2
        assert_eq!(hits[3].position, 3);
        assert!((hits[3].score - 5.0).abs() < 1e-6);
        assert!(hits.windows(2).all(|w| w[0].score <= w[1].score));
    }

    #[test]
    fn test_k_larger_than_corpus_returns_all() {
        let index = VectorIndex::build(&corpus(), Metric::L2, "m", 3).unwrap();
        assert_eq!(index.search(&[0.0, 0.0, 0.0], 10).unwrap().len(), 4);
        assert_eq!(index.search(&[0.0, 0.0, 0.0], 2).unwrap().len(), 2);
    }

    #[test]
    fn test_ties_ordered_by_position() {
        let vectors = vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]];
        let index = VectorIndex::build(&vectors, Metric::L2, "m", 2).unwrap();
        let positions: Vec<usize> = index
            .search(&[1.0, 0.0], 3)
            .unwrap()
            .iter()
            .map(|h| h.position)
            .collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let index = VectorIndex::build(&corpus(), Metric::L2, "m", 3).unwrap();
        let err = index.search(&[1.0, 0.0], 2).unwrap_err();
        assert!(matches!(
            err,
            DedupError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_build_rejects_mixed_dimensions() {
        let vectors = vec![vec![1.0, 0.0], vec![1.0]];
        assert!(VectorIndex::build(&vectors, Metric::L2, "m", 2).is_err());
    }

    #[test]
    fn test_empty_index_search() {
        let index = VectorIndex::build(&[], Metric::InnerProduct, "m", 3).unwrap();
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_save_load_preserves_identity() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.bin");
        let index = VectorIndex::build(&corpus(), Metric::InnerProduct, "all-minilm-l6-v2", 3)
            .unwrap();
        index.save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.metric(), Metric::InnerProduct);
        assert_eq!(loaded.model_name(), "all-minilm-l6-v2");
        assert_eq!(loaded.dims(), 3);
        assert_eq!(loaded.len(), 4);
    }

    #[test]
    fn test_load_missing_file() {
        let tmp = TempDir::new().unwrap();
        let err = VectorIndex::load(&tmp.path().join("missing.bin")).unwrap_err();
        assert!(matches!(err, DedupError::IndexLoad(_)));
    }

    #[test]
    fn test_load_rejects_truncated_and_garbage() {
        let index = VectorIndex::build(&corpus(), Metric::L2, "m", 3).unwrap();
        let bytes = index.to_bytes();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(matches!(
            VectorIndex::from_bytes(truncated),
            Err(DedupError::IndexLoad(_))
        ));
        assert!(matches!(
            VectorIndex::from_bytes(b"nonsense"),
            Err(DedupError::IndexLoad(_))
        ));
        assert!(matches!(
            VectorIndex::from_bytes(&[]),
            Err(DedupError::IndexLoad(_))
        ));
    }

    fn header(dims: u32, count: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(INDEX_MAGIC);
        bytes.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        bytes.push(Metric::InnerProduct.code());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(b'm');
        bytes.extend_from_slice(&dims.to_le_bytes());
        bytes.extend_from_slice(&count.to_le_bytes());
        bytes
    }

    #[test]
    fn test_load_rejects_zero_dims_with_vectors() {
        let err = VectorIndex::from_bytes(&header(0, u32::MAX)).unwrap_err();
        assert!(matches!(err, DedupError::IndexLoad(ref m) if m.contains("zero-dimensional")));

        let empty = VectorIndex::from_bytes(&header(0, 0)).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_read_matrix_rejects_overflowing_header() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("embeddings.bin");
        let mut bytes = u32::MAX.to_le_bytes().to_vec();
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        assert!(read_matrix(&path).is_err());

        let mut zero_dims = 5u32.to_le_bytes().to_vec();
        zero_dims.extend_from_slice(&0u32.to_le_bytes());
        std::fs::write(&path, &zero_dims).unwrap();
        assert!(read_matrix(&path).is_err());
    }

    #[test]
    fn test_matrix_roundtrip_keeps_row_order() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("embeddings.bin");
        write_matrix(&path, 3, &corpus()).unwrap();
        assert_eq!(read_matrix(&path).unwrap(), corpus());
    }

    #[test]
    fn test_matrix_rejects_ragged_rows() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("embeddings.bin");
        assert!(write_matrix(&path, 3, &[vec![1.0, 2.0]]).is_err());
    }
}
