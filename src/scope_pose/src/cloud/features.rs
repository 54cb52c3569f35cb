//! Local feature descriptors and nearest-neighbor search over them.
//!
//! Descriptors are opaque fixed-length vectors. Search uses an immutable
//! k-d tree per descriptor type built over the distinct descriptors; each
//! key maps back to the rows of the owning cloud that carry it.

use std::collections::HashMap;

use anyhow::{bail, Result};
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Bucket size for the descriptor trees.
const BUCKET_SIZE: usize = 32;

const FPFH_DIM: usize = 33;
const SHOT_DIM: usize = 352;
const SIFT_DIM: usize = 128;

/// Descriptor family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeatureType {
    Fpfh,
    Shot,
    Sift,
}

impl FeatureType {
    pub const ALL: [FeatureType; 3] = [FeatureType::Fpfh, FeatureType::Shot, FeatureType::Sift];

    /// Descriptor length.
    pub fn dim(self) -> usize {
        match self {
            FeatureType::Fpfh => FPFH_DIM,
            FeatureType::Shot => SHOT_DIM,
            FeatureType::Sift => SIFT_DIM,
        }
    }

    /// Channel-name prefix in point cloud files (`f1..f33`, `shot1..`, `sift1..`).
    pub fn channel_prefix(self) -> &'static str {
        match self {
            FeatureType::Fpfh => "f",
            FeatureType::Shot => "shot",
            FeatureType::Sift => "sift",
        }
    }
}

/// k-d tree over the distinct rows of one descriptor block.
///
/// Rows with bit-identical descriptors share one key; `groups[item]` lists
/// every row carrying that key.
pub struct DescriptorTree<const K: usize> {
    tree: ImmutableKdTree<f64, u64, K, BUCKET_SIZE>,
    groups: Vec<Vec<usize>>,
    len: usize,
}

fn to_array<const K: usize>(row: &[f64]) -> [f64; K] {
    std::array::from_fn(|k| row.get(k).copied().unwrap_or(0.0))
}

/// Exact key of a row; `-0.0` and `0.0` collapse.
fn row_key(row: &[f64]) -> Vec<u64> {
    row.iter().map(|&x| (x + 0.0).to_bits()).collect()
}

impl<const K: usize> DescriptorTree<K> {
    fn build(rows: &[Vec<f64>]) -> Self {
        let mut slots: HashMap<Vec<u64>, usize> = HashMap::with_capacity(rows.len());
        let mut keys: Vec<[f64; K]> = Vec::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            let slot = *slots.entry(row_key(row)).or_insert_with(|| {
                keys.push(to_array(row));
                groups.push(Vec::new());
                keys.len() - 1
            });
            groups[slot].push(i);
        }
        if keys.len() < rows.len() {
            debug!("{} descriptor rows share {} distinct keys", rows.len(), keys.len());
        }
        Self {
            tree: (&*keys).into(),
            groups,
            len: rows.len(),
        }
    }

    fn knn(&self, query: &[f64], k: usize) -> Vec<(usize, f64)> {
        let q: [f64; K] = to_array(query);
        let mut hits = Vec::with_capacity(k);
        for nn in self.tree.nearest_n::<SquaredEuclidean>(&q, k.min(self.groups.len())) {
            let d = nn.distance.max(0.0).sqrt();
            hits.extend(self.groups[nn.item as usize].iter().map(|&row| (row, d)));
            if hits.len() >= k {
                break;
            }
        }
        hits.truncate(k);
        hits
    }
}

/// Descriptor index of one feature type.
pub enum FeatureIndex {
    Fpfh(DescriptorTree<FPFH_DIM>),
    Shot(DescriptorTree<SHOT_DIM>),
    Sift(DescriptorTree<SIFT_DIM>),
}

impl std::fmt::Debug for FeatureIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FeatureIndex::{:?}({} rows)", self.feature_type(), self.len())
    }
}

impl FeatureIndex {
    /// Index a descriptor block.
    ///
    /// # Errors
    /// Fails on an empty block or rows of the wrong length.
    pub fn build(ft: FeatureType, rows: &[Vec<f64>]) -> Result<Self> {
        if rows.is_empty() {
            bail!("cannot index an empty {ft:?} descriptor block");
        }
        if let Some(bad) = rows.iter().position(|r| r.len() != ft.dim()) {
            bail!(
                "{ft:?} descriptor row {bad} has length {}, expected {}",
                rows[bad].len(),
                ft.dim()
            );
        }
        Ok(match ft {
            FeatureType::Fpfh => FeatureIndex::Fpfh(DescriptorTree::build(rows)),
            FeatureType::Shot => FeatureIndex::Shot(DescriptorTree::build(rows)),
            FeatureType::Sift => FeatureIndex::Sift(DescriptorTree::build(rows)),
        })
    }

    pub fn feature_type(&self) -> FeatureType {
        match self {
            FeatureIndex::Fpfh(_) => FeatureType::Fpfh,
            FeatureIndex::Shot(_) => FeatureType::Shot,
            FeatureIndex::Sift(_) => FeatureType::Sift,
        }
    }

    /// Indexed rows, duplicates included.
    pub fn len(&self) -> usize {
        match self {
            FeatureIndex::Fpfh(t) => t.len,
            FeatureIndex::Shot(t) => t.len,
            FeatureIndex::Sift(t) => t.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `k` nearest rows to `query` as `(row, euclidean distance)`,
    /// nearest first. Rows with equal descriptors come out in row order.
    pub fn knn(&self, query: &[f64], k: usize) -> Vec<(usize, f64)> {
        let k = k.max(1).min(self.len());
        match self {
            FeatureIndex::Fpfh(t) => t.knn(query, k),
            FeatureIndex::Shot(t) => t.knn(query, k),
            FeatureIndex::Sift(t) => t.knn(query, k),
        }
    }
}

/// Angle between two descriptors treated as directions.
pub fn descriptor_angle(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return std::f64::consts::PI;
    }
    (dot / (na * nb)).clamp(-1.0, 1.0).acos()
}

/// Euclidean distance between two descriptors.
pub fn descriptor_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn one_hot(dim: usize, k: usize, scale: f64) -> Vec<f64> {
        let mut v = vec![0.0; dim];
        v[k % dim] = scale;
        v
    }

    #[test]
    fn test_knn_finds_exact_match_first() {
        let rows: Vec<Vec<f64>> = (0..20).map(|k| one_hot(33, k, 1.0)).collect();
        let index = FeatureIndex::build(FeatureType::Fpfh, &rows).unwrap();
        assert_eq!(index.len(), 20);
        let hits = index.knn(&rows[7], 3);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, 7);
        assert_relative_eq!(hits[0].1, 0.0, epsilon = 1e-12);
        assert_relative_eq!(hits[1].1, 2f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_build_rejects_bad_rows() {
        assert!(FeatureIndex::build(FeatureType::Sift, &[]).is_err());
        assert!(FeatureIndex::build(FeatureType::Sift, &[vec![0.0; 12]]).is_err());
    }

    #[test]
    fn test_knn_caps_k_at_len() {
        let rows: Vec<Vec<f64>> = (0..2).map(|k| one_hot(128, k, 1.0)).collect();
        let index = FeatureIndex::build(FeatureType::Sift, &rows).unwrap();
        assert_eq!(index.knn(&rows[0], 10).len(), 2);
    }

    #[test]
    fn test_identical_rows_share_one_key() {
        let rows = vec![one_hot(33, 4, 0.5); 100];
        let index = FeatureIndex::build(FeatureType::Fpfh, &rows).unwrap();
        assert_eq!(index.len(), 100);
        let hits = index.knn(&rows[0], 5);
        assert_eq!(hits.len(), 5);
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(hits.iter().all(|h| h.1.abs() < 1e-12));
    }

    #[test]
    fn test_knn_over_repeated_and_distinct_rows() {
        // Rows 0..30 repeat one descriptor, rows 30..33 are distinct.
        let mut rows = vec![one_hot(352, 0, 1.0); 30];
        rows.extend((1..4).map(|k| one_hot(352, k, 1.0)));
        let mut flipped = one_hot(352, 0, 1.0);
        flipped[1] = -0.0;
        rows.push(flipped);
        let index = FeatureIndex::build(FeatureType::Shot, &rows).unwrap();
        assert_eq!(index.len(), 34);

        let hits = index.knn(&rows[31], 3);
        assert_eq!(hits[0], (31, 0.0));
        assert_relative_eq!(hits[1].1, 2f64.sqrt(), epsilon = 1e-9);

        let all = index.knn(&rows[0], 40);
        assert_eq!(all.len(), 34);
        assert_eq!(all.iter().filter(|h| h.1 < 1e-12).count(), 31);
        let mut seen: Vec<usize> = all.iter().map(|h| h.0).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..34).collect::<Vec<_>>());
    }

    #[test]
    fn test_descriptor_angle() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 2.0];
        assert_relative_eq!(descriptor_angle(&a, &b), std::f64::consts::FRAC_PI_2);
        assert_relative_eq!(descriptor_angle(&a, &a), 0.0);
        assert_relative_eq!(descriptor_distance(&a, &b), 5f64.sqrt());
    }
}
