//! Pairwise segment affinity.

use nalgebra::DMatrix;

use super::Segment;
use crate::cloud::PointCloud;
use crate::image::Grid2;
use crate::params::SegmentationParams;

/// Mean edge probability along the pixel line from `a` to `b`.
fn mean_edge_along(edge: &Grid2<f64>, a: (usize, usize), b: (usize, usize)) -> f64 {
    let steps = a.0.abs_diff(b.0).max(a.1.abs_diff(b.1)).max(1);
    let mut total = 0.0;
    for s in 0..=steps {
        let t = s as f64 / steps as f64;
        let i = (a.0 as f64 + t * (b.0 as f64 - a.0 as f64)).round() as usize;
        let j = (a.1 as f64 + t * (b.1 as f64 - a.1 as f64)).round() as usize;
        total += *edge.get(i, j);
    }
    total / (steps + 1) as f64
}

/// Closest pair of surface keypoints between two segments, as
/// `(distance, cell in a, cell in b)`.
fn closest_keypoints(a: &Segment, b: &Segment, cloud: &PointCloud) -> Option<(f64, (usize, usize), (usize, usize))> {
    let mut best: Option<(f64, (usize, usize), (usize, usize))> = None;
    for (&ka, &ca) in a.surface_points.iter().zip(&a.surface_cells) {
        for (&kb, &cb) in b.surface_points.iter().zip(&b.surface_cells) {
            let d = (cloud.points[ka] - cloud.points[kb]).norm();
            if best.map_or(true, |(bd, _, _)| d < bd) {
                best = Some((d, ca, cb));
            }
        }
    }
    best
}

/// Symmetric affinity matrix with unit diagonal.
///
/// Pairs whose closest surface keypoints are farther apart than
/// `affinity_dist_thresh` get affinity 0.
pub(super) fn affinity_matrix(
    segments: &[Segment],
    cloud: &PointCloud,
    edge_image: &Grid2<f64>,
    params: &SegmentationParams,
) -> DMatrix<f64> {
    let n = segments.len();
    let mut a = DMatrix::identity(n, n);
    for i in 0..n {
        for j in (i + 1)..n {
            let (si, sj) = (&segments[i], &segments[j]);
            let Some((d, ci, cj)) = closest_keypoints(si, sj, cloud) else {
                continue;
            };
            if d > params.affinity_dist_thresh {
                continue;
            }
            let edge = mean_edge_along(edge_image, ci, cj);
            let dn = match (si.normal, sj.normal) {
                (Some(a), Some(b)) => (a - b).norm_squared(),
                _ => 0.0,
            };
            let dl = match (si.lab, sj.lab) {
                (Some(a), Some(b)) => (a - b).norm_squared(),
                _ => 0.0,
            };
            let value = (-(params.affinity_dist_weight * d
                + params.affinity_edge_weight * edge
                + params.affinity_normal_weight * dn
                + params.affinity_color_weight * dl))
                .exp();
            a[(i, j)] = value;
            a[(j, i)] = value;
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_edge_along_line() {
        let mut edge = Grid2::new(5, 1, 0.0);
        edge.set(2, 0, 1.0);
        let m = mean_edge_along(&edge, (0, 0), (4, 0));
        assert!((m - 0.2).abs() < 1e-12);
        assert_eq!(mean_edge_along(&edge, (2, 0), (2, 0)), 1.0);
    }
}
