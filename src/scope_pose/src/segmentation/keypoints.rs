//! Sparse keypoints of a segment.

use nalgebra::Vector3;

use super::Segment;
use crate::cloud::PointCloud;
use crate::image::Grid2;
use crate::params::SegmentationParams;
use crate::range_image::RangeImage;

#[inline]
fn pixel_distance(a: (usize, usize), b: (usize, usize)) -> usize {
    a.0.abs_diff(b.0).max(a.1.abs_diff(b.1))
}

/// Greedy picks, each at least `radius + 1` pixels (Chebyshev) from every
/// earlier pick.
fn spread_picks(
    candidates: impl Iterator<Item = (usize, usize)>,
    first: Option<(usize, usize)>,
    radius: usize,
) -> Vec<(usize, usize)> {
    let mut picked: Vec<(usize, usize)> = first.into_iter().collect();
    for c in candidates {
        if picked.iter().all(|&p| pixel_distance(p, c) > radius) {
            picked.push(c);
        }
    }
    picked
}

/// Build a segment from its member cells.
///
/// Returns `None` when no member cell maps to a cloud point.
pub(super) fn build_segment(
    cells: Vec<(usize, usize)>,
    image: &RangeImage,
    cloud: &PointCloud,
    edge_image: &Grid2<f64>,
    params: &SegmentationParams,
) -> Option<Segment> {
    let members: Vec<((usize, usize), usize)> = cells
        .iter()
        .filter_map(|&(i, j)| image.idx.get(i, j).map(|k| ((i, j), k)))
        .collect();
    if members.is_empty() {
        return None;
    }

    let n = cells.len() as f64;
    let centroid = cells.iter().map(|&(i, j)| *image.points.get(i, j)).sum::<Vector3<f64>>() / n;
    let normal = image.normals.as_ref().and_then(|normals| {
        let s = cells.iter().map(|&(i, j)| *normals.get(i, j)).sum::<Vector3<f64>>();
        (s.norm() > 1e-12).then(|| s.normalize())
    });
    let lab = image
        .labs
        .as_ref()
        .map(|labs| cells.iter().map(|&(i, j)| *labs.get(i, j)).sum::<Vector3<f64>>() / n);

    let (center_cell, center_point) = members
        .iter()
        .map(|&(c, k)| (c, k, (cloud.points[k] - centroid).norm_squared()))
        .min_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, k, _)| (c, k))?;

    let idx_of = |c: (usize, usize)| image.idx.get(c.0, c.1).unwrap_or(center_point);

    let surface_cells = spread_picks(
        members.iter().map(|&(c, _)| c),
        Some(center_cell),
        params.surface_radius,
    );
    let surface_points = surface_cells.iter().map(|&c| idx_of(c)).collect();

    let mut by_edge: Vec<((usize, usize), f64)> = members
        .iter()
        .map(|&(c, _)| (c, *edge_image.get(c.0, c.1)))
        .filter(|&(_, e)| e >= params.edge_thresh)
        .collect();
    by_edge.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let edge_cells = spread_picks(by_edge.iter().map(|&(c, _)| c), None, params.edge_radius);
    let edge_weights = edge_cells.iter().map(|c| *edge_image.get(c.0, c.1)).collect();
    let edge_points = edge_cells.iter().map(|&c| idx_of(c)).collect();

    let center = cloud.points[center_point];
    let max_radius = members
        .iter()
        .map(|&(_, k)| (cloud.points[k] - center).norm())
        .fold(0.0, f64::max);

    Some(Segment {
        num_pixels: cells.len(),
        cells,
        center_point,
        centroid,
        normal,
        lab,
        surface_points,
        surface_cells,
        edge_points,
        edge_weights,
        max_radius,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spread_picks_respects_radius() {
        let cells: Vec<(usize, usize)> = (0..10).flat_map(|j| (0..10).map(move |i| (i, j))).collect();
        let picks = spread_picks(cells.into_iter(), Some((5, 5)), 2);
        assert_eq!(picks[0], (5, 5));
        for (a, pa) in picks.iter().enumerate() {
            for pb in &picks[a + 1..] {
                assert!(pixel_distance(*pa, *pb) > 2);
            }
        }
        // A 10x10 patch needs several picks at radius 2
        assert!(picks.len() >= 4);
    }
}
