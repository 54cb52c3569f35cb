//! Superpixel segmentation of the observed foreground and the segment
//! affinity graph.
//!
//! Segments are found by k-means over foreground range-image cells in a
//! joint `(xyz, normal, Lab)` space, seeded on a regular pixel grid. Each
//! surviving segment carries a sparse keypoint skeleton used by scoring
//! and alignment.

mod affinity;
mod keypoints;
mod superpixel;

use nalgebra::{DMatrix, Vector3};
use serde::Serialize;
use tracing::debug;

use crate::cloud::PointCloud;
use crate::image::Grid2;
use crate::params::SegmentationParams;
use crate::range_image::RangeImage;

/// A spatially coherent patch of observed cells.
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    /// Member cells of the foreground range image.
    pub cells: Vec<(usize, usize)>,
    pub num_pixels: usize,
    /// Cloud index of the member point closest to the centroid.
    pub center_point: usize,
    pub centroid: Vector3<f64>,
    pub normal: Option<Vector3<f64>>,
    pub lab: Option<Vector3<f64>>,
    /// Cloud indices of the surface keypoint skeleton.
    pub surface_points: Vec<usize>,
    /// Cells of `surface_points`, in the same order.
    pub surface_cells: Vec<(usize, usize)>,
    /// Cloud indices of edge keypoints, highest edge probability first.
    pub edge_points: Vec<usize>,
    pub edge_weights: Vec<f64>,
    /// Largest distance from the center point to a member point.
    pub max_radius: f64,
}

/// Segments of one observation.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub segments: Vec<Segment>,
    /// Segment of each foreground cell.
    pub labels: Grid2<Option<usize>>,
    /// Symmetric pairwise affinity, unit diagonal.
    pub affinity: DMatrix<f64>,
}

impl Segmentation {
    /// Segment the foreground image.
    ///
    /// # Arguments
    /// * `image` - Foreground range image
    /// * `cloud` - The cloud `image` was built from
    /// * `edge_image` - Blurred edge probability on the same grid
    pub fn build(
        image: &RangeImage,
        cloud: &PointCloud,
        edge_image: &Grid2<f64>,
        params: &SegmentationParams,
    ) -> Self {
        let (raw_labels, k) = superpixel::superpixels(image, params);

        let mut members: Vec<Vec<(usize, usize)>> = vec![Vec::new(); k];
        for (i, j) in raw_labels.coords() {
            if let Some(c) = *raw_labels.get(i, j) {
                members[c].push((i, j));
            }
        }

        let mut labels = Grid2::new(image.width(), image.height(), None);
        let mut segments = Vec::new();
        for cells in members {
            if cells.is_empty() {
                continue;
            }
            let Some(segment) = keypoints::build_segment(cells, image, cloud, edge_image, params) else {
                continue;
            };
            for &(i, j) in &segment.cells {
                labels.set(i, j, Some(segments.len()));
            }
            segments.push(segment);
        }

        let affinity = affinity::affinity_matrix(&segments, cloud, edge_image, params);
        debug!("segmented observation into {} segments", segments.len());
        Self {
            segments,
            labels,
            affinity,
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment containing a foreground cell.
    #[inline]
    pub fn segment_at(&self, i: usize, j: usize) -> Option<usize> {
        *self.labels.get(i, j)
    }

    /// Pixel count of every segment.
    pub fn masses(&self) -> Vec<f64> {
        self.segments.iter().map(|s| s.num_pixels as f64).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Pose;

    /// Two walls separated by a gap: one facing the camera at z = 1
    /// (x < 0) and one tilted, farther away (x > 0).
    fn two_walls() -> PointCloud {
        let mut points = Vec::new();
        let mut normals = Vec::new();
        let n_tilted = Vector3::new(-1.0, 0.0, -1.0).normalize();
        for a in 0..30 {
            for b in 0..20 {
                let x = -0.15 + 0.01 * a as f64;
                let y = -0.1 + 0.01 * b as f64;
                if x.abs() < 0.03 {
                    continue;
                }
                if x < 0.0 {
                    points.push(Vector3::new(x, y, 1.0));
                    normals.push(-Vector3::z());
                } else {
                    points.push(Vector3::new(x, y, 1.3 + x));
                    normals.push(n_tilted);
                }
            }
        }
        PointCloud::from_points(points).with_normals(normals)
    }

    fn params() -> SegmentationParams {
        SegmentationParams {
            resolution: 4,
            affinity_dist_thresh: 0.06,
            ..Default::default()
        }
    }

    #[test]
    fn test_segments_do_not_straddle_walls() {
        let cloud = two_walls();
        let image = RangeImage::build(&cloud, Pose::identity(), 0.01, 1).unwrap();
        let edge = Grid2::new(image.width(), image.height(), 0.0);
        let seg = Segmentation::build(&image, &cloud, &edge, &params());
        assert!(seg.len() >= 2);
        for s in &seg.segments {
            let sides: Vec<bool> = s
                .cells
                .iter()
                .filter_map(|&(i, j)| *image.idx.get(i, j))
                .map(|k| cloud.points[k].x < 0.0)
                .collect();
            assert!(sides.iter().all(|&v| v == sides[0]), "segment mixes walls");
            assert!(s.surface_points.contains(&s.center_point));
        }
    }

    #[test]
    fn test_affinity_is_symmetric_with_unit_diagonal() {
        let cloud = two_walls();
        let image = RangeImage::build(&cloud, Pose::identity(), 0.01, 1).unwrap();
        let edge = Grid2::new(image.width(), image.height(), 0.0);
        let seg = Segmentation::build(&image, &cloud, &edge, &params());
        let a = &seg.affinity;
        for i in 0..seg.len() {
            assert_eq!(a[(i, i)], 1.0);
            for j in 0..seg.len() {
                assert_eq!(a[(i, j)], a[(j, i)]);
                assert!((0.0..=1.0).contains(&a[(i, j)]));
            }
        }
        // Neighboring patches of the flat wall are related
        assert!((0..seg.len()).any(|i| (0..seg.len()).any(|j| i != j && a[(i, j)] > 0.0)));
    }

    #[test]
    fn test_empty_image_gives_no_segments() {
        let cloud = PointCloud::from_points(vec![Vector3::new(0.0, 0.0, 1.0)]);
        let image = RangeImage::build(&cloud, Pose::identity(), 0.01, 0).unwrap();
        let empty = RangeImage::build_from_template(&PointCloud::default(), &image);
        let edge = Grid2::new(empty.width(), empty.height(), 0.0);
        let seg = Segmentation::build(&empty, &PointCloud::default(), &edge, &params());
        assert!(seg.is_empty());
        assert_eq!(seg.affinity.nrows(), 0);
    }
}
