//! Placing model points in the observed range image.

use nalgebra::Vector3;

use crate::geometry::Pose;
use crate::range_image::{Projection, RangeImage};

/// A model point moved into the scene and projected.
#[derive(Debug, Clone)]
pub struct PlacedPoint {
    /// Index into the source point list.
    pub index: usize,
    pub world: Vector3<f64>,
    /// World normal, when the source carries normals.
    pub normal: Option<Vector3<f64>>,
    pub projection: Option<Projection>,
    /// Image cell, `None` outside the grid.
    pub cell: Option<(usize, usize)>,
    /// Probability that the observation could have seen this point.
    pub vis: f64,
}

impl PlacedPoint {
    /// Camera-frame normal.
    pub fn normal_cam(&self, image: &RangeImage) -> Option<Vector3<f64>> {
        self.normal.map(|n| image.geometry.to_camera_dir(&n))
    }
}

/// Visibility probability of a placed point.
///
/// 0 for back-facing points and points outside the image. 1 when the cell
/// is empty or the point lies in front of the observed surface. Otherwise
/// a Gaussian in how far the point hides behind the observed surface.
pub fn visibility_probability(
    image: &RangeImage,
    projection: Option<&Projection>,
    cell: Option<(usize, usize)>,
    normal_world: Option<&Vector3<f64>>,
    vis_sigma: f64,
) -> f64 {
    let (Some(projection), Some((i, j))) = (projection, cell) else {
        return 0.0;
    };
    if let Some(n) = normal_world {
        let n_cam = image.geometry.to_camera_dir(n);
        if n_cam.dot(&projection.p_cam) >= 0.0 {
            return 0.0;
        }
    }
    let Some(observed) = image.range_at(i, j) else {
        return 1.0;
    };
    let dr = projection.range - observed;
    if dr < 0.0 {
        1.0
    } else {
        let t = dr / vis_sigma;
        (-0.5 * t * t).exp()
    }
}

/// Place `indices` of a model point list under `pose`.
pub fn place_points(
    image: &RangeImage,
    pose: &Pose,
    points: &[Vector3<f64>],
    normals: Option<&[Vector3<f64>]>,
    indices: &[usize],
    vis_sigma: f64,
) -> Vec<PlacedPoint> {
    indices
        .iter()
        .map(|&index| {
            let world = pose.transform_point(&points[index]);
            let normal = normals.map(|n| pose.rotate(&n[index]));
            let projection = image.geometry.project(&world);
            let cell = projection.and_then(|p| p.cell(image.width(), image.height()));
            let vis = visibility_probability(image, projection.as_ref(), cell, normal.as_ref(), vis_sigma);
            PlacedPoint {
                index,
                world,
                normal,
                projection,
                cell,
                vis,
            }
        })
        .collect()
}

/// Mean visibility of a placed point set, 0 when empty.
pub fn mean_visibility(placed: &[PlacedPoint]) -> f64 {
    if placed.is_empty() {
        return 0.0;
    }
    placed.iter().map(|p| p.vis).sum::<f64>() / placed.len() as f64
}
