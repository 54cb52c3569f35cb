//! Spherical range images.
//!
//! A point `p` in the camera frame (the viewpoint pose maps camera to world)
//! lands in cell
//!
//! ```text
//! azimuth   = atan2(p.x, p.z)
//! elevation = acos(p.y / |p|)
//! (i, j)    = (floor((azimuth - min_az) / res), floor((elevation - min_el) / res))
//! ```
//!
//! Each cell keeps the index of its nearest point (nearest surface wins
//! occlusion) and, separately, the mean position/normal/color of every
//! point that fell into it.

use anyhow::{bail, Result};
use nalgebra::{Matrix2x3, Vector3};

use crate::cloud::{descriptor_distance, PointCloud};
use crate::geometry::Pose;
use crate::image::Grid2;

/// Grid geometry shared by images built over the same scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageGeometry {
    /// Camera-to-world pose.
    pub viewpoint: Pose,
    /// Angular resolution in radians per cell.
    pub res: f64,
    pub min_az: f64,
    pub min_el: f64,
    pub width: usize,
    pub height: usize,
}

/// Continuous projection of a point onto the image plane.
#[derive(Debug, Clone, Copy)]
pub struct Projection {
    /// Fractional column
    pub u: f64,
    /// Fractional row
    pub v: f64,
    pub range: f64,
    /// The point in the camera frame.
    pub p_cam: Vector3<f64>,
}

impl Projection {
    /// Integer cell, if inside an image of the given size.
    pub fn cell(&self, width: usize, height: usize) -> Option<(usize, usize)> {
        let (i, j) = (self.u.floor(), self.v.floor());
        if i >= 0.0 && j >= 0.0 && (i as usize) < width && (j as usize) < height {
            Some((i as usize, j as usize))
        } else {
            None
        }
    }
}

/// Angular coordinates of a camera-frame point; `None` at the origin.
fn spherical(p_cam: &Vector3<f64>) -> Option<(f64, f64, f64)> {
    let r = p_cam.norm();
    if r < 1e-12 {
        return None;
    }
    let az = p_cam.x.atan2(p_cam.z);
    let el = (p_cam.y / r).clamp(-1.0, 1.0).acos();
    Some((az, el, r))
}

impl ImageGeometry {
    /// Project a world point.
    pub fn project(&self, p_world: &Vector3<f64>) -> Option<Projection> {
        let p_cam = self.viewpoint.inverse_transform_point(p_world);
        let (az, el, range) = spherical(&p_cam)?;
        Some(Projection {
            u: (az - self.min_az) / self.res,
            v: (el - self.min_el) / self.res,
            range,
            p_cam,
        })
    }

    /// Cell of a world point, `None` outside the grid.
    pub fn project_to_cell(&self, p_world: &Vector3<f64>) -> Option<(usize, usize)> {
        self.project(p_world)?.cell(self.width, self.height)
    }

    /// Jacobian of the fractional pixel `(u, v)` with respect to the
    /// camera-frame point.
    pub fn projection_jacobian(&self, p_cam: &Vector3<f64>) -> Matrix2x3<f64> {
        let (x, y, z) = (p_cam.x, p_cam.y, p_cam.z);
        let rxz2 = (x * x + z * z).max(1e-24);
        let r2 = p_cam.norm_squared().max(1e-24);
        let r = r2.sqrt();
        // d az / dp
        let (da_dx, da_dz) = (z / rxz2, -x / rxz2);
        // d el / dp, with el = acos(y / r)
        let s = (1.0 - y * y / r2).max(1e-24).sqrt();
        let k = -1.0 / s;
        let de_dx = k * (-y * x / (r2 * r));
        let de_dy = k * (1.0 / r - y * y / (r2 * r));
        let de_dz = k * (-y * z / (r2 * r));
        Matrix2x3::new(da_dx, 0.0, da_dz, de_dx, de_dy, de_dz) / self.res
    }

    /// Rotate a world direction into the camera frame.
    pub fn to_camera_dir(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.viewpoint.inverse_rotate(v)
    }
}

/// Rasterized view of a point cloud.
#[derive(Debug, Clone)]
pub struct RangeImage {
    pub geometry: ImageGeometry,
    /// Range of the nearest point per cell; -1 for empty cells.
    pub image: Grid2<f64>,
    /// Index of the nearest point per cell.
    pub idx: Grid2<Option<usize>>,
    /// Number of points per cell.
    pub cnt: Grid2<usize>,
    /// Mean point per cell.
    pub points: Grid2<Vector3<f64>>,
    /// Mean unit normal per cell.
    pub normals: Option<Grid2<Vector3<f64>>>,
    /// Mean Lab color per cell.
    pub labs: Option<Grid2<Vector3<f64>>>,
}

impl RangeImage {
    /// Build an image whose bounds cover the data plus `padding` cells.
    ///
    /// # Arguments
    /// * `cloud` - Points in the world frame
    /// * `viewpoint` - Camera-to-world pose
    /// * `res` - Angular resolution (radians per cell)
    /// * `padding` - Empty cells added on every side
    pub fn build(cloud: &PointCloud, viewpoint: Pose, res: f64, padding: usize) -> Result<Self> {
        if !(res > 0.0) {
            bail!("range image resolution must be positive, got {res}");
        }
        let angles: Vec<(f64, f64)> = cloud
            .points
            .iter()
            .filter_map(|p| spherical(&viewpoint.inverse_transform_point(p)))
            .map(|(az, el, _)| (az, el))
            .collect();
        if angles.is_empty() {
            bail!("cannot build a range image from an empty point cloud");
        }
        let (lo_az, lo_el) = angles
            .iter()
            .fold((f64::INFINITY, f64::INFINITY), |(a, e), &(az, el)| (a.min(az), e.min(el)));

        // Half a cell of margin keeps the extreme points off cell borders.
        let margin = (padding as f64 + 0.5) * res;
        let min_az = lo_az - margin;
        let min_el = lo_el - margin;
        // Crop to the last occupied cell, then pad.
        let (last_i, last_j) = angles.iter().fold((0, 0), |(i, j), &(az, el)| {
            let ci = ((az - min_az) / res).floor() as usize;
            let cj = ((el - min_el) / res).floor() as usize;
            (i.max(ci), j.max(cj))
        });
        let width = last_i + 1 + padding;
        let height = last_j + 1 + padding;

        let geometry = ImageGeometry {
            viewpoint,
            res,
            min_az,
            min_el,
            width,
            height,
        };
        Ok(Self::rasterize(cloud, geometry))
    }

    /// Build an image on the grid of `template`, so cells of the two
    /// images correspond one to one. Points outside the grid are dropped.
    pub fn build_from_template(cloud: &PointCloud, template: &RangeImage) -> Self {
        Self::rasterize(cloud, template.geometry)
    }

    fn rasterize(cloud: &PointCloud, geometry: ImageGeometry) -> Self {
        let (w, h) = (geometry.width, geometry.height);
        let mut image = Grid2::new(w, h, -1.0);
        let mut idx = Grid2::new(w, h, None);
        let mut cnt = Grid2::new(w, h, 0usize);
        let mut point_sum = Grid2::new(w, h, Vector3::zeros());
        let mut normal_sum = cloud.normals.as_ref().map(|_| Grid2::new(w, h, Vector3::zeros()));
        let mut lab_sum = cloud.labs.as_ref().map(|_| Grid2::new(w, h, Vector3::zeros()));

        for (k, p) in cloud.points.iter().enumerate() {
            let Some(proj) = geometry.project(p) else {
                continue;
            };
            let Some((i, j)) = proj.cell(w, h) else {
                continue;
            };
            let current = *image.get(i, j);
            if current < 0.0 || proj.range < current {
                image.set(i, j, proj.range);
                idx.set(i, j, Some(k));
            }
            *cnt.get_mut(i, j) += 1;
            *point_sum.get_mut(i, j) += p;
            if let (Some(sum), Some(normals)) = (normal_sum.as_mut(), cloud.normals.as_ref()) {
                *sum.get_mut(i, j) += normals[k];
            }
            if let (Some(sum), Some(labs)) = (lab_sum.as_mut(), cloud.labs.as_ref()) {
                *sum.get_mut(i, j) += labs[k];
            }
        }

        let mut points = point_sum;
        for (i, j) in cnt.coords() {
            let n = *cnt.get(i, j);
            if n > 0 {
                *points.get_mut(i, j) /= n as f64;
                if let Some(sum) = lab_sum.as_mut() {
                    *sum.get_mut(i, j) /= n as f64;
                }
                if let Some(sum) = normal_sum.as_mut() {
                    let v = *sum.get(i, j);
                    let norm = v.norm();
                    if norm > 1e-12 {
                        sum.set(i, j, v / norm);
                    }
                }
            }
        }

        Self {
            geometry,
            image,
            idx,
            cnt,
            points,
            normals: normal_sum,
            labs: lab_sum,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.geometry.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.geometry.height
    }

    /// Cell of a world point and whether it lies inside the grid.
    pub fn project_to_cell(&self, p_world: &Vector3<f64>) -> Option<(usize, usize)> {
        self.geometry.project_to_cell(p_world)
    }

    /// Range of the nearest surface in a cell, `None` when empty.
    #[inline]
    pub fn range_at(&self, i: usize, j: usize) -> Option<f64> {
        let r = *self.image.get(i, j);
        (r >= 0.0).then_some(r)
    }

    #[inline]
    pub fn is_occupied(&self, i: usize, j: usize) -> bool {
        *self.cnt.get(i, j) > 0
    }

    /// Occupied cells, row-major.
    pub fn occupied_cells(&self) -> Vec<(usize, usize)> {
        self.cnt.coords().filter(|&(i, j)| self.is_occupied(i, j)).collect()
    }

    /// For each query, the feature-space nearest data point among the
    /// occupied cells of a `(2r+1)²` window around the query's cell.
    ///
    /// # Arguments
    /// * `query_points` - World positions of the queries
    /// * `query_features` - Descriptor of each query
    /// * `data_features` - Descriptor of each point of the imaged cloud
    /// * `radius` - Window half-size in pixels
    ///
    /// # Returns
    /// `(data index, descriptor distance)` per query; `None` when the query
    /// projects outside the grid or the window is empty.
    pub fn find_nearest_in_window(
        &self,
        query_points: &[Vector3<f64>],
        query_features: &[Vec<f64>],
        data_features: &[Vec<f64>],
        radius: usize,
    ) -> Vec<Option<(usize, f64)>> {
        query_points
            .iter()
            .zip(query_features)
            .map(|(p, f)| {
                let (ci, cj) = self.project_to_cell(p)?;
                let mut best: Option<(usize, f64)> = None;
                for (i, j) in self.image.window(ci, cj, radius) {
                    let Some(k) = *self.idx.get(i, j) else {
                        continue;
                    };
                    let d = descriptor_distance(f, &data_features[k]);
                    if best.map_or(true, |(_, bd)| d < bd) {
                        best = Some((k, d));
                    }
                }
                best
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    /// A 0.2 m square patch one meter in front of the camera.
    fn wall(n: usize) -> PointCloud {
        let mut points = Vec::new();
        for a in 0..n {
            for b in 0..n {
                let x = -0.1 + 0.2 * a as f64 / (n - 1) as f64;
                let y = -0.1 + 0.2 * b as f64 / (n - 1) as f64;
                points.push(Vector3::new(x, y, 1.0));
            }
        }
        let normals = vec![-Vector3::z(); points.len()];
        PointCloud::from_points(points).with_normals(normals)
    }

    #[test]
    fn test_round_trip_cells() {
        let cloud = wall(12);
        let ri = RangeImage::build(&cloud, Pose::identity(), 0.01, 2).unwrap();
        for (k, p) in cloud.points.iter().enumerate() {
            let (i, j) = ri.project_to_cell(p).expect("inside grid");
            assert!(ri.is_occupied(i, j));
            // The stored point is at least as close as this one
            let stored = ri.idx.get(i, j).unwrap();
            assert!(cloud.points[stored].norm() <= cloud.points[k].norm() + 1e-12);
        }
        // Padding leaves empty border cells
        assert_eq!(*ri.image.get(0, 0), -1.0);
        assert_eq!(*ri.idx.get(0, 0), None);
        assert_eq!(*ri.cnt.get(0, 0), 0);
    }

    #[test]
    fn test_image_is_cropped_to_occupied_cells() {
        let cloud = wall(9);
        for (res, padding) in [(0.01, 0), (0.01, 3), (0.0137, 2), (0.05, 1)] {
            let ri = RangeImage::build(&cloud, Pose::identity(), res, padding).unwrap();
            let occupied: Vec<(usize, usize)> = ri.cnt.coords().filter(|&(i, j)| *ri.cnt.get(i, j) > 0).collect();
            assert_eq!(occupied.iter().map(|c| c.0).min(), Some(padding));
            assert_eq!(occupied.iter().map(|c| c.1).min(), Some(padding));
            assert_eq!(occupied.iter().map(|c| c.0).max(), Some(ri.width() - 1 - padding));
            assert_eq!(occupied.iter().map(|c| c.1).max(), Some(ri.height() - 1 - padding));
            assert_eq!(occupied.iter().map(|&(i, j)| *ri.cnt.get(i, j)).sum::<usize>(), cloud.len());
        }
    }

    #[test]
    fn test_nearest_point_wins_cell() {
        let cloud = PointCloud::from_points(vec![Vector3::new(0.0, 0.0, 2.0), Vector3::new(0.0, 0.0, 1.0)]);
        let ri = RangeImage::build(&cloud, Pose::identity(), 0.01, 1).unwrap();
        let (i, j) = ri.project_to_cell(&cloud.points[0]).unwrap();
        assert_eq!(*ri.idx.get(i, j), Some(1));
        assert_relative_eq!(ri.range_at(i, j).unwrap(), 1.0);
        assert_eq!(*ri.cnt.get(i, j), 2);
        assert_relative_eq!(*ri.points.get(i, j), Vector3::new(0.0, 0.0, 1.5));
    }

    #[test]
    fn test_template_shares_grid() {
        let cloud = wall(10);
        let bg = RangeImage::build(&cloud, Pose::identity(), 0.01, 3).unwrap();
        let fg_cloud = cloud.subset(&[0, 1, 2, 55]);
        let fg = RangeImage::build_from_template(&fg_cloud, &bg);
        assert_eq!(fg.width(), bg.width());
        for p in &fg_cloud.points {
            assert_eq!(fg.project_to_cell(p), bg.project_to_cell(p));
        }
        assert_eq!(fg.occupied_cells().len(), 4);
    }

    #[test]
    fn test_rejects_bad_resolution() {
        assert!(RangeImage::build(&wall(3), Pose::identity(), 0.0, 0).is_err());
        assert!(RangeImage::build(&PointCloud::default(), Pose::identity(), 0.01, 0).is_err());
    }

    #[test]
    fn test_viewpoint_pose_is_respected() {
        // Camera at (0, 0, -1) looking along +z, so the origin is 1 m ahead
        let vp = Pose::new(Vector3::new(0.0, 0.0, -1.0), UnitQuaternion::identity());
        let cloud = PointCloud::from_points(vec![Vector3::zeros()]);
        let ri = RangeImage::build(&cloud, vp, 0.01, 1).unwrap();
        let (i, j) = ri.project_to_cell(&Vector3::zeros()).unwrap();
        assert_relative_eq!(ri.range_at(i, j).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_projection_jacobian_matches_finite_difference() {
        let cloud = wall(4);
        let ri = RangeImage::build(&cloud, Pose::identity(), 0.01, 1).unwrap();
        let g = ri.geometry;
        let p = Vector3::new(0.05, -0.03, 0.9);
        let jac = g.projection_jacobian(&p);
        let h = 1e-7;
        for k in 0..3 {
            let mut plus = p;
            let mut minus = p;
            plus[k] += h;
            minus[k] -= h;
            let a = g.project(&plus).unwrap();
            let b = g.project(&minus).unwrap();
            assert_relative_eq!(jac[(0, k)], (a.u - b.u) / (2.0 * h), epsilon = 1e-4);
            assert_relative_eq!(jac[(1, k)], (a.v - b.v) / (2.0 * h), epsilon = 1e-4);
        }
    }

    #[test]
    fn test_find_nearest_in_window() {
        let cloud = wall(8);
        let features: Vec<Vec<f64>> = (0..cloud.len()).map(|k| vec![k as f64, 0.0]).collect();
        let ri = RangeImage::build(&cloud, Pose::identity(), 0.01, 1).unwrap();
        let hits = ri.find_nearest_in_window(&[cloud.points[20]], &[vec![20.0, 0.0]], &features, 1);
        let (k, d) = hits[0].unwrap();
        assert_eq!(k, 20);
        assert_relative_eq!(d, 0.0);

        let far = ri.find_nearest_in_window(&[Vector3::new(5.0, 0.0, 1.0)], &[vec![0.0, 0.0]], &features, 1);
        assert!(far[0].is_none());
    }
}
