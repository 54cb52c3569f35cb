//! Per-observation derived data, built once per scene.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use nalgebra::{Vector3, Vector4};
use tracing::{debug, info, warn};

use crate::cloud::{FeatureType, PointCloud};
use crate::geometry::Pose;
use crate::image::Grid2;
use crate::params::ScopeParams;
use crate::range_image::RangeImage;
use crate::segmentation::Segmentation;

/// Everything an observed scene brings to a SCOPE run.
#[derive(Debug, Clone, Default)]
pub struct ObservationInput {
    /// Full scene, used for free-space and occlusion reasoning.
    pub cloud: PointCloud,
    /// Foreground points to explain; the full scene when absent.
    pub foreground: Option<PointCloud>,
    /// Observed descriptor clouds; descriptor blocks of the foreground
    /// are used for types missing here.
    pub feature_clouds: BTreeMap<FeatureType, PointCloud>,
    /// Camera-to-world pose of the sensor.
    pub viewpoint: Pose,
    /// Supporting plane `a x + b y + c z + d = 0`.
    pub table_plane: Option<Vector4<f64>>,
}

/// Derived, read-only observation data.
#[derive(Debug)]
pub struct ObservationData {
    pub input: ObservationInput,
    pub fg_cloud: PointCloud,
    pub bg_range_image: RangeImage,
    /// Foreground image on the background grid.
    pub fg_range_image: RangeImage,
    /// Blurred edge probability in `[0, 1]`, on the background grid.
    pub edge_image: Grid2<f64>,
    /// `ln(max(edge_image, edge_eps))`.
    pub edge_log: Grid2<f64>,
    pub feature_clouds: BTreeMap<FeatureType, PointCloud>,
    /// Descriptor clouds rasterized on the background grid.
    pub feature_images: BTreeMap<FeatureType, RangeImage>,
    pub segmentation: Segmentation,
    /// Table plane with a unit normal pointing towards the sensor.
    pub table_plane: Option<Vector4<f64>>,
}

impl ObservationData {
    pub fn new(input: ObservationInput, params: &ScopeParams) -> Result<Self> {
        if input.cloud.is_empty() {
            bail!("observation has no points");
        }
        let fg_cloud = input
            .foreground
            .clone()
            .unwrap_or_else(|| input.cloud.clone());

        let bg_range_image = RangeImage::build(
            &input.cloud,
            input.viewpoint,
            params.range_image_resolution,
            params.range_image_padding,
        )?;
        let fg_range_image = RangeImage::build_from_template(&fg_cloud, &bg_range_image);

        let raw_edges = match edge_flags(&input.cloud) {
            Some(flags) => flag_edge_image(&bg_range_image, &flags),
            None => discontinuity_edge_image(&bg_range_image, params.edge_range_thresh),
        };
        let edge_image = blur_and_normalize(raw_edges, params.edge_blur);
        let edge_log = edge_image.map(|e| e.max(params.edge_eps).ln());

        let mut feature_clouds = BTreeMap::new();
        for ft in FeatureType::ALL {
            if let Some(c) = input.feature_clouds.get(&ft) {
                if c.descriptors(ft).is_none() {
                    bail!("observed {ft:?} cloud carries no {ft:?} descriptors");
                }
                feature_clouds.insert(ft, c.clone());
            } else if fg_cloud.descriptors(ft).is_some() {
                feature_clouds.insert(ft, fg_cloud.clone());
            }
        }
        let feature_images = feature_clouds
            .iter()
            .map(|(ft, c)| (*ft, RangeImage::build_from_template(c, &bg_range_image)))
            .collect();

        let segmentation = Segmentation::build(&fg_range_image, &fg_cloud, &edge_image, &params.segmentation);
        if segmentation.is_empty() {
            warn!("observation produced no segments");
        }

        let camera = input.viewpoint.x;
        let table_plane = input.table_plane.and_then(|p| orient_plane(&p, &camera));

        info!(
            "observation: {} points ({} foreground), {}x{} range image, {} segments",
            input.cloud.len(),
            fg_cloud.len(),
            bg_range_image.width(),
            bg_range_image.height(),
            segmentation.len()
        );

        Ok(Self {
            input,
            fg_cloud,
            bg_range_image,
            fg_range_image,
            edge_image,
            edge_log,
            feature_clouds,
            feature_images,
            segmentation,
            table_plane,
        })
    }

    /// World position of the sensor.
    #[inline]
    pub fn camera_position(&self) -> Vector3<f64> {
        self.bg_range_image.geometry.viewpoint.x
    }

    /// Segment of the foreground cell a world point projects to.
    pub fn segment_of_point(&self, p: &Vector3<f64>) -> Option<usize> {
        let (i, j) = self.fg_range_image.project_to_cell(p)?;
        self.segmentation.segment_at(i, j)
    }

    /// Observation with the foreground points of `segments` removed.
    ///
    /// The full scene is kept, so free-space reasoning still sees the
    /// removed surfaces. Returns `None` when nothing would remain.
    pub fn without_segments(&self, segments: &[usize], params: &ScopeParams) -> Result<Option<Self>> {
        let removed = |p: &Vector3<f64>| self.segment_of_point(p).map_or(false, |s| segments.contains(&s));
        let keep = |c: &PointCloud| -> Vec<usize> { (0..c.len()).filter(|&k| !removed(&c.points[k])).collect() };

        let fg_keep = keep(&self.fg_cloud);
        if fg_keep.is_empty() {
            return Ok(None);
        }
        let mut input = self.input.clone();
        input.foreground = Some(self.fg_cloud.subset(&fg_keep));
        input.feature_clouds = self
            .input
            .feature_clouds
            .iter()
            .map(|(ft, c)| (*ft, c.subset(&keep(c))))
            .collect();
        debug!(
            "residual observation keeps {} of {} foreground points",
            fg_keep.len(),
            self.fg_cloud.len()
        );
        Ok(Some(Self::new(input, params)?))
    }
}

/// Per-point edge flag (max over the available edge channels).
fn edge_flags(cloud: &PointCloud) -> Option<Vec<f64>> {
    let channels: Vec<&Vec<f64>> = [&cloud.range_edge, &cloud.curv_edge, &cloud.img_edge]
        .into_iter()
        .flatten()
        .collect();
    if channels.is_empty() {
        return None;
    }
    Some(
        (0..cloud.len())
            .map(|k| channels.iter().map(|c| c[k]).fold(0.0, f64::max))
            .collect(),
    )
}

fn flag_edge_image(image: &RangeImage, flags: &[f64]) -> Grid2<f64> {
    image.idx.map(|k| k.map_or(0.0, |k| flags[k].clamp(0.0, 1.0)))
}

/// Occupied cells next to an empty cell or a range jump above `thresh`.
fn discontinuity_edge_image(image: &RangeImage, thresh: f64) -> Grid2<f64> {
    let mut edges = Grid2::new(image.width(), image.height(), 0.0);
    for (i, j) in image.occupied_cells() {
        let r = *image.image.get(i, j);
        let boundary = [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)].iter().any(|&(di, dj)| {
            match image.image.get_signed(i as i64 + di, j as i64 + dj) {
                Some(&rn) => rn < 0.0 || (rn - r).abs() > thresh,
                None => true,
            }
        });
        if boundary {
            edges.set(i, j, 1.0);
        }
    }
    edges
}

fn blur_and_normalize(mut edges: Grid2<f64>, passes: usize) -> Grid2<f64> {
    for _ in 0..passes {
        edges = edges.blurred();
    }
    let max = edges.max_value();
    if max > 0.0 {
        edges = edges.map(|e| e / max);
    }
    edges
}

/// Normalize a plane and orient its normal towards `camera`.
fn orient_plane(plane: &Vector4<f64>, camera: &Vector3<f64>) -> Option<Vector4<f64>> {
    let n = plane.fixed_rows::<3>(0).norm();
    if n < 1e-12 {
        return None;
    }
    let p = plane / n;
    let side = p.x * camera.x + p.y * camera.y + p.z * camera.z + p.w;
    Some(if side < 0.0 { -p } else { p })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{box_model, synthetic_observation, test_params, true_pose};

    #[test]
    fn test_observation_from_synthetic_scene() {
        let params = test_params();
        let model = box_model();
        let obs = ObservationData::new(synthetic_observation(&model.cloud, &true_pose()), &params).unwrap();
        assert!(!obs.segmentation.is_empty());
        assert!(obs.feature_images.contains_key(&FeatureType::Fpfh));
        // Silhouette cells carry high edge probability
        assert!(obs.edge_image.max_value() > 0.99);
        for (i, j) in obs.edge_log.coords() {
            assert!(*obs.edge_log.get(i, j) >= params.edge_eps.ln() - 1e-12);
            assert!(*obs.edge_log.get(i, j) <= 1e-12);
        }
    }

    #[test]
    fn test_without_segments_shrinks_foreground() {
        let params = test_params();
        let model = box_model();
        let obs = ObservationData::new(synthetic_observation(&model.cloud, &true_pose()), &params).unwrap();
        let residual = obs.without_segments(&[0], &params).unwrap().unwrap();
        assert!(residual.fg_cloud.len() < obs.fg_cloud.len());
        assert_eq!(residual.input.cloud.len(), obs.input.cloud.len());
        let all: Vec<usize> = (0..obs.segmentation.len()).collect();
        assert!(obs.without_segments(&all, &params).unwrap().is_none());
    }

    #[test]
    fn test_orient_plane_faces_camera() {
        let plane = Vector4::new(0.0, -2.0, 0.0, 1.0);
        let p = orient_plane(&plane, &Vector3::zeros()).unwrap();
        assert!((p.fixed_rows::<3>(0).norm() - 1.0).abs() < 1e-12);
        assert!(p.w > 0.0);
        assert!(orient_plane(&Vector4::zeros(), &Vector3::zeros()).is_none());
    }
}
