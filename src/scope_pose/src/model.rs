//! Per-model derived data, built once and read-only during search.

use std::collections::{BTreeMap, HashSet};

use anyhow::{bail, Result};
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use nalgebra::Vector3;
use tracing::{debug, info};

use crate::cloud::{FeatureIndex, FeatureType, PointCloud, DEFAULT_NUM_VIEWS};
use crate::distance_grid::DistanceGrid;
use crate::geometry::{fibonacci_sphere, Pose};
use crate::params::ScopeParams;
use crate::range_image::RangeImage;
use crate::stats::logistic;
use crate::symmetry::{line_symmetry, point_symmetry, ModelSymmetry};

/// Number of score terms with recalibration coefficients.
pub const NUM_CALIBRATED_TERMS: usize = 11;

/// Range-image neighbors that differ by more than this many times the
/// model's point spacing mark a depth discontinuity.
const RENDER_EDGE_JUMP: f64 = 4.0;

/// Logistic recalibration coefficients `(b0, b1)` per score term, in the
/// order xyz, normal, vis, random_walk, edge, edge_vis, edge_occ, L, A, B,
/// fpfh.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreCompModels {
    pub coeffs: [[f64; 2]; NUM_CALIBRATED_TERMS],
}

impl ScoreCompModels {
    /// Build from an 11×2 matrix.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        if rows.len() != NUM_CALIBRATED_TERMS {
            bail!(
                "score comp models need {NUM_CALIBRATED_TERMS} rows, got {}",
                rows.len()
            );
        }
        let mut coeffs = [[0.0; 2]; NUM_CALIBRATED_TERMS];
        for (i, row) in rows.iter().enumerate() {
            if row.len() != 2 {
                bail!("score comp model row {i} has {} values, expected 2", row.len());
            }
            coeffs[i] = [row[0], row[1]];
        }
        Ok(Self { coeffs })
    }

    /// `1 / (1 + exp(-b1 * score - b0))` for term `term`.
    #[inline]
    pub fn calibrate(&self, term: usize, score: f64) -> f64 {
        let [b0, b1] = self.coeffs[term];
        logistic(b1 * score + b0)
    }
}

/// Descriptor cloud of one feature type with its search index.
#[derive(Debug)]
pub struct FeatureModel {
    pub cloud: PointCloud,
    pub index: FeatureIndex,
}

/// Silhouette edge points of the model seen from one stored viewpoint.
#[derive(Debug, Clone)]
pub struct RangeEdgeView {
    /// Unit direction from the model center towards the viewpoint, in the
    /// model frame.
    pub direction: Vector3<f64>,
    pub points: Vec<Vector3<f64>>,
}

/// Multi-view range-edge model.
#[derive(Debug, Clone, Default)]
pub struct RangeEdgeModel {
    pub views: Vec<RangeEdgeView>,
}

impl RangeEdgeModel {
    /// Group a range-edge cloud by its per-point `vx, vy, vz` viewpoint.
    pub fn from_cloud(cloud: &PointCloud, center: &Vector3<f64>) -> Result<Self> {
        let Some(viewpoints) = cloud.viewpoints.as_ref() else {
            bail!("range edge cloud has no vx/vy/vz viewpoint channels");
        };
        let mut views: Vec<(Vector3<f64>, Vec<Vector3<f64>>)> = Vec::new();
        for (p, vp) in cloud.points.iter().zip(viewpoints) {
            match views.iter_mut().find(|(v, _)| (v - vp).norm() < 1e-9) {
                Some((_, pts)) => pts.push(*p),
                None => views.push((*vp, vec![*p])),
            }
        }
        let views = views
            .into_iter()
            .map(|(vp, mut points)| {
                sort_points(&mut points);
                RangeEdgeView {
                    direction: unit_or_z(&(vp - center)),
                    points,
                }
            })
            .collect();
        Ok(Self { views })
    }

    /// Render silhouette edges of `cloud` from `num_views` directions on a
    /// Fibonacci sphere.
    pub fn render(cloud: &PointCloud, num_views: usize) -> Result<Self> {
        let center = cloud.centroid();
        let radius = cloud
            .points
            .iter()
            .map(|p| (p - center).norm())
            .fold(0.0, f64::max)
            .max(1e-3);
        let spacing = mean_point_spacing(&cloud.points).max(radius * 1e-3);
        let distance = 4.0 * radius;
        // One cell per point at the rendering distance
        let res = 1.5 * spacing / distance;
        let jump = RENDER_EDGE_JUMP * spacing;

        let mut views = Vec::with_capacity(num_views);
        for direction in fibonacci_sphere(num_views) {
            let eye = center + direction * distance;
            let camera = Pose::looking_at(&eye, &center);
            let image = RangeImage::build(cloud, camera, res, 1)?;
            let mut points = Vec::new();
            for (i, j) in image.occupied_cells() {
                let r = *image.image.get(i, j);
                let boundary = [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)]
                    .iter()
                    .any(|&(di, dj)| {
                        match image.image.get_signed(i as i64 + di, j as i64 + dj) {
                            Some(&rn) => rn < 0.0 || rn - r > jump,
                            None => true,
                        }
                    });
                if boundary {
                    if let Some(k) = *image.idx.get(i, j) {
                        points.push(cloud.points[k]);
                    }
                }
            }
            sort_points(&mut points);
            views.push(RangeEdgeView { direction, points });
        }
        debug!(
            "rendered {} range edge views, {} edge points on average",
            views.len(),
            views.iter().map(|v| v.points.len()).sum::<usize>() / views.len().max(1)
        );
        Ok(Self { views })
    }

    /// Stored view closest (by cosine) to a model-frame view direction.
    pub fn nearest_view(&self, direction: &Vector3<f64>) -> Option<usize> {
        nearest_direction(self.views.iter().map(|v| &v.direction), direction)
    }
}

fn sort_points(points: &mut [Vector3<f64>]) {
    points.sort_by(|a, b| {
        (a.x, a.y, a.z)
            .partial_cmp(&(b.x, b.y, b.z))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn unit_or_z(v: &Vector3<f64>) -> Vector3<f64> {
    let n = v.norm();
    if n > 1e-12 {
        v / n
    } else {
        Vector3::z()
    }
}

/// Index of the direction with maximum cosine to `query`.
fn nearest_direction<'a>(
    directions: impl Iterator<Item = &'a Vector3<f64>>,
    query: &Vector3<f64>,
) -> Option<usize> {
    let q = unit_or_z(query);
    directions
        .enumerate()
        .map(|(i, d)| (i, d.dot(&q)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
}

/// Mean distance from each distinct point to its nearest neighbor.
fn mean_point_spacing(points: &[Vector3<f64>]) -> f64 {
    let mut seen = HashSet::with_capacity(points.len());
    let coords: Vec<[f64; 3]> = points
        .iter()
        .map(|p| [p.x + 0.0, p.y + 0.0, p.z + 0.0])
        .filter(|c| seen.insert(c.map(f64::to_bits)))
        .collect();
    if coords.len() < 2 {
        return 0.0;
    }
    let tree: ImmutableKdTree<f64, u64, 3, 32> = (&*coords).into();
    let total: f64 = coords
        .iter()
        .map(|c| {
            tree.nearest_n::<SquaredEuclidean>(c, 2)
                .iter()
                .map(|nn| nn.distance)
                .fold(0.0, f64::max)
                .sqrt()
        })
        .sum();
    total / coords.len() as f64
}

/// Everything a model brings to a SCOPE run.
#[derive(Debug, Clone, Default)]
pub struct ModelInput {
    pub name: String,
    pub cloud: PointCloud,
    /// Separate descriptor clouds; descriptor blocks of `cloud` are used
    /// for types missing here.
    pub feature_clouds: BTreeMap<FeatureType, PointCloud>,
    pub range_edges: Option<PointCloud>,
    /// Precomputed distance grid; computed from the model points when absent.
    pub distance_grid: Option<DistanceGrid>,
    pub symmetries: Vec<ModelSymmetry>,
    pub score_comp_models: Option<ScoreCompModels>,
}

/// Derived, read-only model data.
#[derive(Debug)]
pub struct ModelData {
    pub name: String,
    pub cloud: PointCloud,
    pub features: BTreeMap<FeatureType, FeatureModel>,
    pub range_edges: RangeEdgeModel,
    /// Viewpoint directions indexing the columns of `cloud.ved`.
    pub viewpoints: Vec<Vector3<f64>>,
    pub distance_grid: DistanceGrid,
    pub symmetries: Vec<ModelSymmetry>,
    pub score_comp_models: Option<ScoreCompModels>,
    pub center: Vector3<f64>,
}

impl ModelData {
    /// Precompute feature indices, range-edge views, the viewpoint table
    /// and the distance grid.
    pub fn new(input: ModelInput, params: &ScopeParams) -> Result<Self> {
        let ModelInput {
            name,
            cloud,
            mut feature_clouds,
            range_edges,
            distance_grid,
            symmetries,
            score_comp_models,
        } = input;
        if cloud.is_empty() {
            bail!("model '{name}' has no points");
        }
        let center = cloud.centroid();

        let mut features = BTreeMap::new();
        for ft in FeatureType::ALL {
            let source = match feature_clouds.remove(&ft) {
                Some(c) => c,
                None if cloud.descriptors(ft).is_some() => cloud.clone(),
                None => continue,
            };
            let Some(rows) = source.descriptors(ft) else {
                bail!("model '{name}' {ft:?} cloud carries no {ft:?} descriptors");
            };
            let index = FeatureIndex::build(ft, rows)?;
            features.insert(
                ft,
                FeatureModel {
                    cloud: source,
                    index,
                },
            );
        }

        let range_edges = match range_edges {
            Some(edges) => RangeEdgeModel::from_cloud(&edges, &center)?,
            None => RangeEdgeModel::render(&cloud, DEFAULT_NUM_VIEWS)?,
        };

        let num_ved = cloud.ved.as_ref().and_then(|v| v.first()).map_or(0, Vec::len);
        let viewpoints = if num_ved > 0 && num_ved == range_edges.views.len() {
            range_edges.views.iter().map(|v| v.direction).collect()
        } else if num_ved > 0 {
            fibonacci_sphere(num_ved)
        } else {
            Vec::new()
        };

        let distance_grid = match distance_grid {
            Some(grid) => grid,
            None => DistanceGrid::build(
                &cloud.points,
                cloud.normals.as_deref(),
                params.distance_grid_resolution,
                params.distance_grid_padding,
            )?,
        };

        if let Some((_, dir)) = line_symmetry(&symmetries) {
            debug!("model '{name}' has a line symmetry along {:?}", dir.as_slice());
        } else if point_symmetry(&symmetries).is_some() {
            debug!("model '{name}' has a point symmetry");
        }
        info!(
            "loaded model '{}': {} points, {} feature types, {} edge views",
            name,
            cloud.len(),
            features.len(),
            range_edges.views.len()
        );

        Ok(Self {
            name,
            cloud,
            features,
            range_edges,
            viewpoints,
            distance_grid,
            symmetries,
            score_comp_models,
            center,
        })
    }

    /// Model-frame direction from the model center to a world camera
    /// position, under `pose`.
    pub fn view_direction(&self, pose: &Pose, camera: &Vector3<f64>) -> Vector3<f64> {
        pose.inverse_transform_point(camera) - self.center
    }

    /// Column of the `ved` table for a model-frame view direction.
    pub fn nearest_viewpoint(&self, direction: &Vector3<f64>) -> Option<usize> {
        nearest_direction(self.viewpoints.iter(), direction)
    }

    /// Distance to the silhouette edge of point `i` seen from stored
    /// viewpoint `view`, when the model has a `ved` table.
    pub fn edge_distance(&self, i: usize, view: Option<usize>) -> Option<f64> {
        let ved = self.cloud.ved.as_ref()?;
        ved.get(i)?.get(view?).copied()
    }

    pub fn feature(&self, ft: FeatureType) -> Option<&FeatureModel> {
        self.features.get(&ft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::box_model;
    use approx::assert_relative_eq;

    #[test]
    fn test_score_comp_models() {
        let rows: Vec<Vec<f64>> = (0..11).map(|i| vec![0.0, i as f64]).collect();
        let m = ScoreCompModels::from_rows(&rows).unwrap();
        assert_relative_eq!(m.calibrate(0, 5.0), 0.5);
        assert!(m.calibrate(3, 1.0) > 0.9);
        assert!(ScoreCompModels::from_rows(&rows[..10]).is_err());
        let mut bad = rows.clone();
        bad[2].push(1.0);
        assert!(ScoreCompModels::from_rows(&bad).is_err());
    }

    #[test]
    fn test_range_edges_from_cloud_groups_views() {
        let points = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ];
        let vps = vec![
            Vector3::new(0.0, 0.0, 5.0),
            Vector3::new(0.0, 0.0, 5.0),
            Vector3::new(5.0, 0.0, 0.0),
        ];
        let cloud = PointCloud::from_points(points).with_viewpoints(vps);
        let model = RangeEdgeModel::from_cloud(&cloud, &Vector3::zeros()).unwrap();
        assert_eq!(model.views.len(), 2);
        assert_eq!(model.views[0].points.len(), 2);
        assert_eq!(model.nearest_view(&Vector3::new(1.0, 0.1, 0.0)), Some(1));
        assert!(RangeEdgeModel::from_cloud(&PointCloud::default(), &Vector3::zeros()).is_err());
    }

    #[test]
    fn test_point_spacing_ignores_repeated_points() {
        let mut points: Vec<Vector3<f64>> = (0..4).map(|i| Vector3::new(i as f64 * 0.01, 0.0, 0.0)).collect();
        points.extend(std::iter::repeat(Vector3::zeros()).take(200));
        points.push(Vector3::new(-0.0, 0.0, 0.0));
        assert_relative_eq!(mean_point_spacing(&points), 0.01, epsilon = 1e-12);
        assert_eq!(mean_point_spacing(&vec![Vector3::new(1.0, 2.0, 3.0); 64]), 0.0);
    }

    #[test]
    fn test_model_data_renders_edges() {
        let params = crate::test_utils::test_params();
        let model = ModelData::new(box_model(), &params).unwrap();
        assert_eq!(model.range_edges.views.len(), DEFAULT_NUM_VIEWS);
        assert!(model.features.contains_key(&FeatureType::Fpfh));
        for view in &model.range_edges.views {
            assert!(!view.points.is_empty());
            // Silhouette points are a strict subset of the model
            assert!(view.points.len() < model.cloud.len());
        }
        let camera = Vector3::new(0.0, 0.0, 10.0);
        let dir = model.view_direction(&Pose::identity(), &camera);
        let view = model.range_edges.nearest_view(&dir).unwrap();
        assert!(model.range_edges.views[view].direction.z > 0.8);
    }
}
