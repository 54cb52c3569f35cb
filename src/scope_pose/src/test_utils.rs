//! Test utilities: synthetic models and scenes with known ground truth.
//!
//! The generators are noise-free. An observation built from a model at a
//! known pose reuses the model's descriptors, so feature matches between
//! the two are exact.

use nalgebra::{UnitQuaternion, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::cloud::{FeatureType, PointCloud};
use crate::geometry::Pose;
use crate::model::ModelInput;
use crate::observation::ObservationInput;
use crate::params::ScopeParams;
use crate::symmetry::ModelSymmetry;

/// Random unit descriptor of length `dim`.
fn random_descriptor(dim: usize, rng: &mut StdRng) -> Vec<f64> {
    let v: Vec<f64> = (0..dim).map(|_| rng.sample::<f64, _>(StandardNormal)).collect();
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt().max(1e-12);
    v.into_iter().map(|x| x / norm).collect()
}

/// Generate a box surface sampled on each face's interior.
///
/// # Arguments
/// * `size` - Edge lengths along x, y, z
/// * `spacing` - Approximate grid spacing on every face
///
/// Every point carries an outward normal, a curvature direction lying in
/// its face (x on the ±z faces, y on the ±x faces, z on the ±y faces),
/// `pc1 = 2`, `pc2 = 1`, a per-face Lab color and a unique random FPFH
/// descriptor.
pub fn make_box_cloud(size: Vector3<f64>, spacing: f64, seed: u64) -> PointCloud {
    let half = size / 2.0;
    let mut points = Vec::new();
    let mut normals = Vec::new();
    let mut dirs = Vec::new();
    let mut labs = Vec::new();

    // (normal axis, first in-face axis, second in-face axis)
    let faces = [(2usize, 0usize, 1usize), (0, 1, 2), (1, 2, 0)];
    for (f, &(axis, a, b)) in faces.iter().enumerate() {
        let na = ((size[a] / spacing).round() as usize).max(1);
        let nb = ((size[b] / spacing).round() as usize).max(1);
        for sign in [1.0, -1.0] {
            let mut normal = Vector3::zeros();
            normal[axis] = sign;
            let mut dir = Vector3::zeros();
            dir[a] = 1.0;
            let face_id = 2 * f + usize::from(sign < 0.0);
            let lab = Vector3::new(40.0 + 8.0 * face_id as f64, 10.0 * f as f64 - 10.0, 5.0 * sign);
            for ia in 0..na {
                for ib in 0..nb {
                    let mut p = Vector3::zeros();
                    p[axis] = sign * half[axis];
                    p[a] = -half[a] + (ia as f64 + 0.5) * size[a] / na as f64;
                    p[b] = -half[b] + (ib as f64 + 0.5) * size[b] / nb as f64;
                    points.push(p);
                    normals.push(normal);
                    dirs.push(dir);
                    labs.push(lab);
                }
            }
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let n = points.len();
    let descriptors = (0..n)
        .map(|_| random_descriptor(FeatureType::Fpfh.dim(), &mut rng))
        .collect();
    PointCloud::from_points(points)
        .with_normals(normals)
        .with_curvature(dirs, vec![2.0; n], vec![1.0; n])
        .with_labs(labs)
        .with_descriptors(FeatureType::Fpfh, descriptors)
}

/// The default test object: a 12 x 8 x 6 cm box sampled every 6 mm.
pub fn box_model() -> ModelInput {
    ModelInput {
        name: "box".to_string(),
        cloud: make_box_cloud(Vector3::new(0.12, 0.08, 0.06), 0.006, 7),
        ..Default::default()
    }
}

/// Generate an open cylinder around the model z axis.
///
/// Descriptors depend on the height ring only, so the model is exactly
/// symmetric under rotations by multiples of `2π / around`.
pub fn make_cylinder_cloud(radius: f64, height: f64, around: usize, rings: usize, seed: u64) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    let ring_descriptors: Vec<Vec<f64>> = (0..rings)
        .map(|_| random_descriptor(FeatureType::Fpfh.dim(), &mut rng))
        .collect();

    let mut points = Vec::new();
    let mut normals = Vec::new();
    let mut dirs = Vec::new();
    let mut descriptors = Vec::new();
    for r in 0..rings {
        let z = -height / 2.0 + (r as f64 + 0.5) * height / rings as f64;
        for k in 0..around {
            let t = 2.0 * std::f64::consts::PI * k as f64 / around as f64;
            let n = Vector3::new(t.cos(), t.sin(), 0.0);
            points.push(Vector3::new(radius * n.x, radius * n.y, z));
            normals.push(n);
            // Maximum curvature runs around the circumference
            dirs.push(Vector3::new(-t.sin(), t.cos(), 0.0));
            descriptors.push(ring_descriptors[r].clone());
        }
    }
    let n = points.len();
    PointCloud::from_points(points)
        .with_normals(normals)
        .with_curvature(dirs, vec![1.0 / radius; n], vec![1.0; n])
        .with_labs(vec![Vector3::new(60.0, 5.0, -5.0); n])
        .with_descriptors(FeatureType::Fpfh, descriptors)
}

/// A line-symmetric cylinder (radius 3 cm, height 10 cm) with its
/// symmetry axis declared.
pub fn cylinder_model() -> ModelInput {
    ModelInput {
        name: "cylinder".to_string(),
        cloud: make_cylinder_cloud(0.03, 0.1, 36, 16, 11),
        symmetries: vec![ModelSymmetry::line(Vector3::zeros(), Vector3::z())],
        ..Default::default()
    }
}

/// Ground-truth pose used by the synthetic scenes: 60 cm in front of the
/// sensor, tilted so three faces of the box are visible.
pub fn true_pose() -> Pose {
    Pose::new(
        Vector3::new(0.01, -0.02, 0.6),
        UnitQuaternion::from_euler_angles(0.5, -0.6, 0.3),
    )
}

/// Observation of `cloud` placed at `pose`, seen by a sensor at the origin
/// looking along +z. Back-facing points are dropped.
pub fn synthetic_observation(cloud: &PointCloud, pose: &Pose) -> ObservationInput {
    let placed = cloud.transformed(pose);
    let visible: Vec<usize> = match placed.normals.as_ref() {
        Some(normals) => (0..placed.len())
            .filter(|&k| normals[k].dot(&placed.points[k]) < 0.0)
            .collect(),
        None => (0..placed.len()).collect(),
    };
    ObservationInput {
        cloud: placed.subset(&visible),
        viewpoint: Pose::identity(),
        ..Default::default()
    }
}

/// Several clouds placed in one scene, merged into a single observation.
pub fn synthetic_scene(objects: &[(&PointCloud, Pose)]) -> ObservationInput {
    let parts: Vec<PointCloud> = objects
        .iter()
        .map(|(cloud, pose)| synthetic_observation(cloud, pose).cloud)
        .collect();
    ObservationInput {
        cloud: merge_clouds(&parts),
        viewpoint: Pose::identity(),
        ..Default::default()
    }
}

/// Three copies of [`box_model`] side by side, far enough apart that no
/// segment spans two of them.
pub fn three_box_scene() -> (ModelInput, ObservationInput, [Pose; 3]) {
    let model = box_model();
    let q = true_pose().q;
    let poses = [-0.22, 0.0, 0.22].map(|x| Pose::new(Vector3::new(x, -0.02, 0.6), q));
    let obs = synthetic_scene(&[
        (&model.cloud, poses[0]),
        (&model.cloud, poses[1]),
        (&model.cloud, poses[2]),
    ]);
    (model, obs, poses)
}

/// Concatenate clouds, keeping only channels present in all of them.
pub fn merge_clouds(parts: &[PointCloud]) -> PointCloud {
    fn join<T: Clone>(parts: &[PointCloud], get: impl Fn(&PointCloud) -> Option<&Vec<T>>) -> Option<Vec<T>> {
        let mut out = Vec::new();
        for p in parts {
            out.extend(get(p)?.iter().cloned());
        }
        Some(out)
    }
    let points = parts.iter().flat_map(|p| p.points.iter().copied()).collect();
    let mut merged = PointCloud::from_points(points);
    if let Some(normals) = join(parts, |p| p.normals.as_ref()) {
        merged = merged.with_normals(normals);
    }
    if let (Some(dirs), Some(pc1), Some(pc2)) = (
        join(parts, |p| p.principal_curvatures.as_ref()),
        join(parts, |p| p.pc1.as_ref()),
        join(parts, |p| p.pc2.as_ref()),
    ) {
        merged = merged.with_curvature(dirs, pc1, pc2);
    }
    if let Some(labs) = join(parts, |p| p.labs.as_ref()) {
        merged = merged.with_labs(labs);
    }
    for ft in FeatureType::ALL {
        if let Some(rows) = join(parts, |p| p.descriptors.get(&ft)) {
            merged = merged.with_descriptors(ft, rows);
        }
    }
    merged
}

/// Parameters sized for the synthetic scenes: coarser images and grids,
/// small sample budgets and short refinement loops.
pub fn test_params() -> ScopeParams {
    let mut params = ScopeParams {
        seed: 1,
        num_samples_round1: 120,
        knn: 5,
        use_sift: false,
        num_samples_round2: 8,
        round2_alignment_iter: 2,
        align_model_to_segments_iter: 2,
        num_samples_round3: 4,
        num_validation_points: 60,
        num_edge_validation_points: 30,
        round4_arc_samples: 12,
        round4_random_samples: 6,
        range_image_resolution: 0.012,
        range_image_padding: 2,
        distance_grid_resolution: 0.004,
        distance_grid_padding: 4,
        ..Default::default()
    };
    params.gradient.max_iterations = 2;
    params.segmentation.resolution = 3;
    params.segmentation.min_cells = 3;
    params
}

/// Relative rotation angle between two orientations, in radians.
pub fn rotation_angle(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>) -> f64 {
    a.angle_to(b)
}
