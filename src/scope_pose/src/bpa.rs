//! Bingham Procrustean Alignment.
//!
//! Turns a set of point correspondences into a pose and an orientation
//! distribution by multiplying two kinds of Bingham evidence:
//!
//! - a least-squares term per correspondence, constraining the rotation
//!   that maps the centered model vector onto the centered observed vector
//!   (free about that vector);
//! - an OLF term per correspondence, aligning the model's curvature frame
//!   with the observed one.
//!
//! The orientation is the mode of the product, so the result is
//! deterministic for fixed inputs and flip choices. The translation
//! maps the model centroid of the correspondences onto the observed one.

use nalgebra::{Vector3, Vector4};
use rand::Rng;

use crate::bingham::Bingham;
use crate::correspondence::{resolve_all, Correspondence, ResolvedCorrespondence};
use crate::geometry::{quat_to_wxyz, vector_to_possible_quaternion, wxyz_to_quat, Pose};
use crate::model::ModelData;
use crate::observation::ObservationData;
use crate::params::ScopeParams;
use crate::stats::gaussian_log_ratio;

/// Centered vectors shorter than this carry no direction.
const MIN_LEVER: f64 = 1e-9;

/// Outcome of one alignment.
#[derive(Debug, Clone)]
pub struct BpaResult {
    pub pose: Pose,
    /// Orientation distribution of the pose.
    pub b: Bingham,
    /// Curvature-sign choice per correspondence (0 for position-only ones).
    pub flips: Vec<usize>,
}

fn centroids(pairs: &[ResolvedCorrespondence]) -> (Vector3<f64>, Vector3<f64>) {
    let n = pairs.len() as f64;
    let obs = pairs.iter().map(|p| p.obs.position).sum::<Vector3<f64>>() / n;
    let model = pairs.iter().map(|p| p.model.position).sum::<Vector3<f64>>() / n;
    (obs, model)
}

/// Distribution of rotations taking the direction of `u_model` onto the
/// direction of `u_obs`, free about `u_obs`.
fn least_squares_factor<R: Rng + ?Sized>(
    u_obs: &Vector3<f64>,
    u_model: &Vector3<f64>,
    sigma: f64,
    rng: &mut R,
) -> Bingham {
    let k = u_obs.norm() * u_model.norm() / (sigma * sigma);
    // Rotations about the x axis
    let base = Bingham::new(
        [
            Vector4::new(0.0, 0.0, 1.0, 0.0),
            Vector4::new(0.0, 0.0, 0.0, 1.0),
            Vector4::new(0.0, 1.0, 0.0, 0.0),
        ],
        Vector3::new(-2.0 * k, -2.0 * k, 0.0),
    );
    let q_obs = vector_to_possible_quaternion(u_obs, rng);
    let q_model = vector_to_possible_quaternion(u_model, rng);
    base.right_multiply(&q_model.inverse()).left_multiply(&q_obs)
}

fn least_squares_factors<R: Rng + ?Sized>(
    pairs: &[ResolvedCorrespondence],
    sigma: f64,
    rng: &mut R,
) -> Vec<Bingham> {
    if pairs.len() < 2 {
        return Vec::new();
    }
    let (mean_obs, mean_model) = centroids(pairs);
    pairs
        .iter()
        .filter_map(|p| {
            let u_obs = p.obs.position - mean_obs;
            let u_model = p.model.position - mean_model;
            (u_obs.norm() > MIN_LEVER && u_model.norm() > MIN_LEVER)
                .then(|| least_squares_factor(&u_obs, &u_model, sigma, rng))
        })
        .collect()
}

/// OLF evidence of one correspondence for both curvature signs of the
/// observed frame. `None` for position-only correspondences.
fn olf_factors(pair: &ResolvedCorrespondence) -> Option<[Bingham; 2]> {
    let obs_frames = pair.obs.frames?;
    let model = pair.model.bingham(0)?.invert();
    Some([
        model.left_multiply(&obs_frames[0]),
        model.left_multiply(&obs_frames[1]),
    ])
}

/// Align correspondences.
///
/// # Arguments
/// * `pairs` - Resolved observed/model OLF pairs
/// * `xyz_sigma` - Position noise scale of the least-squares term
/// * `sample_pose` - Draw the orientation from the result instead of
///   taking its mode
///
/// Returns `None` for an empty correspondence set.
pub fn align<R: Rng + ?Sized>(
    pairs: &[ResolvedCorrespondence],
    xyz_sigma: f64,
    sample_pose: bool,
    rng: &mut R,
) -> Option<BpaResult> {
    if pairs.is_empty() {
        return None;
    }
    let (mean_obs, mean_model) = centroids(pairs);
    let ls = Bingham::multiply(&least_squares_factors(pairs, xyz_sigma, rng));

    let mut factors = vec![ls.clone()];
    let mut flips = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let Some(candidates) = olf_factors(pair) else {
            flips.push(0);
            continue;
        };
        let flip = if ls.is_uniform() {
            rng.gen_range(0..2)
        } else {
            let fit = |b: &Bingham| ls.log_density_unnormalized(&b.mode());
            usize::from(fit(&candidates[1]) > fit(&candidates[0]))
        };
        flips.push(flip);
        let [c0, c1] = candidates;
        factors.push(if flip == 0 { c0 } else { c1 });
    }

    let b = Bingham::multiply(&factors);
    let q = if sample_pose {
        b.sample(1, rng)
            .first()
            .map_or_else(|| b.mode_quat(), wxyz_to_quat)
    } else {
        b.mode_quat()
    };
    let x = mean_obs - q * mean_model;
    Some(BpaResult {
        pose: Pose::new(x, q),
        b,
        flips,
    })
}

/// Resolve and align correspondences between a model and an observation.
pub fn bpa<R: Rng + ?Sized>(
    model: &ModelData,
    obs: &ObservationData,
    correspondences: &[Correspondence],
    params: &ScopeParams,
    rng: &mut R,
) -> Option<BpaResult> {
    let pairs = resolve_all(model, obs, correspondences);
    align(&pairs, params.xyz_sigma, params.bpa_sample_pose, rng)
}

/// Unnormalized log-likelihood of `pose` under its correspondences.
///
/// Sums a Gaussian position term per correspondence and, for oriented
/// ones, the OLF Bingham log density of the orientation under the better
/// curvature sign.
pub fn pose_likelihood(pairs: &[ResolvedCorrespondence], pose: &Pose, xyz_sigma: f64) -> f64 {
    let q = quat_to_wxyz(&pose.q);
    pairs
        .iter()
        .map(|pair| {
            let d = (pose.transform_point(&pair.model.position) - pair.obs.position).norm();
            let position = gaussian_log_ratio(d, xyz_sigma);
            let orientation = olf_factors(pair).map_or(0.0, |[c0, c1]| {
                c0.log_density_unnormalized(&q)
                    .max(c1.log_density_unnormalized(&q))
            });
            position + orientation
        })
        .sum()
}

/// [`pose_likelihood`] of a sample's correspondences.
pub fn model_pose_likelihood(
    model: &ModelData,
    obs: &ObservationData,
    correspondences: &[Correspondence],
    pose: &Pose,
    params: &ScopeParams,
) -> f64 {
    pose_likelihood(&resolve_all(model, obs, correspondences), pose, params.xyz_sigma)
}
