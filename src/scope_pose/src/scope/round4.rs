//! Round 4: orientation uncertainty of symmetric models.
//!
//! A pose of a symmetric model is only determined up to the symmetry. Each
//! surviving sample is perturbed about the model's symmetry anchor, every
//! perturbation is scored, and a Bingham distribution is fit to the
//! softmax-weighted perturbed orientations.

use nalgebra::{Unit, UnitQuaternion, Vector3, Vector4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use tracing::debug;

use crate::bingham::Bingham;
use crate::geometry::quat_to_wxyz;
use crate::sample::{Sample, SampleSet, REJECTED_SCORE};
use crate::scoring::ScoreContext;
use crate::stats::{child_seeds, softmax_weights};
use crate::symmetry::{line_symmetry, point_symmetry};

fn random_rotation<R: Rng + ?Sized>(sigma: f64, rng: &mut R) -> UnitQuaternion<f64> {
    let v: Vector3<f64> = Vector3::from_fn(|_, _| StandardNormal.sample(rng));
    let angle: f64 = sigma * Distribution::<f64>::sample(&StandardNormal, rng);
    match Unit::try_new(v, 1e-12) {
        Some(axis) => UnitQuaternion::from_axis_angle(&axis, angle),
        None => UnitQuaternion::identity(),
    }
}

/// Model-frame rotations tried around the symmetry anchor, or `None` when
/// the model has no line or point symmetry.
fn symmetry_perturbations<R: Rng + ?Sized>(
    ctx: &ScoreContext<'_>,
    rng: &mut R,
) -> Option<(Vector3<f64>, Vec<UnitQuaternion<f64>>)> {
    let params = ctx.params;
    let symmetries = &ctx.model.symmetries;
    if let Some((point, direction)) = line_symmetry(symmetries) {
        let axis = Unit::new_normalize(direction);
        let n = params.round4_arc_samples.max(1);
        let mut deltas: Vec<UnitQuaternion<f64>> = (0..n)
            .map(|k| UnitQuaternion::from_axis_angle(&axis, 2.0 * std::f64::consts::PI * k as f64 / n as f64))
            .collect();
        deltas.extend((0..params.round4_random_samples).map(|_| random_rotation(params.round4_random_sigma, rng)));
        return Some((point, deltas));
    }
    let center = point_symmetry(symmetries)?;
    let n = (params.round4_arc_samples + params.round4_random_samples).max(1);
    let mut deltas = vec![UnitQuaternion::identity()];
    deltas.extend((1..n).map(|_| random_rotation(params.round4_random_sigma, rng)));
    Some((center, deltas))
}

/// Fit the orientation uncertainty of one sample.
///
/// Returns the fitted distribution and the model-frame symmetry anchor, or
/// `None` when the model has no usable symmetry.
pub fn symmetry_uncertainty<R: Rng + ?Sized>(
    ctx: &ScoreContext<'_>,
    sample: &Sample,
    rng: &mut R,
) -> Option<(Bingham, Vector3<f64>)> {
    let (anchor, deltas) = symmetry_perturbations(ctx, rng)?;
    let seeds = child_seeds(rng, deltas.len());
    let scored: Vec<(Vector4<f64>, f64)> = deltas
        .par_iter()
        .zip(seeds)
        .map(|(delta, seed)| {
            let mut rng = StdRng::seed_from_u64(seed);
            let pose = sample.pose.rotated_about(delta, &anchor);
            let (weight, _) = ctx.score(&pose, &sample.segments, 3, &mut rng);
            (quat_to_wxyz(&pose.q), weight)
        })
        .collect();

    let (quats, scores): (Vec<Vector4<f64>>, Vec<f64>) = scored.into_iter().unzip();
    let weights = softmax_weights(&scores, ctx.params.round4_temperature);
    let b = Bingham::fit_weighted(&quats, &weights)?;
    Some((b, anchor))
}

/// Attach symmetry-aware orientation uncertainty to every sample within
/// `round4_score_thresh` of the best. Poses and weights are unchanged.
pub fn round4<R: Rng + ?Sized>(ctx: &ScoreContext<'_>, mut set: SampleSet, rng: &mut R) -> SampleSet {
    let symmetries = &ctx.model.symmetries;
    if !ctx.params.round4 || (line_symmetry(symmetries).is_none() && point_symmetry(symmetries).is_none()) {
        return set;
    }
    let Some((_, best)) = set.best() else {
        return set;
    };
    let floor = best - ctx.params.round4_score_thresh;

    let mut fitted = 0;
    for (sample, weight) in set.iter_mut() {
        if *weight < floor || *weight <= REJECTED_SCORE {
            continue;
        }
        if let Some((b, x0)) = symmetry_uncertainty(ctx, sample, rng) {
            sample.b = b;
            sample.x0 = Some(x0);
            fitted += 1;
        }
    }
    debug!("round 4 fitted symmetry uncertainty for {} samples", fitted);
    set
}
