//! Round 2: segment-guided re-alignment.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::debug;

use crate::alignment::{align_model_to_segments, sample_segments_given_model_pose};
use crate::bpa::model_pose_likelihood;
use crate::sample::{Sample, SampleSet};
use crate::scoring::ScoreContext;
use crate::stats::child_seeds;

/// Assign segments to every sample (stochastically unless `hard`) and
/// rescore it with the weights of `round`.
pub fn assign_and_score<R: Rng + ?Sized>(
    ctx: &ScoreContext<'_>,
    set: SampleSet,
    round: u8,
    hard: bool,
    blacklist: &[usize],
    rng: &mut R,
) -> SampleSet {
    let seeds = child_seeds(rng, set.len());
    let pairs: Vec<(Sample, f64)> = set
        .into_pairs()
        .into_par_iter()
        .zip(seeds)
        .map(|((mut sample, _), seed)| {
            let mut rng = StdRng::seed_from_u64(seed);
            sample.segments = sample_segments_given_model_pose(ctx, &sample.pose, hard, blacklist, &mut rng);
            let (weight, components) = ctx.score(&sample.pose, &sample.segments, round, &mut rng);
            sample.scores = Some(components);
            (sample, weight)
        })
        .collect();
    SampleSet::from_pairs(pairs)
}

/// One re-alignment pass.
///
/// Each sample draws a fresh stochastic segment assignment and is aligned
/// to it. The aligned pose replaces the sample only when its round-2
/// weight is strictly higher, so weights never decrease.
pub fn realign_step<R: Rng + ?Sized>(
    ctx: &ScoreContext<'_>,
    set: SampleSet,
    blacklist: &[usize],
    rng: &mut R,
) -> SampleSet {
    let seeds = child_seeds(rng, set.len());
    let pairs: Vec<(Sample, f64)> = set
        .into_pairs()
        .into_par_iter()
        .zip(seeds)
        .map(|((sample, weight), seed)| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut candidate = sample.clone();
            candidate.segments = sample_segments_given_model_pose(ctx, &sample.pose, false, blacklist, &mut rng);
            let Some(mut aligned) = align_model_to_segments(ctx, &candidate, &mut rng) else {
                return (sample, weight);
            };
            let (new_weight, components) = ctx.score(&aligned.pose, &aligned.segments, 2, &mut rng);
            if new_weight > weight {
                aligned.scores = Some(components);
                aligned.c_score =
                    model_pose_likelihood(ctx.model, ctx.obs, &aligned.correspondences, &aligned.pose, ctx.params);
                (aligned, new_weight)
            } else {
                (sample, weight)
            }
        })
        .collect();
    SampleSet::from_pairs(pairs)
}

/// Rescore round-1 proposals, keep the best `num_samples_round2` and run
/// `round2_alignment_iter` re-alignment passes.
pub fn round2<R: Rng + ?Sized>(ctx: &ScoreContext<'_>, set: SampleSet, blacklist: &[usize], rng: &mut R) -> SampleSet {
    let params = ctx.params;
    let mut set = assign_and_score(ctx, set, 2, false, blacklist, rng);
    set.sort_descending();
    set.truncate(params.num_samples_round2);

    for iter in 0..params.round2_alignment_iter {
        set = realign_step(ctx, set, blacklist, rng);
        debug!(
            "round 2 pass {}: best weight {:.4}",
            iter,
            set.weights().iter().cloned().fold(f64::NEG_INFINITY, f64::max)
        );
    }
    set.sort_descending();
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Pose;
    use crate::model::ModelData;
    use crate::observation::ObservationData;
    use crate::test_utils::{box_model, synthetic_observation, test_params, true_pose};
    use nalgebra::{UnitQuaternion, Vector3};

    #[test]
    fn test_realignment_never_lowers_weights() {
        let params = test_params();
        let input = box_model();
        let obs = ObservationData::new(synthetic_observation(&input.cloud, &true_pose()), &params).unwrap();
        let model = ModelData::new(input, &params).unwrap();
        let ctx = ScoreContext::new(&model, &obs, &params);
        let mut rng = StdRng::seed_from_u64(4);

        let truth = true_pose();
        let starts = [
            Pose::new(truth.x + Vector3::new(0.01, 0.0, 0.0), truth.q),
            Pose::new(truth.x, truth.q * UnitQuaternion::from_euler_angles(0.0, 0.1, 0.0)),
            Pose::new(truth.x + Vector3::new(0.0, -0.005, 0.01), truth.q),
        ];
        let mut set = SampleSet::new();
        for pose in starts {
            set.push(Sample::new(pose), 0.0);
        }
        let mut set = assign_and_score(&ctx, set, 2, false, &[], &mut rng);

        for _ in 0..3 {
            let before = set.weights().to_vec();
            set = realign_step(&ctx, set, &[], &mut rng);
            assert_eq!(set.len(), before.len());
            for (w, w0) in set.weights().iter().zip(&before) {
                assert!(w >= w0);
            }
        }
    }

    #[test]
    fn test_round2_truncates_and_sorts() {
        let mut params = test_params();
        params.num_samples_round2 = 2;
        params.round2_alignment_iter = 1;
        let input = box_model();
        let obs = ObservationData::new(synthetic_observation(&input.cloud, &true_pose()), &params).unwrap();
        let model = ModelData::new(input, &params).unwrap();
        let ctx = ScoreContext::new(&model, &obs, &params);
        let mut rng = StdRng::seed_from_u64(8);

        let mut set = SampleSet::new();
        for k in 0..5 {
            let offset = Vector3::new(0.004 * k as f64, 0.0, 0.0);
            set.push(Sample::new(Pose::new(true_pose().x + offset, true_pose().q)), 0.0);
        }
        let set = round2(&ctx, set, &[], &mut rng);
        assert_eq!(set.len(), 2);
        assert!(set.weight(0) >= set.weight(1));
    }
}
