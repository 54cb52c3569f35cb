//! Round 3: gradient refinement and final scoring.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::debug;

use super::redundancy::remove_redundant_pose_samples;
use crate::alignment::{gradient_refine, sample_segments_given_model_pose};
use crate::bpa::model_pose_likelihood;
use crate::sample::{Sample, SampleSet, REJECTED_SCORE};
use crate::scoring::ScoreContext;
use crate::stats::child_seeds;
use crate::symmetry::line_symmetry;

/// Refine one sample and score it with hard segment membership.
///
/// `final_alignment_iter = 0` skips the refinement. Samples left without
/// segments get [`REJECTED_SCORE`].
pub fn refine_sample<R: Rng + ?Sized>(
    ctx: &ScoreContext<'_>,
    mut sample: Sample,
    blacklist: &[usize],
    rng: &mut R,
) -> (Sample, f64) {
    if ctx.params.final_alignment_iter > 0 {
        sample.pose = gradient_refine(*ctx, &sample.pose, rng).pose;
    }
    sample.segments = sample_segments_given_model_pose(ctx, &sample.pose, true, blacklist, rng);
    let (weight, components) = ctx.score(&sample.pose, &sample.segments, 3, rng);
    sample.scores = Some(components);
    sample.c_score = model_pose_likelihood(ctx.model, ctx.obs, &sample.correspondences, &sample.pose, ctx.params);
    if sample.segments.is_empty() {
        return (sample, REJECTED_SCORE);
    }
    (sample, weight)
}

/// Deduplicate, keep the best `num_samples_round3` and refine each.
///
/// Input must be sorted.
pub fn round3<R: Rng + ?Sized>(ctx: &ScoreContext<'_>, set: SampleSet, blacklist: &[usize], rng: &mut R) -> SampleSet {
    let params = ctx.params;
    let mut set = set;
    if params.remove_redundant_round3 {
        let symmetry = line_symmetry(&ctx.model.symmetries);
        let before = set.len();
        set = remove_redundant_pose_samples(set, params.x_cluster_thresh, params.q_cluster_thresh, symmetry.as_ref());
        debug!("round 3 dedup: {} -> {} samples", before, set.len());
    }
    set.truncate(params.num_samples_round3);

    let seeds = child_seeds(rng, set.len());
    let pairs: Vec<(Sample, f64)> = set
        .into_pairs()
        .into_par_iter()
        .zip(seeds)
        .map(|((sample, _), seed)| {
            let mut rng = StdRng::seed_from_u64(seed);
            refine_sample(ctx, sample, blacklist, &mut rng)
        })
        .collect();

    let mut set = SampleSet::from_pairs(pairs);
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
    fn test_lost_samples_are_rejected() {
        let params = test_params();
        let input = box_model();
        let obs = ObservationData::new(synthetic_observation(&input.cloud, &true_pose()), &params).unwrap();
        let model = ModelData::new(input, &params).unwrap();
        let ctx = ScoreContext::new(&model, &obs, &params);
        let mut rng = StdRng::seed_from_u64(6);

        let mut set = SampleSet::new();
        set.push(Sample::new(true_pose()), 0.0);
        set.push(Sample::new(Pose::new(Vector3::new(0.4, 0.4, 2.0), UnitQuaternion::identity())), 0.0);
        let set = round3(&ctx, set, &[], &mut rng);

        assert_eq!(set.len(), 2);
        assert!(set.weight(0) > REJECTED_SCORE);
        assert_eq!(set.weight(1), REJECTED_SCORE);
        let (dx, dq) = set.sample(0).pose.distance_to(&true_pose());
        assert!(dx < 0.01 && dq < 0.05);
        assert!(!set.sample(0).segments.is_empty());
    }

    #[test]
    fn test_zero_alignment_rounds_keep_the_pose() {
        let mut params = test_params();
        params.final_alignment_iter = 0;
        let input = box_model();
        let truth = true_pose();
        let obs = ObservationData::new(synthetic_observation(&input.cloud, &truth), &params).unwrap();
        let model = ModelData::new(input, &params).unwrap();
        let ctx = ScoreContext::new(&model, &obs, &params);

        let start = Pose::new(truth.x + Vector3::new(0.003, 0.0, 0.0), truth.q);
        let (sample, _) = refine_sample(&ctx, Sample::new(start), &[], &mut StdRng::seed_from_u64(2));
        assert_eq!(sample.pose, start);
    }
}
