//! SCOPE: single-object pose search.
//!
//! A run moves through four rounds:
//! - **Round 1**: single-correspondence BPA proposals from descriptor
//!   matches, scored by free-space violations and optionally clustered
//! - **Round 2**: full scoring, then segment-guided re-alignment that only
//!   accepts improvements
//! - **Round 3**: deduplication, gradient refinement and hard segment
//!   assignment
//! - **Round 4**: Bingham orientation uncertainty for symmetric models
//!
//! Samples that lose every segment are kept with [`REJECTED_SCORE`] so
//! they sink to the bottom of the ranking.
//!
//! [`REJECTED_SCORE`]: crate::sample::REJECTED_SCORE

mod redundancy;
mod round1;
mod round2;
mod round3;
mod round4;

pub use redundancy::{
    good_pose_counts, remove_redundant_pose_samples, symmetric_pose_distance, GoodPoseCounts, GOOD_POSE,
    GREAT_POSE,
};
pub use round1::{cluster_pose_samples, round1, sample_feature_correspondence, sift_correspondences};
pub use round2::{assign_and_score, realign_step, round2};
pub use round3::{refine_sample, round3};
pub use round4::{round4, symmetry_uncertainty};

use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::model::ModelData;
use crate::observation::ObservationData;
use crate::params::ScopeParams;
use crate::sample::SampleSet;
use crate::scoring::ScoreContext;
use crate::time_phase;
use crate::timing::{RunTiming, TimingCollector};

/// Ranked samples of a SCOPE run with its timing breakdown.
#[derive(Debug, Clone, Default)]
pub struct ScopeResult {
    pub samples: SampleSet,
    /// Empty unless the `profiling` feature is enabled.
    pub timing: RunTiming,
}

/// Estimate the pose of `model` in `obs`.
///
/// # Arguments
/// * `blacklist` - Segments claimed elsewhere; they seed no proposals and
///   are never assigned
///
/// Returns an empty set when round 1 finds no proposal.
pub fn scope(
    model: &ModelData,
    obs: &ObservationData,
    params: &ScopeParams,
    blacklist: &[usize],
    rng: &mut StdRng,
) -> ScopeResult {
    let ctx = ScoreContext::new(model, obs, params);
    let mut collector = TimingCollector::new();
    collector.start_run();

    let set = time_phase!(collector, "round1", round1(&ctx, blacklist, rng));
    collector.record_samples(set.len());
    if set.is_empty() {
        info!("SCOPE '{}': no proposals", model.name);
        return ScopeResult {
            samples: set,
            timing: collector.finish(),
        };
    }

    let set = time_phase!(collector, "round2", round2(&ctx, set, blacklist, rng));
    collector.record_samples(set.len());
    let set = time_phase!(collector, "round3", round3(&ctx, set, blacklist, rng));
    collector.record_samples(set.len());
    let set = time_phase!(collector, "round4", round4(&ctx, set, rng));
    collector.record_samples(set.len());

    if let Some((best, weight)) = set.best() {
        debug!(
            "SCOPE '{}' best pose x={:?} weight={:.4}",
            model.name,
            best.pose.x.as_slice(),
            weight
        );
    }
    info!("SCOPE '{}': {} samples", model.name, set.len());

    ScopeResult {
        samples: set,
        timing: collector.finish(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{box_model, synthetic_observation, test_params, true_pose};
    use rand::SeedableRng;

    #[test]
    fn test_scope_recovers_box_pose() {
        let params = test_params();
        let input = box_model();
        let obs = ObservationData::new(synthetic_observation(&input.cloud, &true_pose()), &params).unwrap();
        let model = ModelData::new(input, &params).unwrap();
        let mut rng = StdRng::seed_from_u64(params.seed);

        let result = scope(&model, &obs, &params, &[], &mut rng);
        let set = &result.samples;
        assert!(!set.is_empty());
        assert!(set.len() <= params.num_samples_round3);
        assert!(set.weights().windows(2).all(|w| w[0] >= w[1]));

        let (best, _) = set.best().unwrap();
        let (dx, dq) = best.pose.distance_to(&true_pose());
        #[cfg(feature = "test-verbose")]
        println!("best pose off by dx={dx:.5} dq={dq:.5}, weights {:?}", set.weights());
        assert!(dx < 0.01, "translation off by {dx}");
        assert!(dq < 0.05, "rotation off by {dq}");
        assert!((best.pose.q.into_inner().norm() - 1.0).abs() < 1e-9);
        assert!(best.scores.is_some());

        let counts = good_pose_counts(set, &true_pose(), None);
        assert!(counts.great >= 1);
    }

    #[test]
    fn test_scope_is_reproducible() {
        let mut params = test_params();
        params.num_samples_round1 = 30;
        let input = box_model();
        let obs = ObservationData::new(synthetic_observation(&input.cloud, &true_pose()), &params).unwrap();
        let model = ModelData::new(input, &params).unwrap();

        let a = scope(&model, &obs, &params, &[], &mut StdRng::seed_from_u64(3));
        let b = scope(&model, &obs, &params, &[], &mut StdRng::seed_from_u64(3));
        assert_eq!(a.samples.weights(), b.samples.weights());
    }
}
