//! Round 1: single-correspondence pose proposals.

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::bpa::{bpa, model_pose_likelihood};
use crate::cloud::{descriptor_angle, FeatureType};
use crate::correspondence::{Correspondence, CorrespondenceType};
use crate::sample::{Sample, SampleSet};
use crate::scoring::{round1_score, ScoreContext};
use crate::stats::{child_seeds, sample_pmf};

/// Observed points tried per feature seed before giving up on it.
const MAX_SEED_ATTEMPTS: usize = 20;

fn blacklisted(ctx: &ScoreContext<'_>, p: &Vector3<f64>, blacklist: &[usize]) -> bool {
    !blacklist.is_empty()
        && ctx
            .obs
            .segment_of_point(p)
            .map_or(false, |s| blacklist.contains(&s))
}

/// Every observed SIFT point whose nearest model SIFT descriptor lies
/// within `sift_dthresh` (as an angle).
pub fn sift_correspondences(ctx: &ScoreContext<'_>, blacklist: &[usize]) -> Vec<Correspondence> {
    let ft = FeatureType::Sift;
    let (Some(feature), Some(obs_cloud)) = (ctx.model.feature(ft), ctx.obs.feature_clouds.get(&ft)) else {
        return Vec::new();
    };
    let (Some(obs_rows), Some(model_rows)) = (obs_cloud.descriptors(ft), feature.cloud.descriptors(ft)) else {
        return Vec::new();
    };

    obs_rows
        .iter()
        .enumerate()
        .filter(|(k, _)| !blacklisted(ctx, &obs_cloud.points[*k], blacklist))
        .filter_map(|(k, row)| {
            let &(m, _) = feature.index.knn(row, 1).first()?;
            let angle = descriptor_angle(row, &model_rows[m]);
            (angle < ctx.params.sift_dthresh).then(|| Correspondence::new(k, m, CorrespondenceType::SIFT, angle))
        })
        .collect()
}

/// Draw one descriptor correspondence of type `ft`.
///
/// A random observed feature point is matched against its `knn` nearest
/// model descriptors and one of them is drawn with probability
/// proportional to `exp(-½ d² / f_sigma²)`. Points whose nearest match is
/// farther than `f_dthresh`, or that fall in a blacklisted segment, are
/// skipped.
pub fn sample_feature_correspondence<R: Rng + ?Sized>(
    ctx: &ScoreContext<'_>,
    ft: FeatureType,
    blacklist: &[usize],
    rng: &mut R,
) -> Option<Correspondence> {
    let feature = ctx.model.feature(ft)?;
    let obs_cloud = ctx.obs.feature_clouds.get(&ft)?;
    let rows = obs_cloud.descriptors(ft)?;
    if rows.is_empty() {
        return None;
    }
    let params = ctx.params;

    for _ in 0..MAX_SEED_ATTEMPTS {
        let k = rng.gen_range(0..rows.len());
        if blacklisted(ctx, &obs_cloud.points[k], blacklist) {
            continue;
        }
        let neighbors = feature.index.knn(&rows[k], params.knn);
        match neighbors.first() {
            Some(&(_, nearest)) if nearest <= params.f_dthresh => {}
            _ => continue,
        }
        let pmf: Vec<f64> = neighbors
            .iter()
            .map(|&(_, d)| (-0.5 * (d / params.f_sigma).powi(2)).exp())
            .collect();
        let (m, d) = neighbors[sample_pmf(&pmf, rng).unwrap_or(0)];
        return Some(Correspondence::new(k, m, CorrespondenceType::Feature(ft), d));
    }
    None
}

/// Feature types that can seed proposals for this model and observation.
fn seed_feature_types(ctx: &ScoreContext<'_>) -> Vec<FeatureType> {
    [
        (FeatureType::Fpfh, ctx.params.use_fpfh),
        (FeatureType::Shot, ctx.params.use_shot),
    ]
    .into_iter()
    .filter(|&(ft, enabled)| {
        enabled && ctx.model.feature(ft).is_some() && ctx.obs.feature_clouds.contains_key(&ft)
    })
    .map(|(ft, _)| ft)
    .collect()
}

/// Pose of a set of correspondences, with its correspondence likelihood
/// and round-1 weight.
fn propose<R: Rng + ?Sized>(
    ctx: &ScoreContext<'_>,
    correspondences: Vec<Correspondence>,
    rng: &mut R,
) -> Option<(Sample, f64)> {
    let result = bpa(ctx.model, ctx.obs, &correspondences, ctx.params, rng)?;
    let mut sample = Sample::with_correspondences(result.pose, result.b, correspondences);
    sample.c_score = model_pose_likelihood(ctx.model, ctx.obs, &sample.correspondences, &sample.pose, ctx.params);
    let weight = round1_score(ctx, &sample.pose, rng);
    Some((sample, weight))
}

/// Merge proposals whose poses agree within the clustering thresholds and
/// re-derive each merged pose from the pooled correspondences.
///
/// Input must be sorted; each cluster is represented by its best member.
pub fn cluster_pose_samples<R: Rng + ?Sized>(ctx: &ScoreContext<'_>, set: SampleSet, rng: &mut R) -> SampleSet {
    let (xt, qt) = (ctx.params.x_cluster_thresh, ctx.params.q_cluster_thresh);

    // (representative, weight, member count)
    let mut clusters: Vec<(Sample, f64, usize)> = Vec::new();
    for (sample, weight) in set.into_pairs() {
        let home = clusters.iter_mut().find(|(rep, _, _)| {
            let (dx, dq) = rep.pose.distance_to(&sample.pose);
            dx < xt && dq < qt
        });
        match home {
            Some((rep, _, members)) => {
                rep.correspondences.extend(sample.correspondences);
                *members += 1;
            }
            None => clusters.push((sample, weight, 1)),
        }
    }

    let seeds = child_seeds(rng, clusters.len());
    let pairs: Vec<(Sample, f64)> = clusters
        .into_par_iter()
        .zip(seeds)
        .map(|((rep, weight, members), seed)| {
            if members == 1 {
                return (rep, weight);
            }
            let mut rng = StdRng::seed_from_u64(seed);
            let correspondences = rep.correspondences.clone();
            propose(ctx, correspondences, &mut rng).unwrap_or((rep, weight))
        })
        .collect();
    SampleSet::from_pairs(pairs)
}

/// Propose poses from single correspondences and keep those close to the
/// best round-1 score.
pub fn round1<R: Rng + ?Sized>(ctx: &ScoreContext<'_>, blacklist: &[usize], rng: &mut R) -> SampleSet {
    let params = ctx.params;

    let mut sift = if params.use_sift {
        sift_correspondences(ctx, blacklist)
    } else {
        Vec::new()
    };
    sift.shuffle(rng);
    sift.truncate(params.num_samples_round1);

    let types = seed_feature_types(ctx);
    let num_feature_seeds = if types.is_empty() {
        0
    } else {
        params.num_samples_round1 - sift.len()
    };
    debug!(
        "round 1: {} SIFT seeds, {} descriptor seeds over {:?}",
        sift.len(),
        num_feature_seeds,
        types
    );

    let seeds = child_seeds(rng, sift.len() + num_feature_seeds);
    let proposals: Vec<(Sample, f64)> = seeds
        .into_par_iter()
        .enumerate()
        .filter_map(|(i, seed)| {
            let mut rng = StdRng::seed_from_u64(seed);
            let c = match sift.get(i) {
                Some(c) => *c,
                None => {
                    let ft = types[(i - sift.len()) % types.len()];
                    sample_feature_correspondence(ctx, ft, blacklist, &mut rng)?
                }
            };
            propose(ctx, vec![c], &mut rng)
        })
        .collect();

    if proposals.is_empty() {
        warn!("round 1 found no correspondence seeds");
        return SampleSet::new();
    }

    let mut set = SampleSet::from_pairs(proposals);
    set.sort_descending();
    if params.pose_clustering {
        let before = set.len();
        set = cluster_pose_samples(ctx, set, rng);
        set.sort_descending();
        debug!("round 1 clustering: {} -> {} samples", before, set.len());
    }
    set.retain_near_best(params.round1_score_thresh);
    debug!(
        "round 1 kept {} samples, best weight {:.4}",
        set.len(),
        set.best().map_or(f64::NAN, |(_, w)| w)
    );
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelData;
    use crate::observation::ObservationData;
    use crate::test_utils::{box_model, synthetic_observation, test_params, true_pose};

    #[test]
    fn test_feature_seeds_match_exact_descriptors() {
        let params = test_params();
        let input = box_model();
        let obs = ObservationData::new(synthetic_observation(&input.cloud, &true_pose()), &params).unwrap();
        let model = ModelData::new(input, &params).unwrap();
        let ctx = ScoreContext::new(&model, &obs, &params);
        let mut rng = StdRng::seed_from_u64(2);

        for _ in 0..20 {
            let c = sample_feature_correspondence(&ctx, FeatureType::Fpfh, &[], &mut rng).unwrap();
            assert_eq!(c.kind, CorrespondenceType::FPFH);
            assert!(c.score < 1e-9);
            let placed = true_pose().transform_point(&model.cloud.points[c.model_index]);
            assert!((placed - obs.fg_cloud.points[c.obs_index]).norm() < 1e-9);
        }
        assert!(sample_feature_correspondence(&ctx, FeatureType::Shot, &[], &mut rng).is_none());
        assert!(sift_correspondences(&ctx, &[]).is_empty());
    }

    #[test]
    fn test_round1_keeps_a_pose_near_truth() {
        let params = test_params();
        let input = box_model();
        let obs = ObservationData::new(synthetic_observation(&input.cloud, &true_pose()), &params).unwrap();
        let model = ModelData::new(input, &params).unwrap();
        let ctx = ScoreContext::new(&model, &obs, &params);
        let mut rng = StdRng::seed_from_u64(5);

        let set = round1(&ctx, &[], &mut rng);
        assert!(!set.is_empty());
        assert!(set.weights().windows(2).all(|w| w[0] >= w[1]));
        let best = set.weight(0);
        assert!(set.weights().iter().all(|&w| w >= best - params.round1_score_thresh));
        let near = set.samples().iter().any(|s| {
            let (dx, dq) = s.pose.distance_to(&true_pose());
            dx < 0.02 && dq < 0.2
        });
        assert!(near);
    }

    #[test]
    fn test_blacklisted_segments_never_seed() {
        let params = test_params();
        let input = box_model();
        let obs = ObservationData::new(synthetic_observation(&input.cloud, &true_pose()), &params).unwrap();
        let model = ModelData::new(input, &params).unwrap();
        let ctx = ScoreContext::new(&model, &obs, &params);
        let mut rng = StdRng::seed_from_u64(9);

        let blacklist: Vec<usize> = (0..obs.segmentation.len()).step_by(2).collect();
        assert!(!blacklist.is_empty());
        for _ in 0..30 {
            let Some(c) = sample_feature_correspondence(&ctx, FeatureType::Fpfh, &blacklist, &mut rng) else {
                continue;
            };
            let segment = obs.segment_of_point(&obs.fg_cloud.points[c.obs_index]);
            assert!(segment.map_or(true, |s| !blacklist.contains(&s)));
        }
    }
}
