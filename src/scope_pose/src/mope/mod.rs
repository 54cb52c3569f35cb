//! MOPE: multi-object pose estimation.
//!
//! SCOPE runs once per model. Its best samples become candidates, each
//! claiming the observed segments it explains. A combinatorial search then
//! picks the subset of candidates that best explains the segments:
//! - **Annealing**: restarts of simulated annealing with a linearly
//!   decaying probability of accepting worse states
//! - **Tabu**: best-of-neighborhood moves that never revisit recent states
//! - **Greedy**: add the single best object, blacklist its segments, rerun
//!
//! The result is the best-ever archive across all restarts, not the final
//! state of any one run.

mod assignment;
mod greedy;
mod search;

pub use assignment::{evaluate_assignment, Assignment, AssignmentTerms, MopeCandidate, MopeProblem};
pub use greedy::mope_greedy;
pub use search::{propose_move, search_assignments, Archive};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::geometry::Pose;
use crate::model::ModelData;
use crate::observation::ObservationData;
use crate::params::{MopeParams, MopeSearch, ScopeParams};
use crate::sample::{Sample, REJECTED_SCORE};
use crate::scope::scope;
use crate::scoring::ScoreContext;
use crate::stats::child_seeds;
use crate::time_phase;
use crate::timing::{RunTiming, TimingCollector};

/// One chosen object of a MOPE result.
#[derive(Debug, Clone, Serialize)]
pub struct MopeObject {
    pub model: usize,
    pub name: String,
    pub pose: Pose,
    pub score: f64,
    pub segments: Vec<usize>,
}

/// One ranked multi-object explanation of the scene.
#[derive(Debug, Clone, Serialize)]
pub struct MopeSample {
    pub objects: Vec<MopeObject>,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct MopeResult {
    /// Best first.
    pub samples: Vec<MopeSample>,
    /// Empty unless the `profiling` feature is enabled.
    pub timing: RunTiming,
}

/// Run SCOPE for every model in parallel and turn the surviving samples
/// into candidates scored with the term weights of MOPE round `round`.
pub fn build_candidates(
    models: &[ModelData],
    obs: &ObservationData,
    scope_params: &ScopeParams,
    params: &MopeParams,
    round: usize,
    blacklist: &[usize],
    rng: &mut StdRng,
) -> Vec<Vec<MopeCandidate>> {
    let seeds = child_seeds(rng, models.len());
    models
        .par_iter()
        .zip(seeds)
        .enumerate()
        .map(|(m, (model, seed))| {
            let mut rng = StdRng::seed_from_u64(seed);
            let result = scope(model, obs, scope_params, blacklist, &mut rng);
            let ctx = ScoreContext::new(model, obs, scope_params);
            let candidates: Vec<MopeCandidate> = result
                .samples
                .iter()
                .filter(|(_, w)| *w > REJECTED_SCORE)
                .take(params.num_samples_per_model)
                .map(|(sample, _)| {
                    MopeCandidate::from_sample(
                        &ctx,
                        m,
                        sample,
                        &params.scope_weights[round],
                        params.segment_claim_thresh,
                        blacklist,
                        &mut rng,
                    )
                })
                .filter(|c| !c.segments.is_empty())
                .collect();
            debug!("model '{}': {} MOPE candidates", model.name, candidates.len());
            candidates
        })
        .collect()
}

fn to_sample(models: &[ModelData], problem: &MopeProblem, assignment: &Assignment, score: f64) -> MopeSample {
    let objects = assignment
        .objects()
        .iter()
        .map(|&object| {
            let c = problem.candidate(object);
            MopeObject {
                model: c.model,
                name: models.get(c.model).map(|m| m.name.clone()).unwrap_or_default(),
                pose: c.pose,
                score: c.score,
                segments: c.segments.clone(),
            }
        })
        .collect();
    MopeSample { objects, score }
}

/// Second MOPE round over the residual scene.
///
/// Segments covered by `best` are removed, SCOPE and the search run again,
/// and each of the top `round2_compare` residual assignments is moved back
/// into the full scene and merged with `best`. The best merge is returned
/// only when its score is strictly higher than `best` alone. The returned
/// problem extends `problem` with the re-homed candidates, so indices of
/// `problem` stay valid.
fn merge_residual_round(
    models: &[ModelData],
    obs: &ObservationData,
    scope_params: &ScopeParams,
    params: &MopeParams,
    problem: &MopeProblem,
    best: &Assignment,
    rng: &mut StdRng,
) -> Option<(MopeProblem, Assignment, f64)> {
    let mut covered: Vec<usize> = best
        .objects()
        .iter()
        .flat_map(|&o| problem.candidate(o).segments.iter().copied())
        .collect();
    covered.sort_unstable();
    covered.dedup();

    let residual = match obs.without_segments(&covered, scope_params) {
        Ok(Some(residual)) => residual,
        Ok(None) => return None,
        Err(e) => {
            warn!("residual observation failed: {e:#}");
            return None;
        }
    };
    let residual_candidates = build_candidates(models, &residual, scope_params, params, 1, &[], rng);
    let residual_problem = MopeProblem::new(
        residual_candidates,
        residual.segmentation.masses(),
        params.assignment[1],
    );
    let archive = search_assignments(&residual_problem, params, params.search == MopeSearch::Tabu, rng);

    let mut merged_problem = problem.clone();
    let mut best_merge: Option<(Assignment, f64)> = None;
    for (assignment, _) in archive
        .entries()
        .iter()
        .take(params.round2_candidates)
        .take(params.round2_compare)
    {
        if assignment.is_empty() {
            continue;
        }
        let mut merged = best.clone();
        for &object in assignment.objects() {
            let c = residual_problem.candidate(object);
            let model = &models[c.model];
            let ctx = ScoreContext::new(model, obs, scope_params);
            let rehomed = MopeCandidate::from_sample(
                &ctx,
                c.model,
                &Sample::new(c.pose),
                &params.scope_weights[1],
                params.segment_claim_thresh,
                &[],
                rng,
            );
            merged_problem.candidates[c.model].push(rehomed);
            merged.insert((c.model, merged_problem.candidates[c.model].len() - 1));
        }
        let score = merged_problem.evaluate(&merged);
        if best_merge.as_ref().map_or(true, |(_, s)| score > *s) {
            best_merge = Some((merged, score));
        }
    }

    let (merged, merged_score) = best_merge?;
    let original_score = merged_problem.evaluate(best);
    debug!(
        "two-round merge: original {:.4}, merged {:.4}",
        original_score, merged_score
    );
    (merged_score > original_score).then_some((merged_problem, merged, merged_score))
}

/// Explain `obs` with any number of placed `models`.
pub fn mope(
    models: &[ModelData],
    obs: &ObservationData,
    scope_params: &ScopeParams,
    params: &MopeParams,
    rng: &mut StdRng,
) -> MopeResult {
    if params.search == MopeSearch::Greedy {
        return mope_greedy(models, obs, scope_params, params, rng);
    }
    let mut collector = TimingCollector::new();
    collector.start_run();

    let candidates = time_phase!(
        collector,
        "candidates",
        build_candidates(models, obs, scope_params, params, 0, &[], rng)
    );
    let mut problem = MopeProblem::new(candidates, obs.segmentation.masses(), params.assignment[0]);
    collector.record_samples(problem.num_candidates());

    let tabu = params.search == MopeSearch::Tabu;
    let archive = time_phase!(collector, "search", search_assignments(&problem, params, tabu, rng));
    let mut ranked = archive.into_entries();
    collector.record_samples(ranked.len());

    if params.two_round {
        if let Some((best, _)) = ranked.first().cloned() {
            let merge = time_phase!(
                collector,
                "residual",
                merge_residual_round(models, obs, scope_params, params, &problem, &best, rng)
            );
            if let Some((merged_problem, merged, score)) = merge {
                info!("two-round MOPE merged {} extra objects", merged.len() - best.len());
                problem = merged_problem;
                ranked.insert(0, (merged, score));
            }
        }
    }

    let samples: Vec<MopeSample> = ranked
        .iter()
        .map(|(assignment, score)| to_sample(models, &problem, assignment, *score))
        .collect();
    if let Some(best) = samples.first() {
        info!("MOPE: best of {} has {} objects, score {:.4}", samples.len(), best.objects.len(), best.score);
    }
    MopeResult {
        samples,
        timing: collector.finish(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_params, three_box_scene};

    fn scene() -> (ModelData, ObservationData, [Pose; 3], ScopeParams) {
        let params = test_params();
        let (model, obs, poses) = three_box_scene();
        let obs = ObservationData::new(obs, &params).unwrap();
        let model = ModelData::new(model, &params).unwrap();
        (model, obs, poses, params)
    }

    #[test]
    fn test_true_objects_beat_missing_and_duplicate_ones() {
        let (model, obs, poses, scope_params) = scene();
        let params = MopeParams::default();
        let ctx = ScoreContext::new(&model, &obs, &scope_params);
        let mut rng = StdRng::seed_from_u64(2);

        let mut candidates: Vec<MopeCandidate> = poses
            .iter()
            .map(|pose| {
                MopeCandidate::from_sample(&ctx, 0, &Sample::new(*pose), &params.scope_weights[0], 0.5, &[], &mut rng)
            })
            .collect();
        for (i, c) in candidates.iter().enumerate() {
            assert!(!c.segments.is_empty());
            for other in &candidates[i + 1..] {
                assert!(c.segments.iter().all(|s| !other.segments.contains(s)));
            }
        }
        candidates.push(candidates[0].clone());
        // Keep candidate order fixed so indices name the objects
        let problem = MopeProblem {
            candidates: vec![candidates],
            masses: obs.segmentation.masses(),
            weights: params.assignment[0],
        };

        let truth = Assignment::new(vec![(0, 0), (0, 1), (0, 2)]);
        let best = problem.evaluate(&truth);
        assert_eq!(problem.terms(&truth).overlap, 0.0);
        for pair in [[0, 1], [0, 2], [1, 2]] {
            let two = Assignment::new(pair.iter().map(|&k| (0, k)).collect());
            assert!(best > problem.evaluate(&two));
        }
        let four = Assignment::new(vec![(0, 0), (0, 1), (0, 2), (0, 3)]);
        assert!(best > problem.evaluate(&four));

        for seed in 0..3 {
            let archive = search_assignments(&problem, &params, false, &mut StdRng::seed_from_u64(seed));
            assert!(archive.entries().iter().take(5).any(|(a, _)| *a == truth));
        }
    }

    #[test]
    fn test_mope_places_objects_on_the_boxes() {
        let (model, obs, poses, scope_params) = scene();
        let params = MopeParams {
            annealing_runs: 4,
            annealing_steps: 200,
            two_round: true,
            ..Default::default()
        };
        let models = [model];
        let mut rng = StdRng::seed_from_u64(1);

        let result = mope(&models, &obs, &scope_params, &params, &mut rng);
        let best = result.samples.first().unwrap();
        #[cfg(feature = "test-verbose")]
        for (rank, sample) in result.samples.iter().enumerate() {
            println!("rank {rank}: {} objects, score {:.4}", sample.objects.len(), sample.score);
        }
        assert!(!best.objects.is_empty());
        assert!(result.samples.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(best.objects.iter().all(|o| o.name == "box"));
        let on_a_box = best.objects.iter().any(|object| {
            poses.iter().any(|p| (object.pose.x - p.x).norm() < 0.02)
        });
        assert!(on_a_box);
    }

    #[test]
    fn test_greedy_never_overlaps() {
        let (model, obs, _, scope_params) = scene();
        let params = MopeParams {
            search: MopeSearch::Greedy,
            ..Default::default()
        };
        let models = [model];
        let result = mope(&models, &obs, &scope_params, &params, &mut StdRng::seed_from_u64(3));
        assert_eq!(result.samples.len(), 1);
        let objects = &result.samples[0].objects;
        for (i, a) in objects.iter().enumerate() {
            for b in &objects[i + 1..] {
                assert!(a.segments.iter().all(|s| !b.segments.contains(s)));
            }
        }
    }
}
