//! Greedy MOPE: one object at a time.

use rand::rngs::StdRng;
use tracing::debug;

use super::assignment::{Assignment, MopeCandidate, MopeProblem};
use super::{build_candidates, to_sample, MopeResult};
use crate::model::ModelData;
use crate::observation::ObservationData;
use crate::params::{AssignmentWeights, MopeParams, ScopeParams};
use crate::time_phase;
use crate::timing::TimingCollector;

fn evaluate_chosen(chosen: &[MopeCandidate], masses: &[f64], weights: AssignmentWeights) -> (MopeProblem, Assignment, f64) {
    let problem = MopeProblem {
        candidates: vec![chosen.to_vec()],
        masses: masses.to_vec(),
        weights,
    };
    let assignment = Assignment::new((0..chosen.len()).map(|k| (0, k)).collect());
    let score = problem.evaluate(&assignment);
    (problem, assignment, score)
}

/// Repeatedly run SCOPE for every model with the claimed segments
/// blacklisted and keep the single object that most improves the
/// assignment objective. Stops when no object improves it.
pub fn mope_greedy(
    models: &[ModelData],
    obs: &ObservationData,
    scope_params: &ScopeParams,
    params: &MopeParams,
    rng: &mut StdRng,
) -> MopeResult {
    let mut collector = TimingCollector::new();
    collector.start_run();

    let masses = obs.segmentation.masses();
    let weights = params.assignment[0];
    let mut chosen: Vec<MopeCandidate> = Vec::new();
    let mut blacklist: Vec<usize> = Vec::new();
    let (_, _, mut score) = evaluate_chosen(&chosen, &masses, weights);

    loop {
        let candidates = time_phase!(
            collector,
            "greedy_step",
            build_candidates(models, obs, scope_params, params, 0, &blacklist, rng)
        );
        let mut best: Option<(MopeCandidate, f64)> = None;
        for candidate in candidates.into_iter().flatten() {
            let mut trial = chosen.clone();
            trial.push(candidate.clone());
            let (_, _, s) = evaluate_chosen(&trial, &masses, weights);
            if best.as_ref().map_or(true, |(_, b)| s > *b) {
                best = Some((candidate, s));
            }
        }
        match best {
            Some((candidate, s)) if s > score => {
                debug!(
                    "greedy MOPE: model {} claims {} segments, score {:.4}",
                    candidate.model,
                    candidate.segments.len(),
                    s
                );
                blacklist.extend(candidate.segments.iter().copied());
                chosen.push(candidate);
                score = s;
            }
            _ => break,
        }
    }
    collector.record_samples(chosen.len());

    let (problem, assignment, score) = evaluate_chosen(&chosen, &masses, weights);
    MopeResult {
        samples: vec![to_sample(models, &problem, &assignment, score)],
        timing: collector.finish(),
    }
}
