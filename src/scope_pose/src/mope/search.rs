//! Combinatorial search over assignments.
//!
//! Both searches share a move generator and a best-ever archive. Runs are
//! independent and execute in parallel; each gets its own child seed and
//! archive. Run archives are merged in run order, so the result only
//! depends on the seed.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::debug;

use super::assignment::{evaluate_assignment, Assignment, MopeProblem};
use crate::params::MopeParams;
use crate::stats::{child_seeds, triangular_index};

/// Bounded best-first list of distinct assignments.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    capacity: usize,
    entries: Vec<(Assignment, f64)>,
}

impl Archive {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Vec::new(),
        }
    }

    /// Insert an assignment unless an equal one is present or it ranks
    /// below a full archive.
    pub fn offer(&mut self, assignment: &Assignment, score: f64) {
        if self.entries.iter().any(|(a, _)| a == assignment) {
            return;
        }
        if self.entries.len() == self.capacity && self.entries.last().map_or(false, |(_, s)| score <= *s) {
            return;
        }
        let pos = self.entries.partition_point(|(_, s)| *s >= score);
        self.entries.insert(pos, (assignment.clone(), score));
        self.entries.truncate(self.capacity);
    }

    /// Entries, best first.
    pub fn entries(&self) -> &[(Assignment, f64)] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<(Assignment, f64)> {
        self.entries
    }

    /// Offer every entry of `other`, best first.
    pub fn merge(&mut self, other: Archive) {
        for (assignment, score) in other.entries {
            self.offer(&assignment, score);
        }
    }
}

/// Draw a candidate, biased toward the top of its model's list when
/// `use_triangle` is set.
fn pick_candidate<R: Rng + ?Sized>(problem: &MopeProblem, use_triangle: bool, rng: &mut R) -> Option<(usize, usize)> {
    let models: Vec<usize> = (0..problem.candidates.len())
        .filter(|&m| !problem.candidates[m].is_empty())
        .collect();
    if models.is_empty() {
        return None;
    }
    let model = models[rng.gen_range(0..models.len())];
    let n = problem.candidates[model].len();
    let k = if use_triangle {
        triangular_index(n, rng)
    } else {
        rng.gen_range(0..n)
    };
    Some((model, k))
}

/// Random neighbor of `state`: switch one object for another candidate,
/// remove one, or add one.
pub fn propose_move<R: Rng + ?Sized>(
    problem: &MopeProblem,
    state: &Assignment,
    params: &MopeParams,
    rng: &mut R,
) -> Option<Assignment> {
    let mut next = state.clone();
    let r: f64 = rng.gen();
    if !state.is_empty() && r < params.switch_prob {
        let i = rng.gen_range(0..state.len());
        let replacement = pick_candidate(problem, params.use_triangle, rng)?;
        next.remove_at(i);
        next.insert(replacement);
    } else if !state.is_empty() && r < params.switch_prob + params.remove_prob {
        let i = rng.gen_range(0..state.len());
        next.remove_at(i);
    } else {
        let object = pick_candidate(problem, params.use_triangle, rng)?;
        next.insert(object);
    }
    (next != *state).then_some(next)
}

fn annealing_run<R: Rng + ?Sized>(problem: &MopeProblem, params: &MopeParams, rng: &mut R) -> Archive {
    let mut archive = Archive::new(params.archive_size);
    let mut state = Assignment::default();
    let mut score = evaluate_assignment(problem, &state);
    archive.offer(&state, score);

    let steps = params.annealing_steps.max(1);
    for step in 0..steps {
        let p_worse = params.annealing_p0 * (1.0 - step as f64 / steps as f64);
        let Some(next) = propose_move(problem, &state, params, rng) else {
            continue;
        };
        let next_score = evaluate_assignment(problem, &next);
        if next_score > score || rng.gen::<f64>() < p_worse {
            state = next;
            score = next_score;
            archive.offer(&state, score);
        }
    }
    archive
}

fn tabu_run<R: Rng + ?Sized>(problem: &MopeProblem, params: &MopeParams, rng: &mut R) -> Archive {
    let mut archive = Archive::new(params.archive_size);
    let mut state = Assignment::default();
    let score = evaluate_assignment(problem, &state);
    archive.offer(&state, score);
    let mut history: VecDeque<Assignment> = VecDeque::with_capacity(params.tabu_history_cap + 1);
    history.push_back(state.clone());

    for _ in 0..params.annealing_steps {
        let mut best: Option<(Assignment, f64)> = None;
        for _ in 0..params.tabu_neighborhood.max(1) {
            let Some(next) = propose_move(problem, &state, params, rng) else {
                continue;
            };
            if history.contains(&next) {
                continue;
            }
            let s = evaluate_assignment(problem, &next);
            if best.as_ref().map_or(true, |(_, b)| s > *b) {
                best = Some((next, s));
            }
        }
        let Some((next, s)) = best else {
            continue;
        };
        archive.offer(&next, s);
        history.push_back(next.clone());
        if history.len() > params.tabu_history_cap {
            history.pop_front();
        }
        state = next;
    }
    archive
}

/// Run `annealing_runs` independent searches and return the archive of
/// the best distinct assignments seen by any of them.
pub fn search_assignments<R: Rng + ?Sized>(problem: &MopeProblem, params: &MopeParams, tabu: bool, rng: &mut R) -> Archive {
    let seeds = child_seeds(rng, params.annealing_runs.max(1));
    let runs: Vec<Archive> = seeds
        .into_par_iter()
        .map(|seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            if tabu {
                tabu_run(problem, params, &mut rng)
            } else {
                annealing_run(problem, params, &mut rng)
            }
        })
        .collect();
    let mut archive = Archive::new(params.archive_size);
    for run in runs {
        archive.merge(run);
    }
    debug!(
        "{} search over {} candidates: best {:.4}",
        if tabu { "tabu" } else { "annealing" },
        problem.num_candidates(),
        archive.entries().first().map_or(f64::NAN, |(_, s)| *s)
    );
    archive
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Pose;
    use crate::mope::MopeCandidate;
    use crate::params::AssignmentWeights;

    fn candidate(score: f64, segments: &[usize]) -> MopeCandidate {
        MopeCandidate {
            model: 0,
            pose: Pose::identity(),
            score,
            segments: segments.to_vec(),
        }
    }

    /// Three objects with two segments each, a duplicate of the first and a
    /// placement that straddles two objects.
    fn problem() -> MopeProblem {
        MopeProblem::new(
            vec![vec![
                candidate(1.0, &[0, 1]),
                candidate(0.9, &[2, 3]),
                candidate(0.8, &[4, 5]),
                candidate(0.7, &[1, 2]),
                candidate(0.6, &[0, 1]),
            ]],
            vec![1.0; 6],
            AssignmentWeights::default(),
        )
    }

    #[test]
    fn test_archive_keeps_best_distinct() {
        let mut archive = Archive::new(2);
        let a = Assignment::new(vec![(0, 0)]);
        let b = Assignment::new(vec![(0, 1)]);
        let c = Assignment::new(vec![(0, 2)]);
        archive.offer(&a, 1.0);
        archive.offer(&a, 1.0);
        archive.offer(&b, 3.0);
        archive.offer(&c, 0.5);
        assert_eq!(archive.entries().len(), 2);
        assert_eq!(archive.entries()[0].0, b);
        assert_eq!(archive.entries()[1].0, a);
        archive.offer(&c, 2.0);
        assert_eq!(archive.entries()[1].0, c);
    }

    #[test]
    fn test_annealing_finds_the_three_objects() {
        let problem = problem();
        let truth = Assignment::new(vec![(0, 0), (0, 1), (0, 2)]);
        for seed in 0..3 {
            let mut rng = StdRng::seed_from_u64(seed);
            let archive = search_assignments(&problem, &MopeParams::default(), false, &mut rng);
            let top: Vec<&Assignment> = archive.entries().iter().take(5).map(|(a, _)| a).collect();
            assert!(top.contains(&&truth), "seed {seed}: {top:?}");
            assert!(archive.entries().windows(2).all(|w| w[0].1 >= w[1].1));
        }
    }

    #[test]
    fn test_search_is_reproducible_with_tied_scores() {
        // Interchangeable placements: many assignments share a score.
        let problem = MopeProblem::new(
            vec![vec![candidate(1.0, &[0, 1]); 4], vec![candidate(1.0, &[2, 3]); 4]],
            vec![1.0; 4],
            AssignmentWeights::default(),
        );
        let params = MopeParams {
            archive_size: 3,
            annealing_runs: 16,
            annealing_steps: 200,
            ..Default::default()
        };
        let run = |tabu: bool, threads: usize| {
            let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
            let mut rng = StdRng::seed_from_u64(11);
            pool.install(|| search_assignments(&problem, &params, tabu, &mut rng))
                .into_entries()
        };
        for tabu in [false, true] {
            let serial = run(tabu, 1);
            assert_eq!(serial.len(), 3);
            assert_eq!(serial, run(tabu, 4));
            assert_eq!(serial, run(tabu, 4));
        }
    }

    #[test]
    fn test_archive_merge_keeps_run_order_on_ties() {
        let a = Assignment::new(vec![(0, 0)]);
        let b = Assignment::new(vec![(0, 1)]);
        let mut first = Archive::new(2);
        first.offer(&a, 1.0);
        let mut second = Archive::new(2);
        second.offer(&b, 1.0);
        second.offer(&a, 1.0);

        let mut merged = Archive::new(1);
        merged.merge(first);
        merged.merge(second);
        assert_eq!(merged.entries(), &[(a, 1.0)]);
    }

    #[test]
    fn test_tabu_finds_the_three_objects() {
        let problem = problem();
        let truth = Assignment::new(vec![(0, 0), (0, 1), (0, 2)]);
        let params = MopeParams {
            search: crate::params::MopeSearch::Tabu,
            annealing_steps: 100,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(4);
        let archive = search_assignments(&problem, &params, true, &mut rng);
        assert_eq!(archive.entries()[0].0, truth);
    }
}
