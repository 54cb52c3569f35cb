//! Candidate objects and the assignment objective.

use rand::Rng;
use serde::Serialize;

use crate::alignment::segment_probability;
use crate::geometry::Pose;
use crate::params::{AssignmentWeights, ScoreWeights};
use crate::sample::{Sample, SegmentAssignment};
use crate::scoring::ScoreContext;

/// One placed model the search may choose.
#[derive(Debug, Clone, Serialize)]
pub struct MopeCandidate {
    pub model: usize,
    pub pose: Pose,
    /// SCOPE score under the MOPE round's term weights.
    pub score: f64,
    /// Observed segments the placement claims, ascending.
    pub segments: Vec<usize>,
}

impl MopeCandidate {
    /// Rescore a SCOPE sample and collect the segments it claims.
    ///
    /// A segment is claimed when its membership probability exceeds
    /// `claim_thresh` and it is not blacklisted.
    pub fn from_sample<R: Rng + ?Sized>(
        ctx: &ScoreContext<'_>,
        model: usize,
        sample: &Sample,
        weights: &ScoreWeights,
        claim_thresh: f64,
        blacklist: &[usize],
        rng: &mut R,
    ) -> Self {
        let mut claimed = SegmentAssignment::default();
        for (s, segment) in ctx.obs.segmentation.segments.iter().enumerate() {
            if blacklist.contains(&s) {
                continue;
            }
            let prob = segment_probability(ctx, &sample.pose, segment);
            if prob > claim_thresh {
                claimed.push(s, prob);
            }
        }
        let (score, _) = ctx.score_with(&sample.pose, &claimed, 3, weights, rng, None);
        Self {
            model,
            pose: sample.pose,
            score,
            segments: claimed.indices,
        }
    }
}

/// Chosen objects as `(model, candidate)` pairs, kept sorted so equal
/// assignments compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Assignment(Vec<(usize, usize)>);

impl Assignment {
    pub fn new(mut objects: Vec<(usize, usize)>) -> Self {
        objects.sort_unstable();
        objects.dedup();
        Self(objects)
    }

    pub fn objects(&self) -> &[(usize, usize)] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, object: (usize, usize)) -> bool {
        self.0.binary_search(&object).is_ok()
    }

    /// Add an object; returns false when it is already chosen.
    pub fn insert(&mut self, object: (usize, usize)) -> bool {
        match self.0.binary_search(&object) {
            Ok(_) => false,
            Err(pos) => {
                self.0.insert(pos, object);
                true
            }
        }
    }

    pub fn remove_at(&mut self, i: usize) -> (usize, usize) {
        self.0.remove(i)
    }
}

/// Values of the five assignment terms before weighting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AssignmentTerms {
    /// Mean score over covered segments; doubly covered segments average
    /// the scores of their objects.
    pub score: f64,
    /// Fraction of segment mass no object covers.
    pub unexplained: f64,
    /// Fraction of claimed segment slots whose segment is claimed more than
    /// once.
    pub overlap: f64,
    /// Mean over objects of the mass fraction they share with others.
    pub overlap_per_object: f64,
    pub num_taken: usize,
}

impl AssignmentTerms {
    pub fn total(&self, w: &AssignmentWeights) -> f64 {
        w.score * self.score
            - w.unexplained * self.unexplained
            - w.overlap * self.overlap
            - w.overlap_per_object * self.overlap_per_object
            - w.num_taken * self.num_taken as f64
    }
}

/// Candidates of every model over one observation.
#[derive(Debug, Clone)]
pub struct MopeProblem {
    /// Per model, candidates sorted by descending score.
    pub candidates: Vec<Vec<MopeCandidate>>,
    /// Mass (pixel count) of every observed segment.
    pub masses: Vec<f64>,
    pub weights: AssignmentWeights,
}

impl MopeProblem {
    pub fn new(mut candidates: Vec<Vec<MopeCandidate>>, masses: Vec<f64>, weights: AssignmentWeights) -> Self {
        for list in &mut candidates {
            list.sort_by(|a, b| b.score.total_cmp(&a.score));
        }
        Self {
            candidates,
            masses,
            weights,
        }
    }

    pub fn candidate(&self, (model, k): (usize, usize)) -> &MopeCandidate {
        &self.candidates[model][k]
    }

    pub fn num_candidates(&self) -> usize {
        self.candidates.iter().map(Vec::len).sum()
    }

    pub fn terms(&self, assignment: &Assignment) -> AssignmentTerms {
        evaluate_terms(self, assignment)
    }

    pub fn evaluate(&self, assignment: &Assignment) -> f64 {
        evaluate_assignment(self, assignment)
    }
}

fn evaluate_terms(problem: &MopeProblem, assignment: &Assignment) -> AssignmentTerms {
    let n = problem.masses.len();
    let mut cover = vec![0usize; n];
    let mut score_sum = vec![0.0; n];
    for &object in assignment.objects() {
        let c = problem.candidate(object);
        for &s in c.segments.iter().filter(|&&s| s < n) {
            cover[s] += 1;
            score_sum[s] += c.score;
        }
    }

    let covered: Vec<usize> = (0..n).filter(|&s| cover[s] > 0).collect();
    let score = if covered.is_empty() {
        0.0
    } else {
        covered.iter().map(|&s| score_sum[s] / cover[s] as f64).sum::<f64>() / covered.len() as f64
    };

    let total_mass: f64 = problem.masses.iter().sum();
    let unexplained = if total_mass > 0.0 {
        (0..n).filter(|&s| cover[s] == 0).map(|s| problem.masses[s]).sum::<f64>() / total_mass
    } else {
        0.0
    };

    let slots: usize = cover.iter().sum();
    let shared_slots: usize = cover.iter().filter(|&&c| c > 1).sum();
    let overlap = if slots > 0 {
        shared_slots as f64 / slots as f64
    } else {
        0.0
    };

    let per_object: Vec<f64> = assignment
        .objects()
        .iter()
        .map(|&object| {
            let segments = &problem.candidate(object).segments;
            let mass: f64 = segments.iter().filter(|&&s| s < n).map(|&s| problem.masses[s]).sum();
            let shared: f64 = segments
                .iter()
                .filter(|&&s| s < n && cover[s] > 1)
                .map(|&s| problem.masses[s])
                .sum();
            if mass > 0.0 {
                shared / mass
            } else {
                0.0
            }
        })
        .collect();
    let overlap_per_object = if per_object.is_empty() {
        0.0
    } else {
        per_object.iter().sum::<f64>() / per_object.len() as f64
    };

    AssignmentTerms {
        score,
        unexplained,
        overlap,
        overlap_per_object,
        num_taken: assignment.len(),
    }
}

/// Weighted assignment objective; higher is better.
pub fn evaluate_assignment(problem: &MopeProblem, assignment: &Assignment) -> f64 {
    evaluate_terms(problem, assignment).total(&problem.weights)
}
