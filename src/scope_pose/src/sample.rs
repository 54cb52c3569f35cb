//! Pose hypotheses and weighted sample sets.

use nalgebra::Vector3;
use serde::Serialize;

use crate::bingham::Bingham;
use crate::correspondence::Correspondence;
use crate::geometry::Pose;
use crate::scoring::ScoreComponents;

/// Weight given to samples that lost every assigned segment. They sink to
/// the bottom of the ranking instead of being removed.
pub const REJECTED_SCORE: f64 = -10000.0;

/// Segments claimed by a sample, with their membership probabilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SegmentAssignment {
    pub indices: Vec<usize>,
    pub probs: Vec<f64>,
}

impl SegmentAssignment {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn contains(&self, segment: usize) -> bool {
        self.indices.contains(&segment)
    }

    pub fn push(&mut self, segment: usize, prob: f64) {
        self.indices.push(segment);
        self.probs.push(prob);
    }
}

/// One pose hypothesis and the evidence behind it.
///
/// `Clone` is a deep copy: correspondence and segment lists are owned.
#[derive(Debug, Clone, Serialize)]
pub struct Sample {
    pub pose: Pose,
    /// Orientation uncertainty.
    pub b: Bingham,
    pub correspondences: Vec<Correspondence>,
    pub segments: SegmentAssignment,
    /// Model-frame anchor of the symmetry rotations of round 4.
    pub x0: Option<Vector3<f64>>,
    /// Log-likelihood of the pose under its correspondences.
    pub c_score: f64,
    /// Term breakdown of the most recent full score.
    pub scores: Option<ScoreComponents>,
}

impl Sample {
    pub fn new(pose: Pose) -> Self {
        Self {
            pose,
            b: Bingham::uniform(),
            correspondences: Vec::new(),
            segments: SegmentAssignment::default(),
            x0: None,
            c_score: 0.0,
            scores: None,
        }
    }

    pub fn with_correspondences(pose: Pose, b: Bingham, correspondences: Vec<Correspondence>) -> Self {
        Self {
            b,
            correspondences,
            ..Self::new(pose)
        }
    }
}

/// Samples with parallel weights, sorted descending after every
/// [`SampleSet::sort_descending`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SampleSet {
    samples: Vec<Sample>,
    weights: Vec<f64>,
}

impl SampleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            samples: Vec::with_capacity(n),
            weights: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, sample: Sample, weight: f64) {
        self.samples.push(sample);
        self.weights.push(weight);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn sample(&self, i: usize) -> &Sample {
        &self.samples[i]
    }

    pub fn weight(&self, i: usize) -> f64 {
        self.weights[i]
    }

    pub fn set_weight(&mut self, i: usize, w: f64) {
        self.weights[i] = w;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Sample, f64)> {
        self.samples.iter().zip(self.weights.iter().copied())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&mut Sample, &mut f64)> {
        self.samples.iter_mut().zip(self.weights.iter_mut())
    }

    /// Highest-weighted sample (the first after sorting). Ties go to the
    /// earliest sample.
    pub fn best(&self) -> Option<(&Sample, f64)> {
        self.iter().reduce(|best, s| if s.1.total_cmp(&best.1).is_gt() { s } else { best })
    }

    /// Stable sort by weight, highest first.
    pub fn sort_descending(&mut self) {
        let mut pairs: Vec<(Sample, f64)> = self.take_pairs();
        pairs.sort_by(|a, b| b.1.total_cmp(&a.1));
        *self = Self::from_pairs(pairs);
    }

    pub fn truncate(&mut self, n: usize) {
        self.samples.truncate(n);
        self.weights.truncate(n);
    }

    /// Keep samples weighted within `margin` of the best one, and at
    /// least one sample. Expects a sorted set.
    pub fn retain_near_best(&mut self, margin: f64) {
        let Some(&top) = self.weights.first() else {
            return;
        };
        let keep = self
            .weights
            .iter()
            .take_while(|&&w| w >= top - margin)
            .count()
            .max(1);
        self.truncate(keep);
    }

    /// Keep the samples for which `f` returns true.
    pub fn retain(&mut self, mut f: impl FnMut(&Sample, f64) -> bool) {
        let pairs = self.take_pairs();
        *self = Self::from_pairs(pairs.into_iter().filter(|(s, w)| f(s, *w)).collect());
    }

    pub fn from_pairs(pairs: Vec<(Sample, f64)>) -> Self {
        let (samples, weights) = pairs.into_iter().unzip();
        Self { samples, weights }
    }

    pub fn into_pairs(self) -> Vec<(Sample, f64)> {
        self.samples.into_iter().zip(self.weights).collect()
    }

    fn take_pairs(&mut self) -> Vec<(Sample, f64)> {
        std::mem::take(self).into_pairs()
    }
}

impl FromIterator<(Sample, f64)> for SampleSet {
    fn from_iter<I: IntoIterator<Item = (Sample, f64)>>(iter: I) -> Self {
        Self::from_pairs(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correspondence::CorrespondenceType;
    use nalgebra::UnitQuaternion;

    fn set_of(weights: &[f64]) -> SampleSet {
        weights
            .iter()
            .enumerate()
            .map(|(i, &w)| {
                let pose = Pose::new(Vector3::new(i as f64, 0.0, 0.0), UnitQuaternion::identity());
                (Sample::new(pose), w)
            })
            .collect()
    }

    #[test]
    fn test_sort_is_stable_and_descending() {
        let mut set = set_of(&[1.0, 3.0, 2.0, 3.0]);
        set.sort_descending();
        assert_eq!(set.weights(), &[3.0, 3.0, 2.0, 1.0]);
        // Ties keep their insertion order
        assert_eq!(set.sample(0).pose.x.x, 1.0);
        assert_eq!(set.sample(1).pose.x.x, 3.0);
        assert_eq!(set.samples().len(), set.weights().len());
    }

    #[test]
    fn test_best_prefers_the_first_of_equal_weights() {
        let set = set_of(&[0.5, 2.0, 1.0, 2.0]);
        let (best, w) = set.best().unwrap();
        assert_eq!(w, 2.0);
        assert_eq!(best.pose.x.x, 1.0);
        assert!(SampleSet::new().best().is_none());
    }

    #[test]
    fn test_retain_near_best_keeps_one() {
        let mut set = set_of(&[5.0, 4.9, 3.0]);
        set.retain_near_best(0.3);
        assert_eq!(set.len(), 2);
        set.retain_near_best(-1.0);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_clone_is_deep() {
        let mut a = Sample::new(Pose::identity());
        a.correspondences
            .push(Correspondence::new(1, 2, CorrespondenceType::Surface, 0.0));
        a.segments.push(4, 0.9);
        let mut b = a.clone();
        b.correspondences.clear();
        b.segments.push(5, 0.1);
        assert_eq!(a.correspondences.len(), 1);
        assert_eq!(a.segments.len(), 1);
        assert_eq!(b.segments.len(), 2);
    }
}
