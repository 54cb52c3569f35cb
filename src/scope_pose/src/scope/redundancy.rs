//! Duplicate removal and evaluation against a known pose.

use nalgebra::Vector3;
use serde::Serialize;
use std::f64::consts::PI;

use crate::geometry::{quaternion_distance, Pose};
use crate::sample::SampleSet;
use crate::symmetry::axis_angle_between;

/// Distance between two poses, optionally modulo a line symmetry.
///
/// Without a symmetry this is [`Pose::distance_to`]. With a symmetry
/// `(point, direction)` in the model frame, positions are compared at the
/// symmetry anchor and orientations only through the direction of the
/// symmetry axis (at half the angle, to stay on the quaternion scale).
pub fn symmetric_pose_distance(a: &Pose, b: &Pose, symmetry: Option<&(Vector3<f64>, Vector3<f64>)>) -> (f64, f64) {
    match symmetry {
        Some((point, direction)) => {
            let dx = (a.transform_point(point) - b.transform_point(point)).norm();
            let dq = 0.5 * axis_angle_between(direction, &a.q, &b.q);
            (dx, dq)
        }
        None => {
            let dx = (a.x - b.x).norm();
            (dx, quaternion_distance(&a.q, &b.q))
        }
    }
}

/// Greedily drop samples within `(x_thresh, q_thresh)` of a better one.
///
/// The set should be sorted so the kept sample of each group is its best.
pub fn remove_redundant_pose_samples(
    set: SampleSet,
    x_thresh: f64,
    q_thresh: f64,
    symmetry: Option<&(Vector3<f64>, Vector3<f64>)>,
) -> SampleSet {
    let mut kept = SampleSet::with_capacity(set.len());
    for (sample, weight) in set.into_pairs() {
        let redundant = kept.samples().iter().any(|k| {
            let (dx, dq) = symmetric_pose_distance(&k.pose, &sample.pose, symmetry);
            dx < x_thresh && dq < q_thresh
        });
        if !redundant {
            kept.push(sample, weight);
        }
    }
    kept
}

/// Position and angle tolerance of a "good" pose.
pub const GOOD_POSE: (f64, f64) = (0.05, PI / 8.0);
/// Position and angle tolerance of a "great" pose.
pub const GREAT_POSE: (f64, f64) = (0.025, PI / 16.0);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GoodPoseCounts {
    pub good: usize,
    pub great: usize,
}

/// Count samples close to a known true pose.
pub fn good_pose_counts(
    set: &SampleSet,
    truth: &Pose,
    symmetry: Option<&(Vector3<f64>, Vector3<f64>)>,
) -> GoodPoseCounts {
    let mut counts = GoodPoseCounts::default();
    for sample in set.samples() {
        let (dx, dq) = symmetric_pose_distance(&sample.pose, truth, symmetry);
        if dx < GOOD_POSE.0 && dq < GOOD_POSE.1 {
            counts.good += 1;
        }
        if dx < GREAT_POSE.0 && dq < GREAT_POSE.1 {
            counts.great += 1;
        }
    }
    counts
}
