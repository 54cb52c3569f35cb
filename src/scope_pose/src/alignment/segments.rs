//! Segment assignment given a model pose.

use rand::Rng;

use crate::geometry::Pose;
use crate::sample::SegmentAssignment;
use crate::scoring::{model_surface_distance, ScoreContext};
use crate::segmentation::Segment;

/// Probability that a segment belongs to the model placed at `pose`.
///
/// Mean over the segment's surface keypoints (its center when it has none)
/// of a position and a normal agreement factor against the nearest model
/// point.
pub fn segment_probability(ctx: &ScoreContext<'_>, pose: &Pose, segment: &Segment) -> f64 {
    let fg = &ctx.obs.fg_cloud;
    let grid = &ctx.model.distance_grid;
    let center = pose.inverse_transform_point(&fg.points[segment.center_point]);
    if grid.get_distance(&center) > segment.max_radius {
        return 0.0;
    }

    let keypoints: &[usize] = if segment.surface_points.is_empty() {
        std::slice::from_ref(&segment.center_point)
    } else {
        &segment.surface_points
    };
    let (sx, sn) = (ctx.params.xyz_sigma, ctx.params.normal_sigma);
    let total: f64 = keypoints
        .iter()
        .map(|&k| {
            let p = pose.inverse_transform_point(&fg.points[k]);
            let d = model_surface_distance(ctx, &p);
            let mut prob = (-0.5 * (d / sx).powi(2)).exp();
            let obs_normal = fg.normals.as_ref().map(|n| pose.inverse_rotate(&n[k]));
            let model_normal = grid
                .find_nn(&p)
                .and_then(|(m, _)| ctx.model.cloud.normals.as_ref().map(|n| n[m]));
            if let (Some(no), Some(nm)) = (obs_normal, model_normal) {
                let dn = 1.0 - no.dot(&nm);
                prob *= (-0.5 * (dn / sn).powi(2)).exp();
            }
            prob
        })
        .sum();
    total / keypoints.len() as f64
}

/// Assign observed segments to the model placed at `pose`.
///
/// # Arguments
/// * `hard` - Take every segment with probability above 0.5 instead of
///   drawing each one
/// * `blacklist` - Segments that may not be assigned
pub fn sample_segments_given_model_pose<R: Rng + ?Sized>(
    ctx: &ScoreContext<'_>,
    pose: &Pose,
    hard: bool,
    blacklist: &[usize],
    rng: &mut R,
) -> SegmentAssignment {
    let mut assignment = SegmentAssignment::default();
    for (s, segment) in ctx.obs.segmentation.segments.iter().enumerate() {
        if blacklist.contains(&s) {
            continue;
        }
        let prob = segment_probability(ctx, pose, segment);
        let take = if hard {
            prob > 0.5
        } else {
            rng.gen::<f64>() < prob
        };
        if take {
            assignment.push(s, prob);
        }
    }
    assignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelData;
    use crate::observation::ObservationData;
    use crate::test_utils::{box_model, synthetic_observation, test_params, true_pose};
    use nalgebra::{UnitQuaternion, Vector3};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_hard_assignment_at_truth() {
        let params = test_params();
        let input = box_model();
        let obs = ObservationData::new(synthetic_observation(&input.cloud, &true_pose()), &params).unwrap();
        let model = ModelData::new(input, &params).unwrap();
        let ctx = ScoreContext::new(&model, &obs, &params);
        let mut rng = StdRng::seed_from_u64(1);

        let segments = sample_segments_given_model_pose(&ctx, &true_pose(), true, &[], &mut rng);
        assert!(!segments.is_empty());
        assert!(segments.probs.iter().all(|&p| p > 0.5));

        let blacklist = segments.indices.clone();
        let rest = sample_segments_given_model_pose(&ctx, &true_pose(), true, &blacklist, &mut rng);
        assert!(rest.indices.iter().all(|s| !blacklist.contains(s)));

        let far = Pose::new(Vector3::new(0.5, 0.5, 2.0), UnitQuaternion::identity());
        assert!(sample_segments_given_model_pose(&ctx, &far, false, &[], &mut rng).is_empty());
    }

    #[test]
    fn test_center_beyond_max_radius_is_rejected() {
        let params = test_params();
        let input = box_model();
        let truth = true_pose();
        let obs = ObservationData::new(synthetic_observation(&input.cloud, &truth), &params).unwrap();
        let model = ModelData::new(input, &params).unwrap();
        let ctx = ScoreContext::new(&model, &obs, &params);

        let mut segment = obs.segmentation.segments[0].clone();
        segment.surface_points.clear();
        let center = truth.inverse_transform_point(&obs.fg_cloud.points[segment.center_point]);
        let d = model.distance_grid.get_distance(&center);

        segment.max_radius = d;
        assert!(segment_probability(&ctx, &truth, &segment) > 0.0);
        segment.max_radius = d - 0.5 * model.distance_grid.res;
        assert_eq!(segment_probability(&ctx, &truth, &segment), 0.0);
    }
}
