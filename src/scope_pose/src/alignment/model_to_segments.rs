//! Re-aligning a sample to the segments it claims.

use rand::Rng;
use tracing::trace;

use crate::bpa::bpa;
use crate::correspondence::{Correspondence, CorrespondenceType};
use crate::sample::Sample;
use crate::scoring::ScoreContext;
use crate::stats::random_subset;

/// Voxel radius of the normal-aware nearest-neighbor search.
const NN_RADIUS: usize = 1;

/// One surface correspondence per claimed segment (its center point
/// against the nearest model point) and at most one edge correspondence
/// (its edge keypoint closest to the silhouette of the nearest stored
/// view, within `xyz_sigma`).
pub fn segment_correspondences(ctx: &ScoreContext<'_>, sample: &Sample) -> Vec<Correspondence> {
    let pose = &sample.pose;
    let fg = &ctx.obs.fg_cloud;
    let grid = &ctx.model.distance_grid;
    let (sx, sn) = (ctx.params.xyz_sigma, ctx.params.normal_sigma);

    let direction = ctx.model.view_direction(pose, &ctx.obs.camera_position());
    let view = ctx.model.range_edges.nearest_view(&direction);

    let mut out = Vec::new();
    for segment in sample
        .segments
        .indices
        .iter()
        .filter_map(|&s| ctx.obs.segmentation.segments.get(s))
    {
        let k = segment.center_point;
        let p = pose.inverse_transform_point(&fg.points[k]);
        let nearest = match fg.normals.as_ref() {
            Some(normals) => {
                let n = pose.inverse_rotate(&normals[k]);
                grid.find_nn_with_normal(&p, &n, 1.0 / sx, 1.0 / sn, NN_RADIUS)
            }
            None => grid.find_nn(&p).map(|(m, _)| m),
        };
        if let Some(m) = nearest {
            out.push(Correspondence::new(k, m, CorrespondenceType::Surface, 0.0));
        }

        let Some(view) = view else {
            continue;
        };
        let edge_points = &ctx.model.range_edges.views[view].points;
        let best_edge = segment
            .edge_points
            .iter()
            .filter_map(|&k| {
                let p = pose.inverse_transform_point(&fg.points[k]);
                edge_points
                    .iter()
                    .enumerate()
                    .map(|(m, e)| (k, m, (e - p).norm()))
                    .min_by(|a, b| a.2.total_cmp(&b.2))
            })
            .min_by(|a, b| a.2.total_cmp(&b.2));
        if let Some((k, m, d)) = best_edge.filter(|&(_, _, d)| d <= sx) {
            out.push(Correspondence::new(k, m, CorrespondenceType::Edge { view }, d));
        }
    }
    out
}

/// Align a sample's model to the segments it claims.
///
/// Each of the `align_model_to_segments_iter` passes rebuilds the segment
/// correspondences at the current pose, keeps at most
/// `num_correspondences` of them and runs BPA. Returns `None` when the
/// sample claims no segments or the first pass finds no correspondence.
pub fn align_model_to_segments<R: Rng + ?Sized>(
    ctx: &ScoreContext<'_>,
    sample: &Sample,
    rng: &mut R,
) -> Option<Sample> {
    if sample.segments.is_empty() {
        return None;
    }
    let mut current: Option<Sample> = None;
    for _ in 0..ctx.params.align_model_to_segments_iter.max(1) {
        let base = current.as_ref().unwrap_or(sample);
        let all = segment_correspondences(ctx, base);
        let keep = random_subset(all.len(), ctx.params.num_correspondences, rng);
        let correspondences: Vec<Correspondence> = keep.into_iter().map(|i| all[i]).collect();
        let Some(result) = bpa(ctx.model, ctx.obs, &correspondences, ctx.params, rng) else {
            break;
        };
        trace!(
            "aligned to {} segments with {} correspondences",
            sample.segments.len(),
            correspondences.len()
        );
        current = Some(Sample {
            pose: result.pose,
            b: result.b,
            correspondences,
            ..base.clone()
        });
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::sample_segments_given_model_pose;
    use crate::geometry::Pose;
    use crate::model::ModelData;
    use crate::observation::ObservationData;
    use crate::test_utils::{box_model, synthetic_observation, test_params, true_pose};
    use nalgebra::{UnitQuaternion, Vector3};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_alignment_stays_near_truth() {
        let params = test_params();
        let input = box_model();
        let truth = true_pose();
        let obs = ObservationData::new(synthetic_observation(&input.cloud, &truth), &params).unwrap();
        let model = ModelData::new(input, &params).unwrap();
        let ctx = ScoreContext::new(&model, &obs, &params);
        let mut rng = StdRng::seed_from_u64(3);

        let start = Pose::new(
            truth.x + Vector3::new(0.002, -0.001, 0.0),
            truth.q * UnitQuaternion::from_euler_angles(0.02, 0.0, -0.01),
        );
        let mut sample = Sample::new(start);
        sample.segments = sample_segments_given_model_pose(&ctx, &truth, true, &[], &mut rng);
        assert!(!sample.segments.is_empty());

        let aligned = align_model_to_segments(&ctx, &sample, &mut rng).unwrap();
        let (dx, dq) = aligned.pose.distance_to(&truth);
        assert!(dx < 0.01, "translation off by {dx}");
        assert!(dq < 0.1, "orientation off by {dq}");
        assert!(aligned.correspondences.len() <= params.num_correspondences);
        assert_eq!(aligned.segments, sample.segments);

        assert!(align_model_to_segments(&ctx, &Sample::new(start), &mut rng).is_none());
    }
}
