//! Cheap first-round objective: free-space violations plus table support.

use rand::Rng;

use super::visibility::place_points;
use super::{terms, ScoreContext};
use crate::geometry::Pose;
use crate::stats::random_subset;

/// Score a first-round hypothesis.
///
/// Minus the fraction of in-image model points that would sit in observed
/// free space, i.e. in an empty cell or more than `round1_range_thresh`
/// in front of the observed surface, plus the weighted table term.
pub fn round1_score<R: Rng + ?Sized>(ctx: &ScoreContext<'_>, pose: &Pose, rng: &mut R) -> f64 {
    let cloud = &ctx.model.cloud;
    let indices = random_subset(cloud.len(), ctx.params.num_validation_points, rng);
    let image = &ctx.obs.bg_range_image;
    let placed = place_points(image, pose, &cloud.points, None, &indices, ctx.params.vis_sigma);

    let mut in_image = 0usize;
    let mut violations = 0usize;
    for p in &placed {
        let (Some((i, j)), Some(proj)) = (p.cell, p.projection) else {
            continue;
        };
        in_image += 1;
        match image.range_at(i, j) {
            Some(observed) if proj.range >= observed - ctx.params.round1_range_thresh => {}
            _ => violations += 1,
        }
    }
    let free_space = if in_image > 0 {
        -(violations as f64) / in_image as f64
    } else {
        -1.0
    };
    free_space + ctx.params.score2.table * terms::table_term(ctx, &placed)
}
