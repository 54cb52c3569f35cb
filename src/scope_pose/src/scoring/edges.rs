//! Edge terms: silhouette points of the nearest stored model view
//! against the observed edge image.

use rand::Rng;

use super::visibility::{mean_visibility, place_points, PlacedPoint};
use super::{ScoreContext, VIS_EPSILON};
use crate::geometry::Pose;
use crate::stats::{normalize_pmf, random_subset};

/// Points hidden with at least this probability count as occluded.
const OCCLUSION_VIS: f64 = 0.5;

#[derive(Debug, Clone, Default)]
pub(super) struct EdgeTerms {
    pub edge: f64,
    pub edge_vis: f64,
    pub edge_occ: f64,
    pub view: Option<usize>,
    pub placed: Vec<PlacedPoint>,
}

pub(super) fn edge_terms<R: Rng + ?Sized>(ctx: &ScoreContext<'_>, pose: &Pose, round: u8, rng: &mut R) -> EdgeTerms {
    let camera = ctx.obs.camera_position();
    let direction = ctx.model.view_direction(pose, &camera);
    let Some(view) = ctx.model.range_edges.nearest_view(&direction) else {
        return EdgeTerms {
            edge_vis: VIS_EPSILON.ln(),
            ..Default::default()
        };
    };
    let points = &ctx.model.range_edges.views[view].points;
    let indices = if round >= 3 {
        (0..points.len()).collect()
    } else {
        random_subset(points.len(), ctx.params.num_edge_validation_points, rng)
    };
    let placed = place_points(&ctx.obs.bg_range_image, pose, points, None, &indices, ctx.params.vis_sigma);

    let edge_log = &ctx.obs.edge_log;
    let vis_pmf = normalize_pmf(&placed.iter().map(|p| p.vis).collect::<Vec<_>>());
    let edge: f64 = placed
        .iter()
        .zip(&vis_pmf)
        .filter_map(|(p, w)| {
            let (i, j) = p.cell?;
            Some(w * edge_log.get(i, j))
        })
        .sum();

    // Silhouette points hidden by nearer surfaces should sit on an
    // observed occlusion boundary.
    let (mut occ, mut occ_mass) = (0.0, 0.0);
    for p in placed.iter().filter(|p| p.vis < OCCLUSION_VIS) {
        let Some((i, j)) = p.cell else {
            continue;
        };
        let w = 1.0 - p.vis;
        occ += w * edge_log.get(i, j);
        occ_mass += w;
    }
    let edge_occ = if occ_mass > 0.0 { occ / occ_mass } else { 0.0 };

    EdgeTerms {
        edge,
        edge_vis: mean_visibility(&placed).max(VIS_EPSILON).ln(),
        edge_occ,
        view: Some(view),
        placed,
    }
}
