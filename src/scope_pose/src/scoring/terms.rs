//! Per-term evaluators of the full placement score.
//!
//! Every term is a visibility-weighted sum of per-point log ratios, so a
//! perfect fit contributes 0 and points without evidence contribute
//! nothing.

use nalgebra::Vector3;
use rand::Rng;

use super::visibility::{place_points, PlacedPoint};
use super::ScoreContext;
use crate::cloud::{descriptor_distance, FeatureType};
use crate::geometry::Pose;
use crate::noise_model::PointNoise;
use crate::range_image::RangeImage;
use crate::sample::SegmentAssignment;
use crate::stats::{capped_gaussian_log_ratio, gaussian_log_ratio, normalize_pmf, random_subset};

/// Position residuals are capped at this many sigmas.
pub(crate) const XYZ_CAP_SIGMAS: f64 = 2.0;

/// Segment affinities below this are not penalized.
const AFFINITY_THRESH: f64 = 0.5;
const AFFINITY_SCALE: f64 = 0.05;

const WALK_STEPS: [(i64, i64); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Distance from a model-frame point to the model surface.
pub(crate) fn model_surface_distance(ctx: &ScoreContext<'_>, p_model: &Vector3<f64>) -> f64 {
    let grid = &ctx.model.distance_grid;
    grid.find_nn(p_model)
        .map_or_else(|| grid.get_distance(p_model), |(_, sq)| sq.sqrt())
}

/// Smallest plane or range distance between a placed point and the
/// occupied cells of a window around its cell.
pub(crate) fn window_distance(image: &RangeImage, point: &PlacedPoint, radius: usize) -> Option<f64> {
    let (ci, cj) = point.cell?;
    let range = point.projection?.range;
    image
        .image
        .window(ci, cj, radius)
        .filter_map(|(i, j)| {
            let observed = image.range_at(i, j)?;
            Some(match image.normals.as_ref() {
                Some(normals) => normals.get(i, j).dot(&(point.world - image.points.get(i, j))).abs(),
                None => (range - observed).abs(),
            })
        })
        .min_by(f64::total_cmp)
}

pub(super) fn xyz_term(ctx: &ScoreContext<'_>, placed: &[PlacedPoint], noise: &[PointNoise], vis_pmf: &[f64]) -> f64 {
    let image = &ctx.obs.bg_range_image;
    let sigma = ctx.params.range_sigma;
    placed
        .iter()
        .zip(noise)
        .zip(vis_pmf)
        .filter(|(_, w)| **w > 0.0)
        .map(|((p, n), w)| {
            let d = window_distance(image, p, ctx.params.xyz_score_window).unwrap_or(f64::INFINITY);
            w * capped_gaussian_log_ratio(d, sigma * n.range, XYZ_CAP_SIGMAS)
        })
        .sum()
}

pub(super) fn normal_term(ctx: &ScoreContext<'_>, placed: &[PlacedPoint], noise: &[PointNoise], vis_pmf: &[f64]) -> f64 {
    let image = &ctx.obs.bg_range_image;
    let Some(normals) = image.normals.as_ref() else {
        return 0.0;
    };
    let normalvar = ctx.obs.input.cloud.normalvar.as_ref();
    let mut total = 0.0;
    for ((p, n), &w) in placed.iter().zip(noise).zip(vis_pmf) {
        let (Some(normal), Some((i, j))) = (p.normal, p.cell) else {
            continue;
        };
        if w <= 0.0 || !image.is_occupied(i, j) || n.normal >= ctx.params.normal_noise_thresh {
            continue;
        }
        let mut sigma = ctx.params.normal_sigma * n.normal;
        if let (Some(var), Some(k)) = (normalvar, *image.idx.get(i, j)) {
            sigma = sigma.max(var[k]);
        }
        let d = 1.0 - normal.dot(normals.get(i, j));
        total += w * gaussian_log_ratio(d, sigma);
    }
    total
}

/// Color terms `(L, A, B, specularity)`.
///
/// Observed cells much brighter than the model are treated as specular
/// highlights: they leave the color terms and count against the
/// specularity term instead.
pub(super) fn lab_terms(
    ctx: &ScoreContext<'_>,
    placed: &[PlacedPoint],
    noise: &[PointNoise],
    vis_pmf: &[f64],
) -> (f64, f64, f64, f64) {
    let image = &ctx.obs.bg_range_image;
    let (Some(obs_labs), Some(model_labs)) = (image.labs.as_ref(), ctx.model.cloud.labs.as_ref()) else {
        return (0.0, 0.0, 0.0, 0.0);
    };
    if !ctx.params.use_colors {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let sigma = Vector3::new(ctx.params.l_sigma, ctx.params.a_sigma, ctx.params.b_sigma);
    let (mut l, mut a, mut b, mut specular) = (0.0, 0.0, 0.0, 0.0);
    for ((p, n), &w) in placed.iter().zip(noise).zip(vis_pmf) {
        let Some((i, j)) = p.cell else {
            continue;
        };
        if w <= 0.0 || !image.is_occupied(i, j) {
            continue;
        }
        let diff = obs_labs.get(i, j) - model_labs[p.index];
        if diff.x > ctx.params.specular_thresh {
            specular += w;
            continue;
        }
        l += w * gaussian_log_ratio(diff.x, sigma.x * n.lab.x);
        a += w * gaussian_log_ratio(diff.y, sigma.y * n.lab.y);
        b += w * gaussian_log_ratio(diff.z, sigma.z * n.lab.z);
    }
    (l, a, b, -specular)
}

/// Descriptor agreement between placed model FPFH points and the observed
/// FPFH cloud, cell by cell.
pub(super) fn fpfh_term<R: Rng + ?Sized>(ctx: &ScoreContext<'_>, pose: &Pose, round: u8, rng: &mut R) -> f64 {
    let ft = FeatureType::Fpfh;
    let (Some(feature), Some(image), Some(obs_cloud)) = (
        ctx.model.feature(ft),
        ctx.obs.feature_images.get(&ft),
        ctx.obs.feature_clouds.get(&ft),
    ) else {
        return 0.0;
    };
    let (Some(model_rows), Some(obs_rows)) = (feature.cloud.descriptors(ft), obs_cloud.descriptors(ft)) else {
        return 0.0;
    };
    let n = feature.cloud.len();
    let indices = if round >= 3 {
        (0..n).collect()
    } else {
        random_subset(n, ctx.params.num_validation_points, rng)
    };
    let placed = place_points(
        &ctx.obs.bg_range_image,
        pose,
        &feature.cloud.points,
        feature.cloud.normals.as_deref(),
        &indices,
        ctx.params.vis_sigma,
    );

    let matches: Vec<(f64, f64)> = placed
        .iter()
        .filter_map(|p| {
            let (i, j) = p.cell?;
            let k = (*image.idx.get(i, j))?;
            Some((p.vis, descriptor_distance(&model_rows[p.index], &obs_rows[k])))
        })
        .collect();
    let weights = normalize_pmf(&matches.iter().map(|m| m.0).collect::<Vec<_>>());
    matches
        .iter()
        .zip(&weights)
        .map(|((_, d), w)| w * capped_gaussian_log_ratio(*d, ctx.params.f_sigma, XYZ_CAP_SIGMAS))
        .sum()
}

/// Short random walks from visible placed points across the observed
/// image, stopping early at edges. Each walk's end point is scored by its
/// distance to the model surface, so surfaces next to the object that the
/// model does not explain are penalized.
pub(super) fn random_walk_term<R: Rng + ?Sized>(
    ctx: &ScoreContext<'_>,
    pose: &Pose,
    placed: &[PlacedPoint],
    vis_pmf: &[f64],
    rng: &mut R,
) -> f64 {
    let image = &ctx.obs.bg_range_image;
    let edges = &ctx.obs.edge_image;
    let mut total = 0.0;
    for (p, &w) in placed.iter().zip(vis_pmf) {
        let Some((ci, cj)) = p.cell else {
            continue;
        };
        if w <= 0.0 {
            continue;
        }
        let (di, dj) = WALK_STEPS[rng.gen_range(0..WALK_STEPS.len())];
        let (mut i, mut j) = (ci as i64, cj as i64);
        for _ in 0..ctx.params.random_walk_radius {
            let Some(&e) = edges.get_signed(i + di, j + dj) else {
                break;
            };
            i += di;
            j += dj;
            if rng.gen::<f64>() < e {
                break;
            }
        }
        let (i, j) = (i as usize, j as usize);
        if image.range_at(i, j).is_none() {
            continue;
        }
        let p_model = pose.inverse_transform_point(image.points.get(i, j));
        let d = model_surface_distance(ctx, &p_model);
        total += w * capped_gaussian_log_ratio(d, ctx.params.xyz_sigma, XYZ_CAP_SIGMAS);
    }
    total
}

/// Mean fit of the assigned segments' surface keypoints to the placed
/// model surface.
pub(super) fn segment_term(ctx: &ScoreContext<'_>, pose: &Pose, segments: &SegmentAssignment) -> f64 {
    let cloud = &ctx.obs.fg_cloud;
    let scores: Vec<f64> = segments
        .indices
        .iter()
        .filter_map(|&s| ctx.obs.segmentation.segments.get(s))
        .flat_map(|s| s.surface_points.iter())
        .map(|&k| {
            let p_model = pose.inverse_transform_point(&cloud.points[k]);
            capped_gaussian_log_ratio(model_surface_distance(ctx, &p_model), ctx.params.xyz_sigma, XYZ_CAP_SIGMAS)
        })
        .collect();
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

/// Penalty for leaving out segments strongly tied to assigned ones.
pub(super) fn segment_affinity_term(ctx: &ScoreContext<'_>, segments: &SegmentAssignment) -> f64 {
    let affinity = &ctx.obs.segmentation.affinity;
    let n = ctx.obs.segmentation.len();
    let mut total = 0.0;
    for &i in segments.indices.iter().filter(|&&i| i < n) {
        for j in (0..n).filter(|j| !segments.contains(*j)) {
            let a = affinity[(i, j)].min(1.0 - 1e-6);
            if a > AFFINITY_THRESH {
                total += ((1.0 - a) / a).ln();
            }
        }
    }
    AFFINITY_SCALE * total
}

/// Negative fraction of placed points sunk into the supporting table.
pub(super) fn table_term(ctx: &ScoreContext<'_>, placed: &[PlacedPoint]) -> f64 {
    let Some(plane) = ctx.obs.table_plane else {
        return 0.0;
    };
    if placed.is_empty() {
        return 0.0;
    }
    let below = placed
        .iter()
        .filter(|p| plane.xyz().dot(&p.world) + plane.w < -ctx.params.table_thresh)
        .count();
    -(below as f64) / placed.len() as f64
}
