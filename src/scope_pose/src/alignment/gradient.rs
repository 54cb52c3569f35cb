//! Gradient-ascent pose refinement.
//!
//! Each iteration normalizes the combined 7-dimensional gradient, tries
//! three step lengths along it and keeps the best trial. Step lengths adapt to the multiplier of the chosen trial.
//! With [`StepAcceptance::Monotone`] a trial is only taken when it
//! improves the objective; with [`StepAcceptance::AlwaysBestTrial`] the
//! best trial is taken regardless.

use nalgebra::{Vector3, Vector4};
use rand::Rng;

use crate::geometry::{quat_to_wxyz, rotation_jacobian, wxyz_to_quat, Pose};
use crate::params::{GradientConfig, StepAcceptance};
use crate::scoring::{place_points, ScoreContext, XYZ_CAP_SIGMAS};
use crate::stats::{gaussian_log_ratio, normalize_pmf, random_subset};

/// Gradient norms below this end the refinement.
const MIN_GRADIENT: f64 = 1e-12;

/// A differentiable pose objective, maximized by [`refine_with`].
pub trait PoseObjective {
    fn value(&mut self, pose: &Pose) -> f64;

    /// Gradient with respect to the translation and the raw `(w, x, y, z)`
    /// quaternion components.
    fn gradient(&mut self, pose: &Pose) -> (Vector3<f64>, Vector4<f64>);
}

/// Result of a refinement.
#[derive(Debug, Clone)]
pub struct RefineResult {
    pub pose: Pose,
    /// Objective at `pose`.
    pub score: f64,
    pub initial_score: f64,
    pub iterations: usize,
    /// Whether the gradient vanished before the iteration budget ran out.
    pub converged: bool,
}

fn step_pose(pose: &Pose, dx: &Vector3<f64>, dq: &Vector4<f64>) -> Pose {
    Pose::new(pose.x + dx, wxyz_to_quat(&(quat_to_wxyz(&pose.q) + dq)))
}

/// Maximize `objective` from `start`.
pub fn refine_with<O: PoseObjective + ?Sized>(start: &Pose, objective: &mut O, config: &GradientConfig) -> RefineResult {
    let mut pose = *start;
    let initial_score = objective.value(&pose);
    let mut score = initial_score;
    let (mut x_step, mut q_step) = (config.x_step, config.q_step);
    let mut converged = false;
    let mut iterations = 0;

    for _ in 0..config.max_iterations {
        iterations += 1;
        let (gx, gq) = objective.gradient(&pose);
        let norm = (gx.norm_squared() + gq.norm_squared()).sqrt();
        if norm < MIN_GRADIENT {
            converged = true;
            break;
        }
        let (dx, dq) = (gx / norm, gq / norm);

        let mut best: Option<(Pose, f64, f64)> = None;
        for &m in &config.step_multipliers {
            let trial = step_pose(&pose, &(dx * x_step * m), &(dq * q_step * m));
            let value = objective.value(&trial);
            if best.as_ref().map_or(true, |b| value > b.1) {
                best = Some((trial, value, m));
            }
        }
        let Some((trial, value, m)) = best else {
            break;
        };

        let accept = match config.acceptance {
            StepAcceptance::AlwaysBestTrial => true,
            StepAcceptance::Monotone => value > score,
        };
        if accept {
            pose = trial;
            score = value;
            x_step *= m;
            q_step *= m;
        } else {
            let shrink = config.step_multipliers.iter().copied().fold(f64::INFINITY, f64::min);
            x_step *= shrink;
            q_step *= shrink;
        }
    }

    RefineResult {
        pose,
        score,
        initial_score,
        iterations,
        converged,
    }
}

/// Smooth surrogate of the xyz, normal and edge terms over a fixed set of
/// model points.
pub struct AlignmentObjective<'a> {
    ctx: ScoreContext<'a>,
    indices: Vec<usize>,
    edge_view: Option<usize>,
    edge_indices: Vec<usize>,
}

/// Per-point contribution to the value and to the gradient with respect
/// to the world position (and, for normals, the world normal).
struct PointTerm {
    value: f64,
    d_point: Vector3<f64>,
    d_normal: Vector3<f64>,
}

impl<'a> AlignmentObjective<'a> {
    /// Choose the validation points once so every evaluation sees the
    /// same subset.
    pub fn new<R: Rng + ?Sized>(ctx: ScoreContext<'a>, pose: &Pose, rng: &mut R) -> Self {
        let n = ctx.model.cloud.len();
        let indices = random_subset(n, ctx.params.num_validation_points, rng);
        let direction = ctx.model.view_direction(pose, &ctx.obs.camera_position());
        let edge_view = ctx.model.range_edges.nearest_view(&direction);
        let edge_indices = edge_view.map_or_else(Vec::new, |v| {
            let count = ctx.model.range_edges.views[v].points.len();
            random_subset(count, ctx.params.num_edge_validation_points, rng)
        });
        Self {
            ctx,
            indices,
            edge_view,
            edge_indices,
        }
    }

    /// Value and gradient in one pass.
    fn evaluate(&self, pose: &Pose) -> (f64, Vector3<f64>, Vector4<f64>) {
        let ctx = &self.ctx;
        let params = ctx.params;
        let w = params.weights(3);
        let image = &ctx.obs.bg_range_image;
        let cloud = &ctx.model.cloud;

        let mut value = 0.0;
        let mut gx = Vector3::zeros();
        let mut gq = Vector4::zeros();

        let placed = place_points(
            image,
            pose,
            &cloud.points,
            cloud.normals.as_deref(),
            &self.indices,
            params.vis_sigma,
        );
        let vis_pmf = normalize_pmf(&placed.iter().map(|p| p.vis).collect::<Vec<_>>());
        for (p, &weight) in placed.iter().zip(&vis_pmf) {
            let Some((i, j)) = p.cell else {
                continue;
            };
            if weight <= 0.0 || !image.is_occupied(i, j) {
                continue;
            }
            let Some(term) = self.surface_term(p.world, p.normal, i, j) else {
                continue;
            };
            value += weight * term.value;
            gx += weight * term.d_point;
            let jac = rotation_jacobian(&pose.q, &cloud.points[p.index]);
            gq += weight * jac.transpose() * term.d_point;
            if let Some(normals) = cloud.normals.as_ref() {
                let jac_n = rotation_jacobian(&pose.q, &normals[p.index]);
                gq += weight * jac_n.transpose() * term.d_normal;
            }
        }

        if let Some(view) = self.edge_view {
            let points = &ctx.model.range_edges.views[view].points;
            let edges = place_points(image, pose, points, None, &self.edge_indices, params.vis_sigma);
            let edge_pmf = normalize_pmf(&edges.iter().map(|p| p.vis).collect::<Vec<_>>());
            for (p, &weight) in edges.iter().zip(&edge_pmf) {
                let (Some((i, j)), Some(proj)) = (p.cell, p.projection) else {
                    continue;
                };
                if weight <= 0.0 {
                    continue;
                }
                let log = &ctx.obs.edge_log;
                let (gu, gv) = log.gradient_at(i, j);
                let d_cam = image.geometry.projection_jacobian(&proj.p_cam).transpose() * nalgebra::Vector2::new(gu, gv);
                let d_world = image.geometry.viewpoint.rotate(&d_cam);
                value += w.edge * weight * log.get(i, j);
                gx += w.edge * weight * d_world;
                gq += w.edge * weight * rotation_jacobian(&pose.q, &points[p.index]).transpose() * d_world;
            }
        }
        (value, gx, gq)
    }

    /// Weighted xyz (plane distance) and normal terms of one placed point
    /// against its observed cell.
    fn surface_term(&self, world: Vector3<f64>, normal: Option<Vector3<f64>>, i: usize, j: usize) -> Option<PointTerm> {
        let params = self.ctx.params;
        let w = params.weights(3);
        let image = &self.ctx.obs.bg_range_image;
        let normals = image.normals.as_ref()?;
        let n_obs = *normals.get(i, j);
        let r = n_obs.dot(&(world - image.points.get(i, j)));

        let mut term = PointTerm {
            value: 0.0,
            d_point: Vector3::zeros(),
            d_normal: Vector3::zeros(),
        };
        let sx = params.range_sigma;
        if r.abs() < XYZ_CAP_SIGMAS * sx {
            term.value += w.xyz * gaussian_log_ratio(r, sx);
            term.d_point = -w.xyz * r / (sx * sx) * n_obs;
        } else {
            term.value += w.xyz * gaussian_log_ratio(XYZ_CAP_SIGMAS * sx, sx);
        }
        if let Some(n) = normal {
            let sn = params.normal_sigma;
            let d = 1.0 - n.dot(&n_obs);
            term.value += w.normal * gaussian_log_ratio(d, sn);
            term.d_normal = w.normal * d / (sn * sn) * n_obs;
        }
        Some(term)
    }
}

impl PoseObjective for AlignmentObjective<'_> {
    fn value(&mut self, pose: &Pose) -> f64 {
        self.evaluate(pose).0
    }

    fn gradient(&mut self, pose: &Pose) -> (Vector3<f64>, Vector4<f64>) {
        let (_, gx, gq) = self.evaluate(pose);
        (gx, gq)
    }
}

/// Refine a pose against the observed surface and edges.
///
/// Runs up to `final_alignment_iter` rounds (at least one), each with a
/// fresh set of validation points. The rounds share one budget of
/// `gradient.max_iterations` iterations.
pub fn gradient_refine<R: Rng + ?Sized>(ctx: ScoreContext<'_>, pose: &Pose, rng: &mut R) -> RefineResult {
    let config = ctx.params.gradient;
    let mut objective = AlignmentObjective::new(ctx, pose, rng);
    let mut result = refine_with(pose, &mut objective, &config);
    for _ in 1..ctx.params.final_alignment_iter {
        let remaining = config.max_iterations.saturating_sub(result.iterations);
        if remaining == 0 || result.converged {
            break;
        }
        let mut objective = AlignmentObjective::new(ctx, &result.pose, rng);
        let round = refine_with(
            &result.pose,
            &mut objective,
            &GradientConfig {
                max_iterations: remaining,
                ..config
            },
        );
        result = RefineResult {
            initial_score: result.initial_score,
            iterations: result.iterations + round.iterations,
            ..round
        };
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelData;
    use crate::observation::ObservationData;
    use crate::test_utils::{box_model, synthetic_observation, test_params, true_pose};
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Reports an ascent direction along +x while the value falls along it.
    struct Misleading;

    impl PoseObjective for Misleading {
        fn value(&mut self, pose: &Pose) -> f64 {
            -pose.x.x
        }

        fn gradient(&mut self, _pose: &Pose) -> (Vector3<f64>, Vector4<f64>) {
            (Vector3::x(), Vector4::zeros())
        }
    }

    /// Concave bowl around a target translation.
    struct Bowl(Vector3<f64>);

    impl PoseObjective for Bowl {
        fn value(&mut self, pose: &Pose) -> f64 {
            -(pose.x - self.0).norm_squared()
        }

        fn gradient(&mut self, pose: &Pose) -> (Vector3<f64>, Vector4<f64>) {
            (-2.0 * (pose.x - self.0), Vector4::zeros())
        }
    }

    /// Linear in x and in the quaternion's `i` component.
    struct Tilted;

    impl PoseObjective for Tilted {
        fn value(&mut self, pose: &Pose) -> f64 {
            3.0 * pose.x.x + 4.0 * pose.q.i
        }

        fn gradient(&mut self, _pose: &Pose) -> (Vector3<f64>, Vector4<f64>) {
            (3.0 * Vector3::x(), Vector4::new(0.0, 4.0, 0.0, 0.0))
        }
    }

    fn config(acceptance: StepAcceptance) -> GradientConfig {
        GradientConfig {
            max_iterations: 5,
            acceptance,
            ..Default::default()
        }
    }

    #[test]
    fn test_step_acceptance_modes() {
        let start = Pose::identity();
        let monotone = refine_with(&start, &mut Misleading, &config(StepAcceptance::Monotone));
        assert_eq!(monotone.pose, start);
        assert_relative_eq!(monotone.score, monotone.initial_score);

        let always = refine_with(&start, &mut Misleading, &config(StepAcceptance::AlwaysBestTrial));
        assert!(always.pose.x.x > 0.0);
        assert!(always.score < always.initial_score);
    }

    #[test]
    fn test_step_follows_the_joint_gradient_direction() {
        let cfg = GradientConfig {
            max_iterations: 1,
            ..Default::default()
        };
        let result = refine_with(&Pose::identity(), &mut Tilted, &cfg);
        assert_eq!(result.iterations, 1);
        // Longest trial wins; translation gets 3/5 of the unit direction.
        let m = cfg.step_multipliers[2];
        assert_relative_eq!(result.pose.x.x, 0.6 * cfg.x_step * m, epsilon = 1e-12);
        assert_relative_eq!(result.pose.x.y, 0.0);
        let raw = 0.8 * cfg.q_step * m;
        assert_relative_eq!(result.pose.q.i, raw / (1.0 + raw * raw).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_bowl_converges_toward_target() {
        let target = Vector3::new(0.01, 0.0, 0.0);
        let cfg = GradientConfig {
            max_iterations: 40,
            acceptance: StepAcceptance::Monotone,
            ..Default::default()
        };
        let result = refine_with(&Pose::identity(), &mut Bowl(target), &cfg);
        assert!((result.pose.x - target).norm() < 0.002);
        assert!(result.score >= result.initial_score);
        assert_eq!(result.pose.q, UnitQuaternion::identity());
    }

    #[test]
    fn test_monotone_refinement_never_loses_score() {
        let mut params = test_params();
        params.gradient.acceptance = StepAcceptance::Monotone;
        params.gradient.max_iterations = 5;
        let input = box_model();
        let truth = true_pose();
        let obs = ObservationData::new(synthetic_observation(&input.cloud, &truth), &params).unwrap();
        let model = ModelData::new(input, &params).unwrap();
        let ctx = ScoreContext::new(&model, &obs, &params);

        let start = Pose::new(truth.x + Vector3::new(0.003, 0.0, -0.002), truth.q);
        let result = gradient_refine(ctx, &start, &mut StdRng::seed_from_u64(8));
        assert!(result.score >= result.initial_score);
        assert!(result.iterations <= 5);
    }

    #[test]
    fn test_refinement_rounds_share_the_iteration_budget() {
        let mut params = test_params();
        params.gradient.max_iterations = 4;
        let input = box_model();
        let truth = true_pose();
        let obs = ObservationData::new(synthetic_observation(&input.cloud, &truth), &params).unwrap();
        let model = ModelData::new(input, &params).unwrap();
        let start = Pose::new(truth.x + Vector3::new(0.004, -0.002, 0.0), truth.q);

        for rounds in [1, 3, 50] {
            params.final_alignment_iter = rounds;
            let ctx = ScoreContext::new(&model, &obs, &params);
            let result = gradient_refine(ctx, &start, &mut StdRng::seed_from_u64(21));
            assert!(result.iterations <= 4, "{rounds} rounds ran {} iterations", result.iterations);
            assert!(result.iterations >= 1);
        }
    }
}
