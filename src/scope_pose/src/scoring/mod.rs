//! Placement scoring.
//!
//! A hypothesis is scored by placing a subset of model points (round 2) or
//! all of them (round 3) in the scene and comparing them with the observed
//! range image:
//! - **Geometry**: range/plane distance (`xyz`), normal agreement,
//!   visibility
//! - **Appearance**: Lab color, specular highlights, FPFH descriptors
//! - **Edges**: silhouette agreement, silhouette visibility, occlusion
//!   boundaries
//! - **Segments**: fit of the assigned segments, affinity to unassigned
//!   neighbors, table penalty
//!
//! Terms are log ratios against a perfect fit, combined linearly with
//! [`ScoreWeights`].

mod edges;
mod round1;
mod terms;
mod visibility;

pub use round1::round1_score;
pub(crate) use terms::{model_surface_distance, window_distance, XYZ_CAP_SIGMAS};
pub use visibility::{place_points, visibility_probability, PlacedPoint};

use rand::Rng;
use serde::Serialize;

use crate::geometry::Pose;
use crate::model::ModelData;
use crate::noise_model::{surface_angle, PointNoise, UNKNOWN_EDGE_DISTANCE};
use crate::observation::ObservationData;
use crate::params::{ScopeParams, ScoreWeights};
use crate::sample::SegmentAssignment;
use crate::stats::{normalize_pmf, random_subset};

/// Floor of the mean visibility before taking its log.
pub const VIS_EPSILON: f64 = 0.01;

/// Everything a score needs besides the pose.
#[derive(Clone, Copy)]
pub struct ScoreContext<'a> {
    pub model: &'a ModelData,
    pub obs: &'a ObservationData,
    pub params: &'a ScopeParams,
}

/// Per-term breakdown of a placement score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreComponents {
    pub xyz: f64,
    pub normal: f64,
    pub vis: f64,
    pub random_walk: f64,
    pub edge: f64,
    pub edge_vis: f64,
    pub edge_occ: f64,
    pub l: f64,
    pub a: f64,
    pub b: f64,
    pub fpfh: f64,
    pub specularity: f64,
    pub segment: f64,
    pub segment_affinity: f64,
    pub table: f64,
}

impl ScoreComponents {
    /// Weighted sum of the terms.
    pub fn total(&self, w: &ScoreWeights) -> f64 {
        w.xyz * self.xyz
            + w.normal * self.normal
            + w.vis * self.vis
            + w.random_walk * self.random_walk
            + w.edge * self.edge
            + w.edge_vis * self.edge_vis
            + w.edge_occ * self.edge_occ
            + w.l * self.l
            + w.a * self.a
            + w.b * self.b
            + w.fpfh * self.fpfh
            + w.specularity * self.specularity
            + w.segment * self.segment
            + w.segment_affinity * self.segment_affinity
            + w.table * self.table
    }

    /// The terms with recalibration coefficients, in coefficient order.
    fn calibrated_terms_mut(&mut self) -> [&mut f64; crate::model::NUM_CALIBRATED_TERMS] {
        [
            &mut self.xyz,
            &mut self.normal,
            &mut self.vis,
            &mut self.random_walk,
            &mut self.edge,
            &mut self.edge_vis,
            &mut self.edge_occ,
            &mut self.l,
            &mut self.a,
            &mut self.b,
            &mut self.fpfh,
        ]
    }
}

/// Intermediate values of one scoring call, for inspection and tests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoringDiagnostics {
    /// Model points used for validation.
    pub validation_indices: Vec<usize>,
    /// Visibility of each validation point.
    pub vis_prob: Vec<f64>,
    /// Stored model view whose silhouette was scored.
    pub edge_view: Option<usize>,
    /// Silhouette points of that view used for validation.
    pub edge_indices: Vec<usize>,
    pub edge_vis_prob: Vec<f64>,
    /// Uncalibrated terms.
    pub raw: ScoreComponents,
    /// Terms after recalibration (equal to `raw` when disabled).
    pub components: ScoreComponents,
    pub total: f64,
}

impl<'a> ScoreContext<'a> {
    pub fn new(model: &'a ModelData, obs: &'a ObservationData, params: &'a ScopeParams) -> Self {
        Self { model, obs, params }
    }

    /// Replace the raw terms by their recalibrated values when the model
    /// carries calibration and it is enabled.
    pub fn calibrate(&self, mut c: ScoreComponents) -> ScoreComponents {
        if !self.params.use_score_comp_models {
            return c;
        }
        if let Some(models) = self.model.score_comp_models.as_ref() {
            for (term, value) in c.calibrated_terms_mut().into_iter().enumerate() {
                *value = models.calibrate(term, *value);
            }
        }
        c
    }

    /// Score `pose` with the default weights of `round`.
    ///
    /// Returns the weighted total and the (calibrated) terms.
    pub fn score<R: Rng + ?Sized>(
        &self,
        pose: &Pose,
        segments: &SegmentAssignment,
        round: u8,
        rng: &mut R,
    ) -> (f64, ScoreComponents) {
        self.score_with(pose, segments, round, self.params.weights(round), rng, None)
    }

    /// Score `pose` with explicit weights, optionally recording the
    /// intermediate values.
    pub fn score_with<R: Rng + ?Sized>(
        &self,
        pose: &Pose,
        segments: &SegmentAssignment,
        round: u8,
        weights: &ScoreWeights,
        rng: &mut R,
        diagnostics: Option<&mut ScoringDiagnostics>,
    ) -> (f64, ScoreComponents) {
        let mut diag = ScoringDiagnostics::default();
        let raw = self.components(pose, segments, round, rng, &mut diag);
        let components = self.calibrate(raw);
        let total = components.total(weights);
        if let Some(out) = diagnostics {
            diag.raw = raw;
            diag.components = components;
            diag.total = total;
            *out = diag;
        }
        (total, components)
    }

    fn components<R: Rng + ?Sized>(
        &self,
        pose: &Pose,
        segments: &SegmentAssignment,
        round: u8,
        rng: &mut R,
        diag: &mut ScoringDiagnostics,
    ) -> ScoreComponents {
        let cloud = &self.model.cloud;
        let indices = if round >= 3 {
            (0..cloud.len()).collect()
        } else {
            random_subset(cloud.len(), self.params.num_validation_points, rng)
        };
        let image = &self.obs.bg_range_image;
        let placed = place_points(
            image,
            pose,
            &cloud.points,
            cloud.normals.as_deref(),
            &indices,
            self.params.vis_sigma,
        );
        let vis: Vec<f64> = placed.iter().map(|p| p.vis).collect();
        let vis_pmf = normalize_pmf(&vis);
        let mean_vis = visibility::mean_visibility(&placed);

        let edges = edges::edge_terms(self, pose, round, rng);
        let noise = self.point_noise(pose, &placed);

        let (l, a, b, specularity) = terms::lab_terms(self, &placed, &noise, &vis_pmf);
        let components = ScoreComponents {
            xyz: terms::xyz_term(self, &placed, &noise, &vis_pmf),
            normal: terms::normal_term(self, &placed, &noise, &vis_pmf),
            vis: mean_vis.max(VIS_EPSILON).ln(),
            random_walk: if round >= 3 {
                terms::random_walk_term(self, pose, &placed, &vis_pmf, rng)
            } else {
                0.0
            },
            edge: edges.edge,
            edge_vis: edges.edge_vis,
            edge_occ: edges.edge_occ,
            l,
            a,
            b,
            fpfh: terms::fpfh_term(self, pose, round, rng),
            specularity,
            segment: terms::segment_term(self, pose, segments),
            segment_affinity: if round >= 3 {
                terms::segment_affinity_term(self, segments)
            } else {
                0.0
            },
            table: terms::table_term(self, &placed),
        };

        diag.validation_indices = indices;
        diag.vis_prob = vis;
        diag.edge_view = edges.view;
        diag.edge_indices = edges.placed.iter().map(|p| p.index).collect();
        diag.edge_vis_prob = edges.placed.iter().map(|p| p.vis).collect();
        components
    }

    /// Noise multipliers of placed model points, from their surface angle
    /// and their distance to the silhouette of the nearest stored view.
    pub fn point_noise(&self, pose: &Pose, placed: &[PlacedPoint]) -> Vec<PointNoise> {
        let image = &self.obs.bg_range_image;
        let direction = self.model.view_direction(pose, &self.obs.camera_position());
        let view = self.model.nearest_viewpoint(&direction);
        placed
            .iter()
            .map(|p| {
                let angle = match (p.projection, p.normal_cam(image)) {
                    (Some(proj), Some(n)) => surface_angle(&proj.p_cam, &n),
                    _ => 0.0,
                };
                let edge_distance = self
                    .model
                    .edge_distance(p.index, view)
                    .unwrap_or(UNKNOWN_EDGE_DISTANCE);
                self.params.noise_model.point_noise(angle, edge_distance)
            })
            .collect()
    }
}
