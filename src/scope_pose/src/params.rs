//! SCOPE and MOPE parameters.
//!
//! Both parameter sets are plain structs with defaults. `set(key, value)`
//! applies one `key value` pair from a parameter file; unknown keys are
//! rejected so typos never pass silently.

use serde::Serialize;

use crate::error::{parse_flag, parse_value, ParamError};
use crate::noise_model::NoiseModel;

/// Per-term weights of the placement score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreWeights {
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

impl ScoreWeights {
    /// Default weights for round-2 scoring.
    pub fn round2() -> Self {
        Self {
            xyz: 1.0,
            normal: 0.5,
            vis: 1.0,
            random_walk: 0.0,
            edge: 0.5,
            edge_vis: 0.5,
            edge_occ: 0.2,
            l: 0.2,
            a: 0.2,
            b: 0.2,
            fpfh: 0.5,
            specularity: 0.5,
            segment: 1.0,
            segment_affinity: 0.0,
            table: 1.0,
        }
    }

    /// Default weights for round-3 scoring.
    pub fn round3() -> Self {
        Self {
            random_walk: 0.5,
            segment_affinity: 1.0,
            ..Self::round2()
        }
    }

    /// Set the weight named `term` (e.g. `xyz`, `edge_occ`).
    fn set_term(&mut self, key: &str, term: &str, value: &str) -> Result<(), ParamError> {
        let slot = match term {
            "xyz" => &mut self.xyz,
            "normal" => &mut self.normal,
            "vis" => &mut self.vis,
            "random_walk" => &mut self.random_walk,
            "edge" => &mut self.edge,
            "edge_vis" => &mut self.edge_vis,
            "edge_occ" => &mut self.edge_occ,
            "L" | "l" => &mut self.l,
            "A" | "a" => &mut self.a,
            "B" | "b" => &mut self.b,
            "fpfh" => &mut self.fpfh,
            "specularity" => &mut self.specularity,
            "segment" => &mut self.segment,
            "segment_affinity" => &mut self.segment_affinity,
            "table" => &mut self.table,
            _ => return Err(ParamError::UnknownKey(key.to_string())),
        };
        *slot = parse_value(key, value)?;
        Ok(())
    }
}

/// Handle `<prefix><term>_weight` keys.
fn set_prefixed_weight(
    weights: &mut ScoreWeights,
    key: &str,
    rest: &str,
    value: &str,
) -> Result<(), ParamError> {
    match rest.strip_suffix("_weight") {
        Some(term) => weights.set_term(key, term, value),
        None => Err(ParamError::UnknownKey(key.to_string())),
    }
}

/// What to do when no line-search trial improves the gradient objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepAcceptance {
    /// Take the best of the trial steps even if it scores below the
    /// current pose. Later pruning and sorting clean up.
    AlwaysBestTrial,
    /// Only move when the best trial improves the objective.
    Monotone,
}

/// Gradient-ascent pose refinement settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GradientConfig {
    /// Trial step multipliers of the 3-point line search.
    pub step_multipliers: [f64; 3],
    pub max_iterations: usize,
    /// Initial translation step (meters).
    pub x_step: f64,
    /// Initial quaternion step.
    pub q_step: f64,
    pub acceptance: StepAcceptance,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            step_multipliers: [0.6, 1.0, 1.6],
            max_iterations: 20,
            x_step: 0.002,
            q_step: 0.005,
            acceptance: StepAcceptance::AlwaysBestTrial,
        }
    }
}

/// Superpixel segmentation and affinity settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SegmentationParams {
    /// Seed spacing in pixels.
    pub resolution: usize,
    pub xyz_sigma: f64,
    pub normal_sigma: f64,
    pub lab_sigma: f64,
    pub max_iterations: usize,
    /// Clusters with fewer cells are dropped.
    pub min_cells: usize,
    /// Stop when the total assignment cost changes by less than this.
    pub cost_tolerance: f64,
    /// Pixel radius of the surface keypoint skeleton.
    pub surface_radius: usize,
    /// Suppression radius for edge keypoints.
    pub edge_radius: usize,
    /// Minimum blurred edge probability for an edge keypoint.
    pub edge_thresh: f64,
    pub affinity_dist_thresh: f64,
    pub affinity_dist_weight: f64,
    pub affinity_edge_weight: f64,
    pub affinity_normal_weight: f64,
    pub affinity_color_weight: f64,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            resolution: 6,
            xyz_sigma: 0.05,
            normal_sigma: 0.3,
            lab_sigma: 20.0,
            max_iterations: 50,
            min_cells: 5,
            cost_tolerance: 1.0,
            surface_radius: 3,
            edge_radius: 3,
            edge_thresh: 0.2,
            affinity_dist_thresh: 0.02,
            affinity_dist_weight: 100.0,
            affinity_edge_weight: 5.0,
            affinity_normal_weight: 1.0,
            affinity_color_weight: 0.001,
        }
    }
}

/// Parameters of a single-object SCOPE run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeParams {
    /// Seed of the run's random number generator.
    pub seed: u64,

    // Round 1
    pub num_samples_round1: usize,
    pub knn: usize,
    pub f_sigma: f64,
    /// Seeds whose nearest descriptor is farther than this are skipped.
    pub f_dthresh: f64,
    pub sift_dthresh: f64,
    pub use_fpfh: bool,
    pub use_shot: bool,
    pub use_sift: bool,
    pub use_colors: bool,
    pub pose_clustering: bool,
    pub x_cluster_thresh: f64,
    pub q_cluster_thresh: f64,
    pub round1_score_thresh: f64,
    pub round1_range_thresh: f64,

    // Round 2
    pub num_samples_round2: usize,
    pub round2_alignment_iter: usize,
    pub align_model_to_segments_iter: usize,
    pub num_correspondences: usize,

    // Round 3
    pub num_samples_round3: usize,
    pub remove_redundant_round3: bool,
    /// Gradient rounds per round-3 sample; they share one `gradient.max_iterations` budget.
    pub final_alignment_iter: usize,
    pub gradient: GradientConfig,

    // Round 4
    pub round4: bool,
    pub round4_score_thresh: f64,
    pub round4_arc_samples: usize,
    pub round4_random_samples: usize,
    pub round4_random_sigma: f64,
    pub round4_temperature: f64,

    // Scoring
    pub num_validation_points: usize,
    pub num_edge_validation_points: usize,
    pub range_sigma: f64,
    pub normal_sigma: f64,
    pub vis_sigma: f64,
    pub xyz_sigma: f64,
    pub l_sigma: f64,
    pub a_sigma: f64,
    pub b_sigma: f64,
    pub xyz_score_window: usize,
    pub normal_noise_thresh: f64,
    pub specular_thresh: f64,
    pub edge_eps: f64,
    pub edge_blur: usize,
    pub edge_range_thresh: f64,
    pub random_walk_radius: usize,
    pub table_thresh: f64,
    pub use_score_comp_models: bool,
    pub score2: ScoreWeights,
    pub score3: ScoreWeights,
    pub noise_model: NoiseModel,

    // Derived data
    pub range_image_resolution: f64,
    pub range_image_padding: usize,
    pub distance_grid_resolution: f64,
    pub distance_grid_padding: usize,
    pub segmentation: SegmentationParams,

    /// Draw the BPA orientation from its Bingham instead of taking the mode.
    pub bpa_sample_pose: bool,
}

impl Default for ScopeParams {
    fn default() -> Self {
        Self {
            seed: 0,
            num_samples_round1: 1000,
            knn: 30,
            f_sigma: 0.1,
            f_dthresh: 0.5,
            sift_dthresh: 0.4,
            use_fpfh: true,
            use_shot: false,
            use_sift: true,
            use_colors: true,
            pose_clustering: true,
            x_cluster_thresh: 0.02,
            q_cluster_thresh: 0.2,
            round1_score_thresh: 0.3,
            round1_range_thresh: 0.02,
            num_samples_round2: 50,
            round2_alignment_iter: 5,
            align_model_to_segments_iter: 3,
            num_correspondences: 20,
            num_samples_round3: 10,
            remove_redundant_round3: true,
            final_alignment_iter: 1,
            gradient: GradientConfig::default(),
            round4: true,
            round4_score_thresh: 1.0,
            round4_arc_samples: 36,
            round4_random_samples: 20,
            round4_random_sigma: 0.1,
            round4_temperature: 1.0,
            num_validation_points: 100,
            num_edge_validation_points: 50,
            range_sigma: 0.005,
            normal_sigma: 0.3,
            vis_sigma: 0.01,
            xyz_sigma: 0.01,
            l_sigma: 10.0,
            a_sigma: 5.0,
            b_sigma: 5.0,
            xyz_score_window: 1,
            normal_noise_thresh: 2.0,
            specular_thresh: 20.0,
            edge_eps: 0.01,
            edge_blur: 2,
            edge_range_thresh: 0.02,
            random_walk_radius: 4,
            table_thresh: 0.01,
            use_score_comp_models: false,
            score2: ScoreWeights::round2(),
            score3: ScoreWeights::round3(),
            noise_model: NoiseModel::default(),
            range_image_resolution: 0.005,
            range_image_padding: 2,
            distance_grid_resolution: 0.003,
            distance_grid_padding: 5,
            segmentation: SegmentationParams::default(),
            bpa_sample_pose: false,
        }
    }
}

impl ScopeParams {
    /// Apply one `key value` pair.
    ///
    /// # Errors
    /// [`ParamError::UnknownKey`] for keys outside the schema,
    /// [`ParamError::InvalidValue`] for unparsable values.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ParamError> {
        if let Some(rest) = key.strip_prefix("score2_") {
            return set_prefixed_weight(&mut self.score2, key, rest, value);
        }
        if let Some(rest) = key.strip_prefix("score3_") {
            return set_prefixed_weight(&mut self.score3, key, rest, value);
        }
        if let Some(rest) = key.strip_prefix("segment_") {
            if self.set_segmentation(key, rest, value)? {
                return Ok(());
            }
        }

        match key {
            "seed" => self.seed = parse_value(key, value)?,
            "num_samples_round1" => self.num_samples_round1 = parse_value(key, value)?,
            "knn" => self.knn = parse_value(key, value)?,
            "f_sigma" => self.f_sigma = parse_positive(key, value)?,
            "f_dthresh" => self.f_dthresh = parse_value(key, value)?,
            "sift_dthresh" => self.sift_dthresh = parse_value(key, value)?,
            "use_fpfh" => self.use_fpfh = parse_flag(key, value)?,
            "use_shot" => self.use_shot = parse_flag(key, value)?,
            "use_sift" => self.use_sift = parse_flag(key, value)?,
            "use_colors" => self.use_colors = parse_flag(key, value)?,
            "pose_clustering" => self.pose_clustering = parse_flag(key, value)?,
            "x_cluster_thresh" => self.x_cluster_thresh = parse_value(key, value)?,
            "q_cluster_thresh" => self.q_cluster_thresh = parse_value(key, value)?,
            "round1_score_thresh" => self.round1_score_thresh = parse_value(key, value)?,
            "round1_range_thresh" => self.round1_range_thresh = parse_value(key, value)?,
            "num_samples_round2" => self.num_samples_round2 = parse_value(key, value)?,
            "round2_alignment_iter" => self.round2_alignment_iter = parse_value(key, value)?,
            "align_model_to_segments_iter" => {
                self.align_model_to_segments_iter = parse_value(key, value)?
            }
            "num_correspondences" => self.num_correspondences = parse_value(key, value)?,
            "num_samples_round3" => self.num_samples_round3 = parse_value(key, value)?,
            "remove_redundant_round3" => self.remove_redundant_round3 = parse_flag(key, value)?,
            "final_alignment_iter" => self.final_alignment_iter = parse_value(key, value)?,
            "gradient_iter" => self.gradient.max_iterations = parse_value(key, value)?,
            "gradient_x_step" => self.gradient.x_step = parse_positive(key, value)?,
            "gradient_q_step" => self.gradient.q_step = parse_positive(key, value)?,
            "gradient_monotone" => {
                self.gradient.acceptance = if parse_flag(key, value)? {
                    StepAcceptance::Monotone
                } else {
                    StepAcceptance::AlwaysBestTrial
                }
            }
            "round4" => self.round4 = parse_flag(key, value)?,
            "round4_score_thresh" => self.round4_score_thresh = parse_value(key, value)?,
            "round4_arc_samples" => self.round4_arc_samples = parse_value(key, value)?,
            "round4_random_samples" => self.round4_random_samples = parse_value(key, value)?,
            "round4_random_sigma" => self.round4_random_sigma = parse_value(key, value)?,
            "round4_temperature" => self.round4_temperature = parse_positive(key, value)?,
            "num_validation_points" => self.num_validation_points = parse_value(key, value)?,
            "num_edge_validation_points" => {
                self.num_edge_validation_points = parse_value(key, value)?
            }
            "range_sigma" => self.range_sigma = parse_positive(key, value)?,
            "normal_sigma" => self.normal_sigma = parse_positive(key, value)?,
            "vis_sigma" => self.vis_sigma = parse_positive(key, value)?,
            "xyz_sigma" => self.xyz_sigma = parse_positive(key, value)?,
            "l_sigma" => self.l_sigma = parse_positive(key, value)?,
            "a_sigma" => self.a_sigma = parse_positive(key, value)?,
            "b_sigma" => self.b_sigma = parse_positive(key, value)?,
            "xyz_score_window" => self.xyz_score_window = parse_value(key, value)?,
            "normal_noise_thresh" => self.normal_noise_thresh = parse_value(key, value)?,
            "specular_thresh" => self.specular_thresh = parse_value(key, value)?,
            "edge_eps" => self.edge_eps = parse_positive(key, value)?,
            "edge_blur" => self.edge_blur = parse_value(key, value)?,
            "edge_range_thresh" => self.edge_range_thresh = parse_value(key, value)?,
            "random_walk_radius" => self.random_walk_radius = parse_value(key, value)?,
            "table_thresh" => self.table_thresh = parse_value(key, value)?,
            "use_score_comp_models" => self.use_score_comp_models = parse_flag(key, value)?,
            "range_image_resolution" => self.range_image_resolution = parse_positive(key, value)?,
            "range_image_padding" => self.range_image_padding = parse_value(key, value)?,
            "distance_grid_resolution" => {
                self.distance_grid_resolution = parse_positive(key, value)?
            }
            "distance_grid_padding" => self.distance_grid_padding = parse_value(key, value)?,
            "bpa_sample_pose" => self.bpa_sample_pose = parse_flag(key, value)?,
            _ => return Err(ParamError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// `segment_*` keys. Returns `false` when `rest` is not a segmentation key.
    fn set_segmentation(&mut self, key: &str, rest: &str, value: &str) -> Result<bool, ParamError> {
        let s = &mut self.segmentation;
        match rest {
            "resolution" => s.resolution = parse_value(key, value)?,
            "xyz_sigma" => s.xyz_sigma = parse_positive(key, value)?,
            "normal_sigma" => s.normal_sigma = parse_positive(key, value)?,
            "lab_sigma" => s.lab_sigma = parse_positive(key, value)?,
            "max_iter" => s.max_iterations = parse_value(key, value)?,
            "min_cells" => s.min_cells = parse_value(key, value)?,
            "cost_tolerance" => s.cost_tolerance = parse_value(key, value)?,
            "surface_radius" => s.surface_radius = parse_value(key, value)?,
            "edge_radius" => s.edge_radius = parse_value(key, value)?,
            "edge_thresh" => s.edge_thresh = parse_value(key, value)?,
            "affinity_dist_thresh" => s.affinity_dist_thresh = parse_value(key, value)?,
            "affinity_dist_weight" => s.affinity_dist_weight = parse_value(key, value)?,
            "affinity_edge_weight" => s.affinity_edge_weight = parse_value(key, value)?,
            "affinity_normal_weight" => s.affinity_normal_weight = parse_value(key, value)?,
            "affinity_color_weight" => s.affinity_color_weight = parse_value(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Score weights used in a scoring round (2 or 3).
    pub fn weights(&self, round: u8) -> &ScoreWeights {
        if round >= 3 {
            &self.score3
        } else {
            &self.score2
        }
    }
}

fn parse_positive(key: &str, value: &str) -> Result<f64, ParamError> {
    let v: f64 = parse_value(key, value)?;
    if v > 0.0 && v.is_finite() {
        Ok(v)
    } else {
        Err(ParamError::invalid(key, value, "must be positive"))
    }
}

/// Weights of the MOPE assignment objective.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AssignmentWeights {
    pub score: f64,
    pub unexplained: f64,
    pub overlap: f64,
    pub overlap_per_object: f64,
    pub num_taken: f64,
}

impl Default for AssignmentWeights {
    fn default() -> Self {
        Self {
            score: 1.0,
            unexplained: 5.0,
            overlap: 2.0,
            overlap_per_object: 1.0,
            num_taken: 0.1,
        }
    }
}

impl AssignmentWeights {
    fn set_term(&mut self, key: &str, term: &str, value: &str) -> Result<(), ParamError> {
        let slot = match term {
            "score_weight" => &mut self.score,
            "unexplained_weight" => &mut self.unexplained,
            "overlap_weight" => &mut self.overlap,
            "overlap_per_object_weight" => &mut self.overlap_per_object,
            "num_taken_weight" => &mut self.num_taken,
            _ => return Err(ParamError::UnknownKey(key.to_string())),
        };
        *slot = parse_value(key, value)?;
        Ok(())
    }
}

/// Combinatorial search used by MOPE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MopeSearch {
    Annealing,
    Tabu,
    Greedy,
}

/// Parameters of a multi-object MOPE run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MopeParams {
    /// Term weights used to rescore SCOPE samples, per MOPE round.
    pub scope_weights: [ScoreWeights; 2],
    /// Assignment objective weights, per MOPE round.
    pub assignment: [AssignmentWeights; 2],
    pub search: MopeSearch,
    pub annealing_runs: usize,
    pub annealing_steps: usize,
    /// Probability of accepting a worse state at the first step.
    pub annealing_p0: f64,
    pub use_triangle: bool,
    /// Relative frequency of switch/remove moves; add takes the rest.
    pub switch_prob: f64,
    pub remove_prob: f64,
    /// Size of the best-ever archive.
    pub archive_size: usize,
    pub tabu_neighborhood: usize,
    pub tabu_history_cap: usize,
    /// Samples per model offered to the search.
    pub num_samples_per_model: usize,
    /// Probability above which a sample claims a segment.
    pub segment_claim_thresh: f64,
    pub two_round: bool,
    /// Residual-scene candidates kept in the second round.
    pub round2_candidates: usize,
    /// Residual-scene candidates compared against the first-round winner.
    pub round2_compare: usize,
}

impl Default for MopeParams {
    fn default() -> Self {
        Self {
            scope_weights: [ScoreWeights::round3(), ScoreWeights::round3()],
            assignment: [AssignmentWeights::default(), AssignmentWeights::default()],
            search: MopeSearch::Annealing,
            annealing_runs: 10,
            annealing_steps: 500,
            annealing_p0: 0.3,
            use_triangle: true,
            switch_prob: 0.4,
            remove_prob: 0.3,
            archive_size: 10,
            tabu_neighborhood: 20,
            tabu_history_cap: 50,
            num_samples_per_model: 10,
            segment_claim_thresh: 0.5,
            two_round: false,
            round2_candidates: 10,
            round2_compare: 5,
        }
    }
}

impl MopeParams {
    /// Apply one `key value` pair.
    ///
    /// SCOPE term weights take a `scope1_`/`scope2_` prefix
    /// (`scope1_xyz_weight`), assignment weights a `mope1_`/`mope2_`
    /// prefix (`mope2_unexplained_weight`).
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ParamError> {
        for (r, prefix) in ["scope1_", "scope2_"].iter().enumerate() {
            if let Some(rest) = key.strip_prefix(prefix) {
                return set_prefixed_weight(&mut self.scope_weights[r], key, rest, value);
            }
        }
        for (r, prefix) in ["mope1_", "mope2_"].iter().enumerate() {
            if let Some(rest) = key.strip_prefix(prefix) {
                return self.assignment[r].set_term(key, rest, value);
            }
        }

        match key {
            "search" => {
                self.search = match value.trim() {
                    "annealing" => MopeSearch::Annealing,
                    "tabu" => MopeSearch::Tabu,
                    "greedy" => MopeSearch::Greedy,
                    other => {
                        return Err(ParamError::invalid(
                            key,
                            other,
                            "expected annealing, tabu or greedy",
                        ))
                    }
                }
            }
            "annealing_runs" => self.annealing_runs = parse_value(key, value)?,
            "annealing_steps" => self.annealing_steps = parse_value(key, value)?,
            "annealing_p0" => self.annealing_p0 = parse_probability(key, value)?,
            "use_triangle" => self.use_triangle = parse_flag(key, value)?,
            "switch_prob" => self.switch_prob = parse_probability(key, value)?,
            "remove_prob" => self.remove_prob = parse_probability(key, value)?,
            "archive_size" => self.archive_size = parse_value(key, value)?,
            "tabu_neighborhood" => self.tabu_neighborhood = parse_value(key, value)?,
            "tabu_history_cap" => self.tabu_history_cap = parse_value(key, value)?,
            "num_samples_per_model" => self.num_samples_per_model = parse_value(key, value)?,
            "segment_claim_thresh" => self.segment_claim_thresh = parse_probability(key, value)?,
            "two_round" => self.two_round = parse_flag(key, value)?,
            "round2_candidates" => self.round2_candidates = parse_value(key, value)?,
            "round2_compare" => self.round2_compare = parse_value(key, value)?,
            _ => return Err(ParamError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}

fn parse_probability(key: &str, value: &str) -> Result<f64, ParamError> {
    let v: f64 = parse_value(key, value)?;
    if (0.0..=1.0).contains(&v) {
        Ok(v)
    } else {
        Err(ParamError::invalid(key, value, "must lie in [0, 1]"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_set_known_keys() {
        let mut p = ScopeParams::default();
        p.set("knn", "12").unwrap();
        p.set("score3_edge_occ_weight", "0.7").unwrap();
        p.set("segment_resolution", "9").unwrap();
        p.set("gradient_monotone", "1").unwrap();
        assert_eq!(p.knn, 12);
        assert_eq!(p.score3.edge_occ, 0.7);
        assert_eq!(p.segmentation.resolution, 9);
        assert_eq!(p.gradient.acceptance, StepAcceptance::Monotone);
    }

    #[test]
    fn test_scope_rejects_unknown_keys() {
        let mut p = ScopeParams::default();
        assert_eq!(
            p.set("no_such_key", "1"),
            Err(ParamError::UnknownKey("no_such_key".into()))
        );
        assert!(matches!(p.set("score2_bogus_weight", "1"), Err(ParamError::UnknownKey(_))));
        assert!(matches!(p.set("segment_bogus", "1"), Err(ParamError::UnknownKey(_))));
        assert!(matches!(p.set("range_sigma", "-1"), Err(ParamError::InvalidValue { .. })));
    }

    #[test]
    fn test_default_gradient_always_takes_best_trial() {
        let g = GradientConfig::default();
        assert_eq!(g.acceptance, StepAcceptance::AlwaysBestTrial);
        assert_eq!(g.step_multipliers, [0.6, 1.0, 1.6]);
        assert_eq!(g.max_iterations, 20);
    }

    #[test]
    fn test_mope_set() {
        let mut p = MopeParams::default();
        p.set("scope2_xyz_weight", "3").unwrap();
        p.set("mope1_unexplained_weight", "7").unwrap();
        p.set("search", "tabu").unwrap();
        assert_eq!(p.scope_weights[1].xyz, 3.0);
        assert_eq!(p.assignment[0].unexplained, 7.0);
        assert_eq!(p.search, MopeSearch::Tabu);
        assert!(matches!(p.set("mope1_bogus", "1"), Err(ParamError::UnknownKey(_))));
        assert!(matches!(p.set("annealing_p0", "2"), Err(ParamError::InvalidValue { .. })));
        assert!(matches!(p.set("unknown", "2"), Err(ParamError::UnknownKey(_))));
    }
}
