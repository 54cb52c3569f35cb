//! SCOPE/MOPE 6-DOF object pose estimation.
//!
//! This library finds the poses of known rigid models in a single observed
//! point cloud, using oriented local features, Bingham orientation
//! uncertainty and a visibility-aware placement score.
//!
//! # Architecture
//!
//! The pipeline is split into stages:
//! - Precomputation: range images, distance grids, feature indices and
//!   superpixel segments, built once per model and observation
//! - Alignment: Bingham Procrustean Alignment (BPA) from correspondences,
//!   segment-guided re-alignment and gradient refinement
//! - Scoring: weighted sum of per-term log-likelihoods of a placement
//! - Search: SCOPE (one model, four rounds) and MOPE (which models, where)
//!
//! # Usage
//!
//! ```ignore
//! use rand::{rngs::StdRng, SeedableRng};
//! use scope_pose::{scope, ModelData, ObservationData, ScopeParams};
//!
//! let params = ScopeParams::default();
//! let model = ModelData::new(model_input, &params)?;
//! let obs = ObservationData::new(obs_input, &params)?;
//!
//! let mut rng = StdRng::seed_from_u64(params.seed);
//! let result = scope(&model, &obs, &params, &[], &mut rng);
//! if let Some((best, weight)) = result.samples.best() {
//!     println!("x = {:?}, weight = {weight}", best.pose.x);
//! }
//! ```

pub mod alignment;
pub mod bingham;
pub mod bpa;
pub mod cloud;
pub mod correspondence;
pub mod distance_grid;
pub mod error;
pub mod geometry;
pub mod image;
pub mod model;
pub mod mope;
pub mod noise_model;
pub mod observation;
pub mod params;
pub mod range_image;
pub mod sample;
pub mod scope;
pub mod scoring;
pub mod segmentation;
pub mod stats;
pub mod symmetry;
pub mod test_utils;
pub mod timing;

pub use bingham::Bingham;
pub use bpa::{bpa, BpaResult};
pub use cloud::{FeatureType, PointCloud};
pub use correspondence::{Correspondence, CorrespondenceType};
pub use distance_grid::DistanceGrid;
pub use error::ParamError;
pub use geometry::Pose;
pub use model::{ModelData, ModelInput, ScoreCompModels};
pub use observation::{ObservationData, ObservationInput};
pub use params::{
    AssignmentWeights, GradientConfig, MopeParams, MopeSearch, ScopeParams, ScoreWeights, StepAcceptance,
};
pub use range_image::RangeImage;
pub use sample::{Sample, SampleSet, SegmentAssignment, REJECTED_SCORE};
pub use symmetry::{ModelSymmetry, Symmetry};

// Search entry points
pub use mope::{mope, mope_greedy, MopeObject, MopeResult, MopeSample};
pub use scope::{good_pose_counts, scope, GoodPoseCounts, ScopeResult};
pub use scoring::{ScoreComponents, ScoreContext, ScoringDiagnostics};
pub use timing::RunTiming;
