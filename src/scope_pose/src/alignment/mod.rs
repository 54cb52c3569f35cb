//! Pose alignment: segment assignment, segment-driven BPA re-alignment
//! and gradient refinement.

mod gradient;
mod model_to_segments;
mod segments;

pub use gradient::{gradient_refine, refine_with, AlignmentObjective, PoseObjective, RefineResult};
pub use model_to_segments::{align_model_to_segments, segment_correspondences};
pub use segments::{sample_segments_given_model_pose, segment_probability};
