//! Point correspondences between an observation and a model.

use serde::Serialize;

use crate::cloud::{FeatureType, Olf, PointCloud};
use crate::model::ModelData;
use crate::observation::ObservationData;

/// Where a correspondence came from, with the data needed to find its
/// points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CorrespondenceType {
    /// Descriptor match between feature clouds.
    Feature(FeatureType),
    /// Observed edge keypoint matched to an edge point of a stored model
    /// view.
    Edge { view: usize },
    /// Observed segment center matched to the nearest model surface point.
    Surface,
}

impl CorrespondenceType {
    pub const FPFH: Self = Self::Feature(FeatureType::Fpfh);
    pub const SHOT: Self = Self::Feature(FeatureType::Shot);
    pub const SIFT: Self = Self::Feature(FeatureType::Sift);
}

/// One observed-to-model point pairing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Correspondence {
    /// Index into the observed cloud selected by `kind`.
    pub obs_index: usize,
    /// Index into the model cloud selected by `kind`.
    pub model_index: usize,
    pub kind: CorrespondenceType,
    /// Match quality (descriptor distance for feature matches).
    pub score: f64,
}

impl Correspondence {
    pub fn new(obs_index: usize, model_index: usize, kind: CorrespondenceType, score: f64) -> Self {
        Self {
            obs_index,
            model_index,
            kind,
            score,
        }
    }
}

/// Observed and model OLFs of a correspondence. Edge matches have no
/// frames and only constrain position.
#[derive(Debug, Clone)]
pub struct ResolvedCorrespondence {
    pub obs: Olf,
    pub model: Olf,
}

fn olf_checked(cloud: &PointCloud, i: usize) -> Option<Olf> {
    (i < cloud.len()).then(|| cloud.olf(i))
}

fn position_only(cloud_point: nalgebra::Vector3<f64>) -> Olf {
    Olf {
        position: cloud_point,
        frames: None,
        pc1: 1.0,
        pc2: 1.0,
    }
}

/// Resolve the observed and model OLFs of a correspondence.
///
/// Returns `None` when the referenced cloud is missing or an index is out
/// of range.
pub fn resolve_olfs(
    model: &ModelData,
    obs: &ObservationData,
    c: &Correspondence,
) -> Option<ResolvedCorrespondence> {
    match c.kind {
        CorrespondenceType::Feature(ft) => Some(ResolvedCorrespondence {
            obs: olf_checked(obs.feature_clouds.get(&ft)?, c.obs_index)?,
            model: olf_checked(&model.feature(ft)?.cloud, c.model_index)?,
        }),
        CorrespondenceType::Surface => Some(ResolvedCorrespondence {
            obs: olf_checked(&obs.fg_cloud, c.obs_index)?,
            model: olf_checked(&model.cloud, c.model_index)?,
        }),
        CorrespondenceType::Edge { view } => {
            let p_obs = *obs.fg_cloud.points.get(c.obs_index)?;
            let p_model = *model.range_edges.views.get(view)?.points.get(c.model_index)?;
            Some(ResolvedCorrespondence {
                obs: position_only(p_obs),
                model: position_only(p_model),
            })
        }
    }
}

/// Resolve every correspondence, skipping unresolvable ones.
pub fn resolve_all(
    model: &ModelData,
    obs: &ObservationData,
    correspondences: &[Correspondence],
) -> Vec<ResolvedCorrespondence> {
    correspondences
        .iter()
        .filter_map(|c| resolve_olfs(model, obs, c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelData;
    use crate::observation::ObservationData;
    use crate::test_utils::{box_model, synthetic_observation, test_params, true_pose};

    #[test]
    fn test_resolve_dispatch() {
        let params = test_params();
        let input = box_model();
        let obs_input = synthetic_observation(&input.cloud, &true_pose());
        let model = ModelData::new(input, &params).unwrap();
        let obs = ObservationData::new(obs_input, &params).unwrap();

        let fpfh = resolve_olfs(&model, &obs, &Correspondence::new(0, 3, CorrespondenceType::FPFH, 0.0)).unwrap();
        assert!(fpfh.obs.frames.is_some());
        assert!(fpfh.model.frames.is_some());

        let edge = resolve_olfs(
            &model,
            &obs,
            &Correspondence::new(0, 0, CorrespondenceType::Edge { view: 0 }, 0.0),
        )
        .unwrap();
        assert!(edge.obs.frames.is_none());
        assert_eq!(edge.model.position, model.range_edges.views[0].points[0]);

        // The test model carries no SHOT descriptors
        assert!(resolve_olfs(&model, &obs, &Correspondence::new(0, 0, CorrespondenceType::SHOT, 0.0)).is_none());
        assert!(resolve_olfs(&model, &obs, &Correspondence::new(usize::MAX, 0, CorrespondenceType::Surface, 0.0)).is_none());
    }
}
