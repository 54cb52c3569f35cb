//! Point clouds with typed per-point channels.
//!
//! A [`PointCloud`] is built once (from named channel columns or from the
//! builder methods) and never edited in place afterwards. Every per-point
//! array has exactly one row per point; optional channels are `None` when
//! the source did not provide them.

mod color;
mod features;
mod olf;

pub use color::rgb_to_lab;
pub use features::{descriptor_angle, descriptor_distance, FeatureIndex, FeatureType};
pub use olf::{olf_bingham, Olf};

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use nalgebra::{UnitQuaternion, Vector3};
use tracing::debug;

use crate::geometry::{frame_quaternion, Pose};

/// Number of stored viewpoints in a `ved` row.
pub const DEFAULT_NUM_VIEWS: usize = 66;

/// Point cloud with optional typed channels.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    pub points: Vec<Vector3<f64>>,
    pub normals: Option<Vec<Vector3<f64>>>,
    /// Principal curvature directions
    pub principal_curvatures: Option<Vec<Vector3<f64>>>,
    pub pc1: Option<Vec<f64>>,
    pub pc2: Option<Vec<f64>>,
    /// Oriented frames `[Q0, Q1]` derived from normals and curvature directions.
    pub frames: Option<Vec<[UnitQuaternion<f64>; 2]>>,
    /// Descriptor blocks keyed by feature type. Absent types are not used.
    pub descriptors: BTreeMap<FeatureType, Vec<Vec<f64>>>,
    /// CIE-Lab color
    pub labs: Option<Vec<Vector3<f64>>>,
    pub range_edge: Option<Vec<f64>>,
    pub curv_edge: Option<Vec<f64>>,
    pub img_edge: Option<Vec<f64>>,
    pub normalvar: Option<Vec<f64>>,
    pub canny: Option<Vec<f64>>,
    pub cluster: Option<Vec<i64>>,
    /// Distance to the silhouette edge, one entry per stored viewpoint.
    pub ved: Option<Vec<Vec<f64>>>,
    /// Viewpoint each point was observed from (range-edge clouds).
    pub viewpoints: Option<Vec<Vector3<f64>>>,
    /// Channels outside the known vocabulary.
    pub raw: BTreeMap<String, Vec<f64>>,
}

/// Column lookup over a channel-name header.
struct Columns<'a> {
    names: &'a [String],
    rows: &'a [Vec<f64>],
}

impl Columns<'_> {
    fn find(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    fn scalar(&self, name: &str) -> Option<Vec<f64>> {
        let c = self.find(name)?;
        Some(self.rows.iter().map(|r| r[c]).collect())
    }

    fn vec3(&self, a: &str, b: &str, c: &str) -> Option<Vec<Vector3<f64>>> {
        let (ia, ib, ic) = (self.find(a)?, self.find(b)?, self.find(c)?);
        Some(
            self.rows
                .iter()
                .map(|r| Vector3::new(r[ia], r[ib], r[ic]))
                .collect(),
        )
    }

    /// Numbered block `prefix1..prefixN`; all columns must be present.
    fn block(&self, prefix: &str, len: usize) -> Option<Vec<Vec<f64>>> {
        let cols: Option<Vec<usize>> = (1..=len)
            .map(|k| self.find(&format!("{prefix}{k}")))
            .collect();
        let cols = cols?;
        Some(
            self.rows
                .iter()
                .map(|r| cols.iter().map(|&c| r[c]).collect())
                .collect(),
        )
    }

    /// Numbered block of unknown length `prefix1, prefix2, ...`.
    fn open_block(&self, prefix: &str) -> Option<Vec<Vec<f64>>> {
        let mut len = 0;
        while self.find(&format!("{prefix}{}", len + 1)).is_some() {
            len += 1;
        }
        if len == 0 {
            return None;
        }
        self.block(prefix, len)
    }
}

/// Whether a channel name belongs to the recognized vocabulary.
fn is_known_channel(name: &str) -> bool {
    const SINGLE: &[&str] = &[
        "x", "y", "z", "nx", "ny", "nz", "pcx", "pcy", "pcz", "pc1", "pc2", "red", "green",
        "blue", "range_edge", "curv_edge", "img_edge", "normalvar", "canny", "cluster", "vx",
        "vy", "vz",
    ];
    if SINGLE.contains(&name) {
        return true;
    }
    let numbered = |prefix: &str| {
        name.strip_prefix(prefix)
            .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
    };
    numbered("f") || numbered("shot") || numbered("sift") || numbered("ved")
}

impl PointCloud {
    /// Cloud with positions only.
    pub fn from_points(points: Vec<Vector3<f64>>) -> Self {
        Self {
            points,
            ..Default::default()
        }
    }

    /// Build a cloud from a channel header and row-major data.
    ///
    /// # Arguments
    /// * `names` - Channel names, one per column
    /// * `rows` - One row per point, each with `names.len()` values
    ///
    /// # Errors
    /// Fails when a row has the wrong width or `x`, `y`, `z` are missing.
    pub fn from_channels(names: &[String], rows: &[Vec<f64>]) -> Result<Self> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != names.len() {
                bail!(
                    "row {} has {} values, expected {} channels",
                    i,
                    row.len(),
                    names.len()
                );
            }
        }
        let cols = Columns { names, rows };
        let Some(points) = cols.vec3("x", "y", "z") else {
            bail!("point cloud is missing x/y/z channels");
        };

        let mut cloud = Self::from_points(points);
        cloud.normals = cols.vec3("nx", "ny", "nz");
        cloud.principal_curvatures = cols.vec3("pcx", "pcy", "pcz");
        cloud.pc1 = cols.scalar("pc1");
        cloud.pc2 = cols.scalar("pc2");

        for ft in FeatureType::ALL {
            if let Some(block) = cols.block(ft.channel_prefix(), ft.dim()) {
                cloud.descriptors.insert(ft, block);
            }
        }

        cloud.labs = cols
            .vec3("red", "green", "blue")
            .map(|rgb| rgb.iter().map(rgb_to_lab).collect());
        cloud.range_edge = cols.scalar("range_edge");
        cloud.curv_edge = cols.scalar("curv_edge");
        cloud.img_edge = cols.scalar("img_edge");
        cloud.normalvar = cols.scalar("normalvar");
        cloud.canny = cols.scalar("canny");
        cloud.cluster = cols
            .scalar("cluster")
            .map(|c| c.iter().map(|v| v.round() as i64).collect());
        cloud.ved = cols.open_block("ved");
        cloud.viewpoints = cols.vec3("vx", "vy", "vz");

        for (c, name) in names.iter().enumerate() {
            if !is_known_channel(name) {
                cloud
                    .raw
                    .insert(name.clone(), rows.iter().map(|r| r[c]).collect());
            }
        }
        if !cloud.raw.is_empty() {
            debug!("kept {} unrecognized channels as raw data", cloud.raw.len());
        }

        cloud.update_frames();
        Ok(cloud)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn with_normals(mut self, normals: Vec<Vector3<f64>>) -> Self {
        self.normals = Some(normals);
        self.update_frames();
        self
    }

    /// Set principal curvature directions and magnitudes.
    pub fn with_curvature(mut self, dirs: Vec<Vector3<f64>>, pc1: Vec<f64>, pc2: Vec<f64>) -> Self {
        self.principal_curvatures = Some(dirs);
        self.pc1 = Some(pc1);
        self.pc2 = Some(pc2);
        self.update_frames();
        self
    }

    pub fn with_labs(mut self, labs: Vec<Vector3<f64>>) -> Self {
        self.labs = Some(labs);
        self
    }

    pub fn with_descriptors(mut self, ft: FeatureType, rows: Vec<Vec<f64>>) -> Self {
        self.descriptors.insert(ft, rows);
        self
    }

    pub fn with_ved(mut self, ved: Vec<Vec<f64>>) -> Self {
        self.ved = Some(ved);
        self
    }

    pub fn with_viewpoints(mut self, viewpoints: Vec<Vector3<f64>>) -> Self {
        self.viewpoints = Some(viewpoints);
        self
    }

    pub fn descriptors(&self, ft: FeatureType) -> Option<&[Vec<f64>]> {
        self.descriptors.get(&ft).map(Vec::as_slice)
    }

    /// Recompute `frames` from normals and curvature directions.
    fn update_frames(&mut self) {
        self.frames = match (&self.normals, &self.principal_curvatures) {
            (Some(normals), Some(pcs)) if normals.len() == pcs.len() => Some(
                normals
                    .iter()
                    .zip(pcs)
                    .map(|(n, pc)| oriented_frames(n, pc))
                    .collect(),
            ),
            _ => None,
        };
    }

    /// Mean of all points (origin when empty).
    pub fn centroid(&self) -> Vector3<f64> {
        if self.points.is_empty() {
            return Vector3::zeros();
        }
        self.points.iter().sum::<Vector3<f64>>() / self.points.len() as f64
    }

    /// New cloud holding the given rows, in order.
    pub fn subset(&self, indices: &[usize]) -> PointCloud {
        fn pick<T: Clone>(v: &Option<Vec<T>>, idx: &[usize]) -> Option<Vec<T>> {
            v.as_ref().map(|v| idx.iter().map(|&i| v[i].clone()).collect())
        }
        PointCloud {
            points: indices.iter().map(|&i| self.points[i]).collect(),
            normals: pick(&self.normals, indices),
            principal_curvatures: pick(&self.principal_curvatures, indices),
            pc1: pick(&self.pc1, indices),
            pc2: pick(&self.pc2, indices),
            frames: pick(&self.frames, indices),
            descriptors: self
                .descriptors
                .iter()
                .map(|(ft, rows)| (*ft, indices.iter().map(|&i| rows[i].clone()).collect()))
                .collect(),
            labs: pick(&self.labs, indices),
            range_edge: pick(&self.range_edge, indices),
            curv_edge: pick(&self.curv_edge, indices),
            img_edge: pick(&self.img_edge, indices),
            normalvar: pick(&self.normalvar, indices),
            canny: pick(&self.canny, indices),
            cluster: pick(&self.cluster, indices),
            ved: pick(&self.ved, indices),
            viewpoints: pick(&self.viewpoints, indices),
            raw: self
                .raw
                .iter()
                .map(|(k, col)| (k.clone(), indices.iter().map(|&i| col[i]).collect()))
                .collect(),
        }
    }

    /// New cloud with positions, directions and frames moved by `pose`.
    pub fn transformed(&self, pose: &Pose) -> PointCloud {
        let mut out = self.clone();
        out.points = self.points.iter().map(|p| pose.transform_point(p)).collect();
        out.normals = self
            .normals
            .as_ref()
            .map(|v| v.iter().map(|n| pose.rotate(n)).collect());
        out.principal_curvatures = self
            .principal_curvatures
            .as_ref()
            .map(|v| v.iter().map(|n| pose.rotate(n)).collect());
        out.frames = self
            .frames
            .as_ref()
            .map(|v| v.iter().map(|[a, b]| [pose.q * a, pose.q * b]).collect());
        out.viewpoints = self
            .viewpoints
            .as_ref()
            .map(|v| v.iter().map(|p| pose.transform_point(p)).collect());
        out
    }
}

/// Frames with rotation columns `(n, pc, n×pc)` and `(n, -pc, -(n×pc))`.
fn oriented_frames(n: &Vector3<f64>, pc: &Vector3<f64>) -> [UnitQuaternion<f64>; 2] {
    let c2 = n.cross(pc);
    [
        frame_quaternion(n, pc, &c2),
        frame_quaternion(n, &(-pc), &(-c2)),
    ]
}
