//! Model manifests and the per-model side files they point to.
//!
//! A manifest line reads
//! `name obj fpfh shot sift range_edges dist_grid symmetries score_comp`
//! with paths relative to the manifest's directory. A `-` marks a file the
//! model does not have; only `obj` is mandatory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use nalgebra::Vector3;
use scope_pose::{DistanceGrid, FeatureType, ModelInput, ModelSymmetry, PointCloud, ScoreCompModels};
use tracing::{debug, info};

use crate::error::{content_lines, parse_floats, read_file, LoadError};
use crate::pcd::load_pcd;

const MANIFEST_COLUMNS: usize = 9;

/// File set of one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelEntry {
    pub name: String,
    pub cloud: PathBuf,
    pub features: BTreeMap<FeatureType, PathBuf>,
    pub range_edges: Option<PathBuf>,
    pub distance_grid: Option<PathBuf>,
    pub symmetries: Option<PathBuf>,
    pub score_comp_models: Option<PathBuf>,
}

pub fn load_manifest(path: &Path) -> Result<Vec<ModelEntry>, LoadError> {
    let text = read_file(path)?;
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    parse_manifest(path, dir, &text)
}

pub fn parse_manifest(path: &Path, dir: &Path, text: &str) -> Result<Vec<ModelEntry>, LoadError> {
    let mut entries = Vec::new();
    for (line, content) in content_lines(text) {
        let cols: Vec<&str> = content.split_whitespace().collect();
        if cols.len() != MANIFEST_COLUMNS {
            return Err(LoadError::parse(
                path,
                line,
                format!("expected {MANIFEST_COLUMNS} columns, got {}", cols.len()),
            ));
        }
        let file = |c: &str| (c != "-").then(|| dir.join(c));
        let Some(cloud) = file(cols[1]) else {
            return Err(LoadError::parse(path, line, "model point cloud is required"));
        };
        let features = [FeatureType::Fpfh, FeatureType::Shot, FeatureType::Sift]
            .into_iter()
            .zip(&cols[2..5])
            .filter_map(|(ft, c)| file(c).map(|p| (ft, p)))
            .collect();
        entries.push(ModelEntry {
            name: cols[0].to_string(),
            cloud,
            features,
            range_edges: file(cols[5]),
            distance_grid: file(cols[6]),
            symmetries: file(cols[7]),
            score_comp_models: file(cols[8]),
        });
    }
    Ok(entries)
}

/// Load every file of `entry` into a [`ModelInput`].
pub fn load_model(entry: &ModelEntry) -> Result<ModelInput, LoadError> {
    let cloud = load_pcd(&entry.cloud)?;
    let mut feature_clouds = BTreeMap::new();
    for (&ft, path) in &entry.features {
        feature_clouds.insert(ft, load_pcd(path)?);
    }
    let range_edges = entry.range_edges.as_deref().map(load_pcd).transpose()?;
    let distance_grid = entry
        .distance_grid
        .as_deref()
        .map(|p| load_distance_grid(p, &cloud))
        .transpose()?;
    let symmetries = match &entry.symmetries {
        Some(p) => load_symmetries(p)?,
        None => Vec::new(),
    };
    let score_comp_models = entry.score_comp_models.as_deref().map(load_score_comp_models).transpose()?;

    info!(
        "model '{}': {} points, {} feature clouds, {} symmetries",
        entry.name,
        cloud.len(),
        feature_clouds.len(),
        symmetries.len()
    );
    Ok(ModelInput {
        name: entry.name.clone(),
        cloud,
        feature_clouds,
        range_edges,
        distance_grid,
        symmetries,
        score_comp_models,
    })
}

/// Read a precomputed distance grid for `cloud`.
///
/// Header `nx ny nz res minX minY minZ`, then one `nearestVoxel distance`
/// line per voxel. A negative nearest voxel marks an empty field entry.
pub fn load_distance_grid(path: &Path, cloud: &PointCloud) -> Result<DistanceGrid, LoadError> {
    let text = read_file(path)?;
    parse_distance_grid(path, &text, cloud)
}

pub fn parse_distance_grid(path: &Path, text: &str, cloud: &PointCloud) -> Result<DistanceGrid, LoadError> {
    let mut lines = content_lines(text);
    let Some((line, header)) = lines.next() else {
        return Err(LoadError::parse(path, 0, "empty distance grid file"));
    };
    let h = parse_floats(path, line, header)?;
    if h.len() != 7 {
        return Err(LoadError::parse(path, line, format!("header has {} values, expected 7", h.len())));
    }
    if h[..3].iter().any(|&v| v < 1.0 || v.fract() != 0.0) {
        return Err(LoadError::parse(path, line, "grid dimensions must be positive integers"));
    }
    let dims = [h[0] as usize, h[1] as usize, h[2] as usize];
    if dims[0].checked_mul(dims[1]).and_then(|n| n.checked_mul(dims[2])).is_none() {
        return Err(LoadError::parse(path, line, format!("grid dimensions {dims:?} overflow")));
    }

    let mut nearest = Vec::new();
    let mut distance = Vec::new();
    for (line, content) in lines {
        let v = parse_floats(path, line, content)?;
        if v.len() != 2 {
            return Err(LoadError::parse(path, line, format!("expected 2 values, got {}", v.len())));
        }
        nearest.push((v[0] >= 0.0).then_some(v[0] as usize));
        distance.push(v[1]);
    }
    debug!("distance grid {:?} from {}", dims, path.display());

    DistanceGrid::from_parts(
        dims,
        h[3],
        Vector3::new(h[4], h[5], h[6]),
        nearest,
        distance,
        &cloud.points,
        cloud.normals.as_deref(),
    )
    .map_err(|e| LoadError::invalid(path, e))
}

/// Read `type err param...` symmetry records.
pub fn load_symmetries(path: &Path) -> Result<Vec<ModelSymmetry>, LoadError> {
    let text = read_file(path)?;
    parse_symmetries(path, &text)
}

pub fn parse_symmetries(path: &Path, text: &str) -> Result<Vec<ModelSymmetry>, LoadError> {
    content_lines(text)
        .map(|(line, content)| {
            let v = parse_floats(path, line, content)?;
            if v.len() < 2 || v[0] < 0.0 || v[0].fract() != 0.0 {
                return Err(LoadError::parse(path, line, "expected 'type err param...'"));
            }
            ModelSymmetry::from_record(v[0] as u32, v[1], &v[2..])
                .map_err(|e| LoadError::parse(path, line, format!("{e:#}")))
        })
        .collect()
}

/// Read the 11x2 logistic recalibration matrix.
pub fn load_score_comp_models(path: &Path) -> Result<ScoreCompModels, LoadError> {
    let text = read_file(path)?;
    parse_score_comp_models(path, &text)
}

pub fn parse_score_comp_models(path: &Path, text: &str) -> Result<ScoreCompModels, LoadError> {
    let rows = content_lines(text)
        .map(|(line, content)| parse_floats(path, line, content))
        .collect::<Result<Vec<_>, _>>()?;
    ScoreCompModels::from_rows(&rows).map_err(|e| LoadError::invalid(path, e))
}
