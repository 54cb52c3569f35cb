//! Command-line runner for SCOPE/MOPE pose estimation.
//!
//! Loads models from a manifest and an observed scene from PCD files,
//! runs SCOPE for one model or MOPE over all of them and writes the ranked
//! results as JSON.

mod config;
mod error;
mod manifest;
mod pcd;
mod report;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use nalgebra::{Vector3, Vector4};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use scope_pose::symmetry::line_symmetry;
use scope_pose::{
    good_pose_counts, mope, scope, FeatureType, ModelData, MopeParams, ObservationData, ObservationInput, Pose,
    ScopeParams,
};
use tracing::{info, warn};

use crate::config::{load_mope_params, load_scope_params};
use crate::manifest::{load_manifest, load_model, ModelEntry};
use crate::pcd::load_pcd;
use crate::report::{write_json, MopeReport, ScopeReport};

#[derive(Debug, Parser)]
#[command(author, version, about = "SCOPE/MOPE object pose estimation")]
struct Cli {
    /// Random seed; overrides the `seed` parameter.
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Write the JSON report here instead of stdout.
    #[arg(long, short, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Estimate the pose of one model.
    Scope {
        #[command(flatten)]
        scene: SceneArgs,

        /// Model to search for; the first manifest entry when omitted.
        #[arg(long)]
        model: Option<String>,

        /// Ground-truth pose `x y z qw qx qy qz` for good-pose counts.
        #[arg(long, num_args = 7, allow_negative_numbers = true)]
        true_pose: Option<Vec<f64>>,

        /// Number of ranked samples to report.
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Find which models are in the scene and where.
    Mope {
        #[command(flatten)]
        scene: SceneArgs,

        /// MOPE parameter file.
        #[arg(long)]
        mope_params: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct SceneArgs {
    /// Model manifest.
    #[arg(long)]
    models: PathBuf,

    /// Full observed point cloud.
    #[arg(long)]
    cloud: PathBuf,

    /// Foreground points to explain.
    #[arg(long)]
    foreground: Option<PathBuf>,

    #[arg(long)]
    fpfh: Option<PathBuf>,

    #[arg(long)]
    shot: Option<PathBuf>,

    #[arg(long)]
    sift: Option<PathBuf>,

    /// Sensor pose `x y z qw qx qy qz`; identity when omitted.
    #[arg(long, num_args = 7, allow_negative_numbers = true)]
    viewpoint: Option<Vec<f64>>,

    /// Supporting plane `a b c d`.
    #[arg(long, num_args = 4, allow_negative_numbers = true)]
    table_plane: Option<Vec<f64>>,

    /// SCOPE parameter file.
    #[arg(long)]
    params: Option<PathBuf>,
}

fn pose_arg(values: &[f64]) -> Pose {
    Pose::from_wxyz(
        Vector3::new(values[0], values[1], values[2]),
        [values[3], values[4], values[5], values[6]],
    )
}

fn load_observation(scene: &SceneArgs) -> Result<ObservationInput> {
    let mut feature_clouds = BTreeMap::new();
    for (ft, path) in [
        (FeatureType::Fpfh, &scene.fpfh),
        (FeatureType::Shot, &scene.shot),
        (FeatureType::Sift, &scene.sift),
    ] {
        if let Some(path) = path {
            feature_clouds.insert(ft, load_pcd(path)?);
        }
    }
    Ok(ObservationInput {
        cloud: load_pcd(&scene.cloud)?,
        foreground: scene.foreground.as_deref().map(load_pcd).transpose()?,
        feature_clouds,
        viewpoint: scene.viewpoint.as_deref().map(pose_arg).unwrap_or_default(),
        table_plane: scene
            .table_plane
            .as_deref()
            .map(|p| Vector4::new(p[0], p[1], p[2], p[3])),
    })
}

fn scope_params(scene: &SceneArgs, seed: Option<u64>) -> Result<ScopeParams> {
    let mut params = match &scene.params {
        Some(path) => load_scope_params(path)?,
        None => ScopeParams::default(),
    };
    if let Some(seed) = seed {
        params.seed = seed;
    }
    Ok(params)
}

fn build_model(entry: &ModelEntry, params: &ScopeParams) -> Result<ModelData> {
    let input = load_model(entry)?;
    ModelData::new(input, params).with_context(|| format!("failed to prepare model '{}'", entry.name))
}

fn run_scope(
    scene: &SceneArgs,
    model_name: Option<&str>,
    true_pose: Option<&[f64]>,
    top: usize,
    seed: Option<u64>,
    output: Option<&Path>,
) -> Result<()> {
    let params = scope_params(scene, seed)?;
    let entries = load_manifest(&scene.models)?;
    let entry = match model_name {
        Some(name) => entries.iter().find(|e| e.name == name),
        None => entries.first(),
    };
    let Some(entry) = entry else {
        bail!("model {:?} not found in {}", model_name, scene.models.display());
    };

    let model = build_model(entry, &params)?;
    let obs = ObservationData::new(load_observation(scene)?, &params).context("failed to prepare observation")?;

    let mut rng = StdRng::seed_from_u64(params.seed);
    let result = scope(&model, &obs, &params, &[], &mut rng);
    match result.samples.best() {
        Some((best, weight)) => info!(
            "best pose x = [{:.4}, {:.4}, {:.4}], weight {:.4}",
            best.pose.x.x, best.pose.x.y, best.pose.x.z, weight
        ),
        None => warn!("SCOPE found no pose for '{}'", model.name),
    }

    let mut report = ScopeReport::new(&model.name, params.seed, &result.samples, top, result.timing);
    if let Some(truth) = true_pose {
        let counts = good_pose_counts(&result.samples, &pose_arg(truth), line_symmetry(&model.symmetries).as_ref());
        info!("{} good and {} great poses", counts.good, counts.great);
        report.good_poses = Some(counts);
    }
    write_json(&report, output)
}

fn run_mope(scene: &SceneArgs, mope_params: Option<&Path>, seed: Option<u64>, output: Option<&Path>) -> Result<()> {
    let scope_params = scope_params(scene, seed)?;
    let params = match mope_params {
        Some(path) => load_mope_params(path)?,
        None => MopeParams::default(),
    };
    let entries = load_manifest(&scene.models)?;
    if entries.is_empty() {
        bail!("no models in {}", scene.models.display());
    }
    let models = entries
        .par_iter()
        .map(|e| build_model(e, &scope_params))
        .collect::<Result<Vec<_>>>()?;
    let obs =
        ObservationData::new(load_observation(scene)?, &scope_params).context("failed to prepare observation")?;

    let mut rng = StdRng::seed_from_u64(scope_params.seed);
    let result = mope(&models, &obs, &scope_params, &params, &mut rng);
    if let Some(best) = result.samples.first() {
        info!("best explanation has {} objects, score {:.4}", best.objects.len(), best.score);
    }

    let report = MopeReport {
        models: models.iter().map(|m| m.name.clone()).collect(),
        seed: scope_params.seed,
        samples: result.samples,
        timing: result.timing,
    };
    write_json(&report, output)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scope_runner=info,scope_pose=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output = cli.output.as_deref();
    match &cli.command {
        Command::Scope {
            scene,
            model,
            true_pose,
            top,
        } => run_scope(scene, model.as_deref(), true_pose.as_deref(), *top, cli.seed, output),
        Command::Mope { scene, mope_params } => run_mope(scene, mope_params.as_deref(), cli.seed, output),
    }
}
