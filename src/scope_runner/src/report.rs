//! JSON reports written by the runner.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use scope_pose::{GoodPoseCounts, MopeSample, Pose, RunTiming, SampleSet, ScoreComponents};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct PoseReport {
    pub pose: Pose,
    pub weight: f64,
    pub c_score: f64,
    pub num_segments: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<ScoreComponents>,
}

#[derive(Debug, Serialize)]
pub struct ScopeReport {
    pub model: String,
    pub seed: u64,
    pub samples: Vec<PoseReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub good_poses: Option<GoodPoseCounts>,
    pub timing: RunTiming,
}

impl ScopeReport {
    pub fn new(model: &str, seed: u64, samples: &SampleSet, top: usize, timing: RunTiming) -> Self {
        let samples = samples
            .iter()
            .take(top)
            .map(|(s, weight)| PoseReport {
                pose: s.pose,
                weight,
                c_score: s.c_score,
                num_segments: s.segments.len(),
                scores: s.scores,
            })
            .collect();
        Self {
            model: model.to_string(),
            seed,
            samples,
            good_poses: None,
            timing,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MopeReport {
    pub models: Vec<String>,
    pub seed: u64,
    pub samples: Vec<MopeSample>,
    pub timing: RunTiming,
}

/// Pretty JSON to `output`, or stdout when no path is given.
pub fn write_json<T: Serialize>(report: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?
        }
        None => {
            let mut out = std::io::stdout().lock();
            writeln!(out, "{json}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scope_pose::Sample;

    #[test]
    fn test_scope_report_keeps_top_samples() {
        let mut set = SampleSet::new();
        set.push(Sample::new(Pose::identity()), 2.0);
        set.push(Sample::new(Pose::identity()), 1.0);
        let report = ScopeReport::new("box", 7, &set, 1, RunTiming::default());
        assert_eq!(report.samples.len(), 1);

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["model"], "box");
        assert_eq!(value["samples"][0]["weight"], 2.0);
        assert!(value.get("good_poses").is_none());
        assert!(value["samples"][0].get("scores").is_none());
    }

    #[test]
    fn test_write_json_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let report = MopeReport {
            models: vec!["a".into()],
            seed: 1,
            samples: Vec::new(),
            timing: RunTiming::default(),
        };
        write_json(&report, Some(&path)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["models"][0], "a");
    }
}
