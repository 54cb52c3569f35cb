//! Load errors for the runner's input files.

use std::path::{Path, PathBuf};

use scope_pose::ParamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: {msg}", path.display())]
    Parse { path: PathBuf, line: usize, msg: String },

    #[error("{}:{line}: {source}", path.display())]
    Param {
        path: PathBuf,
        line: usize,
        #[source]
        source: ParamError,
    },

    /// The file parsed but its contents were rejected.
    #[error("{}: {msg}", path.display())]
    Invalid { path: PathBuf, msg: String },
}

impl LoadError {
    pub(crate) fn parse(path: &Path, line: usize, msg: impl Into<String>) -> Self {
        LoadError::Parse {
            path: path.to_path_buf(),
            line,
            msg: msg.into(),
        }
    }

    pub(crate) fn invalid(path: &Path, err: anyhow::Error) -> Self {
        LoadError::Invalid {
            path: path.to_path_buf(),
            msg: format!("{err:#}"),
        }
    }
}

pub(crate) fn read_file(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Non-empty, non-comment lines with their 1-based line numbers.
pub(crate) fn content_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
}

/// Parse every whitespace-separated token of `line` as a float.
pub(crate) fn parse_floats(path: &Path, line: usize, text: &str) -> Result<Vec<f64>, LoadError> {
    text.split_whitespace()
        .map(|t| {
            t.parse::<f64>()
                .map_err(|e| LoadError::parse(path, line, format!("bad number '{t}': {e}")))
        })
        .collect()
}
