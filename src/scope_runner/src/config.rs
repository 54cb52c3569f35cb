//! `key value` parameter files.

use std::path::Path;

use scope_pose::{MopeParams, ParamError, ScopeParams};

use crate::error::{content_lines, read_file, LoadError};

/// Apply every `key value` line of `text` through `set`.
///
/// Blank lines and `#` comments are skipped. The value is the rest of the
/// line after the key. The first rejected pair aborts the load.
pub fn apply_params(
    path: &Path,
    text: &str,
    mut set: impl FnMut(&str, &str) -> Result<(), ParamError>,
) -> Result<usize, LoadError> {
    let mut count = 0;
    for (line, content) in content_lines(text) {
        let Some((key, value)) = content.split_once(char::is_whitespace) else {
            return Err(LoadError::parse(path, line, format!("missing value for '{content}'")));
        };
        set(key, value.trim()).map_err(|source| LoadError::Param {
            path: path.to_path_buf(),
            line,
            source,
        })?;
        count += 1;
    }
    Ok(count)
}

pub fn load_scope_params(path: &Path) -> Result<ScopeParams, LoadError> {
    let mut params = ScopeParams::default();
    let text = read_file(path)?;
    apply_params(path, &text, |k, v| params.set(k, v))?;
    Ok(params)
}

pub fn load_mope_params(path: &Path) -> Result<MopeParams, LoadError> {
    let mut params = MopeParams::default();
    let text = read_file(path)?;
    apply_params(path, &text, |k, v| params.set(k, v))?;
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> &'static Path {
        Path::new("params.txt")
    }

    #[test]
    fn test_scope_params_file() {
        let text = "\
# round budgets
num_samples_round1 40

seed 9
";
        let mut params = ScopeParams::default();
        let n = apply_params(path(), text, |k, v| params.set(k, v)).unwrap();
        assert_eq!(n, 2);
        assert_eq!(params.num_samples_round1, 40);
        assert_eq!(params.seed, 9);
    }

    #[test]
    fn test_unknown_key_is_fatal() {
        let text = "seed 1\nno_such_key 3\nseed 2\n";
        let mut params = ScopeParams::default();
        let err = apply_params(path(), text, |k, v| params.set(k, v)).unwrap_err();
        match err {
            LoadError::Param { line, source, .. } => {
                assert_eq!(line, 2);
                assert_eq!(source, ParamError::UnknownKey("no_such_key".into()));
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(params.seed, 1);
    }

    #[test]
    fn test_key_without_value() {
        let mut params = MopeParams::default();
        let err = apply_params(path(), "search\n", |k, v| params.set(k, v)).unwrap_err();
        assert!(matches!(err, LoadError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_mope_params_file() {
        let mut params = MopeParams::default();
        apply_params(path(), "search tabu\nmope2_unexplained_weight 2.5\n", |k, v| params.set(k, v)).unwrap();
        assert_eq!(params.search, scope_pose::MopeSearch::Tabu);
        assert_eq!(params.assignment[1].unexplained, 2.5);
    }
}
