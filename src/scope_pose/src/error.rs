//! Error types for parameter handling.
//!
//! Construction of derived data returns `anyhow::Result`; the strict
//! parameter schema gets its own error type so callers can tell a bad key
//! from a bad value.

use thiserror::Error;

/// Error raised while applying a `key value` parameter pair.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParamError {
    #[error("unknown parameter key '{0}'")]
    UnknownKey(String),

    #[error("invalid value '{value}' for parameter '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

impl ParamError {
    pub(crate) fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        ParamError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parse a numeric parameter value, mapping failures to [`ParamError`].
pub(crate) fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ParamError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ParamError::invalid(key, value, e.to_string()))
}

/// Parse a boolean parameter given as `0`/`1` or `true`/`false`.
pub(crate) fn parse_flag(key: &str, value: &str) -> Result<bool, ParamError> {
    match value.trim() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(ParamError::invalid(key, other, "expected 0/1 or true/false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        let v: f64 = parse_value("xyz_sigma", " 0.5 ").unwrap();
        assert_eq!(v, 0.5);
        let err = parse_value::<usize>("knn", "abc").unwrap_err();
        assert!(matches!(err, ParamError::InvalidValue { .. }));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("use_fpfh", "1").unwrap());
        assert!(!parse_flag("use_fpfh", "false").unwrap());
        assert!(parse_flag("use_fpfh", "2").is_err());
    }
}
