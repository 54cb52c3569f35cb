//! ASCII PCD reader.
//!
//! Only the `FIELDS`/`COLUMNS`, `POINTS` and `DATA` header lines are
//! interpreted; other header lines (`VERSION`, `SIZE`, `TYPE`, ...) are
//! skipped. Channel names are mapped to typed arrays by
//! [`PointCloud::from_channels`].

use std::path::Path;

use scope_pose::PointCloud;
use tracing::debug;

use crate::error::{parse_floats, read_file, LoadError};

pub fn load_pcd(path: &Path) -> Result<PointCloud, LoadError> {
    let text = read_file(path)?;
    let cloud = parse_pcd(path, &text)?;
    debug!("loaded {} points from {}", cloud.len(), path.display());
    Ok(cloud)
}

/// Parse PCD text. `path` is only used in error messages.
pub fn parse_pcd(path: &Path, text: &str) -> Result<PointCloud, LoadError> {
    let mut names: Option<Vec<String>> = None;
    let mut num_points: Option<usize> = None;
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l));

    let mut data_found = false;
    for (n, line) in lines.by_ref() {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            continue;
        };
        match head {
            "FIELDS" | "COLUMNS" => names = Some(words.map(str::to_string).collect()),
            "POINTS" => {
                let value = words.next().unwrap_or_default();
                num_points = Some(
                    value
                        .parse()
                        .map_err(|_| LoadError::parse(path, n, format!("bad POINTS value '{value}'")))?,
                );
            }
            "DATA" => {
                let format = words.next().unwrap_or_default();
                if format != "ascii" {
                    return Err(LoadError::parse(
                        path,
                        n,
                        format!("only ascii pcd files are supported, got '{format}'"),
                    ));
                }
                data_found = true;
                break;
            }
            _ => {}
        }
    }

    let Some(names) = names else {
        return Err(LoadError::parse(path, 0, "missing FIELDS/COLUMNS header"));
    };
    if !data_found {
        return Err(LoadError::parse(path, 0, "missing DATA header"));
    }

    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut last_line = 0;
    for (n, line) in lines {
        if num_points.is_some_and(|np| rows.len() >= np) {
            break;
        }
        last_line = n;
        if line.trim().is_empty() {
            continue;
        }
        let row = parse_floats(path, n, line)?;
        if row.len() != names.len() {
            return Err(LoadError::parse(
                path,
                n,
                format!("corrupt pcd data: {} values, expected {}", row.len(), names.len()),
            ));
        }
        rows.push(row);
    }
    if let Some(np) = num_points {
        if rows.len() < np {
            return Err(LoadError::parse(
                path,
                last_line,
                format!("corrupt pcd data: {} of {np} points", rows.len()),
            ));
        }
    }

    PointCloud::from_channels(&names, &rows).map_err(|e| LoadError::invalid(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use scope_pose::FeatureType;

    fn path() -> &'static Path {
        Path::new("test.pcd")
    }

    #[test]
    fn test_parse_ascii_pcd() {
        let text = "\
# .PCD v.7
VERSION .7
FIELDS x y z nx ny nz cluster extra
SIZE 4 4 4 4 4 4 4 4
POINTS 2
DATA ascii
0.1 0.2 0.3 0 0 1 3 7.5
1 2 3 1 0 0 4 8.5
";
        let cloud = parse_pcd(path(), text).unwrap();
        assert_eq!(cloud.len(), 2);
        assert_relative_eq!(cloud.points[1].y, 2.0);
        assert_eq!(cloud.normals.as_ref().unwrap()[0].z, 1.0);
        assert_eq!(cloud.cluster.as_deref(), Some(&[3i64, 4][..]));
        assert_eq!(cloud.raw["extra"], vec![7.5, 8.5]);
    }

    #[test]
    fn test_parse_feature_block() {
        let fields: Vec<String> = ["x", "y", "z"]
            .iter()
            .map(|s| s.to_string())
            .chain((1..=33).map(|i| format!("f{i}")))
            .collect();
        let row: Vec<String> = (0..36).map(|i| i.to_string()).collect();
        let text = format!("COLUMNS {}\nPOINTS 1\nDATA ascii\n{}\n", fields.join(" "), row.join(" "));
        let cloud = parse_pcd(path(), &text).unwrap();
        let fpfh = cloud.descriptors(FeatureType::Fpfh).unwrap();
        assert_eq!(fpfh[0].len(), 33);
        assert_eq!(fpfh[0][0], 3.0);
        assert!(cloud.descriptors(FeatureType::Shot).is_none());
    }

    #[test]
    fn test_rejects_corrupt_files() {
        let binary = "FIELDS x y z\nPOINTS 1\nDATA binary\n";
        assert!(matches!(parse_pcd(path(), binary), Err(LoadError::Parse { line: 3, .. })));

        let short = "FIELDS x y z\nPOINTS 2\nDATA ascii\n1 2 3\n";
        assert!(parse_pcd(path(), short).is_err());

        let narrow = "FIELDS x y z\nPOINTS 1\nDATA ascii\n1 2\n";
        assert!(matches!(parse_pcd(path(), narrow), Err(LoadError::Parse { line: 4, .. })));

        let no_xyz = "FIELDS a b\nPOINTS 1\nDATA ascii\n1 2\n";
        assert!(matches!(parse_pcd(path(), no_xyz), Err(LoadError::Invalid { .. })));
    }

    #[test]
    fn test_oversized_point_count_is_a_parse_error() {
        let text = "FIELDS x y z\nPOINTS 1000000000000000\nDATA ascii\n1 2 3\n";
        assert!(matches!(parse_pcd(path(), text), Err(LoadError::Parse { line: 4, .. })));
    }
}
