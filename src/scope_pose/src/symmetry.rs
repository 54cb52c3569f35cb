//! Detected model symmetries.

use anyhow::{bail, Result};
use nalgebra::{UnitQuaternion, Vector3, Vector4};
use serde::Serialize;

/// A symmetry element in the model frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Symmetry {
    /// Mirror plane `a x + b y + c z + d = 0`.
    Plane(Vector4<f64>),
    /// Rotational symmetry about a line.
    Line {
        point: Vector3<f64>,
        direction: Vector3<f64>,
    },
    /// Rotational symmetry about a point.
    Point { center: Vector3<f64> },
    DualPlane([Vector4<f64>; 2]),
    TriplePlane([Vector4<f64>; 3]),
}

/// A symmetry with its fit error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSymmetry {
    pub symmetry: Symmetry,
    pub err: f64,
}

impl ModelSymmetry {
    /// Decode a `type err param...` record.
    ///
    /// Types are 1 plane (4 params), 2 line (6), 3 point (3), 4 dual
    /// plane (8), 5 triple plane (12).
    pub fn from_record(kind: u32, err: f64, params: &[f64]) -> Result<Self> {
        let expected = match kind {
            1 => 4,
            2 => 6,
            3 => 3,
            4 => 8,
            5 => 12,
            other => bail!("unknown symmetry type {other}"),
        };
        if params.len() != expected {
            bail!(
                "symmetry type {kind} needs {expected} parameters, got {}",
                params.len()
            );
        }
        let plane = |k: usize| Vector4::new(params[k], params[k + 1], params[k + 2], params[k + 3]);
        let symmetry = match kind {
            1 => Symmetry::Plane(plane(0)),
            2 => {
                let direction = Vector3::new(params[3], params[4], params[5]);
                if direction.norm() < 1e-12 {
                    bail!("line symmetry has a zero direction");
                }
                Symmetry::Line {
                    point: Vector3::new(params[0], params[1], params[2]),
                    direction: direction.normalize(),
                }
            }
            3 => Symmetry::Point {
                center: Vector3::new(params[0], params[1], params[2]),
            },
            4 => Symmetry::DualPlane([plane(0), plane(4)]),
            _ => Symmetry::TriplePlane([plane(0), plane(4), plane(8)]),
        };
        Ok(Self { symmetry, err })
    }

    pub fn line(point: Vector3<f64>, direction: Vector3<f64>) -> Self {
        Self {
            symmetry: Symmetry::Line {
                point,
                direction: direction.normalize(),
            },
            err: 0.0,
        }
    }

    pub fn point(center: Vector3<f64>) -> Self {
        Self {
            symmetry: Symmetry::Point { center },
            err: 0.0,
        }
    }
}

/// First line symmetry in a list.
pub fn line_symmetry(symmetries: &[ModelSymmetry]) -> Option<(Vector3<f64>, Vector3<f64>)> {
    symmetries.iter().find_map(|s| match s.symmetry {
        Symmetry::Line { point, direction } => Some((point, direction)),
        _ => None,
    })
}

/// First point symmetry in a list.
pub fn point_symmetry(symmetries: &[ModelSymmetry]) -> Option<Vector3<f64>> {
    symmetries.iter().find_map(|s| match s.symmetry {
        Symmetry::Point { center } => Some(center),
        _ => None,
    })
}

/// Angle between the world directions of a model axis under two orientations.
///
/// Rotations about the axis itself do not change this distance.
pub fn axis_angle_between(
    axis: &Vector3<f64>,
    a: &UnitQuaternion<f64>,
    b: &UnitQuaternion<f64>,
) -> f64 {
    (a * axis).dot(&(b * axis)).clamp(-1.0, 1.0).acos()
}
