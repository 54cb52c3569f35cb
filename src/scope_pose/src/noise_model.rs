//! Per-point measurement noise as a function of surface geometry.
//!
//! Each channel's noise multiplier averages two fitted logistic curves, one
//! in the surface angle and one in the distance to the silhouette edge:
//!
//! ```text
//! sigmoid(x, b) = b0 + (b1 - b0) / (1 + exp(-b3 (x - b2)))
//! multiplier    = 0.5 sigmoid(surface_angle, b_S) + 0.5 sigmoid(edge_distance, b_E)
//! ```

use nalgebra::Vector3;
use serde::Serialize;

/// Edge distance assumed when the model carries no `ved` table.
pub const UNKNOWN_EDGE_DISTANCE: f64 = 1.0;

/// Generalized logistic curve.
#[inline]
pub fn sigmoid(x: f64, b: &[f64; 4]) -> f64 {
    b[0] + (b[1] - b[0]) / (1.0 + (-b[3] * (x - b[2])).exp())
}

/// Surface-angle and edge-distance curves for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelCurves {
    pub surface: [f64; 4],
    pub edge: [f64; 4],
}

impl ChannelCurves {
    #[inline]
    pub fn multiplier(&self, surface_angle: f64, edge_distance: f64) -> f64 {
        0.5 * sigmoid(surface_angle, &self.surface) + 0.5 * sigmoid(edge_distance, &self.edge)
    }
}

/// Fitted noise curves for every channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NoiseModel {
    pub range: ChannelCurves,
    pub normal: ChannelCurves,
    pub l: ChannelCurves,
    pub a: ChannelCurves,
    pub b: ChannelCurves,
}

impl Default for NoiseModel {
    fn default() -> Self {
        let color = ChannelCurves {
            surface: [1.0, 2.0, 1.5, 6.0],
            edge: [2.0, 1.0, 0.01, 500.0],
        };
        Self {
            range: ChannelCurves {
                surface: [1.0, 3.0, 1.5, 8.0],
                edge: [3.0, 1.0, 0.01, 500.0],
            },
            normal: ChannelCurves {
                surface: [1.0, 2.5, 1.4, 6.0],
                edge: [2.5, 1.0, 0.01, 500.0],
            },
            l: color,
            a: color,
            b: color,
        }
    }
}

/// Noise multipliers of one point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PointNoise {
    pub range: f64,
    pub normal: f64,
    pub lab: Vector3<f64>,
}

impl NoiseModel {
    /// Multipliers for a point seen at `surface_angle` and `edge_distance`.
    pub fn point_noise(&self, surface_angle: f64, edge_distance: f64) -> PointNoise {
        PointNoise {
            range: self.range.multiplier(surface_angle, edge_distance),
            normal: self.normal.multiplier(surface_angle, edge_distance),
            lab: Vector3::new(
                self.l.multiplier(surface_angle, edge_distance),
                self.a.multiplier(surface_angle, edge_distance),
                self.b.multiplier(surface_angle, edge_distance),
            ),
        }
    }
}

/// `1 + dot(unit(p), n)` for a camera-frame point and normal: 0 when the
/// surface faces the camera, near 2 at grazing/back-facing angles.
#[inline]
pub fn surface_angle(p_cam: &Vector3<f64>, n_cam: &Vector3<f64>) -> f64 {
    let norm = p_cam.norm();
    if norm < 1e-12 {
        return 1.0;
    }
    1.0 + p_cam.dot(n_cam) / norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_facing_point_far_from_edge_has_unit_noise() {
        let model = NoiseModel::default();
        let angle = surface_angle(&Vector3::new(0.0, 0.0, 1.0), &Vector3::new(0.0, 0.0, -1.0));
        assert_relative_eq!(angle, 0.0);
        let noise = model.point_noise(angle, 0.1);
        assert_relative_eq!(noise.range, 1.0, epsilon = 1e-4);
        assert_relative_eq!(noise.normal, 1.0, epsilon = 1e-3);
        assert_relative_eq!(noise.lab.x, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_grazing_edge_point_is_noisy() {
        let model = NoiseModel::default();
        let noise = model.point_noise(2.0, 0.0);
        assert!(noise.range > 2.9);
        assert!(noise.normal > 2.4);
    }

    #[test]
    fn test_sigmoid_endpoints() {
        let b = [1.0, 3.0, 1.5, 8.0];
        assert_relative_eq!(sigmoid(1.5, &b), 2.0);
        assert!(sigmoid(-10.0, &b) < 1.0 + 1e-9);
        assert!(sigmoid(10.0, &b) > 3.0 - 1e-9);
    }
}
