//! Oriented local features: a point, its curvature frames and the
//! orientation uncertainty of those frames.

use nalgebra::{UnitQuaternion, Vector3, Vector4};

use super::PointCloud;
use crate::bingham::Bingham;
use crate::geometry::{quat_mul_wxyz, quat_to_wxyz};

const NORMAL_CONCENTRATION: f64 = -100.0;
const MAX_CURVATURE_CONCENTRATION: f64 = 100.0;

/// Oriented local feature at one point.
#[derive(Debug, Clone)]
pub struct Olf {
    pub position: Vector3<f64>,
    /// The two sign choices of the curvature frame; `None` without
    /// normals or curvature directions.
    pub frames: Option<[UnitQuaternion<f64>; 2]>,
    pub pc1: f64,
    pub pc2: f64,
}

impl Olf {
    /// Orientation distribution of the frame with the given sign choice.
    pub fn bingham(&self, flip: usize) -> Option<Bingham> {
        let frames = self.frames.as_ref()?;
        Some(olf_bingham(&frames[flip.min(1)], self.pc1, self.pc2))
    }
}

/// Bingham over the orientation of a curvature frame `q_f`.
///
/// The normal is tightly constrained; rotation about it is constrained in
/// proportion to the curvature anisotropy `pc1 / pc2`.
pub fn olf_bingham(q_f: &UnitQuaternion<f64>, pc1: f64, pc2: f64) -> Bingham {
    let m = quat_to_wxyz(q_f);
    let v = [
        quat_mul_wxyz(&m, &Vector4::new(0.0, 0.0, 1.0, 0.0)),
        quat_mul_wxyz(&m, &Vector4::new(0.0, 0.0, 0.0, 1.0)),
        quat_mul_wxyz(&m, &Vector4::new(0.0, 1.0, 0.0, 0.0)),
    ];
    let pc1 = pc1.max(1e-50);
    let pc2 = pc2.max(1e-50);
    let z3 = -(10.0 * (pc1 / pc2 - 1.0)).min(MAX_CURVATURE_CONCENTRATION);
    Bingham::new(
        v,
        Vector3::new(NORMAL_CONCENTRATION, NORMAL_CONCENTRATION, z3),
    )
}

impl PointCloud {
    /// Oriented local feature of point `i`.
    pub fn olf(&self, i: usize) -> Olf {
        Olf {
            position: self.points[i],
            frames: self.frames.as_ref().map(|f| f[i]),
            pc1: self.pc1.as_ref().map_or(1.0, |v| v[i]),
            pc2: self.pc2.as_ref().map_or(1.0, |v| v[i]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_olf_bingham_mode_is_frame() {
        let q = UnitQuaternion::from_euler_angles(0.2, 0.5, -1.0);
        let b = olf_bingham(&q, 3.0, 1.0);
        assert!(b.mode().dot(&quat_to_wxyz(&q)).abs() > 1.0 - 1e-9);
        // pc1/pc2 = 3 gives -20 about the normal
        assert!((b.z[2] + 20.0).abs() < 1e-9);
        assert!((b.z[0] + 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_isotropic_curvature_leaves_normal_rotation_free() {
        let q = UnitQuaternion::identity();
        let b = olf_bingham(&q, 1.0, 1.0);
        assert_eq!(b.z[2], 0.0);
        let about_normal = q * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 1.0);
        assert!((b.pdf_quat(&about_normal) - b.pdf_quat(&q)).abs() < 1e-9);
    }

    #[test]
    fn test_cloud_olf_without_frames() {
        let cloud = PointCloud::from_points(vec![Vector3::new(1.0, 2.0, 3.0)]);
        let olf = cloud.olf(0);
        assert!(olf.frames.is_none());
        assert!(olf.bingham(0).is_none());
    }
}
