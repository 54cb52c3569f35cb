//! Rigid poses and quaternion helpers.
//!
//! Quaternions handed to the Bingham code are plain `Vector4` values in
//! `(w, x, y, z)` order. Poses use nalgebra's `UnitQuaternion`, which keeps
//! `|q| = 1` after every constructor.

use nalgebra::{Matrix3, Matrix3x4, Quaternion, Rotation3, UnitQuaternion, Vector3, Vector4};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Rigid transform mapping model coordinates to world coordinates:
/// `p_world = R(q) * p_model + x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Translation
    pub x: Vector3<f64>,
    /// Orientation
    pub q: UnitQuaternion<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    pub fn new(x: Vector3<f64>, q: UnitQuaternion<f64>) -> Self {
        Self { x, q }
    }

    pub fn identity() -> Self {
        Self {
            x: Vector3::zeros(),
            q: UnitQuaternion::identity(),
        }
    }

    /// Build a pose from a translation and a `(w, x, y, z)` quaternion.
    /// The quaternion is re-normalized.
    pub fn from_wxyz(x: Vector3<f64>, q: [f64; 4]) -> Self {
        Self {
            x,
            q: UnitQuaternion::new_normalize(Quaternion::new(q[0], q[1], q[2], q[3])),
        }
    }

    /// Transform a model point into the world frame.
    #[inline]
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.q * p + self.x
    }

    /// Rotate a model direction (normal, curvature) into the world frame.
    #[inline]
    pub fn rotate(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.q * v
    }

    /// Map a world point back into the model frame.
    #[inline]
    pub fn inverse_transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.q.inverse_transform_vector(&(p - self.x))
    }

    /// Map a world direction back into the model frame.
    #[inline]
    pub fn inverse_rotate(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.q.inverse_transform_vector(v)
    }

    /// Translation distance and sign-invariant orientation distance
    /// (`acos(|q1·q2|)`) between two poses.
    pub fn distance_to(&self, other: &Pose) -> (f64, f64) {
        (
            (self.x - other.x).norm(),
            quaternion_distance(&self.q, &other.q),
        )
    }

    /// Pose whose orientation is rotated by `delta` (in the model frame)
    /// about the model-frame point `anchor`, keeping the anchor fixed in
    /// the world.
    pub fn rotated_about(&self, delta: &UnitQuaternion<f64>, anchor: &Vector3<f64>) -> Pose {
        let q = self.q * delta;
        let anchor_world = self.transform_point(anchor);
        Pose {
            x: anchor_world - q * anchor,
            q,
        }
    }

    /// Camera-to-world pose at `eye` whose +z axis points at `target`.
    pub fn looking_at(eye: &Vector3<f64>, target: &Vector3<f64>) -> Pose {
        let forward = target - eye;
        if forward.norm() < 1e-12 {
            return Pose::new(*eye, UnitQuaternion::identity());
        }
        let forward = forward.normalize();
        let helper = if forward.y.abs() < 0.9 {
            Vector3::y()
        } else {
            Vector3::x()
        };
        let right = helper.cross(&forward).normalize();
        let up = forward.cross(&right);
        Pose::new(*eye, frame_quaternion(&right, &up, &forward))
    }
}

/// Quaternion as a `(w, x, y, z)` vector.
#[inline]
pub fn quat_to_wxyz(q: &UnitQuaternion<f64>) -> Vector4<f64> {
    Vector4::new(q.w, q.i, q.j, q.k)
}

/// Unit quaternion from a `(w, x, y, z)` vector. Zero vectors map to the identity.
#[inline]
pub fn wxyz_to_quat(v: &Vector4<f64>) -> UnitQuaternion<f64> {
    if v.norm_squared() < 1e-300 {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::new_normalize(Quaternion::new(v[0], v[1], v[2], v[3]))
}

/// Hamilton product of two `(w, x, y, z)` quaternions.
#[inline]
pub fn quat_mul_wxyz(a: &Vector4<f64>, b: &Vector4<f64>) -> Vector4<f64> {
    let qa = Quaternion::new(a[0], a[1], a[2], a[3]);
    let qb = Quaternion::new(b[0], b[1], b[2], b[3]);
    let p = qa * qb;
    Vector4::new(p.w, p.i, p.j, p.k)
}

/// Conjugate of a `(w, x, y, z)` quaternion.
#[inline]
pub fn quat_conj_wxyz(a: &Vector4<f64>) -> Vector4<f64> {
    Vector4::new(a[0], -a[1], -a[2], -a[3])
}

/// Flip the sign of a `(w, x, y, z)` quaternion so the first non-zero
/// component is positive.
pub fn canonicalize_wxyz(v: &Vector4<f64>) -> Vector4<f64> {
    for i in 0..4 {
        if v[i].abs() > 1e-12 {
            return if v[i] < 0.0 { -v } else { *v };
        }
    }
    *v
}

/// Sign-invariant distance between two orientations: `acos(|q1·q2|)`.
///
/// This is half the relative rotation angle; `q` and `-q` are at distance 0.
#[inline]
pub fn quaternion_distance(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>) -> f64 {
    a.coords.dot(&b.coords).abs().min(1.0).acos()
}

/// Rotation quaternion whose matrix has the given columns.
///
/// The columns are re-orthonormalized, so slightly non-orthogonal
/// normal/curvature pairs still give a proper rotation.
pub fn frame_quaternion(
    c0: &Vector3<f64>,
    c1: &Vector3<f64>,
    c2: &Vector3<f64>,
) -> UnitQuaternion<f64> {
    let m = Matrix3::from_columns(&[*c0, *c1, *c2]);
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix(&m))
}

/// Random unit vector orthogonal to `v`.
pub fn orthogonal_vector<R: Rng + ?Sized>(v: &Vector3<f64>, rng: &mut R) -> Vector3<f64> {
    let v = v.normalize();
    for _ in 0..16 {
        let w = Vector3::new(
            rng.sample::<f64, _>(StandardNormal),
            rng.sample::<f64, _>(StandardNormal),
            rng.sample::<f64, _>(StandardNormal),
        );
        let w = w - v * v.dot(&w);
        if w.norm() > 1e-9 {
            return w.normalize();
        }
    }
    // Fall back to a deterministic perpendicular
    let axis = if v.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    v.cross(&axis).normalize()
}

/// A rotation taking the x-axis onto the direction of `v`, with a random
/// completion of the frame. A zero vector gives the identity.
pub fn vector_to_possible_quaternion<R: Rng + ?Sized>(
    v: &Vector3<f64>,
    rng: &mut R,
) -> UnitQuaternion<f64> {
    if v.iter().all(|c| *c == 0.0) {
        return UnitQuaternion::identity();
    }
    let r0 = v.normalize();
    let r1 = orthogonal_vector(&r0, rng);
    let r2 = r0.cross(&r1);
    frame_quaternion(&r0, &r1, &r2)
}

/// Jacobian of `R(q) p` with respect to the raw quaternion components
/// `(w, x, y, z)`, evaluated at a unit quaternion.
pub fn rotation_jacobian(q: &UnitQuaternion<f64>, p: &Vector3<f64>) -> Matrix3x4<f64> {
    let (w, x, y, z) = (q.w, q.i, q.j, q.k);
    let dw = Matrix3::new(w, -z, y, z, w, -x, -y, x, w);
    let dx = Matrix3::new(x, y, z, y, -x, -w, z, w, -x);
    let dy = Matrix3::new(-y, x, w, x, y, z, -w, z, -y);
    let dz = Matrix3::new(-z, -w, x, w, -z, y, x, y, z);
    let mut jac = Matrix3x4::zeros();
    jac.set_column(0, &(2.0 * dw * p));
    jac.set_column(1, &(2.0 * dx * p));
    jac.set_column(2, &(2.0 * dy * p));
    jac.set_column(3, &(2.0 * dz * p));
    jac
}

/// Roughly uniform directions on the unit sphere (Fibonacci lattice).
pub fn fibonacci_sphere(n: usize) -> Vec<Vector3<f64>> {
    let golden = std::f64::consts::PI * (3.0 - 5f64.sqrt());
    (0..n)
        .map(|i| {
            let y = if n > 1 {
                1.0 - 2.0 * (i as f64) / ((n - 1) as f64)
            } else {
                0.0
            };
            let r = (1.0 - y * y).max(0.0).sqrt();
            let theta = golden * i as f64;
            Vector3::new(r * theta.cos(), y, r * theta.sin())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_pose_roundtrip() {
        let pose = Pose::from_wxyz(Vector3::new(1.0, -2.0, 0.5), [0.9, 0.1, -0.3, 0.2]);
        let p = Vector3::new(0.3, 0.4, -0.7);
        let back = pose.inverse_transform_point(&pose.transform_point(&p));
        assert_relative_eq!(back, p, epsilon = 1e-12);
        assert_relative_eq!(pose.q.coords.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_quaternion_distance_sign_invariant() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let v = Vector4::new(
                rng.gen::<f64>() - 0.5,
                rng.gen::<f64>() - 0.5,
                rng.gen::<f64>() - 0.5,
                rng.gen::<f64>() - 0.5,
            );
            let q = wxyz_to_quat(&v);
            let neg = UnitQuaternion::new_unchecked(-q.into_inner());
            assert!(quaternion_distance(&q, &q) < 1e-6);
            assert!(quaternion_distance(&q, &neg) < 1e-6);
        }
    }

    #[test]
    fn test_vector_to_possible_quaternion() {
        let mut rng = StdRng::seed_from_u64(3);
        let v = Vector3::new(0.0, 2.0, 1.0);
        let q = vector_to_possible_quaternion(&v, &mut rng);
        assert_relative_eq!(q * Vector3::x(), v.normalize(), epsilon = 1e-9);

        let q0 = vector_to_possible_quaternion(&Vector3::zeros(), &mut rng);
        assert_eq!(q0, UnitQuaternion::identity());
    }

    #[test]
    fn test_frame_quaternion_columns() {
        let n = Vector3::new(0.0, 0.0, 1.0);
        let pc = Vector3::new(1.0, 0.0, 0.0);
        let q = frame_quaternion(&n, &pc, &n.cross(&pc));
        assert_relative_eq!(q * Vector3::x(), n, epsilon = 1e-12);
        assert_relative_eq!(q * Vector3::y(), pc, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_jacobian_matches_finite_difference() {
        let q = wxyz_to_quat(&Vector4::new(0.8, 0.2, -0.4, 0.3));
        let p = Vector3::new(0.5, -1.0, 2.0);
        let jac = rotation_jacobian(&q, &p);

        // Homogeneous rotation formula, valid for unnormalized quaternions up to scale |q|^2
        let rot = |v: Vector4<f64>| -> Vector3<f64> {
            let (w, x, y, z) = (v[0], v[1], v[2], v[3]);
            let m = Matrix3::new(
                w * w + x * x - y * y - z * z,
                2.0 * (x * y - w * z),
                2.0 * (x * z + w * y),
                2.0 * (x * y + w * z),
                w * w - x * x + y * y - z * z,
                2.0 * (y * z - w * x),
                2.0 * (x * z - w * y),
                2.0 * (y * z + w * x),
                w * w - x * x - y * y + z * z,
            );
            m * p
        };
        let base = quat_to_wxyz(&q);
        let h = 1e-6;
        for k in 0..4 {
            let mut plus = base;
            let mut minus = base;
            plus[k] += h;
            minus[k] -= h;
            let fd = (rot(plus) - rot(minus)) / (2.0 * h);
            assert_relative_eq!(jac.column(k).into_owned(), fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_rotated_about_keeps_anchor() {
        let pose = Pose::from_wxyz(Vector3::new(0.2, 0.0, 1.0), [1.0, 0.0, 0.0, 0.0]);
        let anchor = Vector3::new(0.0, 0.1, 0.0);
        let delta = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.7);
        let moved = pose.rotated_about(&delta, &anchor);
        assert_relative_eq!(
            moved.transform_point(&anchor),
            pose.transform_point(&anchor),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_fibonacci_sphere_unit() {
        for v in fibonacci_sphere(66) {
            assert_relative_eq!(v.norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_looking_at_points_z_at_target() {
        let eye = Vector3::new(0.5, -0.2, 1.0);
        let target = Vector3::new(0.0, 0.1, 0.0);
        let cam = Pose::looking_at(&eye, &target);
        let forward = cam.rotate(&Vector3::z());
        assert_relative_eq!(forward, (target - eye).normalize(), epsilon = 1e-9);
        let t_cam = cam.inverse_transform_point(&target);
        assert_relative_eq!(t_cam.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(t_cam.y, 0.0, epsilon = 1e-9);
        assert!(t_cam.z > 0.0);
    }
}
