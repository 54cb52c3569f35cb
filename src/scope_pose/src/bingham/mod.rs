//! Bingham distributions on the unit quaternion sphere S³.
//!
//! A Bingham distribution is the antipodally symmetric "Gaussian" of
//! orientations:
//!
//! ```text
//! p(x) = exp(Σᵢ zᵢ (vᵢ·x)²) / F(z)
//! ```
//!
//! with three orthonormal directions `vᵢ`, concentrations `zᵢ ≤ 0` and the
//! normalizer `F`. The mode is the unit quaternion orthogonal to all `vᵢ`.
//!
//! Quaternions are `(w, x, y, z)` vectors; see [`crate::geometry`].
//!
//! # Operations
//!
//! - [`Bingham::multiply`]: product of densities (closed under Bingham)
//! - [`Bingham::left_multiply`] / [`Bingham::right_multiply`]: law of `a·X` / `X·a`
//! - [`Bingham::invert`]: law of `X⁻¹`
//! - [`Bingham::sample`]: rejection sampling from an angular central Gaussian
//! - [`Bingham::fit_weighted`]: moment matching from weighted samples

mod fitting;
mod normalizer;
mod sampling;

pub use normalizer::{log_normalizer, normalizer_gradient};

use nalgebra::{Matrix4, SymmetricEigen, UnitQuaternion, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use crate::geometry::{canonicalize_wxyz, quat_conj_wxyz, quat_mul_wxyz, quat_to_wxyz, wxyz_to_quat};

/// Concentrations closer to zero than this are treated as uniform.
const UNIFORM_EPS: f64 = 1e-12;

/// Bingham distribution over unit quaternions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bingham {
    /// Orthonormal concentration directions, ordered like `z`.
    pub v: [Vector4<f64>; 3],
    /// Concentrations, sorted ascending (most concentrated first), all ≤ 0.
    pub z: Vector3<f64>,
    /// Normalizing constant.
    pub f: f64,
}

impl Default for Bingham {
    fn default() -> Self {
        Self::uniform()
    }
}

impl Bingham {
    /// The uniform distribution on S³.
    pub fn uniform() -> Self {
        Self {
            v: [
                Vector4::new(0.0, 1.0, 0.0, 0.0),
                Vector4::new(0.0, 0.0, 1.0, 0.0),
                Vector4::new(0.0, 0.0, 0.0, 1.0),
            ],
            z: Vector3::zeros(),
            f: 2.0 * std::f64::consts::PI * std::f64::consts::PI,
        }
    }

    /// Build a distribution from directions and concentrations.
    ///
    /// Positive concentrations are clamped to 0; entries are sorted so that
    /// `z[0] ≤ z[1] ≤ z[2]` and the normalizer is computed.
    pub fn new(v: [Vector4<f64>; 3], z: Vector3<f64>) -> Self {
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| z[a].partial_cmp(&z[b]).unwrap_or(std::cmp::Ordering::Equal));
        let v = [v[order[0]], v[order[1]], v[order[2]]];
        let z = Vector3::new(z[order[0]].min(0.0), z[order[1]].min(0.0), z[order[2]].min(0.0));
        let f = log_normalizer(&z).exp();
        Self { v, z, f }
    }

    /// Whether every concentration is (numerically) zero.
    pub fn is_uniform(&self) -> bool {
        self.z.iter().all(|z| z.abs() < UNIFORM_EPS)
    }

    /// Unnormalized log density `Σᵢ zᵢ (vᵢ·x)²`.
    #[inline]
    pub fn log_density_unnormalized(&self, x: &Vector4<f64>) -> f64 {
        (0..3).map(|i| self.z[i] * self.v[i].dot(x).powi(2)).sum()
    }

    /// Log density.
    pub fn log_pdf(&self, x: &Vector4<f64>) -> f64 {
        self.log_density_unnormalized(x) - self.f.ln()
    }

    /// Density.
    pub fn pdf(&self, x: &Vector4<f64>) -> f64 {
        self.log_pdf(x).exp()
    }

    /// Density of a rotation.
    pub fn pdf_quat(&self, q: &UnitQuaternion<f64>) -> f64 {
        self.pdf(&quat_to_wxyz(q))
    }

    /// Mode as a `(w, x, y, z)` vector with a canonical sign.
    pub fn mode(&self) -> Vector4<f64> {
        let mut m = Matrix4::identity();
        for v in &self.v {
            m -= v * v.transpose();
        }
        let eig = SymmetricEigen::new(m);
        let (imax, _) = eig
            .eigenvalues
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |acc, (i, &l)| if l > acc.1 { (i, l) } else { acc });
        canonicalize_wxyz(&eig.eigenvectors.column(imax).normalize())
    }

    /// Mode as a rotation.
    pub fn mode_quat(&self) -> UnitQuaternion<f64> {
        wxyz_to_quat(&self.mode())
    }

    /// The symmetric matrix `Σᵢ zᵢ vᵢ vᵢᵀ` of the exponent.
    pub fn exponent_matrix(&self) -> Matrix4<f64> {
        let mut c = Matrix4::zeros();
        for i in 0..3 {
            c += self.z[i] * self.v[i] * self.v[i].transpose();
        }
        c
    }

    /// Product of densities, renormalized.
    ///
    /// An empty product is the uniform distribution.
    pub fn multiply<'a, I>(factors: I) -> Self
    where
        I: IntoIterator<Item = &'a Bingham>,
    {
        let mut c = Matrix4::zeros();
        for b in factors {
            c += b.exponent_matrix();
        }
        Self::from_exponent_matrix(&c)
    }

    /// Distribution whose density is proportional to `exp(xᵀ C x)`.
    pub fn from_exponent_matrix(c: &Matrix4<f64>) -> Self {
        if c.iter().all(|e| e.abs() < UNIFORM_EPS) {
            return Self::uniform();
        }
        // Symmetrize before decomposing
        let c = 0.5 * (c + c.transpose());
        let eig = SymmetricEigen::new(c);
        let mut idx = [0usize, 1, 2, 3];
        idx.sort_by(|&a, &b| {
            eig.eigenvalues[a]
                .partial_cmp(&eig.eigenvalues[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let top = eig.eigenvalues[idx[3]];
        let v = [
            eig.eigenvectors.column(idx[0]).normalize(),
            eig.eigenvectors.column(idx[1]).normalize(),
            eig.eigenvectors.column(idx[2]).normalize(),
        ];
        let z = Vector3::new(
            eig.eigenvalues[idx[0]] - top,
            eig.eigenvalues[idx[1]] - top,
            eig.eigenvalues[idx[2]] - top,
        );
        Self::new(v, z)
    }

    /// Law of `a·X` when `X` follows this distribution.
    pub fn left_multiply(&self, a: &UnitQuaternion<f64>) -> Self {
        let a = quat_to_wxyz(a);
        Self {
            v: self.v.map(|v| quat_mul_wxyz(&a, &v)),
            z: self.z,
            f: self.f,
        }
    }

    /// Law of `X·a` when `X` follows this distribution.
    pub fn right_multiply(&self, a: &UnitQuaternion<f64>) -> Self {
        let a = quat_to_wxyz(a);
        Self {
            v: self.v.map(|v| quat_mul_wxyz(&v, &a)),
            z: self.z,
            f: self.f,
        }
    }

    /// Law of `X⁻¹` when `X` follows this distribution.
    pub fn invert(&self) -> Self {
        Self {
            v: self.v.map(|v| quat_conj_wxyz(&v)),
            z: self.z,
            f: self.f,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Quaternion;

    fn frame_bingham(q: &UnitQuaternion<f64>, z: [f64; 3]) -> Bingham {
        let m = quat_to_wxyz(q);
        let v = [
            quat_mul_wxyz(&m, &Vector4::new(0.0, 0.0, 1.0, 0.0)),
            quat_mul_wxyz(&m, &Vector4::new(0.0, 0.0, 0.0, 1.0)),
            quat_mul_wxyz(&m, &Vector4::new(0.0, 1.0, 0.0, 0.0)),
        ];
        Bingham::new(v, Vector3::new(z[0], z[1], z[2]))
    }

    fn same_rotation(a: &Vector4<f64>, b: &Vector4<f64>) -> bool {
        a.dot(b).abs() > 1.0 - 1e-9
    }

    #[test]
    fn test_uniform() {
        let b = Bingham::uniform();
        assert!(b.is_uniform());
        assert_relative_eq!(b.f, 2.0 * std::f64::consts::PI.powi(2), epsilon = 1e-12);
        assert_relative_eq!(b.mode(), Vector4::new(1.0, 0.0, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_mode_of_frame_bingham() {
        let q = UnitQuaternion::from_euler_angles(0.3, -0.2, 1.1);
        let b = frame_bingham(&q, [-100.0, -100.0, -5.0]);
        assert!(same_rotation(&b.mode(), &quat_to_wxyz(&q)));
        // Sorted ascending
        assert!(b.z[0] <= b.z[1] && b.z[1] <= b.z[2]);
    }

    #[test]
    fn test_left_right_multiply_move_mode() {
        let q = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let a = UnitQuaternion::from_euler_angles(-0.7, 0.4, 0.0);
        let b = frame_bingham(&q, [-50.0, -40.0, -30.0]);

        let left = b.left_multiply(&a).mode();
        assert!(same_rotation(&left, &quat_to_wxyz(&(a * q))));

        let right = b.right_multiply(&a).mode();
        assert!(same_rotation(&right, &quat_to_wxyz(&(q * a))));

        let inv = b.invert().mode();
        assert!(same_rotation(&inv, &quat_to_wxyz(&q.inverse())));
    }

    #[test]
    fn test_multiply_concentrates() {
        let q = UnitQuaternion::from_euler_angles(0.5, 0.0, -0.5);
        // Each factor constrains only part of the orientation
        let m = quat_to_wxyz(&q);
        let basis = [
            Vector4::new(0.0, 1.0, 0.0, 0.0),
            Vector4::new(0.0, 0.0, 1.0, 0.0),
            Vector4::new(0.0, 0.0, 0.0, 1.0),
        ];
        let v: Vec<Vector4<f64>> = basis.iter().map(|e| quat_mul_wxyz(&m, e)).collect();
        let b1 = Bingham::new([v[0], v[1], v[2]], Vector3::new(-20.0, 0.0, 0.0));
        let b2 = Bingham::new([v[1], v[2], v[0]], Vector3::new(-20.0, -20.0, 0.0));
        let prod = Bingham::multiply([&b1, &b2]);
        assert!(same_rotation(&prod.mode(), &m));
        assert!(prod.z.iter().all(|z| *z < -19.0));
    }

    #[test]
    fn test_multiply_empty_is_uniform() {
        let prod = Bingham::multiply(std::iter::empty::<&Bingham>());
        assert!(prod.is_uniform());
    }

    #[test]
    fn test_pdf_peaks_at_mode() {
        let q = UnitQuaternion::from_quaternion(Quaternion::new(0.9, 0.1, 0.3, -0.2));
        let b = frame_bingham(&q, [-30.0, -20.0, -10.0]);
        let at_mode = b.pdf(&b.mode());
        let off = b.pdf_quat(&(q * UnitQuaternion::from_euler_angles(0.2, 0.0, 0.0)));
        assert!(at_mode > off);
        // Antipodal symmetry
        assert_relative_eq!(b.pdf(&b.mode()), b.pdf(&(-b.mode())), epsilon = 1e-12);
    }
}
