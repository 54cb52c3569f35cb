//! Maximum-likelihood fitting from weighted quaternion samples.
//!
//! The directions are the eigenvectors of the weighted scatter matrix; the
//! three smallest eigenvalues are the target second moments. Concentrations
//! are then found so that `∂ ln F / ∂zᵢ` matches each target.

use nalgebra::{Matrix4, SymmetricEigen, Vector3, Vector4};

use super::normalizer::normalizer_partial;
use super::Bingham;

/// Largest concentration magnitude the fit will produce.
pub const Z_MAX: f64 = 900.0;

const SWEEPS: usize = 8;
const BISECTION_ITERS: usize = 40;

impl Bingham {
    /// Fit a distribution to weighted samples.
    ///
    /// Weights need not be normalized. Returns `None` when there are no
    /// samples, the lengths differ or the total weight is not positive.
    pub fn fit_weighted(samples: &[Vector4<f64>], weights: &[f64]) -> Option<Bingham> {
        if samples.is_empty() || samples.len() != weights.len() {
            return None;
        }
        let total: f64 = weights.iter().sum();
        if !(total > 0.0) || !total.is_finite() {
            return None;
        }

        let mut scatter = Matrix4::zeros();
        for (x, &w) in samples.iter().zip(weights) {
            scatter += (w / total) * x * x.transpose();
        }
        let eig = SymmetricEigen::new(scatter);
        let mut idx = [0usize, 1, 2, 3];
        idx.sort_by(|&a, &b| {
            eig.eigenvalues[a]
                .partial_cmp(&eig.eigenvalues[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let v = [
            eig.eigenvectors.column(idx[0]).normalize(),
            eig.eigenvectors.column(idx[1]).normalize(),
            eig.eigenvectors.column(idx[2]).normalize(),
        ];
        let moments = Vector3::new(
            eig.eigenvalues[idx[0]].max(0.0),
            eig.eigenvalues[idx[1]].max(0.0),
            eig.eigenvalues[idx[2]].max(0.0),
        );
        let z = concentrations_from_moments(&moments);
        Some(Bingham::new(v, z))
    }

    /// Unweighted [`Bingham::fit_weighted`].
    pub fn fit(samples: &[Vector4<f64>]) -> Option<Bingham> {
        Self::fit_weighted(samples, &vec![1.0; samples.len()])
    }
}

/// Solve `∇ ln F(z) = m` by coordinate-wise bisection.
fn concentrations_from_moments(m: &Vector3<f64>) -> Vector3<f64> {
    // Gaussian approximation as the starting point
    let mut z = m.map(|mi| {
        if mi > 0.0 {
            (-0.5 / mi).clamp(-Z_MAX, 0.0)
        } else {
            -Z_MAX
        }
    });

    for _ in 0..SWEEPS {
        let before = z;
        for i in 0..3 {
            z[i] = solve_coordinate(&z, i, m[i]);
        }
        if (z - before).amax() < 1e-6 * (1.0 + z.amax()) {
            break;
        }
    }
    z
}

/// Bisection on `zᵢ ∈ [-Z_MAX, 0]`; the partial derivative is increasing in `zᵢ`.
fn solve_coordinate(z: &Vector3<f64>, i: usize, target: f64) -> f64 {
    let mut probe = *z;
    let mut eval = |zi: f64| {
        probe[i] = zi;
        normalizer_partial(&probe, i)
    };
    if target >= eval(0.0) {
        return 0.0;
    }
    if target <= eval(-Z_MAX) {
        return -Z_MAX;
    }
    let (mut lo, mut hi) = (-Z_MAX, 0.0);
    for _ in 0..BISECTION_ITERS {
        let mid = 0.5 * (lo + hi);
        if eval(mid) < target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{quat_mul_wxyz, quat_to_wxyz};
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_fit_rejects_empty() {
        assert!(Bingham::fit_weighted(&[], &[]).is_none());
        let x = [Vector4::new(1.0, 0.0, 0.0, 0.0)];
        assert!(Bingham::fit_weighted(&x, &[0.0]).is_none());
        assert!(Bingham::fit_weighted(&x, &[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_fit_recovers_sampled_distribution() {
        let mut rng = StdRng::seed_from_u64(3);
        let q = UnitQuaternion::from_euler_angles(0.4, -0.3, 0.9);
        let m = quat_to_wxyz(&q);
        let v = [
            quat_mul_wxyz(&m, &Vector4::new(0.0, 1.0, 0.0, 0.0)),
            quat_mul_wxyz(&m, &Vector4::new(0.0, 0.0, 1.0, 0.0)),
            quat_mul_wxyz(&m, &Vector4::new(0.0, 0.0, 0.0, 1.0)),
        ];
        let truth = Bingham::new(v, Vector3::new(-60.0, -30.0, -8.0));
        let samples = truth.sample(3000, &mut rng);
        let fitted = Bingham::fit(&samples).expect("fit");

        assert!(fitted.mode().dot(&truth.mode()).abs() > 0.99);
        for i in 0..3 {
            assert_relative_eq!(fitted.z[i], truth.z[i], max_relative = 0.2);
        }
    }

    #[test]
    fn test_fit_spread_direction_is_uniform() {
        // Samples spread evenly over the great circle spanned by e0 and e1
        let samples: Vec<Vector4<f64>> = (0..360)
            .map(|k| {
                let t = k as f64 * std::f64::consts::PI / 180.0;
                Vector4::new(t.cos(), t.sin(), 0.0, 0.0)
            })
            .collect();
        let fitted = Bingham::fit(&samples).expect("fit");
        assert!(fitted.z[2] > -1.0);
        assert_relative_eq!(fitted.z[0], -Z_MAX, epsilon = 1e-9);
        assert_relative_eq!(fitted.z[1], -Z_MAX, epsilon = 1e-9);
    }

    #[test]
    fn test_weights_shift_mode() {
        let a = Vector4::new(1.0, 0.0, 0.0, 0.0);
        let b = Vector4::new(0.0, 1.0, 0.0, 0.0);
        let fitted = Bingham::fit_weighted(&[a, b], &[0.9, 0.1]).expect("fit");
        assert!(fitted.mode().dot(&a).abs() > 0.99);
    }
}
