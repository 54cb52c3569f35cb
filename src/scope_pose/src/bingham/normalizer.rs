//! Bingham normalizing constant via the Kume–Wood saddle-point approximation.
//!
//! For concentrations `λᵢ = -zᵢ` (plus `λ₄ = 0` for the mode direction) the
//! normalizer is
//!
//! ```text
//! F = 2 π² Πᵢ λᵢ^{-1/2} · f_r(1)
//! ```
//!
//! where `f_r` is the density of `Σ xᵢ²` for independent `xᵢ ~ N(0, 1/(2λᵢ))`.
//! `f_r(1)` comes from the second-order saddle-point formula. All `λ` are
//! shifted by a constant `c` first so they are strictly positive, using
//! `F(λ) = e^c F(λ + c)`.

use nalgebra::Vector3;

/// Dimension of the quaternion sphere's ambient space.
const DIM: usize = 4;

/// Log of the uniform normalizer, ln(2π²).
fn log_uniform() -> f64 {
    (2.0 * std::f64::consts::PI * std::f64::consts::PI).ln()
}

/// Natural log of the Bingham normalizer for concentrations `z`.
pub fn log_normalizer(z: &Vector3<f64>) -> f64 {
    if z.iter().all(|v| v.abs() < 1e-12) {
        return log_uniform();
    }
    saddle_point_log_normalizer(z)
}

/// Gradient of `ln F` with respect to `z`.
///
/// Component `i` is the expected second moment `E[(vᵢ·x)²]`.
pub fn normalizer_gradient(z: &Vector3<f64>) -> Vector3<f64> {
    Vector3::from_fn(|i, _| normalizer_partial(z, i))
}

/// Component `i` of [`normalizer_gradient`].
pub(super) fn normalizer_partial(z: &Vector3<f64>, i: usize) -> f64 {
    let h = 1e-4 * z[i].abs().max(1.0);
    let mut plus = *z;
    let mut minus = *z;
    plus[i] += h;
    minus[i] -= h;
    // Skip the exact uniform shortcut so differences around z = 0 stay smooth
    (saddle_point_log_normalizer(&plus) - saddle_point_log_normalizer(&minus)) / (2.0 * h)
}

fn saddle_point_log_normalizer(z: &Vector3<f64>) -> f64 {
    let lambda_raw = [-z[0], -z[1], -z[2], 0.0];
    let min = lambda_raw.iter().cloned().fold(f64::INFINITY, f64::min);
    let shift = 1.0 - min;
    let lambda = lambda_raw.map(|l| l + shift);

    let t = solve_saddle_point(&lambda);

    let mut k = 0.0;
    let mut k2 = 0.0;
    let mut k3 = 0.0;
    let mut k4 = 0.0;
    for &l in &lambda {
        let d = l - t;
        k += -0.5 * (1.0 - t / l).ln();
        k2 += 0.5 / (d * d);
        k3 += 1.0 / (d * d * d);
        k4 += 3.0 / (d * d * d * d);
    }

    let log_f1 = -0.5 * (2.0 * std::f64::consts::PI * k2).ln() + k - t;
    let rho3 = k3 / k2.powf(1.5);
    let rho4 = k4 / (k2 * k2);
    let correction = 1.0 + rho4 / 8.0 - 5.0 * rho3 * rho3 / 24.0;
    let log_f2 = log_f1 + correction.max(1e-6).ln();

    let log_prefactor = 2f64.ln() + 0.5 * DIM as f64 * std::f64::consts::PI.ln()
        - 0.5 * lambda.iter().map(|l| l.ln()).sum::<f64>();

    log_prefactor + log_f2 + shift
}

/// Solve `K'(t) = Σ 1/(2(λᵢ - t)) = 1` for `t < min λ`.
///
/// `K'` is increasing and convex on that interval, so Newton's method
/// started left of the root converges monotonically.
fn solve_saddle_point(lambda: &[f64; DIM]) -> f64 {
    let lmin = lambda.iter().cloned().fold(f64::INFINITY, f64::min);
    // K'(lmin - DIM/2) <= 1 always holds
    let mut t = lmin - 0.5 * DIM as f64;
    for _ in 0..100 {
        let mut k1 = 0.0;
        let mut k2 = 0.0;
        for &l in lambda {
            let d = l - t;
            k1 += 0.5 / d;
            k2 += 0.5 / (d * d);
        }
        let step = (k1 - 1.0) / k2;
        let next = (t - step).min(lmin - 1e-12);
        if (next - t).abs() < 1e-14 * (1.0 + t.abs()) {
            return next;
        }
        t = next;
    }
    t
}
