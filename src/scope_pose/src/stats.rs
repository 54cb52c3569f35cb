//! Small probability helpers shared by the search rounds.

use rand::seq::index;
use rand::Rng;

/// Log of a zero-mean normal density at `d`, relative to its peak.
///
/// Equals `log N(d; 0, sigma) - log N(0; 0, sigma)`, so a perfect match
/// contributes 0 and the value degrades quadratically.
#[inline]
pub fn gaussian_log_ratio(d: f64, sigma: f64) -> f64 {
    let t = d / sigma;
    -0.5 * t * t
}

/// Same as [`gaussian_log_ratio`] with `|d|` capped at `cap_sigmas * sigma`.
#[inline]
pub fn capped_gaussian_log_ratio(d: f64, sigma: f64, cap_sigmas: f64) -> f64 {
    gaussian_log_ratio(d.abs().min(cap_sigmas * sigma), sigma)
}

/// Standard normal density.
#[inline]
pub fn normpdf(x: f64, mu: f64, sigma: f64) -> f64 {
    let t = (x - mu) / sigma;
    (-0.5 * t * t).exp() / (sigma * (2.0 * std::f64::consts::PI).sqrt())
}

/// Logistic function `1 / (1 + exp(-x))`.
#[inline]
pub fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Normalize non-negative values to sum to 1. All-zero input stays all zero.
pub fn normalize_pmf(values: &[f64]) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter().map(|v| v / total).collect()
    } else {
        vec![0.0; values.len()]
    }
}

/// Weights `exp(s / temperature)` normalized to sum to one.
///
/// Uniform when every score is `-inf` or the temperature collapses the
/// mass.
pub fn softmax_weights(scores: &[f64], temperature: f64) -> Vec<f64> {
    let peak = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let w: Vec<f64> = scores.iter().map(|s| ((s - peak) / temperature).exp()).collect();
    let total: f64 = w.iter().sum();
    if total.is_finite() && total > 0.0 {
        w.into_iter().map(|x| x / total).collect()
    } else {
        vec![1.0 / scores.len() as f64; scores.len()]
    }
}

/// Draw an index from an (unnormalized) probability mass function.
///
/// Returns `None` when the mass is empty or sums to zero.
pub fn sample_pmf<R: Rng + ?Sized>(pmf: &[f64], rng: &mut R) -> Option<usize> {
    let total: f64 = pmf.iter().sum();
    if pmf.is_empty() || total <= 0.0 || !total.is_finite() {
        return None;
    }
    let u = rng.gen::<f64>() * total;
    let mut acc = 0.0;
    for (i, p) in pmf.iter().enumerate() {
        acc += p;
        if u < acc {
            return Some(i);
        }
    }
    Some(pmf.len() - 1)
}

/// Draw an index in `0..n` from a discretized triangular distribution whose
/// density falls linearly from index 0 to index `n - 1`.
pub fn triangular_index<R: Rng + ?Sized>(n: usize, rng: &mut R) -> usize {
    if n <= 1 {
        return 0;
    }
    let u: f64 = rng.gen();
    let i = (n as f64 * (1.0 - u.sqrt())).floor() as usize;
    i.min(n - 1)
}

/// `k` distinct indices from `0..n` in random order; all of `0..n` (in
/// order) when `k == 0` or `k >= n`.
pub fn random_subset<R: Rng + ?Sized>(n: usize, k: usize, rng: &mut R) -> Vec<usize> {
    if k == 0 || k >= n {
        return (0..n).collect();
    }
    index::sample(rng, n, k).into_vec()
}

/// Seeds for `n` parallel workers, drawn from a parent generator so a
/// seeded run stays reproducible regardless of thread scheduling.
pub fn child_seeds<R: Rng + ?Sized>(rng: &mut R, n: usize) -> Vec<u64> {
    (0..n).map(|_| rng.gen()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_gaussian_log_ratio_matches_normpdf() {
        let sigma = 0.3;
        let d = 0.2;
        let expected = normpdf(d, 0.0, sigma).ln() - normpdf(0.0, 0.0, sigma).ln();
        assert_relative_eq!(gaussian_log_ratio(d, sigma), expected, epsilon = 1e-12);
        assert_relative_eq!(capped_gaussian_log_ratio(10.0, sigma, 2.0), -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_softmax_weights() {
        let w = softmax_weights(&[0.0, 1.0, 2.0], 0.5);
        assert_relative_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(w[0] < w[1] && w[1] < w[2]);
        assert_relative_eq!(w[2] / w[1], 2.0f64.exp(), epsilon = 1e-9);
        assert!(softmax_weights(&[], 1.0).is_empty());
        assert_eq!(softmax_weights(&[f64::NEG_INFINITY; 2], 1.0), vec![0.5, 0.5]);
    }

    #[test]
    fn test_normalize_pmf_zero() {
        assert_eq!(normalize_pmf(&[0.0, 0.0]), vec![0.0, 0.0]);
        let p = normalize_pmf(&[1.0, 3.0]);
        assert_relative_eq!(p[1], 0.75);
    }

    #[test]
    fn test_sample_pmf() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(sample_pmf(&[0.0, 0.0], &mut rng), None);
        for _ in 0..20 {
            assert_eq!(sample_pmf(&[0.0, 1.0, 0.0], &mut rng), Some(1));
        }
    }

    #[test]
    fn test_triangular_index_biased() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut counts = [0usize; 4];
        for _ in 0..4000 {
            counts[triangular_index(4, &mut rng)] += 1;
        }
        assert!(counts[0] > counts[1]);
        assert!(counts[1] > counts[3]);
    }

    #[test]
    fn test_random_subset() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut s = random_subset(100, 10, &mut rng);
        s.sort_unstable();
        s.dedup();
        assert_eq!(s.len(), 10);
        assert_eq!(random_subset(5, 0, &mut rng), vec![0, 1, 2, 3, 4]);
    }
}
