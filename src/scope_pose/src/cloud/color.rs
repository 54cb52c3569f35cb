//! sRGB to CIE-Lab conversion (D65 white point).

use nalgebra::{Matrix3, Vector3};

/// Convert an `(r, g, b)` triple in `[0, 255]` to CIE-Lab.
pub fn rgb_to_lab(rgb: &Vector3<f64>) -> Vector3<f64> {
    let linear = rgb.map(|c| {
        let c = (c / 255.0).clamp(0.0, 1.0);
        if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    });

    #[rustfmt::skip]
    let to_xyz = Matrix3::new(
        0.4124564, 0.3575761, 0.1804375,
        0.2126729, 0.7151522, 0.0721750,
        0.0193339, 0.1191920, 0.9503041,
    );
    let xyz = to_xyz * linear;
    let white = Vector3::new(0.95047, 1.0, 1.08883);

    let f = |t: f64| {
        if t > 216.0 / 24389.0 {
            t.cbrt()
        } else {
            (24389.0 / 27.0 * t + 16.0) / 116.0
        }
    };
    let fx = f(xyz.x / white.x);
    let fy = f(xyz.y / white.y);
    let fz = f(xyz.z / white.z);

    Vector3::new(116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_white_and_black() {
        let white = rgb_to_lab(&Vector3::new(255.0, 255.0, 255.0));
        assert_abs_diff_eq!(white.x, 100.0, epsilon = 0.01);
        assert_abs_diff_eq!(white.y, 0.0, epsilon = 0.01);
        assert_abs_diff_eq!(white.z, 0.0, epsilon = 0.01);

        let black = rgb_to_lab(&Vector3::zeros());
        assert_abs_diff_eq!(black.x, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_red() {
        // Reference value for sRGB (255, 0, 0)
        let red = rgb_to_lab(&Vector3::new(255.0, 0.0, 0.0));
        assert_abs_diff_eq!(red.x, 53.24, epsilon = 0.05);
        assert_abs_diff_eq!(red.y, 80.09, epsilon = 0.1);
        assert_abs_diff_eq!(red.z, 67.20, epsilon = 0.1);
    }
}
