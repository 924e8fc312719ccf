//! Tonemapping math shared by the CPU backend and the tests.
//!
//! Every function here has a WGSL twin in `src/shaders/chunks/`; keep them in
//! sync.

use glam::{Vec3, Vec4};

use crate::uniforms::ToneMapUniforms;

/// Rec.709 luma coefficients.
pub const LUMINANCE_WEIGHTS: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Relative luminance of a linear RGB color.
#[inline]
#[must_use]
pub fn luminance(rgb: Vec3) -> f32 {
    rgb.dot(LUMINANCE_WEIGHTS)
}

/// Extended Reinhard operator: `x (1 + x / w²) / (1 + x)`.
///
/// Maps `x = white_point` to exactly 1.
#[inline]
#[must_use]
pub fn reinhard_extended(x: f32, white_sqr: f32) -> f32 {
    x * (1.0 + x / white_sqr) / (1.0 + x)
}

/// Bright-pass extraction for one texel.
#[must_use]
pub fn bright_pass(color: Vec4, params: &ToneMapUniforms) -> Vec4 {
    let rgb = color.truncate();
    let lum = luminance(rgb);
    if lum <= params.threshold() {
        return Vec4::W;
    }
    let x = (lum - params.threshold()) * params.exposure * params.middle_grey();
    let mapped = reinhard_extended(x, params.white_sqr());
    (rgb * (mapped / lum)).extend(1.0)
}

/// Final tonemap of `scene + bloom` for one texel.
#[must_use]
pub fn tonemap(scene: Vec4, bloom: Vec4, params: &ToneMapUniforms) -> Vec4 {
    let hdr = scene.truncate() + bloom.truncate();
    let lum = luminance(hdr);
    if lum <= 0.0 {
        return Vec4::W;
    }
    let scaled = lum * params.exposure * params.middle_grey();
    let mapped = reinhard_extended(scaled, params.white_sqr());
    (hdr * (mapped / lum)).clamp(Vec3::ZERO, Vec3::ONE).extend(1.0)
}

/// Normalized gaussian tap weights for offsets `-n..=n`.
///
/// Built with the incremental recurrence the blur shader uses, so CPU and
/// GPU agree to the last bit the format keeps.
#[must_use]
pub fn gaussian_weights(sigma: f32, pixels_per_side: u32) -> Vec<f32> {
    let n = pixels_per_side as usize;
    let mut half = Vec::with_capacity(n + 1);

    // g.x = 1/(sqrt(2π)σ), g.y = exp(-1/2σ²), g.z = g.y²
    let mut g = Vec3::new(
        1.0 / ((2.0 * std::f32::consts::PI).sqrt() * sigma),
        (-0.5 / (sigma * sigma)).exp(),
        0.0,
    );
    g.z = g.y * g.y;

    for _ in 0..=n {
        half.push(g.x);
        g.x *= g.y;
        g.y *= g.z;
    }

    let sum = half[0] + 2.0 * half[1..].iter().sum::<f32>();
    let mut weights = Vec::with_capacity(2 * n + 1);
    weights.extend(half[1..].iter().rev().map(|w| w / sum));
    weights.extend(half.iter().map(|w| w / sum));
    weights
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        for n in 2..=6 {
            let w = gaussian_weights(4.0, n);
            assert_eq!(w.len(), 2 * n as usize + 1);
            let sum: f32 = w.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "n={n} sum={sum}");
        }
    }

    #[test]
    fn weights_match_closed_form() {
        let sigma = 3.0_f32;
        let w = gaussian_weights(sigma, 3);
        let center = w[3];
        for i in 1..=3_i32 {
            let expected = (-(i * i) as f32 / (2.0 * sigma * sigma)).exp();
            assert!((w[(3 + i) as usize] / center - expected).abs() < 1e-5);
            assert_eq!(w[(3 + i) as usize], w[(3 - i) as usize]);
        }
    }

    #[test]
    fn reinhard_maps_white_to_one() {
        assert!((reinhard_extended(1.5, 2.25) - 1.0).abs() < 1e-6);
        assert_eq!(reinhard_extended(0.0, 2.25), 0.0);
    }
}
