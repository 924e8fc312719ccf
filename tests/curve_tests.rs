//! Tonemap Curve Tests
//!
//! Tests for:
//! - Bright-pass threshold and monotonicity in exposure
//! - Hue preservation of the bright pass
//! - Tonemap output range and white point

use glam::{Vec3, Vec4};

use lumenfx::ToneMapSettings;
use lumenfx::curve::{bright_pass, luminance, reinhard_extended, tonemap};
use lumenfx::uniforms::ToneMapUniforms;

const EPSILON: f32 = 1e-5;

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

fn params(exposure: f32) -> ToneMapUniforms {
    let mut settings = ToneMapSettings::default();
    settings.set_exposure(exposure);
    ToneMapUniforms::from_settings(&settings)
}

// ============================================================================
// Bright Pass
// ============================================================================

#[test]
fn bright_pass_is_black_below_threshold() {
    let p = params(2.0);
    for color in [Vec4::ZERO, Vec4::new(0.5, 0.5, 0.5, 1.0), Vec4::new(0.0, 0.9, 0.0, 1.0)] {
        assert!(luminance(color.truncate()) <= p.threshold());
        assert_eq!(bright_pass(color, &p), Vec4::W);
    }
}

#[test]
fn bright_pass_is_black_exactly_at_threshold() {
    let color = Vec4::new(0.8, 0.6, 0.4, 1.0);
    let mut p = params(1.0);
    p.tonemap[2] = luminance(color.truncate());
    assert_eq!(bright_pass(color, &p), Vec4::W);
}

#[test]
fn bright_pass_grows_with_exposure() {
    let color = Vec4::new(1.5, 1.2, 0.9, 1.0);
    let mut previous = 0.0;
    for step in 1..=20 {
        let exposure = step as f32 * 0.1;
        let out = luminance(bright_pass(color, &params(exposure)).truncate());
        assert!(out > previous, "exposure {exposure}: {out} <= {previous}");
        previous = out;
    }
}

#[test]
fn bright_pass_preserves_hue() {
    let color = Vec4::new(2.0, 1.0, 0.5, 1.0);
    let out = bright_pass(color, &params(0.5));
    assert!(approx(out.x / out.y, 2.0));
    assert!(approx(out.y / out.z, 2.0));
    assert_eq!(out.w, 1.0);
}

// ============================================================================
// Tonemap
// ============================================================================

#[test]
fn tonemap_of_black_is_black() {
    assert_eq!(tonemap(Vec4::ZERO, Vec4::ZERO, &params(1.0)), Vec4::W);
}

#[test]
fn tonemap_output_is_saturated() {
    let p = params(2.0);
    for value in [0.1, 1.0, 10.0, 1000.0] {
        let out = tonemap(Vec4::splat(value), Vec4::new(value, 0.0, 0.0, 1.0), &p);
        assert!(out.truncate().cmpge(Vec3::ZERO).all());
        assert!(out.truncate().cmple(Vec3::ONE).all());
        assert_eq!(out.w, 1.0);
    }
}

#[test]
fn tonemap_adds_bloom() {
    let p = params(0.5);
    let scene = Vec4::splat(0.5);
    let without = tonemap(scene, Vec4::ZERO, &p);
    let with = tonemap(scene, Vec4::splat(0.3), &p);
    assert!(with.x > without.x);
}

#[test]
fn white_point_maps_to_one() {
    let settings = ToneMapSettings::default();
    let p = ToneMapUniforms::from_settings(&settings);
    // Scene luminance whose exposed value equals the white point.
    let l = settings.white_point / (settings.exposure * settings.middle_grey);
    let out = tonemap(Vec4::new(l, l, l, 1.0), Vec4::ZERO, &p);
    assert!((out.x - 1.0).abs() < 1e-4, "got {}", out.x);
    assert!(approx(reinhard_extended(settings.white_point, p.white_sqr()), 1.0));
}
