//! Pipeline Configuration
//!
//! Pure data: the construction-time [`PipelineConfig`] and the per-frame
//! [`ToneMapSettings`] knobs an external UI layer edits between frames.
//!
//! Both derive serde with `#[serde(default)]`, so a JSON document only needs
//! to name the fields it overrides:
//!
//! ```rust,ignore
//! let config = PipelineConfig::from_json(r#"{ "width": 1280, "height": 720,
//!     "tone_map": { "exposure": 1.2 } }"#)?;
//! ```

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::backend::PixelFormat;
use crate::errors::{PostError, Result};

/// Documented range of [`ToneMapSettings::middle_grey`].
pub const MIDDLE_GREY_RANGE: RangeInclusive<f32> = 0.1..=1.0;
/// Documented range of [`ToneMapSettings::white_point`].
pub const WHITE_POINT_RANGE: RangeInclusive<f32> = 0.1..=2.0;
/// Documented range of [`ToneMapSettings::threshold`].
pub const THRESHOLD_RANGE: RangeInclusive<f32> = 0.1..=2.0;
/// Documented range of [`ToneMapSettings::exposure`].
pub const EXPOSURE_RANGE: RangeInclusive<f32> = 0.1..=2.0;
/// Documented range of [`ToneMapSettings::blur_sigma`].
pub const BLUR_SIGMA_RANGE: RangeInclusive<f32> = 2.0..=6.0;
/// Documented range of [`ToneMapSettings::blur_pixels_per_side`].
pub const BLUR_PIXELS_RANGE: RangeInclusive<u32> = 2..=6;

/// Tonemapping and blur parameters.
///
/// Fields are public so a UI can bind sliders to them directly. The pipeline
/// never trusts them as-is: every frame it works on [`sanitized`](Self::sanitized)
/// values. The setters clamp immediately.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneMapSettings {
    /// Key value the scene luminance is mapped to.
    pub middle_grey: f32,
    /// Smallest luminance mapped to pure white (squared before upload).
    pub white_point: f32,
    /// Luminance below which the bright pass outputs black.
    pub threshold: f32,
    /// Manual exposure multiplier.
    pub exposure: f32,
    /// Gaussian sigma, in ping-pong texels.
    pub blur_sigma: f32,
    /// Taps on each side of the center texel.
    pub blur_pixels_per_side: u32,
}

impl Default for ToneMapSettings {
    fn default() -> Self {
        Self {
            middle_grey: 1.0,
            white_point: 1.5,
            threshold: 0.66,
            exposure: 0.5,
            blur_sigma: 4.0,
            blur_pixels_per_side: 2,
        }
    }
}

fn clamp_finite(value: f32, range: &RangeInclusive<f32>, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(*range.start(), *range.end())
    } else {
        fallback
    }
}

impl ToneMapSettings {
    /// Creates settings with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with every field finite and inside its documented range.
    ///
    /// Non-finite values fall back to the default before clamping.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let defaults = Self::default();
        Self {
            middle_grey: clamp_finite(self.middle_grey, &MIDDLE_GREY_RANGE, defaults.middle_grey),
            white_point: clamp_finite(self.white_point, &WHITE_POINT_RANGE, defaults.white_point),
            threshold: clamp_finite(self.threshold, &THRESHOLD_RANGE, defaults.threshold),
            exposure: clamp_finite(self.exposure, &EXPOSURE_RANGE, defaults.exposure),
            blur_sigma: clamp_finite(self.blur_sigma, &BLUR_SIGMA_RANGE, defaults.blur_sigma),
            blur_pixels_per_side: self
                .blur_pixels_per_side
                .clamp(*BLUR_PIXELS_RANGE.start(), *BLUR_PIXELS_RANGE.end()),
        }
    }

    /// Sets the middle grey key.
    pub fn set_middle_grey(&mut self, value: f32) {
        self.middle_grey = clamp_finite(value, &MIDDLE_GREY_RANGE, self.middle_grey);
    }

    /// Sets the white point.
    pub fn set_white_point(&mut self, value: f32) {
        self.white_point = clamp_finite(value, &WHITE_POINT_RANGE, self.white_point);
    }

    /// Sets the bright-pass threshold.
    pub fn set_threshold(&mut self, value: f32) {
        self.threshold = clamp_finite(value, &THRESHOLD_RANGE, self.threshold);
    }

    /// Sets the exposure multiplier.
    pub fn set_exposure(&mut self, value: f32) {
        self.exposure = clamp_finite(value, &EXPOSURE_RANGE, self.exposure);
    }

    /// Sets the blur sigma.
    pub fn set_blur_sigma(&mut self, value: f32) {
        self.blur_sigma = clamp_finite(value, &BLUR_SIGMA_RANGE, self.blur_sigma);
    }

    /// Sets the number of blur taps per side.
    pub fn set_blur_pixels_per_side(&mut self, value: u32) {
        self.blur_pixels_per_side =
            value.clamp(*BLUR_PIXELS_RANGE.start(), *BLUR_PIXELS_RANGE.end());
    }

    /// `[middle_grey, white_point², threshold, 0]`, the layout the bright and
    /// tonemap shaders read.
    #[must_use]
    pub fn tonemap_vector(&self) -> [f32; 4] {
        [
            self.middle_grey,
            self.white_point * self.white_point,
            self.threshold,
            0.0,
        ]
    }
}

/// Construction-time pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Ping-pong blur targets are `width / factor × height / factor`.
    pub blur_downsample_factor: u32,
    /// Format of every intermediate HDR target.
    pub hdr_format: PixelFormat,
    /// Format of the final output target.
    pub output_format: PixelFormat,
    /// Initial tonemap settings.
    pub tone_map: ToneMapSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 800,
            blur_downsample_factor: 2,
            hdr_format: PixelFormat::Rgba16Float,
            output_format: PixelFormat::Rgba16Float,
            tone_map: ToneMapSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration for the given output size with defaults for
    /// everything else.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    /// Sets the blur downsample factor.
    #[must_use]
    pub fn with_blur_downsample_factor(mut self, factor: u32) -> Self {
        self.blur_downsample_factor = factor;
        self
    }

    /// Parses a JSON configuration document.
    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    /// Checks that every target this configuration implies can be built.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PostError::InvalidConfig(format!(
                "output size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.blur_downsample_factor == 0 {
            return Err(PostError::InvalidConfig(
                "blur downsample factor must be non-zero".to_string(),
            ));
        }
        if self.width % self.blur_downsample_factor != 0
            || self.height % self.blur_downsample_factor != 0
        {
            return Err(PostError::InvalidConfig(format!(
                "output size {}x{} is not divisible by the blur downsample factor {}",
                self.width, self.height, self.blur_downsample_factor
            )));
        }
        for (name, format) in [("hdr_format", self.hdr_format), ("output_format", self.output_format)] {
            if !format.is_color() {
                return Err(PostError::InvalidConfig(format!(
                    "{name} {format:?} is not a color format"
                )));
            }
        }
        Ok(())
    }

    /// Bright-pass target size: half resolution, at least one texel.
    #[must_use]
    pub fn bright_size(&self) -> (u32, u32) {
        ((self.width / 2).max(1), (self.height / 2).max(1))
    }

    /// Ping-pong blur target size.
    #[must_use]
    pub fn blur_size(&self) -> (u32, u32) {
        let factor = self.blur_downsample_factor.max(1);
        (self.width / factor, self.height / factor)
    }
}
