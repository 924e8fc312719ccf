//! GPU Uniform Blocks
//!
//! `#[repr(C)]` mirrors of the WGSL uniform structs. Every block is padded to
//! [`UNIFORM_BLOCK_SIZE`] bytes so backends can bind any of them through one
//! dynamic-offset binding of fixed size.

use bytemuck::{Pod, Zeroable};

use crate::settings::ToneMapSettings;

/// Byte size every uniform block is padded to.
pub const UNIFORM_BLOCK_SIZE: usize = 32;

/// Bright-pass and tonemap parameters.
///
/// ```wgsl
/// struct ToneMapUniforms {
///     tonemap: vec4<f32>,   // middle_grey, white_point², threshold, 0
///     exposure: f32,
/// }
/// ```
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ToneMapUniforms {
    pub tonemap: [f32; 4],
    pub exposure: f32,
    pub _pad: [f32; 3],
}

impl ToneMapUniforms {
    /// Packs sanitized settings.
    #[must_use]
    pub fn from_settings(settings: &ToneMapSettings) -> Self {
        Self {
            tonemap: settings.tonemap_vector(),
            exposure: settings.exposure,
            _pad: [0.0; 3],
        }
    }

    #[inline]
    #[must_use]
    pub fn middle_grey(&self) -> f32 {
        self.tonemap[0]
    }

    #[inline]
    #[must_use]
    pub fn white_sqr(&self) -> f32 {
        self.tonemap[1]
    }

    #[inline]
    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.tonemap[2]
    }
}

impl Default for ToneMapUniforms {
    fn default() -> Self {
        Self::from_settings(&ToneMapSettings::default())
    }
}

/// Separable gaussian parameters for one blur direction.
///
/// ```wgsl
/// struct BlurUniforms {
///     direction: vec2<f32>,
///     blur_size: f32,
///     sigma: f32,
///     pixels_per_side: f32,
/// }
/// ```
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct BlurUniforms {
    /// `(1, 0)` horizontal, `(0, 1)` vertical.
    pub direction: [f32; 2],
    /// One texel step in UV units along `direction`.
    pub blur_size: f32,
    pub sigma: f32,
    pub pixels_per_side: f32,
    pub _pad: [f32; 3],
}

impl BlurUniforms {
    /// Horizontal pass over a target `width` texels wide.
    #[must_use]
    pub fn horizontal(settings: &ToneMapSettings, width: u32) -> Self {
        Self::new([1.0, 0.0], 1.0 / width.max(1) as f32, settings)
    }

    /// Vertical pass over a target `height` texels tall.
    #[must_use]
    pub fn vertical(settings: &ToneMapSettings, height: u32) -> Self {
        Self::new([0.0, 1.0], 1.0 / height.max(1) as f32, settings)
    }

    fn new(direction: [f32; 2], blur_size: f32, settings: &ToneMapSettings) -> Self {
        Self {
            direction,
            blur_size,
            sigma: settings.blur_sigma,
            pixels_per_side: settings.blur_pixels_per_side as f32,
            _pad: [0.0; 3],
        }
    }
}

/// Destination size for the luminance box filter.
///
/// ```wgsl
/// struct DownsampleUniforms {
///     target_size: vec2<f32>,
/// }
/// ```
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct DownsampleUniforms {
    pub target_size: [f32; 2],
    pub _pad: [f32; 6],
}

impl DownsampleUniforms {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            target_size: [width as f32, height as f32],
            _pad: [0.0; 6],
        }
    }
}

/// Which uniform block a shader stage expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    None,
    Downsample,
    ToneMap,
    Blur,
}

/// The uniform block attached to one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PassUniforms {
    None,
    Downsample(DownsampleUniforms),
    ToneMap(ToneMapUniforms),
    Blur(BlurUniforms),
}

impl PassUniforms {
    #[must_use]
    pub fn kind(&self) -> UniformKind {
        match self {
            Self::None => UniformKind::None,
            Self::Downsample(_) => UniformKind::Downsample,
            Self::ToneMap(_) => UniformKind::ToneMap,
            Self::Blur(_) => UniformKind::Blur,
        }
    }

    /// Raw bytes for upload, `None` when the pass has no uniforms.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::None => None,
            Self::Downsample(u) => Some(bytemuck::bytes_of(u)),
            Self::ToneMap(u) => Some(bytemuck::bytes_of(u)),
            Self::Blur(u) => Some(bytemuck::bytes_of(u)),
        }
    }
}
