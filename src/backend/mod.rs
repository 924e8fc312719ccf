//! Render Backend Abstraction
//!
//! Every GPU command the pipeline issues goes through [`RenderBackend`]. The
//! trait covers textures, programs, one kind of draw (a
//! full-screen quad into a single color target), texture copies, and
//! single-pixel readback.
//!
//! Resources are addressed by slotmap keys ([`TextureId`], [`ProgramId`],
//! [`ReadbackId`]); backends own the underlying objects and the pipeline owns
//! the keys. Texture inputs to a pass are always explicit
//! `(slot, texture)` pairs, never ambient binding state.
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`gpu::WgpuBackend`] | Production rendering on a wgpu device |
//! | [`software::SoftwareBackend`] | CPU reference, tests, debugging |

pub mod software;
pub mod gpu;

use glam::Vec4;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::shaders::ShaderStage;
use crate::uniforms::PassUniforms;

slotmap::new_key_type! {
    /// Handle to a backend-owned 2D texture.
    pub struct TextureId;
    /// Handle to a compiled shader program.
    pub struct ProgramId;
    /// Handle to a host-visible staging slot for pixel readback.
    pub struct ReadbackId;
}

/// Texel formats the pipeline allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit normalized RGBA.
    Rgba8Unorm,
    /// Half-float RGBA, the HDR default.
    Rgba16Float,
    /// 32-bit float depth. Not color-renderable.
    Depth32Float,
}

impl PixelFormat {
    /// Whether the format can be bound as a color attachment.
    #[must_use]
    pub fn is_color(self) -> bool {
        !matches!(self, Self::Depth32Float)
    }

    /// Size of one texel in bytes.
    #[must_use]
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgba8Unorm | Self::Depth32Float => 4,
            Self::Rgba16Float => 8,
        }
    }

    /// Rounds a value to what the format can store.
    #[must_use]
    pub fn quantize(self, value: Vec4) -> Vec4 {
        match self {
            Self::Rgba8Unorm => {
                (value.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round() / 255.0
            }
            Self::Rgba16Float => Vec4::from_array(
                value
                    .to_array()
                    .map(|c| half::f16::from_f32(c).to_f32()),
            ),
            Self::Depth32Float => Vec4::new(value.x, 0.0, 0.0, 1.0),
        }
    }
}

/// Description of a texture to allocate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    /// Debug label.
    pub label: String,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Texel format.
    pub format: PixelFormat,
}

impl TextureDesc {
    /// Creates a texture description.
    #[must_use]
    pub fn new(label: impl Into<String>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format,
        }
    }

    /// `(width, height)`.
    #[inline]
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bytes the texture occupies.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * u64::from(self.format.bytes_per_pixel())
    }
}

/// Pixel rectangle a pass rasterizes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// A viewport covering a whole `width × height` target.
    #[must_use]
    pub const fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Whether the viewport lies inside a `width × height` target.
    #[must_use]
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.saturating_add(self.width) <= width
            && self.y.saturating_add(self.height) <= height
    }
}

/// A texture bound to one of a program's sampler slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureBinding {
    /// Slot index into [`ShaderStage::texture_slots`].
    pub slot: u32,
    /// Bound texture.
    pub texture: TextureId,
}

impl TextureBinding {
    /// Creates a binding.
    #[must_use]
    pub const fn new(slot: u32, texture: TextureId) -> Self {
        Self { slot, texture }
    }
}

/// One full-screen draw.
#[derive(Debug, Clone)]
pub struct FullscreenPass<'a> {
    /// Debug label.
    pub label: &'a str,
    /// Program to run.
    pub program: ProgramId,
    /// Color target written by the pass.
    pub target: TextureId,
    /// Viewport, always set explicitly per pass.
    pub viewport: Viewport,
    /// Sampled inputs.
    pub textures: &'a [TextureBinding],
    /// Uniform block for the program's stage.
    pub uniforms: PassUniforms,
}

/// State of a readback slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadbackStatus {
    /// No request outstanding.
    Idle,
    /// Request recorded or in flight; result not yet visible.
    Pending,
    /// The pixel value, now retrieved. The slot returns to idle.
    Ready(Vec4),
}

/// The GPU surface the pipeline is written against.
///
/// Commands are recorded in call order and become visible to readback only
/// after [`submit`](Self::submit). No method blocks on GPU completion.
/// Errors that occur while *recording* are not returned; they are collected
/// and surfaced through [`take_errors`](Self::take_errors).
pub trait RenderBackend {
    /// Allocates a texture usable as sampled input, color target, and copy
    /// source/destination.
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId>;

    /// Frees a texture. Unknown handles are ignored.
    fn destroy_texture(&mut self, id: TextureId);

    /// Description of a live texture.
    fn texture_desc(&self, id: TextureId) -> Option<&TextureDesc>;

    /// Replaces the full contents of a texture, row-major, top row first.
    fn write_texture(&mut self, id: TextureId, texels: &[Vec4]) -> Result<()>;

    /// Maximum number of color attachments a framebuffer may use.
    fn max_color_attachments(&self) -> u32 {
        8
    }

    /// Compiles and links a stage from WGSL source for color targets of
    /// `format`.
    ///
    /// Binding or interface mismatches between the shader and the stage's
    /// layout are reported here as [`PostError::ShaderCompile`], not at the
    /// first draw.
    ///
    /// [`PostError::ShaderCompile`]: crate::errors::PostError::ShaderCompile
    fn compile_program(
        &mut self,
        stage: ShaderStage,
        source: &str,
        format: PixelFormat,
    ) -> Result<ProgramId>;

    /// Frees a program. Unknown handles are ignored.
    fn destroy_program(&mut self, id: ProgramId);

    /// Records a full-screen draw.
    fn draw_fullscreen(&mut self, pass: &FullscreenPass<'_>);

    /// Records a whole-texture copy between two textures of equal size and
    /// format.
    fn copy_texture(&mut self, src: TextureId, dst: TextureId);

    /// Allocates a staging slot for single-pixel readback.
    fn create_readback(&mut self, label: &str) -> Result<ReadbackId>;

    /// Frees a staging slot. Unknown handles are ignored.
    fn destroy_readback(&mut self, id: ReadbackId);

    /// Records a copy of texel `(0, 0)` of `src` into `dst`.
    ///
    /// Returns `false`, and records an error, when the request was rejected
    /// (unknown handles or a busy slot).
    fn enqueue_readback(&mut self, src: TextureId, dst: ReadbackId) -> bool;

    /// Checks a staging slot without blocking.
    fn poll_readback(&mut self, id: ReadbackId) -> ReadbackStatus;

    /// Drops any request on the slot; its result is never delivered.
    fn discard_readback(&mut self, id: ReadbackId);

    /// Submits everything recorded since the last submit.
    fn submit(&mut self);

    /// Drains the errors collected since the last call.
    fn take_errors(&mut self) -> Vec<String>;
}
