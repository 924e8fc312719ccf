//! Luminance Downsample Chain
//!
//! # Algorithm
//!
//! 1. **Sample**: bilinear-sample the scene into the 128² target, storing
//!    Rec.709 luminance in rgb.
//! 2. **Average**: four box-filter passes, 128² → 64² → 16² → 4² → 1². Each
//!    destination texel is the exact mean of the source texels it covers.
//!
//! The 1×1 target ends up holding the average scene luminance and feeds
//! [`AsyncReadback`](super::AsyncReadback).

use crate::backend::{FullscreenPass, PixelFormat, ProgramId, RenderBackend, TextureBinding, TextureId};
use crate::errors::Result;
use crate::shaders::{ShaderLibrary, ShaderStage};
use crate::targets::{Framebuffer, LUMINANCE_SIZES, RenderTarget};
use crate::uniforms::{DownsampleUniforms, PassUniforms};

use super::Allocations;

const STEPS: usize = LUMINANCE_SIZES.len();

pub struct LuminancePass {
    sample_program: ProgramId,
    average_program: ProgramId,
    /// Indexed by chain step; `targets[0]` is 128².
    targets: [RenderTarget; STEPS],
    framebuffers: [Framebuffer; STEPS],
}

impl LuminancePass {
    pub(crate) fn new<B: RenderBackend + ?Sized>(
        backend: &mut B,
        allocations: &mut Allocations,
        library: &ShaderLibrary,
        format: PixelFormat,
    ) -> Result<Self> {
        let mut targets = Vec::with_capacity(STEPS);
        let mut framebuffers = Vec::with_capacity(STEPS);
        for size in LUMINANCE_SIZES {
            let label = format!("Luminance {size}x{size}");
            let target = allocations.target(backend, &label, (size, size), format)?;
            framebuffers.push(Framebuffer::single(backend, label, &target)?);
            targets.push(target);
        }

        let sample_program = allocations.program(backend, library, ShaderStage::LuminanceSample, format)?;
        let average_program = allocations.program(backend, library, ShaderStage::LuminanceAverage, format)?;

        Ok(Self {
            sample_program,
            average_program,
            targets: into_array(targets),
            framebuffers: into_array(framebuffers),
        })
    }

    /// Records the five chain passes.
    pub fn run<B: RenderBackend + ?Sized>(&self, backend: &mut B, scene: TextureId) -> Result<()> {
        let mut source = scene;
        for (step, (target, framebuffer)) in self.targets.iter().zip(&self.framebuffers).enumerate() {
            let textures = [TextureBinding::new(0, source)];
            let (program, uniforms) = if step == 0 {
                (self.sample_program, PassUniforms::None)
            } else {
                (
                    self.average_program,
                    PassUniforms::Downsample(DownsampleUniforms::new(target.width, target.height)),
                )
            };

            backend.draw_fullscreen(&FullscreenPass {
                label: framebuffer.label(),
                program,
                target: framebuffer.draw_target(0)?,
                viewport: target.viewport(),
                textures: &textures,
                uniforms,
            });
            source = target.texture;
        }
        Ok(())
    }

    /// Chain target at `step`; 0 is 128², 4 is 1×1.
    #[must_use]
    pub fn target(&self, step: usize) -> Option<&RenderTarget> {
        self.targets.get(step)
    }

    #[must_use]
    pub fn framebuffers(&self) -> &[Framebuffer] {
        &self.framebuffers
    }

    /// The 128² luminance target.
    #[must_use]
    pub fn first(&self) -> &RenderTarget {
        &self.targets[0]
    }

    /// The 1×1 average-luminance target.
    #[must_use]
    pub fn result(&self) -> &RenderTarget {
        &self.targets[STEPS - 1]
    }

    pub fn release<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        backend.destroy_program(self.sample_program);
        backend.destroy_program(self.average_program);
        for target in self.targets {
            target.destroy(backend);
        }
    }
}

// Lengths are fixed by the loops above.
fn into_array<T>(items: Vec<T>) -> [T; STEPS] {
    match items.try_into() {
        Ok(array) => array,
        Err(items) => unreachable!("luminance chain built {} of {STEPS} steps", items.len()),
    }
}
