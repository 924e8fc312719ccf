//! Bright-Pass Extraction
//!
//! Half-resolution pass that keeps only texels brighter than the threshold
//! and tonemaps the excess, producing the seed the blur spreads into bloom.

use crate::backend::{FullscreenPass, PixelFormat, ProgramId, RenderBackend, TextureBinding, TextureId};
use crate::errors::Result;
use crate::shaders::{ShaderLibrary, ShaderStage};
use crate::targets::{Framebuffer, RenderTarget};
use crate::uniforms::{PassUniforms, ToneMapUniforms};

use super::Allocations;

pub struct BrightPass {
    program: ProgramId,
    target: RenderTarget,
    framebuffer: Framebuffer,
}

impl BrightPass {
    pub(crate) fn new<B: RenderBackend + ?Sized>(
        backend: &mut B,
        allocations: &mut Allocations,
        library: &ShaderLibrary,
        size: (u32, u32),
        format: PixelFormat,
    ) -> Result<Self> {
        let target = allocations.target(backend, "Bright Pass", size, format)?;
        let framebuffer = Framebuffer::single(backend, "Bright Pass", &target)?;
        let program = allocations.program(backend, library, ShaderStage::BrightPass, format)?;
        Ok(Self {
            program,
            target,
            framebuffer,
        })
    }

    pub fn run<B: RenderBackend + ?Sized>(
        &self,
        backend: &mut B,
        scene: TextureId,
        uniforms: &ToneMapUniforms,
    ) -> Result<()> {
        backend.draw_fullscreen(&FullscreenPass {
            label: "Bright Pass",
            program: self.program,
            target: self.framebuffer.draw_target(0)?,
            viewport: self.target.viewport(),
            textures: &[TextureBinding::new(0, scene)],
            uniforms: PassUniforms::ToneMap(*uniforms),
        });
        Ok(())
    }

    #[must_use]
    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    #[must_use]
    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    pub fn release<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        backend.destroy_program(self.program);
        self.target.destroy(backend);
    }
}
