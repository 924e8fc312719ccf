//! Tonemap Compositor
//!
//! Adds the blurred bloom to the scene and maps the HDR sum into `[0, 1]`
//! with the extended Reinhard curve. The output target is the pipeline's
//! result.

use crate::backend::{FullscreenPass, PixelFormat, ProgramId, RenderBackend, TextureBinding, TextureId};
use crate::errors::Result;
use crate::shaders::{ShaderLibrary, ShaderStage};
use crate::targets::{Framebuffer, RenderTarget};
use crate::uniforms::{PassUniforms, ToneMapUniforms};

use super::Allocations;

pub struct TonemapPass {
    program: ProgramId,
    output: RenderTarget,
    framebuffer: Framebuffer,
}

impl TonemapPass {
    pub(crate) fn new<B: RenderBackend + ?Sized>(
        backend: &mut B,
        allocations: &mut Allocations,
        library: &ShaderLibrary,
        size: (u32, u32),
        format: PixelFormat,
    ) -> Result<Self> {
        let output = allocations.target(backend, "Tonemap Output", size, format)?;
        let framebuffer = Framebuffer::single(backend, "Tonemap Output", &output)?;
        let program = allocations.program(backend, library, ShaderStage::Tonemap, format)?;
        Ok(Self {
            program,
            output,
            framebuffer,
        })
    }

    pub fn run<B: RenderBackend + ?Sized>(
        &self,
        backend: &mut B,
        scene: TextureId,
        bloom: TextureId,
        uniforms: &ToneMapUniforms,
    ) -> Result<()> {
        backend.draw_fullscreen(&FullscreenPass {
            label: "Tonemap",
            program: self.program,
            target: self.framebuffer.draw_target(0)?,
            viewport: self.output.viewport(),
            textures: &[TextureBinding::new(0, scene), TextureBinding::new(1, bloom)],
            uniforms: PassUniforms::ToneMap(*uniforms),
        });
        Ok(())
    }

    #[must_use]
    pub fn output(&self) -> &RenderTarget {
        &self.output
    }

    #[must_use]
    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    pub fn release<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        backend.destroy_program(self.program);
        self.output.destroy(backend);
    }
}
