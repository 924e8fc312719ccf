//! Separable Gaussian Blur
//!
//! # Algorithm
//!
//! Per frame, with `W` the write slot and `R` the read slot of the pair:
//!
//! 1. **Horizontal**: bright-pass target → `W`.
//! 2. **Resolve**: copy `W` into `R`. A pass may not sample the texture it
//!    renders into, so the vertical pass reads the copy.
//! 3. **Vertical**: `R` → `W`.
//! 4. **Flip**: `W` becomes the read slot, holding this frame's bloom.
//!
//! Both passes use the normalized incremental gaussian of
//! [`gaussian_weights`](crate::curve::gaussian_weights).

use crate::backend::{FullscreenPass, PixelFormat, ProgramId, RenderBackend, TextureBinding, TextureId};
use crate::errors::Result;
use crate::settings::ToneMapSettings;
use crate::shaders::{ShaderLibrary, ShaderStage};
use crate::targets::RenderTarget;
use crate::uniforms::{BlurUniforms, PassUniforms};

use super::Allocations;
use super::ping_pong::{PingPongPair, PingPongSlot};

pub struct BlurPass {
    program: ProgramId,
    pair: PingPongPair,
}

impl BlurPass {
    pub(crate) fn new<B: RenderBackend + ?Sized>(
        backend: &mut B,
        allocations: &mut Allocations,
        library: &ShaderLibrary,
        size: (u32, u32),
        format: PixelFormat,
    ) -> Result<Self> {
        let pair = PingPongPair::new(backend, allocations, "Blur Ping-Pong", size, format)?;
        let program = allocations.program(backend, library, ShaderStage::GaussianBlur, format)?;
        Ok(Self { program, pair })
    }

    /// Records both blur directions and flips the pair.
    pub fn run<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        bright: TextureId,
        settings: &ToneMapSettings,
    ) -> Result<()> {
        let write_slot = self.pair.write_slot();
        let write = self.pair.framebuffer().draw_target(attachment(write_slot))?;
        let read = self.pair.framebuffer().draw_target(attachment(write_slot.other()))?;
        let target = self.pair.write_target();
        let viewport = target.viewport();

        backend.draw_fullscreen(&FullscreenPass {
            label: "Blur Horizontal",
            program: self.program,
            target: write,
            viewport,
            textures: &[TextureBinding::new(0, bright)],
            uniforms: PassUniforms::Blur(BlurUniforms::horizontal(settings, target.width)),
        });

        backend.copy_texture(write, read);

        backend.draw_fullscreen(&FullscreenPass {
            label: "Blur Vertical",
            program: self.program,
            target: write,
            viewport,
            textures: &[TextureBinding::new(0, read)],
            uniforms: PassUniforms::Blur(BlurUniforms::vertical(settings, target.height)),
        });

        self.pair.flip();
        log::trace!("Blur wrote slot {write_slot:?}");
        Ok(())
    }

    /// Target holding the most recent blur result.
    #[must_use]
    pub fn result(&self) -> &RenderTarget {
        self.pair.read_target()
    }

    #[must_use]
    pub fn pair(&self) -> &PingPongPair {
        &self.pair
    }

    pub fn release<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        backend.destroy_program(self.program);
        self.pair.release(backend);
    }
}

fn attachment(slot: PingPongSlot) -> u32 {
    slot.index() as u32
}
