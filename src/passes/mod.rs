//! Post-Processing Passes
//!
//! One module per stage of the frame. Each pass owns its programs, targets,
//! and framebuffers, and records its draws in `run`; none of them submit.
//!
//! | Pass | Stage(s) | Writes |
//! |------|----------|--------|
//! | [`LuminancePass`] | luminance sample + 4 box averages | 128² → 1² chain |
//! | [`AsyncReadback`] | texel copy | host copy of the 1×1 texel |
//! | [`BrightPass`] | bright pass | half-resolution bloom seed |
//! | [`BlurPass`] | gaussian, H then V | ping-pong pair |
//! | [`TonemapPass`] | tonemap | full-resolution output |

pub mod blur;
pub mod bright;
pub mod luminance;
pub mod ping_pong;
pub mod readback;
pub mod tonemap;

pub use blur::BlurPass;
pub use bright::BrightPass;
pub use luminance::LuminancePass;
pub use ping_pong::{PingPongPair, PingPongSlot};
pub use readback::AsyncReadback;
pub use tonemap::TonemapPass;

use crate::backend::{PixelFormat, ProgramId, ReadbackId, RenderBackend, TextureId};
use crate::errors::Result;
use crate::shaders::{ShaderLibrary, ShaderStage};
use crate::targets::RenderTarget;

/// Everything allocated while building a pipeline.
///
/// Construction is all-or-nothing: when a later step fails, the caller hands
/// the ledger back to [`release`](Self::release) and nothing leaks.
#[derive(Debug, Default)]
pub(crate) struct Allocations {
    textures: Vec<TextureId>,
    programs: Vec<ProgramId>,
    readbacks: Vec<ReadbackId>,
}

impl Allocations {
    pub(crate) fn target<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        label: &str,
        (width, height): (u32, u32),
        format: PixelFormat,
    ) -> Result<RenderTarget> {
        let target = RenderTarget::create(backend, label, width, height, format)?;
        self.textures.push(target.texture);
        Ok(target)
    }

    /// Renders a stage's WGSL and compiles it on the backend for targets of
    /// `format`.
    pub(crate) fn program<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        library: &ShaderLibrary,
        stage: ShaderStage,
        format: PixelFormat,
    ) -> Result<ProgramId> {
        let source = library.source(stage)?;
        let program = backend.compile_program(stage, &source, format)?;
        log::debug!("Compiled shader stage '{stage}' for {format:?}");
        self.programs.push(program);
        Ok(program)
    }

    pub(crate) fn readback<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        label: &str,
    ) -> Result<ReadbackId> {
        let id = backend.create_readback(label)?;
        self.readbacks.push(id);
        Ok(id)
    }

    /// Frees everything recorded so far, newest first.
    pub(crate) fn release<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        for id in self.readbacks.into_iter().rev() {
            backend.destroy_readback(id);
        }
        for id in self.programs.into_iter().rev() {
            backend.destroy_program(id);
        }
        for id in self.textures.into_iter().rev() {
            backend.destroy_texture(id);
        }
    }
}
