//! Pipeline Orchestrator
//!
//! [`BloomPipeline`] owns every target, framebuffer, and program of the
//! post-processing chain and records one frame per [`execute`] call:
//!
//! ```text
//! luminance chain ─► readback ─► bright pass ─► blur H ─► copy ─► blur V ─► tonemap ─► submit
//! ```
//!
//! [`execute`]: BloomPipeline::execute

use crate::backend::{RenderBackend, TextureId};
use crate::check_errors;
use crate::errors::{PostError, Result, RuntimeFault};
use crate::passes::{
    Allocations, AsyncReadback, BlurPass, BrightPass, LuminancePass, PingPongSlot, TonemapPass,
};
use crate::settings::{PipelineConfig, ToneMapSettings};
use crate::shaders::ShaderLibrary;
use crate::targets::{Framebuffer, RenderTarget};
use crate::uniforms::ToneMapUniforms;

/// The HDR bloom and tonemap pipeline.
///
/// # Usage
///
/// ```rust,ignore
/// let mut backend = SoftwareBackend::new();
/// let mut pipeline = BloomPipeline::new(&mut backend, PipelineConfig::new(64, 64), &ShaderLibrary::new())?;
/// let scene = backend.create_texture(&TextureDesc::new("Scene", 64, 64, PixelFormat::Rgba16Float))?;
/// let output = pipeline.execute(&mut backend, scene)?;
/// pipeline.release(&mut backend);
/// ```
pub struct BloomPipeline {
    config: PipelineConfig,
    settings: ToneMapSettings,

    // === Passes, in execution order ===
    luminance: LuminancePass,
    readback: AsyncReadback,
    bright: BrightPass,
    blur: BlurPass,
    tonemap: TonemapPass,

    // === Per-frame state ===
    frame_index: u64,
    average_luminance: Option<f32>,
    faults: Vec<RuntimeFault>,
}

impl BloomPipeline {
    /// Allocates every target, validates every framebuffer, and compiles
    /// every stage.
    ///
    /// On failure nothing stays allocated on the backend.
    pub fn new<B: RenderBackend + ?Sized>(
        backend: &mut B,
        config: PipelineConfig,
        library: &ShaderLibrary,
    ) -> Result<Self> {
        config.validate()?;

        let mut allocations = Allocations::default();
        match Self::build(backend, &mut allocations, config, library) {
            Ok(pipeline) => {
                log::info!(
                    "Bloom pipeline ready: {}x{}, blur {}x{}, bright {}x{}",
                    pipeline.config.width,
                    pipeline.config.height,
                    pipeline.config.blur_size().0,
                    pipeline.config.blur_size().1,
                    pipeline.config.bright_size().0,
                    pipeline.config.bright_size().1,
                );
                Ok(pipeline)
            }
            Err(e) => {
                log::error!("Bloom pipeline construction failed: {e}");
                allocations.release(backend);
                Err(e)
            }
        }
    }

    fn build<B: RenderBackend + ?Sized>(
        backend: &mut B,
        allocations: &mut Allocations,
        config: PipelineConfig,
        library: &ShaderLibrary,
    ) -> Result<Self> {
        let hdr = config.hdr_format;
        let luminance = LuminancePass::new(backend, allocations, library, hdr)?;
        let readback = AsyncReadback::new(backend, allocations)?;
        let bright = BrightPass::new(backend, allocations, library, config.bright_size(), hdr)?;
        let blur = BlurPass::new(backend, allocations, library, config.blur_size(), hdr)?;
        let tonemap = TonemapPass::new(
            backend,
            allocations,
            library,
            (config.width, config.height),
            config.output_format,
        )?;

        let faults = check_errors!(backend);

        Ok(Self {
            settings: config.tone_map.sanitized(),
            config,
            luminance,
            readback,
            bright,
            blur,
            tonemap,
            frame_index: 0,
            average_luminance: None,
            faults,
        })
    }

    /// Records and submits one frame over `scene`, returning the output
    /// texture.
    ///
    /// GPU errors raised by the frame do not fail the call; they are logged
    /// and available from [`last_faults`](Self::last_faults).
    pub fn execute<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        scene: TextureId,
    ) -> Result<TextureId> {
        if backend.texture_desc(scene).is_none() {
            return Err(PostError::UnknownTexture("BloomPipeline::execute".to_string()));
        }

        let settings = self.settings.sanitized();
        let uniforms = ToneMapUniforms::from_settings(&settings);

        self.luminance.run(backend, scene)?;
        let luminance = self.readback.download(backend, self.luminance.result().texture);
        self.average_luminance = self.readback.last();
        log::trace!("Frame {}: average luminance {luminance}", self.frame_index);

        self.bright.run(backend, scene, &uniforms)?;
        self.blur.run(backend, self.bright.target().texture, &settings)?;
        self.tonemap
            .run(backend, scene, self.blur.result().texture, &uniforms)?;

        backend.submit();
        self.faults = check_errors!(backend);
        self.frame_index += 1;

        Ok(self.tonemap.output().texture)
    }

    /// Drops an in-flight luminance readback.
    pub fn discard_readback<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        self.readback.discard(backend);
    }

    /// Frees every resource the pipeline owns.
    pub fn release<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        self.readback.release(backend);
        self.tonemap.release(backend);
        self.blur.release(backend);
        self.bright.release(backend);
        self.luminance.release(backend);
        log::info!("Bloom pipeline released after {} frames", self.frame_index);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn settings(&self) -> &ToneMapSettings {
        &self.settings
    }

    /// Settings read by the next [`execute`](Self::execute). Values outside
    /// their ranges are clamped when the frame is recorded.
    pub fn settings_mut(&mut self) -> &mut ToneMapSettings {
        &mut self.settings
    }

    pub fn set_settings(&mut self, settings: ToneMapSettings) {
        self.settings = settings.sanitized();
    }

    /// Final tonemapped image.
    #[must_use]
    pub fn output_texture(&self) -> TextureId {
        self.tonemap.output().texture
    }

    /// The 128² luminance target.
    #[must_use]
    pub fn luminance_texture(&self) -> TextureId {
        self.luminance.first().texture
    }

    /// Luminance chain target by step (0 = 128², 4 = 1×1).
    #[must_use]
    pub fn luminance_target(&self, step: usize) -> Option<&RenderTarget> {
        self.luminance.target(step)
    }

    #[must_use]
    pub fn bright_texture(&self) -> TextureId {
        self.bright.target().texture
    }

    /// Ping-pong slot written by the most recent frame.
    #[must_use]
    pub fn blur_texture(&self) -> TextureId {
        self.blur.result().texture
    }

    /// Most recent completed average-luminance readback.
    #[must_use]
    pub fn average_luminance(&self) -> Option<f32> {
        self.average_luminance
    }

    /// Number of frames executed.
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Ping-pong slot holding the current bloom, written and read by the
    /// frame that just ran. The next frame writes `read_slot().other()`.
    #[must_use]
    pub fn read_slot(&self) -> PingPongSlot {
        self.blur.pair().read_slot()
    }

    /// GPU errors observed by the last frame (or by construction, before the
    /// first frame).
    #[must_use]
    pub fn last_faults(&self) -> &[RuntimeFault] {
        &self.faults
    }

    /// Every framebuffer the pipeline draws through.
    pub fn framebuffers(&self) -> impl Iterator<Item = &Framebuffer> {
        self.luminance
            .framebuffers()
            .iter()
            .chain(std::iter::once(self.bright.framebuffer()))
            .chain(std::iter::once(self.blur.pair().framebuffer()))
            .chain(std::iter::once(self.tonemap.framebuffer()))
    }
}
