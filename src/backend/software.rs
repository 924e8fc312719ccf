//! CPU Reference Backend
//!
//! Executes every stage on the CPU with the same math as the WGSL (see
//! [`crate::curve`]). Draws run immediately when recorded, so the results of
//! all earlier commands are always visible to later ones; only readback
//! honours the submit boundary.
//!
//! Besides texel access the backend keeps a log of every recorded command,
//! which tests use to check pass order, targets, and viewports.
//!
//! Values written to a texture are rounded to what its format stores
//! (`Rgba16Float` goes through `half::f16`).

use glam::{Vec2, Vec4};
use slotmap::SlotMap;

use crate::curve;
use crate::errors::{PostError, Result};
use crate::shaders::ShaderStage;
use crate::uniforms::{BlurUniforms, DownsampleUniforms, PassUniforms};

use super::{
    FullscreenPass, PixelFormat, ProgramId, ReadbackId, ReadbackStatus, RenderBackend, TextureBinding,
    TextureDesc, TextureId, Viewport,
};

struct SoftTexture {
    desc: TextureDesc,
    texels: Vec<Vec4>,
}

impl SoftTexture {
    fn load(&self, x: i64, y: i64) -> Vec4 {
        let w = i64::from(self.desc.width);
        let h = i64::from(self.desc.height);
        let x = x.clamp(0, w - 1);
        let y = y.clamp(0, h - 1);
        self.texels[(y * w + x) as usize]
    }

    /// Bilinear, clamp-to-edge.
    fn sample(&self, uv: Vec2) -> Vec4 {
        let x = uv.x * self.desc.width as f32 - 0.5;
        let y = uv.y * self.desc.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let top = self.load(x0, y0).lerp(self.load(x0 + 1, y0), fx);
        let bottom = self.load(x0, y0 + 1).lerp(self.load(x0 + 1, y0 + 1), fx);
        top.lerp(bottom, fy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ReadbackSlot {
    Idle,
    /// Copy recorded, not yet submitted.
    Recorded(Vec4),
    /// Submitted; the next poll delivers it.
    InFlight(Vec4),
}

/// A command as recorded, for inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Draw {
        label: String,
        stage: ShaderStage,
        target: TextureId,
        viewport: Viewport,
        textures: Vec<TextureBinding>,
    },
    Copy {
        src: TextureId,
        dst: TextureId,
    },
    Readback {
        src: TextureId,
    },
    Submit,
}

/// CPU implementation of [`RenderBackend`].
pub struct SoftwareBackend {
    textures: SlotMap<TextureId, SoftTexture>,
    programs: SlotMap<ProgramId, ShaderStage>,
    readbacks: SlotMap<ReadbackId, ReadbackSlot>,

    commands: Vec<Command>,
    errors: Vec<String>,

    memory_budget: Option<u64>,
    memory_used: u64,
    max_color_attachments: u32,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            textures: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            readbacks: SlotMap::with_key(),
            commands: Vec::new(),
            errors: Vec::new(),
            memory_budget: None,
            memory_used: 0,
            max_color_attachments: 8,
        }
    }

    /// Limits total texture memory; allocations beyond it fail with
    /// [`PostError::ResourceExhausted`].
    #[must_use]
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_max_color_attachments(mut self, max: u32) -> Self {
        self.max_color_attachments = max;
        self
    }

    /// Full contents of a texture, row-major.
    #[must_use]
    pub fn read_texture(&self, id: TextureId) -> Option<&[Vec4]> {
        self.textures.get(id).map(|t| t.texels.as_slice())
    }

    #[must_use]
    pub fn texel(&self, id: TextureId, x: u32, y: u32) -> Option<Vec4> {
        let texture = self.textures.get(id)?;
        if x >= texture.desc.width || y >= texture.desc.height {
            return None;
        }
        Some(texture.texels[(y * texture.desc.width + x) as usize])
    }

    /// Every command recorded since creation or the last
    /// [`clear_commands`](Self::clear_commands).
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    #[must_use]
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    #[must_use]
    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn live_readbacks(&self) -> usize {
        self.readbacks.len()
    }

    #[must_use]
    pub fn memory_used(&self) -> u64 {
        self.memory_used
    }

    /// Checks a draw against the live resources; `Err` holds the diagnostic.
    fn validate_draw(&self, pass: &FullscreenPass<'_>) -> std::result::Result<ShaderStage, String> {
        let label = pass.label;
        let stage = *self
            .programs
            .get(pass.program)
            .ok_or_else(|| format!("'{label}': unknown program"))?;
        let target = self
            .textures
            .get(pass.target)
            .ok_or_else(|| format!("'{label}': unknown target texture"))?;

        if !target.desc.format.is_color() {
            return Err(format!("'{label}': target is not color-renderable"));
        }
        if !pass.viewport.fits(target.desc.width, target.desc.height) {
            return Err(format!(
                "'{label}': viewport {:?} exceeds target {}x{}",
                pass.viewport, target.desc.width, target.desc.height
            ));
        }

        let slots = stage.texture_slots().len();
        if pass.textures.len() != slots {
            return Err(format!(
                "'{label}': stage {stage} expects {slots} textures, got {}",
                pass.textures.len()
            ));
        }
        for binding in pass.textures {
            if binding.slot as usize >= slots {
                return Err(format!("'{label}': no texture slot {}", binding.slot));
            }
            if binding.texture == pass.target {
                return Err(format!(
                    "'{label}': texture bound to slot {} is also the render target",
                    binding.slot
                ));
            }
            if !self.textures.contains_key(binding.texture) {
                return Err(format!("'{label}': slot {} references an unknown texture", binding.slot));
            }
        }

        if pass.uniforms.kind() != stage.uniform_kind() {
            return Err(format!(
                "'{label}': stage {stage} expects {:?} uniforms, got {:?}",
                stage.uniform_kind(),
                pass.uniforms.kind()
            ));
        }
        Ok(stage)
    }

    fn bound(&self, pass: &FullscreenPass<'_>, slot: u32) -> Option<&SoftTexture> {
        pass.textures
            .iter()
            .find(|b| b.slot == slot)
            .and_then(|b| self.textures.get(b.texture))
    }

    fn shade(&self, stage: ShaderStage, pass: &FullscreenPass<'_>) -> Option<Vec<Vec4>> {
        let source = self.bound(pass, 0)?;
        let viewport = pass.viewport;
        let size = Vec2::new(viewport.width as f32, viewport.height as f32);

        let mut out = Vec::with_capacity((viewport.width * viewport.height) as usize);
        let pixels = (viewport.y..viewport.y + viewport.height)
            .flat_map(|y| (viewport.x..viewport.x + viewport.width).map(move |x| (x, y)));

        match (stage, pass.uniforms) {
            (ShaderStage::LuminanceSample, PassUniforms::None) => {
                for (x, y) in pixels {
                    let lum = curve::luminance(source.sample(uv(x, y, viewport, size)).truncate());
                    out.push(Vec4::new(lum, lum, lum, 1.0));
                }
            }
            (ShaderStage::LuminanceAverage, PassUniforms::Downsample(u)) => {
                for (x, y) in pixels {
                    out.push(box_average(source, x, y, &u));
                }
            }
            (ShaderStage::BrightPass, PassUniforms::ToneMap(u)) => {
                for (x, y) in pixels {
                    out.push(curve::bright_pass(source.sample(uv(x, y, viewport, size)), &u));
                }
            }
            (ShaderStage::GaussianBlur, PassUniforms::Blur(u)) => {
                let weights = curve::gaussian_weights(u.sigma, u.pixels_per_side as u32);
                for (x, y) in pixels {
                    out.push(blur(source, uv(x, y, viewport, size), &u, &weights));
                }
            }
            (ShaderStage::Tonemap, PassUniforms::ToneMap(u)) => {
                let bloom = self.bound(pass, 1)?;
                for (x, y) in pixels {
                    let uv = uv(x, y, viewport, size);
                    out.push(curve::tonemap(source.sample(uv), bloom.sample(uv), &u));
                }
            }
            _ => return None,
        }
        Some(out)
    }
}

fn uv(x: u32, y: u32, viewport: Viewport, size: Vec2) -> Vec2 {
    Vec2::new((x - viewport.x) as f32 + 0.5, (y - viewport.y) as f32 + 0.5) / size
}

/// Exact mean over `[x * Ws / Wd, (x + 1) * Ws / Wd)`, matching `post_lumavg.wgsl`.
fn box_average(source: &SoftTexture, x: u32, y: u32, u: &DownsampleUniforms) -> Vec4 {
    let dst_w = (u.target_size[0] as u32).max(1);
    let dst_h = (u.target_size[1] as u32).max(1);
    let (src_w, src_h) = source.desc.size();

    let x0 = x * src_w / dst_w;
    let y0 = y * src_h / dst_h;
    let x1 = ((x + 1) * src_w / dst_w).max(x0 + 1);
    let y1 = ((y + 1) * src_h / dst_h).max(y0 + 1);

    let mut sum = glam::Vec3::ZERO;
    for sy in y0..y1 {
        for sx in x0..x1 {
            sum += source.load(i64::from(sx), i64::from(sy)).truncate();
        }
    }
    (sum / ((x1 - x0) * (y1 - y0)) as f32).extend(1.0)
}

fn blur(source: &SoftTexture, uv: Vec2, u: &BlurUniforms, weights: &[f32]) -> Vec4 {
    let step = Vec2::from_array(u.direction) * u.blur_size;
    let n = (weights.len() / 2) as i32;
    let sum = (-n..=n)
        .zip(weights)
        .map(|(i, w)| source.sample(uv + step * i as f32).truncate() * *w)
        .sum::<glam::Vec3>();
    sum.extend(1.0)
}

fn shader_error(stage: ShaderStage, message: impl Into<String>) -> PostError {
    PostError::ShaderCompile {
        stage,
        message: message.into(),
    }
}

impl RenderBackend for SoftwareBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        if desc.width == 0 || desc.height == 0 {
            return Err(PostError::InvalidConfig(format!(
                "texture '{}' has zero size {}x{}",
                desc.label, desc.width, desc.height
            )));
        }
        let bytes = desc.byte_size();
        if let Some(budget) = self.memory_budget
            && self.memory_used + bytes > budget
        {
            return Err(PostError::ResourceExhausted {
                label: desc.label.clone(),
                message: format!(
                    "{bytes} bytes requested, {} of {budget} in use",
                    self.memory_used
                ),
            });
        }

        self.memory_used += bytes;
        let fill = desc.format.quantize(Vec4::ZERO);
        let texels = vec![fill; (desc.width * desc.height) as usize];
        Ok(self.textures.insert(SoftTexture {
            desc: desc.clone(),
            texels,
        }))
    }

    fn destroy_texture(&mut self, id: TextureId) {
        if let Some(texture) = self.textures.remove(id) {
            self.memory_used -= texture.desc.byte_size();
        }
    }

    fn texture_desc(&self, id: TextureId) -> Option<&TextureDesc> {
        self.textures.get(id).map(|t| &t.desc)
    }

    fn write_texture(&mut self, id: TextureId, texels: &[Vec4]) -> Result<()> {
        let texture = self
            .textures
            .get_mut(id)
            .ok_or_else(|| PostError::UnknownTexture("write_texture".to_string()))?;
        if texels.len() != texture.texels.len() {
            return Err(PostError::UploadError(format!(
                "'{}' holds {} texels, got {}",
                texture.desc.label,
                texture.texels.len(),
                texels.len()
            )));
        }
        let format = texture.desc.format;
        for (dst, src) in texture.texels.iter_mut().zip(texels) {
            *dst = format.quantize(*src);
        }
        Ok(())
    }

    fn max_color_attachments(&self) -> u32 {
        self.max_color_attachments
    }

    fn compile_program(
        &mut self,
        stage: ShaderStage,
        source: &str,
        format: PixelFormat,
    ) -> Result<ProgramId> {
        if !format.is_color() {
            return Err(shader_error(stage, format!("cannot link for {format:?} targets")));
        }
        for entry in ["fn vs_main", "fn fs_main"] {
            if !source.contains(entry) {
                return Err(shader_error(stage, format!("missing entry point `{entry}`")));
            }
        }
        for slot in stage.texture_slots() {
            if !source.contains(slot) {
                return Err(shader_error(stage, format!("missing texture slot `{slot}`")));
            }
        }
        Ok(self.programs.insert(stage))
    }

    fn destroy_program(&mut self, id: ProgramId) {
        self.programs.remove(id);
    }

    fn draw_fullscreen(&mut self, pass: &FullscreenPass<'_>) {
        let stage = match self.validate_draw(pass) {
            Ok(stage) => stage,
            Err(message) => {
                self.errors.push(message);
                return;
            }
        };

        self.commands.push(Command::Draw {
            label: pass.label.to_string(),
            stage,
            target: pass.target,
            viewport: pass.viewport,
            textures: pass.textures.to_vec(),
        });

        let Some(shaded) = self.shade(stage, pass) else {
            self.errors.push(format!("'{}': stage {stage} could not run", pass.label));
            return;
        };

        let Some(target) = self.textures.get_mut(pass.target) else {
            return;
        };
        let format = target.desc.format;
        let width = target.desc.width;
        let viewport = pass.viewport;
        let rows = (viewport.y..viewport.y + viewport.height)
            .flat_map(|y| (viewport.x..viewport.x + viewport.width).map(move |x| (x, y)));
        for ((x, y), value) in rows.zip(shaded) {
            target.texels[(y * width + x) as usize] = format.quantize(value);
        }
    }

    fn copy_texture(&mut self, src: TextureId, dst: TextureId) {
        let (Some(source), Some(dest)) = (self.textures.get(src), self.textures.get(dst)) else {
            self.errors.push("copy_texture: unknown texture".to_string());
            return;
        };
        if source.desc.size() != dest.desc.size() || source.desc.format != dest.desc.format {
            self.errors.push(format!(
                "copy_texture: '{}' and '{}' differ in size or format",
                source.desc.label, dest.desc.label
            ));
            return;
        }
        if src == dst {
            self.errors.push("copy_texture: source and destination are the same".to_string());
            return;
        }

        let texels = source.texels.clone();
        if let Some(dest) = self.textures.get_mut(dst) {
            dest.texels = texels;
        }
        self.commands.push(Command::Copy { src, dst });
    }

    fn create_readback(&mut self, _label: &str) -> Result<ReadbackId> {
        Ok(self.readbacks.insert(ReadbackSlot::Idle))
    }

    fn destroy_readback(&mut self, id: ReadbackId) {
        self.readbacks.remove(id);
    }

    fn enqueue_readback(&mut self, src: TextureId, dst: ReadbackId) -> bool {
        let Some(texel) = self.texel(src, 0, 0) else {
            self.errors.push("enqueue_readback: unknown source texture".to_string());
            return false;
        };
        let error = match self.readbacks.get_mut(dst) {
            Some(slot) if *slot == ReadbackSlot::Idle => {
                *slot = ReadbackSlot::Recorded(texel);
                None
            }
            Some(_) => Some("enqueue_readback: slot is busy"),
            None => Some("enqueue_readback: unknown readback slot"),
        };
        if let Some(message) = error {
            self.errors.push(message.to_string());
            return false;
        }
        self.commands.push(Command::Readback { src });
        true
    }

    fn poll_readback(&mut self, id: ReadbackId) -> ReadbackStatus {
        match self.readbacks.get_mut(id) {
            Some(slot) => match *slot {
                ReadbackSlot::Idle => ReadbackStatus::Idle,
                ReadbackSlot::Recorded(_) => ReadbackStatus::Pending,
                ReadbackSlot::InFlight(value) => {
                    *slot = ReadbackSlot::Idle;
                    ReadbackStatus::Ready(value)
                }
            },
            None => ReadbackStatus::Idle,
        }
    }

    fn discard_readback(&mut self, id: ReadbackId) {
        if let Some(slot) = self.readbacks.get_mut(id) {
            *slot = ReadbackSlot::Idle;
        }
    }

    fn submit(&mut self) {
        for slot in self.readbacks.values_mut() {
            if let ReadbackSlot::Recorded(value) = *slot {
                *slot = ReadbackSlot::InFlight(value);
            }
        }
        self.commands.push(Command::Submit);
    }

    fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }
}
