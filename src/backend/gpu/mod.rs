//! wgpu Backend
//!
//! Implements [`RenderBackend`] on a `wgpu::Device`.
//!
//! # Recording model
//!
//! Draws, copies, and readback copies are queued as [`PendingOp`]s and
//! encoded into a single command buffer at [`submit`](RenderBackend::submit).
//! Deferring lets every pass's uniform block land in one arena that is
//! uploaded once per frame. Texture uploads go straight to the queue and so
//! take effect before the next submitted frame.
//!
//! # Errors
//!
//! The device's uncaptured-error handler appends to a shared sink. The sink is
//! drained by [`take_errors`](RenderBackend::take_errors); out-of-memory
//! errors observed while allocating turn into
//! [`PostError::ResourceExhausted`].
//!
//! # Caching
//!
//! - Render pipelines are keyed by `(program, target format)`. The format a
//!   program is compiled for is linked eagerly so binding mismatches fail
//!   construction; draws into other formats link lazily at submit.
//! - Bind groups are cached per `(program, bound textures)` and dropped
//!   whenever a texture or program is destroyed, or the uniform arena grows.

mod quad;
mod uniform_arena;

use std::num::NonZeroU64;
use std::sync::Arc;

use glam::Vec4;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::errors::{PostError, Result};
use crate::shaders::ShaderStage;
use crate::uniforms::{UNIFORM_BLOCK_SIZE, UniformKind};

use super::{
    FullscreenPass, PixelFormat, ProgramId, ReadbackId, ReadbackStatus, RenderBackend,
    TextureDesc, TextureId, Viewport,
};
use quad::FullscreenQuad;
use uniform_arena::UniformArena;

const READBACK_BUFFER_SIZE: u64 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64;

impl PixelFormat {
    #[must_use]
    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            Self::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            Self::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            Self::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }

    #[must_use]
    pub fn from_wgpu(format: wgpu::TextureFormat) -> Option<Self> {
        match format {
            wgpu::TextureFormat::Rgba8Unorm => Some(Self::Rgba8Unorm),
            wgpu::TextureFormat::Rgba16Float => Some(Self::Rgba16Float),
            wgpu::TextureFormat::Depth32Float => Some(Self::Depth32Float),
            _ => None,
        }
    }

    fn encode(self, texels: &[Vec4]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(texels.len() * self.bytes_per_pixel() as usize);
        for texel in texels {
            match self {
                Self::Rgba8Unorm => {
                    for c in texel.to_array() {
                        bytes.push((c.clamp(0.0, 1.0) * 255.0).round() as u8);
                    }
                }
                Self::Rgba16Float => {
                    for c in texel.to_array() {
                        bytes.extend_from_slice(&half::f16::from_f32(c).to_le_bytes());
                    }
                }
                Self::Depth32Float => bytes.extend_from_slice(&texel.x.to_le_bytes()),
            }
        }
        bytes
    }

    fn decode_texel(self, bytes: &[u8]) -> Vec4 {
        match self {
            Self::Rgba8Unorm => {
                Vec4::from_array(std::array::from_fn(|i| f32::from(bytes[i]) / 255.0))
            }
            Self::Rgba16Float => Vec4::from_array(std::array::from_fn(|i| {
                half::f16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]).to_f32()
            })),
            Self::Depth32Float => Vec4::new(
                f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
                0.0,
                0.0,
                1.0,
            ),
        }
    }
}

// ============================================================================
// Resources
// ============================================================================

struct GpuTexture {
    desc: TextureDesc,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct GpuProgram {
    stage: ShaderStage,
    module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
}

type MapResult = Arc<Mutex<Option<std::result::Result<(), String>>>>;

enum ReadbackState {
    Idle,
    /// Copy queued, not yet submitted.
    Recorded,
    /// Submitted and mapping.
    Mapping(MapResult),
    /// Mapping, but the result is no longer wanted.
    Discarded(MapResult),
}

struct GpuReadback {
    buffer: wgpu::Buffer,
    format: PixelFormat,
    state: ReadbackState,
}

#[derive(Default)]
struct ErrorSink {
    messages: Vec<String>,
    out_of_memory: bool,
}

enum PendingOp {
    Draw {
        label: String,
        program: ProgramId,
        target: TextureId,
        viewport: Viewport,
        /// Ordered by slot.
        textures: SmallVec<[TextureId; 2]>,
        uniform_offset: Option<u32>,
    },
    Copy {
        src: TextureId,
        dst: TextureId,
    },
    Readback {
        src: TextureId,
        dst: ReadbackId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BindGroupKey {
    program: ProgramId,
    textures: SmallVec<[TextureId; 2]>,
}

/// Diagnostic for a failed device poll; readbacks would otherwise stay
/// pending with no error surfaced.
fn poll_fault(result: std::result::Result<wgpu::PollStatus, wgpu::PollError>) -> Option<String> {
    result.err().map(|e| format!("device poll failed: {e}"))
}

// ============================================================================
// Backend
// ============================================================================

/// [`RenderBackend`] on a wgpu device.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,

    textures: SlotMap<TextureId, GpuTexture>,
    programs: SlotMap<ProgramId, GpuProgram>,
    readbacks: SlotMap<ReadbackId, GpuReadback>,

    // === Shared GPU objects ===
    quad: FullscreenQuad,
    sampler: wgpu::Sampler,
    uniforms: UniformArena,

    // === Caches ===
    pipelines: FxHashMap<(ProgramId, PixelFormat), wgpu::RenderPipeline>,
    bind_groups: FxHashMap<BindGroupKey, wgpu::BindGroup>,

    pending: Vec<PendingOp>,
    errors: Arc<Mutex<ErrorSink>>,
}

impl WgpuBackend {
    /// Wraps an existing device and queue.
    ///
    /// Installs an uncaptured-error handler on the device.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let errors = Arc::new(Mutex::new(ErrorSink::default()));
        let sink = Arc::clone(&errors);
        device.on_uncaptured_error(Arc::new(move |error: wgpu::Error| {
            let mut sink = sink.lock();
            if matches!(error, wgpu::Error::OutOfMemory { .. }) {
                sink.out_of_memory = true;
            }
            sink.messages.push(error.to_string());
        }));

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Post Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            quad: FullscreenQuad::new(&device),
            uniforms: UniformArena::new(&device),
            sampler,
            device,
            queue,
            textures: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            readbacks: SlotMap::with_key(),
            pipelines: FxHashMap::default(),
            bind_groups: FxHashMap::default(),
            pending: Vec::new(),
            errors,
        }
    }

    /// Creates a backend on the default adapter without a surface.
    pub fn headless() -> Result<Self> {
        pollster::block_on(Self::headless_async())
    }

    pub async fn headless_async() -> Result<Self> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| PostError::AdapterRequestFailed(e.to_string()))?;

        log::info!("Using adapter: {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Post Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        Ok(Self::new(device, queue))
    }

    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Adopts a texture rendered by an upstream stage, e.g. the scene color.
    ///
    /// The texture must be 2D, sampleable, and in a supported format.
    pub fn import_texture(&mut self, label: &str, texture: wgpu::Texture) -> Result<TextureId> {
        let format = PixelFormat::from_wgpu(texture.format()).ok_or_else(|| {
            PostError::InvalidConfig(format!(
                "texture '{label}' has unsupported format {:?}",
                texture.format()
            ))
        })?;
        if !texture.usage().contains(wgpu::TextureUsages::TEXTURE_BINDING) {
            return Err(PostError::InvalidConfig(format!(
                "texture '{label}' was not created with TEXTURE_BINDING usage"
            )));
        }

        let desc = TextureDesc::new(label, texture.width(), texture.height(), format);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(self.textures.insert(GpuTexture {
            desc,
            texture,
            view,
        }))
    }

    /// Underlying wgpu texture, e.g. to present the pipeline output.
    #[must_use]
    pub fn wgpu_texture(&self, id: TextureId) -> Option<&wgpu::Texture> {
        self.textures.get(id).map(|t| &t.texture)
    }

    fn take_out_of_memory(&self) -> bool {
        std::mem::take(&mut self.errors.lock().out_of_memory)
    }

    fn push_error(&self, message: String) {
        self.errors.lock().messages.push(message);
    }

    fn create_bind_group_layout(&self, stage: ShaderStage) -> wgpu::BindGroupLayout {
        let mut entries: SmallVec<[wgpu::BindGroupLayoutEntry; 4]> = stage
            .texture_slots()
            .iter()
            .enumerate()
            .map(|(binding, _)| wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            })
            .collect();

        entries.push(wgpu::BindGroupLayoutEntry {
            binding: stage.sampler_binding(),
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });

        if stage.uniform_kind() != UniformKind::None {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: stage.sampler_binding() + 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(UNIFORM_BLOCK_SIZE as u64),
                },
                count: None,
            });
        }

        self.device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{stage} Layout")),
                entries: &entries,
            })
    }

    fn create_pipeline(&self, program: &GpuProgram, format: PixelFormat) -> wgpu::RenderPipeline {
        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&format!("{} Pipeline ({format:?})", program.stage)),
                layout: Some(&program.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &program.module,
                    entry_point: Some("vs_main"),
                    buffers: &[FullscreenQuad::layout()],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: format.to_wgpu(),
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
    }

    fn create_bind_group(&self, key: &BindGroupKey) -> Option<wgpu::BindGroup> {
        let program = self.programs.get(key.program)?;

        let mut entries: SmallVec<[wgpu::BindGroupEntry<'_>; 4]> = SmallVec::new();
        for (binding, id) in key.textures.iter().enumerate() {
            let texture = self.textures.get(*id)?;
            entries.push(wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: program.stage.sampler_binding(),
            resource: wgpu::BindingResource::Sampler(&self.sampler),
        });
        if program.stage.uniform_kind() != UniformKind::None {
            entries.push(wgpu::BindGroupEntry {
                binding: program.stage.sampler_binding() + 1,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: self.uniforms.buffer(),
                    offset: 0,
                    size: NonZeroU64::new(UNIFORM_BLOCK_SIZE as u64),
                }),
            });
        }

        Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Bind Group", program.stage)),
            layout: &program.bind_group_layout,
            entries: &entries,
        }))
    }

    /// Creates every pipeline and bind group the pending draws need.
    fn prepare_pending(&mut self) {
        for op in &self.pending {
            let PendingOp::Draw {
                program, target, textures, ..
            } = op
            else {
                continue;
            };
            let (Some(gpu_program), Some(gpu_target)) =
                (self.programs.get(*program), self.textures.get(*target))
            else {
                continue;
            };

            let pipeline_key = (*program, gpu_target.desc.format);
            if !self.pipelines.contains_key(&pipeline_key) {
                let pipeline = self.create_pipeline(gpu_program, gpu_target.desc.format);
                log::debug!("Created pipeline for {} ({:?})", gpu_program.stage, pipeline_key.1);
                self.pipelines.insert(pipeline_key, pipeline);
            }

            let key = BindGroupKey {
                program: *program,
                textures: textures.clone(),
            };
            if !self.bind_groups.contains_key(&key)
                && let Some(bind_group) = self.create_bind_group(&key)
            {
                self.bind_groups.insert(key, bind_group);
            }
        }
    }

    fn encode_pending(&self, encoder: &mut wgpu::CommandEncoder) {
        for op in &self.pending {
            match op {
                PendingOp::Draw {
                    label,
                    program,
                    target,
                    viewport,
                    textures,
                    uniform_offset,
                } => {
                    let Some(gpu_target) = self.textures.get(*target) else {
                        self.push_error(format!("'{label}': target destroyed before submit"));
                        continue;
                    };
                    let key = BindGroupKey {
                        program: *program,
                        textures: textures.clone(),
                    };
                    let (Some(pipeline), Some(bind_group)) = (
                        self.pipelines.get(&(*program, gpu_target.desc.format)),
                        self.bind_groups.get(&key),
                    ) else {
                        self.push_error(format!("'{label}': resources destroyed before submit"));
                        continue;
                    };

                    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some(label.as_str()),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: &gpu_target.view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Load,
                                store: wgpu::StoreOp::Store,
                            },
                            depth_slice: None,
                        })],
                        ..Default::default()
                    });

                    pass.set_viewport(
                        viewport.x as f32,
                        viewport.y as f32,
                        viewport.width as f32,
                        viewport.height as f32,
                        0.0,
                        1.0,
                    );
                    pass.set_pipeline(pipeline);
                    match uniform_offset {
                        Some(offset) => pass.set_bind_group(0, bind_group, &[*offset]),
                        None => pass.set_bind_group(0, bind_group, &[]),
                    }
                    self.quad.draw(&mut pass);
                }
                PendingOp::Copy { src, dst } => {
                    let (Some(src), Some(dst)) = (self.textures.get(*src), self.textures.get(*dst))
                    else {
                        self.push_error("copy_texture: texture destroyed before submit".to_string());
                        continue;
                    };
                    encoder.copy_texture_to_texture(
                        src.texture.as_image_copy(),
                        dst.texture.as_image_copy(),
                        src.texture.size(),
                    );
                }
                PendingOp::Readback { src, dst } => {
                    let (Some(src), Some(dst)) = (self.textures.get(*src), self.readbacks.get(*dst))
                    else {
                        self.push_error("readback: resource destroyed before submit".to_string());
                        continue;
                    };
                    encoder.copy_texture_to_buffer(
                        src.texture.as_image_copy(),
                        wgpu::TexelCopyBufferInfo {
                            buffer: &dst.buffer,
                            layout: wgpu::TexelCopyBufferLayout {
                                offset: 0,
                                bytes_per_row: Some(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT),
                                rows_per_image: Some(1),
                            },
                        },
                        wgpu::Extent3d {
                            width: 1,
                            height: 1,
                            depth_or_array_layers: 1,
                        },
                    );
                }
            }
        }
    }
}

impl RenderBackend for WgpuBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(PostError::ResourceExhausted {
                label: desc.label.clone(),
                message: format!(
                    "size {}x{} outside the device range 1..={max}",
                    desc.width, desc.height
                ),
            });
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format.to_wgpu(),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        if self.take_out_of_memory() {
            texture.destroy();
            return Err(PostError::ResourceExhausted {
                label: desc.label.clone(),
                message: "device out of memory".to_string(),
            });
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(self.textures.insert(GpuTexture {
            desc: desc.clone(),
            texture,
            view,
        }))
    }

    fn destroy_texture(&mut self, id: TextureId) {
        if self.textures.remove(id).is_some() {
            self.bind_groups.clear();
        }
    }

    fn texture_desc(&self, id: TextureId) -> Option<&TextureDesc> {
        self.textures.get(id).map(|t| &t.desc)
    }

    fn write_texture(&mut self, id: TextureId, texels: &[Vec4]) -> Result<()> {
        let texture = self
            .textures
            .get(id)
            .ok_or_else(|| PostError::UnknownTexture("write_texture".to_string()))?;
        let desc = &texture.desc;
        let expected = (desc.width * desc.height) as usize;
        if texels.len() != expected {
            return Err(PostError::UploadError(format!(
                "'{}' holds {expected} texels, got {}",
                desc.label,
                texels.len()
            )));
        }

        let data = desc.format.encode(texels);
        self.queue.write_texture(
            texture.texture.as_image_copy(),
            &data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(desc.width * desc.format.bytes_per_pixel()),
                rows_per_image: Some(desc.height),
            },
            texture.texture.size(),
        );
        Ok(())
    }

    fn max_color_attachments(&self) -> u32 {
        self.device.limits().max_color_attachments
    }

    fn compile_program(
        &mut self,
        stage: ShaderStage,
        source: &str,
        format: PixelFormat,
    ) -> Result<ProgramId> {
        // Everything from module parsing to pipeline linking reports into
        // this scope instead of the uncaptured-error sink.
        let scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("Post Shader {stage}")),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let bind_group_layout = self.create_bind_group_layout(stage);
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("{stage} Pipeline Layout")),
                bind_group_layouts: &[Some(&bind_group_layout)],
                immediate_size: 0,
            });
        let program = GpuProgram {
            stage,
            module,
            bind_group_layout,
            pipeline_layout,
        };
        let pipeline = self.create_pipeline(&program, format);

        let info = pollster::block_on(program.module.get_compilation_info());
        let scope_error = pollster::block_on(scope.pop());

        let mut diagnostics: Vec<String> = info
            .messages
            .iter()
            .filter(|m| matches!(m.message_type, wgpu::CompilationMessageType::Error))
            .map(|m| m.message.clone())
            .collect();
        if let Some(error) = scope_error {
            diagnostics.push(error.to_string());
        }
        if !diagnostics.is_empty() {
            return Err(PostError::ShaderCompile {
                stage,
                message: diagnostics.join("\n"),
            });
        }

        let id = self.programs.insert(program);
        self.pipelines.insert((id, format), pipeline);
        log::debug!("Linked {stage} for {format:?} targets");
        Ok(id)
    }

    fn destroy_program(&mut self, id: ProgramId) {
        if self.programs.remove(id).is_some() {
            self.pipelines.retain(|(program, _), _| *program != id);
            self.bind_groups.clear();
        }
    }

    fn draw_fullscreen(&mut self, pass: &FullscreenPass<'_>) {
        let Some(program) = self.programs.get(pass.program) else {
            self.push_error(format!("'{}': unknown program", pass.label));
            return;
        };
        let stage = program.stage;
        if pass.uniforms.kind() != stage.uniform_kind() {
            self.push_error(format!(
                "'{}': stage {stage} expects {:?} uniforms",
                pass.label,
                stage.uniform_kind()
            ));
            return;
        }
        let Some(target) = self.textures.get(pass.target) else {
            self.push_error(format!("'{}': unknown target texture", pass.label));
            return;
        };
        if !target.desc.format.is_color() || !pass.viewport.fits(target.desc.width, target.desc.height) {
            self.push_error(format!(
                "'{}': invalid target or viewport {:?}",
                pass.label, pass.viewport
            ));
            return;
        }

        let mut bindings: SmallVec<[_; 2]> = pass.textures.iter().copied().collect();
        bindings.sort_by_key(|b| b.slot);
        if bindings.len() != stage.texture_slots().len()
            || bindings.iter().enumerate().any(|(i, b)| b.slot as usize != i)
        {
            self.push_error(format!(
                "'{}': stage {stage} needs textures for {:?}",
                pass.label,
                stage.texture_slots()
            ));
            return;
        }

        let uniform_offset = pass.uniforms.as_bytes().map(|bytes| self.uniforms.push(bytes));
        self.pending.push(PendingOp::Draw {
            label: pass.label.to_string(),
            program: pass.program,
            target: pass.target,
            viewport: pass.viewport,
            textures: bindings.iter().map(|b| b.texture).collect(),
            uniform_offset,
        });
    }

    fn copy_texture(&mut self, src: TextureId, dst: TextureId) {
        self.pending.push(PendingOp::Copy { src, dst });
    }

    fn create_readback(&mut self, label: &str) -> Result<ReadbackId> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: READBACK_BUFFER_SIZE,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        if self.take_out_of_memory() {
            return Err(PostError::ResourceExhausted {
                label: label.to_string(),
                message: "device out of memory".to_string(),
            });
        }
        Ok(self.readbacks.insert(GpuReadback {
            buffer,
            format: PixelFormat::Rgba16Float,
            state: ReadbackState::Idle,
        }))
    }

    fn destroy_readback(&mut self, id: ReadbackId) {
        self.readbacks.remove(id);
    }

    fn enqueue_readback(&mut self, src: TextureId, dst: ReadbackId) -> bool {
        let Some(format) = self.textures.get(src).map(|t| t.desc.format) else {
            self.push_error("enqueue_readback: unknown source texture".to_string());
            return false;
        };
        let Some(slot) = self.readbacks.get_mut(dst) else {
            self.push_error("enqueue_readback: unknown readback slot".to_string());
            return false;
        };

        // A discarded mapping that has since finished frees the slot.
        let finished = match &slot.state {
            ReadbackState::Discarded(result) => result.lock().take(),
            _ => None,
        };
        if let Some(outcome) = finished {
            if outcome.is_ok() {
                slot.buffer.unmap();
            }
            slot.state = ReadbackState::Idle;
        }

        if !matches!(slot.state, ReadbackState::Idle) {
            self.push_error("enqueue_readback: slot is busy".to_string());
            return false;
        }
        slot.state = ReadbackState::Recorded;
        slot.format = format;
        self.pending.push(PendingOp::Readback { src, dst });
        true
    }

    fn poll_readback(&mut self, id: ReadbackId) -> ReadbackStatus {
        if let Some(message) = poll_fault(self.device.poll(wgpu::PollType::Poll)) {
            self.push_error(message);
        }

        let Some(slot) = self.readbacks.get_mut(id) else {
            return ReadbackStatus::Idle;
        };
        let outcome = match &slot.state {
            ReadbackState::Idle | ReadbackState::Discarded(_) => return ReadbackStatus::Idle,
            ReadbackState::Recorded => return ReadbackStatus::Pending,
            ReadbackState::Mapping(result) => match result.lock().take() {
                None => return ReadbackStatus::Pending,
                Some(outcome) => outcome,
            },
        };
        slot.state = ReadbackState::Idle;

        match outcome {
            Ok(()) => {
                let texel = {
                    let view = slot.buffer.slice(..).get_mapped_range();
                    slot.format.decode_texel(&view)
                };
                slot.buffer.unmap();
                ReadbackStatus::Ready(texel)
            }
            Err(message) => {
                self.push_error(format!("readback mapping failed: {message}"));
                ReadbackStatus::Idle
            }
        }
    }

    fn discard_readback(&mut self, id: ReadbackId) {
        let Some(slot) = self.readbacks.get_mut(id) else {
            return;
        };
        slot.state = match std::mem::replace(&mut slot.state, ReadbackState::Idle) {
            ReadbackState::Mapping(result) => ReadbackState::Discarded(result),
            ReadbackState::Discarded(result) => ReadbackState::Discarded(result),
            ReadbackState::Idle | ReadbackState::Recorded => ReadbackState::Idle,
        };
    }

    fn submit(&mut self) {
        if self.uniforms.upload(&self.device, &self.queue) {
            self.bind_groups.clear();
        }
        self.prepare_pending();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Post Encoder"),
            });
        self.encode_pending(&mut encoder);
        self.queue.submit(std::iter::once(encoder.finish()));

        self.pending.clear();
        self.uniforms.reset();

        for slot in self.readbacks.values_mut() {
            if matches!(slot.state, ReadbackState::Recorded) {
                let result: MapResult = Arc::new(Mutex::new(None));
                let callback_result = Arc::clone(&result);
                slot.buffer
                    .slice(..)
                    .map_async(wgpu::MapMode::Read, move |outcome| {
                        *callback_result.lock() = Some(outcome.map_err(|e| e.to_string()));
                    });
                slot.state = ReadbackState::Mapping(result);
            }
        }
    }

    fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors.lock().messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMATS: [PixelFormat; 3] = [
        PixelFormat::Rgba8Unorm,
        PixelFormat::Rgba16Float,
        PixelFormat::Depth32Float,
    ];

    #[test]
    fn wgpu_format_mapping_is_invertible() {
        for format in FORMATS {
            assert_eq!(PixelFormat::from_wgpu(format.to_wgpu()), Some(format));
        }
        assert_eq!(PixelFormat::from_wgpu(wgpu::TextureFormat::Bgra8Unorm), None);
    }

    #[test]
    fn encoded_size_matches_bytes_per_pixel() {
        let texels = [Vec4::new(0.25, 0.5, 0.75, 1.0); 3];
        for format in FORMATS {
            let bytes = format.encode(&texels);
            assert_eq!(bytes.len(), 3 * format.bytes_per_pixel() as usize);
        }
    }

    #[test]
    fn rgba16_float_round_trip_matches_quantize() {
        let values = [
            Vec4::new(0.0, 1.0, 0.5, 1.0),
            Vec4::new(2.1035, 0.3, 1e-3, 1.0),
            Vec4::new(65000.0, 0.1, 7.25, 0.0),
        ];
        for value in values {
            let bytes = PixelFormat::Rgba16Float.encode(&[value]);
            let decoded = PixelFormat::Rgba16Float.decode_texel(&bytes);
            assert_eq!(decoded, PixelFormat::Rgba16Float.quantize(value));
        }
    }

    #[test]
    fn rgba8_unorm_round_trip_clamps_and_rounds() {
        let value = Vec4::new(-0.5, 0.5, 1.5, 1.0);
        let bytes = PixelFormat::Rgba8Unorm.encode(&[value]);
        assert_eq!(bytes, vec![0, 128, 255, 255]);

        let decoded = PixelFormat::Rgba8Unorm.decode_texel(&bytes);
        assert_eq!(decoded, PixelFormat::Rgba8Unorm.quantize(value));
    }

    #[test]
    fn failed_poll_becomes_an_error() {
        assert_eq!(poll_fault(Ok(wgpu::PollStatus::Poll)), None);
        assert_eq!(poll_fault(Ok(wgpu::PollStatus::QueueEmpty)), None);

        let message = poll_fault(Err(wgpu::PollError::Timeout)).unwrap();
        assert!(message.starts_with("device poll failed: "), "{message}");
    }

    #[test]
    fn readback_decodes_first_texel_of_padded_row() {
        let mut row = PixelFormat::Rgba16Float.encode(&[Vec4::new(0.75, 0.75, 0.75, 1.0)]);
        row.resize(READBACK_BUFFER_SIZE as usize, 0xff);
        let texel = PixelFormat::Rgba16Float.decode_texel(&row);
        assert_eq!(texel, Vec4::new(0.75, 0.75, 0.75, 1.0));
    }
}
