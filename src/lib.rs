#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! HDR bloom and tonemapping post-processing.
//!
//! The crate composes a fixed chain of full-screen GPU passes over a scene
//! color texture:
//!
//! ```text
//! scene color ──► luminance 128² → 64² → 16² → 4² → 1² ──► async readback
//!      │
//!      ├──► bright pass (½ res) ──► gaussian blur ping-pong (H, V)
//!      │                                        │
//!      └────────────────► tonemap compositor ◄──┘ ──► output
//! ```
//!
//! All GPU work goes through the [`RenderBackend`] trait. [`WgpuBackend`]
//! drives a real device; [`SoftwareBackend`] executes the same stage math on
//! the CPU and is what the test suite runs against.

pub mod backend;
pub mod curve;
pub mod errors;
pub mod passes;
pub mod pipeline;
pub mod settings;
pub mod shaders;
pub mod targets;
pub mod uniforms;

pub use backend::software::SoftwareBackend;
pub use backend::gpu::WgpuBackend;
pub use backend::{PixelFormat, RenderBackend, TextureDesc, TextureId, Viewport};
pub use errors::{PostError, Result, RuntimeFault};
pub use passes::ping_pong::PingPongSlot;
pub use pipeline::BloomPipeline;
pub use settings::{PipelineConfig, ToneMapSettings};
pub use shaders::{ShaderLibrary, ShaderStage};
