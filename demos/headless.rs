//! Headless Bloom Example
//!
//! Runs the bloom pipeline on the default GPU adapter over a synthetic HDR
//! scene: a dim gradient with one bright square. Prints the average
//! luminance as the readback catches up, then ramps the exposure.
//!
//! Usage:
//! - `cargo run --example headless`
//! - `cargo run --example headless -- config.json` to load a `PipelineConfig`

use anyhow::Context;
use glam::Vec4;

use lumenfx::{
    BloomPipeline, PipelineConfig, PixelFormat, RenderBackend, ShaderLibrary, TextureDesc,
    WgpuBackend,
};

const FRAMES: u64 = 8;

fn synthetic_scene(width: u32, height: u32) -> Vec<Vec4> {
    let mut texels = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            let gradient = 0.25 * (x as f32 / width as f32);
            let in_square = (width / 3..width / 2).contains(&x) && (height / 3..height / 2).contains(&y);
            let value = if in_square { 4.0 } else { gradient };
            texels.push(Vec4::new(value, value, value * 0.8, 1.0));
        }
    }
    texels
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let source = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {path}"))?;
            PipelineConfig::from_json(&source)?
        }
        None => PipelineConfig::new(640, 360),
    };

    let mut backend = WgpuBackend::headless()?;
    let mut pipeline = BloomPipeline::new(&mut backend, config.clone(), &ShaderLibrary::new())?;

    let scene = backend.create_texture(&TextureDesc::new(
        "Scene Color",
        config.width,
        config.height,
        PixelFormat::Rgba16Float,
    ))?;
    backend.write_texture(scene, &synthetic_scene(config.width, config.height))?;

    for frame in 0..FRAMES {
        let exposure = 0.25 + 0.25 * frame as f32;
        pipeline.settings_mut().set_exposure(exposure);

        pipeline.execute(&mut backend, scene)?;

        let luminance = pipeline
            .average_luminance()
            .map_or_else(|| "pending".to_string(), |l| format!("{l:.4}"));
        println!(
            "frame {frame}: exposure {exposure:.2}, average luminance {luminance}, read slot {:?}, {} faults",
            pipeline.read_slot(),
            pipeline.last_faults().len()
        );
    }

    pipeline.release(&mut backend);
    backend.destroy_texture(scene);
    Ok(())
}
