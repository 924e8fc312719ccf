//! Bloom Pipeline Tests
//!
//! Tests for:
//! - Construction over valid and invalid configurations
//! - All-or-nothing allocation on construction failure
//! - Pass order, targets, and viewports of one frame
//! - Ping-pong selector parity across frames
//! - End-to-end values for a white scene
//! - Runtime fault collection and resource release

use glam::Vec4;

use lumenfx::backend::software::Command;
use lumenfx::curve;
use lumenfx::errors::PostError;
use lumenfx::uniforms::ToneMapUniforms;
use lumenfx::{
    BloomPipeline, PingPongSlot, PipelineConfig, PixelFormat, RenderBackend, ShaderLibrary,
    ShaderStage, SoftwareBackend, TextureDesc, TextureId, Viewport,
};

const EPSILON: f32 = 2e-3;

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

fn approx_rgb(a: Vec4, b: Vec4) -> bool {
    approx(a.x, b.x) && approx(a.y, b.y) && approx(a.z, b.z)
}

fn scene(backend: &mut SoftwareBackend, width: u32, height: u32, color: Vec4) -> TextureId {
    let id = backend
        .create_texture(&TextureDesc::new("Scene", width, height, PixelFormat::Rgba16Float))
        .unwrap();
    backend
        .write_texture(id, &vec![color; (width * height) as usize])
        .unwrap();
    id
}

fn pipeline(backend: &mut SoftwareBackend, config: PipelineConfig) -> BloomPipeline {
    let _ = env_logger::builder().is_test(true).try_init();
    BloomPipeline::new(backend, config, &ShaderLibrary::new()).unwrap()
}

fn uniform(backend: &SoftwareBackend, id: TextureId) -> Vec4 {
    let texels = backend.read_texture(id).unwrap();
    let first = texels[0];
    assert!(
        texels.iter().all(|t| approx_rgb(*t, first)),
        "texture is not uniform"
    );
    first
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn constructs_for_valid_resolutions() {
    for (width, height, factor) in [(64, 64, 2), (128, 96, 2), (64, 32, 4), (2, 2, 1)] {
        let mut backend = SoftwareBackend::new();
        let config = PipelineConfig::new(width, height).with_blur_downsample_factor(factor);
        let pipeline = pipeline(&mut backend, config);

        assert_eq!(pipeline.framebuffers().count(), 8);
        assert!(pipeline.framebuffers().all(|fb| fb.is_complete()));
        assert_eq!(pipeline.frame_index(), 0);
        assert_eq!(pipeline.read_slot(), PingPongSlot::First);
        assert!(pipeline.average_luminance().is_none());
        // 5 luminance + bright + 2 ping-pong + output
        assert_eq!(backend.live_textures(), 9);
        assert_eq!(backend.live_programs(), 5);
        assert_eq!(backend.live_readbacks(), 2);
    }
}

#[test]
fn target_sizes_follow_config() {
    let mut backend = SoftwareBackend::new();
    let pipeline = pipeline(
        &mut backend,
        PipelineConfig::new(96, 64).with_blur_downsample_factor(4),
    );

    let size = |id| backend.texture_desc(id).map(TextureDesc::size);
    assert_eq!(size(pipeline.output_texture()), Some((96, 64)));
    assert_eq!(size(pipeline.bright_texture()), Some((48, 32)));
    assert_eq!(size(pipeline.blur_texture()), Some((24, 16)));
    assert_eq!(size(pipeline.luminance_texture()), Some((128, 128)));
    assert_eq!(pipeline.luminance_target(4).map(|t| t.size()), Some((1, 1)));
    assert!(pipeline.luminance_target(5).is_none());
}

#[test]
fn rejects_invalid_configurations() {
    for config in [
        PipelineConfig::new(0, 64),
        PipelineConfig::new(64, 0),
        PipelineConfig::new(65, 64),
        PipelineConfig::new(64, 64).with_blur_downsample_factor(0),
        PipelineConfig::new(64, 64).with_blur_downsample_factor(3),
    ] {
        let mut backend = SoftwareBackend::new();
        let result = BloomPipeline::new(&mut backend, config, &ShaderLibrary::new());
        assert!(matches!(result, Err(PostError::InvalidConfig(_))));
        assert_eq!(backend.live_textures(), 0);
    }
}

#[test]
fn construction_failure_releases_everything() {
    // Room for the 128² luminance target only.
    let mut backend = SoftwareBackend::new().with_memory_budget(150_000);
    let result = BloomPipeline::new(&mut backend, PipelineConfig::new(64, 64), &ShaderLibrary::new());

    assert!(matches!(result, Err(PostError::ResourceExhausted { .. })));
    assert_eq!(backend.live_textures(), 0);
    assert_eq!(backend.live_programs(), 0);
    assert_eq!(backend.live_readbacks(), 0);
    assert_eq!(backend.memory_used(), 0);
}

#[test]
fn compile_failure_reports_stage() {
    let library = ShaderLibrary::new().with_override(ShaderStage::Tonemap, "{$ include \"post_vert\" $}");
    let mut backend = SoftwareBackend::new();
    let result = BloomPipeline::new(&mut backend, PipelineConfig::new(64, 64), &library);

    match result {
        Err(PostError::ShaderCompile { stage, message }) => {
            assert_eq!(stage, ShaderStage::Tonemap);
            assert!(message.contains("fs_main"), "unexpected message: {message}");
        }
        Err(other) => panic!("expected ShaderCompile, got {other}"),
        Ok(_) => panic!("expected ShaderCompile, got a pipeline"),
    }
    assert_eq!(backend.live_textures(), 0);
    assert_eq!(backend.live_programs(), 0);
}

#[test]
fn compile_error_message_names_the_stage() {
    let err = PostError::ShaderCompile {
        stage: ShaderStage::GaussianBlur,
        message: "boom".to_string(),
    };
    assert!(err.to_string().contains("gaussian_blur"));
    assert!(err.is_configuration_error());
}

// ============================================================================
// Frame Structure
// ============================================================================

#[test]
fn execute_records_passes_in_order_with_exact_viewports() {
    let mut backend = SoftwareBackend::new();
    let mut pipeline = pipeline(
        &mut backend,
        PipelineConfig::new(96, 64).with_blur_downsample_factor(4),
    );
    let scene = scene(&mut backend, 96, 64, Vec4::splat(0.5));
    backend.clear_commands();

    pipeline.execute(&mut backend, scene).unwrap();

    let mut draws = Vec::new();
    let mut kinds = Vec::new();
    for command in backend.commands() {
        match command {
            Command::Draw {
                label, viewport, ..
            } => {
                kinds.push(label.clone());
                draws.push((label.clone(), *viewport));
            }
            Command::Copy { .. } => kinds.push("copy".to_string()),
            Command::Readback { .. } => kinds.push("readback".to_string()),
            Command::Submit => kinds.push("submit".to_string()),
        }
    }

    assert_eq!(
        kinds,
        [
            "Luminance 128x128",
            "Luminance 64x64",
            "Luminance 16x16",
            "Luminance 4x4",
            "Luminance 1x1",
            "readback",
            "Bright Pass",
            "Blur Horizontal",
            "copy",
            "Blur Vertical",
            "Tonemap",
            "submit",
        ]
    );

    let viewports: Vec<Viewport> = draws.iter().map(|(_, v)| *v).collect();
    assert_eq!(
        viewports,
        [
            Viewport::full(128, 128),
            Viewport::full(64, 64),
            Viewport::full(16, 16),
            Viewport::full(4, 4),
            Viewport::full(1, 1),
            Viewport::full(48, 32),
            Viewport::full(24, 16),
            Viewport::full(24, 16),
            Viewport::full(96, 64),
        ]
    );
    assert!(pipeline.last_faults().is_empty());
}

#[test]
fn blur_passes_write_the_write_slot_and_never_sample_it() {
    let mut backend = SoftwareBackend::new();
    let mut pipeline = pipeline(&mut backend, PipelineConfig::new(32, 32));
    let scene = scene(&mut backend, 32, 32, Vec4::ONE);
    backend.clear_commands();

    let before = pipeline.blur_texture();
    pipeline.execute(&mut backend, scene).unwrap();
    let after = pipeline.blur_texture();
    assert_ne!(before, after);

    let mut blur_targets = Vec::new();
    for command in backend.commands() {
        if let Command::Draw {
            stage: ShaderStage::GaussianBlur,
            target,
            textures,
            ..
        } = command
        {
            assert!(textures.iter().all(|b| b.texture != *target));
            blur_targets.push(*target);
        }
        if let Command::Copy { src, dst } = command {
            assert_eq!(*src, after);
            assert_eq!(*dst, before);
        }
    }
    assert_eq!(blur_targets, [after, after]);
}

#[test]
fn read_slot_parity_follows_frame_count() {
    let mut backend = SoftwareBackend::new();
    let mut pipeline = pipeline(&mut backend, PipelineConfig::new(16, 16));
    let scene = scene(&mut backend, 16, 16, Vec4::splat(0.2));

    for n in 1..=7_u64 {
        pipeline.execute(&mut backend, scene).unwrap();
        assert_eq!(pipeline.frame_index(), n);
        assert_eq!(pipeline.read_slot().index() as u64, n % 2);
    }
}

#[test]
fn read_slot_holds_the_frame_just_blurred() {
    let mut backend = SoftwareBackend::new();
    let mut pipeline = pipeline(&mut backend, PipelineConfig::new(16, 16));
    let scene = scene(&mut backend, 16, 16, Vec4::splat(0.2));

    for _ in 0..3 {
        backend.clear_commands();
        let before = pipeline.blur_texture();
        pipeline.execute(&mut backend, scene).unwrap();

        let written = backend
            .commands()
            .iter()
            .rev()
            .find_map(|c| match c {
                Command::Draw { label, target, .. } if label == "Blur Vertical" => Some(*target),
                _ => None,
            })
            .unwrap();
        assert_eq!(pipeline.blur_texture(), written);
        // The next frame writes the other slot, which is the one read before.
        assert_ne!(pipeline.blur_texture(), before);
    }
}

#[test]
fn unknown_scene_is_rejected_before_recording() {
    let mut backend = SoftwareBackend::new();
    let mut pipeline = pipeline(&mut backend, PipelineConfig::new(16, 16));
    let scene = scene(&mut backend, 16, 16, Vec4::ONE);
    backend.destroy_texture(scene);
    backend.clear_commands();

    let result = pipeline.execute(&mut backend, scene);
    assert!(matches!(result, Err(PostError::UnknownTexture(_))));
    assert!(backend.commands().is_empty());
    assert_eq!(pipeline.frame_index(), 0);
}

// ============================================================================
// Values
// ============================================================================

#[test]
fn constant_scene_gives_its_luminance_at_one_texel() {
    for color in [Vec4::splat(0.5), Vec4::new(1.0, 0.5, 0.25, 1.0), Vec4::new(3.0, 2.0, 0.0, 1.0)] {
        let mut backend = SoftwareBackend::new();
        let mut pipeline = pipeline(&mut backend, PipelineConfig::new(40, 30).with_blur_downsample_factor(5));
        let scene = scene(&mut backend, 40, 30, color);

        pipeline.execute(&mut backend, scene).unwrap();

        let expected = curve::luminance(color.truncate());
        let one = pipeline.luminance_target(4).unwrap().texture;
        let texel = backend.texel(one, 0, 0).unwrap();
        assert!(
            (texel.x - expected).abs() < expected * 1e-3 + 1e-4,
            "expected {expected}, got {}",
            texel.x
        );
        assert_eq!(texel.w, 1.0);
    }
}

#[test]
fn white_scene_end_to_end() {
    let mut backend = SoftwareBackend::new();
    let mut pipeline = pipeline(&mut backend, PipelineConfig::new(64, 48));
    let scene = scene(&mut backend, 64, 48, Vec4::ONE);
    let params = ToneMapUniforms::default();

    let output = pipeline.execute(&mut backend, scene).unwrap();
    assert_eq!(output, pipeline.output_texture());

    let bright = uniform(&backend, pipeline.bright_texture());
    let expected_bright = curve::bright_pass(Vec4::ONE, &params);
    assert!(bright.x > 0.1, "bright pass should be non-zero, got {bright}");
    assert!(approx_rgb(bright, expected_bright), "{bright} vs {expected_bright}");

    let blurred = uniform(&backend, pipeline.blur_texture());
    assert!(approx_rgb(blurred, bright), "blur changed a constant field: {blurred} vs {bright}");
    assert_eq!(blurred.w, 1.0);

    let result = uniform(&backend, output);
    let expected = curve::tonemap(Vec4::ONE, blurred, &params);
    assert!(approx_rgb(result, expected), "{result} vs {expected}");
    assert!(result.x > 0.0 && result.x <= 1.0);
}

#[test]
fn dark_scene_produces_no_bloom() {
    let mut backend = SoftwareBackend::new();
    let mut pipeline = pipeline(&mut backend, PipelineConfig::new(32, 32));
    let scene = scene(&mut backend, 32, 32, Vec4::new(0.3, 0.3, 0.3, 1.0));

    pipeline.execute(&mut backend, scene).unwrap();

    assert_eq!(uniform(&backend, pipeline.bright_texture()), Vec4::W);
    assert_eq!(uniform(&backend, pipeline.blur_texture()), Vec4::W);
}

#[test]
fn settings_changes_apply_next_frame() {
    let mut backend = SoftwareBackend::new();
    let mut pipeline = pipeline(&mut backend, PipelineConfig::new(32, 32));
    let scene = scene(&mut backend, 32, 32, Vec4::ONE);

    pipeline.execute(&mut backend, scene).unwrap();
    let low = uniform(&backend, pipeline.output_texture());

    pipeline.settings_mut().set_exposure(1.5);
    pipeline.execute(&mut backend, scene).unwrap();
    let high = uniform(&backend, pipeline.output_texture());

    assert!(high.x > low.x, "{high} should be brighter than {low}");
}

#[test]
fn out_of_range_settings_are_clamped_per_frame() {
    let mut backend = SoftwareBackend::new();
    let mut pipeline = pipeline(&mut backend, PipelineConfig::new(16, 16));
    let scene = scene(&mut backend, 16, 16, Vec4::ONE);

    pipeline.settings_mut().exposure = f32::NAN;
    pipeline.settings_mut().blur_pixels_per_side = 100;
    pipeline.execute(&mut backend, scene).unwrap();

    let output = uniform(&backend, pipeline.output_texture());
    assert!(output.x.is_finite());
}

#[test]
fn rgba8_output_is_quantized() {
    let mut backend = SoftwareBackend::new();
    let config = PipelineConfig {
        output_format: PixelFormat::Rgba8Unorm,
        ..PipelineConfig::new(16, 16)
    };
    let mut pipeline = pipeline(&mut backend, config);
    let scene = scene(&mut backend, 16, 16, Vec4::ONE);

    pipeline.execute(&mut backend, scene).unwrap();

    let texel = uniform(&backend, pipeline.output_texture());
    let steps = texel.x * 255.0;
    assert!((steps - steps.round()).abs() < 1e-4);
}

// ============================================================================
// Faults & Release
// ============================================================================

#[test]
fn check_errors_tags_faults_with_call_site() {
    let mut backend = SoftwareBackend::new();
    let a = scene(&mut backend, 4, 4, Vec4::ONE);
    let b = scene(&mut backend, 2, 2, Vec4::ONE);
    backend.copy_texture(a, b);

    let faults = lumenfx::check_errors!(&mut backend);
    assert_eq!(faults.len(), 1);
    assert!(faults[0].file.ends_with("pipeline_tests.rs"));
    assert!(faults[0].line > 0);
    assert!(lumenfx::check_errors!(&mut backend).is_empty());
}

#[test]
fn release_frees_every_owned_resource() {
    let mut backend = SoftwareBackend::new();
    let mut pipeline = pipeline(&mut backend, PipelineConfig::new(32, 32));
    let scene = scene(&mut backend, 32, 32, Vec4::ONE);
    pipeline.execute(&mut backend, scene).unwrap();

    pipeline.release(&mut backend);

    assert_eq!(backend.live_textures(), 1);
    assert_eq!(backend.live_programs(), 0);
    assert_eq!(backend.live_readbacks(), 0);
}
