//! Async Readback Tests
//!
//! Tests for:
//! - Neutral fallback before the first result
//! - One outstanding request at a time, cached value between submits
//! - One-frame latency, standalone and through the pipeline
//! - Discarding an in-flight request
//! - Requests the backend rejects

use glam::Vec4;

use lumenfx::backend::software::Command;
use lumenfx::passes::AsyncReadback;
use lumenfx::passes::readback::NEUTRAL_LUMINANCE;
use lumenfx::{
    BloomPipeline, PipelineConfig, PixelFormat, RenderBackend, ShaderLibrary, SoftwareBackend,
    TextureDesc, TextureId,
};

const EPSILON: f32 = 1e-3;

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

fn pixel(backend: &mut SoftwareBackend, value: f32) -> TextureId {
    let id = backend
        .create_texture(&TextureDesc::new("Pixel", 1, 1, PixelFormat::Rgba16Float))
        .unwrap();
    fill(backend, id, value);
    id
}

fn fill(backend: &mut SoftwareBackend, id: TextureId, value: f32) {
    let (w, h) = backend.texture_desc(id).unwrap().size();
    backend
        .write_texture(id, &vec![Vec4::new(value, value, value, 1.0); (w * h) as usize])
        .unwrap();
}

fn readback_commands(backend: &SoftwareBackend) -> usize {
    backend
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::Readback { .. }))
        .count()
}

// ============================================================================
// AsyncReadback
// ============================================================================

#[test]
fn returns_neutral_value_before_first_result() {
    let mut backend = SoftwareBackend::new();
    let source = pixel(&mut backend, 0.25);
    let mut readback = AsyncReadback::create(&mut backend).unwrap();

    assert_eq!(readback.value(), NEUTRAL_LUMINANCE);
    assert_eq!(readback.download(&mut backend, source), NEUTRAL_LUMINANCE);
    assert!(readback.last().is_none());
    assert!(readback.is_pending());
}

#[test]
fn repeated_download_without_submit_returns_cached_value() {
    let mut backend = SoftwareBackend::new();
    let source = pixel(&mut backend, 0.25);
    let mut readback = AsyncReadback::create(&mut backend).unwrap();

    let first = readback.download(&mut backend, source);
    let second = readback.download(&mut backend, source);
    assert_eq!(first, second);
    assert_eq!(readback_commands(&backend), 1, "only one request may be outstanding");

    backend.submit();
    let third = readback.download(&mut backend, source);
    let fourth = readback.download(&mut backend, source);
    assert!(approx(third, 0.25));
    assert_eq!(third, fourth);
    assert_eq!(readback_commands(&backend), 2);
}

#[test]
fn results_lag_one_submit_behind() {
    let mut backend = SoftwareBackend::new();
    let source = pixel(&mut backend, 0.25);
    let mut readback = AsyncReadback::create(&mut backend).unwrap();

    assert_eq!(readback.download(&mut backend, source), NEUTRAL_LUMINANCE);
    backend.submit();

    fill(&mut backend, source, 0.75);
    assert!(approx(readback.download(&mut backend, source), 0.25));
    backend.submit();

    assert!(approx(readback.download(&mut backend, source), 0.75));
}

#[test]
fn discard_drops_in_flight_request() {
    let mut backend = SoftwareBackend::new();
    let source = pixel(&mut backend, 0.25);
    let mut readback = AsyncReadback::create(&mut backend).unwrap();

    readback.download(&mut backend, source);
    backend.submit();
    readback.discard(&mut backend);
    assert!(!readback.is_pending());

    // The discarded value never arrives; a fresh request is issued instead.
    assert_eq!(readback.download(&mut backend, source), NEUTRAL_LUMINANCE);
    assert!(readback.is_pending());
    backend.submit();
    assert!(approx(readback.download(&mut backend, source), 0.25));
}

#[test]
fn rejected_request_is_not_tracked() {
    let mut backend = SoftwareBackend::new();
    let live = pixel(&mut backend, 0.25);
    let gone = pixel(&mut backend, 0.5);
    backend.destroy_texture(gone);
    let mut readback = AsyncReadback::create(&mut backend).unwrap();

    assert_eq!(readback.download(&mut backend, gone), NEUTRAL_LUMINANCE);
    assert!(!readback.is_pending());
    assert_eq!(readback_commands(&backend), 0);
    assert_eq!(backend.take_errors().len(), 1);

    // The next frame issues a fresh request without losing a frame to it.
    readback.download(&mut backend, live);
    assert!(readback.is_pending());
    backend.submit();
    assert!(approx(readback.download(&mut backend, live), 0.25));
}

#[test]
fn release_frees_both_slots() {
    let mut backend = SoftwareBackend::new();
    let source = pixel(&mut backend, 0.5);
    let mut readback = AsyncReadback::create(&mut backend).unwrap();
    assert_eq!(backend.live_readbacks(), 2);

    readback.download(&mut backend, source);
    readback.release(&mut backend);
    assert_eq!(backend.live_readbacks(), 0);
}

// ============================================================================
// Pipeline Average Luminance
// ============================================================================

#[test]
fn pipeline_average_luminance_lags_one_frame() {
    let mut backend = SoftwareBackend::new();
    let mut pipeline =
        BloomPipeline::new(&mut backend, PipelineConfig::new(32, 32), &ShaderLibrary::new()).unwrap();
    let scene = backend
        .create_texture(&TextureDesc::new("Scene", 32, 32, PixelFormat::Rgba16Float))
        .unwrap();
    fill(&mut backend, scene, 0.5);

    pipeline.execute(&mut backend, scene).unwrap();
    assert!(pipeline.average_luminance().is_none());

    pipeline.execute(&mut backend, scene).unwrap();
    let first = pipeline.average_luminance().unwrap();
    assert!(approx(first, 0.5), "got {first}");

    fill(&mut backend, scene, 0.25);
    pipeline.execute(&mut backend, scene).unwrap();
    assert!(approx(pipeline.average_luminance().unwrap(), 0.5));

    pipeline.execute(&mut backend, scene).unwrap();
    assert!(approx(pipeline.average_luminance().unwrap(), 0.25));
}

#[test]
fn pipeline_discard_restarts_readback() {
    let mut backend = SoftwareBackend::new();
    let mut pipeline =
        BloomPipeline::new(&mut backend, PipelineConfig::new(16, 16), &ShaderLibrary::new()).unwrap();
    let scene = backend
        .create_texture(&TextureDesc::new("Scene", 16, 16, PixelFormat::Rgba16Float))
        .unwrap();
    fill(&mut backend, scene, 0.5);

    pipeline.execute(&mut backend, scene).unwrap();
    pipeline.discard_readback(&mut backend);
    pipeline.execute(&mut backend, scene).unwrap();
    assert!(pipeline.average_luminance().is_none());

    pipeline.execute(&mut backend, scene).unwrap();
    assert!(pipeline.average_luminance().is_some());
}
