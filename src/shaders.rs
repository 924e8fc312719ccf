//! Shader Template Library
//!
//! WGSL sources for the five post-processing stages, embedded with
//! `rust-embed` and assembled with minijinja. Every stage template pulls in
//! the shared full-screen vertex stage with `{$ include "post_vert" $}`;
//! include names resolve to `chunks/{name}.wgsl`.
//!
//! In debug builds the loader prefers the files on disk, so shader edits are
//! picked up without rebuilding.

use std::borrow::Cow;
use std::sync::OnceLock;

use minijinja::{Environment, Error, syntax::SyntaxConfig};
use rust_embed::RustEmbed;
use rustc_hash::FxHashMap;

use crate::errors::{PostError, Result};
use crate::uniforms::UniformKind;

#[derive(RustEmbed)]
#[folder = "src/shaders"]
struct ShaderAssets;

#[cfg(debug_assertions)]
const SHADER_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/src/shaders");

static SHADER_ENV: OnceLock<std::result::Result<Environment<'static>, String>> = OnceLock::new();

fn shader_env() -> std::result::Result<&'static Environment<'static>, &'static str> {
    SHADER_ENV
        .get_or_init(build_env)
        .as_ref()
        .map_err(String::as_str)
}

fn build_env() -> std::result::Result<Environment<'static>, String> {
    let syntax = SyntaxConfig::builder()
        .block_delimiters("{$", "$}")
        .variable_delimiters("{{", "}}")
        .build()
        .map_err(|e| format!("invalid template syntax: {e}"))?;

    let mut env = Environment::new();
    env.set_syntax(syntax);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
    env.set_loader(load_template);
    // `include "post_vert"` always means a shared chunk, whatever includes it.
    env.set_path_join_callback(|name, _parent| format!("chunks/{name}").into());
    Ok(env)
}

/// `passes/post_lum` → `passes/post_lum.wgsl`; names with the extension pass
/// through.
fn template_file(name: &str) -> Cow<'_, str> {
    let has_extension = std::path::Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wgsl"));
    if has_extension {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("{name}.wgsl"))
    }
}

#[cfg(debug_assertions)]
fn read_from_disk(file: &str) -> std::result::Result<Option<String>, Error> {
    let path = std::path::Path::new(SHADER_DIR).join(file);
    if !path.is_file() {
        return Ok(None);
    }
    std::fs::read_to_string(&path).map(Some).map_err(|e| {
        Error::new(
            minijinja::ErrorKind::TemplateNotFound,
            format!("cannot read {}: {e}", path.display()),
        )
    })
}

fn load_template(name: &str) -> std::result::Result<Option<String>, Error> {
    let file = template_file(name);

    #[cfg(debug_assertions)]
    {
        if let Some(source) = read_from_disk(&file)? {
            return Ok(Some(source));
        }
    }

    Ok(ShaderAssets::get(&file)
        .and_then(|asset| String::from_utf8(asset.data.into_owned()).ok()))
}

/// One fragment stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Scene color → Rec.709 luminance at 128².
    LuminanceSample,
    /// Exact box-average downsample of a luminance target.
    LuminanceAverage,
    /// Thresholded, tonemapped bloom seed.
    BrightPass,
    /// One direction of the separable gaussian.
    GaussianBlur,
    /// Scene + bloom compositor.
    Tonemap,
}

impl ShaderStage {
    /// Every stage, in pipeline order.
    pub const ALL: [ShaderStage; 5] = [
        Self::LuminanceSample,
        Self::LuminanceAverage,
        Self::BrightPass,
        Self::GaussianBlur,
        Self::Tonemap,
    ];

    /// Template path under `src/shaders/`.
    #[must_use]
    pub fn template_name(self) -> &'static str {
        match self {
            Self::LuminanceSample => "passes/post_lum",
            Self::LuminanceAverage => "passes/post_lumavg",
            Self::BrightPass => "passes/post_bright",
            Self::GaussianBlur => "passes/gaussian_blur",
            Self::Tonemap => "passes/post_tonemap",
        }
    }

    /// Named texture slots, in binding order.
    #[must_use]
    pub fn texture_slots(self) -> &'static [&'static str] {
        match self {
            Self::LuminanceSample | Self::LuminanceAverage | Self::BrightPass => &["s_texColor"],
            Self::GaussianBlur => &["s_blurTexture"],
            Self::Tonemap => &["s_texColor", "s_texBright"],
        }
    }

    /// Uniform block the stage reads.
    #[must_use]
    pub fn uniform_kind(self) -> UniformKind {
        match self {
            Self::LuminanceSample => UniformKind::None,
            Self::LuminanceAverage => UniformKind::Downsample,
            Self::BrightPass | Self::Tonemap => UniformKind::ToneMap,
            Self::GaussianBlur => UniformKind::Blur,
        }
    }

    /// Binding index of the shared sampler; uniforms follow it.
    #[must_use]
    pub fn sampler_binding(self) -> u32 {
        self.texture_slots().len() as u32
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::LuminanceSample => "luminance_sample",
            Self::LuminanceAverage => "luminance_average",
            Self::BrightPass => "bright_pass",
            Self::GaussianBlur => "gaussian_blur",
            Self::Tonemap => "tonemap",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Produces final WGSL for each stage.
///
/// Overrides replace a stage's template source; they may still use
/// `{$ include $}` to pull in shared chunks.
#[derive(Debug, Clone, Default)]
pub struct ShaderLibrary {
    overrides: FxHashMap<ShaderStage, String>,
}

impl ShaderLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the library with `stage` sourced from `template`.
    #[must_use]
    pub fn with_override(mut self, stage: ShaderStage, template: impl Into<String>) -> Self {
        self.set_override(stage, template);
        self
    }

    pub fn set_override(&mut self, stage: ShaderStage, template: impl Into<String>) {
        self.overrides.insert(stage, template.into());
    }

    pub fn clear_override(&mut self, stage: ShaderStage) {
        self.overrides.remove(&stage);
    }

    /// Renders the final WGSL for `stage`.
    ///
    /// Template errors are reported as a compile failure of that stage.
    pub fn source(&self, stage: ShaderStage) -> Result<String> {
        let compile_error = |message: String| PostError::ShaderCompile { stage, message };

        let env = shader_env().map_err(|e| compile_error(e.to_string()))?;

        let rendered = match self.overrides.get(&stage) {
            Some(template) => env.render_str(template, ()),
            None => env
                .get_template(stage.template_name())
                .and_then(|t| t.render(())),
        };

        rendered.map_err(|e| compile_error(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_stage_renders_with_shared_vertex_stage() {
        let library = ShaderLibrary::new();
        for stage in ShaderStage::ALL {
            let source = library.source(stage).unwrap();
            assert!(source.contains("fn vs_main"), "{stage} lacks vs_main");
            assert!(source.contains("fn fs_main"), "{stage} lacks fs_main");
            assert!(!source.contains("{$"), "{stage} has unexpanded blocks");
        }
    }

    #[test]
    fn texture_slots_appear_in_source() {
        let library = ShaderLibrary::new();
        for stage in ShaderStage::ALL {
            let source = library.source(stage).unwrap();
            for slot in stage.texture_slots() {
                assert!(source.contains(slot), "{stage} lacks {slot}");
            }
        }
    }

    #[test]
    fn template_file_appends_extension_once() {
        assert_eq!(template_file("passes/post_lum"), "passes/post_lum.wgsl");
        assert_eq!(template_file("chunks/post_vert.wgsl"), "chunks/post_vert.wgsl");
    }

    #[test]
    fn cleared_override_restores_embedded_template() {
        let mut library = ShaderLibrary::new();
        let embedded = library.source(ShaderStage::BrightPass).unwrap();

        library.set_override(ShaderStage::BrightPass, "// replaced");
        assert_eq!(library.source(ShaderStage::BrightPass).unwrap().trim(), "// replaced");

        library.clear_override(ShaderStage::BrightPass);
        assert_eq!(library.source(ShaderStage::BrightPass).unwrap(), embedded);
    }

    #[test]
    fn missing_include_is_a_compile_error_of_that_stage() {
        let library = ShaderLibrary::new()
            .with_override(ShaderStage::BrightPass, "{$ include \"no_such_chunk\" $}");
        match library.source(ShaderStage::BrightPass) {
            Err(PostError::ShaderCompile { stage, .. }) => {
                assert_eq!(stage, ShaderStage::BrightPass);
            }
            other => panic!("expected ShaderCompile, got {other:?}"),
        }
    }
}
