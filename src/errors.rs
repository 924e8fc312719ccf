//! Error Types
//!
//! This module defines the error types used throughout the pipeline.
//!
//! # Overview
//!
//! Failures fall into three groups:
//! - **Configuration**: invalid sizes, incomplete framebuffers, shader
//!   compile failures. Fatal at construction time.
//! - **Resource exhaustion**: a GPU allocation that cannot be satisfied.
//!   Fatal, never retried.
//! - **Runtime GPU errors**: anything the device reports after commands were
//!   recorded. These are *not* `PostError`s; they are drained with
//!   [`check_errors!`](crate::check_errors), logged with file/line context
//!   and kept as [`RuntimeFault`]s while execution continues.
//!
//! All fallible public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, PostError>`.

use thiserror::Error;

use crate::backend::RenderBackend;
use crate::shaders::ShaderStage;

/// The main error type for the post-processing pipeline.
#[derive(Error, Debug)]
pub enum PostError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// The requested pipeline configuration cannot be built.
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// A framebuffer failed its completeness check.
    #[error("Framebuffer '{label}' is incomplete: {reason}")]
    FramebufferIncomplete {
        /// Name of the framebuffer
        label: String,
        /// The completeness rule that failed
        reason: IncompleteReason,
    },

    /// A shader stage failed to compile or link.
    #[error("Shader stage '{stage}' failed to compile: {message}")]
    ShaderCompile {
        /// The failing stage
        stage: ShaderStage,
        /// Compiler / template diagnostics
        message: String,
    },

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// A GPU allocation could not be satisfied.
    #[error("GPU resources exhausted while creating '{label}': {message}")]
    ResourceExhausted {
        /// Label of the resource being created
        label: String,
        /// Backend diagnostics
        message: String,
    },

    /// A texture handle does not refer to a live texture.
    #[error("Unknown texture handle passed to {0}")]
    UnknownTexture(String),

    /// Texel data does not match the texture it is written to.
    #[error("Texture upload error: {0}")]
    UploadError(String),

    // ========================================================================
    // Device Errors
    // ========================================================================
    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    // ========================================================================
    // Format & Parsing Errors
    // ========================================================================
    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl PostError {
    /// Returns `true` for errors caused by an unbuildable configuration
    /// (as opposed to device or resource failures).
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_) | Self::FramebufferIncomplete { .. } | Self::ShaderCompile { .. }
        )
    }
}

/// The framebuffer completeness rule that was violated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IncompleteReason {
    /// No color attachment is bound.
    #[error("no attachments")]
    MissingAttachment,

    /// An attachment refers to a destroyed or foreign texture.
    #[error("attachment {index} references an unknown texture")]
    UnknownTexture {
        /// Attachment point
        index: u32,
    },

    /// An attachment's format cannot be rendered to as color.
    #[error("attachment {index} has non color-renderable format {format:?}")]
    NotColorRenderable {
        /// Attachment point
        index: u32,
        /// Offending format
        format: crate::backend::PixelFormat,
    },

    /// Attachments disagree on their dimensions.
    #[error("attachment {index} is {actual:?}, expected {expected:?}")]
    DimensionMismatch {
        /// Attachment point
        index: u32,
        /// Size of the first attachment
        expected: (u32, u32),
        /// Size of this attachment
        actual: (u32, u32),
    },

    /// Attachment point beyond the backend limit.
    #[error("attachment index {index} exceeds the limit of {max}")]
    IndexOutOfRange {
        /// Attachment point
        index: u32,
        /// Backend limit
        max: u32,
    },

    /// The same attachment point is bound twice.
    #[error("attachment index {index} is bound twice")]
    DuplicateAttachment {
        /// Attachment point
        index: u32,
    },
}

/// Alias for `Result<T, PostError>`.
pub type Result<T> = std::result::Result<T, PostError>;

// ============================================================================
// Runtime GPU errors
// ============================================================================

/// A non-fatal GPU error observed after a batch of commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeFault {
    /// Source file of the check that observed the error
    pub file: &'static str,
    /// Source line of the check that observed the error
    pub line: u32,
    /// Backend diagnostics
    pub message: String,
}

impl std::fmt::Display for RuntimeFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.message)
    }
}

/// Drains the backend's pending errors, logging each with the call site.
///
/// Prefer the [`check_errors!`](crate::check_errors) macro, which fills in
/// `file!()` and `line!()`.
pub fn drain_runtime_faults<B: RenderBackend + ?Sized>(
    backend: &mut B,
    file: &'static str,
    line: u32,
) -> Vec<RuntimeFault> {
    backend
        .take_errors()
        .into_iter()
        .map(|message| {
            log::error!("GPU error at {file}:{line}: {message}");
            RuntimeFault {
                file,
                line,
                message,
            }
        })
        .collect()
}

/// Drains and logs runtime GPU errors with the caller's file and line.
///
/// ```rust,ignore
/// let faults = lumenfx::check_errors!(backend);
/// ```
#[macro_export]
macro_rules! check_errors {
    ($backend:expr) => {
        $crate::errors::drain_runtime_faults($backend, file!(), line!())
    };
}
