//! Render Targets and Framebuffers
//!
//! A [`RenderTarget`] is a fixed-size texture the pipeline renders into. A
//! [`Framebuffer`] groups targets under numbered color attachment points and
//! must pass [`Framebuffer::check_complete`] before any pass draws through it.

use smallvec::SmallVec;

use crate::backend::{PixelFormat, RenderBackend, TextureDesc, TextureId, Viewport};
use crate::errors::{IncompleteReason, PostError, Result};

/// Edge lengths of the square luminance chain, largest first.
pub const LUMINANCE_SIZES: [u32; 5] = [128, 64, 16, 4, 1];

/// A texture the pipeline owns and renders into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTarget {
    pub texture: TextureId,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl RenderTarget {
    /// Allocates the backing texture.
    pub fn create<B: RenderBackend + ?Sized>(
        backend: &mut B,
        label: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self> {
        let texture = backend.create_texture(&TextureDesc::new(label, width, height, format))?;
        log::debug!("Allocated render target '{label}' {width}x{height} {format:?}");
        Ok(Self {
            texture,
            width,
            height,
            format,
        })
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Viewport covering the whole target.
    #[inline]
    #[must_use]
    pub fn viewport(&self) -> Viewport {
        Viewport::full(self.width, self.height)
    }

    pub fn destroy<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        backend.destroy_texture(self.texture);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Attachment {
    index: u32,
    texture: TextureId,
}

/// Named set of color attachment points.
#[derive(Debug, Clone)]
pub struct Framebuffer {
    label: String,
    attachments: SmallVec<[Attachment; 2]>,
    complete: bool,
}

impl Framebuffer {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            attachments: SmallVec::new(),
            complete: false,
        }
    }

    /// Framebuffer with `target` at attachment 0, already validated.
    pub fn single<B: RenderBackend + ?Sized>(
        backend: &B,
        label: impl Into<String>,
        target: &RenderTarget,
    ) -> Result<Self> {
        let mut framebuffer = Self::new(label);
        framebuffer.attach(0, target.texture);
        framebuffer.check_complete(backend)?;
        Ok(framebuffer)
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Binds `texture` to attachment point `index`.
    ///
    /// Invalidates any earlier completeness check.
    pub fn attach(&mut self, index: u32, texture: TextureId) -> &mut Self {
        self.attachments.push(Attachment { index, texture });
        self.complete = false;
        self
    }

    /// Whether the last [`check_complete`](Self::check_complete) succeeded
    /// and nothing was attached since.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Validates the attachments against the backend.
    pub fn check_complete<B: RenderBackend + ?Sized>(&mut self, backend: &B) -> Result<()> {
        self.complete = false;
        if let Some(reason) = self.incomplete_reason(backend) {
            return Err(PostError::FramebufferIncomplete {
                label: self.label.clone(),
                reason,
            });
        }
        self.complete = true;
        Ok(())
    }

    fn incomplete_reason<B: RenderBackend + ?Sized>(&self, backend: &B) -> Option<IncompleteReason> {
        if self.attachments.is_empty() {
            return Some(IncompleteReason::MissingAttachment);
        }

        let max = backend.max_color_attachments();
        let mut expected = None;
        for (i, attachment) in self.attachments.iter().enumerate() {
            let index = attachment.index;
            if index >= max {
                return Some(IncompleteReason::IndexOutOfRange { index, max });
            }
            if self.attachments[..i].iter().any(|a| a.index == index) {
                return Some(IncompleteReason::DuplicateAttachment { index });
            }

            let Some(desc) = backend.texture_desc(attachment.texture) else {
                return Some(IncompleteReason::UnknownTexture { index });
            };
            if !desc.format.is_color() {
                return Some(IncompleteReason::NotColorRenderable {
                    index,
                    format: desc.format,
                });
            }

            let actual = desc.size();
            match expected {
                None => expected = Some(actual),
                Some(expected) if expected != actual => {
                    return Some(IncompleteReason::DimensionMismatch {
                        index,
                        expected,
                        actual,
                    });
                }
                Some(_) => {}
            }
        }
        None
    }

    /// Texture at attachment `index`, for use as a draw target.
    pub fn draw_target(&self, index: u32) -> Result<TextureId> {
        if !self.complete {
            return Err(PostError::InvalidConfig(format!(
                "framebuffer '{}' used before passing its completeness check",
                self.label
            )));
        }
        self.attachments
            .iter()
            .find(|a| a.index == index)
            .map(|a| a.texture)
            .ok_or_else(|| {
                PostError::InvalidConfig(format!(
                    "framebuffer '{}' has no attachment {index}",
                    self.label
                ))
            })
    }
}
