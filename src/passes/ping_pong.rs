//! Ping-pong render target pair.

use crate::backend::{PixelFormat, RenderBackend};
use crate::errors::Result;
use crate::targets::{Framebuffer, RenderTarget};

use super::Allocations;

/// Which of the two targets is currently read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PingPongSlot {
    #[default]
    First,
    Second,
}

impl PingPongSlot {
    #[inline]
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }

    /// `0` or `1`; also the framebuffer attachment point of the slot.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
        }
    }
}

/// Two same-sized targets sharing one framebuffer (attachments 0 and 1).
///
/// The write slot is always the one not being read. [`flip`](Self::flip)
/// swaps them.
pub struct PingPongPair {
    targets: [RenderTarget; 2],
    framebuffer: Framebuffer,
    read: PingPongSlot,
}

impl PingPongPair {
    pub(crate) fn new<B: RenderBackend + ?Sized>(
        backend: &mut B,
        allocations: &mut Allocations,
        label: &str,
        size: (u32, u32),
        format: PixelFormat,
    ) -> Result<Self> {
        let first = allocations.target(backend, &format!("{label} 0"), size, format)?;
        let second = allocations.target(backend, &format!("{label} 1"), size, format)?;

        let mut framebuffer = Framebuffer::new(label);
        framebuffer
            .attach(0, first.texture)
            .attach(1, second.texture);
        framebuffer.check_complete(backend)?;

        Ok(Self {
            targets: [first, second],
            framebuffer,
            read: PingPongSlot::First,
        })
    }

    #[inline]
    #[must_use]
    pub fn read_slot(&self) -> PingPongSlot {
        self.read
    }

    #[inline]
    #[must_use]
    pub fn write_slot(&self) -> PingPongSlot {
        self.read.other()
    }

    #[must_use]
    pub fn target(&self, slot: PingPongSlot) -> &RenderTarget {
        &self.targets[slot.index()]
    }

    #[must_use]
    pub fn read_target(&self) -> &RenderTarget {
        self.target(self.read_slot())
    }

    #[must_use]
    pub fn write_target(&self) -> &RenderTarget {
        self.target(self.write_slot())
    }

    #[must_use]
    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    pub fn flip(&mut self) {
        self.read = self.read.other();
    }

    pub fn release<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        for target in self.targets {
            target.destroy(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_other_is_involution() {
        for slot in [PingPongSlot::First, PingPongSlot::Second] {
            assert_ne!(slot.other(), slot);
            assert_eq!(slot.other().other(), slot);
        }
        assert_eq!(PingPongSlot::default().index(), 0);
        assert_eq!(PingPongSlot::Second.index(), 1);
    }
}
