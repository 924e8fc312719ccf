//! Asynchronous Scalar Readback
//!
//! Copies the 1×1 average-luminance texel to the host without ever waiting
//! on the GPU. The value returned by [`AsyncReadback::download`] is the one
//! requested on an earlier frame.
//!
//! ```text
//! frame N   : poll(slot A) ─ pending ─► return cached
//! frame N+1 : poll(slot A) ─ ready ───► cache, enqueue(slot B), return new
//! ```
//!
//! At most one request is outstanding. Requests alternate between two
//! staging slots so a slot just read is never immediately reused.

use crate::backend::{ReadbackId, ReadbackStatus, RenderBackend, TextureId};
use crate::errors::Result;

use super::Allocations;
use super::ping_pong::PingPongSlot;

/// Returned until the first request completes.
pub const NEUTRAL_LUMINANCE: f32 = 1.0;

pub struct AsyncReadback {
    slots: [ReadbackId; 2],
    /// Slot the next request goes to.
    next: PingPongSlot,
    /// Slot with a request that has not been retrieved yet.
    outstanding: Option<PingPongSlot>,
    last: Option<f32>,
}

impl AsyncReadback {
    /// Allocates both staging slots on `backend`.
    pub fn create<B: RenderBackend + ?Sized>(backend: &mut B) -> Result<Self> {
        let mut allocations = Allocations::default();
        Self::new(backend, &mut allocations).inspect_err(|_| allocations.release(backend))
    }

    pub(crate) fn new<B: RenderBackend + ?Sized>(
        backend: &mut B,
        allocations: &mut Allocations,
    ) -> Result<Self> {
        Ok(Self {
            slots: [
                allocations.readback(backend, "Luminance Readback 0")?,
                allocations.readback(backend, "Luminance Readback 1")?,
            ],
            next: PingPongSlot::First,
            outstanding: None,
            last: None,
        })
    }

    /// Collects a finished request if there is one, issues a new request
    /// for `source` when none is outstanding, and returns the most recent
    /// completed value.
    ///
    /// A request the backend rejects is not tracked; the next call issues a
    /// fresh one on the other slot.
    pub fn download<B: RenderBackend + ?Sized>(&mut self, backend: &mut B, source: TextureId) -> f32 {
        self.collect(backend);

        if self.outstanding.is_none() {
            let slot = self.next;
            self.next = slot.other();
            if backend.enqueue_readback(source, self.slots[slot.index()]) {
                self.outstanding = Some(slot);
            } else {
                log::warn!("Luminance readback on slot {slot:?} was rejected; retrying next frame");
            }
        }

        self.value()
    }

    /// Polls the outstanding request without issuing a new one.
    pub fn collect<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        let Some(slot) = self.outstanding else {
            return;
        };
        match backend.poll_readback(self.slots[slot.index()]) {
            ReadbackStatus::Ready(texel) => {
                self.last = Some(texel.x);
                self.outstanding = None;
            }
            ReadbackStatus::Pending => {}
            ReadbackStatus::Idle => {
                log::warn!("Luminance readback slot {slot:?} lost its request; re-issuing");
                self.outstanding = None;
            }
        }
    }

    /// Drops the in-flight request, if any.
    pub fn discard<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(slot) = self.outstanding.take() {
            log::warn!("Discarding in-flight luminance readback on slot {slot:?}");
            backend.discard_readback(self.slots[slot.index()]);
        }
    }

    /// Last completed value, or [`NEUTRAL_LUMINANCE`].
    #[must_use]
    pub fn value(&self) -> f32 {
        self.last.unwrap_or(NEUTRAL_LUMINANCE)
    }

    /// Last completed value, `None` before the first completes.
    #[must_use]
    pub fn last(&self) -> Option<f32> {
        self.last
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.outstanding.is_some()
    }

    pub fn release<B: RenderBackend + ?Sized>(mut self, backend: &mut B) {
        self.discard(backend);
        for slot in self.slots {
            backend.destroy_readback(slot);
        }
    }
}
