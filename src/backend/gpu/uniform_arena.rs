//! Per-frame dynamic uniform buffer.
//!
//! Every pass's uniform block is appended to one CPU staging area at a
//! stride of `min_uniform_buffer_offset_alignment`, uploaded once at submit,
//! and bound with a dynamic offset. The GPU buffer grows (and is recreated)
//! when a frame needs more room than it has.

use crate::uniforms::UNIFORM_BLOCK_SIZE;

const INITIAL_SLOTS: u64 = 16;

/// Distance between consecutive blocks for a device offset alignment.
fn block_stride(alignment: u32) -> u64 {
    (UNIFORM_BLOCK_SIZE as u64).next_multiple_of(u64::from(alignment.max(1)))
}

pub struct UniformArena {
    stride: u64,
    staging: Vec<u8>,
    buffer: wgpu::Buffer,
    capacity: u64,
}

impl UniformArena {
    pub fn new(device: &wgpu::Device) -> Self {
        let stride = block_stride(device.limits().min_uniform_buffer_offset_alignment);
        let capacity = stride * INITIAL_SLOTS;
        Self {
            stride,
            staging: Vec::with_capacity(capacity as usize),
            buffer: Self::create_buffer(device, capacity),
            capacity,
        }
    }

    fn create_buffer(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Post Uniform Arena"),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Appends one block, returning its dynamic offset.
    pub fn push(&mut self, bytes: &[u8]) -> u32 {
        let offset = self.staging.len();
        self.staging.extend_from_slice(bytes);
        self.staging.resize(offset + self.stride as usize, 0);
        offset as u32
    }

    /// Uploads this frame's blocks. Returns `true` if the buffer was
    /// recreated, which invalidates every bind group referencing it.
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> bool {
        if self.staging.is_empty() {
            return false;
        }

        let needed = self.staging.len() as u64;
        let grown = needed > self.capacity;
        if grown {
            self.capacity = needed.max(self.capacity * 2);
            self.buffer = Self::create_buffer(device, self.capacity);
            log::debug!("Uniform arena grown to {} bytes", self.capacity);
        }

        queue.write_buffer(&self.buffer, 0, &self.staging);
        grown
    }

    pub fn reset(&mut self) {
        self.staging.clear();
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}
