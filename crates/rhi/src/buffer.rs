//! GPU buffer descriptions.
//!
//! Buffers are plain handles here: a [`GpuDevice`](crate::GpuDevice) allocates
//! and frees them, and callers decide when that is safe. This keeps the handle
//! `Copy` so it can be captured by deferred release actions.

use ash::vk;
use gpu_allocator::MemoryLocation;

/// Where a buffer's memory lives and who may touch it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryDomain {
    /// Device-local, not mappable. Filled through transfer commands.
    GpuOnly,
    /// Host-visible, written by the CPU and read by the GPU (uniforms, staging).
    CpuToGpu,
    /// Host-visible, written by the GPU and read back by the CPU.
    GpuToCpu,
    /// Host memory used only as a transfer source.
    CpuOnly,
}

impl MemoryDomain {
    /// The gpu-allocator location backing this domain.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            MemoryDomain::GpuOnly => MemoryLocation::GpuOnly,
            MemoryDomain::CpuToGpu => MemoryLocation::CpuToGpu,
            MemoryDomain::GpuToCpu => MemoryLocation::GpuToCpu,
            // gpu-allocator has no host-only location; upload memory is the
            // closest match and is always mapped.
            MemoryDomain::CpuOnly => MemoryLocation::CpuToGpu,
        }
    }

    /// Whether allocations in this domain come back persistently mapped.
    pub fn is_host_visible(self) -> bool {
        !matches!(self, MemoryDomain::GpuOnly)
    }

    /// Returns a human-readable name for logging.
    pub fn name(self) -> &'static str {
        match self {
            MemoryDomain::GpuOnly => "gpu-only",
            MemoryDomain::CpuToGpu => "cpu-to-gpu",
            MemoryDomain::GpuToCpu => "gpu-to-cpu",
            MemoryDomain::CpuOnly => "cpu-only",
        }
    }
}

/// A buffer created by a [`GpuDevice`](crate::GpuDevice).
///
/// The memory behind it is owned by the device's allocator and released by
/// [`GpuDevice::free_buffer`](crate::GpuDevice::free_buffer).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AllocatedBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub domain: MemoryDomain,
}

impl AllocatedBuffer {
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn is_host_visible(&self) -> bool {
        self.domain.is_host_visible()
    }
}
