//! The device seam every higher layer records and allocates through.
//!
//! [`GpuDevice`] mirrors the slice of `ash::Device` (plus the allocator and the
//! swapchain) that the frame loop needs, using `ash::vk` handle types so that
//! handles flow unchanged between the Vulkan backend and callers. Two
//! implementations exist: [`VulkanDevice`](crate::vulkan::VulkanDevice) and,
//! behind the `dummy` feature, [`DummyDevice`](crate::dummy::DummyDevice).
//!
//! All methods take `&self`. Command recording methods (`cmd_*`) mirror their
//! Vulkan counterparts and are infallible; a wrong handle is a caller bug.

use std::time::Duration;

use ash::vk;

use crate::buffer::{AllocatedBuffer, MemoryDomain};
use crate::descriptor::DescriptorWrite;
use crate::error::RhiResult;
use crate::image::{AllocatedImage, ImageBarrier, ImageBlit, ImageDesc};
use crate::pipeline::GraphicsPipelineDesc;
use crate::rendering::RenderingConfig;

/// Result of asking the swapchain for the next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is available. `suboptimal` means presentation still works but
    /// the swapchain no longer matches the surface exactly.
    Acquired { image_index: u32, suboptimal: bool },
    /// The surface changed; nothing was acquired and no semaphore will signal.
    OutOfDate,
    /// No image became available within the timeout.
    Timeout,
}

/// Result of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the swapchain should be recreated before the next frame.
    pub fn needs_resize(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// Semaphores and fence attached to a single queue submission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubmitSync {
    /// Semaphore to wait on, and the stage that waits on it.
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags2)>,
    /// Semaphore to signal when the commands complete.
    pub signal: Option<vk::Semaphore>,
    /// Fence to signal when the commands complete. May be null.
    pub fence: vk::Fence,
}

impl SubmitSync {
    /// Only a fence, as used by immediate submissions.
    pub fn fence_only(fence: vk::Fence) -> Self {
        Self {
            wait: None,
            signal: None,
            fence,
        }
    }
}

/// GPU queue, synchronization, descriptor, pipeline, memory and presentation
/// primitives.
pub trait GpuDevice: Send + Sync + 'static {
    // =========================================================================
    // Synchronization
    // =========================================================================

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;

    fn destroy_fence(&self, fence: vk::Fence);

    /// Block until `fence` signals or `timeout` elapses.
    ///
    /// Returns `Ok(true)` when the fence signaled and `Ok(false)` on timeout.
    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> RhiResult<bool>;

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()>;

    fn fence_signaled(&self, fence: vk::Fence) -> RhiResult<bool>;

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;

    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // =========================================================================
    // Command pools and buffers
    // =========================================================================

    /// Create a command pool on the graphics queue family whose buffers can
    /// be reset individually.
    fn create_command_pool(&self) -> RhiResult<vk::CommandPool>;

    fn destroy_command_pool(&self, pool: vk::CommandPool);

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RhiResult<vk::CommandBuffer>;

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;

    /// Begin recording for a single submission.
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;

    // =========================================================================
    // Command recording
    // =========================================================================

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, config: &RenderingConfig);

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer);

    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport);

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D);

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier);

    fn cmd_blit_image(&self, cmd: vk::CommandBuffer, blit: &ImageBlit);

    fn cmd_clear_color_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: [f32; 4],
    );

    // =========================================================================
    // Queue
    // =========================================================================

    /// Submit one command buffer to the graphics queue.
    fn submit(&self, cmd: vk::CommandBuffer, sync: &SubmitSync) -> RhiResult<()>;

    /// Block until every queue is idle.
    fn wait_idle(&self) -> RhiResult<()>;

    // =========================================================================
    // Descriptors
    // =========================================================================

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RhiResult<vk::DescriptorSetLayout>;

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool>;

    /// Return every set allocated from `pool` to it. Handles from the pool
    /// become invalid.
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RhiResult<()>;

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    /// Allocate one set. Pool exhaustion surfaces as
    /// `RhiError::VulkanError(ERROR_OUT_OF_POOL_MEMORY | ERROR_FRAGMENTED_POOL)`.
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet>;

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]);

    // =========================================================================
    // Pipelines
    // =========================================================================

    /// Create a shader module from SPIR-V words.
    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule>;

    fn destroy_shader_module(&self, module: vk::ShaderModule);

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<vk::PipelineLayout>;

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);

    /// Create a graphics pipeline for dynamic rendering. The shader modules
    /// may be destroyed once this returns.
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> RhiResult<vk::Pipeline>;

    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // =========================================================================
    // Memory
    // =========================================================================

    fn allocate_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        domain: MemoryDomain,
    ) -> RhiResult<AllocatedBuffer>;

    /// Release a buffer and its memory. The GPU must be done with it.
    fn free_buffer(&self, buffer: AllocatedBuffer);

    /// Copy `data` into a host-visible buffer at `offset`.
    fn write_buffer(&self, buffer: &AllocatedBuffer, offset: u64, data: &[u8]) -> RhiResult<()>;

    fn buffer_device_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress;

    /// Create a device-local image and a view over all of its mip levels.
    fn allocate_image(&self, desc: &ImageDesc) -> RhiResult<AllocatedImage>;

    /// Release an image, its view and its memory. The GPU must be done with it.
    fn free_image(&self, image: AllocatedImage);

    fn create_sampler(&self, filter: vk::Filter) -> RhiResult<vk::Sampler>;

    fn destroy_sampler(&self, sampler: vk::Sampler);

    // =========================================================================
    // Presentation
    // =========================================================================

    /// Request the next swapchain image, signaling `semaphore` once it is
    /// ready for rendering.
    fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout: Duration,
    ) -> RhiResult<AcquireOutcome>;

    /// Queue `image_index` for presentation after `wait` signals.
    fn present(&self, image_index: u32, wait: vk::Semaphore) -> RhiResult<PresentOutcome>;

    fn swapchain_image(&self, image_index: u32) -> RhiResult<vk::Image>;

    fn swapchain_extent(&self) -> vk::Extent2D;

    /// Rebuild the swapchain for a new surface size. The caller must have
    /// waited for the device to go idle.
    fn recreate_swapchain(&self, width: u32, height: u32) -> RhiResult<()>;
}
