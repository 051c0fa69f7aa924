//! Command pool ownership and command recording.
//!
//! - [`CommandPool`] owns a command pool and allocates primary buffers from it
//! - [`CommandBuffer`] borrows a device and records commands into one buffer
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ember_rhi::GpuDevice;
//! use ember_rhi::command::{CommandBuffer, CommandPool};
//!
//! # fn example<D: GpuDevice>(device: Arc<D>) -> Result<(), ember_rhi::RhiError> {
//! let pool = CommandPool::new(device.clone())?;
//! let handle = pool.allocate_command_buffer()?;
//!
//! let cmd = CommandBuffer::new(&*device, handle);
//! cmd.begin()?;
//! // ... record rendering commands ...
//! cmd.end()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use tracing::debug;

use crate::error::RhiResult;
use crate::gpu::GpuDevice;
use crate::image::{ImageBarrier, ImageBlit};
use crate::rendering::RenderingConfig;

/// Owned command pool on the graphics queue family.
///
/// Buffers allocated from the pool are freed with it.
pub struct CommandPool<D: GpuDevice> {
    device: Arc<D>,
    pool: vk::CommandPool,
}

impl<D: GpuDevice> CommandPool<D> {
    /// Creates a pool whose buffers can be reset individually.
    pub fn new(device: Arc<D>) -> RhiResult<Self> {
        let pool = device.create_command_pool()?;
        debug!("Command pool created");
        Ok(Self { device, pool })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocates a primary command buffer from this pool.
    pub fn allocate_command_buffer(&self) -> RhiResult<vk::CommandBuffer> {
        self.device.allocate_command_buffer(self.pool)
    }

    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }
}

impl<D: GpuDevice> Drop for CommandPool<D> {
    fn drop(&mut self) {
        self.device.destroy_command_pool(self.pool);
        debug!("Command pool destroyed");
    }
}

/// Records commands into a buffer through a borrowed device.
///
/// The wrapper does not own the handle; the pool it came from does.
pub struct CommandBuffer<'a, D: GpuDevice + ?Sized> {
    device: &'a D,
    buffer: vk::CommandBuffer,
}

impl<'a, D: GpuDevice + ?Sized> CommandBuffer<'a, D> {
    #[inline]
    pub fn new(device: &'a D, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    #[inline]
    pub fn device(&self) -> &'a D {
        self.device
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begins recording for a single submission.
    pub fn begin(&self) -> RhiResult<()> {
        self.device.begin_command_buffer(self.buffer)
    }

    pub fn end(&self) -> RhiResult<()> {
        self.device.end_command_buffer(self.buffer)
    }

    /// Returns the buffer to the initial state so it can be re-recorded.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_command_buffer(self.buffer)
    }

    // =========================================================================
    // Dynamic Rendering
    // =========================================================================

    pub fn begin_rendering(&self, config: &RenderingConfig) {
        self.device.cmd_begin_rendering(self.buffer, config);
    }

    pub fn end_rendering(&self) {
        self.device.cmd_end_rendering(self.buffer);
    }

    // =========================================================================
    // Binding
    // =========================================================================

    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.device.cmd_bind_pipeline(self.buffer, bind_point, pipeline);
    }

    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.device
            .cmd_bind_descriptor_sets(self.buffer, bind_point, layout, first_set, sets);
    }

    pub fn bind_index_buffer(
        &self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.device
            .cmd_bind_index_buffer(self.buffer, buffer, offset, index_type);
    }

    // =========================================================================
    // Dynamic State
    // =========================================================================

    pub fn set_viewport(&self, viewport: vk::Viewport) {
        self.device.cmd_set_viewport(self.buffer, viewport);
    }

    pub fn set_scissor(&self, scissor: vk::Rect2D) {
        self.device.cmd_set_scissor(self.buffer, scissor);
    }

    // =========================================================================
    // Drawing
    // =========================================================================

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.device.cmd_draw_indexed(
            self.buffer,
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        );
    }

    // =========================================================================
    // Push Constants
    // =========================================================================

    /// Pushes a plain-old-data value at `offset`.
    pub fn push_constants<T: Pod>(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &T,
    ) {
        self.device.cmd_push_constants(
            self.buffer,
            layout,
            stages,
            offset,
            bytemuck::bytes_of(data),
        );
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    pub fn image_barrier(&self, barrier: &ImageBarrier) {
        self.device.cmd_image_barrier(self.buffer, barrier);
    }

    /// Moves every mip level of `image` from `old_layout` to `new_layout`.
    pub fn transition_image(
        &self,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        self.image_barrier(&ImageBarrier::whole(image, old_layout, new_layout));
    }

    // =========================================================================
    // Transfer
    // =========================================================================

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.device.cmd_copy_buffer(self.buffer, src, dst, regions);
    }

    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.device
            .cmd_copy_buffer_to_image(self.buffer, src, dst, dst_layout, regions);
    }

    pub fn blit_image(&self, blit: &ImageBlit) {
        self.device.cmd_blit_image(self.buffer, blit);
    }

    /// Copies mip 0 of `src` (in `TRANSFER_SRC_OPTIMAL`) over mip 0 of `dst`
    /// (in `TRANSFER_DST_OPTIMAL`), scaling with linear filtering.
    pub fn copy_image_to_image(
        &self,
        src: vk::Image,
        dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    ) {
        self.blit_image(&ImageBlit::full(src, src_extent, dst, dst_extent));
    }

    // =========================================================================
    // Clear
    // =========================================================================

    pub fn clear_color_image(&self, image: vk::Image, layout: vk::ImageLayout, color: [f32; 4]) {
        self.device
            .cmd_clear_color_image(self.buffer, image, layout, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::{Command, DummyDevice};

    #[test]
    fn test_pool_is_destroyed_on_drop() {
        let device = Arc::new(DummyDevice::new());
        {
            let pool = CommandPool::new(device.clone()).unwrap();
            pool.allocate_command_buffer().unwrap();
            assert_eq!(device.live_command_pools(), 1);
        }
        assert_eq!(device.live_command_pools(), 0);
    }

    #[test]
    fn test_recording_forwards_to_device() {
        let device = Arc::new(DummyDevice::new());
        let pool = CommandPool::new(device.clone()).unwrap();
        let cmd = CommandBuffer::new(&*device, pool.allocate_command_buffer().unwrap());

        cmd.begin().unwrap();
        cmd.transition_image(
            vk::Image::null(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
        );
        cmd.draw_indexed(6, 1, 0, 0, 0);
        cmd.end().unwrap();

        let commands = device.recorded(cmd.handle());
        assert_eq!(commands.len(), 2);
        assert!(matches!(
            commands[0],
            Command::ImageBarrier {
                new_layout: vk::ImageLayout::GENERAL,
                ..
            }
        ));
        assert_eq!(
            commands[1],
            Command::DrawIndexed {
                index_count: 6,
                first_index: 0
            }
        );
    }

    #[test]
    fn test_push_constants_records_bytes() {
        let device = Arc::new(DummyDevice::new());
        let pool = CommandPool::new(device.clone()).unwrap();
        let cmd = CommandBuffer::new(&*device, pool.allocate_command_buffer().unwrap());

        cmd.begin().unwrap();
        cmd.push_constants(
            vk::PipelineLayout::null(),
            vk::ShaderStageFlags::VERTEX,
            0,
            &[1.0f32, 2.0],
        );

        let commands = device.recorded(cmd.handle());
        assert!(matches!(
            &commands[0],
            Command::PushConstants { size: 8, offset: 0, .. }
        ));
    }

    #[test]
    fn test_command_pool_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandPool<DummyDevice>>();
    }
}
