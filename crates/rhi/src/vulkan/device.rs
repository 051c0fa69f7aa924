//! [`GpuDevice`] implementation on `ash` and `gpu-allocator`.
//!
//! The device owns the logical device, the allocator, the per-handle
//! allocations and the swapchain. Buffers and images are tracked by handle so
//! callers can pass plain `Copy` descriptions around and free them later.

use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use tracing::{debug, error, info, warn};

use crate::buffer::{AllocatedBuffer, MemoryDomain};
use crate::descriptor::DescriptorWrite;
use crate::error::{RhiError, RhiResult};
use crate::gpu::{AcquireOutcome, GpuDevice, PresentOutcome, SubmitSync};
use crate::image::{AllocatedImage, ImageBarrier, ImageBlit, ImageDesc};
use crate::pipeline::GraphicsPipelineDesc;
use crate::rendering::RenderingConfig;

use super::instance::Instance;
use super::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, select_physical_device};
use super::swapchain::{Swapchain, SwapchainContext};

const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Logical device, allocator and swapchain for one window surface.
pub struct VulkanDevice {
    instance: Arc<Instance>,
    device: ash::Device,
    physical_device: PhysicalDeviceInfo,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    /// Serializes access to the queues, which Vulkan requires externally.
    queue_lock: Mutex<()>,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    buffer_allocations: Mutex<HashMap<vk::Buffer, Allocation>>,
    image_allocations: Mutex<HashMap<vk::Image, Allocation>>,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    swapchain: Mutex<Swapchain>,
    vsync: bool,
}

impl VulkanDevice {
    /// Selects a GPU for `surface`, creates the logical device and the
    /// allocator, and builds an initial swapchain of `width` x `height`.
    ///
    /// `surface` must outlive the device.
    pub fn new(
        instance: Arc<Instance>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> RhiResult<Self> {
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        let physical_device = select_physical_device(instance.handle(), surface, &surface_loader)?;
        let queue_families = physical_device.queue_families;
        let (graphics_family, present_family) =
            match (queue_families.graphics_family, queue_families.present_family) {
                (Some(graphics), Some(present)) => (graphics, present),
                _ => return Err(RhiError::NoSuitableGpu),
            };

        let queue_priorities = [1.0f32];
        let unique_families = queue_families.unique_families();
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default()
            .buffer_device_address(true)
            .descriptor_indexing(true);
        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device.device, &create_info, None)?
        };
        info!(
            "Logical device created on '{}' with {} queue famil(ies)",
            physical_device.device_name(),
            unique_families.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device.device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;
        debug!("GPU memory allocator initialized");

        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), &device);
        let swapchain = Swapchain::new(
            &SwapchainContext {
                device: &device,
                loader: &swapchain_loader,
                surface_loader: &surface_loader,
                physical_device: physical_device.device,
                surface,
                queue_families,
                vsync,
            },
            width,
            height,
        )?;

        Ok(Self {
            instance,
            device,
            physical_device,
            graphics_queue,
            present_queue,
            queue_lock: Mutex::new(()),
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            buffer_allocations: Mutex::new(HashMap::new()),
            image_allocations: Mutex::new(HashMap::new()),
            surface_loader,
            swapchain_loader,
            surface,
            swapchain: Mutex::new(swapchain),
            vsync,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    #[inline]
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    #[inline]
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.physical_device.queue_families
    }

    pub fn swapchain_format(&self) -> vk::Format {
        lock(&self.swapchain).format()
    }

    fn swapchain_context(&self) -> SwapchainContext<'_> {
        SwapchainContext {
            device: &self.device,
            loader: &self.swapchain_loader,
            surface_loader: &self.surface_loader,
            physical_device: self.physical_device.device,
            surface: self.surface,
            queue_families: self.physical_device.queue_families,
            vsync: self.vsync,
        }
    }

    fn allocate_memory(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> RhiResult<Allocation> {
        Ok(lock(&self.allocator).allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?)
    }

    fn release_memory(&self, allocation: Allocation) {
        if let Err(e) = lock(&self.allocator).free(allocation) {
            error!("Failed to free GPU allocation: {:?}", e);
        }
    }
}

impl GpuDevice for VulkanDevice {
    // =========================================================================
    // Synchronization
    // =========================================================================

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        Ok(unsafe { self.device.create_fence(&create_info, None)? })
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> RhiResult<bool> {
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        unsafe { self.device.reset_fences(&[fence])? };
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> RhiResult<bool> {
        Ok(unsafe { self.device.get_fence_status(fence)? })
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.device.create_semaphore(&create_info, None)? })
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    // =========================================================================
    // Command pools and buffers
    // =========================================================================

    fn create_command_pool(&self) -> RhiResult<vk::CommandPool> {
        let family = self
            .physical_device
            .queue_families
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        Ok(unsafe { self.device.create_command_pool(&create_info, None)? })
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RhiResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info)? };
        buffers
            .into_iter()
            .next()
            .ok_or(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_HOST_MEMORY))
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?
        };
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info)? };
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        unsafe { self.device.end_command_buffer(cmd)? };
        Ok(())
    }

    // =========================================================================
    // Command recording
    // =========================================================================

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, config: &RenderingConfig) {
        let bundle = config.build();
        unsafe { self.device.cmd_begin_rendering(cmd, &bundle.info()) };
    }

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_rendering(cmd) };
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe { self.device.cmd_bind_pipeline(cmd, bind_point, pipeline) };
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(cmd, bind_point, layout, first_set, sets, &[])
        };
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.device.cmd_set_viewport(cmd, 0, &[viewport]) };
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(cmd, 0, &[scissor]) };
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(cmd, buffer, offset, index_type)
        };
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device
                .cmd_push_constants(cmd, layout, stages, offset, data)
        };
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, regions) };
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(cmd, src, dst, dst_layout, regions)
        };
    }

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        // Full pipeline barrier; simple and correct, not tuned per transition.
        let image_barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
            .old_layout(barrier.old_layout)
            .new_layout(barrier.new_layout)
            .subresource_range(barrier.subresource_range())
            .image(barrier.image);
        let barriers = [image_barrier];
        let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe { self.device.cmd_pipeline_barrier2(cmd, &dependency) };
    }

    fn cmd_blit_image(&self, cmd: vk::CommandBuffer, blit: &ImageBlit) {
        let corner = |extent: vk::Extent2D| vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        };
        let layers = |mip: u32| vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: mip,
            base_array_layer: 0,
            layer_count: 1,
        };
        let region = vk::ImageBlit2::default()
            .src_offsets([vk::Offset3D::default(), corner(blit.src_extent)])
            .dst_offsets([vk::Offset3D::default(), corner(blit.dst_extent)])
            .src_subresource(layers(blit.src_mip))
            .dst_subresource(layers(blit.dst_mip));
        let regions = [region];
        let blit_info = vk::BlitImageInfo2::default()
            .src_image(blit.src)
            .src_image_layout(blit.src_layout)
            .dst_image(blit.dst)
            .dst_image_layout(blit.dst_layout)
            .filter(vk::Filter::LINEAR)
            .regions(&regions);
        unsafe { self.device.cmd_blit_image2(cmd, &blit_info) };
    }

    fn cmd_clear_color_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: [f32; 4],
    ) {
        let clear = vk::ClearColorValue { float32: color };
        let range = ImageBarrier::whole(image, layout, layout).subresource_range();
        unsafe {
            self.device
                .cmd_clear_color_image(cmd, image, layout, &clear, &[range])
        };
    }

    // =========================================================================
    // Queue
    // =========================================================================

    fn submit(&self, cmd: vk::CommandBuffer, sync: &SubmitSync) -> RhiResult<()> {
        let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
        let wait_infos: Vec<vk::SemaphoreSubmitInfo> = sync
            .wait
            .map(|(semaphore, stage)| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(stage)
                    .value(1)
            })
            .into_iter()
            .collect();
        let signal_infos: Vec<vk::SemaphoreSubmitInfo> = sync
            .signal
            .map(|semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_GRAPHICS)
                    .value(1)
            })
            .into_iter()
            .collect();

        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(&cmd_infos)
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos);

        let _queue = lock(&self.queue_lock);
        unsafe {
            self.device
                .queue_submit2(self.graphics_queue, &[submit_info], sync.fence)?
        };
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let _queue = lock(&self.queue_lock);
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    // =========================================================================
    // Descriptors
    // =========================================================================

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RhiResult<vk::DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        Ok(unsafe { self.device.create_descriptor_set_layout(&create_info, None)? })
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(sizes);
        Ok(unsafe { self.device.create_descriptor_pool(&create_info, None)? })
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RhiResult<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())?
        };
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info)? };
        sets.into_iter()
            .next()
            .ok_or(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = writes
            .iter()
            .filter_map(|write| match *write {
                DescriptorWrite::Buffer {
                    buffer,
                    offset,
                    range,
                    ..
                } => Some(vk::DescriptorBufferInfo {
                    buffer,
                    offset,
                    range,
                }),
                DescriptorWrite::Image { .. } => None,
            })
            .collect();
        let image_infos: Vec<vk::DescriptorImageInfo> = writes
            .iter()
            .filter_map(|write| match *write {
                DescriptorWrite::Image {
                    view,
                    sampler,
                    layout,
                    ..
                } => Some(vk::DescriptorImageInfo {
                    sampler,
                    image_view: view,
                    image_layout: layout,
                }),
                DescriptorWrite::Buffer { .. } => None,
            })
            .collect();

        let mut buffer_index = 0;
        let mut image_index = 0;
        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .map(|write| match *write {
                DescriptorWrite::Buffer { binding, kind, .. } => {
                    let info = std::slice::from_ref(&buffer_infos[buffer_index]);
                    buffer_index += 1;
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(binding)
                        .descriptor_type(kind)
                        .buffer_info(info)
                }
                DescriptorWrite::Image { binding, kind, .. } => {
                    let info = std::slice::from_ref(&image_infos[image_index]);
                    image_index += 1;
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(binding)
                        .descriptor_type(kind)
                        .image_info(info)
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    // =========================================================================
    // Pipelines
    // =========================================================================

    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        Ok(unsafe { self.device.create_shader_module(&create_info, None)? })
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) };
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<vk::PipelineLayout> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        let layout = unsafe { self.device.create_pipeline_layout(&create_info, None)? };
        debug!(
            "Created pipeline layout with {} set layout(s) and {} push constant range(s)",
            set_layouts.len(),
            push_constant_ranges.len()
        );
        Ok(layout)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> RhiResult<vk::Pipeline> {
        desc.validate()?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(desc.vertex_shader)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(desc.fragment_shader)
                .name(c"main"),
        ];

        // Vertices are pulled through a buffer device address.
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(desc.topology)
            .primitive_restart_enable(false);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(desc.polygon_mode)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face);
        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);
        let depth_stencil_state = desc.depth.to_vk();
        let attachments = [desc.blend.to_vk()];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [desc.color_format];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);
        if let Some(depth_format) = desc.depth_format {
            rendering_info = rendering_info.depth_attachment_format(depth_format);
        }

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout)
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| e)?
        };
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::PipelineError("driver returned no pipeline".into()))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    // =========================================================================
    // Memory
    // =========================================================================

    fn allocate_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        domain: MemoryDomain,
    ) -> RhiResult<AllocatedBuffer> {
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&create_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation =
            match self.allocate_memory("buffer", requirements, domain.memory_location(), true) {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { self.device.destroy_buffer(buffer, None) };
                    return Err(e);
                }
            };

        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            self.release_memory(allocation);
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        lock(&self.buffer_allocations).insert(buffer, allocation);
        debug!("Buffer created: {} bytes, {}", size, domain.name());
        Ok(AllocatedBuffer {
            buffer,
            size,
            usage,
            domain,
        })
    }

    fn free_buffer(&self, buffer: AllocatedBuffer) {
        let Some(allocation) = lock(&self.buffer_allocations).remove(&buffer.buffer) else {
            warn!("free_buffer on unknown buffer {:?}", buffer.buffer);
            return;
        };
        self.release_memory(allocation);
        unsafe { self.device.destroy_buffer(buffer.buffer, None) };
    }

    fn write_buffer(&self, buffer: &AllocatedBuffer, offset: u64, data: &[u8]) -> RhiResult<()> {
        let mut allocations = lock(&self.buffer_allocations);
        let allocation = allocations
            .get_mut(&buffer.buffer)
            .ok_or_else(|| RhiError::InvalidHandle(format!("{:?}", buffer.buffer)))?;
        let mapped = allocation
            .mapped_slice_mut()
            .ok_or_else(|| RhiError::NotHostVisible(format!("{:?}", buffer.buffer)))?;

        let start = offset as usize;
        let end = start + data.len();
        let target = mapped
            .get_mut(start..end)
            .ok_or(RhiError::VulkanError(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn buffer_device_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
        unsafe { self.device.get_buffer_device_address(&info) }
    }

    fn allocate_image(&self, desc: &ImageDesc) -> RhiResult<AllocatedImage> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage);
        let image = unsafe { self.device.create_image(&create_info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation =
            match self.allocate_memory("image", requirements, MemoryLocation::GpuOnly, false) {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { self.device.destroy_image(image, None) };
                    return Err(e);
                }
            };

        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            self.release_memory(allocation);
            unsafe { self.device.destroy_image(image, None) };
            return Err(e.into());
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(desc.aspect())
                    .level_count(desc.mip_levels)
                    .layer_count(1),
            );
        let view = match unsafe { self.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                self.release_memory(allocation);
                unsafe { self.device.destroy_image(image, None) };
                return Err(e.into());
            }
        };

        lock(&self.image_allocations).insert(image, allocation);
        debug!(
            "Image created: {}x{} {:?}, {} mip(s)",
            desc.extent.width, desc.extent.height, desc.format, desc.mip_levels
        );
        Ok(AllocatedImage {
            image,
            view,
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
        })
    }

    fn free_image(&self, image: AllocatedImage) {
        let Some(allocation) = lock(&self.image_allocations).remove(&image.image) else {
            warn!("free_image on unknown image {:?}", image.image);
            return;
        };
        unsafe { self.device.destroy_image_view(image.view, None) };
        self.release_memory(allocation);
        unsafe { self.device.destroy_image(image.image, None) };
    }

    fn create_sampler(&self, filter: vk::Filter) -> RhiResult<vk::Sampler> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter);
        Ok(unsafe { self.device.create_sampler(&create_info, None)? })
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    // =========================================================================
    // Presentation
    // =========================================================================

    fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout: Duration,
    ) -> RhiResult<AcquireOutcome> {
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        lock(&self.swapchain).acquire_next_image(&self.swapchain_loader, semaphore, timeout_ns)
    }

    fn present(&self, image_index: u32, wait: vk::Semaphore) -> RhiResult<PresentOutcome> {
        let swapchain = lock(&self.swapchain);
        let _queue = lock(&self.queue_lock);
        swapchain.present(&self.swapchain_loader, self.present_queue, image_index, wait)
    }

    fn swapchain_image(&self, image_index: u32) -> RhiResult<vk::Image> {
        lock(&self.swapchain)
            .image(image_index)
            .ok_or_else(|| RhiError::SwapchainError(format!("no image at index {image_index}")))
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        lock(&self.swapchain).extent()
    }

    fn recreate_swapchain(&self, width: u32, height: u32) -> RhiResult<()> {
        let ctx = self.swapchain_context();
        lock(&self.swapchain).recreate(&ctx, width, height)
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
        }

        lock(&self.swapchain).destroy(&self.device, &self.swapchain_loader);

        let leaked_buffers: Vec<_> = lock(&self.buffer_allocations).drain().collect();
        let leaked_images: Vec<_> = lock(&self.image_allocations).drain().collect();
        if !leaked_buffers.is_empty() || !leaked_images.is_empty() {
            warn!(
                "{} buffer(s) and {} image(s) still alive at device drop",
                leaked_buffers.len(),
                leaked_images.len()
            );
        }
        for (buffer, allocation) in leaked_buffers {
            self.release_memory(allocation);
            unsafe { self.device.destroy_buffer(buffer, None) };
        }
        for (image, allocation) in leaked_images {
            self.release_memory(allocation);
            unsafe { self.device.destroy_image(image, None) };
        }

        // The allocator frees its memory blocks through the device handle.
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// SAFETY: ash handles and loaders are plain data; every piece of mutable
// state (allocator, allocation maps, swapchain, queue access) sits behind a Mutex.
unsafe impl Send for VulkanDevice {}
unsafe impl Sync for VulkanDevice {}
