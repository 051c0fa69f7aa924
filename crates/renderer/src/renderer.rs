//! Main renderer orchestration.
//!
//! [`Renderer`] ties the frame scheduler, resource API, descriptor allocators
//! and draw batcher into one per-frame path:
//!
//! ```text
//! scene graph -> draw context -> begin_frame
//!   clear draw image
//!   scene uniform + global set (slot-scoped)
//!   dynamic rendering: DrawBatcher over opaque, then transparent
//!   blit draw image -> swapchain image
//! end_frame (submit + present)
//! ```
//!
//! Geometry is rendered into an HDR draw image and a depth image owned by the
//! renderer, then scaled onto the swapchain image, so `render_scale` can drop
//! the internal resolution without touching the swapchain.
//!
//! # Resource Destruction Order
//!
//! 1. Wait for the device to go idle
//! 2. Destroy the global descriptor pools
//! 3. Flush the global deletion queue (pipelines, layouts, default textures,
//!    samplers, anything registered with [`Renderer::defer_release`])
//! 4. Free the draw and depth images
//! 5. Drop the frame scheduler (slot queues, slot pools, sync objects)
//!
//! The device itself is shared and outlives the renderer.

use std::sync::Arc;

use ember_core::{RendererConfig, Timer};
use ember_rhi::buffer::{AllocatedBuffer, MemoryDomain};
use ember_rhi::descriptor::{DescriptorLayoutBuilder, DescriptorWriter, PoolSizeRatio};
use ember_rhi::image::AllocatedImage;
use ember_rhi::rendering::{ColorAttachment, DepthAttachment, RenderingConfig};
use ember_rhi::{GpuDevice, vk};
use ember_scene::{
    DrawContext, MaterialConstants, MaterialInstance, MaterialPass, MaterialPipeline, SceneData,
    SceneGraph,
};
use glam::Mat4;
use tracing::{debug, info, trace, warn};

use crate::deletion_queue::DeletionQueue;
use crate::descriptor_allocator::GrowableDescriptorAllocator;
use crate::draw_batcher::DrawBatcher;
use crate::error::{RenderError, RenderResult};
use crate::frame_scheduler::{ActiveFrame, FrameBegin, FrameScheduler};
use crate::material::{
    MaterialResources, MeshPipelines, build_mesh_pipelines, create_material_layout,
    create_mesh_layout, write_material,
};
use crate::resources::{DefaultResources, GpuResources};
use crate::stats::EngineStats;

/// HDR format of the offscreen color target.
pub const DRAW_IMAGE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Format of the depth target. Depth is reversed: cleared to 0, near is 1.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Descriptor mix the global (asset-lifetime) allocator is sized for.
pub const GLOBAL_POOL_RATIOS: [PoolSizeRatio; 3] = [
    PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 1.0),
    PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 2.0),
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_BUFFER, 1.0),
];

/// What [`Renderer::draw`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawOutcome {
    /// A frame was submitted and queued for presentation.
    Rendered,
    /// No frame was submitted. Either the swapchain was out of date or a
    /// resize is pending; call [`Renderer::resize`] before drawing again.
    Skipped,
}

/// Offscreen color and depth targets.
#[derive(Clone, Copy, Debug)]
struct RenderTargets {
    draw_image: AllocatedImage,
    depth_image: AllocatedImage,
}

impl RenderTargets {
    fn new<D: GpuDevice>(resources: &GpuResources<D>, extent: vk::Extent2D) -> RenderResult<Self> {
        let draw_image = resources.create_image(
            extent,
            DRAW_IMAGE_FORMAT,
            vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            false,
        )?;
        let depth_image = match resources.create_image(
            extent,
            DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            false,
        ) {
            Ok(image) => image,
            Err(e) => {
                resources.destroy_image(draw_image);
                return Err(e);
            }
        };
        debug!("Render targets created ({}x{})", extent.width, extent.height);
        Ok(Self {
            draw_image,
            depth_image,
        })
    }

    fn destroy<D: GpuDevice>(self, resources: &GpuResources<D>) {
        resources.destroy_image(self.depth_image);
        resources.destroy_image(self.draw_image);
    }

    fn extent(&self) -> vk::Extent2D {
        self.draw_image.extent_2d()
    }
}

/// Layouts and placeholders created once and released with the renderer.
struct SharedResources {
    defaults: DefaultResources,
    scene_data_layout: vk::DescriptorSetLayout,
    material_layout: vk::DescriptorSetLayout,
    mesh_layout: vk::PipelineLayout,
}

impl SharedResources {
    fn new<D: GpuDevice>(
        resources: &mut GpuResources<D>,
        deletion_queue: &mut DeletionQueue,
    ) -> RenderResult<Self> {
        let defaults = DefaultResources::new(resources, deletion_queue)?;
        let device = Arc::clone(resources.device());

        let scene_data_layout = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .build(
                &*device,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )?;
        let layout_device = Arc::clone(&device);
        deletion_queue.push(move || layout_device.destroy_descriptor_set_layout(scene_data_layout));

        let material_layout = create_material_layout(&*device)?;
        let layout_device = Arc::clone(&device);
        deletion_queue.push(move || layout_device.destroy_descriptor_set_layout(material_layout));

        let mesh_layout = create_mesh_layout(&*device, scene_data_layout, material_layout)?;
        deletion_queue.push(move || device.destroy_pipeline_layout(mesh_layout));

        Ok(Self {
            defaults,
            scene_data_layout,
            material_layout,
            mesh_layout,
        })
    }
}

/// Renders a [`SceneGraph`] to the device's swapchain.
pub struct Renderer<D: GpuDevice> {
    /// Shared device; outlives the renderer.
    device: Arc<D>,
    /// Settings the renderer was created with.
    config: RendererConfig,
    /// Frame slots, pacing and presentation.
    scheduler: FrameScheduler<D>,
    /// Buffer, image and mesh uploads.
    resources: GpuResources<D>,
    /// Descriptor sets that live until scene unload (materials).
    global_descriptors: GrowableDescriptorAllocator<D>,
    /// Releases run once at shutdown, after the device is idle.
    main_deletion_queue: DeletionQueue,
    /// Offscreen color and depth targets.
    targets: RenderTargets,
    /// Descriptor and pipeline layouts, placeholder textures.
    shared: SharedResources,
    /// Most recently built mesh pipelines, if any.
    mesh_pipelines: Option<MeshPipelines>,
    /// Camera and lighting uniforms for the next frame.
    scene_data: SceneData,
    /// Draw list rebuilt every frame.
    draw_context: DrawContext,
    /// Statistics for the last rendered frame.
    stats: EngineStats,
}

impl<D: GpuDevice> Renderer<D> {
    /// Creates the renderer on `device`, sizing targets to its swapchain.
    ///
    /// # Errors
    ///
    /// Every failure is reported as [`RenderError::FatalInit`].
    pub fn new(device: Arc<D>, config: &RendererConfig) -> RenderResult<Self> {
        Self::init(device, config).map_err(|e| match e {
            RenderError::FatalInit(_) => e,
            other => RenderError::FatalInit(other.to_string()),
        })
    }

    fn init(device: Arc<D>, config: &RendererConfig) -> RenderResult<Self> {
        let extent = device.swapchain_extent();
        info!(
            "Initializing renderer ({}x{}, {} frame(s) in flight)",
            extent.width, extent.height, config.frames_in_flight
        );
        if !(config.render_scale > 0.0 && config.render_scale <= 1.0) {
            return Err(RenderError::FatalInit(format!(
                "render_scale must be in (0, 1], got {}",
                config.render_scale
            )));
        }

        let scheduler = FrameScheduler::new(Arc::clone(&device), config)?;
        let mut resources = GpuResources::new(Arc::clone(&device), config.immediate_timeout())?;
        let global_descriptors = GrowableDescriptorAllocator::new(
            Arc::clone(&device),
            config.global_descriptor_sets,
            &GLOBAL_POOL_RATIOS,
            config.max_sets_per_pool,
        )?;
        let targets = RenderTargets::new(&resources, extent)?;

        let mut main_deletion_queue = DeletionQueue::new();
        let shared = match SharedResources::new(&mut resources, &mut main_deletion_queue) {
            Ok(shared) => shared,
            Err(e) => {
                main_deletion_queue.flush();
                targets.destroy(&resources);
                return Err(e);
            }
        };

        info!("Renderer initialized");
        Ok(Self {
            device,
            config: config.clone(),
            scheduler,
            resources,
            global_descriptors,
            main_deletion_queue,
            targets,
            shared,
            mesh_pipelines: None,
            scene_data: SceneData::default(),
            draw_context: DrawContext::new(),
            stats: EngineStats::default(),
        })
    }

    /// Renders one frame of `scene`.
    ///
    /// Returns [`DrawOutcome::Skipped`] without touching the GPU when a resize
    /// is pending or the swapchain turns out to be out of date.
    ///
    /// # Errors
    ///
    /// Every error is fatal: a GPU hang, descriptor exhaustion or a device
    /// failure.
    pub fn draw(&mut self, scene: &SceneGraph) -> RenderResult<DrawOutcome> {
        if self.scheduler.resize_requested() {
            trace!("Resize pending, skipping frame");
            return Ok(DrawOutcome::Skipped);
        }
        let frame_timer = Timer::start();

        let update_timer = Timer::start();
        self.update_scene(scene);
        self.stats.scene_update_time = update_timer.elapsed_ms();

        let frame = match self.scheduler.begin_frame()? {
            FrameBegin::Ready(frame) => frame,
            FrameBegin::Abandoned => return Ok(DrawOutcome::Skipped),
        };

        let device = Arc::clone(&self.device);
        let cmd = frame.recorder(&*device);
        let swapchain_extent = device.swapchain_extent();
        let draw_extent = self.draw_extent(swapchain_extent);
        let RenderTargets {
            draw_image,
            depth_image,
        } = self.targets;

        cmd.transition_image(
            draw_image.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
        );
        cmd.clear_color_image(
            draw_image.image,
            vk::ImageLayout::GENERAL,
            self.config.clear_color,
        );
        cmd.transition_image(
            draw_image.image,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        cmd.transition_image(
            depth_image.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        );

        let global_set = self.write_scene_data(&frame)?;

        let rendering = RenderingConfig::new(draw_extent)
            .with_color_attachment(ColorAttachment::load(draw_image.view))
            .with_depth_attachment(DepthAttachment::new(depth_image.view));
        cmd.begin_rendering(&rendering);
        let draw_timer = Timer::start();
        let draws = DrawBatcher::record(&cmd, &self.draw_context, global_set, draw_extent);
        self.stats.mesh_draw_time = draw_timer.elapsed_ms();
        cmd.end_rendering();

        let swapchain_image = device.swapchain_image(frame.image_index())?;
        cmd.transition_image(
            draw_image.image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        cmd.transition_image(
            swapchain_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        cmd.copy_image_to_image(draw_image.image, swapchain_image, draw_extent, swapchain_extent);
        cmd.transition_image(
            swapchain_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );

        self.scheduler.end_frame(frame)?;

        self.stats.record_draws(draws);
        self.stats.frame_time = frame_timer.elapsed_ms();
        Ok(DrawOutcome::Rendered)
    }

    /// Recreates the swapchain (and, if it grew, the render targets).
    ///
    /// A zero-sized extent (minimized window) is ignored; the resize stays
    /// pending until a real size arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting for the device, swapchain recreation or
    /// target recreation fails.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            debug!("Ignoring resize to {}x{}", width, height);
            return Ok(());
        }

        self.device.wait_idle()?;
        self.device.recreate_swapchain(width, height)?;
        self.scheduler.recreate_semaphores()?;

        let extent = self.device.swapchain_extent();
        let current = self.targets.extent();
        if extent.width > current.width || extent.height > current.height {
            let grown = vk::Extent2D {
                width: extent.width.max(current.width),
                height: extent.height.max(current.height),
            };
            let targets = RenderTargets::new(&self.resources, grown)?;
            std::mem::replace(&mut self.targets, targets).destroy(&self.resources);
        }

        self.scheduler.clear_resize_request();
        info!("Resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Creates a material whose set is allocated from the global allocator.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ResourceExhaustion`] if no pool can hold the set.
    pub fn create_material(
        &mut self,
        pipeline: MaterialPipeline,
        pass: MaterialPass,
        resources: &MaterialResources,
    ) -> RenderResult<Arc<MaterialInstance>> {
        write_material(
            &mut self.global_descriptors,
            self.shared.material_layout,
            pipeline,
            pass,
            resources,
            &*self.device,
        )
    }

    /// Builds the opaque and transparent mesh pipelines over the shared mesh
    /// layout, targeting the draw and depth image formats.
    ///
    /// The shader modules stay owned by the caller and may be destroyed once
    /// this returns. The pipelines are released at shutdown; building again
    /// replaces the pair used by [`create_mesh_material`](Self::create_mesh_material)
    /// but keeps the old pair alive for materials that still reference it.
    ///
    /// # Errors
    ///
    /// Returns an error if either pipeline cannot be created.
    pub fn build_mesh_pipelines(
        &mut self,
        vertex_shader: vk::ShaderModule,
        fragment_shader: vk::ShaderModule,
    ) -> RenderResult<MeshPipelines> {
        let pipelines = build_mesh_pipelines(
            &*self.device,
            self.shared.mesh_layout,
            vertex_shader,
            fragment_shader,
            DRAW_IMAGE_FORMAT,
            DEPTH_FORMAT,
        )?;
        let device = Arc::clone(&self.device);
        self.main_deletion_queue.push(move || {
            device.destroy_pipeline(pipelines.transparent.pipeline);
            device.destroy_pipeline(pipelines.opaque.pipeline);
        });
        self.mesh_pipelines = Some(pipelines);
        info!("Mesh pipelines ready");
        Ok(pipelines)
    }

    /// Creates a material drawn with the built mesh pipeline for `pass`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidArgument`] if
    /// [`build_mesh_pipelines`](Self::build_mesh_pipelines) has not run, or
    /// [`RenderError::ResourceExhaustion`] if no pool can hold the set.
    pub fn create_mesh_material(
        &mut self,
        pass: MaterialPass,
        resources: &MaterialResources,
    ) -> RenderResult<Arc<MaterialInstance>> {
        let pipelines = self.mesh_pipelines.ok_or_else(|| {
            RenderError::InvalidArgument("mesh pipelines have not been built".into())
        })?;
        self.create_material(pipelines.for_pass(pass), pass, resources)
    }

    /// Uploads material constants into one uniform buffer, 256 bytes apart.
    ///
    /// The buffer is released at shutdown.
    pub fn create_material_constants(
        &mut self,
        constants: &[MaterialConstants],
    ) -> RenderResult<AllocatedBuffer> {
        let bytes: &[u8] = bytemuck::cast_slice(constants);
        let buffer = self.resources.create_buffer(
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryDomain::CpuToGpu,
        )?;
        let device = Arc::clone(&self.device);
        self.main_deletion_queue
            .push(move || device.free_buffer(buffer));
        self.resources.write_buffer(&buffer, 0, bytes)?;
        Ok(buffer)
    }

    /// Registers a release to run at shutdown, after the device is idle.
    pub fn defer_release(&mut self, action: impl FnOnce() + Send + 'static) {
        self.main_deletion_queue.push(action);
    }

    /// Resets the global descriptor pools, invalidating every material set.
    ///
    /// Call only while no frame in flight uses them, e.g. after
    /// [`GpuDevice::wait_idle`] on scene unload.
    pub fn clear_global_descriptors(&mut self) -> RenderResult<()> {
        self.global_descriptors.clear_pools()
    }

    pub fn set_scene_data(&mut self, scene_data: SceneData) {
        self.scene_data = scene_data;
    }

    #[inline]
    pub fn scene_data(&self) -> &SceneData {
        &self.scene_data
    }

    #[inline]
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// The draw list built for the last frame.
    #[inline]
    pub fn draw_context(&self) -> &DrawContext {
        &self.draw_context
    }

    #[inline]
    pub fn resize_requested(&self) -> bool {
        self.scheduler.resize_requested()
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.scheduler.frame_number()
    }

    #[inline]
    pub fn defaults(&self) -> &DefaultResources {
        &self.shared.defaults
    }

    #[inline]
    pub fn resources(&mut self) -> &mut GpuResources<D> {
        &mut self.resources
    }

    #[inline]
    pub fn scene_data_layout(&self) -> vk::DescriptorSetLayout {
        self.shared.scene_data_layout
    }

    #[inline]
    pub fn material_layout(&self) -> vk::DescriptorSetLayout {
        self.shared.material_layout
    }

    /// Layout shared by every mesh pipeline: `[scene_data, material]` plus
    /// the vertex push-constant range.
    #[inline]
    pub fn mesh_pipeline_layout(&self) -> vk::PipelineLayout {
        self.shared.mesh_layout
    }

    #[inline]
    pub fn mesh_pipelines(&self) -> Option<&MeshPipelines> {
        self.mesh_pipelines.as_ref()
    }

    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    #[inline]
    pub fn draw_image(&self) -> &AllocatedImage {
        &self.targets.draw_image
    }

    fn update_scene(&mut self, scene: &SceneGraph) {
        self.draw_context.clear();
        scene.draw(Mat4::IDENTITY, &mut self.draw_context);
    }

    /// The part of the draw image rendered this frame.
    fn draw_extent(&self, swapchain_extent: vk::Extent2D) -> vk::Extent2D {
        let target = self.targets.extent();
        let scale = self.config.render_scale;
        vk::Extent2D {
            width: ((swapchain_extent.width.min(target.width) as f32 * scale) as u32).max(1),
            height: ((swapchain_extent.height.min(target.height) as f32 * scale) as u32).max(1),
        }
    }

    /// Uploads this frame's [`SceneData`] and returns the global set (set 0)
    /// pointing at it. Both live until the slot comes around again.
    fn write_scene_data(&mut self, frame: &ActiveFrame) -> RenderResult<vk::DescriptorSet> {
        let size = std::mem::size_of::<SceneData>() as vk::DeviceSize;
        let buffer = self.resources.create_buffer(
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryDomain::CpuToGpu,
        )?;

        let slot = self.scheduler.slot_mut(frame);
        let device = Arc::clone(&self.device);
        slot.deletion_queue().push(move || device.free_buffer(buffer));

        self.resources
            .write_buffer(&buffer, 0, bytemuck::bytes_of(&self.scene_data))?;
        let set = slot.descriptors().allocate(self.shared.scene_data_layout)?;
        DescriptorWriter::new()
            .write_buffer(0, buffer.buffer, size, 0, vk::DescriptorType::UNIFORM_BUFFER)
            .update_set(&*self.device, set);
        Ok(set)
    }
}

impl<D: GpuDevice> Drop for Renderer<D> {
    fn drop(&mut self) {
        info!("Shutting down renderer");
        if let Err(e) = self.device.wait_idle() {
            warn!("wait_idle failed during renderer shutdown: {}", e);
        }
        self.global_descriptors.destroy_pools();
        self.main_deletion_queue.flush();
        self.targets.destroy(&self.resources);
        debug!("Renderer resources released");
    }
}
