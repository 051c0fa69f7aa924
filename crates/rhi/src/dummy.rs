//! In-memory GPU device for tests and headless tooling.
//!
//! [`DummyDevice`] hands out unique `vk` handles without touching a driver,
//! records every `cmd_*` call per command buffer, and keeps enough state to
//! check lifetimes from the outside: live handle counts, double frees,
//! descriptor pool capacity, pipeline state and the order of fence, pool and
//! queue events.
//!
//! Submissions signal their fence immediately unless the device is told to
//! hold them with [`DummyDevice::set_hold_submissions`], in which case fences
//! stay pending until [`DummyDevice::complete_pending`] runs. Acquire and
//! present results can be scripted to exercise swapchain invalidation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use ash::vk::{self, Handle};
use tracing::{trace, warn};

use crate::buffer::{AllocatedBuffer, MemoryDomain};
use crate::descriptor::DescriptorWrite;
use crate::error::{RhiError, RhiResult};
use crate::gpu::{AcquireOutcome, GpuDevice, PresentOutcome, SubmitSync};
use crate::image::{AllocatedImage, ImageBarrier, ImageBlit, ImageDesc};
use crate::pipeline::GraphicsPipelineDesc;
use crate::rendering::RenderingConfig;

const DEFAULT_SWAPCHAIN_IMAGES: u32 = 3;

/// A recorded command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    BeginRendering {
        extent: vk::Extent2D,
        color_attachments: usize,
        has_depth: bool,
    },
    EndRendering,
    BindPipeline {
        pipeline: vk::Pipeline,
    },
    BindDescriptorSets {
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    SetViewport {
        width: f32,
        height: f32,
        min_depth: f32,
        max_depth: f32,
    },
    SetScissor {
        width: u32,
        height: u32,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        index_type: vk::IndexType,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        offset: u32,
        size: usize,
        data: Vec<u8>,
    },
    DrawIndexed {
        index_count: u32,
        first_index: u32,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        /// `(src_offset, dst_offset, size)` per region.
        regions: Vec<(u64, u64, u64)>,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
    },
    ImageBarrier {
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        base_mip_level: u32,
        level_count: u32,
    },
    BlitImage {
        src: vk::Image,
        dst: vk::Image,
        src_mip: u32,
        dst_mip: u32,
    },
    ClearColorImage {
        image: vk::Image,
        color: [f32; 4],
    },
}

/// Device-level events in the order they happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    ResetDescriptorPool(vk::DescriptorPool),
    Acquire,
    Submit(vk::CommandBuffer),
    Present(u32),
    FreeBuffer(vk::Buffer),
    FreeImage(vk::Image),
    WaitIdle,
    RecreateSwapchain,
}

/// One queue submission with the commands it carried.
#[derive(Clone, Debug)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub sync: SubmitSync,
    pub commands: Vec<Command>,
}

/// What a pipeline layout was created with.
#[derive(Clone, Debug)]
pub struct PipelineLayoutInfo {
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
}

struct DescriptorPoolState {
    max_sets: u32,
    allocated: u32,
}

struct BufferState {
    info: AllocatedBuffer,
    data: Vec<u8>,
}

struct State {
    next_id: u64,

    fences: HashMap<vk::Fence, bool>,
    pending_fences: Vec<vk::Fence>,
    semaphores: HashSet<vk::Semaphore>,

    command_pools: HashMap<vk::CommandPool, Vec<vk::CommandBuffer>>,
    commands: HashMap<vk::CommandBuffer, Vec<Command>>,

    set_layouts: HashSet<vk::DescriptorSetLayout>,
    descriptor_pools: HashMap<vk::DescriptorPool, DescriptorPoolState>,
    created_pool_sizes: Vec<u32>,
    live_sets: HashMap<vk::DescriptorSet, vk::DescriptorPool>,
    descriptor_writes: HashMap<vk::DescriptorSet, Vec<DescriptorWrite>>,
    stale_set_writes: usize,
    injected_descriptor_errors: VecDeque<vk::Result>,

    shader_modules: HashSet<vk::ShaderModule>,
    pipeline_layouts: HashMap<vk::PipelineLayout, PipelineLayoutInfo>,
    pipelines: HashMap<vk::Pipeline, GraphicsPipelineDesc>,

    buffers: HashMap<vk::Buffer, BufferState>,
    images: HashMap<vk::Image, AllocatedImage>,
    samplers: HashSet<vk::Sampler>,
    double_frees: usize,

    hold_submissions: bool,
    submissions: Vec<Submission>,
    signaled_fence_submits: usize,

    swapchain_images: Vec<vk::Image>,
    swapchain_extent: vk::Extent2D,
    next_image: u32,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    recreate_count: usize,

    events: Vec<Event>,
}

impl State {
    fn next_raw(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn handle<H: Handle>(&mut self) -> H {
        H::from_raw(self.next_raw())
    }

    fn record(&mut self, cmd: vk::CommandBuffer, command: Command) {
        self.commands.entry(cmd).or_default().push(command);
    }
}

/// GPU device that lives entirely in host memory.
pub struct DummyDevice {
    state: Mutex<State>,
    fence_signaled: Condvar,
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyDevice {
    /// Creates a device with an 800x600 swapchain of three images.
    pub fn new() -> Self {
        Self::with_extent(800, 600)
    }

    pub fn with_extent(width: u32, height: u32) -> Self {
        let mut state = State {
            next_id: 0,
            fences: HashMap::new(),
            pending_fences: Vec::new(),
            semaphores: HashSet::new(),
            command_pools: HashMap::new(),
            commands: HashMap::new(),
            set_layouts: HashSet::new(),
            descriptor_pools: HashMap::new(),
            created_pool_sizes: Vec::new(),
            live_sets: HashMap::new(),
            descriptor_writes: HashMap::new(),
            stale_set_writes: 0,
            injected_descriptor_errors: VecDeque::new(),
            shader_modules: HashSet::new(),
            pipeline_layouts: HashMap::new(),
            pipelines: HashMap::new(),
            buffers: HashMap::new(),
            images: HashMap::new(),
            samplers: HashSet::new(),
            double_frees: 0,
            hold_submissions: false,
            submissions: Vec::new(),
            signaled_fence_submits: 0,
            swapchain_images: Vec::new(),
            swapchain_extent: vk::Extent2D { width, height },
            next_image: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            recreate_count: 0,
            events: Vec::new(),
        };
        let images: Vec<vk::Image> = (0..DEFAULT_SWAPCHAIN_IMAGES)
            .map(|_| state.handle())
            .collect();
        state.swapchain_images = images;

        Self {
            state: Mutex::new(state),
            fence_signaled: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Test controls
    // =========================================================================

    /// Keep submitted fences unsignaled until [`Self::complete_pending`].
    pub fn set_hold_submissions(&self, hold: bool) {
        self.state().hold_submissions = hold;
    }

    /// Signal every fence attached to a held submission, oldest first.
    pub fn complete_pending(&self) {
        let mut state = self.state();
        let pending = std::mem::take(&mut state.pending_fences);
        for fence in pending {
            if let Some(signaled) = state.fences.get_mut(&fence) {
                *signaled = true;
            }
        }
        self.fence_signaled.notify_all();
    }

    /// Signal the oldest held submission only.
    pub fn complete_oldest(&self) -> bool {
        let mut state = self.state();
        if state.pending_fences.is_empty() {
            return false;
        }
        let fence = state.pending_fences.remove(0);
        if let Some(signaled) = state.fences.get_mut(&fence) {
            *signaled = true;
        }
        self.fence_signaled.notify_all();
        true
    }

    /// Queue a result for an upcoming `acquire_next_image` call.
    pub fn script_acquire(&self, outcome: AcquireOutcome) {
        self.state().acquire_script.push_back(outcome);
    }

    /// Queue a result for an upcoming `present` call.
    pub fn script_present(&self, outcome: PresentOutcome) {
        self.state().present_script.push_back(outcome);
    }

    /// Make the next descriptor set allocation fail with `error`.
    pub fn inject_descriptor_error(&self, error: vk::Result) {
        self.state().injected_descriptor_errors.push_back(error);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn live_fences(&self) -> usize {
        self.state().fences.len()
    }

    pub fn live_semaphores(&self) -> usize {
        self.state().semaphores.len()
    }

    pub fn live_command_pools(&self) -> usize {
        self.state().command_pools.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.state().buffers.len()
    }

    pub fn live_images(&self) -> usize {
        self.state().images.len()
    }

    pub fn live_samplers(&self) -> usize {
        self.state().samplers.len()
    }

    pub fn live_set_layouts(&self) -> usize {
        self.state().set_layouts.len()
    }

    pub fn live_descriptor_pools(&self) -> usize {
        self.state().descriptor_pools.len()
    }

    pub fn live_descriptor_sets(&self) -> usize {
        self.state().live_sets.len()
    }

    pub fn is_set_live(&self, set: vk::DescriptorSet) -> bool {
        self.state().live_sets.contains_key(&set)
    }

    /// `max_sets` of every descriptor pool ever created, in creation order.
    pub fn created_pool_sizes(&self) -> Vec<u32> {
        self.state().created_pool_sizes.clone()
    }

    pub fn descriptor_writes(&self, set: vk::DescriptorSet) -> Vec<DescriptorWrite> {
        self.state()
            .descriptor_writes
            .get(&set)
            .cloned()
            .unwrap_or_default()
    }

    pub fn live_shader_modules(&self) -> usize {
        self.state().shader_modules.len()
    }

    pub fn live_pipeline_layouts(&self) -> usize {
        self.state().pipeline_layouts.len()
    }

    pub fn live_pipelines(&self) -> usize {
        self.state().pipelines.len()
    }

    pub fn pipeline_layout_info(&self, layout: vk::PipelineLayout) -> Option<PipelineLayoutInfo> {
        self.state().pipeline_layouts.get(&layout).cloned()
    }

    /// The description a live pipeline was created from.
    pub fn pipeline_desc(&self, pipeline: vk::Pipeline) -> Option<GraphicsPipelineDesc> {
        self.state().pipelines.get(&pipeline).copied()
    }

    /// Writes that targeted a set which was no longer live.
    pub fn stale_set_writes(&self) -> usize {
        self.state().stale_set_writes
    }

    pub fn double_frees(&self) -> usize {
        self.state().double_frees
    }

    pub fn is_buffer_live(&self, buffer: vk::Buffer) -> bool {
        self.state().buffers.contains_key(&buffer)
    }

    /// Host-side contents of a buffer.
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state().buffers.get(&buffer).map(|b| b.data.clone())
    }

    /// Buffers currently alive, with their creation parameters.
    pub fn live_buffer_infos(&self) -> Vec<AllocatedBuffer> {
        self.state().buffers.values().map(|b| b.info).collect()
    }

    pub fn recorded(&self, cmd: vk::CommandBuffer) -> Vec<Command> {
        self.state().commands.get(&cmd).cloned().unwrap_or_default()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state().submissions.clone()
    }

    pub fn submit_count(&self) -> usize {
        self.state().submissions.len()
    }

    pub fn pending_submissions(&self) -> usize {
        self.state().pending_fences.len()
    }

    /// Submissions whose fence was still signaled when they were queued.
    pub fn signaled_fence_submits(&self) -> usize {
        self.state().signaled_fence_submits
    }

    pub fn recreate_count(&self) -> usize {
        self.state().recreate_count
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    pub fn clear_events(&self) {
        self.state().events.clear();
    }
}

impl GpuDevice for DummyDevice {
    // =========================================================================
    // Synchronization
    // =========================================================================

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let mut state = self.state();
        let fence = state.handle();
        state.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        state.fences.remove(&fence);
        state.pending_fences.retain(|f| *f != fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> RhiResult<bool> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        state.events.push(Event::WaitFence(fence));
        loop {
            match state.fences.get(&fence) {
                None => return Err(RhiError::InvalidHandle(format!("{fence:?}"))),
                Some(true) => return Ok(true),
                Some(false) => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            state = self
                .fence_signaled
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        let mut state = self.state();
        state.events.push(Event::ResetFence(fence));
        match state.fences.get_mut(&fence) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(RhiError::InvalidHandle(format!("{fence:?}"))),
        }
    }

    fn fence_signaled(&self, fence: vk::Fence) -> RhiResult<bool> {
        self.state()
            .fences
            .get(&fence)
            .copied()
            .ok_or_else(|| RhiError::InvalidHandle(format!("{fence:?}")))
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let mut state = self.state();
        let semaphore = state.handle();
        state.semaphores.insert(semaphore);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state().semaphores.remove(&semaphore);
    }

    // =========================================================================
    // Command pools and buffers
    // =========================================================================

    fn create_command_pool(&self) -> RhiResult<vk::CommandPool> {
        let mut state = self.state();
        let pool = state.handle();
        state.command_pools.insert(pool, Vec::new());
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state();
        if let Some(buffers) = state.command_pools.remove(&pool) {
            for cmd in buffers {
                state.commands.remove(&cmd);
            }
        }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RhiResult<vk::CommandBuffer> {
        let mut state = self.state();
        let cmd = state.handle();
        state
            .command_pools
            .get_mut(&pool)
            .ok_or_else(|| RhiError::InvalidHandle(format!("{pool:?}")))?
            .push(cmd);
        state.commands.insert(cmd, Vec::new());
        Ok(cmd)
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.state();
        state
            .commands
            .get_mut(&cmd)
            .ok_or_else(|| RhiError::InvalidHandle(format!("{cmd:?}")))?
            .clear();
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        // Begin implicitly resets, as with RESET_COMMAND_BUFFER pools.
        self.reset_command_buffer(cmd)
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        if self.state().commands.contains_key(&cmd) {
            Ok(())
        } else {
            Err(RhiError::InvalidHandle(format!("{cmd:?}")))
        }
    }

    // =========================================================================
    // Command recording
    // =========================================================================

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, config: &RenderingConfig) {
        self.state().record(
            cmd,
            Command::BeginRendering {
                extent: config.extent,
                color_attachments: config.color_attachments.len(),
                has_depth: config.depth_attachment.is_some(),
            },
        );
    }

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        self.state().record(cmd, Command::EndRendering);
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.state().record(cmd, Command::BindPipeline { pipeline });
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.state().record(
            cmd,
            Command::BindDescriptorSets {
                layout,
                first_set,
                sets: sets.to_vec(),
            },
        );
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        self.state().record(
            cmd,
            Command::SetViewport {
                width: viewport.width,
                height: viewport.height,
                min_depth: viewport.min_depth,
                max_depth: viewport.max_depth,
            },
        );
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.state().record(
            cmd,
            Command::SetScissor {
                width: scissor.extent.width,
                height: scissor.extent.height,
            },
        );
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.state()
            .record(cmd, Command::BindIndexBuffer { buffer, index_type });
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.state().record(
            cmd,
            Command::PushConstants {
                layout,
                offset,
                size: data.len(),
                data: data.to_vec(),
            },
        );
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        _instance_count: u32,
        first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.state().record(
            cmd,
            Command::DrawIndexed {
                index_count,
                first_index,
            },
        );
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        let mut state = self.state();
        // Mirror the copy so uploads through a staging buffer can be checked.
        for region in regions {
            let bytes = state.buffers.get(&src).map(|b| {
                let start = region.src_offset as usize;
                let end = (start + region.size as usize).min(b.data.len());
                b.data[start.min(end)..end].to_vec()
            });
            if let (Some(bytes), Some(target)) = (bytes, state.buffers.get_mut(&dst)) {
                let start = region.dst_offset as usize;
                let end = (start + bytes.len()).min(target.data.len());
                if start < end {
                    target.data[start..end].copy_from_slice(&bytes[..end - start]);
                }
            }
        }
        state.record(
            cmd,
            Command::CopyBuffer {
                src,
                dst,
                regions: regions
                    .iter()
                    .map(|r| (r.src_offset, r.dst_offset, r.size))
                    .collect(),
            },
        );
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        _dst_layout: vk::ImageLayout,
        _regions: &[vk::BufferImageCopy],
    ) {
        self.state()
            .record(cmd, Command::CopyBufferToImage { src, dst });
    }

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        self.state().record(
            cmd,
            Command::ImageBarrier {
                image: barrier.image,
                old_layout: barrier.old_layout,
                new_layout: barrier.new_layout,
                base_mip_level: barrier.base_mip_level,
                level_count: barrier.level_count,
            },
        );
    }

    fn cmd_blit_image(&self, cmd: vk::CommandBuffer, blit: &ImageBlit) {
        self.state().record(
            cmd,
            Command::BlitImage {
                src: blit.src,
                dst: blit.dst,
                src_mip: blit.src_mip,
                dst_mip: blit.dst_mip,
            },
        );
    }

    fn cmd_clear_color_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        _layout: vk::ImageLayout,
        color: [f32; 4],
    ) {
        self.state()
            .record(cmd, Command::ClearColorImage { image, color });
    }

    // =========================================================================
    // Queue
    // =========================================================================

    fn submit(&self, cmd: vk::CommandBuffer, sync: &SubmitSync) -> RhiResult<()> {
        let mut state = self.state();
        let commands = state
            .commands
            .get(&cmd)
            .cloned()
            .ok_or_else(|| RhiError::InvalidHandle(format!("{cmd:?}")))?;
        state.events.push(Event::Submit(cmd));
        state.submissions.push(Submission {
            command_buffer: cmd,
            sync: *sync,
            commands,
        });

        if sync.fence != vk::Fence::null() {
            let already_signaled = *state
                .fences
                .get(&sync.fence)
                .ok_or_else(|| RhiError::InvalidHandle(format!("{:?}", sync.fence)))?;
            if already_signaled {
                warn!("DummyDevice: submit with a fence that is still signaled");
                state.signaled_fence_submits += 1;
            }
            if state.hold_submissions {
                state.pending_fences.push(sync.fence);
            } else {
                state.fences.insert(sync.fence, true);
                self.fence_signaled.notify_all();
            }
        }
        trace!("DummyDevice: submitted {:?}", cmd);
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.complete_pending();
        self.state().events.push(Event::WaitIdle);
        Ok(())
    }

    // =========================================================================
    // Descriptors
    // =========================================================================

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RhiResult<vk::DescriptorSetLayout> {
        let mut state = self.state();
        let layout = state.handle();
        state.set_layouts.insert(layout);
        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state().set_layouts.remove(&layout);
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool> {
        let mut state = self.state();
        let pool = state.handle();
        state.descriptor_pools.insert(
            pool,
            DescriptorPoolState {
                max_sets,
                allocated: 0,
            },
        );
        state.created_pool_sizes.push(max_sets);
        trace!("DummyDevice: descriptor pool {:?} with {} sets", pool, max_sets);
        Ok(pool)
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RhiResult<()> {
        let mut state = self.state();
        state.events.push(Event::ResetDescriptorPool(pool));
        state
            .descriptor_pools
            .get_mut(&pool)
            .ok_or_else(|| RhiError::InvalidHandle(format!("{pool:?}")))?
            .allocated = 0;
        state.live_sets.retain(|_, owner| *owner != pool);
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state();
        state.descriptor_pools.remove(&pool);
        state.live_sets.retain(|_, owner| *owner != pool);
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet> {
        let mut state = self.state();
        if let Some(error) = state.injected_descriptor_errors.pop_front() {
            return Err(RhiError::VulkanError(error));
        }
        let pool_state = state
            .descriptor_pools
            .get_mut(&pool)
            .ok_or_else(|| RhiError::InvalidHandle(format!("{pool:?}")))?;
        if pool_state.allocated >= pool_state.max_sets {
            return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        pool_state.allocated += 1;

        let set = state.handle();
        state.live_sets.insert(set, pool);
        Ok(set)
    }

    fn update_descriptor_set(&self, set: vk::DescriptorSet, writes: &[DescriptorWrite]) {
        let mut state = self.state();
        if !state.live_sets.contains_key(&set) {
            warn!("DummyDevice: write to dead descriptor set {:?}", set);
            state.stale_set_writes += 1;
        }
        state
            .descriptor_writes
            .entry(set)
            .or_default()
            .extend_from_slice(writes);
    }

    // =========================================================================
    // Pipelines
    // =========================================================================

    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule> {
        if code.is_empty() {
            return Err(RhiError::ShaderError("empty SPIR-V".into()));
        }
        let mut state = self.state();
        let module = state.handle();
        state.shader_modules.insert(module);
        Ok(module)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state().shader_modules.remove(&module);
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<vk::PipelineLayout> {
        let mut state = self.state();
        if let Some(missing) = set_layouts.iter().find(|l| !state.set_layouts.contains(*l)) {
            return Err(RhiError::InvalidHandle(format!("{missing:?}")));
        }
        let layout = state.handle();
        state.pipeline_layouts.insert(
            layout,
            PipelineLayoutInfo {
                set_layouts: set_layouts.to_vec(),
                push_constant_ranges: push_constant_ranges.to_vec(),
            },
        );
        Ok(layout)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        let mut state = self.state();
        if state.pipeline_layouts.remove(&layout).is_none() {
            warn!("DummyDevice: double destroy of pipeline layout {:?}", layout);
            state.double_frees += 1;
        }
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> RhiResult<vk::Pipeline> {
        desc.validate()?;
        let mut state = self.state();
        if !state.pipeline_layouts.contains_key(&desc.layout) {
            return Err(RhiError::InvalidHandle(format!("{:?}", desc.layout)));
        }
        for module in [desc.vertex_shader, desc.fragment_shader] {
            if !state.shader_modules.contains(&module) {
                return Err(RhiError::InvalidHandle(format!("{module:?}")));
            }
        }
        let pipeline = state.handle();
        state.pipelines.insert(pipeline, *desc);
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        let mut state = self.state();
        if state.pipelines.remove(&pipeline).is_none() {
            warn!("DummyDevice: double destroy of pipeline {:?}", pipeline);
            state.double_frees += 1;
        }
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
        let mut state = self.state();
        let info = AllocatedBuffer {
            buffer: state.handle(),
            size,
            usage,
            domain,
        };
        state.buffers.insert(
            info.buffer,
            BufferState {
                info,
                data: vec![0; size as usize],
            },
        );
        Ok(info)
    }

    fn free_buffer(&self, buffer: AllocatedBuffer) {
        let mut state = self.state();
        state.events.push(Event::FreeBuffer(buffer.buffer));
        if state.buffers.remove(&buffer.buffer).is_none() {
            warn!("DummyDevice: double free of buffer {:?}", buffer.buffer);
            state.double_frees += 1;
        }
    }

    fn write_buffer(&self, buffer: &AllocatedBuffer, offset: u64, data: &[u8]) -> RhiResult<()> {
        let mut state = self.state();
        let target = state
            .buffers
            .get_mut(&buffer.buffer)
            .ok_or_else(|| RhiError::InvalidHandle(format!("{:?}", buffer.buffer)))?;
        if !target.info.domain.is_host_visible() {
            return Err(RhiError::NotHostVisible(format!("{:?}", buffer.buffer)));
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > target.data.len() {
            return Err(RhiError::VulkanError(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        target.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn buffer_device_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        buffer.as_raw() << 16
    }

    fn allocate_image(&self, desc: &ImageDesc) -> RhiResult<AllocatedImage> {
        let mut state = self.state();
        let image = AllocatedImage {
            image: state.handle(),
            view: state.handle(),
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
        };
        state.images.insert(image.image, image);
        Ok(image)
    }

    fn free_image(&self, image: AllocatedImage) {
        let mut state = self.state();
        state.events.push(Event::FreeImage(image.image));
        if state.images.remove(&image.image).is_none() {
            warn!("DummyDevice: double free of image {:?}", image.image);
            state.double_frees += 1;
        }
    }

    fn create_sampler(&self, _filter: vk::Filter) -> RhiResult<vk::Sampler> {
        let mut state = self.state();
        let sampler = state.handle();
        state.samplers.insert(sampler);
        Ok(sampler)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state().samplers.remove(&sampler);
    }

    // =========================================================================
    // Presentation
    // =========================================================================

    fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        _timeout: Duration,
    ) -> RhiResult<AcquireOutcome> {
        let mut state = self.state();
        if !state.semaphores.contains(&semaphore) {
            return Err(RhiError::InvalidHandle(format!("{semaphore:?}")));
        }
        state.events.push(Event::Acquire);
        if let Some(outcome) = state.acquire_script.pop_front() {
            return Ok(outcome);
        }
        let image_index = state.next_image;
        state.next_image = (state.next_image + 1) % state.swapchain_images.len() as u32;
        Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal: false,
        })
    }

    fn present(&self, image_index: u32, _wait: vk::Semaphore) -> RhiResult<PresentOutcome> {
        let mut state = self.state();
        state.events.push(Event::Present(image_index));
        Ok(state
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    fn swapchain_image(&self, image_index: u32) -> RhiResult<vk::Image> {
        self.state()
            .swapchain_images
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| RhiError::SwapchainError(format!("no image at index {image_index}")))
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.state().swapchain_extent
    }

    fn recreate_swapchain(&self, width: u32, height: u32) -> RhiResult<()> {
        let mut state = self.state();
        state.events.push(Event::RecreateSwapchain);
        state.swapchain_extent = vk::Extent2D { width, height };
        let images: Vec<vk::Image> = (0..DEFAULT_SWAPCHAIN_IMAGES)
            .map(|_| state.handle())
            .collect();
        state.swapchain_images = images;
        state.next_image = 0;
        state.recreate_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_pool_capacity_is_enforced() {
        let device = DummyDevice::new();
        let layout = device.create_descriptor_set_layout(&[]).unwrap();
        let pool = device.create_descriptor_pool(2, &[]).unwrap();

        device.allocate_descriptor_set(pool, layout).unwrap();
        device.allocate_descriptor_set(pool, layout).unwrap();
        let err = device.allocate_descriptor_set(pool, layout).unwrap_err();
        assert!(err.is_pool_exhausted());

        device.reset_descriptor_pool(pool).unwrap();
        assert_eq!(device.live_descriptor_sets(), 0);
        device.allocate_descriptor_set(pool, layout).unwrap();
    }

    #[test]
    fn test_reset_invalidates_sets() {
        let device = DummyDevice::new();
        let layout = device.create_descriptor_set_layout(&[]).unwrap();
        let pool = device.create_descriptor_pool(4, &[]).unwrap();
        let set = device.allocate_descriptor_set(pool, layout).unwrap();
        assert!(device.is_set_live(set));

        device.reset_descriptor_pool(pool).unwrap();
        assert!(!device.is_set_live(set));

        device.update_descriptor_set(set, &[]);
        assert_eq!(device.stale_set_writes(), 1);
    }

    #[test]
    fn test_held_submission_keeps_fence_pending() {
        let device = DummyDevice::new();
        device.set_hold_submissions(true);
        let pool = device.create_command_pool().unwrap();
        let cmd = device.allocate_command_buffer(pool).unwrap();
        let fence = device.create_fence(false).unwrap();

        device.submit(cmd, &SubmitSync::fence_only(fence)).unwrap();
        assert!(!device.wait_for_fence(fence, Duration::from_millis(1)).unwrap());
        assert_eq!(device.pending_submissions(), 1);

        device.complete_pending();
        assert!(device.wait_for_fence(fence, Duration::from_millis(1)).unwrap());
    }

    #[test]
    fn test_wait_wakes_on_completion_from_other_thread() {
        let device = std::sync::Arc::new(DummyDevice::new());
        device.set_hold_submissions(true);
        let pool = device.create_command_pool().unwrap();
        let cmd = device.allocate_command_buffer(pool).unwrap();
        let fence = device.create_fence(false).unwrap();
        device.submit(cmd, &SubmitSync::fence_only(fence)).unwrap();

        let completer = {
            let device = device.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                device.complete_pending();
            })
        };
        assert!(device.wait_for_fence(fence, Duration::from_secs(5)).unwrap());
        completer.join().unwrap();
    }

    #[test]
    fn test_pipeline_needs_live_layout_and_shaders() {
        use crate::pipeline::{BlendMode, GraphicsPipelineBuilder};

        let device = DummyDevice::new();
        let set_layout = device.create_descriptor_set_layout(&[]).unwrap();
        let range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .size(64);
        let layout = device.create_pipeline_layout(&[set_layout], &[range]).unwrap();
        let vertex = device.create_shader_module(&[0x0723_0203]).unwrap();
        let fragment = device.create_shader_module(&[0x0723_0203]).unwrap();

        let info = device.pipeline_layout_info(layout).unwrap();
        assert_eq!(info.set_layouts, vec![set_layout]);
        assert_eq!(info.push_constant_ranges[0].size, 64);

        let builder = GraphicsPipelineBuilder::new(layout)
            .shaders(vertex, fragment)
            .color_attachment_format(vk::Format::B8G8R8A8_UNORM)
            .blend(BlendMode::AlphaBlend);
        let pipeline = builder.build(&device).unwrap();
        assert_eq!(device.pipeline_desc(pipeline), Some(*builder.desc()));

        device.destroy_shader_module(fragment);
        assert!(matches!(
            builder.build(&device),
            Err(RhiError::InvalidHandle(_))
        ));

        device.destroy_pipeline(pipeline);
        device.destroy_pipeline_layout(layout);
        device.destroy_pipeline(pipeline);
        assert_eq!(device.live_pipelines(), 0);
        assert_eq!(device.live_pipeline_layouts(), 0);
        assert_eq!(device.double_frees(), 1);
    }

    #[test]
    fn test_double_free_is_counted() {
        let device = DummyDevice::new();
        let buffer = device
            .allocate_buffer(64, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryDomain::CpuToGpu)
            .unwrap();
        device.free_buffer(buffer);
        device.free_buffer(buffer);
        assert_eq!(device.double_frees(), 1);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_write_buffer_requires_host_visible() {
        let device = DummyDevice::new();
        let gpu_only = device
            .allocate_buffer(16, vk::BufferUsageFlags::STORAGE_BUFFER, MemoryDomain::GpuOnly)
            .unwrap();
        assert!(matches!(
            device.write_buffer(&gpu_only, 0, &[1, 2, 3]),
            Err(RhiError::NotHostVisible(_))
        ));

        let staging = device
            .allocate_buffer(16, vk::BufferUsageFlags::TRANSFER_SRC, MemoryDomain::CpuOnly)
            .unwrap();
        device.write_buffer(&staging, 4, &[7, 8]).unwrap();
        let contents = device.buffer_contents(staging.buffer).unwrap();
        assert_eq!(&contents[4..6], &[7, 8]);
    }

    #[test]
    fn test_scripted_acquire_and_present() {
        let device = DummyDevice::new();
        let semaphore = device.create_semaphore().unwrap();
        device.script_acquire(AcquireOutcome::OutOfDate);
        device.script_present(PresentOutcome::Suboptimal);

        assert_eq!(
            device
                .acquire_next_image(semaphore, Duration::from_secs(1))
                .unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert_eq!(
            device
                .acquire_next_image(semaphore, Duration::from_secs(1))
                .unwrap(),
            AcquireOutcome::Acquired {
                image_index: 0,
                suboptimal: false
            }
        );
        assert!(device.present(0, semaphore).unwrap().needs_resize());
        assert_eq!(
            device.present(0, semaphore).unwrap(),
            PresentOutcome::Presented
        );
    }
}
