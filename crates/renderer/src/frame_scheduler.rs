//! Frames in flight.
//!
//! [`FrameScheduler`] paces CPU recording against GPU execution with a fixed
//! ring of [`FrameSlot`]s. Frame `n` uses slot `n % N`, so the CPU can record
//! frame `n + 1` while the GPU still runs frame `n`, but never gets more than
//! `N` frames ahead.
//!
//! # Synchronization Flow
//!
//! ```text
//! begin_frame:
//!   1. Wait on the slot's render fence (bounded; timeout = GPU hang)
//!   2. Flush the slot's deletion queue, reset its descriptor pools
//!   3. Acquire a swapchain image (signals acquire_semaphore)
//!      - out of date: abandon the frame, raise the resize flag
//!   4. Reset the render fence, begin the command buffer
//! end_frame:
//!   5. Submit: wait acquire_semaphore, signal present_semaphore + render fence
//!   6. Advance the frame counter
//!   7. Present (waits on present_semaphore)
//! ```
//!
//! The fence is reset only after a successful acquire. An abandoned frame
//! leaves it signaled, so the next `begin_frame` on that slot cannot block.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ember_core::RendererConfig;
//! use ember_rhi::GpuDevice;
//! use ember_renderer::frame_scheduler::{FrameBegin, FrameScheduler};
//!
//! # fn example<D: GpuDevice>(device: Arc<D>) -> ember_renderer::RenderResult<()> {
//! let mut scheduler = FrameScheduler::new(device.clone(), &RendererConfig::default())?;
//!
//! loop {
//!     let frame = match scheduler.begin_frame()? {
//!         FrameBegin::Ready(frame) => frame,
//!         FrameBegin::Abandoned => {
//!             // Recreate the swapchain, then try again.
//!             scheduler.clear_resize_request();
//!             continue;
//!         }
//!     };
//!
//!     let cmd = frame.recorder(&*device);
//!     // cmd.begin_rendering(...); cmd.draw_indexed(...); cmd.end_rendering();
//!
//!     scheduler.end_frame(frame)?;
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ember_core::RendererConfig;
use ember_rhi::command::{CommandBuffer, CommandPool};
use ember_rhi::descriptor::PoolSizeRatio;
use ember_rhi::sync::{Fence, Semaphore};
use ember_rhi::{AcquireOutcome, GpuDevice, PresentOutcome, SubmitSync, vk};
use tracing::{debug, error, info, warn};

use crate::deletion_queue::DeletionQueue;
use crate::descriptor_allocator::GrowableDescriptorAllocator;
use crate::error::{RenderError, RenderResult};

/// Descriptor mix each slot's allocator is sized for.
pub const FRAME_POOL_RATIOS: [PoolSizeRatio; 4] = [
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_BUFFER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4.0),
];

/// Resources owned by one frame in flight.
///
/// Everything here is reused once the slot's render fence has signaled.
pub struct FrameSlot<D: GpuDevice> {
    command_buffer: vk::CommandBuffer,
    /// Signaled when the GPU finishes the slot's last submission.
    render_fence: Fence<D>,
    /// Signaled when the acquired swapchain image is ready to be drawn to.
    acquire_semaphore: Semaphore<D>,
    /// Signaled when rendering completes; presentation waits on it.
    present_semaphore: Semaphore<D>,
    deletion_queue: DeletionQueue,
    descriptors: GrowableDescriptorAllocator<D>,
    // Last: the command buffer above is freed with it.
    command_pool: CommandPool<D>,
}

impl<D: GpuDevice> FrameSlot<D> {
    fn new(device: Arc<D>, config: &RendererConfig) -> RenderResult<Self> {
        let command_pool = CommandPool::new(Arc::clone(&device))?;
        let command_buffer = command_pool.allocate_command_buffer()?;
        // Signaled so the first wait on a fresh slot returns at once.
        let render_fence = Fence::new(Arc::clone(&device), true)?;
        let acquire_semaphore = Semaphore::new(Arc::clone(&device))?;
        let present_semaphore = Semaphore::new(Arc::clone(&device))?;
        let descriptors = GrowableDescriptorAllocator::new(
            device,
            config.frame_descriptor_sets,
            &FRAME_POOL_RATIOS,
            config.max_sets_per_pool,
        )?;

        Ok(Self {
            command_buffer,
            render_fence,
            acquire_semaphore,
            present_semaphore,
            deletion_queue: DeletionQueue::new(),
            descriptors,
            command_pool,
        })
    }

    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    #[inline]
    pub fn render_fence(&self) -> &Fence<D> {
        &self.render_fence
    }

    #[inline]
    pub fn acquire_semaphore(&self) -> vk::Semaphore {
        self.acquire_semaphore.handle()
    }

    #[inline]
    pub fn present_semaphore(&self) -> vk::Semaphore {
        self.present_semaphore.handle()
    }

    /// Releases registered here run once this slot's next fence wait succeeds.
    #[inline]
    pub fn deletion_queue(&mut self) -> &mut DeletionQueue {
        &mut self.deletion_queue
    }

    /// Sets allocated here are valid until the slot comes around again.
    #[inline]
    pub fn descriptors(&mut self) -> &mut GrowableDescriptorAllocator<D> {
        &mut self.descriptors
    }

    #[inline]
    pub fn command_pool(&self) -> &CommandPool<D> {
        &self.command_pool
    }
}

/// A frame between [`FrameScheduler::begin_frame`] and
/// [`FrameScheduler::end_frame`].
///
/// Not `Clone`: each begun frame is ended exactly once.
#[derive(Debug)]
pub struct ActiveFrame {
    slot: usize,
    image_index: u32,
    command_buffer: vk::CommandBuffer,
    frame_number: u64,
    suboptimal: bool,
}

impl ActiveFrame {
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Index of the acquired swapchain image.
    #[inline]
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Whether the acquire reported the swapchain as suboptimal.
    #[inline]
    pub fn suboptimal(&self) -> bool {
        self.suboptimal
    }

    /// Recorder for this frame's command buffer. Recording has already begun.
    pub fn recorder<'a, D: GpuDevice + ?Sized>(&self, device: &'a D) -> CommandBuffer<'a, D> {
        CommandBuffer::new(device, self.command_buffer)
    }
}

/// Outcome of [`FrameScheduler::begin_frame`].
#[derive(Debug)]
pub enum FrameBegin {
    /// Recording may start.
    Ready(ActiveFrame),
    /// The swapchain is out of date. Nothing was recorded or submitted and
    /// the resize flag is raised.
    Abandoned,
}

/// Drives the begin/end frame cycle over `N` slots.
pub struct FrameScheduler<D: GpuDevice> {
    device: Arc<D>,
    slots: Vec<FrameSlot<D>>,
    frame_number: u64,
    resize_requested: bool,
    frame_timeout: Duration,
    acquire_timeout: Duration,
}

impl<D: GpuDevice> FrameScheduler<D> {
    /// Creates `config.frames_in_flight` slots.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot count is zero or any slot resource
    /// cannot be created.
    pub fn new(device: Arc<D>, config: &RendererConfig) -> RenderResult<Self> {
        if config.frames_in_flight == 0 {
            return Err(RenderError::InvalidArgument(
                "frames_in_flight must be at least 1".into(),
            ));
        }

        let slots = (0..config.frames_in_flight)
            .map(|_| FrameSlot::new(Arc::clone(&device), config))
            .collect::<RenderResult<Vec<_>>>()?;

        info!("Frame scheduler created with {} frame(s) in flight", slots.len());

        Ok(Self {
            device,
            slots,
            frame_number: 0,
            resize_requested: false,
            frame_timeout: config.frame_timeout(),
            acquire_timeout: config.acquire_timeout(),
        })
    }

    /// Waits for the current slot, reclaims its resources and acquires the
    /// next swapchain image.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Hang`] if the slot's fence or the acquire does
    /// not complete in time, or the device error for any other failure.
    pub fn begin_frame(&mut self) -> RenderResult<FrameBegin> {
        let index = self.current_slot_index();
        let slot = &mut self.slots[index];

        if !slot.render_fence.wait(self.frame_timeout)? {
            error!(
                "Frame {} fence did not signal within {:?}",
                self.frame_number, self.frame_timeout
            );
            return Err(RenderError::Hang {
                what: "frame fence",
                timeout: self.frame_timeout,
            });
        }

        slot.deletion_queue.flush();
        slot.descriptors.clear_pools()?;

        let (image_index, suboptimal) = match self
            .device
            .acquire_next_image(slot.acquire_semaphore.handle(), self.acquire_timeout)?
        {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                debug!("Swapchain out of date on acquire, abandoning frame");
                self.resize_requested = true;
                return Ok(FrameBegin::Abandoned);
            }
            AcquireOutcome::Timeout => {
                error!("Swapchain acquire did not complete within {:?}", self.acquire_timeout);
                return Err(RenderError::Hang {
                    what: "swapchain acquire",
                    timeout: self.acquire_timeout,
                });
            }
        };
        if suboptimal {
            debug!("Acquired image {} from a suboptimal swapchain", image_index);
        }

        slot.render_fence.reset()?;
        let cmd = CommandBuffer::new(&*self.device, slot.command_buffer);
        cmd.reset()?;
        cmd.begin()?;

        Ok(FrameBegin::Ready(ActiveFrame {
            slot: index,
            image_index,
            command_buffer: slot.command_buffer,
            frame_number: self.frame_number,
            suboptimal,
        }))
    }

    /// Ends recording, submits and presents `frame`.
    ///
    /// The frame counter advances whether or not the submission succeeded.
    ///
    /// # Errors
    ///
    /// Returns the device error if ending, submitting or presenting fails.
    pub fn end_frame(&mut self, frame: ActiveFrame) -> RenderResult<PresentOutcome> {
        let slot = &self.slots[frame.slot];
        let cmd = CommandBuffer::new(&*self.device, frame.command_buffer);
        let submitted = cmd.end().and_then(|()| {
            self.device.submit(
                frame.command_buffer,
                &SubmitSync {
                    wait: Some((
                        slot.acquire_semaphore.handle(),
                        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                    )),
                    signal: Some(slot.present_semaphore.handle()),
                    fence: slot.render_fence.handle(),
                },
            )
        });
        self.frame_number += 1;
        submitted?;

        let outcome = self
            .device
            .present(frame.image_index, slot.present_semaphore.handle())?;
        if outcome.needs_resize() {
            debug!("Present reported {:?}, resize requested", outcome);
            self.resize_requested = true;
        }
        Ok(outcome)
    }

    /// Whether the swapchain must be recreated before the next frame.
    #[inline]
    pub fn resize_requested(&self) -> bool {
        self.resize_requested
    }

    #[inline]
    pub fn clear_resize_request(&mut self) {
        self.resize_requested = false;
    }

    /// Replaces every slot's semaphores. Call only while the device is idle.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn recreate_semaphores(&mut self) -> RenderResult<()> {
        for slot in &mut self.slots {
            slot.acquire_semaphore = Semaphore::new(Arc::clone(&self.device))?;
            slot.present_semaphore = Semaphore::new(Arc::clone(&self.device))?;
        }
        debug!("Recreated semaphores for {} slot(s)", self.slots.len());
        Ok(())
    }

    /// The slot a frame belongs to.
    #[inline]
    pub fn slot_mut(&mut self, frame: &ActiveFrame) -> &mut FrameSlot<D> {
        &mut self.slots[frame.slot]
    }

    /// The slot the next `begin_frame` will use.
    #[inline]
    pub fn current_slot_mut(&mut self) -> &mut FrameSlot<D> {
        let index = self.current_slot_index();
        &mut self.slots[index]
    }

    /// Frames submitted so far.
    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn current_slot_index(&self) -> usize {
        (self.frame_number % self.slots.len() as u64) as usize
    }
}

impl<D: GpuDevice> Drop for FrameScheduler<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("wait_idle failed while dropping frame scheduler: {}", e);
        }
        for slot in &mut self.slots {
            slot.deletion_queue.flush();
            slot.descriptors.destroy_pools();
        }
        debug!("Frame scheduler destroyed after {} frame(s)", self.frame_number);
    }
}

#[cfg(test)]
mod tests {
    use ember_rhi::dummy::{DummyDevice, Event};

    use super::*;

    fn scheduler(device: &Arc<DummyDevice>) -> FrameScheduler<DummyDevice> {
        let config = RendererConfig {
            frame_descriptor_sets: 4,
            ..RendererConfig::default()
        };
        FrameScheduler::new(Arc::clone(device), &config).unwrap()
    }

    fn expect_ready(begin: FrameBegin) -> ActiveFrame {
        match begin {
            FrameBegin::Ready(frame) => frame,
            FrameBegin::Abandoned => panic!("frame unexpectedly abandoned"),
        }
    }

    #[test]
    fn test_slots_rotate() {
        let device = Arc::new(DummyDevice::new());
        let mut scheduler = scheduler(&device);

        for expected_slot in [0, 1, 0, 1] {
            let frame = expect_ready(scheduler.begin_frame().unwrap());
            assert_eq!(frame.slot(), expected_slot);
            scheduler.end_frame(frame).unwrap();
        }
        assert_eq!(scheduler.frame_number(), 4);
        assert_eq!(device.submit_count(), 4);
    }

    #[test]
    fn test_submission_waits_and_signals_slot_sync() {
        let device = Arc::new(DummyDevice::new());
        let mut scheduler = scheduler(&device);

        let frame = expect_ready(scheduler.begin_frame().unwrap());
        let slot = scheduler.slot_mut(&frame);
        let (acquire, present, fence) = (
            slot.acquire_semaphore(),
            slot.present_semaphore(),
            slot.render_fence().handle(),
        );
        scheduler.end_frame(frame).unwrap();

        let sync = device.submissions()[0].sync;
        assert_eq!(
            sync.wait,
            Some((acquire, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT))
        );
        assert_eq!(sync.signal, Some(present));
        assert_eq!(sync.fence, fence);
        assert_eq!(device.signaled_fence_submits(), 0);
    }

    #[test]
    fn test_out_of_date_acquire_abandons_frame() {
        let device = Arc::new(DummyDevice::new());
        let mut scheduler = scheduler(&device);
        device.script_acquire(AcquireOutcome::OutOfDate);

        assert!(matches!(scheduler.begin_frame().unwrap(), FrameBegin::Abandoned));
        assert!(scheduler.resize_requested());
        assert_eq!(device.submit_count(), 0);
        assert_eq!(scheduler.frame_number(), 0);
        assert!(!device.events().iter().any(|e| matches!(e, Event::ResetFence(_))));

        // The fence is still signaled, so the retry does not block.
        scheduler.clear_resize_request();
        let frame = expect_ready(scheduler.begin_frame().unwrap());
        assert_eq!(frame.slot(), 0);
    }

    #[test]
    fn test_out_of_date_present_requests_resize() {
        let device = Arc::new(DummyDevice::new());
        let mut scheduler = scheduler(&device);
        device.script_present(PresentOutcome::OutOfDate);

        let frame = expect_ready(scheduler.begin_frame().unwrap());
        let outcome = scheduler.end_frame(frame).unwrap();

        assert_eq!(outcome, PresentOutcome::OutOfDate);
        assert!(scheduler.resize_requested());
        assert_eq!(scheduler.frame_number(), 1);
    }

    #[test]
    fn test_suboptimal_acquire_is_recorded() {
        let device = Arc::new(DummyDevice::new());
        let mut scheduler = scheduler(&device);
        device.script_acquire(AcquireOutcome::Acquired {
            image_index: 2,
            suboptimal: true,
        });

        let frame = expect_ready(scheduler.begin_frame().unwrap());

        assert!(frame.suboptimal());
        assert_eq!(frame.image_index(), 2);
        assert!(!scheduler.resize_requested());
    }

    #[test]
    fn test_fence_timeout_is_a_hang() {
        let device = Arc::new(DummyDevice::new());
        device.set_hold_submissions(true);
        let config = RendererConfig {
            frames_in_flight: 1,
            frame_timeout_ms: 10,
            frame_descriptor_sets: 4,
            ..RendererConfig::default()
        };
        let mut scheduler = FrameScheduler::new(Arc::clone(&device), &config).unwrap();

        let frame = expect_ready(scheduler.begin_frame().unwrap());
        scheduler.end_frame(frame).unwrap();
        let err = scheduler.begin_frame().unwrap_err();

        assert!(matches!(err, RenderError::Hang { what: "frame fence", .. }));
    }

    #[test]
    fn test_acquire_timeout_is_a_hang() {
        let device = Arc::new(DummyDevice::new());
        let mut scheduler = scheduler(&device);
        device.script_acquire(AcquireOutcome::Timeout);

        let err = scheduler.begin_frame().unwrap_err();

        assert!(matches!(err, RenderError::Hang { what: "swapchain acquire", .. }));
    }

    #[test]
    fn test_slot_queue_flushes_only_after_its_fence() {
        let device = Arc::new(DummyDevice::new());
        let mut scheduler = scheduler(&device);
        let flushed = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let frame = expect_ready(scheduler.begin_frame().unwrap());
        let flag = Arc::clone(&flushed);
        scheduler
            .slot_mut(&frame)
            .deletion_queue()
            .push(move || flag.store(true, std::sync::atomic::Ordering::SeqCst));
        scheduler.end_frame(frame).unwrap();

        // Slot 1 does not touch slot 0's queue.
        let frame = expect_ready(scheduler.begin_frame().unwrap());
        scheduler.end_frame(frame).unwrap();
        assert!(!flushed.load(std::sync::atomic::Ordering::SeqCst));

        let _frame = expect_ready(scheduler.begin_frame().unwrap());
        assert!(flushed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_recreate_semaphores_replaces_handles() {
        let device = Arc::new(DummyDevice::new());
        let mut scheduler = scheduler(&device);
        let before = scheduler.current_slot_mut().acquire_semaphore();
        let live = device.live_semaphores();

        scheduler.recreate_semaphores().unwrap();

        assert_ne!(scheduler.current_slot_mut().acquire_semaphore(), before);
        assert_eq!(device.live_semaphores(), live);
    }

    #[test]
    fn test_drop_releases_slot_resources() {
        let device = Arc::new(DummyDevice::new());
        {
            let _scheduler = scheduler(&device);
            assert_eq!(device.live_fences(), 2);
            assert_eq!(device.live_semaphores(), 4);
            assert_eq!(device.live_descriptor_pools(), 2);
        }
        assert_eq!(device.live_fences(), 0);
        assert_eq!(device.live_semaphores(), 0);
        assert_eq!(device.live_command_pools(), 0);
        assert_eq!(device.live_descriptor_pools(), 0);
    }

    #[test]
    fn test_zero_frames_in_flight_is_rejected() {
        let device = Arc::new(DummyDevice::new());
        let config = RendererConfig {
            frames_in_flight: 0,
            ..RendererConfig::default()
        };
        assert!(matches!(
            FrameScheduler::new(device, &config),
            Err(RenderError::InvalidArgument(_))
        ));
    }
}
