//! Synchronous one-off GPU submissions.
//!
//! Uploads at load time run outside the frame loop: record a short command
//! buffer, submit it, and block until it completes. [`ImmediateSubmitExecutor`]
//! owns a dedicated pool, command buffer and fence for that. Only one
//! submission is in flight at a time; `&mut self` enforces it.

use std::sync::Arc;
use std::time::Duration;

use ember_rhi::command::{CommandBuffer, CommandPool};
use ember_rhi::sync::Fence;
use ember_rhi::{GpuDevice, SubmitSync, vk};
use tracing::{error, trace};

use crate::error::{RenderError, RenderResult};

/// Runs recorded commands on the graphics queue and waits for them.
pub struct ImmediateSubmitExecutor<D: GpuDevice> {
    command_buffer: vk::CommandBuffer,
    fence: Fence<D>,
    pool: CommandPool<D>,
    timeout: Duration,
}

impl<D: GpuDevice> ImmediateSubmitExecutor<D> {
    /// Creates the executor. `timeout` bounds each wait for completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool, buffer or fence cannot be created.
    pub fn new(device: Arc<D>, timeout: Duration) -> RenderResult<Self> {
        let pool = CommandPool::new(Arc::clone(&device))?;
        let command_buffer = pool.allocate_command_buffer()?;
        let fence = Fence::new(device, true)?;
        Ok(Self {
            command_buffer,
            fence,
            pool,
            timeout,
        })
    }

    /// Records commands with `record`, submits them and blocks until done.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Hang`] if the fence does not signal within the
    /// timeout, or the device error if recording or submission fails.
    pub fn submit<F>(&mut self, record: F) -> RenderResult<()>
    where
        F: FnOnce(&CommandBuffer<'_, D>),
    {
        let device = self.pool.device();
        self.fence.reset()?;

        let cmd = CommandBuffer::new(&**device, self.command_buffer);
        cmd.reset()?;
        cmd.begin()?;
        record(&cmd);
        cmd.end()?;

        device.submit(self.command_buffer, &SubmitSync::fence_only(self.fence.handle()))?;
        if !self.fence.wait(self.timeout)? {
            error!("Immediate submit did not complete within {:?}", self.timeout);
            return Err(RenderError::Hang {
                what: "immediate submit",
                timeout: self.timeout,
            });
        }
        trace!("Immediate submit complete");
        Ok(())
    }

    #[inline]
    pub fn device(&self) -> &Arc<D> {
        self.pool.device()
    }
}

#[cfg(test)]
mod tests {
    use ember_rhi::dummy::{Command, DummyDevice};

    use super::*;

    #[test]
    fn test_submit_records_and_waits() {
        let device = Arc::new(DummyDevice::new());
        let mut executor =
            ImmediateSubmitExecutor::new(Arc::clone(&device), Duration::from_secs(1)).unwrap();

        executor
            .submit(|cmd| {
                cmd.clear_color_image(vk::Image::null(), vk::ImageLayout::GENERAL, [1.0; 4])
            })
            .unwrap();
        executor.submit(|_| {}).unwrap();

        let submissions = device.submissions();
        assert_eq!(submissions.len(), 2);
        assert!(matches!(
            submissions[0].commands.as_slice(),
            [Command::ClearColorImage { .. }]
        ));
        assert!(submissions[1].commands.is_empty());
        assert!(submissions[0].sync.wait.is_none());
        assert_eq!(device.signaled_fence_submits(), 0);
    }

    #[test]
    fn test_unsignaled_fence_is_a_hang() {
        let device = Arc::new(DummyDevice::new());
        device.set_hold_submissions(true);
        let mut executor =
            ImmediateSubmitExecutor::new(Arc::clone(&device), Duration::from_millis(10)).unwrap();

        let err = executor.submit(|_| {}).unwrap_err();

        assert!(matches!(
            err,
            RenderError::Hang {
                what: "immediate submit",
                ..
            }
        ));
    }

    #[test]
    fn test_drop_releases_pool_and_fence() {
        let device = Arc::new(DummyDevice::new());
        {
            let _executor =
                ImmediateSubmitExecutor::new(Arc::clone(&device), Duration::from_secs(1)).unwrap();
            assert_eq!(device.live_command_pools(), 1);
            assert_eq!(device.live_fences(), 1);
        }
        assert_eq!(device.live_command_pools(), 0);
        assert_eq!(device.live_fences(), 0);
    }
}
