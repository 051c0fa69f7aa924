//! Owned synchronization primitives.
//!
//! - [`Semaphore`]: GPU-to-GPU ordering between queue operations
//! - [`Fence`]: GPU-to-CPU completion signal the host can wait on
//!
//! Both hold an `Arc` of the device that created them and destroy the handle
//! on drop. Owners must make sure the GPU no longer references the handle
//! before dropping (the frame scheduler waits for device idle first).

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::debug;

use crate::error::RhiResult;
use crate::gpu::GpuDevice;

/// Owned semaphore.
pub struct Semaphore<D: GpuDevice> {
    device: Arc<D>,
    semaphore: vk::Semaphore,
}

impl<D: GpuDevice> Semaphore<D> {
    /// Creates a new semaphore in the unsignaled state.
    pub fn new(device: Arc<D>) -> RhiResult<Self> {
        let semaphore = device.create_semaphore()?;
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl<D: GpuDevice> Drop for Semaphore<D> {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.semaphore);
        debug!("Semaphore destroyed");
    }
}

/// Owned fence.
pub struct Fence<D: GpuDevice> {
    device: Arc<D>,
    fence: vk::Fence,
}

impl<D: GpuDevice> Fence<D> {
    /// Creates a new fence.
    ///
    /// Frame fences start signaled so the first wait on a fresh slot returns
    /// immediately.
    pub fn new(device: Arc<D>, signaled: bool) -> RhiResult<Self> {
        let fence = device.create_fence(signaled)?;
        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Waits for the fence. Returns `false` if `timeout` elapsed first.
    pub fn wait(&self, timeout: Duration) -> RhiResult<bool> {
        self.device.wait_for_fence(self.fence, timeout)
    }

    /// Returns the fence to the unsignaled state.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_fence(self.fence)
    }

    /// Non-blocking status query. Errors read as unsignaled.
    pub fn is_signaled(&self) -> bool {
        self.device.fence_signaled(self.fence).unwrap_or(false)
    }
}

impl<D: GpuDevice> Drop for Fence<D> {
    fn drop(&mut self) {
        self.device.destroy_fence(self.fence);
        debug!("Fence destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::DummyDevice;

    #[test]
    fn test_fence_initial_state() {
        let device = Arc::new(DummyDevice::new());
        let signaled = Fence::new(device.clone(), true).unwrap();
        let unsignaled = Fence::new(device.clone(), false).unwrap();

        assert!(signaled.is_signaled());
        assert!(!unsignaled.is_signaled());
        assert!(signaled.wait(Duration::from_millis(1)).unwrap());
        assert!(!unsignaled.wait(Duration::from_millis(1)).unwrap());
    }

    #[test]
    fn test_reset_then_wait_times_out() {
        let device = Arc::new(DummyDevice::new());
        let fence = Fence::new(device, true).unwrap();
        fence.reset().unwrap();
        assert!(!fence.wait(Duration::from_millis(5)).unwrap());
    }

    #[test]
    fn test_drop_destroys_handles() {
        let device = Arc::new(DummyDevice::new());
        {
            let _fence = Fence::new(device.clone(), true).unwrap();
            let _semaphore = Semaphore::new(device.clone()).unwrap();
            assert_eq!(device.live_fences(), 1);
            assert_eq!(device.live_semaphores(), 1);
        }
        assert_eq!(device.live_fences(), 0);
        assert_eq!(device.live_semaphores(), 0);
    }

    #[test]
    fn test_sync_wrappers_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Fence<DummyDevice>>();
        assert_send_sync::<Semaphore<DummyDevice>>();
    }
}
