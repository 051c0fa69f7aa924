//! Vulkan backend.
//!
//! [`Instance`] is created first (it needs the window system's surface
//! extensions), then the platform layer creates a surface from it, and finally
//! [`VulkanDevice`] picks a GPU for that surface.

mod device;
mod instance;
mod physical_device;
mod swapchain;

pub use device::VulkanDevice;
pub use instance::Instance;
pub use physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, RequiredFeatures};
pub use swapchain::{Swapchain, SwapchainSupportDetails};
