//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Surface query or creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// A handle was not created by this device or was already released
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// SPIR-V could not be turned into a shader module
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Pipeline description is incomplete or inconsistent
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// Host write into memory that is not mapped
    #[error("Buffer is not host visible: {0}")]
    NotHostVisible(String),
}

impl RhiError {
    /// True for the two descriptor pool failures that are recoverable by
    /// moving to a different pool.
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(
            self,
            RhiError::VulkanError(
                vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL
            )
        )
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhaustion_classification() {
        assert!(RhiError::from(vk::Result::ERROR_OUT_OF_POOL_MEMORY).is_pool_exhausted());
        assert!(RhiError::from(vk::Result::ERROR_FRAGMENTED_POOL).is_pool_exhausted());
        assert!(!RhiError::from(vk::Result::ERROR_DEVICE_LOST).is_pool_exhausted());
        assert!(!RhiError::NoSuitableGpu.is_pool_exhausted());
    }
}
