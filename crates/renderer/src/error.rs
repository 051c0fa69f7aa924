//! Renderer error types.

use std::time::Duration;

use ember_resources::ResourceError;
use ember_rhi::RhiError;
use thiserror::Error;

/// Errors surfaced by the frame loop and resource layer.
///
/// Everything except [`RenderError::AssetLoad`] is fatal: the caller is
/// expected to stop rendering and shut down. An out-of-date swapchain is not
/// an error; it shows up as an abandoned frame and a raised resize flag.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Device, surface or renderer setup failed before the frame loop ran.
    #[error("Renderer initialization failed: {0}")]
    FatalInit(String),

    /// A fence or acquire wait exceeded its bound; the GPU is treated as hung.
    #[error("GPU hang: {what} did not complete within {timeout:?}")]
    Hang {
        what: &'static str,
        timeout: Duration,
    },

    /// A descriptor allocation failed again after rotating to a fresh pool.
    #[error("Resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// Texture or mesh source could not be loaded.
    #[error("Asset load failed: {0}")]
    AssetLoad(#[from] ResourceError),

    #[error("RHI error: {0}")]
    Rhi(#[from] RhiError),

    /// A caller handed the renderer something it cannot use.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl RenderError {
    /// Whether rendering can continue after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RenderError::AssetLoad(_))
    }
}

/// Result type for renderer operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use ember_rhi::vk;

    use super::*;

    #[test]
    fn test_only_asset_errors_are_recoverable() {
        let asset = RenderError::from(ResourceError::FileNotFound(PathBuf::from("missing.png")));
        assert!(!asset.is_fatal());

        let hang = RenderError::Hang {
            what: "frame fence",
            timeout: Duration::from_secs(1),
        };
        assert!(hang.is_fatal());
        assert!(RenderError::from(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST)).is_fatal());
        assert!(RenderError::ResourceExhaustion("pool".into()).is_fatal());
    }

    #[test]
    fn test_hang_message_names_the_wait() {
        let err = RenderError::Hang {
            what: "immediate submit",
            timeout: Duration::from_millis(250),
        };
        assert_eq!(
            err.to_string(),
            "GPU hang: immediate submit did not complete within 250ms"
        );
    }
}
