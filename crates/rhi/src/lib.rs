//! Render Hardware Interface.
//!
//! This crate defines the [`GpuDevice`] seam the renderer records through and
//! provides its implementations:
//! - [`vulkan::VulkanDevice`], built on `ash` and `gpu-allocator`
//! - `dummy::DummyDevice` (feature `dummy`), an in-memory device for tests
//!
//! It also holds the plain-data types that cross the seam: buffers, images,
//! barriers, rendering attachments, descriptor writes and pipeline state.

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod gpu;
pub mod image;
pub mod pipeline;
pub mod rendering;
pub mod sync;
pub mod vertex;
pub mod vulkan;

#[cfg(any(test, feature = "dummy"))]
pub mod dummy;

pub use error::{RhiError, RhiResult};
pub use gpu::{AcquireOutcome, GpuDevice, PresentOutcome, SubmitSync};

// Re-export ash types that users might need
pub use ash::vk;
