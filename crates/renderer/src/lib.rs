//! Frame submission and resource lifecycle.
//!
//! This crate drives a [`GpuDevice`](ember_rhi::GpuDevice) through the frame
//! loop:
//! - [`FrameScheduler`]: N frame slots paced by fences, acquire and present
//! - [`DeletionQueue`]: deferred, reverse-order resource release
//! - [`GrowableDescriptorAllocator`]: descriptor sets from self-growing pools
//! - [`DrawBatcher`]: draw recording with redundant binds elided
//! - [`ImmediateSubmitExecutor`]: blocking one-off submissions for uploads
//! - [`GpuResources`]: buffers, images and meshes through staging
//! - [`Renderer`]: all of the above, rendering a scene graph per frame

mod error;

pub mod deletion_queue;
pub mod descriptor_allocator;
pub mod draw_batcher;
pub mod frame_scheduler;
pub mod immediate;
pub mod material;
pub mod renderer;
pub mod resources;
pub mod stats;

pub use deletion_queue::DeletionQueue;
pub use descriptor_allocator::GrowableDescriptorAllocator;
pub use draw_batcher::{DrawBatcher, DrawStats};
pub use error::{RenderError, RenderResult};
pub use frame_scheduler::{ActiveFrame, FrameBegin, FrameScheduler, FrameSlot};
pub use immediate::ImmediateSubmitExecutor;
pub use material::{MaterialResources, MeshPipelines};
pub use renderer::{DrawOutcome, Renderer};
pub use resources::{DefaultResources, GpuResources};
pub use stats::EngineStats;
