//! Window and presentation surface for the Ember renderer.
//!
//! - [`Window`]: a winit window sized from [`WindowConfig`](ember_core::WindowConfig)
//! - [`Surface`]: the Vulkan surface created for it, destroyed on drop

mod window;

pub use window::{Surface, Window};
