//! Window creation on winit and Vulkan surface creation via `ash-window`.

use std::ffi::{CStr, c_char};
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use ember_core::{Error, Result, WindowConfig};

/// Owned `VkSurfaceKHR`.
///
/// The instance it was created from must outlive it, and every device or
/// swapchain built on it must be dropped first.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created by ash_window::create_surface with this loader's
        // instance, and destroyed nowhere else.
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        debug!("Vulkan surface destroyed");
    }
}

/// Application window.
///
/// Tracks the latest physical size reported by resize events; a zero
/// dimension means the window is minimized and nothing should be presented.
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
}

impl Window {
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(config.resizable);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        // The platform may not honor the requested size exactly.
        let size = window.inner_size();
        info!(
            "Window '{}' created: {}x{}",
            config.title, size.width, size.height
        );

        Ok(Self {
            window: Arc::new(window),
            width: size.width,
            height: size.height,
        })
    }

    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_minimized(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Record a size from a resize event.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        debug!("Window resized: {}x{}", width, height);
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Instance extensions needed to create a surface for this window.
    ///
    /// The returned pointers reference static strings owned by `ash-window`.
    pub fn required_surface_extensions(&self) -> Result<Vec<*const c_char>> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Surface(format!("no display handle: {}", e)))?;
        let extensions = ash_window::enumerate_required_extensions(display.as_raw())
            .map_err(|e| Error::Surface(format!("cannot enumerate surface extensions: {}", e)))?;

        debug!(
            "Surface extensions: {:?}",
            extensions
                .iter()
                // SAFETY: ash-window returns pointers to static, nul-terminated names.
                .map(|&ext| unsafe { CStr::from_ptr(ext) })
                .collect::<Vec<_>>()
        );
        Ok(extensions.to_vec())
    }

    /// Creates a surface on `instance`, which must outlive it.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Surface(format!("no display handle: {}", e)))?;
        let window = self
            .window
            .window_handle()
            .map_err(|e| Error::Surface(format!("no window handle: {}", e)))?;

        // SAFETY: both handles come from a live winit window that outlives the
        // surface, and the instance is valid for the duration of the call.
        let handle = unsafe {
            ash_window::create_surface(entry, instance, display.as_raw(), window.as_raw(), None)
        }
        .map_err(|e| Error::Surface(e.to_string()))?;

        info!("Vulkan surface created");
        Ok(Surface {
            handle,
            loader: ash::khr::surface::Instance::new(entry, instance),
        })
    }
}
