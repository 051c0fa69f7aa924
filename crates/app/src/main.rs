//! Ember - windowed host for the renderer.
//!
//! Usage: `ember [config.toml]` (defaults to `ember.toml` in the working
//! directory; a missing file means built-in defaults).

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use tracing::{debug, error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use ember_core::{Config, Timer};
use ember_platform::{Surface, Window};
use ember_renderer::Renderer;
use ember_rhi::vulkan::{Instance, VulkanDevice};
use ember_scene::{SceneData, SceneGraph};

const DEFAULT_CONFIG_PATH: &str = "ember.toml";
const STATS_INTERVAL_MS: f32 = 1000.0;

/// GPU objects for one window. Fields drop in declaration order, which is
/// the order Vulkan needs: renderer, device, surface, instance.
struct Gpu {
    renderer: Renderer<VulkanDevice>,
    device: Arc<VulkanDevice>,
    _surface: Surface,
    _instance: Arc<Instance>,
}

impl Gpu {
    fn new(window: &Window, config: &Config) -> Result<Self> {
        let renderer_config = &config.renderer;
        let extensions = window.required_surface_extensions()?;
        let instance = Arc::new(
            Instance::new(&config.window.title, renderer_config.validation, &extensions)
                .context("failed to create Vulkan instance")?,
        );
        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .context("failed to create window surface")?;
        let device = Arc::new(
            VulkanDevice::new(
                Arc::clone(&instance),
                surface.handle(),
                window.width(),
                window.height(),
                renderer_config.vsync,
            )
            .context("failed to create GPU device")?,
        );
        let renderer = Renderer::new(Arc::clone(&device), renderer_config)
            .context("failed to initialize renderer")?;

        Ok(Self {
            renderer,
            device,
            _surface: surface,
            _instance: instance,
        })
    }
}

struct App {
    config: Config,
    window: Option<Window>,
    gpu: Option<Gpu>,
    scene: SceneGraph,
    stats_timer: Timer,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            window: None,
            gpu: None,
            scene: SceneGraph::new(),
            stats_timer: Timer::start(),
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window =
            Window::new(event_loop, &self.config.window).context("failed to create window")?;
        let mut gpu = Gpu::new(&window, &self.config)?;
        gpu.renderer.set_scene_data(scene_data(window.width(), window.height()));
        info!(
            "Rendering on '{}', entering main loop",
            gpu.device.physical_device().device_name()
        );
        self.gpu = Some(gpu);
        self.window = Some(window);
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(window), Some(gpu)) = (&self.window, &mut self.gpu) else {
            return Ok(());
        };
        if window.is_minimized() {
            return Ok(());
        }

        let renderer = &mut gpu.renderer;
        if renderer.resize_requested() {
            renderer.resize(window.width(), window.height())?;
            renderer.set_scene_data(scene_data(window.width(), window.height()));
        }
        renderer.draw(&self.scene)?;

        if self.stats_timer.elapsed_ms() >= STATS_INTERVAL_MS {
            debug!("{}", renderer.stats());
            self.stats_timer.restart();
        }
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{:#}", err);
        self.fatal = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none()
            && let Err(e) = self.init(event_loop)
        {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = &mut self.window {
                    window.resize(size.width, size.height);
                }
                // Minimized: keep the old swapchain until a real size arrives.
                if let Some(gpu) = &mut self.gpu
                    && size.width > 0
                    && size.height > 0
                    && let Err(e) = gpu.renderer.resize(size.width, size.height)
                {
                    self.fail(event_loop, e.into());
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Release GPU objects while the window still exists.
        self.gpu = None;
        self.window = None;
    }
}

fn scene_data(width: u32, height: u32) -> SceneData {
    let aspect = width.max(1) as f32 / height.max(1) as f32;
    let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
    // Near and far swapped: depth is reversed, near maps to 1.
    let mut proj = Mat4::perspective_rh(70f32.to_radians(), aspect, 10000.0, 0.1);
    // Vulkan clip space has +y pointing down.
    proj.y_axis.y *= -1.0;
    SceneData::new(view, proj)
}

/// Returns the config and whether the file was missing.
fn load_config(path: &Path) -> Result<(Config, bool)> {
    if !path.exists() {
        return Ok((Config::default(), true));
    }
    let config = Config::from_file(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    Ok((config, false))
}

fn run() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let (config, defaulted) = load_config(Path::new(&path))?;

    ember_core::init_logging(&config.logging);
    if defaulted {
        warn!("Config file {} not found, using defaults", path);
    }
    info!("Starting Ember");

    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("event loop failed")?;

    match app.fatal.take() {
        Some(err) => Err(err),
        None => {
            info!("Exited cleanly");
            Ok(())
        }
    }
}

fn main() {
    if let Err(err) = run() {
        // Logging may not be up if the config failed to load.
        eprintln!("ember: {:#}", err);
        std::process::exit(1);
    }
}
