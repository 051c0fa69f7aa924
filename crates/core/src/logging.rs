//! Logging initialization and configuration.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

/// Initialize the logging system with tracing.
///
/// `RUST_LOG` takes precedence over the configured level, so a single run can
/// be made more verbose without editing the config file.
///
/// # Example
/// ```
/// ember_core::init_logging(&ember_core::LoggingConfig::default());
/// tracing::info!("Renderer initialized");
/// ```
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config)));

    // A second call (e.g. from doctests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}

fn default_directives(config: &LoggingConfig) -> String {
    let level = config.level.as_str();
    format!("{level},ember_renderer={level},ember_rhi={level},gpu_allocator=warn,winit=warn")
}
