//! Engine configuration.
//!
//! Configuration is read from a TOML file. Every field has a default, so a
//! file only needs to name the values it changes:
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//!
//! [renderer]
//! frames_in_flight = 2
//! frame_timeout_ms = 1000
//! render_scale = 0.75
//!
//! [logging]
//! level = "debug"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub renderer: RendererConfig,
    pub logging: LoggingConfig,
}

/// Window creation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1700,
            height: 900,
            title: "Ember".to_string(),
            resizable: true,
        }
    }
}

/// Frame pacing, timeouts and descriptor pool sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of frame slots the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Bound on the per-frame fence wait before the GPU is declared hung.
    pub frame_timeout_ms: u64,
    /// Bound on swapchain image acquisition.
    pub acquire_timeout_ms: u64,
    /// Bound on an immediate (upload) submission.
    pub immediate_timeout_ns: u64,
    /// Initial set count of each frame slot's descriptor allocator.
    pub frame_descriptor_sets: u32,
    /// Initial set count of the engine-lifetime descriptor allocator.
    pub global_descriptor_sets: u32,
    /// Ceiling on the set count of any newly created descriptor pool.
    pub max_sets_per_pool: u32,
    /// Fraction of the draw image rendered each frame, in (0, 1].
    pub render_scale: f32,
    /// Background clear color (linear RGBA).
    pub clear_color: [f32; 4],
    /// Request the Khronos validation layer.
    pub validation: bool,
    /// Present with FIFO; otherwise prefer mailbox, then immediate.
    pub vsync: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            frame_timeout_ms: 1_000,
            acquire_timeout_ms: 1_000,
            immediate_timeout_ns: 9_999_999_999,
            frame_descriptor_sets: 1_000,
            global_descriptor_sets: 10,
            max_sets_per_pool: 4_092,
            render_scale: 1.0,
            clear_color: [0.05, 0.05, 0.08, 1.0],
            validation: cfg!(debug_assertions),
            vsync: true,
        }
    }
}

impl RendererConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn immediate_timeout(&self) -> Duration {
        Duration::from_nanos(self.immediate_timeout_ns)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

/// Default log level when `RUST_LOG` is not set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the renderer cannot run with.
    pub fn validate(&self) -> Result<()> {
        let renderer = &self.renderer;
        if renderer.frames_in_flight == 0 {
            return Err(Error::Config(
                "renderer.frames_in_flight must be at least 1".to_string(),
            ));
        }
        if !(renderer.render_scale > 0.0 && renderer.render_scale <= 1.0) {
            return Err(Error::Config(format!(
                "renderer.render_scale must be in (0, 1], got {}",
                renderer.render_scale
            )));
        }
        if renderer.frame_descriptor_sets == 0 || renderer.global_descriptor_sets == 0 {
            return Err(Error::Config(
                "descriptor set counts must be non-zero".to_string(),
            ));
        }
        if renderer.max_sets_per_pool < renderer.frame_descriptor_sets
            || renderer.max_sets_per_pool < renderer.global_descriptor_sets
        {
            return Err(Error::Config(format!(
                "renderer.max_sets_per_pool ({}) is below an initial set count",
                renderer.max_sets_per_pool
            )));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config("window size must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.renderer.frames_in_flight, 2);
        assert_eq!(config.renderer.frame_timeout(), Duration::from_secs(1));
        assert_eq!(config.renderer.max_sets_per_pool, 4092);
        assert!(config.renderer.vsync);
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [window]
            width = 1280

            [renderer]
            render_scale = 0.5
            vsync = false

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 900);
        assert_eq!(config.renderer.render_scale, 0.5);
        assert!(!config.renderer.vsync);
        assert_eq!(config.renderer.frames_in_flight, 2);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_rejects_zero_frames_in_flight() {
        let err = Config::from_toml_str("[renderer]\nframes_in_flight = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_render_scale_out_of_range() {
        assert!(Config::from_toml_str("[renderer]\nrender_scale = 0.0\n").is_err());
        assert!(Config::from_toml_str("[renderer]\nrender_scale = 1.5\n").is_err());
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = Config::from_toml_str("[renderer\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_immediate_timeout_matches_nanoseconds() {
        let config = RendererConfig::default();
        assert_eq!(config.immediate_timeout().as_nanos(), 9_999_999_999);
    }
}
