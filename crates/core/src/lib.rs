//! Core utilities for the Ember renderer.
//!
//! This crate provides foundational types and utilities used across the engine:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - TOML configuration

mod config;
mod error;
mod logging;
mod timer;

pub use config::{Config, LogLevel, LoggingConfig, RendererConfig, WindowConfig};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
