//! Core utilities for the renderer.
//!
//! This crate provides foundational types and utilities used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - Configuration loading

pub mod config;
mod error;
mod logging;
mod timer;

pub use config::{AppConfig, RendererConfig, StatsConfig, UniformsConfig, WindowConfig};
pub use error::{Error, Result};
pub use logging::{init_logging, LogConfig, DEFAULT_FILTER};
pub use timer::{FrameStats, FrameTimer};
