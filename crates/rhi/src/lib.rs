//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides a safe abstraction over Vulkan using the `ash` crate.
//! It handles:
//! - Capability probing, instance and device creation
//! - Adapter selection and swapchain negotiation
//! - Render pass, framebuffer and pipeline creation
//! - Command buffer recording, buffer management and uniform descriptors
//! - Synchronization primitives
//!
//! Device-level calls go through the [`api::DeviceApi`] trait. The `mock`
//! feature exposes [`mock::MockDevice`], a recording implementation used to
//! test everything above the driver without a GPU.

mod error;

pub mod api;
pub mod buffer;
pub mod capabilities;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod framebuffer;
pub mod instance;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{FrameStage, RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
