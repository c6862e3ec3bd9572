//! Frame rendering on top of the RHI.
//!
//! This crate orchestrates the rendering process:
//! - Mesh upload through staging buffers
//! - Static command recording, one buffer per swapchain image
//! - Frame scheduling with a fixed ring of in-flight slots
//! - Optional per-image projection uniforms
//! - [`RenderCore`] composition and the real-backend [`Renderer`]

pub mod frame_scheduler;
pub mod mesh;
pub mod recorder;
pub mod render_core;
pub mod renderer;
pub mod uniforms;

pub use frame_scheduler::{slot_for_frame, FrameInfo, FrameScheduler, SlotState};
pub use mesh::{Mesh, MeshData};
pub use recorder::CommandRecorder;
pub use render_core::{RenderCore, SurfaceTarget};
pub use renderer::Renderer;
pub use uniforms::{ProjectionMatrices, UniformSet, UNIFORM_BINDING};
pub use vkframe_rhi::sync::MAX_FRAMES_IN_FLIGHT;
