//! Platform layer for the renderer.
//!
//! This crate provides the window collaborator:
//! - Window creation via winit
//! - Surface extension discovery and Vulkan surface creation

mod window;

pub use window::{Surface, Window};

// Re-export winit types the event loop needs
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
