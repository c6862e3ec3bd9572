//! Renderer wired to the real Vulkan backend.
//!
//! This module provides the [`Renderer`] struct that creates the instance,
//! the window surface and the logical device, then hands the device to a
//! [`RenderCore`].

use ash::vk;
use tracing::info;

use vkframe_core::config::RendererConfig;
use vkframe_platform::{Surface, Window};
use vkframe_rhi::device::Device;
use vkframe_rhi::instance::{Instance, InstanceConfig};
use vkframe_rhi::physical_device::{select_physical_device, SurfaceAdapterQuery};
use vkframe_rhi::shader::ShaderSet;
use vkframe_rhi::{RhiError, RhiResult};

use crate::frame_scheduler::FrameInfo;
use crate::mesh::MeshData;
use crate::render_core::{RenderCore, SurfaceTarget};

/// Main renderer that owns every Vulkan object for one window.
///
/// # Resource Destruction Order
///
/// 1. Render core: waits for idle, releases frame resources, then the device
/// 2. Window surface
/// 3. Instance (debug messenger, then the instance itself)
pub struct Renderer {
    core: RenderCore,
    surface: Surface,
    instance: Instance,
}

impl Renderer {
    /// Creates a renderer that draws the built-in quad.
    ///
    /// # Errors
    ///
    /// Returns an error if any Vulkan resource creation fails, no adapter is
    /// suitable, or a shader file cannot be read.
    pub fn new(window: &Window, config: &RendererConfig) -> RhiResult<Self> {
        Self::with_meshes(window, config, &[MeshData::quad()])
    }

    /// Creates a renderer that draws `meshes` every frame.
    pub fn with_meshes(
        window: &Window,
        config: &RendererConfig,
        meshes: &[MeshData],
    ) -> RhiResult<Self> {
        let (width, height) = window.framebuffer_size();
        info!("Initializing Vulkan renderer ({}x{})", width, height);

        let required_extensions = window
            .required_instance_extensions()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;
        let instance = Instance::new(&InstanceConfig {
            application_name: window.title().to_string(),
            required_extensions,
            enable_validation: config.enable_validation,
            validation_layers: config.validation_layers.clone(),
        })?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let query = SurfaceAdapterQuery::new(instance.handle(), surface.loader(), surface.handle());
        let adapter = select_physical_device(&query, &config.device_extensions)?;
        let device = Device::new(&instance, &adapter, &config.device_extensions)?;

        let shaders = ShaderSet::load(&config.vertex_shader, &config.fragment_shader)?;
        let target = SurfaceTarget {
            surface: surface.handle(),
            support: adapter.swapchain_support.clone(),
            width,
            height,
        };
        let core = if config.uniforms.enabled {
            let spin = config.uniforms.spin_degrees_per_sec.to_radians();
            RenderCore::with_uniforms(device, &target, &shaders, meshes, spin)?
        } else {
            RenderCore::new(device, &target, &shaders, meshes)?
        };

        info!("Renderer initialized on {}", adapter.device_name());

        Ok(Self {
            core,
            surface,
            instance,
        })
    }

    /// Advances animation by `dt` seconds, then renders and presents one frame.
    ///
    /// # Errors
    ///
    /// Any acquire, submit or present failure is returned and is fatal.
    pub fn render_frame(&mut self, dt: f32) -> RhiResult<FrameInfo> {
        self.core.advance(dt);
        self.core.draw_frame()
    }

    /// Returns the render core.
    pub fn core(&self) -> &RenderCore {
        &self.core
    }

    /// Returns the current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.core.extent()
    }

    /// Returns the swapchain format.
    pub fn format(&self) -> vk::Format {
        self.core.format()
    }

    /// Returns whether validation layers are active.
    pub fn validation_enabled(&self) -> bool {
        self.instance.has_validation()
    }

    /// Returns the presentation surface handle.
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface.handle()
    }
}
