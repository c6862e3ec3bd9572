//! Frame-rendering core.
//!
//! [`RenderCore`] composes everything that sits on top of a logical device:
//! swapchain, render pass, framebuffers, pipeline, meshes, recorded command
//! buffers and the frame scheduler. Optionally it also owns per-image
//! projection uniforms. It is backend-agnostic; the same code runs against
//! the real driver and the recording mock.
//!
//! # Resource Destruction Order
//!
//! Fields are declared in reverse creation order so the default drop glue
//! tears them down correctly after [`Drop`] waits for the device to go idle:
//!
//! 1. Frame scheduler (semaphores and fences)
//! 2. Command buffers, meshes and the command pool
//! 3. Pipeline (then its layout)
//! 4. Uniform descriptor pool, buffers and set layout, when enabled
//! 5. Framebuffers, render pass
//! 6. Swapchain (views, then the swapchain)
//! 7. Device, once the last `Arc` is released

use std::sync::Arc;

use ash::vk;
use tracing::{error, info};

use vkframe_rhi::command::{CommandBuffer, CommandPool};
use vkframe_rhi::device::Device;
use vkframe_rhi::framebuffer::Framebuffers;
use vkframe_rhi::pipeline::{GraphicsPipelineBuilder, Pipeline};
use vkframe_rhi::render_pass::RenderPass;
use vkframe_rhi::shader::ShaderSet;
use vkframe_rhi::swapchain::{Swapchain, SwapchainSupportDetails};
use vkframe_rhi::RhiResult;

use crate::frame_scheduler::{FrameInfo, FrameScheduler};
use crate::mesh::{Mesh, MeshData};
use crate::recorder::CommandRecorder;
use crate::uniforms::{ProjectionMatrices, UniformSet};

/// Presentation surface plus the data the swapchain is negotiated from.
#[derive(Debug, Clone)]
pub struct SurfaceTarget {
    pub surface: vk::SurfaceKHR,
    pub support: SwapchainSupportDetails,
    /// Window framebuffer width in pixels.
    pub width: u32,
    /// Window framebuffer height in pixels.
    pub height: u32,
}

/// Everything needed to render frames on one surface.
pub struct RenderCore {
    scheduler: FrameScheduler,
    command_buffers: Vec<CommandBuffer>,
    meshes: Vec<Mesh>,
    command_pool: CommandPool,
    pipeline: Pipeline,
    uniforms: Option<UniformSet>,
    framebuffers: Framebuffers,
    render_pass: RenderPass,
    swapchain: Swapchain,
    device: Arc<Device>,
    /// Model rotation in radians per second; only used with uniforms.
    spin: f32,
    angle: f32,
}

impl RenderCore {
    /// Builds the core and records one command buffer per swapchain image.
    ///
    /// Meshes are uploaded through the graphics queue before recording.
    ///
    /// # Errors
    ///
    /// Any failure is fatal. Objects created before the failing step are
    /// released in reverse order.
    pub fn new(
        device: Arc<Device>,
        target: &SurfaceTarget,
        shaders: &ShaderSet,
        meshes: &[MeshData],
    ) -> RhiResult<Self> {
        Self::build(device, target, shaders, meshes, None)
    }

    /// Builds the core with per-image projection uniforms bound at set 0.
    ///
    /// The model turns `spin` radians per second of time passed to
    /// [`Self::advance`]. The vertex shader must declare the matrix block.
    pub fn with_uniforms(
        device: Arc<Device>,
        target: &SurfaceTarget,
        shaders: &ShaderSet,
        meshes: &[MeshData],
        spin: f32,
    ) -> RhiResult<Self> {
        Self::build(device, target, shaders, meshes, Some(spin))
    }

    fn build(
        device: Arc<Device>,
        target: &SurfaceTarget,
        shaders: &ShaderSet,
        meshes: &[MeshData],
        spin: Option<f32>,
    ) -> RhiResult<Self> {
        let (graphics_family, _) = device.queue_families().require()?;

        let swapchain = Swapchain::new(
            device.clone(),
            target.surface,
            &target.support,
            target.width,
            target.height,
        )?;
        let render_pass = RenderPass::new(device.clone(), swapchain.format())?;
        let framebuffers = Framebuffers::new(
            device.clone(),
            render_pass.handle(),
            swapchain.image_views(),
            swapchain.extent(),
        )?;
        let uniforms = match spin {
            Some(_) => Some(UniformSet::new(device.clone(), swapchain.image_count())?),
            None => None,
        };
        let set_layouts: Vec<vk::DescriptorSetLayout> =
            uniforms.iter().map(UniformSet::layout).collect();
        let pipeline = GraphicsPipelineBuilder::new(render_pass.handle(), swapchain.extent())
            .descriptor_set_layouts(&set_layouts)
            .build(device.clone(), shaders)?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;

        let meshes = meshes
            .iter()
            .map(|data| {
                Mesh::upload(
                    device.clone(),
                    device.graphics_queue(),
                    &command_pool,
                    data,
                )
            })
            .collect::<RhiResult<Vec<_>>>()?;

        let command_buffers = command_pool.allocate_command_buffers(framebuffers.len() as u32)?;
        CommandRecorder::new(render_pass.handle(), &pipeline)
            .descriptor_sets(uniforms.as_ref().map_or(&[][..], UniformSet::sets))
            .record_all(&command_buffers, &framebuffers, &meshes)?;

        let scheduler = FrameScheduler::new(device.clone())?;

        info!(
            "Render core ready: {} swapchain images, {} mesh(es), uniforms {}",
            swapchain.image_count(),
            meshes.len(),
            if uniforms.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            scheduler,
            command_buffers,
            meshes,
            command_pool,
            pipeline,
            uniforms,
            framebuffers,
            render_pass,
            swapchain,
            device,
            spin: spin.unwrap_or(0.0),
            angle: 0.0,
        })
    }

    /// Advances the model rotation by `dt` seconds.
    pub fn advance(&mut self, dt: f32) {
        self.angle = (self.angle + self.spin * dt) % std::f32::consts::TAU;
    }

    /// Current model rotation in radians.
    #[inline]
    pub fn angle(&self) -> f32 {
        self.angle
    }

    /// Renders and presents one frame.
    ///
    /// With uniforms, the acquired image's buffer is rewritten before its
    /// command buffer is submitted.
    ///
    /// # Errors
    ///
    /// Every frame failure is fatal; see [`FrameScheduler::draw_frame`].
    pub fn draw_frame(&mut self) -> RhiResult<FrameInfo> {
        let Some(uniforms) = self.uniforms.as_ref() else {
            return self
                .scheduler
                .draw_frame(&self.device, &self.swapchain, &self.command_buffers);
        };

        let matrices = ProjectionMatrices::new(self.swapchain.extent(), self.angle);
        self.scheduler.draw_frame_with(
            &self.device,
            &self.swapchain,
            &self.command_buffers,
            |image_index| uniforms.update(image_index, &matrices),
        )
    }

    /// Uploads another mesh and returns its index.
    ///
    /// The mesh is not drawn until [`Self::record_commands`] is called.
    pub fn add_mesh(&mut self, data: &MeshData) -> RhiResult<usize> {
        let mesh = Mesh::upload(
            self.device.clone(),
            self.device.graphics_queue(),
            &self.command_pool,
            data,
        )?;
        self.meshes.push(mesh);
        Ok(self.meshes.len() - 1)
    }

    /// Re-records every command buffer against the current mesh set.
    ///
    /// Waits for the device to go idle, then replaces the buffers with fresh
    /// ones from the pool.
    pub fn record_commands(&mut self) -> RhiResult<()> {
        self.device.wait_idle()?;

        self.command_pool.free(&self.command_buffers);
        self.command_buffers.clear();

        let command_buffers = self
            .command_pool
            .allocate_command_buffers(self.framebuffers.len() as u32)?;
        CommandRecorder::new(self.render_pass.handle(), &self.pipeline)
            .descriptor_sets(self.uniforms.as_ref().map_or(&[][..], UniformSet::sets))
            .record_all(&command_buffers, &self.framebuffers, &self.meshes)?;
        self.command_buffers = command_buffers;
        Ok(())
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    #[inline]
    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    #[inline]
    pub fn framebuffers(&self) -> &Framebuffers {
        &self.framebuffers
    }

    #[inline]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Per-image uniforms, if enabled.
    #[inline]
    pub fn uniforms(&self) -> Option<&UniformSet> {
        self.uniforms.as_ref()
    }

    #[inline]
    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    /// Recorded command buffers, index-aligned with the swapchain images.
    #[inline]
    pub fn command_buffers(&self) -> &[CommandBuffer] {
        &self.command_buffers
    }

    #[inline]
    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// Returns the swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Returns the swapchain format.
    pub fn format(&self) -> vk::Format {
        self.swapchain.format()
    }
}

impl Drop for RenderCore {
    fn drop(&mut self) {
        // In-flight frames may still reference the semaphores and buffers
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during render core drop: {:?}", e);
        }
        info!("Render core destroyed");
    }
}
