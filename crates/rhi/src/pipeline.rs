//! Graphics pipeline management.
//!
//! This module handles VkPipeline and VkPipelineLayout creation.
//!
//! # Overview
//!
//! - [`PipelineLayout`] wraps VkPipelineLayout (no descriptor sets by default)
//! - [`Pipeline`] owns the graphics pipeline and its layout
//! - [`GraphicsPipelineBuilder`] configures fixed-function state against a
//!   render pass and builds the pipeline from SPIR-V bytecode
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_rhi::device::Device;
//! use vkframe_rhi::pipeline::GraphicsPipelineBuilder;
//! use vkframe_rhi::shader::ShaderSet;
//! use vkframe_rhi::vk;
//!
//! # fn example(
//! #     device: Arc<Device>,
//! #     render_pass: vk::RenderPass,
//! # ) -> Result<(), vkframe_rhi::RhiError> {
//! let shaders = ShaderSet::load("shaders/shader.vert.spv", "shaders/shader.frag.spv")?;
//! let extent = vk::Extent2D { width: 1024, height: 768 };
//!
//! let pipeline = GraphicsPipelineBuilder::new(render_pass, extent).build(device, &shaders)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::{Shader, ShaderSet, ShaderStage};
use crate::vertex::Vertex;

/// Entry point used for both shader stages.
const SHADER_ENTRY_POINT: &str = "main";

/// Vulkan pipeline layout wrapper.
///
/// Describes the descriptor set layouts and push constant ranges a pipeline
/// can access.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Creates a new pipeline layout.
    ///
    /// # Errors
    ///
    /// Returns an error if pipeline layout creation fails.
    pub fn new(
        device: Arc<Device>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe {
            device
                .api()
                .create_pipeline_layout(&create_info)
                .map_err(RhiError::creation("pipeline layout"))?
        };

        debug!(
            "Created pipeline layout: {} descriptor set layout(s), {} push constant range(s)",
            descriptor_set_layouts.len(),
            push_constant_ranges.len()
        );

        Ok(Self { device, layout })
    }

    /// Returns the Vulkan pipeline layout handle.
    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.api().destroy_pipeline_layout(self.layout);
        }
        debug!("Pipeline layout destroyed");
    }
}

/// Graphics pipeline together with its layout.
///
/// The pipeline is destroyed before its layout. It holds no reference to the
/// shader modules it was built from.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    // Dropped after the pipeline handle is destroyed in `Drop`
    layout: PipelineLayout,
}

impl Pipeline {
    /// Returns the Vulkan pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Returns the pipeline layout.
    #[inline]
    pub fn layout(&self) -> &PipelineLayout {
        &self.layout
    }

    /// Returns the bind point; always graphics.
    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        vk::PipelineBindPoint::GRAPHICS
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.api().destroy_pipeline(self.pipeline);
        }
        info!("Graphics pipeline destroyed");
    }
}

/// Primitive topology for input assembly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PrimitiveTopology {
    /// Independent lines.
    LineList,
    /// Independent triangles.
    #[default]
    TriangleList,
    /// Connected triangles sharing two vertices with their predecessor.
    TriangleStrip,
}

impl PrimitiveTopology {
    /// Converts to Vulkan primitive topology.
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
            PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        }
    }
}

/// Polygon rasterization mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
}

impl PolygonMode {
    /// Converts to Vulkan polygon mode.
    pub fn to_vk(self) -> vk::PolygonMode {
        match self {
            PolygonMode::Fill => vk::PolygonMode::FILL,
            PolygonMode::Line => vk::PolygonMode::LINE,
        }
    }
}

/// Face culling mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

impl CullMode {
    /// Converts to Vulkan cull mode flags.
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Winding order that identifies the front face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrontFace {
    #[default]
    Clockwise,
    CounterClockwise,
}

impl FrontFace {
    /// Converts to Vulkan front face.
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
        }
    }
}

/// Blend factor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

impl BlendFactor {
    /// Converts to Vulkan blend factor.
    pub fn to_vk(self) -> vk::BlendFactor {
        match self {
            BlendFactor::Zero => vk::BlendFactor::ZERO,
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        }
    }
}

/// Blend operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
}

impl BlendOp {
    /// Converts to Vulkan blend operation.
    pub fn to_vk(self) -> vk::BlendOp {
        match self {
            BlendOp::Add => vk::BlendOp::ADD,
            BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        }
    }
}

/// Color blend attachment configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorBlendAttachment {
    pub blend_enable: bool,
    pub src_color_blend_factor: BlendFactor,
    pub dst_color_blend_factor: BlendFactor,
    pub color_blend_op: BlendOp,
    pub src_alpha_blend_factor: BlendFactor,
    pub dst_alpha_blend_factor: BlendFactor,
    pub alpha_blend_op: BlendOp,
    pub color_write_mask: vk::ColorComponentFlags,
}

impl Default for ColorBlendAttachment {
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_color_blend_factor: BlendFactor::One,
            dst_color_blend_factor: BlendFactor::Zero,
            color_blend_op: BlendOp::Add,
            src_alpha_blend_factor: BlendFactor::One,
            dst_alpha_blend_factor: BlendFactor::Zero,
            alpha_blend_op: BlendOp::Add,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

impl ColorBlendAttachment {
    /// Creates a blend attachment with alpha blending enabled.
    ///
    /// Uses standard alpha blending: `src * src_alpha + dst * (1 - src_alpha)`
    /// for color and keeps the source alpha.
    pub fn alpha_blend() -> Self {
        Self {
            blend_enable: true,
            src_color_blend_factor: BlendFactor::SrcAlpha,
            dst_color_blend_factor: BlendFactor::OneMinusSrcAlpha,
            ..Self::default()
        }
    }

    /// Converts to Vulkan pipeline color blend attachment state.
    pub fn to_vk(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: self.blend_enable.into(),
            src_color_blend_factor: self.src_color_blend_factor.to_vk(),
            dst_color_blend_factor: self.dst_color_blend_factor.to_vk(),
            color_blend_op: self.color_blend_op.to_vk(),
            src_alpha_blend_factor: self.src_alpha_blend_factor.to_vk(),
            dst_alpha_blend_factor: self.dst_alpha_blend_factor.to_vk(),
            alpha_blend_op: self.alpha_blend_op.to_vk(),
            color_write_mask: self.color_write_mask,
        }
    }
}

/// Builder for the graphics pipeline.
///
/// Defaults:
///
/// - Vertex input: one binding of [`Vertex`] (position at location 0, color at 1)
/// - Primitive topology: triangle list, no primitive restart
/// - Viewport and scissor: static, covering the whole extent
/// - Polygon mode: fill, back-face culling, clockwise front face, line width 1
/// - Multisampling: 1 sample, no sample shading
/// - Blending: standard alpha blending
/// - No depth/stencil state, no dynamic state
/// - Layout: no descriptor sets, no push constants
pub struct GraphicsPipelineBuilder {
    render_pass: vk::RenderPass,
    subpass: u32,
    extent: vk::Extent2D,

    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,

    topology: PrimitiveTopology,
    primitive_restart_enable: bool,

    polygon_mode: PolygonMode,
    cull_mode: CullMode,
    front_face: FrontFace,
    line_width: f32,

    rasterization_samples: vk::SampleCountFlags,

    color_blend_attachment: ColorBlendAttachment,

    descriptor_set_layouts: Vec<vk::DescriptorSetLayout>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl GraphicsPipelineBuilder {
    /// Creates a builder for subpass 0 of `render_pass`, drawing into `extent`.
    pub fn new(render_pass: vk::RenderPass, extent: vk::Extent2D) -> Self {
        Self {
            render_pass,
            subpass: 0,
            extent,
            vertex_bindings: vec![Vertex::binding_description()],
            vertex_attributes: Vertex::attribute_descriptions().to_vec(),
            topology: PrimitiveTopology::TriangleList,
            primitive_restart_enable: false,
            polygon_mode: PolygonMode::Fill,
            cull_mode: CullMode::Back,
            front_face: FrontFace::Clockwise,
            line_width: 1.0,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            color_blend_attachment: ColorBlendAttachment::alpha_blend(),
            descriptor_set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
        }
    }

    /// Replaces the vertex input bindings.
    pub fn vertex_bindings(mut self, bindings: &[vk::VertexInputBindingDescription]) -> Self {
        self.vertex_bindings = bindings.to_vec();
        self
    }

    /// Replaces the vertex attributes.
    pub fn vertex_attributes(mut self, attributes: &[vk::VertexInputAttributeDescription]) -> Self {
        self.vertex_attributes = attributes.to_vec();
        self
    }

    /// Sets the primitive topology.
    pub fn topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Enables or disables primitive restart.
    pub fn primitive_restart_enable(mut self, enable: bool) -> Self {
        self.primitive_restart_enable = enable;
        self
    }

    /// Sets the polygon mode.
    pub fn polygon_mode(mut self, mode: PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    /// Sets the cull mode.
    pub fn cull_mode(mut self, mode: CullMode) -> Self {
        self.cull_mode = mode;
        self
    }

    /// Sets the front face winding order.
    pub fn front_face(mut self, face: FrontFace) -> Self {
        self.front_face = face;
        self
    }

    /// Sets the rasterized line width.
    pub fn line_width(mut self, width: f32) -> Self {
        self.line_width = width;
        self
    }

    /// Sets the color blend state of the single color attachment.
    pub fn color_blend_attachment(mut self, attachment: ColorBlendAttachment) -> Self {
        self.color_blend_attachment = attachment;
        self
    }

    /// Sets the descriptor set layouts of the pipeline layout.
    pub fn descriptor_set_layouts(mut self, layouts: &[vk::DescriptorSetLayout]) -> Self {
        self.descriptor_set_layouts = layouts.to_vec();
        self
    }

    /// Sets the push constant ranges of the pipeline layout.
    pub fn push_constant_ranges(mut self, ranges: &[vk::PushConstantRange]) -> Self {
        self.push_constant_ranges = ranges.to_vec();
        self
    }

    /// Builds the pipeline and its layout.
    ///
    /// Shader modules are created from `shaders`, referenced only by the
    /// creation call, and destroyed before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The render pass is null or the extent is empty
    /// - Either shader's bytecode is invalid
    /// - Layout or pipeline creation fails
    pub fn build(self, device: Arc<Device>, shaders: &ShaderSet) -> RhiResult<Pipeline> {
        if self.render_pass == vk::RenderPass::null() {
            return Err(RhiError::PipelineError(
                "A render pass is required".to_string(),
            ));
        }
        if self.extent.width == 0 || self.extent.height == 0 {
            return Err(RhiError::PipelineError(format!(
                "Viewport extent must be non-zero, got {}x{}",
                self.extent.width, self.extent.height
            )));
        }

        let vertex_shader = Shader::from_spirv_bytes(
            device.clone(),
            &shaders.vertex,
            ShaderStage::Vertex,
            SHADER_ENTRY_POINT,
        )?;
        let fragment_shader = Shader::from_spirv_bytes(
            device.clone(),
            &shaders.fragment,
            ShaderStage::Fragment,
            SHADER_ENTRY_POINT,
        )?;

        let layout = PipelineLayout::new(
            device.clone(),
            &self.descriptor_set_layouts,
            &self.push_constant_ranges,
        )?;

        let shader_stages = [
            vertex_shader.stage_create_info(),
            fragment_shader.stage_create_info(),
        ];

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology.to_vk())
            .primitive_restart_enable(self.primitive_restart_enable);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode.to_vk())
            .line_width(self.line_width)
            .cull_mode(self.cull_mode.to_vk())
            .front_face(self.front_face.to_vk())
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(self.rasterization_samples);

        let color_blend_attachments = [self.color_blend_attachment.to_vk()];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .layout(layout.handle())
            .render_pass(self.render_pass)
            .subpass(self.subpass);

        let pipeline = unsafe {
            device
                .api()
                .create_graphics_pipeline(&pipeline_info)
                .map_err(RhiError::creation("graphics pipeline"))?
        };

        info!(
            "Graphics pipeline created ({}x{}, {:?}, cull {:?})",
            self.extent.width, self.extent.height, self.topology, self.cull_mode
        );

        Ok(Pipeline {
            device,
            pipeline,
            layout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, HandleKind, MockDevice, PipelineSnapshot};
    use ash::vk::Handle;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 1024,
        height: 768,
    };

    fn shaders() -> ShaderSet {
        let word = 0x0723_0203u32.to_le_bytes().to_vec();
        ShaderSet {
            vertex: word.clone(),
            fragment: word,
        }
    }

    fn snapshot(mock: &MockDevice) -> PipelineSnapshot {
        mock.calls()
            .into_iter()
            .find_map(|c| match c {
                Call::CreateGraphicsPipeline(snapshot) => Some(*snapshot),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_enum_conversions() {
        assert_eq!(
            PrimitiveTopology::default().to_vk(),
            vk::PrimitiveTopology::TRIANGLE_LIST
        );
        assert_eq!(CullMode::None.to_vk(), vk::CullModeFlags::NONE);
        assert_eq!(FrontFace::default().to_vk(), vk::FrontFace::CLOCKWISE);
        assert_eq!(PolygonMode::Line.to_vk(), vk::PolygonMode::LINE);
        assert_eq!(BlendOp::default().to_vk(), vk::BlendOp::ADD);
    }

    #[test]
    fn test_alpha_blend_factors() {
        let blend = ColorBlendAttachment::alpha_blend().to_vk();
        assert_eq!(blend.blend_enable, vk::TRUE);
        assert_eq!(blend.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(
            blend.dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
        assert_eq!(blend.src_alpha_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(blend.dst_alpha_blend_factor, vk::BlendFactor::ZERO);
        assert_eq!(blend.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn test_default_pipeline_state() {
        let mock = MockDevice::new();
        let render_pass = vk::RenderPass::from_raw(7);
        let pipeline = GraphicsPipelineBuilder::new(render_pass, EXTENT)
            .build(mock.device(), &shaders())
            .unwrap();

        let state = snapshot(&mock);
        assert_eq!(state.render_pass, render_pass);
        assert_eq!(state.subpass, 0);
        assert_eq!(state.layout, pipeline.layout().handle());
        assert_eq!(state.entry_points, vec!["main".to_string(); 2]);
        assert_eq!(state.stages[0].0, vk::ShaderStageFlags::VERTEX);
        assert_eq!(state.stages[1].0, vk::ShaderStageFlags::FRAGMENT);

        assert_eq!(state.bindings.len(), 1);
        assert_eq!(state.bindings[0].stride, 24);
        assert_eq!(state.attributes.len(), 2);
        assert_eq!(state.attributes[1].offset, 12);

        assert_eq!(state.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert!(!state.primitive_restart);
        assert_eq!(state.viewports.len(), 1);
        assert_eq!(state.viewports[0].width, 1024.0);
        assert_eq!(state.viewports[0].height, 768.0);
        assert_eq!(state.scissors[0].extent, EXTENT);

        assert_eq!(state.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(state.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(state.front_face, vk::FrontFace::CLOCKWISE);
        assert!(!state.depth_bias);
        assert_eq!(state.line_width, 1.0);
        assert_eq!(state.samples, vk::SampleCountFlags::TYPE_1);
        assert!(!state.sample_shading);
        assert_eq!(state.blend_attachments.len(), 1);
        assert_eq!(state.blend_attachments[0].blend_enable, vk::TRUE);
        assert!(!state.has_depth_stencil_state);
        assert!(!state.has_dynamic_state);

        assert!(mock.calls().iter().any(|c| matches!(
            c,
            Call::CreatePipelineLayout {
                set_layouts: 0,
                push_constant_ranges: 0
            }
        )));
    }

    #[test]
    fn test_shader_modules_are_transient() {
        let mock = MockDevice::new();
        let pipeline = GraphicsPipelineBuilder::new(vk::RenderPass::from_raw(7), EXTENT)
            .build(mock.device(), &shaders())
            .unwrap();

        assert_eq!(mock.created_count(HandleKind::ShaderModule), 2);
        assert_eq!(mock.live_count(HandleKind::ShaderModule), 0);
        assert_eq!(mock.live_count(HandleKind::Pipeline), 1);

        drop(pipeline);
        let order = mock.destroy_order();
        let pipeline_at = order.iter().position(|k| *k == HandleKind::Pipeline).unwrap();
        let layout_at = order
            .iter()
            .position(|k| *k == HandleKind::PipelineLayout)
            .unwrap();
        assert!(pipeline_at < layout_at);
    }

    #[test]
    fn test_failed_pipeline_releases_layout_and_modules() {
        let mock = MockDevice::new();
        mock.fail_on(HandleKind::Pipeline, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

        let result = GraphicsPipelineBuilder::new(vk::RenderPass::from_raw(7), EXTENT)
            .build(mock.device(), &shaders());

        assert!(matches!(
            result,
            Err(RhiError::CreationFailed {
                what: "graphics pipeline",
                ..
            })
        ));
        assert!(mock.live_handles().is_empty());
    }

    #[test]
    fn test_missing_render_pass_is_rejected() {
        let mock = MockDevice::new();
        let result = GraphicsPipelineBuilder::new(vk::RenderPass::null(), EXTENT)
            .build(mock.device(), &shaders());
        assert!(matches!(result, Err(RhiError::PipelineError(_))));
        assert_eq!(mock.created_count(HandleKind::ShaderModule), 0);
    }

    #[test]
    fn test_invalid_bytecode_is_rejected() {
        let mock = MockDevice::new();
        let bad = ShaderSet {
            vertex: vec![1, 2, 3],
            fragment: vec![0; 4],
        };
        let result = GraphicsPipelineBuilder::new(vk::RenderPass::from_raw(7), EXTENT)
            .build(mock.device(), &bad);
        assert!(matches!(result, Err(RhiError::ShaderError(_))));
        assert!(mock.live_handles().is_empty());
    }
}
