//! Static command recording.
//!
//! One primary command buffer is recorded per framebuffer. Each buffer is
//! recorded once with `SIMULTANEOUS_USE` and replayed every frame whose
//! acquired image matches its index. With per-image descriptor sets, buffer
//! `i` binds set `i` right after the pipeline.

use ash::vk;
use tracing::debug;

use vkframe_rhi::command::CommandBuffer;
use vkframe_rhi::framebuffer::Framebuffers;
use vkframe_rhi::pipeline::Pipeline;
use vkframe_rhi::{RhiError, RhiResult};

use crate::mesh::Mesh;

/// Opaque black.
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Records the draw sequence for a fixed set of meshes.
pub struct CommandRecorder<'a> {
    render_pass: vk::RenderPass,
    pipeline: &'a Pipeline,
    clear_color: [f32; 4],
    descriptor_sets: &'a [vk::DescriptorSet],
}

impl<'a> CommandRecorder<'a> {
    pub fn new(render_pass: vk::RenderPass, pipeline: &'a Pipeline) -> Self {
        Self {
            render_pass,
            pipeline,
            clear_color: CLEAR_COLOR,
            descriptor_sets: &[],
        }
    }

    /// Overrides the clear color.
    pub fn clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Binds `sets[i]` at set 0 in the buffer recorded for framebuffer `i`.
    ///
    /// An empty slice, the default, records no descriptor binding.
    pub fn descriptor_sets(mut self, sets: &'a [vk::DescriptorSet]) -> Self {
        self.descriptor_sets = sets;
        self
    }

    /// Records `command_buffers[i]` against `framebuffers.handles()[i]`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] if the command buffer count, or a
    /// non-empty descriptor set count, differs from the framebuffer count.
    /// Also returns any error from beginning or ending a buffer.
    pub fn record_all(
        &self,
        command_buffers: &[CommandBuffer],
        framebuffers: &Framebuffers,
        meshes: &[Mesh],
    ) -> RhiResult<()> {
        if command_buffers.len() != framebuffers.len() {
            return Err(RhiError::InvalidArgument(format!(
                "{} command buffers for {} framebuffers",
                command_buffers.len(),
                framebuffers.len()
            )));
        }

        if !self.descriptor_sets.is_empty() && self.descriptor_sets.len() != framebuffers.len() {
            return Err(RhiError::InvalidArgument(format!(
                "{} descriptor sets for {} framebuffers",
                self.descriptor_sets.len(),
                framebuffers.len()
            )));
        }

        for (i, (cmd, &framebuffer)) in command_buffers
            .iter()
            .zip(framebuffers.handles())
            .enumerate()
        {
            let set = self.descriptor_sets.get(i).copied();
            self.record(cmd, framebuffer, framebuffers.extent(), set, meshes)?;
        }

        debug!(
            "Recorded {} command buffer(s) with {} mesh(es)",
            command_buffers.len(),
            meshes.len()
        );
        Ok(())
    }

    /// Records one render pass over `framebuffer` drawing every mesh.
    pub fn record(
        &self,
        cmd: &CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        descriptor_set: Option<vk::DescriptorSet>,
        meshes: &[Mesh],
    ) -> RhiResult<()> {
        cmd.begin_simultaneous()?;
        cmd.begin_render_pass(self.render_pass, framebuffer, extent, self.clear_color);
        cmd.bind_pipeline(self.pipeline.bind_point(), self.pipeline.handle());
        if let Some(set) = descriptor_set {
            cmd.bind_descriptor_sets(
                self.pipeline.bind_point(),
                self.pipeline.layout().handle(),
                0,
                &[set],
            );
        }

        for mesh in meshes {
            cmd.bind_vertex_buffers(0, &[mesh.vertex_buffer()], &[0]);
            match mesh.index_buffer() {
                Some(index_buffer) => {
                    cmd.bind_index_buffer(index_buffer, 0, vk::IndexType::UINT32);
                    cmd.draw_indexed(mesh.index_count(), 1, 0, 0, 0);
                }
                None => cmd.draw(mesh.vertex_count(), 1, 0, 0),
            }
        }

        cmd.end_render_pass();
        cmd.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use vkframe_rhi::command::CommandPool;
    use vkframe_rhi::mock::{Call, MockDevice};
    use vkframe_rhi::pipeline::GraphicsPipelineBuilder;
    use vkframe_rhi::shader::ShaderSet;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 320,
        height: 240,
    };

    fn shaders() -> ShaderSet {
        let word = 0x0723_0203u32.to_le_bytes().to_vec();
        ShaderSet {
            vertex: word.clone(),
            fragment: word,
        }
    }

    #[test]
    fn test_count_mismatch_is_rejected() {
        let mock = MockDevice::new();
        let device = mock.device();
        let render_pass = vk::RenderPass::from_raw(9);
        let views: Vec<_> = (1..=2).map(vk::ImageView::from_raw).collect();
        let framebuffers =
            Framebuffers::new(device.clone(), render_pass, &views, EXTENT).unwrap();
        let pipeline = GraphicsPipelineBuilder::new(render_pass, EXTENT)
            .build(device.clone(), &shaders())
            .unwrap();
        let pool = CommandPool::new(device, 0).unwrap();
        let buffers = pool.allocate_command_buffers(1).unwrap();

        let result =
            CommandRecorder::new(render_pass, &pipeline).record_all(&buffers, &framebuffers, &[]);

        assert!(matches!(result, Err(RhiError::InvalidArgument(_))));
        assert!(!mock
            .calls()
            .iter()
            .any(|c| matches!(c, Call::BeginCommandBuffer { .. })));
    }

    #[test]
    fn test_empty_mesh_set_still_clears() {
        let mock = MockDevice::new();
        let device = mock.device();
        let render_pass = vk::RenderPass::from_raw(9);
        let views = [vk::ImageView::from_raw(1)];
        let framebuffers =
            Framebuffers::new(device.clone(), render_pass, &views, EXTENT).unwrap();
        let pipeline = GraphicsPipelineBuilder::new(render_pass, EXTENT)
            .build(device.clone(), &shaders())
            .unwrap();
        let pool = CommandPool::new(device, 0).unwrap();
        let buffers = pool.allocate_command_buffers(1).unwrap();

        CommandRecorder::new(render_pass, &pipeline)
            .clear_color([0.1, 0.2, 0.3, 1.0])
            .record_all(&buffers, &framebuffers, &[])
            .unwrap();

        let calls = mock.calls();
        assert!(calls.iter().any(|c| matches!(c,
            Call::BeginRenderPass { clear_colors, .. }
                if clear_colors == &vec![[0.1, 0.2, 0.3, 1.0]])));
        assert!(calls.iter().any(|c| matches!(c, Call::EndCommandBuffer { .. })));
        assert!(!calls
            .iter()
            .any(|c| matches!(c, Call::DrawIndexed { .. } | Call::Draw { .. })));
        assert!(!calls
            .iter()
            .any(|c| matches!(c, Call::BindDescriptorSets { .. })));
    }

    #[test]
    fn test_each_buffer_binds_its_own_descriptor_set() {
        let mock = MockDevice::new();
        let device = mock.device();
        let render_pass = vk::RenderPass::from_raw(9);
        let views: Vec<_> = (1..=3).map(vk::ImageView::from_raw).collect();
        let framebuffers =
            Framebuffers::new(device.clone(), render_pass, &views, EXTENT).unwrap();
        let set_layout = vk::DescriptorSetLayout::from_raw(40);
        let pipeline = GraphicsPipelineBuilder::new(render_pass, EXTENT)
            .descriptor_set_layouts(&[set_layout])
            .build(device.clone(), &shaders())
            .unwrap();
        let pool = CommandPool::new(device, 0).unwrap();
        let buffers = pool.allocate_command_buffers(3).unwrap();
        let sets: Vec<_> = (50..53).map(vk::DescriptorSet::from_raw).collect();
        mock.clear_calls();

        CommandRecorder::new(render_pass, &pipeline)
            .descriptor_sets(&sets)
            .record_all(&buffers, &framebuffers, &[])
            .unwrap();

        let calls = mock.calls();
        for (buffer, set) in buffers.iter().zip(&sets) {
            let own: Vec<&Call> = calls
                .iter()
                .filter(|c| match c {
                    Call::BindPipeline { command_buffer, .. }
                    | Call::BindDescriptorSets { command_buffer, .. } => {
                        *command_buffer == buffer.handle()
                    }
                    _ => false,
                })
                .collect();
            assert_eq!(own.len(), 2);
            assert!(matches!(own[0], Call::BindPipeline { .. }));
            match own[1] {
                Call::BindDescriptorSets {
                    bind_point,
                    layout,
                    first_set,
                    sets: bound,
                    ..
                } => {
                    assert_eq!(*bind_point, vk::PipelineBindPoint::GRAPHICS);
                    assert_eq!(*layout, pipeline.layout().handle());
                    assert_eq!(*first_set, 0);
                    assert_eq!(bound, &vec![*set]);
                }
                other => panic!("expected a descriptor bind, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_descriptor_set_count_mismatch_is_rejected() {
        let mock = MockDevice::new();
        let device = mock.device();
        let render_pass = vk::RenderPass::from_raw(9);
        let views: Vec<_> = (1..=2).map(vk::ImageView::from_raw).collect();
        let framebuffers =
            Framebuffers::new(device.clone(), render_pass, &views, EXTENT).unwrap();
        let pipeline = GraphicsPipelineBuilder::new(render_pass, EXTENT)
            .build(device.clone(), &shaders())
            .unwrap();
        let pool = CommandPool::new(device, 0).unwrap();
        let buffers = pool.allocate_command_buffers(2).unwrap();
        let sets = [vk::DescriptorSet::from_raw(50)];

        let result = CommandRecorder::new(render_pass, &pipeline)
            .descriptor_sets(&sets)
            .record_all(&buffers, &framebuffers, &[]);

        assert!(matches!(result, Err(RhiError::InvalidArgument(_))));
    }
}
