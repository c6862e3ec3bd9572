//! End-to-end tests of the render core against the recording mock device.

use ash::vk;
use glam::Vec3;

use vkframe_renderer::{slot_for_frame, MeshData, RenderCore, SurfaceTarget};
use vkframe_rhi::mock::{Call, HandleKind, MockDevice};
use vkframe_rhi::shader::ShaderSet;
use vkframe_rhi::vertex::Vertex;
use vkframe_rhi::{FrameStage, RhiError};

const RESOURCE_KINDS: [HandleKind; 16] = [
    HandleKind::Swapchain,
    HandleKind::ImageView,
    HandleKind::RenderPass,
    HandleKind::Framebuffer,
    HandleKind::ShaderModule,
    HandleKind::PipelineLayout,
    HandleKind::Pipeline,
    HandleKind::DescriptorSetLayout,
    HandleKind::DescriptorPool,
    HandleKind::DescriptorSet,
    HandleKind::CommandPool,
    HandleKind::CommandBuffer,
    HandleKind::Semaphore,
    HandleKind::Fence,
    HandleKind::Buffer,
    HandleKind::Memory,
];

fn target() -> SurfaceTarget {
    SurfaceTarget {
        surface: vk::SurfaceKHR::null(),
        support: MockDevice::surface_support(),
        width: 800,
        height: 600,
    }
}

fn shaders() -> ShaderSet {
    let word = 0x0723_0203u32.to_le_bytes().to_vec();
    ShaderSet {
        vertex: word.clone(),
        fragment: word,
    }
}

fn build(mock: &MockDevice, meshes: &[MeshData]) -> Result<RenderCore, RhiError> {
    RenderCore::new(mock.device(), &target(), &shaders(), meshes)
}

fn build_spinning(mock: &MockDevice, meshes: &[MeshData]) -> Result<RenderCore, RhiError> {
    RenderCore::with_uniforms(mock.device(), &target(), &shaders(), meshes, 1.0)
}

fn assert_balanced(mock: &MockDevice) {
    for kind in RESOURCE_KINDS {
        assert_eq!(
            mock.created_count(kind),
            mock.destroyed_count(kind),
            "{:?} create/destroy mismatch",
            kind
        );
    }
    assert!(mock.live_handles().is_empty(), "leaked: {:?}", mock.live_handles());
    assert!(mock.invalid_destroys().is_empty());
    assert!(mock.device_destroyed());
    assert!(mock.live_at_device_destroy().is_empty());
}

fn first(order: &[HandleKind], kind: HandleKind) -> usize {
    order
        .iter()
        .position(|k| *k == kind)
        .unwrap_or_else(|| panic!("{:?} never destroyed", kind))
}

fn last(order: &[HandleKind], kind: HandleKind) -> usize {
    order
        .iter()
        .rposition(|k| *k == kind)
        .unwrap_or_else(|| panic!("{:?} never destroyed", kind))
}

#[test]
fn create_then_destroy_releases_every_handle_once() {
    let mock = MockDevice::new();
    let core = build(&mock, &[MeshData::quad()]).unwrap();

    assert!(mock.created_count(HandleKind::Framebuffer) > 0);
    assert!(!mock.device_destroyed());

    drop(core);

    assert_balanced(&mock);
    assert_eq!(mock.created_count(HandleKind::Semaphore), 6);
    assert_eq!(mock.created_count(HandleKind::Fence), 3);
    assert_eq!(mock.created_count(HandleKind::DescriptorPool), 0);
    assert_eq!(mock.created_count(HandleKind::DescriptorSetLayout), 0);
}

#[test]
fn teardown_runs_in_reverse_creation_order() {
    let mock = MockDevice::new();
    let core = build(&mock, &[MeshData::quad()]).unwrap();
    let constructed = mock.destroy_order().len();
    mock.clear_calls();

    drop(core);
    let order = mock.destroy_order()[constructed..].to_vec();

    assert!(matches!(mock.calls().first(), Some(Call::DeviceWaitIdle)));
    assert!(last(&order, HandleKind::Semaphore) < first(&order, HandleKind::Buffer));
    assert!(last(&order, HandleKind::Fence) < first(&order, HandleKind::Buffer));
    assert!(last(&order, HandleKind::Buffer) < first(&order, HandleKind::CommandPool));
    assert!(first(&order, HandleKind::CommandPool) < first(&order, HandleKind::Pipeline));
    assert!(first(&order, HandleKind::Pipeline) < first(&order, HandleKind::PipelineLayout));
    assert!(first(&order, HandleKind::PipelineLayout) < first(&order, HandleKind::Framebuffer));
    assert!(last(&order, HandleKind::Framebuffer) < first(&order, HandleKind::RenderPass));
    assert!(first(&order, HandleKind::RenderPass) < first(&order, HandleKind::ImageView));
    assert!(last(&order, HandleKind::ImageView) < first(&order, HandleKind::Swapchain));
    assert_eq!(order.last(), Some(&HandleKind::Device));
}

#[test]
fn quad_records_one_indexed_draw_per_framebuffer() {
    let mock = MockDevice::new();
    let core = build(&mock, &[MeshData::quad()]).unwrap();
    let calls = mock.calls();

    let framebuffers = core.framebuffers().handles().to_vec();
    let buffers: Vec<_> = core.command_buffers().iter().map(|c| c.handle()).collect();
    assert_eq!(framebuffers.len(), 3);
    assert_eq!(buffers.len(), framebuffers.len());

    let draws: Vec<_> = calls
        .iter()
        .filter_map(|c| match c {
            Call::DrawIndexed {
                command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => Some((
                *command_buffer,
                *index_count,
                *instance_count,
                *first_index,
                *vertex_offset,
                *first_instance,
            )),
            _ => None,
        })
        .collect();
    let expected: Vec<_> = buffers.iter().map(|&b| (b, 6, 1, 0, 0, 0)).collect();
    assert_eq!(draws, expected);
    assert!(!calls.iter().any(|c| matches!(c, Call::Draw { .. })));
    assert!(!calls
        .iter()
        .any(|c| matches!(c, Call::BindDescriptorSets { .. })));
    assert!(calls.iter().any(|c| matches!(c,
        Call::CreatePipelineLayout { set_layouts: 0, push_constant_ranges: 0 })));

    let passes: Vec<_> = calls
        .iter()
        .filter_map(|c| match c {
            Call::BeginRenderPass {
                command_buffer,
                render_pass,
                framebuffer,
                render_area,
                clear_colors,
                contents,
            } => {
                assert_eq!(*render_pass, core.render_pass().handle());
                assert_eq!(render_area.extent, core.extent());
                assert_eq!(clear_colors, &vec![[0.0, 0.0, 0.0, 1.0]]);
                assert_eq!(*contents, vk::SubpassContents::INLINE);
                Some((*command_buffer, *framebuffer))
            }
            _ => None,
        })
        .collect();
    let expected: Vec<_> = buffers.iter().copied().zip(framebuffers).collect();
    assert_eq!(passes, expected);

    for &buffer in &buffers {
        assert!(calls.iter().any(|c| matches!(c,
            Call::BeginCommandBuffer { command_buffer, flags }
                if *command_buffer == buffer
                    && *flags == vk::CommandBufferUsageFlags::SIMULTANEOUS_USE)));
        assert!(calls.iter().any(|c| matches!(c,
            Call::BindIndexBuffer { command_buffer, index_type, offset, .. }
                if *command_buffer == buffer
                    && *index_type == vk::IndexType::UINT32
                    && *offset == 0)));
        assert!(calls.iter().any(|c| matches!(c,
            Call::BindVertexBuffers { command_buffer, first_binding: 0, offsets, .. }
                if *command_buffer == buffer && offsets == &vec![0])));
    }
}

#[test]
fn recording_follows_pass_order() {
    let mock = MockDevice::new();
    let core = build(&mock, &[MeshData::quad()]).unwrap();
    let buffer = core.command_buffers()[0].handle();

    let sequence: Vec<&'static str> = mock
        .calls()
        .iter()
        .filter_map(|c| match c {
            Call::BeginCommandBuffer { command_buffer, .. } if *command_buffer == buffer => {
                Some("begin")
            }
            Call::BeginRenderPass { command_buffer, .. } if *command_buffer == buffer => {
                Some("begin_pass")
            }
            Call::BindPipeline { command_buffer, .. } if *command_buffer == buffer => {
                Some("pipeline")
            }
            Call::BindVertexBuffers { command_buffer, .. } if *command_buffer == buffer => {
                Some("vertices")
            }
            Call::BindIndexBuffer { command_buffer, .. } if *command_buffer == buffer => {
                Some("indices")
            }
            Call::DrawIndexed { command_buffer, .. } if *command_buffer == buffer => {
                Some("draw")
            }
            Call::EndRenderPass { command_buffer } if *command_buffer == buffer => {
                Some("end_pass")
            }
            Call::EndCommandBuffer { command_buffer } if *command_buffer == buffer => {
                Some("end")
            }
            _ => None,
        })
        .collect();

    assert_eq!(
        sequence,
        vec!["begin", "begin_pass", "pipeline", "vertices", "indices", "draw", "end_pass", "end"]
    );
}

#[test]
fn non_indexed_mesh_uses_plain_draw() {
    let mock = MockDevice::new();
    let triangle = MeshData::non_indexed(vec![
        Vertex::new(Vec3::new(0.0, -0.5, 0.0), Vec3::X),
        Vertex::new(Vec3::new(0.5, 0.5, 0.0), Vec3::Y),
        Vertex::new(Vec3::new(-0.5, 0.5, 0.0), Vec3::Z),
    ]);
    let core = build(&mock, &[triangle]).unwrap();

    let draws = mock
        .calls()
        .iter()
        .filter(|c| {
            matches!(
                c,
                Call::Draw {
                    vertex_count: 3,
                    instance_count: 1,
                    ..
                }
            )
        })
        .count();
    assert_eq!(draws, core.framebuffers().len());
    assert!(!mock
        .calls()
        .iter()
        .any(|c| matches!(c, Call::BindIndexBuffer { .. } | Call::DrawIndexed { .. })));
}

#[test]
fn frames_rotate_through_slots_and_images() {
    let mock = MockDevice::new();
    let mut core = build(&mock, &[MeshData::quad()]).unwrap();
    let buffers: Vec<_> = core.command_buffers().iter().map(|c| c.handle()).collect();
    mock.clear_calls();

    for frame in 0..6u64 {
        let info = core.draw_frame().unwrap();
        assert_eq!(info.frame_number, frame);
        assert_eq!(info.slot, slot_for_frame(frame));
    }

    let submitted: Vec<_> = mock
        .calls()
        .iter()
        .filter_map(|c| match c {
            Call::QueueSubmit {
                command_buffers, ..
            } => Some(command_buffers[0]),
            _ => None,
        })
        .collect();
    let presented: Vec<_> = mock
        .calls()
        .iter()
        .filter_map(|c| match c {
            Call::QueuePresent { image_indices, .. } => Some(image_indices[0]),
            _ => None,
        })
        .collect();
    assert_eq!(presented.len(), 6);
    let expected: Vec<_> = presented.iter().map(|&i| buffers[i as usize]).collect();
    assert_eq!(submitted, expected);

    drop(core);
    assert_balanced(&mock);
}

#[test]
fn submit_failure_is_fatal_and_still_tears_down() {
    let mock = MockDevice::new();
    let mut core = build(&mock, &[MeshData::quad()]).unwrap();
    mock.fail_frame(FrameStage::Submit, vk::Result::ERROR_DEVICE_LOST);

    let result = core.draw_frame();

    assert!(matches!(
        result,
        Err(RhiError::FrameFailed {
            stage: FrameStage::Submit,
            result: vk::Result::ERROR_DEVICE_LOST,
        })
    ));
    assert!(!mock
        .calls()
        .iter()
        .any(|c| matches!(c, Call::QueuePresent { .. })));

    drop(core);
    assert_balanced(&mock);
}

#[test]
fn failed_pipeline_releases_earlier_objects() {
    let mock = MockDevice::new();
    mock.fail_on(HandleKind::Pipeline, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

    let result = build(&mock, &[MeshData::quad()]);

    assert!(matches!(
        result,
        Err(RhiError::CreationFailed {
            what: "graphics pipeline",
            ..
        })
    ));
    assert_eq!(mock.created_count(HandleKind::CommandPool), 0);
    assert_balanced(&mock);
}

#[test]
fn failed_mesh_upload_releases_earlier_objects() {
    let mock = MockDevice::new();
    mock.fail_after(HandleKind::Buffer, 3, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

    let result = build(&mock, &[MeshData::quad()]);

    assert!(matches!(
        result,
        Err(RhiError::CreationFailed { what: "buffer", .. })
    ));
    assert_balanced(&mock);
}

#[test]
fn failed_sync_creation_releases_recorded_buffers() {
    let mock = MockDevice::new();
    mock.fail_after(HandleKind::Fence, 1, vk::Result::ERROR_OUT_OF_HOST_MEMORY);

    let result = build(&mock, &[MeshData::quad()]);

    assert!(matches!(
        result,
        Err(RhiError::CreationFailed { what: "fence", .. })
    ));
    assert_balanced(&mock);
}

#[test]
fn re_recording_draws_added_meshes() {
    let mock = MockDevice::new();
    let mut core = build(&mock, &[MeshData::quad()]).unwrap();
    let old_buffers: Vec<_> = core.command_buffers().iter().map(|c| c.handle()).collect();

    let index = core.add_mesh(&MeshData::quad()).unwrap();
    assert_eq!(index, 1);
    mock.clear_calls();
    core.record_commands().unwrap();

    let new_buffers: Vec<_> = core.command_buffers().iter().map(|c| c.handle()).collect();
    assert_eq!(new_buffers.len(), old_buffers.len());
    assert!(new_buffers.iter().all(|b| !old_buffers.contains(b)));

    let calls = mock.calls();
    assert!(matches!(calls.first(), Some(Call::DeviceWaitIdle)));
    for &buffer in &new_buffers {
        let draws = calls
            .iter()
            .filter(|c| matches!(c,
                Call::DrawIndexed { command_buffer, index_count: 6, instance_count: 1, .. }
                    if *command_buffer == buffer))
            .count();
        assert_eq!(draws, 2);
    }

    drop(core);
    assert_balanced(&mock);
}

#[test]
fn empty_mesh_is_rejected_at_construction() {
    let mock = MockDevice::new();
    let result = build(&mock, &[MeshData::default()]);

    assert!(matches!(result, Err(RhiError::InvalidArgument(_))));
    assert_balanced(&mock);
}

#[test]
fn uniforms_create_one_set_per_image_and_tear_down() {
    let mock = MockDevice::new();
    let core = build_spinning(&mock, &[MeshData::quad()]).unwrap();

    let uniforms = core.uniforms().unwrap();
    assert_eq!(uniforms.sets().len(), core.framebuffers().len());
    assert_eq!(mock.live_count(HandleKind::DescriptorSet), 3);
    assert!(mock.calls().iter().any(|c| matches!(c,
        Call::CreatePipelineLayout { set_layouts: 1, push_constant_ranges: 0 })));

    let constructed = mock.destroy_order().len();
    drop(core);
    let order = mock.destroy_order()[constructed..].to_vec();

    assert!(first(&order, HandleKind::PipelineLayout) < first(&order, HandleKind::DescriptorPool));
    assert!(last(&order, HandleKind::DescriptorSet) < first(&order, HandleKind::DescriptorPool));
    assert!(
        first(&order, HandleKind::DescriptorPool) < first(&order, HandleKind::DescriptorSetLayout)
    );
    assert!(
        first(&order, HandleKind::DescriptorSetLayout) < first(&order, HandleKind::Framebuffer)
    );
    assert_balanced(&mock);
}

#[test]
fn each_command_buffer_binds_its_image_set() {
    let mock = MockDevice::new();
    let core = build_spinning(&mock, &[MeshData::quad()]).unwrap();
    let layout = core.pipeline().layout().handle();
    let buffers: Vec<_> = core.command_buffers().iter().map(|c| c.handle()).collect();

    let binds: Vec<_> = mock
        .calls()
        .iter()
        .filter_map(|c| match c {
            Call::BindDescriptorSets {
                command_buffer,
                bind_point: vk::PipelineBindPoint::GRAPHICS,
                layout: bound,
                first_set: 0,
                sets,
            } if *bound == layout => Some((*command_buffer, sets.clone())),
            _ => None,
        })
        .collect();
    let expected: Vec<_> = buffers
        .iter()
        .zip(core.uniforms().unwrap().sets())
        .map(|(&buffer, &set)| (buffer, vec![set]))
        .collect();
    assert_eq!(binds, expected);
}

#[test]
fn uniforms_are_written_for_the_acquired_image_before_submit() {
    let mock = MockDevice::new();
    let mut core = build_spinning(&mock, &[MeshData::quad()]).unwrap();
    let uniform_buffers = core.uniforms().unwrap().buffers();
    let memories: Vec<_> = uniform_buffers
        .iter()
        .map(|&target| {
            mock.calls()
                .iter()
                .find_map(|c| match c {
                    Call::AllocateMemory { buffer, memory, .. } if *buffer == target => {
                        Some(*memory)
                    }
                    _ => None,
                })
                .unwrap()
        })
        .collect();

    for _ in 0..4 {
        mock.clear_calls();
        core.advance(0.25);
        let info = core.draw_frame().unwrap();

        let calls = mock.calls();
        let write = calls
            .iter()
            .position(|c| matches!(c,
                Call::WriteMemory { memory, offset: 0, len: 192 }
                    if *memory == memories[info.image_index as usize]))
            .unwrap();
        let submit = calls
            .iter()
            .position(|c| matches!(c, Call::QueueSubmit { .. }))
            .unwrap();
        assert!(write < submit);
        let writes = calls
            .iter()
            .filter(|c| matches!(c, Call::WriteMemory { .. }))
            .count();
        assert_eq!(writes, 1);
    }
    assert!((core.angle() - 1.0).abs() < 1e-6);

    drop(core);
    assert_balanced(&mock);
}

#[test]
fn re_recording_keeps_descriptor_bindings() {
    let mock = MockDevice::new();
    let mut core = build_spinning(&mock, &[MeshData::quad()]).unwrap();
    mock.clear_calls();

    core.record_commands().unwrap();

    let binds = mock
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::BindDescriptorSets { .. }))
        .count();
    assert_eq!(binds, core.command_buffers().len());

    drop(core);
    assert_balanced(&mock);
}

#[test]
fn failed_descriptor_pool_releases_earlier_objects() {
    let mock = MockDevice::new();
    mock.fail_on(HandleKind::DescriptorPool, vk::Result::ERROR_OUT_OF_HOST_MEMORY);

    let result = build_spinning(&mock, &[MeshData::quad()]);

    assert!(matches!(
        result,
        Err(RhiError::CreationFailed {
            what: "descriptor pool",
            ..
        })
    ));
    assert_eq!(mock.created_count(HandleKind::Pipeline), 0);
    assert_balanced(&mock);
}
