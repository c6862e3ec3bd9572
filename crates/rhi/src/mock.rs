//! Recording backend for tests.
//!
//! [`MockDevice`] implements [`DeviceApi`] without a GPU. It hands out unique
//! fake handles, remembers which ones are alive, records every command and
//! queue operation, and notes the order objects are destroyed in. Clones
//! share state, so a test keeps one clone for inspection and boxes another
//! into a [`Device`].
//!
//! [`MockAdapters`] implements [`AdapterQuery`] over a list of fabricated
//! adapters for device-selection tests.

use std::collections::{BTreeSet, HashMap};
use std::ffi::CStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use gpu_allocator::MemoryLocation;

use crate::api::{DeviceApi, DeviceMemory};
use crate::device::Device;
use crate::error::{FrameStage, RhiError, RhiResult};
use crate::physical_device::{AdapterQuery, QueueFamilyIndices};
use crate::swapchain::SwapchainSupportDetails;

/// Kind of object tracked by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Device,
    Swapchain,
    ImageView,
    RenderPass,
    Framebuffer,
    ShaderModule,
    PipelineLayout,
    Pipeline,
    DescriptorSetLayout,
    DescriptorPool,
    DescriptorSet,
    CommandPool,
    CommandBuffer,
    Semaphore,
    Fence,
    Buffer,
    Memory,
}

/// Fixed-function and shader state captured at pipeline creation.
#[derive(Debug, Clone)]
pub struct PipelineSnapshot {
    pub stages: Vec<(vk::ShaderStageFlags, vk::ShaderModule)>,
    pub entry_points: Vec<String>,
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart: bool,
    pub viewports: Vec<vk::Viewport>,
    pub scissors: Vec<vk::Rect2D>,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_bias: bool,
    pub line_width: f32,
    pub samples: vk::SampleCountFlags,
    pub sample_shading: bool,
    pub blend_attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    pub has_depth_stencil_state: bool,
    pub has_dynamic_state: bool,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
}

/// One buffer descriptor written by `update_descriptor_sets`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub range: vk::DeviceSize,
}

/// A recorded call.
#[derive(Debug, Clone)]
pub enum Call {
    CreateSwapchain {
        min_image_count: u32,
        format: vk::Format,
        color_space: vk::ColorSpaceKHR,
        extent: vk::Extent2D,
        sharing_mode: vk::SharingMode,
        queue_family_indices: Vec<u32>,
        present_mode: vk::PresentModeKHR,
    },
    CreateRenderPass {
        attachments: Vec<vk::AttachmentDescription>,
        subpass_bind_points: Vec<vk::PipelineBindPoint>,
        color_attachments: Vec<Vec<vk::AttachmentReference>>,
        dependencies: Vec<vk::SubpassDependency>,
    },
    CreateFramebuffer {
        render_pass: vk::RenderPass,
        attachments: Vec<vk::ImageView>,
        width: u32,
        height: u32,
        layers: u32,
    },
    CreatePipelineLayout {
        set_layouts: u32,
        push_constant_ranges: u32,
    },
    CreateGraphicsPipeline(Box<PipelineSnapshot>),
    CreateDescriptorSetLayout {
        bindings: Vec<(u32, vk::DescriptorType, u32, vk::ShaderStageFlags)>,
    },
    CreateDescriptorPool {
        max_sets: u32,
        pool_sizes: Vec<vk::DescriptorPoolSize>,
    },
    AllocateDescriptorSets {
        pool: vk::DescriptorPool,
        layouts: Vec<vk::DescriptorSetLayout>,
        sets: Vec<vk::DescriptorSet>,
    },
    UpdateDescriptorSets {
        writes: Vec<DescriptorWrite>,
    },
    CreateBuffer {
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    },
    AllocateMemory {
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        location: MemoryLocation,
    },
    WriteMemory {
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        len: usize,
    },
    AllocateCommandBuffers {
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        buffers: Vec<vk::CommandBuffer>,
    },
    BeginCommandBuffer {
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    },
    EndCommandBuffer {
        command_buffer: vk::CommandBuffer,
    },
    BeginRenderPass {
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_colors: Vec<[f32; 4]>,
        contents: vk::SubpassContents,
    },
    EndRenderPass {
        command_buffer: vk::CommandBuffer,
    },
    BindPipeline {
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSets {
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    BindVertexBuffers {
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: Vec<vk::Buffer>,
        offsets: Vec<vk::DeviceSize>,
    },
    BindIndexBuffer {
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    },
    Draw {
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    CopyBuffer {
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    WaitForFences {
        fences: Vec<vk::Fence>,
        wait_all: bool,
        timeout: u64,
    },
    ResetFences {
        fences: Vec<vk::Fence>,
    },
    AcquireNextImage {
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout: u64,
        image_index: u32,
    },
    QueueSubmit {
        queue: vk::Queue,
        wait_semaphores: Vec<vk::Semaphore>,
        wait_stages: Vec<vk::PipelineStageFlags>,
        command_buffers: Vec<vk::CommandBuffer>,
        signal_semaphores: Vec<vk::Semaphore>,
        fence: vk::Fence,
    },
    QueuePresent {
        queue: vk::Queue,
        wait_semaphores: Vec<vk::Semaphore>,
        swapchains: Vec<vk::SwapchainKHR>,
        image_indices: Vec<u32>,
    },
    QueueWaitIdle {
        queue: vk::Queue,
    },
    DeviceWaitIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FailPoint {
    Create(HandleKind),
    Frame(FrameStage),
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    live: HashMap<u64, HandleKind>,
    created: Vec<(HandleKind, u64)>,
    destroyed: Vec<(HandleKind, u64)>,
    invalid_destroys: Vec<(HandleKind, u64)>,
    pool_buffers: HashMap<u64, Vec<u64>>,
    pool_sets: HashMap<u64, Vec<u64>>,
    buffer_sizes: HashMap<u64, vk::DeviceSize>,
    signaled_fences: BTreeSet<u64>,
    calls: Vec<Call>,
    /// Remaining successes before the failure fires, and the result to fail with.
    failures: HashMap<FailPoint, (u32, vk::Result)>,
    swapchain_images: u32,
    next_image: u32,
    device_destroyed: bool,
    live_at_device_destroy: Vec<(HandleKind, u64)>,
}

impl MockState {
    fn create(&mut self, kind: HandleKind) -> VkResult<u64> {
        self.check_failure(FailPoint::Create(kind))?;
        self.next_handle += 1;
        let raw = 0x1000 + self.next_handle;
        self.live.insert(raw, kind);
        self.created.push((kind, raw));
        Ok(raw)
    }

    fn destroy(&mut self, kind: HandleKind, raw: u64) {
        if raw == 0 {
            return;
        }
        match self.live.remove(&raw) {
            Some(live_kind) if live_kind == kind => self.destroyed.push((kind, raw)),
            Some(live_kind) => {
                self.live.insert(raw, live_kind);
                self.invalid_destroys.push((kind, raw));
            }
            None => self.invalid_destroys.push((kind, raw)),
        }
    }

    fn frame_failure(&mut self, stage: FrameStage) -> VkResult<()> {
        self.check_failure(FailPoint::Frame(stage))
    }

    fn check_failure(&mut self, point: FailPoint) -> VkResult<()> {
        let Some((remaining, result)) = self.failures.get_mut(&point) else {
            return Ok(());
        };
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(());
        }
        let result = *result;
        self.failures.remove(&point);
        Err(result)
    }
}

/// Shared-state recording [`DeviceApi`].
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    /// Creates a mock whose swapchains expose three images.
    pub fn new() -> Self {
        let mock = Self::default();
        mock.state().swapchain_images = 3;
        mock
    }

    /// Sets the number of images every created swapchain exposes.
    pub fn with_swapchain_images(self, count: u32) -> Self {
        self.state().swapchain_images = count;
        self
    }

    /// Wraps a clone of this mock in a [`Device`] whose graphics and present
    /// queues share family 0.
    ///
    /// # Panics
    ///
    /// Never in practice; the queue families passed are complete.
    pub fn device(&self) -> Arc<Device> {
        self.device_with_families(0, 0)
    }

    /// Wraps a clone of this mock in a [`Device`] with the given families.
    ///
    /// # Panics
    ///
    /// Never in practice; the queue families passed are complete.
    pub fn device_with_families(&self, graphics: u32, present: u32) -> Arc<Device> {
        let families = QueueFamilyIndices {
            graphics_family: Some(graphics),
            present_family: Some(present),
        };
        Device::with_api(Box::new(self.clone()), vk::PhysicalDevice::null(), families)
            .unwrap_or_else(|e| panic!("mock device creation failed: {}", e))
    }

    /// Surface support typical of a desktop compositor: the extent follows the
    /// window, 2..=8 images, a BGRA8 UNORM format, FIFO and MAILBOX.
    pub fn surface_support() -> SwapchainSupportDetails {
        SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    /// Makes the next creation of `kind` fail with `result`.
    pub fn fail_on(&self, kind: HandleKind, result: vk::Result) {
        self.fail_after(kind, 0, result);
    }

    /// Lets `successes` creations of `kind` through, then fails the next one.
    pub fn fail_after(&self, kind: HandleKind, successes: u32, result: vk::Result) {
        self.state()
            .failures
            .insert(FailPoint::Create(kind), (successes, result));
    }

    /// Makes the next call belonging to `stage` fail with `result`.
    pub fn fail_frame(&self, stage: FrameStage, result: vk::Result) {
        self.fail_frame_after(stage, 0, result);
    }

    /// Lets `successes` calls belonging to `stage` through, then fails the next one.
    pub fn fail_frame_after(&self, stage: FrameStage, successes: u32, result: vk::Result) {
        self.state()
            .failures
            .insert(FailPoint::Frame(stage), (successes, result));
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    /// Forgets recorded calls; lifetime tracking is kept.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Number of live objects of `kind`.
    pub fn live_count(&self, kind: HandleKind) -> usize {
        self.state().live.values().filter(|&&k| k == kind).count()
    }

    /// Every live object.
    pub fn live_handles(&self) -> Vec<(HandleKind, u64)> {
        let state = self.state();
        let mut live: Vec<_> = state.live.iter().map(|(&raw, &kind)| (kind, raw)).collect();
        live.sort_by_key(|&(_, raw)| raw);
        live
    }

    /// Number of objects of `kind` ever created.
    pub fn created_count(&self, kind: HandleKind) -> usize {
        self.state().created.iter().filter(|(k, _)| *k == kind).count()
    }

    /// Number of objects of `kind` destroyed.
    pub fn destroyed_count(&self, kind: HandleKind) -> usize {
        self.state().destroyed.iter().filter(|(k, _)| *k == kind).count()
    }

    /// Destroyed objects in destruction order.
    pub fn destroyed(&self) -> Vec<(HandleKind, u64)> {
        self.state().destroyed.clone()
    }

    /// Kinds of destroyed objects in destruction order.
    pub fn destroy_order(&self) -> Vec<HandleKind> {
        self.state().destroyed.iter().map(|&(kind, _)| kind).collect()
    }

    /// Destroy calls for handles that were not alive (double or foreign destroys).
    pub fn invalid_destroys(&self) -> Vec<(HandleKind, u64)> {
        self.state().invalid_destroys.clone()
    }

    /// Whether the logical device has been destroyed.
    pub fn device_destroyed(&self) -> bool {
        self.state().device_destroyed
    }

    /// Objects still alive when the device was destroyed.
    pub fn live_at_device_destroy(&self) -> Vec<(HandleKind, u64)> {
        self.state().live_at_device_destroy.clone()
    }

    /// Whether `fence` is currently signaled.
    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state().signaled_fences.contains(&fence.as_raw())
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create<H: Handle>(&self, kind: HandleKind) -> VkResult<H> {
        self.state().create(kind).map(H::from_raw)
    }

    fn destroy<H: Handle>(&self, kind: HandleKind, handle: H) {
        self.state().destroy(kind, handle.as_raw());
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }
}

/// Reads `len` elements at `ptr`, treating null or zero length as empty.
///
/// # Safety
///
/// A non-null `ptr` must point at `len` initialized elements.
unsafe fn raw_slice<'a, T>(ptr: *const T, len: u32) -> &'a [T] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, len as usize) }
    }
}

/// Dereferences an optional create-info pointer.
///
/// # Safety
///
/// A non-null `ptr` must point at an initialized value.
unsafe fn raw_ref<'a, T>(ptr: *const T) -> Option<&'a T> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { &*ptr })
    }
}

fn snapshot_pipeline(info: &vk::GraphicsPipelineCreateInfo<'_>) -> PipelineSnapshot {
    unsafe {
        let stages = raw_slice(info.p_stages, info.stage_count);
        let vertex_input = raw_ref(info.p_vertex_input_state);
        let input_assembly = raw_ref(info.p_input_assembly_state);
        let viewport = raw_ref(info.p_viewport_state);
        let raster = raw_ref(info.p_rasterization_state);
        let multisample = raw_ref(info.p_multisample_state);
        let blend = raw_ref(info.p_color_blend_state);

        PipelineSnapshot {
            stages: stages.iter().map(|s| (s.stage, s.module)).collect(),
            entry_points: stages
                .iter()
                .filter(|s| !s.p_name.is_null())
                .map(|s| CStr::from_ptr(s.p_name).to_string_lossy().into_owned())
                .collect(),
            bindings: vertex_input
                .map(|v| {
                    raw_slice(
                        v.p_vertex_binding_descriptions,
                        v.vertex_binding_description_count,
                    )
                    .to_vec()
                })
                .unwrap_or_default(),
            attributes: vertex_input
                .map(|v| {
                    raw_slice(
                        v.p_vertex_attribute_descriptions,
                        v.vertex_attribute_description_count,
                    )
                    .to_vec()
                })
                .unwrap_or_default(),
            topology: input_assembly.map(|i| i.topology).unwrap_or_default(),
            primitive_restart: input_assembly
                .map(|i| i.primitive_restart_enable == vk::TRUE)
                .unwrap_or(false),
            viewports: viewport
                .map(|v| raw_slice(v.p_viewports, v.viewport_count).to_vec())
                .unwrap_or_default(),
            scissors: viewport
                .map(|v| raw_slice(v.p_scissors, v.scissor_count).to_vec())
                .unwrap_or_default(),
            polygon_mode: raster.map(|r| r.polygon_mode).unwrap_or_default(),
            cull_mode: raster.map(|r| r.cull_mode).unwrap_or_default(),
            front_face: raster.map(|r| r.front_face).unwrap_or_default(),
            depth_bias: raster
                .map(|r| r.depth_bias_enable == vk::TRUE)
                .unwrap_or(false),
            line_width: raster.map(|r| r.line_width).unwrap_or_default(),
            samples: multisample
                .map(|m| m.rasterization_samples)
                .unwrap_or_default(),
            sample_shading: multisample
                .map(|m| m.sample_shading_enable == vk::TRUE)
                .unwrap_or(false),
            blend_attachments: blend
                .map(|b| raw_slice(b.p_attachments, b.attachment_count).to_vec())
                .unwrap_or_default(),
            has_depth_stencil_state: !info.p_depth_stencil_state.is_null(),
            has_dynamic_state: !info.p_dynamic_state.is_null(),
            layout: info.layout,
            render_pass: info.render_pass,
            subpass: info.subpass,
        }
    }
}

impl DeviceApi for MockDevice {
    unsafe fn get_device_queue(&self, family_index: u32, queue_index: u32) -> vk::Queue {
        vk::Queue::from_raw(0x10 + u64::from(family_index) * 0x10 + u64::from(queue_index))
    }

    unsafe fn device_wait_idle(&self) -> VkResult<()> {
        self.record(Call::DeviceWaitIdle);
        Ok(())
    }

    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()> {
        self.record(Call::QueueWaitIdle { queue });
        Ok(())
    }

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut state = self.state();
        state.frame_failure(FrameStage::Submit)?;
        for submit in submits {
            let (wait_semaphores, wait_stages, command_buffers, signal_semaphores) = unsafe {
                (
                    raw_slice(submit.p_wait_semaphores, submit.wait_semaphore_count).to_vec(),
                    raw_slice(submit.p_wait_dst_stage_mask, submit.wait_semaphore_count).to_vec(),
                    raw_slice(submit.p_command_buffers, submit.command_buffer_count).to_vec(),
                    raw_slice(submit.p_signal_semaphores, submit.signal_semaphore_count).to_vec(),
                )
            };
            state.calls.push(Call::QueueSubmit {
                queue,
                wait_semaphores,
                wait_stages,
                command_buffers,
                signal_semaphores,
                fence,
            });
        }
        if fence != vk::Fence::null() {
            state.signaled_fences.insert(fence.as_raw());
        }
        Ok(())
    }

    unsafe fn destroy_device(&self) {
        let mut state = self.state();
        if state.device_destroyed {
            state.invalid_destroys.push((HandleKind::Device, 0));
            return;
        }
        state.device_destroyed = true;
        let mut live: Vec<_> = state.live.iter().map(|(&raw, &kind)| (kind, raw)).collect();
        live.sort_by_key(|&(_, raw)| raw);
        state.live_at_device_destroy = live;
        state.destroyed.push((HandleKind::Device, 0));
    }

    unsafe fn create_swapchain(
        &self,
        create_info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        let queue_family_indices = unsafe {
            raw_slice(
                create_info.p_queue_family_indices,
                create_info.queue_family_index_count,
            )
            .to_vec()
        };
        let swapchain = self.create(HandleKind::Swapchain)?;
        self.record(Call::CreateSwapchain {
            min_image_count: create_info.min_image_count,
            format: create_info.image_format,
            color_space: create_info.image_color_space,
            extent: create_info.image_extent,
            sharing_mode: create_info.image_sharing_mode,
            queue_family_indices,
            present_mode: create_info.present_mode,
        });
        Ok(swapchain)
    }

    unsafe fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let count = self.state().swapchain_images;
        Ok((0..count)
            .map(|i| vk::Image::from_raw((swapchain.as_raw() << 8) + u64::from(i) + 1))
            .collect())
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.destroy(HandleKind::Swapchain, swapchain);
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
        _fence: vk::Fence,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state();
        state.frame_failure(FrameStage::Acquire)?;
        let count = state.swapchain_images.max(1);
        let image_index = state.next_image % count;
        state.next_image = state.next_image.wrapping_add(1);
        state.calls.push(Call::AcquireNextImage {
            swapchain,
            semaphore,
            timeout,
            image_index,
        });
        Ok((image_index, false))
    }

    unsafe fn queue_present(
        &self,
        queue: vk::Queue,
        present_info: &vk::PresentInfoKHR<'_>,
    ) -> VkResult<bool> {
        let mut state = self.state();
        state.frame_failure(FrameStage::Present)?;
        let (wait_semaphores, swapchains, image_indices) = unsafe {
            (
                raw_slice(present_info.p_wait_semaphores, present_info.wait_semaphore_count)
                    .to_vec(),
                raw_slice(present_info.p_swapchains, present_info.swapchain_count).to_vec(),
                raw_slice(present_info.p_image_indices, present_info.swapchain_count).to_vec(),
            )
        };
        state.calls.push(Call::QueuePresent {
            queue,
            wait_semaphores,
            swapchains,
            image_indices,
        });
        Ok(false)
    }

    unsafe fn create_image_view(
        &self,
        _create_info: &vk::ImageViewCreateInfo<'_>,
    ) -> VkResult<vk::ImageView> {
        self.create(HandleKind::ImageView)
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy(HandleKind::ImageView, view);
    }

    unsafe fn create_render_pass(
        &self,
        create_info: &vk::RenderPassCreateInfo<'_>,
    ) -> VkResult<vk::RenderPass> {
        let render_pass = self.create(HandleKind::RenderPass)?;
        let call = unsafe {
            let subpasses = raw_slice(create_info.p_subpasses, create_info.subpass_count);
            Call::CreateRenderPass {
                attachments: raw_slice(create_info.p_attachments, create_info.attachment_count)
                    .to_vec(),
                subpass_bind_points: subpasses.iter().map(|s| s.pipeline_bind_point).collect(),
                color_attachments: subpasses
                    .iter()
                    .map(|s| raw_slice(s.p_color_attachments, s.color_attachment_count).to_vec())
                    .collect(),
                dependencies: raw_slice(create_info.p_dependencies, create_info.dependency_count)
                    .to_vec(),
            }
        };
        self.record(call);
        Ok(render_pass)
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.destroy(HandleKind::RenderPass, render_pass);
    }

    unsafe fn create_framebuffer(
        &self,
        create_info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        let framebuffer = self.create(HandleKind::Framebuffer)?;
        let attachments =
            unsafe { raw_slice(create_info.p_attachments, create_info.attachment_count).to_vec() };
        self.record(Call::CreateFramebuffer {
            render_pass: create_info.render_pass,
            attachments,
            width: create_info.width,
            height: create_info.height,
            layers: create_info.layers,
        });
        Ok(framebuffer)
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.destroy(HandleKind::Framebuffer, framebuffer);
    }

    unsafe fn create_shader_module(
        &self,
        _create_info: &vk::ShaderModuleCreateInfo<'_>,
    ) -> VkResult<vk::ShaderModule> {
        self.create(HandleKind::ShaderModule)
    }

    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.destroy(HandleKind::ShaderModule, module);
    }

    unsafe fn create_pipeline_layout(
        &self,
        create_info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout> {
        let layout = self.create(HandleKind::PipelineLayout)?;
        self.record(Call::CreatePipelineLayout {
            set_layouts: create_info.set_layout_count,
            push_constant_ranges: create_info.push_constant_range_count,
        });
        Ok(layout)
    }

    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy(HandleKind::PipelineLayout, layout);
    }

    unsafe fn create_graphics_pipeline(
        &self,
        create_info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline> {
        let pipeline = self.create(HandleKind::Pipeline)?;
        self.record(Call::CreateGraphicsPipeline(Box::new(snapshot_pipeline(
            create_info,
        ))));
        Ok(pipeline)
    }

    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy(HandleKind::Pipeline, pipeline);
    }

    unsafe fn create_descriptor_set_layout(
        &self,
        create_info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorSetLayout> {
        let layout = self.create(HandleKind::DescriptorSetLayout)?;
        let bindings = unsafe {
            raw_slice(create_info.p_bindings, create_info.binding_count)
                .iter()
                .map(|b| (b.binding, b.descriptor_type, b.descriptor_count, b.stage_flags))
                .collect()
        };
        self.record(Call::CreateDescriptorSetLayout { bindings });
        Ok(layout)
    }

    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.destroy(HandleKind::DescriptorSetLayout, layout);
    }

    unsafe fn create_descriptor_pool(
        &self,
        create_info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorPool> {
        let pool = self.create(HandleKind::DescriptorPool)?;
        let pool_sizes =
            unsafe { raw_slice(create_info.p_pool_sizes, create_info.pool_size_count).to_vec() };
        self.record(Call::CreateDescriptorPool {
            max_sets: create_info.max_sets,
            pool_sizes,
        });
        Ok(pool)
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state();
        let sets = state.pool_sets.remove(&pool.as_raw()).unwrap_or_default();
        for raw in sets {
            state.destroy(HandleKind::DescriptorSet, raw);
        }
        state.destroy(HandleKind::DescriptorPool, pool.as_raw());
    }

    unsafe fn allocate_descriptor_sets(
        &self,
        allocate_info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let layouts = unsafe {
            raw_slice(
                allocate_info.p_set_layouts,
                allocate_info.descriptor_set_count,
            )
            .to_vec()
        };
        let mut state = self.state();
        let mut sets = Vec::with_capacity(layouts.len());
        for _ in &layouts {
            let raw = state.create(HandleKind::DescriptorSet)?;
            state
                .pool_sets
                .entry(allocate_info.descriptor_pool.as_raw())
                .or_default()
                .push(raw);
            sets.push(vk::DescriptorSet::from_raw(raw));
        }
        state.calls.push(Call::AllocateDescriptorSets {
            pool: allocate_info.descriptor_pool,
            layouts,
            sets: sets.clone(),
        });
        Ok(sets)
    }

    unsafe fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        let mut recorded = Vec::new();
        for write in writes {
            let infos = unsafe { raw_slice(write.p_buffer_info, write.descriptor_count) };
            recorded.extend(infos.iter().map(|info| DescriptorWrite {
                set: write.dst_set,
                binding: write.dst_binding,
                descriptor_type: write.descriptor_type,
                buffer: info.buffer,
                offset: info.offset,
                range: info.range,
            }));
        }
        self.record(Call::UpdateDescriptorSets { writes: recorded });
    }

    unsafe fn create_command_pool(
        &self,
        _create_info: &vk::CommandPoolCreateInfo<'_>,
    ) -> VkResult<vk::CommandPool> {
        self.create(HandleKind::CommandPool)
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state();
        let buffers = state.pool_buffers.remove(&pool.as_raw()).unwrap_or_default();
        for raw in buffers {
            state.destroy(HandleKind::CommandBuffer, raw);
        }
        state.destroy(HandleKind::CommandPool, pool.as_raw());
    }

    unsafe fn allocate_command_buffers(
        &self,
        allocate_info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state();
        let mut buffers = Vec::with_capacity(allocate_info.command_buffer_count as usize);
        for _ in 0..allocate_info.command_buffer_count {
            let raw = state.create(HandleKind::CommandBuffer)?;
            state
                .pool_buffers
                .entry(allocate_info.command_pool.as_raw())
                .or_default()
                .push(raw);
            buffers.push(vk::CommandBuffer::from_raw(raw));
        }
        state.calls.push(Call::AllocateCommandBuffers {
            pool: allocate_info.command_pool,
            level: allocate_info.level,
            buffers: buffers.clone(),
        });
        Ok(buffers)
    }

    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state();
        for buffer in buffers {
            let raw = buffer.as_raw();
            if let Some(owned) = state.pool_buffers.get_mut(&pool.as_raw()) {
                owned.retain(|&b| b != raw);
            }
            state.destroy(HandleKind::CommandBuffer, raw);
        }
    }

    unsafe fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        self.record(Call::BeginCommandBuffer {
            command_buffer,
            flags: begin_info.flags,
        });
        Ok(())
    }

    unsafe fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        self.record(Call::EndCommandBuffer { command_buffer });
        Ok(())
    }

    unsafe fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    ) {
        let clear_colors = unsafe {
            raw_slice(begin_info.p_clear_values, begin_info.clear_value_count)
                .iter()
                .map(|value| value.color.float32)
                .collect()
        };
        self.record(Call::BeginRenderPass {
            command_buffer,
            render_pass: begin_info.render_pass,
            framebuffer: begin_info.framebuffer,
            render_area: begin_info.render_area,
            clear_colors,
            contents,
        });
    }

    unsafe fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.record(Call::EndRenderPass { command_buffer });
    }

    unsafe fn cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.record(Call::BindPipeline {
            command_buffer,
            bind_point,
            pipeline,
        });
    }

    unsafe fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.record(Call::BindDescriptorSets {
            command_buffer,
            bind_point,
            layout,
            first_set,
            sets: sets.to_vec(),
        });
    }

    unsafe fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        self.record(Call::BindVertexBuffers {
            command_buffer,
            first_binding,
            buffers: buffers.to_vec(),
            offsets: offsets.to_vec(),
        });
    }

    unsafe fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.record(Call::BindIndexBuffer {
            command_buffer,
            buffer,
            offset,
            index_type,
        });
    }

    unsafe fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.record(Call::Draw {
            command_buffer,
            vertex_count,
            instance_count,
        });
    }

    unsafe fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.record(Call::DrawIndexed {
            command_buffer,
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }

    unsafe fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.record(Call::CopyBuffer {
            command_buffer,
            src,
            dst,
            regions: regions.to_vec(),
        });
    }

    unsafe fn create_semaphore(
        &self,
        _create_info: &vk::SemaphoreCreateInfo<'_>,
    ) -> VkResult<vk::Semaphore> {
        self.create(HandleKind::Semaphore)
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.destroy(HandleKind::Semaphore, semaphore);
    }

    unsafe fn create_fence(&self, create_info: &vk::FenceCreateInfo<'_>) -> VkResult<vk::Fence> {
        let mut state = self.state();
        let raw = state.create(HandleKind::Fence)?;
        if create_info.flags.contains(vk::FenceCreateFlags::SIGNALED) {
            state.signaled_fences.insert(raw);
        }
        Ok(vk::Fence::from_raw(raw))
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        state.signaled_fences.remove(&fence.as_raw());
        state.destroy(HandleKind::Fence, fence.as_raw());
    }

    /// Fails with `TIMEOUT` when a fence would never signal, since the GPU is
    /// never going to signal it.
    unsafe fn wait_for_fences(
        &self,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout: u64,
    ) -> VkResult<()> {
        let mut state = self.state();
        state.frame_failure(FrameStage::Wait)?;
        state.calls.push(Call::WaitForFences {
            fences: fences.to_vec(),
            wait_all,
            timeout,
        });
        if fences
            .iter()
            .all(|f| state.signaled_fences.contains(&f.as_raw()))
        {
            Ok(())
        } else {
            Err(vk::Result::TIMEOUT)
        }
    }

    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()> {
        let mut state = self.state();
        for fence in fences {
            state.signaled_fences.remove(&fence.as_raw());
        }
        state.calls.push(Call::ResetFences {
            fences: fences.to_vec(),
        });
        Ok(())
    }

    unsafe fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        Ok(self.fence_signaled(fence))
    }

    unsafe fn create_buffer(&self, create_info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer> {
        let mut state = self.state();
        let raw = state.create(HandleKind::Buffer)?;
        state.buffer_sizes.insert(raw, create_info.size);
        state.calls.push(Call::CreateBuffer {
            size: create_info.size,
            usage: create_info.usage,
        });
        Ok(vk::Buffer::from_raw(raw))
    }

    unsafe fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state();
        state.buffer_sizes.remove(&buffer.as_raw());
        state.destroy(HandleKind::Buffer, buffer.as_raw());
    }

    unsafe fn allocate_buffer_memory(
        &self,
        buffer: vk::Buffer,
        location: MemoryLocation,
        _name: &str,
    ) -> RhiResult<DeviceMemory> {
        let mut state = self.state();
        let size = state
            .buffer_sizes
            .get(&buffer.as_raw())
            .copied()
            .ok_or_else(|| {
                RhiError::InvalidArgument("memory requested for unknown buffer".into())
            })?;
        let raw = state
            .create(HandleKind::Memory)
            .map_err(RhiError::creation("buffer memory"))?;
        let memory = vk::DeviceMemory::from_raw(raw);
        state.calls.push(Call::AllocateMemory {
            buffer,
            memory,
            location,
        });
        Ok(DeviceMemory::unmanaged(memory, size))
    }

    unsafe fn free_memory(&self, memory: DeviceMemory) -> RhiResult<()> {
        self.destroy(HandleKind::Memory, memory.handle());
        Ok(())
    }

    unsafe fn write_memory(
        &self,
        memory: &DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> RhiResult<()> {
        if offset + data.len() as vk::DeviceSize > memory.size() {
            return Err(RhiError::InvalidArgument(format!(
                "write of {} bytes at offset {} exceeds allocation size {}",
                data.len(),
                offset,
                memory.size()
            )));
        }
        self.record(Call::WriteMemory {
            memory: memory.handle(),
            offset,
            len: data.len(),
        });
        Ok(())
    }
}

/// A fabricated adapter.
#[derive(Debug, Clone)]
pub struct MockAdapter {
    pub name: String,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Families for which the presentation query succeeds.
    pub present_families: Vec<u32>,
    pub extensions: BTreeSet<String>,
    pub support: SwapchainSupportDetails,
    /// Error returned by every presentation query on this adapter.
    pub presentation_error: Option<vk::Result>,
    pub extensions_error: Option<vk::Result>,
    pub surface_error: Option<vk::Result>,
}

impl MockAdapter {
    /// An adapter with one graphics+present family, `VK_KHR_swapchain`, and
    /// [`MockDevice::surface_support`].
    pub fn suitable(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            queue_families: vec![vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            }],
            present_families: vec![0],
            extensions: [String::from("VK_KHR_swapchain")].into_iter().collect(),
            support: MockDevice::surface_support(),
            presentation_error: None,
            extensions_error: None,
            surface_error: None,
        }
    }

    pub fn with_queue_families(mut self, families: Vec<vk::QueueFamilyProperties>) -> Self {
        self.queue_families = families;
        self
    }

    pub fn with_present_families(mut self, families: &[u32]) -> Self {
        self.present_families = families.to_vec();
        self
    }

    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_presentation_error(mut self, result: vk::Result) -> Self {
        self.presentation_error = Some(result);
        self
    }

    pub fn with_extensions_error(mut self, result: vk::Result) -> Self {
        self.extensions_error = Some(result);
        self
    }

    pub fn with_surface_error(mut self, result: vk::Result) -> Self {
        self.surface_error = Some(result);
        self
    }
}

/// [`AdapterQuery`] over fabricated adapters; handles are `index + 1`.
#[derive(Debug, Clone, Default)]
pub struct MockAdapters {
    adapters: Vec<MockAdapter>,
}

impl MockAdapters {
    pub fn new(adapters: Vec<MockAdapter>) -> Self {
        Self { adapters }
    }

    fn get(&self, adapter: vk::PhysicalDevice) -> RhiResult<&MockAdapter> {
        let index = adapter.as_raw().checked_sub(1);
        index
            .and_then(|i| self.adapters.get(i as usize))
            .ok_or_else(|| RhiError::InvalidArgument(format!("unknown adapter {:?}", adapter)))
    }
}

impl AdapterQuery for MockAdapters {
    fn enumerate_adapters(&self) -> RhiResult<Vec<vk::PhysicalDevice>> {
        Ok((1..=self.adapters.len() as u64)
            .map(vk::PhysicalDevice::from_raw)
            .collect())
    }

    fn adapter_name(&self, adapter: vk::PhysicalDevice) -> String {
        self.get(adapter)
            .map(|a| a.name.clone())
            .unwrap_or_else(|_| String::from("Unknown"))
    }

    fn queue_families(&self, adapter: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        self.get(adapter)
            .map(|a| a.queue_families.clone())
            .unwrap_or_default()
    }

    fn presentation_supported(
        &self,
        adapter: vk::PhysicalDevice,
        family_index: u32,
    ) -> RhiResult<bool> {
        let adapter = self.get(adapter)?;
        match adapter.presentation_error {
            Some(result) => Err(RhiError::VulkanError(result)),
            None => Ok(adapter.present_families.contains(&family_index)),
        }
    }

    fn device_extensions(&self, adapter: vk::PhysicalDevice) -> RhiResult<BTreeSet<String>> {
        let adapter = self.get(adapter)?;
        match adapter.extensions_error {
            Some(result) => Err(RhiError::VulkanError(result)),
            None => Ok(adapter.extensions.clone()),
        }
    }

    fn surface_support(&self, adapter: vk::PhysicalDevice) -> RhiResult<SwapchainSupportDetails> {
        let adapter = self.get(adapter)?;
        match adapter.surface_error {
            Some(result) => Err(RhiError::VulkanError(result)),
            None => Ok(adapter.support.clone()),
        }
    }
}
