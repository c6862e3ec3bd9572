//! Backend seam for device-level Vulkan calls.
//!
//! Every wrapper in this crate reaches the driver through [`DeviceApi`]. The
//! real implementation ([`crate::device::AshDevice`]) forwards to `ash`; the
//! recording implementation in [`crate::mock`] fabricates handles so that the
//! core can be constructed, driven and torn down without a GPU.
//!
//! Methods mirror the `ash` call they wrap and keep its safety contract: every
//! handle passed in must have been created through the same implementation and
//! must not be in use by the GPU when destroyed.

use ash::prelude::VkResult;
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;

use crate::error::RhiResult;

/// Memory bound to a buffer.
///
/// Real allocations come from gpu-allocator and are returned to it by
/// [`DeviceApi::free_memory`]. Unmanaged blocks carry only a raw handle.
#[derive(Debug)]
pub struct DeviceMemory {
    memory: vk::DeviceMemory,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    allocation: Option<Allocation>,
}

impl DeviceMemory {
    /// Wraps a gpu-allocator allocation.
    pub fn from_allocation(allocation: Allocation) -> Self {
        let memory = unsafe { allocation.memory() };
        Self {
            memory,
            offset: allocation.offset(),
            size: allocation.size(),
            allocation: Some(allocation),
        }
    }

    /// Wraps a raw memory handle that is not owned by an allocator.
    pub fn unmanaged(memory: vk::DeviceMemory, size: vk::DeviceSize) -> Self {
        Self {
            memory,
            offset: 0,
            size,
            allocation: None,
        }
    }

    /// Returns the raw memory handle.
    #[inline]
    pub fn handle(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Returns the offset of this block inside its memory object.
    #[inline]
    pub fn offset(&self) -> vk::DeviceSize {
        self.offset
    }

    /// Returns the size of the block in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Returns the backing allocation, if any.
    #[inline]
    pub fn allocation(&self) -> Option<&Allocation> {
        self.allocation.as_ref()
    }

    /// Releases the backing allocation for return to the allocator.
    pub fn into_allocation(self) -> Option<Allocation> {
        self.allocation
    }
}

/// Device-level Vulkan entry points used by the renderer core.
#[allow(clippy::missing_safety_doc)]
pub trait DeviceApi: Send + Sync {
    // ========================================================================
    // Device and queues
    // ========================================================================

    unsafe fn get_device_queue(&self, family_index: u32, queue_index: u32) -> vk::Queue;
    unsafe fn device_wait_idle(&self) -> VkResult<()>;
    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()>;
    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()>;
    /// Destroys the logical device. Called exactly once, after every child object.
    unsafe fn destroy_device(&self);

    // ========================================================================
    // Swapchain
    // ========================================================================

    unsafe fn create_swapchain(
        &self,
        create_info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR>;
    unsafe fn get_swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// Returns the image index and whether the swapchain is suboptimal.
    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<(u32, bool)>;
    /// Returns whether the swapchain is suboptimal.
    unsafe fn queue_present(
        &self,
        queue: vk::Queue,
        present_info: &vk::PresentInfoKHR<'_>,
    ) -> VkResult<bool>;

    // ========================================================================
    // Image views, render passes and framebuffers
    // ========================================================================

    unsafe fn create_image_view(
        &self,
        create_info: &vk::ImageViewCreateInfo<'_>,
    ) -> VkResult<vk::ImageView>;
    unsafe fn destroy_image_view(&self, view: vk::ImageView);
    unsafe fn create_render_pass(
        &self,
        create_info: &vk::RenderPassCreateInfo<'_>,
    ) -> VkResult<vk::RenderPass>;
    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    unsafe fn create_framebuffer(
        &self,
        create_info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer>;
    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // ========================================================================
    // Shaders and pipelines
    // ========================================================================

    unsafe fn create_shader_module(
        &self,
        create_info: &vk::ShaderModuleCreateInfo<'_>,
    ) -> VkResult<vk::ShaderModule>;
    unsafe fn destroy_shader_module(&self, module: vk::ShaderModule);
    unsafe fn create_pipeline_layout(
        &self,
        create_info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> VkResult<vk::PipelineLayout>;
    unsafe fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    unsafe fn create_graphics_pipeline(
        &self,
        create_info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> VkResult<vk::Pipeline>;
    unsafe fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // ========================================================================
    // Descriptors
    // ========================================================================

    unsafe fn create_descriptor_set_layout(
        &self,
        create_info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorSetLayout>;
    unsafe fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    unsafe fn create_descriptor_pool(
        &self,
        create_info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> VkResult<vk::DescriptorPool>;
    /// Destroys the pool and implicitly frees every set allocated from it.
    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    unsafe fn allocate_descriptor_sets(
        &self,
        allocate_info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::DescriptorSet>>;
    unsafe fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]);

    // ========================================================================
    // Command pools and buffers
    // ========================================================================

    unsafe fn create_command_pool(
        &self,
        create_info: &vk::CommandPoolCreateInfo<'_>,
    ) -> VkResult<vk::CommandPool>;
    /// Destroys the pool and implicitly frees every buffer allocated from it.
    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);
    unsafe fn allocate_command_buffers(
        &self,
        allocate_info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    unsafe fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()>;
    unsafe fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;

    // ========================================================================
    // Recorded commands
    // ========================================================================

    unsafe fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    );
    unsafe fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);
    unsafe fn cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );
    unsafe fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
    unsafe fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );
    unsafe fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );
    unsafe fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    unsafe fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    unsafe fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );

    // ========================================================================
    // Synchronization
    // ========================================================================

    unsafe fn create_semaphore(
        &self,
        create_info: &vk::SemaphoreCreateInfo<'_>,
    ) -> VkResult<vk::Semaphore>;
    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    unsafe fn create_fence(&self, create_info: &vk::FenceCreateInfo<'_>) -> VkResult<vk::Fence>;
    unsafe fn destroy_fence(&self, fence: vk::Fence);
    unsafe fn wait_for_fences(
        &self,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout: u64,
    ) -> VkResult<()>;
    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()>;
    unsafe fn get_fence_status(&self, fence: vk::Fence) -> VkResult<bool>;

    // ========================================================================
    // Buffers and memory
    // ========================================================================

    unsafe fn create_buffer(&self, create_info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer>;
    unsafe fn destroy_buffer(&self, buffer: vk::Buffer);
    /// Allocates memory suitable for `buffer` in `location` and binds it.
    unsafe fn allocate_buffer_memory(
        &self,
        buffer: vk::Buffer,
        location: MemoryLocation,
        name: &str,
    ) -> RhiResult<DeviceMemory>;
    unsafe fn free_memory(&self, memory: DeviceMemory) -> RhiResult<()>;
    /// Copies `data` into host-visible memory at `offset`.
    unsafe fn write_memory(
        &self,
        memory: &DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> RhiResult<()>;
}
