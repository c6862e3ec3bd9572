//! Command pool and command buffer management.
//!
//! This module provides wrappers for VkCommandPool and VkCommandBuffer,
//! enabling safe recording and submission of Vulkan commands.
//!
//! # Overview
//!
//! - [`CommandPool`] manages VkCommandPool creation and command buffer allocation
//! - [`CommandBuffer`] wraps VkCommandBuffer with methods for recording commands
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_rhi::command::CommandPool;
//! use vkframe_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>) -> Result<(), vkframe_rhi::RhiError> {
//! let (graphics_family, _) = device.queue_families().require()?;
//! let pool = CommandPool::new(device, graphics_family)?;
//!
//! let cmd = pool.allocate_command_buffers(1)?.remove(0);
//! cmd.begin_simultaneous()?;
//! // ... record rendering commands ...
//! cmd.end()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{FrameStage, RhiError, RhiResult};

/// Vulkan command pool wrapper.
///
/// A command pool is used to allocate command buffers. Each pool is associated
/// with a specific queue family and can only allocate command buffers that
/// will be submitted to queues of that family. Destroying the pool frees every
/// buffer allocated from it.
///
/// # Thread Safety
///
/// Command pools are not thread-safe. For multi-threaded command recording,
/// create a separate pool per thread.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    queue_family_index: u32,
}

impl CommandPool {
    /// Creates a command pool for long-lived command buffers.
    ///
    /// # Errors
    ///
    /// Returns an error if command pool creation fails.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        Self::with_flags(device, queue_family_index, vk::CommandPoolCreateFlags::empty())
    }

    /// Creates a transient command pool for short-lived command buffers.
    ///
    /// Transient pools are optimized for command buffers that are recorded
    /// once and submitted, then discarded, such as mesh staging copies.
    ///
    /// # Errors
    ///
    /// Returns an error if command pool creation fails.
    pub fn new_transient(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        Self::with_flags(
            device,
            queue_family_index,
            vk::CommandPoolCreateFlags::TRANSIENT,
        )
    }

    fn with_flags(
        device: Arc<Device>,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(flags);

        let pool = unsafe {
            device
                .api()
                .create_command_pool(&create_info)
                .map_err(RhiError::creation("command pool"))?
        };

        info!(
            "Command pool created for queue family {} ({:?})",
            queue_family_index, flags
        );

        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    /// Returns the Vulkan command pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Returns the queue family index this pool belongs to.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Allocates `count` primary command buffers from this pool.
    ///
    /// The buffers stay valid until they are freed or the pool is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe {
            self.device
                .api()
                .allocate_command_buffers(&alloc_info)
                .map_err(RhiError::creation("command buffers"))?
        };
        debug!("Allocated {} command buffer(s)", buffers.len());

        Ok(buffers
            .into_iter()
            .map(|buffer| CommandBuffer::from_handle(self.device.clone(), buffer))
            .collect())
    }

    /// Returns command buffers to the pool.
    pub fn free(&self, buffers: &[CommandBuffer]) {
        let handles: Vec<vk::CommandBuffer> = buffers.iter().map(CommandBuffer::handle).collect();
        unsafe {
            self.device.api().free_command_buffers(self.pool, &handles);
        }
    }

    /// Records a one-time command buffer, submits it to `queue`, and blocks
    /// until the queue is idle.
    ///
    /// The buffer is freed whether or not recording or submission succeeds.
    ///
    /// # Errors
    ///
    /// Returns the first error from allocation, recording, submission, or the
    /// idle wait.
    pub fn submit_one_time<F>(&self, queue: vk::Queue, record: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer) -> RhiResult<()>,
    {
        let buffers = self.allocate_command_buffers(1)?;
        let result = buffers
            .first()
            .ok_or_else(|| RhiError::InvalidArgument("no command buffer allocated".into()))
            .and_then(|cmd| {
                cmd.begin_one_time()?;
                record(cmd)?;
                cmd.end()?;

                let handles = [cmd.handle()];
                let submit_info = vk::SubmitInfo::default().command_buffers(&handles);
                unsafe {
                    let api = self.device.api();
                    api.queue_submit(queue, &[submit_info], vk::Fence::null())
                        .map_err(RhiError::frame(FrameStage::Submit))?;
                    api.queue_wait_idle(queue)?;
                }
                Ok(())
            });
        self.free(&buffers);
        result
    }

    /// Returns a reference to the device.
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.api().destroy_command_pool(self.pool);
        }
        info!(
            "Command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// Vulkan command buffer wrapper.
///
/// Provides the recording commands the frame core needs. Commands are
/// recorded between one of the `begin_*` calls and [`CommandBuffer::end`].
///
/// # Note
///
/// The command buffer does NOT own the underlying VkCommandBuffer handle.
/// The handle is freed when the owning [`CommandPool`] is destroyed.
#[derive(Clone)]
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Wraps an existing command buffer handle.
    #[inline]
    pub fn from_handle(device: Arc<Device>, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    /// Returns the raw Vulkan command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begins recording a buffer that may be pending on the queue more than
    /// once at a time.
    ///
    /// Used for the pre-recorded per-image draw buffers, which are submitted
    /// every time their image comes around and never re-recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if beginning fails.
    pub fn begin_simultaneous(&self) -> RhiResult<()> {
        self.begin(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE)
    }

    /// Begins recording a buffer that will be submitted exactly once.
    ///
    /// # Errors
    ///
    /// Returns an error if beginning fails.
    pub fn begin_one_time(&self) -> RhiResult<()> {
        self.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
    }

    fn begin(&self, flags: vk::CommandBufferUsageFlags) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);

        unsafe {
            self.device
                .api()
                .begin_command_buffer(self.buffer, &begin_info)
                .map_err(RhiError::creation("command buffer recording"))?;
        }

        Ok(())
    }

    /// Ends recording commands to the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if ending fails (e.g., if not recording).
    pub fn end(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .api()
                .end_command_buffer(self.buffer)
                .map_err(RhiError::creation("command buffer recording"))?;
        }

        Ok(())
    }

    // =========================================================================
    // Render Pass
    // =========================================================================

    /// Begins `render_pass` on `framebuffer`, clearing the color attachment to
    /// `clear_color`. The render area covers the whole `extent`.
    pub fn begin_render_pass(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        }];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device.api().cmd_begin_render_pass(
                self.buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    /// Ends the current render pass.
    pub fn end_render_pass(&self) {
        unsafe {
            self.device.api().cmd_end_render_pass(self.buffer);
        }
    }

    // =========================================================================
    // Binding
    // =========================================================================

    /// Binds a pipeline.
    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .api()
                .cmd_bind_pipeline(self.buffer, bind_point, pipeline);
        }
    }

    /// Binds descriptor sets starting at `first_set`.
    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device
                .api()
                .cmd_bind_descriptor_sets(self.buffer, bind_point, layout, first_set, sets);
        }
    }

    /// Binds vertex buffers starting at `first_binding`.
    pub fn bind_vertex_buffers(
        &self,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.device
                .api()
                .cmd_bind_vertex_buffers(self.buffer, first_binding, buffers, offsets);
        }
    }

    /// Binds an index buffer.
    pub fn bind_index_buffer(
        &self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .api()
                .cmd_bind_index_buffer(self.buffer, buffer, offset, index_type);
        }
    }

    // =========================================================================
    // Drawing
    // =========================================================================

    /// Draws non-indexed primitives.
    pub fn draw(
        &self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.api().cmd_draw(
                self.buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    /// Draws indexed primitives.
    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.api().cmd_draw_indexed(
                self.buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    // =========================================================================
    // Transfer
    // =========================================================================

    /// Copies regions between buffers.
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device
                .api()
                .cmd_copy_buffer(self.buffer, src, dst, regions);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, HandleKind, MockDevice};

    #[test]
    fn test_pool_drop_frees_allocated_buffers() {
        let mock = MockDevice::new();
        let pool = CommandPool::new(mock.device(), 0).unwrap();
        let buffers = pool.allocate_command_buffers(3).unwrap();
        assert_eq!(buffers.len(), 3);
        assert_eq!(mock.live_count(HandleKind::CommandBuffer), 3);

        drop(buffers);
        drop(pool);

        assert_eq!(mock.live_count(HandleKind::CommandBuffer), 0);
        assert_eq!(mock.live_count(HandleKind::CommandPool), 0);
        assert!(mock.invalid_destroys().is_empty());
    }

    #[test]
    fn test_simultaneous_use_flag() {
        let mock = MockDevice::new();
        let pool = CommandPool::new(mock.device(), 0).unwrap();
        let cmd = pool.allocate_command_buffers(1).unwrap().remove(0);

        cmd.begin_simultaneous().unwrap();
        cmd.end().unwrap();

        let begin = mock
            .calls()
            .into_iter()
            .find_map(|call| match call {
                Call::BeginCommandBuffer { flags, .. } => Some(flags),
                _ => None,
            })
            .unwrap();
        assert_eq!(begin, vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
    }

    #[test]
    fn test_submit_one_time_waits_and_frees() {
        let mock = MockDevice::new();
        let device = mock.device();
        let pool = CommandPool::new_transient(device.clone(), 0).unwrap();
        let queue = device.graphics_queue();

        pool.submit_one_time(queue, |cmd| {
            cmd.copy_buffer(
                vk::Buffer::null(),
                vk::Buffer::null(),
                &[vk::BufferCopy::default().size(16)],
            );
            Ok(())
        })
        .unwrap();

        let calls = mock.calls();
        let submit = calls
            .iter()
            .position(|c| matches!(c, Call::QueueSubmit { .. }))
            .unwrap();
        let wait = calls
            .iter()
            .position(|c| matches!(c, Call::QueueWaitIdle { .. }))
            .unwrap();
        assert!(submit < wait);
        assert_eq!(mock.live_count(HandleKind::CommandBuffer), 0);
    }

    #[test]
    fn test_submit_one_time_frees_on_recording_error() {
        let mock = MockDevice::new();
        let device = mock.device();
        let pool = CommandPool::new_transient(device.clone(), 0).unwrap();

        let result = pool.submit_one_time(device.graphics_queue(), |_| {
            Err(RhiError::InvalidArgument("stop".into()))
        });

        assert!(result.is_err());
        assert_eq!(mock.live_count(HandleKind::CommandBuffer), 0);
        assert!(!mock
            .calls()
            .iter()
            .any(|c| matches!(c, Call::QueueSubmit { .. })));
    }
}
