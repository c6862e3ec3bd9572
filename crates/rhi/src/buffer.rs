//! GPU buffer management.
//!
//! This module handles vertex, index, staging and uniform buffers. Memory comes from
//! the device backend (gpu-allocator on real hardware), which picks the
//! memory type for the requested [`MemoryLocation`].
//!
//! # Overview
//!
//! - [`BufferUsage`] defines how a buffer will be used
//! - [`Buffer`] wraps VkBuffer together with its bound memory

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use tracing::{debug, error};

use crate::api::DeviceMemory;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Buffer usage type.
///
/// Defines the intended use of the buffer, which affects
/// Vulkan usage flags and memory allocation strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Device-local vertex buffer, filled by a transfer
    Vertex,
    /// Device-local index buffer, filled by a transfer
    Index,
    /// Host-visible source of a transfer
    Staging,
    /// Host-visible uniform buffer, rewritten by the CPU every frame
    Uniform,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        }
    }

    /// Returns the memory location for this buffer type.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => MemoryLocation::GpuOnly,
            BufferUsage::Staging | BufferUsage::Uniform => MemoryLocation::CpuToGpu,
        }
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Staging => "staging",
            BufferUsage::Uniform => "uniform",
        }
    }
}

/// GPU buffer wrapper with bound memory.
///
/// Dropping the buffer destroys the buffer handle first and then returns its
/// memory.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    memory: Option<DeviceMemory>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a buffer of `size` bytes and binds memory to it.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero or if buffer creation or memory
    /// allocation fails. Nothing is leaked on failure.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidArgument(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device
                .api()
                .create_buffer(&buffer_info)
                .map_err(RhiError::creation("buffer"))?
        };

        let mut this = Self {
            device,
            buffer,
            memory: None,
            size,
            usage,
        };
        this.memory = Some(unsafe {
            this.device
                .api()
                .allocate_buffer_memory(buffer, usage.memory_location(), usage.name())?
        });

        debug!("Created {} buffer: {} bytes", usage.name(), size);

        Ok(this)
    }

    /// Creates a host-visible buffer and fills it with `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if buffer creation or the write fails.
    pub fn new_with_data(device: Arc<Device>, usage: BufferUsage, data: &[u8]) -> RhiResult<Self> {
        let buffer = Self::new(device, usage, data.len() as vk::DeviceSize)?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    /// Writes `data` into the buffer at `offset`.
    ///
    /// The buffer must be host visible ([`BufferUsage::Staging`] or
    /// [`BufferUsage::Uniform`]).
    ///
    /// # Errors
    ///
    /// Returns an error if the write would exceed the buffer size or the
    /// memory is not mapped.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidArgument(format!(
                "Write exceeds buffer size: offset {} + data {} > buffer {}",
                offset,
                data.len(),
                self.size
            )));
        }

        if self.usage.memory_location() != MemoryLocation::CpuToGpu {
            return Err(RhiError::InvalidArgument(format!(
                "{} buffer is not host visible",
                self.usage.name()
            )));
        }

        let memory = self.memory.as_ref().ok_or_else(|| {
            RhiError::InvalidArgument("Buffer memory is not available".to_string())
        })?;

        unsafe { self.device.api().write_memory(memory, offset, data) }
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.api().destroy_buffer(self.buffer);
            if let Some(memory) = self.memory.take() {
                if let Err(e) = self.device.api().free_memory(memory) {
                    error!("Failed to free {} buffer memory: {:?}", self.usage.name(), e);
                }
            }
        }

        debug!("Destroyed {} buffer", self.usage.name());
    }
}
