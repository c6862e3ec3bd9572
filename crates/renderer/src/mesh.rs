//! Device-local mesh buffers.
//!
//! [`MeshData`] is the CPU-side description of a mesh. [`Mesh::upload`] copies
//! it into device-local vertex and index buffers through host-visible staging
//! buffers and a one-shot transfer submission.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_renderer::mesh::{Mesh, MeshData};
//! use vkframe_rhi::command::CommandPool;
//! use vkframe_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>) -> Result<(), vkframe_rhi::RhiError> {
//! let (graphics_family, _) = device.queue_families().require()?;
//! let pool = CommandPool::new_transient(device.clone(), graphics_family)?;
//! let quad = Mesh::upload(
//!     device.clone(),
//!     device.graphics_queue(),
//!     &pool,
//!     &MeshData::quad(),
//! )?;
//! assert_eq!(quad.index_count(), 6);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use glam::Vec3;
use tracing::debug;

use vkframe_rhi::buffer::{Buffer, BufferUsage};
use vkframe_rhi::command::CommandPool;
use vkframe_rhi::device::Device;
use vkframe_rhi::vertex::Vertex;
use vkframe_rhi::{RhiError, RhiResult};

/// CPU-side mesh: vertices and optional 32-bit indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Option<Vec<u32>>,
}

impl MeshData {
    /// Creates indexed mesh data.
    pub fn indexed(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            indices: Some(indices),
        }
    }

    /// Creates non-indexed mesh data; vertices are drawn in order.
    pub fn non_indexed(vertices: Vec<Vertex>) -> Self {
        Self {
            vertices,
            indices: None,
        }
    }

    /// A colored quad centered on the origin: four vertices, two clockwise
    /// triangles.
    pub fn quad() -> Self {
        let vertices = vec![
            Vertex::new(Vec3::new(-0.4, -0.4, 0.0), Vec3::new(1.0, 0.0, 0.0)),
            Vertex::new(Vec3::new(0.4, -0.4, 0.0), Vec3::new(0.0, 1.0, 0.0)),
            Vertex::new(Vec3::new(0.4, 0.4, 0.0), Vec3::new(0.0, 0.0, 1.0)),
            Vertex::new(Vec3::new(-0.4, 0.4, 0.0), Vec3::new(1.0, 1.0, 0.0)),
        ];
        Self::indexed(vertices, vec![0, 1, 2, 2, 3, 0])
    }
}

/// Mesh resident in device-local memory.
///
/// Owns its vertex buffer and optional index buffer, each with its memory.
/// A `Mesh` can be moved but not cloned; dropping it releases both buffers.
pub struct Mesh {
    vertex_buffer: Buffer,
    index_buffer: Option<Buffer>,
    vertex_count: u32,
    index_count: u32,
}

impl Mesh {
    /// Uploads `data` through staging buffers.
    ///
    /// Each array is written into a host-visible staging buffer, copied into a
    /// device-local buffer with a one-shot command buffer from
    /// `transfer_pool`, and the call blocks until `transfer_queue` is idle.
    /// Staging buffers are released before returning.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] for an empty vertex list or an
    /// empty index list, and any creation or submission error from the upload.
    pub fn upload(
        device: Arc<Device>,
        transfer_queue: vk::Queue,
        transfer_pool: &CommandPool,
        data: &MeshData,
    ) -> RhiResult<Self> {
        if data.vertices.is_empty() {
            return Err(RhiError::InvalidArgument(
                "Mesh must have at least one vertex".to_string(),
            ));
        }
        let vertex_count = count_u32(data.vertices.len(), "vertex")?;

        let vertex_buffer = upload_buffer(
            &device,
            transfer_queue,
            transfer_pool,
            BufferUsage::Vertex,
            bytemuck::cast_slice(&data.vertices),
        )?;

        let (index_buffer, index_count) = match &data.indices {
            Some(indices) if indices.is_empty() => {
                return Err(RhiError::InvalidArgument(
                    "Index list must not be empty".to_string(),
                ));
            }
            Some(indices) => {
                let buffer = upload_buffer(
                    &device,
                    transfer_queue,
                    transfer_pool,
                    BufferUsage::Index,
                    bytemuck::cast_slice(indices),
                )?;
                (Some(buffer), count_u32(indices.len(), "index")?)
            }
            None => (None, 0),
        };

        debug!(
            "Uploaded mesh: {} vertices, {} indices",
            vertex_count, index_count
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_count,
            index_count,
        })
    }

    /// Number of vertices.
    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Number of indices; zero for a non-indexed mesh.
    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    #[inline]
    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle()
    }

    /// Index buffer handle, if the mesh is indexed.
    #[inline]
    pub fn index_buffer(&self) -> Option<vk::Buffer> {
        self.index_buffer.as_ref().map(Buffer::handle)
    }
}

fn count_u32(len: usize, what: &str) -> RhiResult<u32> {
    u32::try_from(len)
        .map_err(|_| RhiError::InvalidArgument(format!("Too many {} entries: {}", what, len)))
}

fn upload_buffer(
    device: &Arc<Device>,
    transfer_queue: vk::Queue,
    transfer_pool: &CommandPool,
    usage: BufferUsage,
    bytes: &[u8],
) -> RhiResult<Buffer> {
    let staging = Buffer::new_with_data(device.clone(), BufferUsage::Staging, bytes)?;
    let target = Buffer::new(device.clone(), usage, staging.size())?;

    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size: staging.size(),
    };
    transfer_pool.submit_one_time(transfer_queue, |cmd| {
        cmd.copy_buffer(staging.handle(), target.handle(), &[region]);
        Ok(())
    })?;

    Ok(target)
}
