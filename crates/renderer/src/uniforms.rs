//! Per-image projection uniforms.
//!
//! When enabled, every swapchain image owns a host-visible uniform buffer and
//! a descriptor set pointing at it. The buffer for the acquired image is
//! rewritten after acquisition and before submission, so the recorded command
//! buffers stay static while the matrices change every frame.

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use tracing::debug;

use vkframe_rhi::buffer::{Buffer, BufferUsage};
use vkframe_rhi::descriptor::{
    uniform_buffer_binding, write_uniform_buffers, DescriptorPool, DescriptorSetLayout,
};
use vkframe_rhi::device::Device;
use vkframe_rhi::{RhiError, RhiResult};

/// Binding of the matrix block inside set 0.
pub const UNIFORM_BINDING: u32 = 0;

/// Matrix block read by the vertex shader.
///
/// # Memory Layout
///
/// - Offset 0: projection (64 bytes)
/// - Offset 64: view (64 bytes)
/// - Offset 128: model (64 bytes)
/// - Total size: 192 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ProjectionMatrices {
    pub projection: Mat4,
    pub view: Mat4,
    pub model: Mat4,
}

impl ProjectionMatrices {
    /// Size of the block in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Matrices for a camera two units in front of the origin, looking at it,
    /// with the model turned `angle` radians around the view axis.
    ///
    /// Clip-space Y is left unflipped so geometry keeps the screen-space
    /// winding the pipeline culls against.
    pub fn new(extent: vk::Extent2D, angle: f32) -> Self {
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        Self {
            projection: Mat4::perspective_rh(45.0_f32.to_radians(), aspect, 0.1, 100.0),
            view: Mat4::look_at_rh(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO, Vec3::Y),
            model: Mat4::from_rotation_z(angle),
        }
    }
}

/// Uniform buffers and descriptor sets, one per swapchain image.
///
/// Sets are released with the pool.
pub struct UniformSet {
    sets: Vec<vk::DescriptorSet>,
    pool: DescriptorPool,
    buffers: Vec<Buffer>,
    layout: DescriptorSetLayout,
}

impl UniformSet {
    /// Creates `image_count` buffers and sets and points each set at its buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if `image_count` is zero or any object fails to
    /// create; the ones created before it are destroyed.
    pub fn new(device: Arc<Device>, image_count: usize) -> RhiResult<Self> {
        if image_count == 0 {
            return Err(RhiError::InvalidArgument(
                "Uniform set needs at least one swapchain image".to_string(),
            ));
        }

        let layout = DescriptorSetLayout::new(
            device.clone(),
            &[uniform_buffer_binding(
                UNIFORM_BINDING,
                vk::ShaderStageFlags::VERTEX,
            )],
        )?;
        let buffers = (0..image_count)
            .map(|_| {
                Buffer::new(
                    device.clone(),
                    BufferUsage::Uniform,
                    ProjectionMatrices::SIZE as vk::DeviceSize,
                )
            })
            .collect::<RhiResult<Vec<_>>>()?;
        let pool = DescriptorPool::for_uniform_buffers(device.clone(), image_count as u32)?;

        let sets = pool.allocate(&vec![layout.handle(); image_count])?;
        let handles: Vec<vk::Buffer> = buffers.iter().map(Buffer::handle).collect();
        write_uniform_buffers(
            &device,
            &sets,
            &handles,
            UNIFORM_BINDING,
            ProjectionMatrices::SIZE as vk::DeviceSize,
        )?;

        debug!("Created {} uniform buffer(s)", image_count);

        Ok(Self {
            sets,
            pool,
            buffers,
            layout,
        })
    }

    /// Writes `matrices` into the buffer of swapchain image `image_index`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] for an unknown image index.
    pub fn update(&self, image_index: u32, matrices: &ProjectionMatrices) -> RhiResult<()> {
        let buffer = self.buffers.get(image_index as usize).ok_or_else(|| {
            RhiError::InvalidArgument(format!(
                "No uniform buffer for swapchain image {}",
                image_index
            ))
        })?;
        buffer.write_data(0, bytemuck::bytes_of(matrices))
    }

    /// Layout to build the pipeline layout with.
    #[inline]
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.handle()
    }

    /// Descriptor sets, index-aligned with the swapchain images.
    #[inline]
    pub fn sets(&self) -> &[vk::DescriptorSet] {
        &self.sets
    }

    /// Uniform buffer handles, index-aligned with the swapchain images.
    pub fn buffers(&self) -> Vec<vk::Buffer> {
        self.buffers.iter().map(Buffer::handle).collect()
    }

    #[inline]
    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkframe_rhi::mock::{Call, HandleKind, MockDevice};

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    #[test]
    fn test_projection_matrices_layout() {
        assert_eq!(ProjectionMatrices::SIZE, 192);
        assert_eq!(std::mem::align_of::<ProjectionMatrices>(), 16);
        let matrices = ProjectionMatrices::new(EXTENT, 0.0);
        assert_eq!(bytemuck::bytes_of(&matrices).len(), 192);
    }

    #[test]
    fn test_projection_matrices_center_the_origin() {
        let matrices = ProjectionMatrices::new(EXTENT, 0.0);
        assert_eq!(matrices.model, Mat4::IDENTITY);

        let clip = matrices.projection * matrices.view * matrices.model * Vec3::ZERO.extend(1.0);
        assert!(clip.x.abs() < 1e-6);
        assert!(clip.y.abs() < 1e-6);
        let depth = clip.z / clip.w;
        assert!((0.0..=1.0).contains(&depth));
    }

    #[test]
    fn test_model_turns_around_the_view_axis() {
        let matrices = ProjectionMatrices::new(EXTENT, std::f32::consts::FRAC_PI_2);
        let turned = matrices.model.transform_point3(Vec3::X);
        assert!((turned - Vec3::Y).length() < 1e-6);
    }

    #[test]
    fn test_one_buffer_and_set_per_image() {
        let mock = MockDevice::new();
        let uniforms = UniformSet::new(mock.device(), 3).unwrap();

        assert_eq!(uniforms.sets().len(), 3);
        assert_eq!(uniforms.buffers().len(), 3);
        assert_eq!(uniforms.pool().max_sets(), 3);
        assert_eq!(mock.live_count(HandleKind::DescriptorSetLayout), 1);
        assert_eq!(mock.live_count(HandleKind::DescriptorSet), 3);

        let calls = mock.calls();
        let writes = calls
            .iter()
            .find_map(|c| match c {
                Call::UpdateDescriptorSets { writes } => Some(writes.clone()),
                _ => None,
            })
            .unwrap();
        let pairs: Vec<_> = writes.iter().map(|w| (w.set, w.buffer, w.range)).collect();
        let expected: Vec<_> = uniforms
            .sets()
            .iter()
            .zip(uniforms.buffers())
            .map(|(&set, buffer)| (set, buffer, 192))
            .collect();
        assert_eq!(pairs, expected);

        drop(uniforms);
        assert!(mock.live_handles().is_empty());
        assert!(mock.invalid_destroys().is_empty());
    }

    #[test]
    fn test_update_writes_the_image_buffer() {
        let mock = MockDevice::new();
        let uniforms = UniformSet::new(mock.device(), 3).unwrap();
        let target = uniforms.buffers()[2];
        let memory = mock
            .calls()
            .iter()
            .find_map(|c| match c {
                Call::AllocateMemory { buffer, memory, .. } if *buffer == target => Some(*memory),
                _ => None,
            })
            .unwrap();
        mock.clear_calls();

        uniforms
            .update(2, &ProjectionMatrices::new(EXTENT, 1.0))
            .unwrap();

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(&calls[0], Call::WriteMemory { memory: m, offset: 0, len: 192 }
            if *m == memory));
        assert!(matches!(
            uniforms.update(3, &ProjectionMatrices::new(EXTENT, 1.0)),
            Err(RhiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_failed_pool_releases_buffers_and_layout() {
        let mock = MockDevice::new();
        mock.fail_on(HandleKind::DescriptorPool, vk::Result::ERROR_OUT_OF_HOST_MEMORY);

        let result = UniformSet::new(mock.device(), 3);

        assert!(matches!(
            result,
            Err(RhiError::CreationFailed {
                what: "descriptor pool",
                ..
            })
        ));
        assert_eq!(mock.created_count(HandleKind::Buffer), 3);
        assert!(mock.live_handles().is_empty());
    }
}
