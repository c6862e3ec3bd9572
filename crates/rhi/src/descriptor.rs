//! Descriptor layouts, pools and sets for uniform buffers.
//!
//! - [`DescriptorSetLayout`] describes the bindings a pipeline layout exposes
//! - [`DescriptorPool`] owns every set allocated from it; sets are released
//!   when the pool is destroyed, never individually
//! - [`write_uniform_buffers`] points set `i` at buffer `i`

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Layout binding for one uniform buffer.
#[inline]
pub fn uniform_buffer_binding(
    binding: u32,
    stages: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(stages)
}

/// Descriptor set layout wrapper.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Creates a layout from `bindings`.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .api()
                .create_descriptor_set_layout(&create_info)
                .map_err(RhiError::creation("descriptor set layout"))?
        };

        debug!("Created descriptor set layout with {} binding(s)", bindings.len());

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.api().destroy_descriptor_set_layout(self.layout);
        }
        debug!("Descriptor set layout destroyed");
    }
}

/// Descriptor pool sized for a fixed number of sets.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    /// Creates a pool holding up to `max_sets` sets drawn from `pool_sizes`.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_sets` is zero or pool creation fails.
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        if max_sets == 0 {
            return Err(RhiError::InvalidArgument(
                "Descriptor pool needs room for at least one set".to_string(),
            ));
        }

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe {
            device
                .api()
                .create_descriptor_pool(&create_info)
                .map_err(RhiError::creation("descriptor pool"))?
        };

        debug!("Created descriptor pool for {} set(s)", max_sets);

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Pool sized for `count` sets with one uniform buffer each.
    pub fn for_uniform_buffers(device: Arc<Device>, count: u32) -> RhiResult<Self> {
        let size = vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(count);
        Self::new(device, count, &[size])
    }

    /// Allocates one set per entry of `layouts`.
    ///
    /// # Errors
    ///
    /// Returns an error if more sets are requested than the pool holds, or
    /// the driver rejects the allocation.
    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        if layouts.len() > self.max_sets as usize {
            return Err(RhiError::InvalidArgument(format!(
                "{} descriptor sets requested from a pool of {}",
                layouts.len(),
                self.max_sets
            )));
        }

        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = unsafe {
            self.device
                .api()
                .allocate_descriptor_sets(&allocate_info)
                .map_err(RhiError::creation("descriptor sets"))?
        };

        debug!("Allocated {} descriptor set(s)", sets.len());

        Ok(sets)
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        // Frees every set allocated from the pool
        unsafe {
            self.device.api().destroy_descriptor_pool(self.pool);
        }
        debug!("Descriptor pool destroyed");
    }
}

/// Binds `buffers[i]` to `binding` of `sets[i]` over `range` bytes.
///
/// # Errors
///
/// Returns [`RhiError::InvalidArgument`] if the two slices differ in length.
pub fn write_uniform_buffers(
    device: &Device,
    sets: &[vk::DescriptorSet],
    buffers: &[vk::Buffer],
    binding: u32,
    range: vk::DeviceSize,
) -> RhiResult<()> {
    if sets.len() != buffers.len() {
        return Err(RhiError::InvalidArgument(format!(
            "{} descriptor sets for {} uniform buffers",
            sets.len(),
            buffers.len()
        )));
    }

    let infos: Vec<[vk::DescriptorBufferInfo; 1]> = buffers
        .iter()
        .map(|&buffer| {
            [vk::DescriptorBufferInfo::default()
                .buffer(buffer)
                .offset(0)
                .range(range)]
        })
        .collect();
    let writes: Vec<vk::WriteDescriptorSet<'_>> = sets
        .iter()
        .zip(&infos)
        .map(|(&set, info)| {
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(binding)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(info)
        })
        .collect();

    if !writes.is_empty() {
        unsafe { device.api().update_descriptor_sets(&writes) };
    }
    debug!("Wrote {} uniform buffer descriptor(s)", writes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, DescriptorWrite, HandleKind, MockDevice};
    use ash::vk::Handle;

    #[test]
    fn test_uniform_buffer_binding() {
        let binding = uniform_buffer_binding(0, vk::ShaderStageFlags::VERTEX);
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(binding.descriptor_count, 1);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_pool_owns_its_sets() {
        let mock = MockDevice::new();
        let device = mock.device();
        let layout = DescriptorSetLayout::new(
            device.clone(),
            &[uniform_buffer_binding(0, vk::ShaderStageFlags::VERTEX)],
        )
        .unwrap();
        let pool = DescriptorPool::for_uniform_buffers(device, 3).unwrap();

        let sets = pool.allocate(&[layout.handle(); 3]).unwrap();
        assert_eq!(sets.len(), 3);
        assert_eq!(mock.live_count(HandleKind::DescriptorSet), 3);

        drop(pool);
        drop(layout);
        assert_eq!(mock.live_count(HandleKind::DescriptorSet), 0);
        assert_eq!(mock.live_count(HandleKind::DescriptorPool), 0);
        assert_eq!(mock.live_count(HandleKind::DescriptorSetLayout), 0);
        assert!(mock.invalid_destroys().is_empty());
    }

    #[test]
    fn test_over_allocation_is_rejected() {
        let mock = MockDevice::new();
        let pool = DescriptorPool::for_uniform_buffers(mock.device(), 2).unwrap();
        let layouts = [vk::DescriptorSetLayout::from_raw(7); 3];
        assert!(matches!(
            pool.allocate(&layouts),
            Err(RhiError::InvalidArgument(_))
        ));
        assert!(matches!(
            DescriptorPool::for_uniform_buffers(mock.device(), 0),
            Err(RhiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_write_uniform_buffers_pairs_sets_with_buffers() {
        let mock = MockDevice::new();
        let device = mock.device();
        let sets: Vec<_> = (1..=2).map(vk::DescriptorSet::from_raw).collect();
        let buffers: Vec<_> = (10..=11).map(vk::Buffer::from_raw).collect();

        write_uniform_buffers(&device, &sets, &buffers, 0, 192).unwrap();

        let calls = mock.calls();
        let writes = calls
            .iter()
            .find_map(|c| match c {
                Call::UpdateDescriptorSets { writes } => Some(writes.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            writes,
            vec![
                DescriptorWrite {
                    set: sets[0],
                    binding: 0,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    buffer: buffers[0],
                    offset: 0,
                    range: 192,
                },
                DescriptorWrite {
                    set: sets[1],
                    binding: 0,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    buffer: buffers[1],
                    offset: 0,
                    range: 192,
                },
            ]
        );
        assert!(write_uniform_buffers(&device, &sets, &buffers[..1], 0, 192).is_err());
    }
}
