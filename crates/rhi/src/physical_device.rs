//! Physical device (GPU) selection.
//!
//! # Overview
//!
//! Adapters are examined in enumeration order and the first one that
//! satisfies every requirement wins; there is no scoring. An adapter is
//! accepted only when:
//! 1. A graphics-capable and a presentation-capable queue family exist
//! 2. Every required device extension is supported
//! 3. The surface exposes at least one format and one present mode
//!
//! Adapter queries go through the [`AdapterQuery`] trait so that selection
//! can run against a real instance or against fabricated adapters.

use std::collections::BTreeSet;

use ash::vk;
use tracing::{debug, info, warn};

use crate::capabilities::{list_device_extensions, required_extensions_supported};
use crate::error::{RhiError, RhiResult};
use crate::swapchain::SwapchainSupportDetails;

/// Queue family indices for the two roles the renderer needs.
///
/// Both indices may point at the same family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Index of the queue family that supports graphics operations.
    pub graphics_family: Option<u32>,
    /// Index of the queue family that supports presentation to a surface.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Checks if both roles are assigned.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Returns the unique queue family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        for family in [self.graphics_family, self.present_family].into_iter().flatten() {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }

    /// Returns `(graphics, present)`, or an error when either role is unassigned.
    pub fn require(&self) -> RhiResult<(u32, u32)> {
        match (self.graphics_family, self.present_family) {
            (Some(graphics), Some(present)) => Ok((graphics, present)),
            _ => Err(RhiError::NoSuitableGpu),
        }
    }
}

/// Scans queue families in index order and assigns the graphics and present roles.
///
/// A qualifying family overwrites the role it qualifies for, so a later
/// family that satisfies both roles takes both. The scan stops as soon as
/// both roles are assigned. A family whose presentation query fails does not
/// qualify for presentation.
pub fn find_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> QueueFamilyIndices
where
    F: FnMut(u32) -> RhiResult<bool>,
{
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        if family.queue_count == 0 {
            continue;
        }

        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics_family = Some(index);
        }

        match supports_present(index) {
            Ok(true) => indices.present_family = Some(index),
            Ok(false) => {}
            Err(e) => debug!("Presentation query failed for family {}: {}", index, e),
        }

        if indices.is_complete() {
            break;
        }
    }

    indices
}

/// Read-only adapter queries needed by device selection.
pub trait AdapterQuery {
    /// Lists adapters in driver enumeration order.
    fn enumerate_adapters(&self) -> RhiResult<Vec<vk::PhysicalDevice>>;
    /// Human-readable adapter name.
    fn adapter_name(&self, adapter: vk::PhysicalDevice) -> String;
    /// Queue family properties in index order.
    fn queue_families(&self, adapter: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties>;
    /// Whether `family_index` can present to the target surface.
    fn presentation_supported(&self, adapter: vk::PhysicalDevice, family_index: u32)
        -> RhiResult<bool>;
    /// Device extensions supported by the adapter.
    fn device_extensions(&self, adapter: vk::PhysicalDevice) -> RhiResult<BTreeSet<String>>;
    /// Surface capabilities, formats and present modes for the target surface.
    fn surface_support(&self, adapter: vk::PhysicalDevice) -> RhiResult<SwapchainSupportDetails>;
}

/// [`AdapterQuery`] over a live instance and presentation surface.
pub struct SurfaceAdapterQuery<'a> {
    instance: &'a ash::Instance,
    surface_loader: &'a ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
}

impl<'a> SurfaceAdapterQuery<'a> {
    /// Creates a query bound to `surface`.
    pub fn new(
        instance: &'a ash::Instance,
        surface_loader: &'a ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Self {
        Self {
            instance,
            surface_loader,
            surface,
        }
    }
}

impl AdapterQuery for SurfaceAdapterQuery<'_> {
    fn enumerate_adapters(&self) -> RhiResult<Vec<vk::PhysicalDevice>> {
        Ok(unsafe { self.instance.enumerate_physical_devices()? })
    }

    fn adapter_name(&self, adapter: vk::PhysicalDevice) -> String {
        let properties = unsafe { self.instance.get_physical_device_properties(adapter) };
        properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| String::from("Unknown"))
    }

    fn queue_families(&self, adapter: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
        unsafe {
            self.instance
                .get_physical_device_queue_family_properties(adapter)
        }
    }

    fn presentation_supported(
        &self,
        adapter: vk::PhysicalDevice,
        family_index: u32,
    ) -> RhiResult<bool> {
        Ok(unsafe {
            self.surface_loader.get_physical_device_surface_support(
                adapter,
                family_index,
                self.surface,
            )?
        })
    }

    fn device_extensions(&self, adapter: vk::PhysicalDevice) -> RhiResult<BTreeSet<String>> {
        list_device_extensions(self.instance, adapter)
    }

    fn surface_support(&self, adapter: vk::PhysicalDevice) -> RhiResult<SwapchainSupportDetails> {
        SwapchainSupportDetails::query(adapter, self.surface, self.surface_loader)
    }
}

/// The accepted adapter and everything queried while accepting it.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceInfo {
    /// Physical device handle.
    pub device: vk::PhysicalDevice,
    /// Adapter name reported by the driver.
    pub name: String,
    /// Assigned queue families (always complete).
    pub queue_families: QueueFamilyIndices,
    /// Surface capabilities, formats and present modes.
    pub swapchain_support: SwapchainSupportDetails,
}

impl PhysicalDeviceInfo {
    /// Returns the device name.
    pub fn device_name(&self) -> &str {
        &self.name
    }
}

/// Selects the first adapter that satisfies every requirement.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] when no adapter qualifies.
pub fn select_physical_device<Q, S>(
    query: &Q,
    required_extensions: &[S],
) -> RhiResult<PhysicalDeviceInfo>
where
    Q: AdapterQuery + ?Sized,
    S: AsRef<str>,
{
    let adapters = query.enumerate_adapters()?;
    if adapters.is_empty() {
        warn!("No GPUs with Vulkan support found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} physical device(s)", adapters.len());

    for adapter in adapters {
        if let Some(info) = check_device_suitability(query, adapter, required_extensions) {
            info!(
                "Selected GPU: {} (graphics family {:?}, present family {:?})",
                info.name, info.queue_families.graphics_family, info.queue_families.present_family
            );
            return Ok(info);
        }
    }

    Err(RhiError::NoSuitableGpu)
}

/// Returns the adapter's info when it is suitable, `None` when it is rejected.
///
/// A failing query rejects this adapter only; selection moves on to the next.
fn check_device_suitability<Q, S>(
    query: &Q,
    adapter: vk::PhysicalDevice,
    required_extensions: &[S],
) -> Option<PhysicalDeviceInfo>
where
    Q: AdapterQuery + ?Sized,
    S: AsRef<str>,
{
    let name = query.adapter_name(adapter);

    let families = query.queue_families(adapter);
    let queue_families =
        find_queue_families(&families, |index| query.presentation_supported(adapter, index));
    if !queue_families.is_complete() {
        debug!("{}: rejected, missing graphics or present queue family", name);
        return None;
    }

    let available = match query.device_extensions(adapter) {
        Ok(available) => available,
        Err(e) => {
            debug!("{}: rejected, extension query failed: {}", name, e);
            return None;
        }
    };
    let report = required_extensions_supported(required_extensions, &available);
    if !report.is_supported() {
        debug!("{}: rejected, missing extensions {:?}", name, report.missing);
        return None;
    }

    let swapchain_support = match query.surface_support(adapter) {
        Ok(support) => support,
        Err(e) => {
            debug!("{}: rejected, surface query failed: {}", name, e);
            return None;
        }
    };
    if !swapchain_support.is_adequate() {
        debug!("{}: rejected, surface exposes no formats or present modes", name);
        return None;
    }

    Some(PhysicalDeviceInfo {
        device: adapter,
        name,
        queue_families,
        swapchain_support,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAdapter, MockAdapters};

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    const SWAPCHAIN: &[&str] = &["VK_KHR_swapchain"];

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        assert!(indices.unique_families().is_empty());
        assert!(indices.require().is_err());
    }

    #[test]
    fn test_unique_families_with_duplicates() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert_eq!(indices.unique_families(), vec![0]);
        assert_eq!(indices.require().unwrap(), (0, 0));
    }

    #[test]
    fn test_unique_families_distinct() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(2),
            present_family: Some(1),
        };
        assert_eq!(indices.unique_families(), vec![2, 1]);
    }

    #[test]
    fn test_single_family_takes_both_roles() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let indices = find_queue_families(&families, |_| Ok(true));
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(0));
    }

    #[test]
    fn test_split_families() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let indices = find_queue_families(&families, |i| Ok(i == 1));
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(1));
    }

    #[test]
    fn test_later_family_with_both_roles_overrides() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let indices = find_queue_families(&families, |_| Ok(true));
        assert_eq!(indices.graphics_family, Some(1));
        assert_eq!(indices.present_family, Some(1));
    }

    #[test]
    fn test_scan_stops_once_complete() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let mut probed = Vec::new();
        let indices = find_queue_families(&families, |i| {
            probed.push(i);
            Ok(true)
        });
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(probed, vec![0]);
    }

    #[test]
    fn test_no_graphics_family_is_incomplete() {
        let families = [
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = find_queue_families(&families, |_| Ok(true));
        assert_eq!(indices.graphics_family, None);
        assert!(!indices.is_complete());
    }

    #[test]
    fn test_failed_presentation_query_does_not_qualify() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::COMPUTE)];
        let indices = find_queue_families(&families, |i| {
            if i == 0 {
                Err(RhiError::VulkanError(vk::Result::ERROR_SURFACE_LOST_KHR))
            } else {
                Ok(true)
            }
        });
        assert_eq!(indices.graphics_family, Some(0));
        assert_eq!(indices.present_family, Some(1));
    }

    #[test]
    fn test_adapter_with_failing_presentation_query_is_skipped() {
        let adapters = MockAdapters::new(vec![
            MockAdapter::suitable("flaky")
                .with_presentation_error(vk::Result::ERROR_SURFACE_LOST_KHR),
            MockAdapter::suitable("good"),
        ]);
        let info = select_physical_device(&adapters, SWAPCHAIN).unwrap();
        assert_eq!(info.device_name(), "good");
    }

    #[test]
    fn test_adapter_with_failing_extension_query_is_skipped() {
        let adapters = MockAdapters::new(vec![
            MockAdapter::suitable("flaky")
                .with_extensions_error(vk::Result::ERROR_INITIALIZATION_FAILED),
            MockAdapter::suitable("good"),
        ]);
        let info = select_physical_device(&adapters, SWAPCHAIN).unwrap();
        assert_eq!(info.device_name(), "good");
    }

    #[test]
    fn test_adapter_with_failing_surface_query_is_skipped() {
        let adapters = MockAdapters::new(vec![MockAdapter::suitable("flaky")
            .with_surface_error(vk::Result::ERROR_SURFACE_LOST_KHR)]);
        assert!(matches!(
            select_physical_device(&adapters, SWAPCHAIN),
            Err(RhiError::NoSuitableGpu)
        ));
    }

    #[test]
    fn test_adapter_without_graphics_is_rejected() {
        let adapters = MockAdapters::new(vec![MockAdapter::suitable("compute-only")
            .with_queue_families(vec![family(vk::QueueFlags::COMPUTE)])]);
        let result = select_physical_device(&adapters, SWAPCHAIN);
        assert!(matches!(result, Err(RhiError::NoSuitableGpu)));
    }

    #[test]
    fn test_first_suitable_adapter_wins() {
        let adapters = MockAdapters::new(vec![
            MockAdapter::suitable("no-graphics")
                .with_queue_families(vec![family(vk::QueueFlags::TRANSFER)]),
            MockAdapter::suitable("first"),
            MockAdapter::suitable("second"),
        ]);
        let info = select_physical_device(&adapters, SWAPCHAIN).unwrap();
        assert_eq!(info.device_name(), "first");
        assert!(info.queue_families.is_complete());
    }

    #[test]
    fn test_adapter_missing_extension_is_rejected() {
        let adapters = MockAdapters::new(vec![
            MockAdapter::suitable("no-swapchain").with_extensions(&[]),
            MockAdapter::suitable("ok"),
        ]);
        let info = select_physical_device(&adapters, SWAPCHAIN).unwrap();
        assert_eq!(info.device_name(), "ok");
    }

    #[test]
    fn test_adapter_without_present_modes_is_rejected() {
        let mut bare = MockAdapter::suitable("bare");
        bare.support.present_modes.clear();
        let adapters = MockAdapters::new(vec![bare]);
        assert!(matches!(
            select_physical_device(&adapters, SWAPCHAIN),
            Err(RhiError::NoSuitableGpu)
        ));
    }

    #[test]
    fn test_adapter_without_presentation_is_rejected() {
        let adapters =
            MockAdapters::new(vec![MockAdapter::suitable("headless").with_present_families(&[])]);
        assert!(matches!(
            select_physical_device(&adapters, SWAPCHAIN),
            Err(RhiError::NoSuitableGpu)
        ));
    }

    #[test]
    fn test_no_adapters() {
        let adapters = MockAdapters::new(Vec::new());
        assert!(matches!(
            select_physical_device(&adapters, SWAPCHAIN),
            Err(RhiError::NoSuitableGpu)
        ));
    }
}
