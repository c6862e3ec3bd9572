//! Swapchain management.
//!
//! This module handles VkSwapchainKHR creation, image acquisition, and presentation.
//!
//! # Overview
//!
//! Negotiation is split into pure functions so it can be checked without a
//! surface:
//! - [`choose_surface_format`] picks the pixel format and color space
//! - [`choose_present_mode`] prefers MAILBOX and falls back to FIFO
//! - [`choose_extent`] honors the surface extent or clamps the window size
//! - [`determine_image_count`] asks for one image more than the minimum
//!
//! [`SwapchainConfig::negotiate`] combines them, and [`Swapchain::new`]
//! creates the swapchain plus one color view per image. The swapchain is
//! created once; resizing is not handled.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{FrameStage, RhiError, RhiResult};
use crate::physical_device::QueueFamilyIndices;

/// Format used when the surface places no restriction on formats.
pub const DEFAULT_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::R8G8B8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Swapchain surface support details.
///
/// Contains information about what the surface supports for swapchain creation.
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Negotiated swapchain parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainConfig {
    /// Derives every swapchain parameter from the surface support data.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SwapchainError`] when the surface reports no formats.
    pub fn negotiate(
        support: &SwapchainSupportDetails,
        framebuffer_width: u32,
        framebuffer_height: u32,
    ) -> RhiResult<Self> {
        let surface_format = choose_surface_format(&support.formats)
            .ok_or_else(|| RhiError::SwapchainError("surface reports no formats".into()))?;

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes),
            extent: choose_extent(&support.capabilities, framebuffer_width, framebuffer_height),
            image_count: determine_image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
        })
    }
}

/// Vulkan swapchain wrapper.
///
/// Owns the swapchain handle and one view per swapchain image. The images
/// themselves belong to the swapchain and are never destroyed directly.
/// Views are destroyed before the swapchain.
pub struct Swapchain {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Swapchain handle.
    swapchain: vk::SwapchainKHR,
    /// Swapchain images (owned by the swapchain).
    images: Vec<vk::Image>,
    /// One color view per image.
    image_views: Vec<vk::ImageView>,
    /// Negotiated parameters.
    config: SwapchainConfig,
}

impl Swapchain {
    /// Creates a swapchain for `surface` and one view per image.
    ///
    /// When the graphics and present families differ the images are shared
    /// concurrently between both; otherwise access is exclusive.
    ///
    /// # Errors
    ///
    /// Returns an error if swapchain or image view creation fails. Objects
    /// created before the failure are destroyed.
    pub fn new(
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        support: &SwapchainSupportDetails,
        framebuffer_width: u32,
        framebuffer_height: u32,
    ) -> RhiResult<Self> {
        let config = SwapchainConfig::negotiate(support, framebuffer_width, framebuffer_height)?;
        let (graphics_family, present_family) = device.queue_families().require()?;
        let family_indices = [graphics_family, present_family];
        let (sharing_mode, shared_families) =
            image_sharing(device.queue_families(), &family_indices);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(config.image_count)
            .image_format(config.surface_format.format)
            .image_color_space(config.surface_format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(config.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = unsafe {
            device
                .api()
                .create_swapchain(&create_info)
                .map_err(RhiError::creation("swapchain"))?
        };

        let mut this = Self {
            device,
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            config,
        };

        this.images = unsafe {
            this.device
                .api()
                .get_swapchain_images(swapchain)
                .map_err(RhiError::creation("swapchain images"))?
        };
        this.create_image_views()?;

        info!(
            "Swapchain created: {}x{}, {:?}/{:?}, {:?}, {} images",
            config.extent.width,
            config.extent.height,
            config.surface_format.format,
            config.surface_format.color_space,
            config.present_mode,
            this.images.len()
        );

        Ok(this)
    }

    /// Acquires the next presentable image, signaling `semaphore` when it is ready.
    ///
    /// Blocks without timeout. A suboptimal swapchain is logged and used as is.
    ///
    /// # Errors
    ///
    /// Any non-success result is returned as [`RhiError::FrameFailed`].
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RhiResult<u32> {
        let (index, suboptimal) = unsafe {
            self.device
                .api()
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
                .map_err(RhiError::frame(FrameStage::Acquire))?
        };
        if suboptimal {
            warn!("Swapchain is suboptimal for the surface");
        }
        Ok(index)
    }

    /// Presents `image_index` on `queue` after `wait_semaphore` is signaled.
    ///
    /// # Errors
    ///
    /// Any non-success result is returned as [`RhiError::FrameFailed`].
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<()> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = unsafe {
            self.device
                .api()
                .queue_present(queue, &present_info)
                .map_err(RhiError::frame(FrameStage::Present))?
        };
        if suboptimal {
            warn!("Swapchain is suboptimal for the surface");
        }
        Ok(())
    }

    /// Returns the swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Returns the image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.config.surface_format.format
    }

    /// Returns the image extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.config.extent
    }

    /// Returns the number of swapchain images.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Returns all image views, index-aligned with the swapchain images.
    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    fn create_image_views(&mut self) -> RhiResult<()> {
        self.image_views.reserve(self.images.len());

        for &image in &self.images {
            let create_info = color_view_info(image, self.config.surface_format.format);
            let view = unsafe {
                self.device
                    .api()
                    .create_image_view(&create_info)
                    .map_err(RhiError::creation("swapchain image view"))?
            };
            self.image_views.push(view);
        }

        debug!("Created {} image views", self.image_views.len());
        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in self.image_views.iter().rev() {
                self.device.api().destroy_image_view(view);
            }
            self.device.api().destroy_swapchain(self.swapchain);
        }
        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.config.extent.width,
            self.config.extent.height,
            self.images.len()
        );
    }
}

/// Chooses the surface format.
///
/// - A single `UNDEFINED` entry means any format is allowed: returns
///   [`DEFAULT_SURFACE_FORMAT`].
/// - Otherwise the first RGBA8 or BGRA8 UNORM entry in the nonlinear sRGB
///   color space wins.
/// - Otherwise the first entry is returned.
///
/// Returns `None` only for an empty list.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            debug!("Surface accepts any format, using R8G8B8A8_UNORM");
            return Some(DEFAULT_SURFACE_FORMAT);
        }
    }

    let preferred = formats.iter().find(|f| {
        matches!(
            f.format,
            vk::Format::R8G8B8A8_UNORM | vk::Format::B8G8R8A8_UNORM
        ) && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = preferred {
        debug!("Selected surface format {:?}", format.format);
        return Some(format);
    }

    let first = formats.first().copied()?;
    warn!("Using first available surface format: {:?}", first.format);
    Some(first)
}

/// Chooses MAILBOX when listed, FIFO otherwise.
///
/// FIFO support is mandatory, so it is never looked up.
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        debug!("Selected MAILBOX present mode");
        return vk::PresentModeKHR::MAILBOX;
    }

    debug!("Selected FIFO present mode");
    vk::PresentModeKHR::FIFO
}

/// Chooses the swapchain extent (resolution).
///
/// A current extent other than `u32::MAX` is dictated by the platform and
/// returned verbatim. Otherwise the framebuffer size is clamped
/// componentwise into the surface's min/max extents.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    let extent = vk::Extent2D {
        width: min.width.max(max.width.min(width)),
        height: min.height.max(max.height.min(height)),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{}, min: {}x{}, max: {}x{})",
        extent.width, extent.height, width, height, min.width, min.height, max.width, max.height
    );

    extent
}

/// One image more than the minimum, capped by the maximum when it is non-zero.
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

/// Sharing mode and family list for swapchain images.
fn image_sharing<'a>(
    families: &QueueFamilyIndices,
    family_indices: &'a [u32; 2],
) -> (vk::SharingMode, &'a [u32]) {
    if families.graphics_family != families.present_family {
        (vk::SharingMode::CONCURRENT, &family_indices[..])
    } else {
        (vk::SharingMode::EXCLUSIVE, &[])
    }
}

/// 2D color view with identity swizzle over one mip level and one layer.
fn color_view_info(image: vk::Image, format: vk::Format) -> vk::ImageViewCreateInfo<'static> {
    vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        )
}
