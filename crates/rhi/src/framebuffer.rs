//! Render target set: one framebuffer per swapchain image view.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Framebuffers for every swapchain image, index-aligned with the views they
/// were built from.
///
/// Destroyed in reverse creation order when dropped. The set must be dropped
/// before the render pass and the image views it references.
pub struct Framebuffers {
    device: Arc<Device>,
    framebuffers: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
}

impl Framebuffers {
    /// Creates one single-attachment framebuffer per view in `image_views`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::CreationFailed`] if any framebuffer fails; the ones
    /// created before it are destroyed.
    pub fn new(
        device: Arc<Device>,
        render_pass: vk::RenderPass,
        image_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let mut this = Self {
            device,
            framebuffers: Vec::with_capacity(image_views.len()),
            extent,
        };

        for &view in image_views {
            let attachments = [view];
            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer = unsafe {
                this.device
                    .api()
                    .create_framebuffer(&create_info)
                    .map_err(RhiError::creation("framebuffer"))?
            };
            this.framebuffers.push(framebuffer);
        }

        debug!(
            "Created {} framebuffer(s) at {}x{}",
            this.framebuffers.len(),
            extent.width,
            extent.height
        );

        Ok(this)
    }

    /// Returns the framebuffer handles, one per swapchain image.
    #[inline]
    pub fn handles(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    /// Returns the extent every framebuffer was created with.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        for &framebuffer in self.framebuffers.iter().rev() {
            unsafe {
                self.device.api().destroy_framebuffer(framebuffer);
            }
        }
        debug!("Destroyed {} framebuffer(s)", self.framebuffers.len());
    }
}
