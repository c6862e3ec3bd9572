//! Synchronization primitives for Vulkan.
//!
//! This module provides wrappers for Vulkan synchronization objects:
//! - [`Semaphore`] - GPU-to-GPU synchronization (between queue operations)
//! - [`Fence`] - GPU-to-CPU synchronization (for host waiting)
//! - [`FrameSync`] - Per-slot synchronization primitives for frames in flight
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vkframe_rhi::device::Device;
//! use vkframe_rhi::sync::{Fence, Semaphore};
//!
//! # fn example(device: Arc<Device>) -> Result<(), vkframe_rhi::RhiError> {
//! let image_available = Semaphore::new(device.clone())?;
//! let in_flight_fence = Fence::new(device, true)?;
//!
//! // Wait for the fence before reusing the slot
//! in_flight_fence.wait(u64::MAX)?;
//! in_flight_fence.reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{FrameStage, RhiError, RhiResult};

/// Number of frames the CPU may record ahead of the GPU.
///
/// Each frame slot owns its own semaphores and fence, so with three slots the
/// host can queue up to three frames before it blocks on the oldest one.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Vulkan semaphore wrapper.
///
/// Semaphores are used for GPU-to-GPU synchronization between queue operations:
/// - Image available semaphore: signaled when a swapchain image is ready
/// - Render finished semaphore: signaled when rendering is complete
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new semaphore in the unsignaled state.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();

        let semaphore = unsafe {
            device
                .api()
                .create_semaphore(&create_info)
                .map_err(RhiError::creation("semaphore"))?
        };

        debug!("Created semaphore");

        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.api().destroy_semaphore(self.semaphore);
        }
        debug!("Destroyed semaphore");
    }
}

/// Vulkan fence wrapper.
///
/// Fences let the host wait for GPU work: the frame scheduler waits on a
/// slot's fence before reusing it. One-time transfers do not use a fence;
/// they wait for their queue to go idle.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `signaled` - Creates the fence already signaled, so the first wait
    ///   on it returns immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);

        let fence = unsafe {
            device
                .api()
                .create_fence(&create_info)
                .map_err(RhiError::creation("fence"))?
        };

        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self { device, fence })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled or `timeout` nanoseconds elapse.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::FrameFailed`] with [`FrameStage::Wait`] on timeout
    /// or device loss.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        unsafe {
            self.device
                .api()
                .wait_for_fences(&[self.fence], true, timeout)
                .map_err(RhiError::frame(FrameStage::Wait))
        }
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::FrameFailed`] with [`FrameStage::Wait`] if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .api()
                .reset_fences(&[self.fence])
                .map_err(RhiError::frame(FrameStage::Wait))
        }
    }

    /// Returns whether the fence is signaled without blocking.
    ///
    /// A failed status query is reported as unsignaled.
    #[cfg(any(test, feature = "mock"))]
    pub fn is_signaled(&self) -> bool {
        unsafe { self.device.api().get_fence_status(self.fence).unwrap_or(false) }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.api().destroy_fence(self.fence);
        }
        debug!("Destroyed fence");
    }
}

/// Synchronization objects of one frame slot.
///
/// # Usage Pattern
///
/// ```text
/// 1. Wait for in_flight_fence (the slot's previous frame has finished)
/// 2. Reset in_flight_fence
/// 3. Acquire swapchain image (signals image_available)
/// 4. Submit command buffer:
///    - Wait on image_available at COLOR_ATTACHMENT_OUTPUT
///    - Signal render_finished
///    - Signal in_flight_fence on completion
/// 5. Present (waits on render_finished)
/// ```
pub struct FrameSync {
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight_fence: Fence,
}

impl FrameSync {
    /// Creates the slot's two semaphores and its fence.
    ///
    /// The fence starts signaled so the first frame on the slot does not block.
    ///
    /// # Errors
    ///
    /// Returns an error if any object fails to create; the ones already
    /// created are destroyed.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let render_finished = Semaphore::new(device.clone())?;
        let in_flight_fence = Fence::new(device, true)?;

        info!("Created frame synchronization primitives");

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    /// Semaphore signaled when the acquired image is ready to be rendered to.
    #[inline]
    pub fn image_available(&self) -> &Semaphore {
        &self.image_available
    }

    /// Semaphore signaled when the slot's submission finishes rendering.
    #[inline]
    pub fn render_finished(&self) -> &Semaphore {
        &self.render_finished
    }

    /// Fence signaled when the slot's submission completes.
    #[inline]
    pub fn in_flight_fence(&self) -> &Fence {
        &self.in_flight_fence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{HandleKind, MockDevice};

    #[test]
    fn test_max_frames_in_flight_constant() {
        assert_eq!(MAX_FRAMES_IN_FLIGHT, 3);
    }

    #[test]
    fn test_frame_sync_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
        assert_send_sync::<FrameSync>();
    }

    #[test]
    fn test_frame_sync_fence_starts_signaled() {
        let mock = MockDevice::new();
        let sync = FrameSync::new(mock.device()).unwrap();

        assert!(sync.in_flight_fence().is_signaled());
        sync.in_flight_fence().wait(u64::MAX).unwrap();
        sync.in_flight_fence().reset().unwrap();
        assert!(!sync.in_flight_fence().is_signaled());
        assert_ne!(
            sync.image_available().handle(),
            sync.render_finished().handle()
        );
    }

    #[test]
    fn test_frame_sync_partial_failure_releases_semaphores() {
        let mock = MockDevice::new();
        let device = mock.device();
        mock.fail_on(HandleKind::Fence, vk::Result::ERROR_OUT_OF_HOST_MEMORY);

        let result = FrameSync::new(device);

        assert!(matches!(
            result,
            Err(RhiError::CreationFailed { what: "fence", .. })
        ));
        assert_eq!(mock.live_count(HandleKind::Semaphore), 0);
        assert_eq!(mock.destroyed_count(HandleKind::Semaphore), 2);
    }

    #[test]
    fn test_fence_wait_failure_is_a_frame_error() {
        let mock = MockDevice::new();
        let fence = Fence::new(mock.device(), false).unwrap();

        match fence.wait(u64::MAX) {
            Err(RhiError::FrameFailed { stage, result }) => {
                assert_eq!(stage, FrameStage::Wait);
                assert_eq!(result, vk::Result::TIMEOUT);
            }
            other => panic!("unexpected wait outcome: {:?}", other.err()),
        }
    }
}
