//! Per-frame synchronization state machine.
//!
//! The scheduler owns a fixed ring of [`MAX_FRAMES_IN_FLIGHT`] slots. Each slot
//! holds one image-acquired semaphore, one render-finished semaphore and one
//! in-flight fence. Slots are indexed by the frame counter modulo the ring
//! size, never by the swapchain image index.
//!
//! # Frame Flow
//!
//! ```text
//! Idle ─wait+reset─► Acquiring ─acquire─► Submitted ─submit─► PresentPending ─present─► Idle
//! ```
//!
//! [`FrameScheduler::draw_frame_with`] runs a per-image update between
//! acquisition and submission, while the slot is `Submitted`.
//!
//! The fence wait is what bounds the host to at most N frames ahead of the
//! GPU: a slot's semaphores are reused only after the work that last signaled
//! them has retired.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, trace};

use vkframe_rhi::command::CommandBuffer;
use vkframe_rhi::device::Device;
use vkframe_rhi::swapchain::Swapchain;
use vkframe_rhi::sync::{FrameSync, MAX_FRAMES_IN_FLIGHT};
use vkframe_rhi::{FrameStage, RhiError, RhiResult};

/// Returns the slot used by the frame with the given counter value.
#[inline]
pub fn slot_for_frame(frame_counter: u64) -> usize {
    (frame_counter % MAX_FRAMES_IN_FLIGHT as u64) as usize
}

/// Where a slot is in the frame sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    /// No host-side work pending on the slot.
    #[default]
    Idle,
    /// Fence waited and reset; image acquisition in progress.
    Acquiring,
    /// Image acquired; the command buffer is being submitted.
    Submitted,
    /// Work submitted; waiting to hand the image to the presentation engine.
    PresentPending,
}

/// Outcome of one scheduled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Slot whose synchronization objects were used.
    pub slot: usize,
    /// Swapchain image rendered and presented.
    pub image_index: u32,
    /// Zero-based number of this frame since the scheduler was created.
    pub frame_number: u64,
}

struct FrameSlot {
    sync: FrameSync,
    state: SlotState,
}

/// Drives acquire, submit and present for every frame.
pub struct FrameScheduler {
    slots: [FrameSlot; MAX_FRAMES_IN_FLIGHT],
    current_slot: usize,
    frames_rendered: u64,
}

impl FrameScheduler {
    /// Creates the slot ring. Every fence starts signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if any synchronization object fails to create; the
    /// objects created before it are destroyed.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let mut slots = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for i in 0..MAX_FRAMES_IN_FLIGHT {
            slots.push(FrameSlot {
                sync: FrameSync::new(device.clone())?,
                state: SlotState::Idle,
            });
            debug!("Created frame slot {}", i);
        }
        let slots: [FrameSlot; MAX_FRAMES_IN_FLIGHT] = slots
            .try_into()
            .map_err(|_| RhiError::InvalidArgument("frame slot count mismatch".to_string()))?;

        info!(
            "Frame scheduler created with {} frames in flight",
            MAX_FRAMES_IN_FLIGHT
        );

        Ok(Self {
            slots,
            current_slot: 0,
            frames_rendered: 0,
        })
    }

    /// Renders and presents one frame.
    ///
    /// `command_buffers` must be index-aligned with the swapchain images; the
    /// buffer at the acquired image index is submitted unchanged.
    ///
    /// # Errors
    ///
    /// Every failure is fatal: the slot is left in the state where it failed
    /// and the counter does not advance. Returns
    /// [`RhiError::FrameFailed`] for a fence wait, acquire, submit or present
    /// failure, and [`RhiError::InvalidArgument`] if the acquired index has no
    /// command buffer.
    pub fn draw_frame(
        &mut self,
        device: &Device,
        swapchain: &Swapchain,
        command_buffers: &[CommandBuffer],
    ) -> RhiResult<FrameInfo> {
        self.draw_frame_with(device, swapchain, command_buffers, |_| Ok(()))
    }

    /// Like [`Self::draw_frame`], calling `before_submit` with the acquired
    /// image index once the image is acquired and before its command buffer
    /// is submitted.
    ///
    /// # Errors
    ///
    /// An error from `before_submit` is fatal like any other frame failure;
    /// nothing is submitted.
    pub fn draw_frame_with<F>(
        &mut self,
        device: &Device,
        swapchain: &Swapchain,
        command_buffers: &[CommandBuffer],
        mut before_submit: F,
    ) -> RhiResult<FrameInfo>
    where
        F: FnMut(u32) -> RhiResult<()>,
    {
        let slot_index = self.current_slot;
        let slot = &mut self.slots[slot_index];

        let fence = slot.sync.in_flight_fence();
        fence.wait(u64::MAX)?;
        fence.reset()?;
        slot.state = SlotState::Acquiring;

        let image_index = swapchain.acquire_next_image(slot.sync.image_available().handle())?;
        slot.state = SlotState::Submitted;

        let command_buffer = command_buffers.get(image_index as usize).ok_or_else(|| {
            RhiError::InvalidArgument(format!(
                "No command buffer for swapchain image {}",
                image_index
            ))
        })?;
        before_submit(image_index)?;

        let wait_semaphores = [slot.sync.image_available().handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit_buffers = [command_buffer.handle()];
        let signal_semaphores = [slot.sync.render_finished().handle()];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&submit_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the buffer was fully recorded with SIMULTANEOUS_USE and the
        // slot fence was reset above after its previous submission retired.
        unsafe {
            device
                .submit_graphics(&[submit_info], slot.sync.in_flight_fence().handle())
                .map_err(RhiError::frame(FrameStage::Submit))?;
        }
        slot.state = SlotState::PresentPending;

        swapchain.present(
            device.present_queue(),
            image_index,
            slot.sync.render_finished().handle(),
        )?;
        slot.state = SlotState::Idle;

        let info = FrameInfo {
            slot: slot_index,
            image_index,
            frame_number: self.frames_rendered,
        };
        trace!(
            "Frame {} presented image {} from slot {}",
            info.frame_number,
            image_index,
            slot_index
        );

        self.frames_rendered += 1;
        self.current_slot = (self.current_slot + 1) % MAX_FRAMES_IN_FLIGHT;

        Ok(info)
    }

    /// Slot the next frame will use.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// Number of frames presented so far.
    #[inline]
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// State of slot `index`, or `None` if out of range.
    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(|slot| slot.state)
    }

    /// Synchronization objects of slot `index`, or `None` if out of range.
    pub fn slot_sync(&self, index: usize) -> Option<&FrameSync> {
        self.slots.get(index).map(|slot| &slot.sync)
    }
}
