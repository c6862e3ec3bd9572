//! RHI-specific error types.
//!
//! Every failure in the frame-rendering core is fatal: errors are surfaced to
//! the caller, which logs them and shuts down.

use std::fmt;
use std::path::PathBuf;

use ash::vk;
use thiserror::Error;

/// Stage of the per-frame protocol that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameStage {
    /// Waiting on or resetting the slot fence.
    Wait,
    /// Acquiring the next presentable image.
    Acquire,
    /// Submitting the recorded command buffer.
    Submit,
    /// Presenting the rendered image.
    Present,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Wait => "fence wait",
            Self::Acquire => "image acquisition",
            Self::Submit => "queue submission",
            Self::Present => "presentation",
        };
        f.write_str(name)
    }
}

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No adapter satisfied the queue, extension and surface requirements
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Required extensions are not available
    #[error("Required {scope} extensions not supported: {}", missing.join(", "))]
    MissingExtensions {
        /// Either `"instance"` or `"device"`.
        scope: &'static str,
        /// Names of the unsupported extensions.
        missing: Vec<String>,
    },

    /// A create or allocate call returned a non-success result
    #[error("Failed to create {what}: {result}")]
    CreationFailed {
        /// Name of the object that could not be created.
        what: &'static str,
        /// Result returned by the driver.
        result: vk::Result,
    },

    /// A per-frame operation returned a non-success result
    #[error("Frame {stage} failed: {result}")]
    FrameFailed {
        /// Stage of the frame that failed.
        stage: FrameStage,
        /// Result returned by the driver.
        result: vk::Result,
    },

    /// A file could not be read
    #[error("Failed to open file: {}: {source}", path.display())]
    FileRead {
        /// Path that was requested.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Shader bytecode error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// An argument was rejected before reaching the driver
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl RhiError {
    /// Returns a mapper that tags a raw `vk::Result` with the object being created.
    ///
    /// ```
    /// use vkframe_rhi::{vk, RhiError};
    ///
    /// let err = Err::<(), _>(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
    ///     .map_err(RhiError::creation("render pass"))
    ///     .unwrap_err();
    /// assert!(err.to_string().starts_with("Failed to create render pass"));
    /// ```
    pub fn creation(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::CreationFailed { what, result }
    }

    /// Returns a mapper that tags a raw `vk::Result` with the failing frame stage.
    pub fn frame(stage: FrameStage) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::FrameFailed { stage, result }
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_extensions_lists_every_name() {
        let err = RhiError::MissingExtensions {
            scope: "device",
            missing: vec!["VK_KHR_swapchain".into(), "VK_KHR_maintenance1".into()],
        };
        assert_eq!(
            err.to_string(),
            "Required device extensions not supported: VK_KHR_swapchain, VK_KHR_maintenance1"
        );
    }

    #[test]
    fn test_frame_failure_names_stage() {
        let err = RhiError::frame(FrameStage::Acquire)(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(err.to_string().starts_with("Frame image acquisition failed"));
    }

    #[test]
    fn test_file_read_mentions_path() {
        let err = RhiError::FileRead {
            path: PathBuf::from("shaders/missing.spv"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().contains("shaders/missing.spv"));
    }
}
