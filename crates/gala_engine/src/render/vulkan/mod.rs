//! Vulkan backend
//!
//! RAII wrappers over the ash handles the renderer needs, plus the Vulkan
//! implementations of [`SubmitQueue`](crate::render::SubmitQueue) and
//! [`PresentationBackend`](crate::render::PresentationBackend).

pub mod window;
pub mod context;
pub mod sync;
pub mod commands;
pub mod memory;
pub mod image;
pub mod swapchain;
pub mod pipeline;
pub mod queue;
pub mod presenter;

use ash::vk;
use thiserror::Error;

pub use window::{Window, WindowError};
pub use context::{HwQueue, VulkanContext};
pub use sync::{Fence, Semaphore};
pub use commands::{CommandPool, CommandRecorder};
pub use memory::Buffer;
pub use image::{BoundImage, Sampler};
pub use swapchain::Swapchain;
pub use queue::{OwnedResource, VulkanArena, VulkanSubmitQueue};
pub use presenter::{VulkanCoordinator, VulkanPresenter};

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// A completion token did not signal in time
    #[error("Completion wait exceeded {timeout_ns} ns")]
    WaitTimeout {
        /// The timeout that elapsed
        timeout_ns: u64,
    },

    /// The device was lost while waiting or submitting
    #[error("Device lost")]
    DeviceLost,

    /// The surface changed under the swapchain; recreation is not supported
    #[error("Surface out of date")]
    SurfaceOutOfDate,

    /// Window system failure
    #[error(transparent)]
    Window(#[from] WindowError),
}

impl VulkanError {
    /// Classify the result of a completion wait
    pub fn from_wait(result: vk::Result, timeout_ns: u64) -> Self {
        match result {
            vk::Result::TIMEOUT => Self::WaitTimeout { timeout_ns },
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::Api(other),
        }
    }

    /// Classify the result of a swapchain acquire or present
    pub fn from_surface(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::ERROR_SURFACE_LOST_KHR => Self::SurfaceOutOfDate,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::Api(other),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_results_are_classified() {
        assert!(matches!(
            VulkanError::from_wait(vk::Result::TIMEOUT, 5),
            VulkanError::WaitTimeout { timeout_ns: 5 }
        ));
        assert!(matches!(
            VulkanError::from_wait(vk::Result::ERROR_DEVICE_LOST, 5),
            VulkanError::DeviceLost
        ));
        assert!(matches!(
            VulkanError::from_wait(vk::Result::ERROR_OUT_OF_HOST_MEMORY, 5),
            VulkanError::Api(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
        ));
    }

    #[test]
    fn test_out_of_date_is_fatal_surface_error() {
        assert!(matches!(
            VulkanError::from_surface(vk::Result::ERROR_OUT_OF_DATE_KHR),
            VulkanError::SurfaceOutOfDate
        ));
    }
}
