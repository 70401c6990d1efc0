//! Completion tokens
//!
//! A completion token is the CPU-visible half of GPU synchronization: it is
//! signaled by the device when submitted work finishes, waited on by the
//! driving thread, and reset before it is attached to the next submission.
//! [`Fence`](crate::render::vulkan::sync::Fence) is the Vulkan implementation.

use crate::render::vulkan::VulkanResult;

/// Timeout that never elapses
pub const WAIT_FOREVER: u64 = u64::MAX;

/// GPU-to-CPU completion signal
///
/// Tokens are created signaled so the first wait on a fresh slot returns
/// immediately.
pub trait CompletionToken {
    /// Block until the token is signaled or `timeout_ns` elapses.
    ///
    /// An elapsed timeout is reported as
    /// [`VulkanError::WaitTimeout`](crate::render::vulkan::VulkanError::WaitTimeout).
    fn wait(&self, timeout_ns: u64) -> VulkanResult<()>;

    /// Return the token to the unsignaled state
    fn reset(&self) -> VulkanResult<()>;

    /// Non-blocking status query
    fn is_signaled(&self) -> VulkanResult<bool>;
}
