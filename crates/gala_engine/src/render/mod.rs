//! Rendering system
//!
//! The three pieces that need care live at the top level and are generic over
//! their GPU backend:
//! - [`lifetime`]: recording-slot rings and deferred resource destruction
//! - [`frame`]: N-buffered acquire/record/submit/present pacing
//! - [`sync`]: the completion-token seam both of them wait on
//!
//! [`vulkan`] supplies the concrete backends, [`mesh`] and [`renderer`] the
//! orbit-specific drawing on top.

pub mod sync;
pub mod lifetime;
pub mod frame;
pub mod mesh;
pub mod renderer;
pub mod vulkan;

#[cfg(test)]
pub(crate) mod testing;

pub use sync::{CompletionToken, WAIT_FOREVER};
pub use lifetime::{ResourceId, ResourceLifetimeArena, SubmitQueue};
pub use frame::{FramePacingCoordinator, FrameSlot, FrameState, PresentationBackend};
pub use renderer::OrbitRenderer;
pub use vulkan::{VulkanError, VulkanResult};
