//! # Gala Engine
//!
//! A double-buffered Vulkan renderer for animated orbital hierarchies.
//!
//! ## Features
//!
//! - **Resource lifetime arenas**: recording-slot rings with deferred GPU resource destruction
//! - **Frame pacing**: N frames in flight with strict acquire/render/present ordering
//! - **Scene flattening**: bounded-pass hierarchy resolution, frustum culling and LOD bucketing
//! - **Backend seams**: the core is generic over its queue and presentation backends,
//!   so it runs against mocks without a GPU
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gala_engine::prelude::*;
//! use rand::SeedableRng;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GalaConfig::default();
//!     let mut rng = rand::rngs::StdRng::seed_from_u64(config.scene.seed);
//!     let mut tree = OrbitTree::generate(config.scene.body_count, config.scene.height, 13, &mut rng)?;
//!     let camera = Camera::from_settings(&config.camera, 16.0 / 9.0);
//!
//!     let mut flattener = SceneFlattener::from_settings(&config.scene);
//!     let scene = flattener.flatten(&mut tree, &camera, 0.0, 0.0);
//!     println!("{} bodies visible, per tier {:?}", scene.visible().len(), scene.tier_counts());
//!     Ok(())
//! }
//! ```

pub mod foundation;
pub mod config;
pub mod render;
pub mod scene;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, GalaConfig},
        foundation::{
            math::{Mat4, Quat, Vec3},
            time::FrameTimer,
        },
        render::{
            CompletionToken, FramePacingCoordinator, OrbitRenderer, PresentationBackend,
            ResourceLifetimeArena, SubmitQueue, VulkanError, VulkanResult,
        },
        scene::{Camera, CameraInput, FlattenedScene, OrbitNode, OrbitTree, SceneError, SceneFlattener},
    };
}
