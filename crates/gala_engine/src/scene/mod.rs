//! Scene management
//!
//! The scene is a fixed-depth orbital hierarchy stored as a flat array with
//! parent indices. [`flatten::SceneFlattener`] turns it into world-space
//! instances every frame; [`camera::Camera`] supplies the view.

pub mod orbit;
pub mod camera;
pub mod flatten;

use thiserror::Error;

pub use orbit::{OrbitNode, OrbitTree, ROOT};
pub use camera::{Camera, CameraInput};
pub use flatten::{FlattenedScene, InstanceData, SceneFlattener, LOD_TIERS};

/// Scene construction errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    /// A tree needs at least a root node
    #[error("Orbit tree has no nodes")]
    EmptyTree,

    /// Scale must be strictly positive
    #[error("Node {node} has non-positive scale {scale}")]
    NonPositiveScale {
        /// Offending node
        node: usize,
        /// Its scale
        scale: f32,
    },

    /// Parent index out of range or pointing at the node itself
    #[error("Node {node} has invalid parent {parent}")]
    InvalidParent {
        /// Offending node
        node: usize,
        /// Its parent index
        parent: usize,
    },

    /// A rotation with non-zero speed has a zero-length axis
    #[error("Node {node} rotates about a zero-length axis")]
    DegenerateAxis {
        /// Offending node
        node: usize,
    },
}
