//! Orbital hierarchy
//!
//! Every node orbits its parent: its offset is rotated about its orbit axis
//! at a constant angular speed, and the result is placed relative to the
//! parent. Bodies may additionally spin about their own axis.
//!
//! Node 0 is the root. It anchors the hierarchy and is never drawn.

use std::f32::consts::PI;

use rand::Rng;

use crate::foundation::math::{Quat, Vec3, AXIS_EPSILON};
use crate::scene::SceneError;

/// Index of the root node
pub const ROOT: usize = 0;

/// One body of the hierarchy, relative to its parent
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitNode {
    /// Position relative to the parent at time zero
    pub offset: Vec3,
    /// Axis the offset rotates about
    pub orbit_axis: Vec3,
    /// Orbital angular speed in radians per second
    pub orbit_speed: f32,
    /// Axis of the body's own rotation
    pub spin_axis: Vec3,
    /// Spin angular speed in radians per second
    pub spin_speed: f32,
    /// Uniform scale of the unit-diameter body mesh
    pub scale: f32,
    /// Texture layer
    pub material: u32,
    /// Index of the node this one orbits
    pub parent: usize,
}

impl OrbitNode {
    /// A node sitting still at `offset` from `parent`
    pub fn fixed(parent: usize, offset: Vec3, scale: f32) -> Self {
        Self {
            offset,
            orbit_axis: Vec3::z(),
            orbit_speed: 0.0,
            spin_axis: Vec3::z(),
            spin_speed: 0.0,
            scale,
            material: 0,
            parent,
        }
    }

    /// The hierarchy's anchor
    pub fn root() -> Self {
        Self::fixed(ROOT, Vec3::zeros(), 1.0)
    }
}

/// Flat orbital hierarchy plus the per-frame buffers flattening works in
pub struct OrbitTree {
    pub(crate) nodes: Vec<OrbitNode>,
    pub(crate) height: u32,
    pub(crate) world: Vec<Vec3>,
    pub(crate) chain: Vec<usize>,
    pub(crate) order: Vec<usize>,
    pub(crate) keys: Vec<f32>,
    pub(crate) spin: Vec<Quat>,
}

impl OrbitTree {
    /// Build a tree resolved `height` ancestors deep.
    ///
    /// `nodes[0]` is the root; its parent is forced to itself and its scale
    /// ignored. Every other node must have a positive scale, a parent other
    /// than itself, and a usable axis for each rotation it performs.
    pub fn new(mut nodes: Vec<OrbitNode>, height: u32) -> Result<Self, SceneError> {
        let len = nodes.len();
        let root = nodes.first_mut().ok_or(SceneError::EmptyTree)?;
        root.parent = ROOT;
        root.scale = 1.0;

        for (index, node) in nodes.iter().enumerate().skip(1) {
            if !(node.scale > 0.0) {
                return Err(SceneError::NonPositiveScale { node: index, scale: node.scale });
            }
            if node.parent >= len || node.parent == index {
                return Err(SceneError::InvalidParent { node: index, parent: node.parent });
            }
            let degenerate = |axis: &Vec3, speed: f32| speed != 0.0 && axis.norm() < AXIS_EPSILON;
            if degenerate(&node.orbit_axis, node.orbit_speed) || degenerate(&node.spin_axis, node.spin_speed) {
                return Err(SceneError::DegenerateAxis { node: index });
            }
        }

        Ok(Self {
            nodes,
            height,
            world: vec![Vec3::zeros(); len],
            chain: (0..len).collect(),
            order: Vec::with_capacity(len.saturating_sub(1)),
            keys: vec![0.0; len],
            spin: vec![Quat::identity(); len],
        })
    }

    /// Generate a star system of `body_count` nodes besides the root.
    ///
    /// Node 1 is the central star. Every further body orbits it in a thin
    /// shell between radius 2 and 64, on a near-circular orbit whose speed
    /// falls off with the square of the radius. Materials are drawn from
    /// `1..material_count`; the star uses material 0.
    pub fn generate<R: Rng + ?Sized>(
        body_count: usize,
        height: u32,
        material_count: u32,
        rng: &mut R,
    ) -> Result<Self, SceneError> {
        let mut nodes = Vec::with_capacity(body_count + 1);
        nodes.push(OrbitNode::root());

        if body_count >= 1 {
            nodes.push(OrbitNode {
                spin_speed: 1.0,
                ..OrbitNode::fixed(ROOT, Vec3::zeros(), 1.0)
            });
        }

        for _ in 2..=body_count {
            let (offset, radius) = random_shell(rng, 0.485 * PI, 0.515 * PI, 2.0, 64.0);
            nodes.push(OrbitNode {
                offset,
                orbit_axis: random_direction(rng, 0.0, radius / 1200.0 * PI),
                orbit_speed: rng.gen_range(0.5_f32..0.65) / (radius * radius) * 30.0,
                spin_axis: random_direction(rng, 0.0, 0.25 * PI),
                spin_speed: rng.gen_range(-4.0_f32..4.0),
                scale: rng.gen_range(1.0_f32 / 64.0..1.0 / 8.0) * 1.4,
                material: if material_count > 1 { rng.gen_range(1..material_count) } else { 0 },
                parent: 1,
            });
        }

        log::info!("Generated orbit tree: {body_count} bodies, height {height}");
        Self::new(nodes, height)
    }

    /// All nodes, root first
    pub fn nodes(&self) -> &[OrbitNode] {
        &self.nodes
    }

    /// Number of nodes including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false; a tree has at least its root
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of flatten passes
    pub fn height(&self) -> u32 {
        self.height
    }

    /// World positions computed by the last flatten
    pub fn world_positions(&self) -> &[Vec3] {
        &self.world
    }

    /// Sort keys computed by the last flatten
    pub fn sort_keys(&self) -> &[f32] {
        &self.keys
    }

    /// Current spin orientation of each node
    pub fn spin(&self) -> &[Quat] {
        &self.spin
    }
}

/// Unit vector whose polar angle from +z lies in `[z_min, z_max)`, azimuth uniform
fn random_direction<R: Rng + ?Sized>(rng: &mut R, z_min: f32, z_max: f32) -> Vec3 {
    let azimuth = rng.gen_range(0.0..2.0 * PI);
    let polar = if z_max > z_min { rng.gen_range(z_min..z_max) } else { z_min };
    let sin_polar = polar.sin();
    Vec3::new(sin_polar * azimuth.cos(), sin_polar * azimuth.sin(), polar.cos())
}

/// Point in a spherical shell, biased toward the outer radius
fn random_shell<R: Rng + ?Sized>(rng: &mut R, z_min: f32, z_max: f32, r_min: f32, r_max: f32) -> (Vec3, f32) {
    let bell: f32 = rng.gen_range(0.0..1.0_f32).sqrt();
    let radius = r_min + (r_max - r_min) * bell;
    (random_direction(rng, z_min, z_max) * radius, radius)
}
