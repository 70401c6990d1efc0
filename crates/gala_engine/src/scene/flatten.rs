//! Scene flattening
//!
//! Each frame the orbit tree is resolved to world space, culled against the
//! camera and bucketed into level-of-detail tiers.
//!
//! World positions are accumulated with `height` bounded passes over the flat
//! parent-index array instead of a recursive walk. Every node keeps a cursor
//! into its ancestor chain; each pass adds the rotated offset of the node the
//! cursor points at, then moves the cursor one parent up. Ancestors deeper
//! than `height` are not resolved.
//!
//! Survivors are ordered by `distance² / scale²`, which grows as a body's
//! on-screen size shrinks, and cut into [`LOD_TIERS`] contiguous buckets at
//! fixed breakpoints of that key.

use bytemuck::{Pod, Zeroable};

use crate::config::SceneSettings;
use crate::foundation::math::{self, Mat4, Quaternion, UnitQuaternion, Vec3, Vec4};
use crate::scene::camera::Camera;
use crate::scene::orbit::{OrbitTree, ROOT};

/// Number of level-of-detail tiers
pub const LOD_TIERS: usize = 4;

/// Per-instance vertex data
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    /// Column-major model matrix
    pub model: [[f32; 4]; 4],
    /// Texture layer
    pub material: u32,
    /// Keeps the stride a multiple of 16 bytes
    pub _padding: [u32; 3],
}

impl InstanceData {
    fn new(model: &Mat4, material: u32) -> Self {
        Self {
            model: math::to_cols_array(model),
            material,
            _padding: [0; 3],
        }
    }
}

/// Visible bodies of one frame, nearest tier first
#[derive(Debug, Clone, Default)]
pub struct FlattenedScene {
    visible: Vec<usize>,
    instances: Vec<InstanceData>,
    lod_offsets: [usize; LOD_TIERS + 1],
}

impl FlattenedScene {
    /// Visible node indices in ascending sort-key order
    pub fn visible(&self) -> &[usize] {
        &self.visible
    }

    /// Instance data parallel to [`visible`](Self::visible)
    pub fn instances(&self) -> &[InstanceData] {
        &self.instances
    }

    /// Tier `t` covers `lod_offsets[t]..lod_offsets[t + 1]`
    pub fn lod_offsets(&self) -> &[usize; LOD_TIERS + 1] {
        &self.lod_offsets
    }

    /// Node indices in tier `tier`; empty for tiers past the last
    pub fn bucket(&self, tier: usize) -> &[usize] {
        if tier >= LOD_TIERS {
            return &[];
        }
        &self.visible[self.lod_offsets[tier]..self.lod_offsets[tier + 1]]
    }

    /// Number of visible bodies per tier
    pub fn tier_counts(&self) -> [usize; LOD_TIERS] {
        std::array::from_fn(|t| self.lod_offsets[t + 1] - self.lod_offsets[t])
    }

    fn clear(&mut self) {
        self.visible.clear();
        self.instances.clear();
        self.lod_offsets = [0; LOD_TIERS + 1];
    }
}

/// Resolves an [`OrbitTree`] into culled, LOD-bucketed instances
pub struct SceneFlattener {
    breakpoints: [f32; LOD_TIERS],
    clip_margin: f32,
    spin_tier_limit: usize,
    output: FlattenedScene,
}

impl SceneFlattener {
    /// Flattener with ascending LOD `breakpoints`, culling against the clip
    /// volume expanded to `clip_margin`
    pub fn new(breakpoints: [f32; LOD_TIERS], clip_margin: f32, spin_tier_limit: usize) -> Self {
        Self {
            breakpoints,
            clip_margin,
            spin_tier_limit,
            output: FlattenedScene::default(),
        }
    }

    /// Flattener configured from settings
    pub fn from_settings(settings: &SceneSettings) -> Self {
        Self::new(settings.lod_breakpoints, settings.clip_margin, settings.spin_tier_limit)
    }

    /// Result of the last [`flatten`](Self::flatten)
    pub fn output(&self) -> &FlattenedScene {
        &self.output
    }

    /// Resolve `tree` at animation time `time`, advancing self-spin by `dt`.
    pub fn flatten(&mut self, tree: &mut OrbitTree, camera: &Camera, time: f32, dt: f32) -> &FlattenedScene {
        accumulate_world_positions(tree, time);

        let eye = camera.position();
        for (index, (key, node)) in tree.keys.iter_mut().zip(&tree.nodes).enumerate() {
            debug_assert!(index == ROOT || node.scale > 0.0, "node {index} has scale {}", node.scale);
            *key = (eye - tree.world[index]).norm_squared() / (node.scale * node.scale);
        }

        tree.order.clear();
        tree.order.extend(1..tree.nodes.len());
        let keys = &tree.keys;
        tree.order.sort_unstable_by(|&a, &b| keys[a].total_cmp(&keys[b]));

        let view_projection = camera.view_projection();
        self.output.clear();
        let mut tier = 0;

        for &index in &tree.order {
            let node = &tree.nodes[index];
            let key = tree.keys[index];
            let translation = Mat4::new_translation(&tree.world[index]);
            let scaled = translation * Mat4::new_scaling(node.scale);

            // The unit cube bounds the body under any spin
            if !self.is_visible(&(view_projection * scaled)) {
                continue;
            }

            let node_tier = self.tier_of(key);
            while tier < node_tier {
                tier += 1;
                self.output.lod_offsets[tier] = self.output.visible.len();
            }

            let model = if node_tier < self.spin_tier_limit {
                let spin = &mut tree.spin[index];
                *spin = integrate_spin(spin, &node.spin_axis, node.spin_speed, dt);
                translation * spin.to_homogeneous() * Mat4::new_scaling(node.scale)
            } else {
                scaled
            };

            self.output.visible.push(index);
            self.output.instances.push(InstanceData::new(&model, node.material));
        }

        let total = self.output.visible.len();
        for offset in &mut self.output.lod_offsets[tier + 1..] {
            *offset = total;
        }
        &self.output
    }

    /// Number of breakpoints `key` strictly exceeds, capped at the last tier
    fn tier_of(&self, key: f32) -> usize {
        self.breakpoints
            .iter()
            .take_while(|&&b| key > b)
            .count()
            .min(LOD_TIERS - 1)
    }

    /// Project the unit cube through `mvp` and test its clip-space bounds
    /// against the expanded volume `xy ∈ [-m, m]`, `z ∈ [0, m]`.
    fn is_visible(&self, mvp: &Mat4) -> bool {
        let mut min = Vec3::repeat(f32::INFINITY);
        let mut max = Vec3::repeat(f32::NEG_INFINITY);
        let mut in_front = 0;

        for corner in 0..8 {
            let sign = |bit: u32| if corner & bit == 0 { -0.5 } else { 0.5 };
            let clip = mvp * Vec4::new(sign(1), sign(2), sign(4), 1.0);
            if clip.w <= 0.0 {
                continue;
            }
            in_front += 1;
            let ndc = math::perspective_divide(&clip);
            min = min.inf(&ndc);
            max = max.sup(&ndc);
        }

        match in_front {
            0 => false,
            // Straddles the eye plane; projected bounds are meaningless
            1..=7 => true,
            _ => {
                let m = self.clip_margin;
                max.x >= -m && min.x <= m && max.y >= -m && min.y <= m && max.z >= 0.0 && min.z <= m
            }
        }
    }
}

/// Sum each node's rotated offset with those of up to `height - 1` ancestors
fn accumulate_world_positions(tree: &mut OrbitTree, time: f32) {
    for (index, (world, cursor)) in tree.world.iter_mut().zip(tree.chain.iter_mut()).enumerate() {
        *world = Vec3::zeros();
        *cursor = index;
    }

    for _ in 0..tree.height {
        for index in (1..tree.nodes.len()).rev() {
            let ancestor = &tree.nodes[tree.chain[index]];
            tree.world[index] += math::rotate_about_axis(
                &ancestor.offset,
                &ancestor.orbit_axis,
                ancestor.orbit_speed * time,
            );
            tree.chain[index] = ancestor.parent;
        }
    }
}

/// One explicit step of `q' = ½ ω q`, renormalized
fn integrate_spin(q: &UnitQuaternion<f32>, axis: &Vec3, speed: f32, dt: f32) -> UnitQuaternion<f32> {
    let half = axis * (0.5 * speed * dt);
    let step = Quaternion::new(1.0, half.x, half.y, half.z);
    UnitQuaternion::new_normalize(step * q.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::orbit::OrbitNode;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

    const BREAKPOINTS: [f32; LOD_TIERS] = [5.0e1, 5.0e3, 5.0e4, f32::INFINITY];

    fn flattener() -> SceneFlattener {
        SceneFlattener::new(BREAKPOINTS, 1.1, 2)
    }

    fn camera_toward_y() -> Camera {
        Camera::look_at(Vec3::zeros(), Vec3::y(), FRAC_PI_4, 1.0, 0.1, 10000.0)
    }

    fn three_level_tree() -> OrbitTree {
        OrbitTree::new(
            vec![
                OrbitNode::root(),
                OrbitNode::fixed(ROOT, Vec3::new(0.0, 0.0, 1.0), 1.0),
                OrbitNode::fixed(1, Vec3::new(1.0, 0.0, 0.0), 0.1),
            ],
            2,
        )
        .unwrap()
    }

    fn generated_tree(count: usize) -> OrbitTree {
        OrbitTree::generate(count, 2, 13, &mut StdRng::seed_from_u64(0x7819_e801)).unwrap()
    }

    fn overview_camera() -> Camera {
        Camera::look_at(Vec3::new(0.0, -12.0, 2.0), Vec3::zeros(), FRAC_PI_4, 16.0 / 9.0, 0.1, 10000.0)
    }

    #[test]
    fn test_child_of_child_position() {
        let mut tree = three_level_tree();
        flattener().flatten(&mut tree, &camera_toward_y(), 0.0, 0.0);
        assert_relative_eq!(tree.world_positions()[2], Vec3::new(1.0, 0.0, 1.0), epsilon = 1.0e-6);
        assert_relative_eq!(tree.world_positions()[1], Vec3::new(0.0, 0.0, 1.0), epsilon = 1.0e-6);
    }

    #[test]
    fn test_height_limits_resolution() {
        let nodes = vec![
            OrbitNode::root(),
            OrbitNode::fixed(ROOT, Vec3::new(0.0, 0.0, 1.0), 1.0),
            OrbitNode::fixed(1, Vec3::new(1.0, 0.0, 0.0), 1.0),
            OrbitNode::fixed(2, Vec3::new(0.0, 1.0, 0.0), 1.0),
        ];
        let camera = camera_toward_y();

        let mut shallow = OrbitTree::new(nodes.clone(), 2).unwrap();
        flattener().flatten(&mut shallow, &camera, 0.0, 0.0);
        // Node 3 only sees itself and its parent
        assert_relative_eq!(shallow.world_positions()[3], Vec3::new(1.0, 1.0, 0.0), epsilon = 1.0e-6);

        let mut deep = OrbitTree::new(nodes, 3).unwrap();
        flattener().flatten(&mut deep, &camera, 0.0, 0.0);
        assert_relative_eq!(deep.world_positions()[3], Vec3::new(1.0, 1.0, 1.0), epsilon = 1.0e-6);
    }

    #[test]
    fn test_orbit_rotates_offset_with_time() {
        let mut node = OrbitNode::fixed(ROOT, Vec3::new(2.0, 0.0, 0.0), 1.0);
        node.orbit_speed = 0.5;
        let mut tree = OrbitTree::new(vec![OrbitNode::root(), node], 2).unwrap();

        flattener().flatten(&mut tree, &camera_toward_y(), PI_OVER_HALF_SPEED, 0.0);
        assert_relative_eq!(tree.world_positions()[1], Vec3::new(0.0, 2.0, 0.0), epsilon = 1.0e-5);
    }

    // Quarter turn at 0.5 rad/s
    const PI_OVER_HALF_SPEED: f32 = FRAC_PI_2 / 0.5;

    #[test]
    fn test_distant_body_is_not_in_nearest_tier() {
        let tree_nodes = vec![OrbitNode::root(), OrbitNode::fixed(ROOT, Vec3::new(0.0, 1000.0, 0.0), 1.0)];
        let mut tree = OrbitTree::new(tree_nodes, 2).unwrap();
        let mut flattener = flattener();
        let scene = flattener.flatten(&mut tree, &camera_toward_y(), 0.0, 0.0);

        assert_eq!(scene.visible(), &[1]);
        assert!(scene.bucket(0).is_empty());
        assert_eq!(scene.bucket(3), &[1]);
        assert_eq!(scene.tier_counts(), [0, 0, 0, 1]);
    }

    #[test]
    fn test_skipped_tiers_leave_empty_buckets() {
        let tree_nodes = vec![
            OrbitNode::root(),
            OrbitNode::fixed(ROOT, Vec3::new(0.0, 5.0, 0.0), 1.0),
            OrbitNode::fixed(ROOT, Vec3::new(0.0, 1000.0, 0.0), 1.0),
        ];
        let mut tree = OrbitTree::new(tree_nodes, 2).unwrap();
        let mut flattener = flattener();
        let scene = flattener.flatten(&mut tree, &camera_toward_y(), 0.0, 0.0);

        assert_eq!(scene.lod_offsets(), &[0, 1, 1, 1, 2]);
        assert_eq!(scene.bucket(0), &[1]);
        assert!(scene.bucket(1).is_empty() && scene.bucket(2).is_empty());
        assert_eq!(scene.bucket(3), &[2]);
    }

    #[test]
    fn test_root_is_never_emitted() {
        let mut tree = generated_tree(256);
        let mut flattener = flattener();
        let scene = flattener.flatten(&mut tree, &overview_camera(), 3.0, 0.016);
        assert!(!scene.visible().is_empty());
        assert!(!scene.visible().contains(&ROOT));
    }

    #[test]
    fn test_flatten_is_deterministic() {
        let camera = overview_camera();
        let mut a = generated_tree(512);
        let mut b = generated_tree(512);
        let mut fa = flattener();
        let mut fb = flattener();

        let first = fa.flatten(&mut a, &camera, 12.5, 0.0).clone();
        let second = fb.flatten(&mut b, &camera, 12.5, 0.0);
        assert_eq!(first.visible(), second.visible());
        assert_eq!(first.lod_offsets(), second.lod_offsets());
        assert_eq!(first.instances(), second.instances());
    }

    #[test]
    fn test_buckets_are_monotonic_and_contiguous() {
        let mut tree = generated_tree(2048);
        let mut flattener = flattener();
        let camera = Camera::look_at(Vec3::new(0.0, -80.0, 10.0), Vec3::zeros(), FRAC_PI_4, 1.0, 0.1, 10000.0);
        let scene = flattener.flatten(&mut tree, &camera, 1.0, 0.0);

        let offsets = scene.lod_offsets();
        assert_eq!(offsets[0], 0);
        assert_eq!(offsets[LOD_TIERS], scene.visible().len());
        assert!(offsets.windows(2).all(|w| w[0] <= w[1]));

        let keys = tree.sort_keys();
        assert!(scene.visible().windows(2).all(|w| keys[w[0]] <= keys[w[1]]));
        for tier in 0..LOD_TIERS {
            for &node in scene.bucket(tier) {
                let key = keys[node];
                if tier > 0 {
                    assert!(key > BREAKPOINTS[tier - 1]);
                }
                if tier < LOD_TIERS - 1 {
                    assert!(key <= BREAKPOINTS[tier]);
                }
            }
        }
        assert_eq!(scene.tier_counts().iter().sum::<usize>(), scene.visible().len());
    }

    #[test]
    fn test_bodies_behind_camera_are_culled() {
        let tree_nodes = vec![
            OrbitNode::root(),
            OrbitNode::fixed(ROOT, Vec3::new(0.0, 10.0, 0.0), 1.0),
            OrbitNode::fixed(ROOT, Vec3::new(0.0, -10.0, 0.0), 1.0),
            OrbitNode::fixed(ROOT, Vec3::new(100.0, 10.0, 0.0), 1.0),
        ];
        let mut tree = OrbitTree::new(tree_nodes, 2).unwrap();
        let mut flattener = flattener();
        let scene = flattener.flatten(&mut tree, &camera_toward_y(), 0.0, 0.0);
        assert_eq!(scene.visible(), &[1]);
    }

    #[test]
    fn test_body_around_the_eye_is_kept() {
        let tree_nodes = vec![OrbitNode::root(), OrbitNode::fixed(ROOT, Vec3::zeros(), 4.0)];
        let mut tree = OrbitTree::new(tree_nodes, 2).unwrap();
        let mut flattener = flattener();
        assert_eq!(flattener.flatten(&mut tree, &camera_toward_y(), 0.0, 0.0).visible(), &[1]);
    }

    #[test]
    fn test_spin_only_advances_for_near_visible_bodies() {
        let mut near = OrbitNode::fixed(ROOT, Vec3::new(0.0, 5.0, 0.0), 1.0);
        near.spin_speed = 2.0;
        let mut far = OrbitNode::fixed(ROOT, Vec3::new(0.0, 1000.0, 0.0), 1.0);
        far.spin_speed = 2.0;
        let mut hidden = OrbitNode::fixed(ROOT, Vec3::new(0.0, -5.0, 0.0), 1.0);
        hidden.spin_speed = 2.0;

        let mut tree = OrbitTree::new(vec![OrbitNode::root(), near, far, hidden], 2).unwrap();
        let mut flattener = flattener();
        flattener.flatten(&mut tree, &camera_toward_y(), 0.0, 0.1);

        assert!(tree.spin()[1].angle() > 0.0);
        assert_relative_eq!(tree.spin()[2].angle(), 0.0);
        assert_relative_eq!(tree.spin()[3].angle(), 0.0);
    }

    #[test]
    fn test_spin_integration_tracks_small_steps() {
        let mut q = UnitQuaternion::identity();
        for _ in 0..1000 {
            q = integrate_spin(&q, &Vec3::z(), 1.0, 0.001);
        }
        // 1 rad about z after 1 s, with first-order drift
        assert_relative_eq!(q.angle(), 1.0, epsilon = 1.0e-3);
        assert_relative_eq!(q.axis().unwrap().into_inner(), Vec3::z(), epsilon = 1.0e-5);
    }

    #[test]
    fn test_instance_carries_world_transform() {
        let mut tree = three_level_tree();
        let camera = Camera::look_at(Vec3::new(0.0, -5.0, 1.0), Vec3::new(0.0, 0.0, 1.0), FRAC_PI_4, 1.0, 0.1, 100.0);
        let mut flattener = flattener();
        let scene = flattener.flatten(&mut tree, &camera, 0.0, 0.0);

        let slot = scene.visible().iter().position(|&n| n == 2).unwrap();
        let instance = scene.instances()[slot];
        assert_eq!(instance.model[3], [1.0, 0.0, 1.0, 1.0]);
        assert_relative_eq!(instance.model[0][0], 0.1);
        assert_eq!(std::mem::size_of::<InstanceData>(), 80);
    }
}
