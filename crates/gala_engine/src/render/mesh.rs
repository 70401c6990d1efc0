//! Procedural body meshes
//!
//! Every body is drawn with a UV sphere of diameter 1. One sphere per LOD
//! tier is generated, coarsest last, and all four are packed into a single
//! vertex array and a single index array so a tier is selected purely by
//! base offsets at draw time.

use bytemuck::{Pod, Zeroable};
use std::f32::consts::{PI, TAU};

use crate::scene::LOD_TIERS;

/// Sphere radius; the unit cube used for culling bounds it exactly
pub const SPHERE_RADIUS: f32 = 0.5;

/// (longitude segments, latitude rings) per LOD tier
pub const SPHERE_LODS: [(u32, u32); LOD_TIERS] = [(64, 48), (16, 12), (8, 4), (3, 2)];

/// Mesh vertex
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Model-space position
    pub position: [f32; 3],
    /// Outward unit normal
    pub normal: [f32; 3],
    /// Equirectangular texture coordinate
    pub uv: [f32; 2],
}

impl Vertex {
    fn on_sphere(position: [f32; 3], uv: [f32; 2]) -> Self {
        let len = position.iter().map(|c| c * c).sum::<f32>().sqrt();
        Self {
            position,
            normal: position.map(|c| c / len),
            uv,
        }
    }
}

/// Indexed triangle list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    /// Vertices
    pub vertices: Vec<Vertex>,
    /// Triangle indices into `vertices`
    pub indices: Vec<u32>,
}

impl Mesh {
    /// UV sphere with `segments` columns and `rings` latitude rows between the poles.
    ///
    /// Each pole gets one vertex per segment so the texture seam stays clean.
    pub fn uv_sphere(segments: u32, rings: u32, radius: f32) -> Self {
        let row = segments + 1;
        let ring_vertices = row * rings;
        let mut vertices = Vec::with_capacity((ring_vertices + 2 * segments) as usize);
        let mut indices = Vec::with_capacity((6 * segments * rings) as usize);

        for ring in 0..rings {
            let v = (ring + 1) as f32 / (rings + 1) as f32;
            let (sin_polar, cos_polar) = (PI * v).sin_cos();
            for column in 0..=segments {
                let u = column as f32 / segments as f32;
                let (sin_azimuth, cos_azimuth) = (TAU * u).sin_cos();
                vertices.push(Vertex::on_sphere(
                    [radius * sin_polar * cos_azimuth, radius * sin_polar * sin_azimuth, radius * cos_polar],
                    [u, v],
                ));
            }
        }
        let north = vertices.len() as u32;
        for pole in 0..segments {
            let u = (pole as f32 + 0.5) / segments as f32;
            vertices.push(Vertex::on_sphere([0.0, 0.0, radius], [u, 0.0]));
        }
        let south = vertices.len() as u32;
        for pole in 0..segments {
            let u = (pole as f32 + 0.5) / segments as f32;
            vertices.push(Vertex::on_sphere([0.0, 0.0, -radius], [u, 1.0]));
        }

        for ring in 0..rings.saturating_sub(1) {
            for column in 0..segments {
                let top = ring * row + column;
                let bottom = top + row;
                indices.extend_from_slice(&[top, bottom, bottom + 1, top, bottom + 1, top + 1]);
            }
        }
        let last_row = ring_vertices - row;
        for pole in 0..segments {
            indices.extend_from_slice(&[north + pole, pole, pole + 1]);
            indices.extend_from_slice(&[south + pole, last_row + pole + 1, last_row + pole]);
        }

        Self { vertices, indices }
    }
}

/// All LOD spheres packed back to back
#[derive(Debug, Clone, PartialEq)]
pub struct SphereLods {
    /// Concatenated vertices
    pub vertices: Vec<Vertex>,
    /// Concatenated indices, each relative to its own tier's vertex base
    pub indices: Vec<u32>,
    /// Tier `t` owns vertices `vertex_base[t]..vertex_base[t + 1]`
    pub vertex_base: [u32; LOD_TIERS + 1],
    /// Tier `t` owns indices `index_base[t]..index_base[t + 1]`
    pub index_base: [u32; LOD_TIERS + 1],
}

impl SphereLods {
    /// Build the standard four tiers
    pub fn generate() -> Self {
        let mut lods = Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            vertex_base: [0; LOD_TIERS + 1],
            index_base: [0; LOD_TIERS + 1],
        };
        for (tier, &(segments, rings)) in SPHERE_LODS.iter().enumerate() {
            let mesh = Mesh::uv_sphere(segments, rings, SPHERE_RADIUS);
            lods.vertices.extend_from_slice(&mesh.vertices);
            lods.indices.extend_from_slice(&mesh.indices);
            lods.vertex_base[tier + 1] = lods.vertices.len() as u32;
            lods.index_base[tier + 1] = lods.indices.len() as u32;
        }
        lods
    }

    /// Number of indices drawn for `tier`
    pub fn index_count(&self, tier: usize) -> u32 {
        self.index_base[tier + 1] - self.index_base[tier]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sphere_counts() {
        let (segments, rings) = (8, 4);
        let mesh = Mesh::uv_sphere(segments, rings, 0.5);
        assert_eq!(mesh.vertices.len() as u32, (segments + 1) * rings + 2 * segments);
        assert_eq!(mesh.indices.len() as u32, 6 * segments * (rings - 1) + 6 * segments);
        assert_eq!(mesh.indices.len() % 3, 0);
    }

    #[test]
    fn test_sphere_vertices_on_surface() {
        let mesh = Mesh::uv_sphere(16, 12, 0.5);
        for vertex in &mesh.vertices {
            let p = nalgebra::Vector3::from(vertex.position);
            assert_relative_eq!(p.norm(), 0.5, epsilon = 1.0e-5);
            assert_relative_eq!(nalgebra::Vector3::from(vertex.normal), p / 0.5, epsilon = 1.0e-5);
        }
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
    }

    #[test]
    fn test_coarsest_sphere_is_closed() {
        let mesh = Mesh::uv_sphere(3, 2, 0.5);
        // Every edge of a closed surface is shared by exactly two triangles
        let mut edges = std::collections::HashMap::new();
        for tri in mesh.indices.chunks(3) {
            for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                let pa = mesh.vertices[a as usize].position.map(|c| (c * 1.0e4).round() as i32);
                let pb = mesh.vertices[b as usize].position.map(|c| (c * 1.0e4).round() as i32);
                if pa == pb {
                    continue;
                }
                *edges.entry(if pa < pb { (pa, pb) } else { (pb, pa) }).or_insert(0) += 1;
            }
        }
        assert!(edges.values().all(|&n| n == 2));
    }

    #[test]
    fn test_lods_pack_contiguously() {
        let lods = SphereLods::generate();
        assert_eq!(lods.vertex_base[0], 0);
        assert_eq!(lods.vertex_base[LOD_TIERS] as usize, lods.vertices.len());
        assert_eq!(lods.index_base[LOD_TIERS] as usize, lods.indices.len());
        assert!((1..LOD_TIERS).all(|t| lods.index_count(t) < lods.index_count(t - 1)));

        for tier in 0..LOD_TIERS {
            let span = lods.vertex_base[tier + 1] - lods.vertex_base[tier];
            let range = lods.index_base[tier] as usize..lods.index_base[tier + 1] as usize;
            assert!(lods.indices[range].iter().all(|&i| i < span));
        }
    }
}
